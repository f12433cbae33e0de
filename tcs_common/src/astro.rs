//! Ephemeris collaborator.
//!
//! Converts a target description and a timestamp into an instantaneous
//! apparent place for the configured site. The control core only sees the
//! [`Ephemeris`] trait; [`SiteEphemeris`] is the built-in implementation.

pub mod coords;
pub mod ephemeris;
pub mod kepler;
pub mod sidereal;

pub use ephemeris::{ApparentPlace, Ephemeris, EphemerisError, SiteEphemeris, TargetObject};
pub use kepler::OrbitalElements;
