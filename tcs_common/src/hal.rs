//! Hardware collaborator interface.
//!
//! The control core drives motors only through [`driver::HardwareBinding`].
//! Concrete bindings live in `tcs_hal`.

pub mod driver;
pub mod types;
