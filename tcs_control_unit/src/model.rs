//! AxisModel: pure mappings between raw counts, canonical radians and the
//! native position pair of a mount.

pub mod axis;
pub mod geometry;
pub mod mesh;

pub use axis::{Axis, Sample, TravelLimits};
pub use geometry::MountGeometry;
pub use mesh::{MeshError, PointingMesh};
