//! Pointing-correction mesh.
//!
//! Text format, one point per line, `#` starts a comment:
//!
//! ```text
//! # lon_deg  lat_deg  dlon_arcsec  dlat_arcsec
//!   -30.0    20.0     12.5         -3.1
//! ```
//!
//! `lon`/`lat` are hour angle and declination on equatorial mounts, azimuth
//! and altitude on alt-az mounts. The correction at any position is the
//! inverse-distance-weighted mean of the nearest mesh points.

use std::path::Path;
use tcs_common::astro::coords::separation;
use tcs_common::consts::MESH_NEIGHBOURS;
use thiserror::Error;

const ARCSEC: f64 = std::f64::consts::PI / (180.0 * 3600.0);

/// Points closer than this are treated as coincident [rad].
const COINCIDENT: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum MeshError {
    #[error("{path}: {reason}")]
    Io { path: String, reason: String },

    #[error("line {line}: {reason}")]
    Syntax { line: usize, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshPoint {
    /// [rad]
    pub lon: f64,
    pub lat: f64,
    /// Correction to add [rad].
    pub dlon: f64,
    pub dlat: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointingMesh {
    points: Vec<MeshPoint>,
}

impl PointingMesh {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_points(points: Vec<MeshPoint>) -> Self {
        Self { points }
    }

    pub fn load(path: &Path) -> Result<Self, MeshError> {
        let text = std::fs::read_to_string(path).map_err(|e| MeshError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Self, MeshError> {
        let mut points = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let line = raw.split('#').next().unwrap_or("").trim();
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split_whitespace().collect();
            if fields.len() != 4 {
                return Err(MeshError::Syntax {
                    line: idx + 1,
                    reason: format!("expected 4 numbers, found {}", fields.len()),
                });
            }
            let mut v = [0.0; 4];
            for (slot, field) in v.iter_mut().zip(&fields) {
                *slot = field.parse::<f64>().map_err(|_| MeshError::Syntax {
                    line: idx + 1,
                    reason: format!("not a number: {field}"),
                })?;
                if !slot.is_finite() {
                    return Err(MeshError::Syntax {
                        line: idx + 1,
                        reason: format!("not finite: {field}"),
                    });
                }
            }
            if v[1].abs() > 90.0 {
                return Err(MeshError::Syntax {
                    line: idx + 1,
                    reason: format!("latitude {} out of range", v[1]),
                });
            }
            points.push(MeshPoint {
                lon: v[0].to_radians(),
                lat: v[1].to_radians(),
                dlon: v[2] * ARCSEC,
                dlat: v[3] * ARCSEC,
            });
        }
        Ok(Self { points })
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Correction (dlon, dlat) at a position [rad].
    pub fn correction(&self, lon: f64, lat: f64) -> (f64, f64) {
        if self.points.is_empty() {
            return (0.0, 0.0);
        }
        let mut nearest: Vec<(f64, &MeshPoint)> = self
            .points
            .iter()
            .map(|p| (separation(lon, lat, p.lon, p.lat), p))
            .collect();
        nearest.sort_by(|a, b| a.0.total_cmp(&b.0));
        nearest.truncate(MESH_NEIGHBOURS);

        if let Some((d, p)) = nearest.first() {
            if *d < COINCIDENT {
                return (p.dlon, p.dlat);
            }
        }

        let (mut wsum, mut lon_acc, mut lat_acc) = (0.0, 0.0, 0.0);
        for (d, p) in &nearest {
            let w = 1.0 / (d * d);
            wsum += w;
            lon_acc += w * p.dlon;
            lat_acc += w * p.dlat;
        }
        (lon_acc / wsum, lat_acc / wsum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MESH: &str = "\
# sample
  0  0   10  0
 90  0   20  0   # east
  0 45    0 10
";

    #[test]
    fn parses_with_comments() {
        let mesh = PointingMesh::parse(MESH).unwrap();
        assert_eq!(mesh.len(), 3);
    }

    #[test]
    fn exact_point_returns_its_correction() {
        let mesh = PointingMesh::parse(MESH).unwrap();
        let (dlon, dlat) = mesh.correction(0.0, 0.0);
        assert!((dlon - 10.0 * ARCSEC).abs() < 1e-15);
        assert_eq!(dlat, 0.0);
    }

    #[test]
    fn interpolation_is_bounded_by_neighbours() {
        let mesh = PointingMesh::parse(MESH).unwrap();
        let (dlon, dlat) = mesh.correction(0.3, 0.2);
        assert!(dlon > 0.0 && dlon < 20.0 * ARCSEC);
        assert!(dlat > 0.0 && dlat < 10.0 * ARCSEC);
    }

    #[test]
    fn empty_mesh_is_zero() {
        assert_eq!(PointingMesh::empty().correction(1.0, 0.5), (0.0, 0.0));
    }

    #[test]
    fn malformed_line_reports_number() {
        let err = PointingMesh::parse("0 0 1 1\n1 2 3\n").unwrap_err();
        assert!(matches!(err, MeshError::Syntax { line: 2, .. }));
        let err = PointingMesh::parse("0 x 1 1\n").unwrap_err();
        assert!(err.to_string().contains("not a number"));
    }
}
