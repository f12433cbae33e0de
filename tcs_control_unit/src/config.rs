//! Daemon configuration loading.
//!
//! One TOML file deserialises into [`ObservatoryConfig`]; the pointing mesh
//! it names is loaded alongside so the runner starts from a complete,
//! validated bundle. A relative `mesh_file` is resolved against the
//! directory holding the configuration file.

use std::path::{Path, PathBuf};

use tcs_common::config::{ConfigError, ConfigLoader};
use tcs_common::control_unit::config::ObservatoryConfig;
use tracing::{debug, info};

use crate::model::PointingMesh;

// ─── Loaded Config Bundle ───────────────────────────────────────────

/// Validated configuration, ready for runtime use.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub observatory: ObservatoryConfig,
    pub mesh: PointingMesh,
    /// File the bundle was read from; `reset` reloads it.
    pub source: Option<PathBuf>,
}

// ─── Loading Functions ──────────────────────────────────────────────

/// Load and validate the configuration file at `path`.
pub fn load_config(path: &Path) -> Result<LoadedConfig, ConfigError> {
    let observatory = ObservatoryConfig::load(path)?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    let mut loaded = finish(observatory, Some(base))?;
    loaded.source = Some(path.to_path_buf());
    info!(
        path = %path.display(),
        driver = %loaded.observatory.hardware.driver,
        mesh_points = loaded.mesh.len(),
        "configuration loaded"
    );
    Ok(loaded)
}

/// Load config from a TOML string (for testing). A relative mesh path is
/// taken relative to the working directory.
pub fn load_config_from_str(content: &str) -> Result<LoadedConfig, ConfigError> {
    let observatory = ObservatoryConfig::load_str(content)?;
    finish(observatory, None)
}

fn finish(observatory: ObservatoryConfig, base: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    observatory.validate().map_err(ConfigError::ValidationError)?;
    let mesh = match observatory.mount.mesh_file {
        Some(ref file) => {
            let path = match base {
                Some(dir) if file.is_relative() => dir.join(file),
                _ => file.clone(),
            };
            let mesh = PointingMesh::load(&path).map_err(|e| ConfigError::MeshError(e.to_string()))?;
            debug!(path = %path.display(), points = mesh.len(), "pointing mesh loaded");
            mesh
        }
        None => PointingMesh::empty(),
    };
    Ok(LoadedConfig {
        observatory,
        mesh,
        source: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::CONFIG;
    use std::io::Write;

    #[test]
    fn loads_full_observatory_from_string() {
        let loaded = load_config_from_str(CONFIG).unwrap();
        assert!(loaded.observatory.dome.is_some());
        assert!(loaded.observatory.shutter.is_some());
        assert_eq!(loaded.observatory.filter.as_ref().unwrap().slots.len(), 3);
        assert!(loaded.mesh.is_empty());
        assert!(loaded.source.is_none());
    }

    #[test]
    fn validation_failure_is_reported() {
        let broken = CONFIG.replace("cycle_time_ms = 100", "cycle_time_ms = 1");
        let err = load_config_from_str(&broken).unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn mesh_is_resolved_next_to_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("mesh.txt"),
            "# lon lat dlon dlat\n0 30 10 -5\n30 30 12 -4\n",
        )
        .unwrap();
        let text = CONFIG.replace(
            "[mount]\n",
            "[mount]\nmesh_file = \"mesh.txt\"\n",
        );
        let path = dir.path().join("observatory.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(text.as_bytes()).unwrap();

        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.mesh.len(), 2);
        assert_eq!(loaded.source.as_deref(), Some(path.as_path()));
    }

    #[test]
    fn malformed_mesh_is_a_mesh_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("mesh.txt"), "0 30 ten\n").unwrap();
        let text = CONFIG.replace("[mount]\n", "[mount]\nmesh_file = \"mesh.txt\"\n");
        let path = dir.path().join("observatory.toml");
        std::fs::write(&path, text).unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::MeshError(_))));
    }

    #[test]
    fn missing_file() {
        let err = load_config(Path::new("/nonexistent/observatory.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
