//! Persistence of travel limits found by FindingLimits.
//!
//! The state file is TOML, one table per axis name:
//!
//! ```toml
//! [HA]
//! pos_limit = 3.12
//! neg_limit = -3.08
//! ```
//!
//! It is re-applied to the configuration at startup and on reset, so a
//! measured range survives restarts.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tcs_common::control_unit::config::{AxisConfig, ObservatoryConfig};
use thiserror::Error;
use tracing::{debug, info};

use crate::state::FoundLimits;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("limits state {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("limits state {path} is malformed: {reason}")]
    Format { path: String, reason: String },
}

/// Saved range of one axis [rad].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavedLimits {
    pub pos_limit: f64,
    pub neg_limit: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LimitsState {
    axes: BTreeMap<String, SavedLimits>,
}

impl LimitsState {
    /// Read the state file; a missing file is an empty state.
    pub fn load(path: &Path) -> Result<Self, PersistError> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(PersistError::Io {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                });
            }
        };
        let axes: BTreeMap<String, SavedLimits> =
            toml::from_str(&text).map_err(|e| PersistError::Format {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
        debug!(path = %path.display(), axes = axes.len(), "limits state loaded");
        Ok(Self { axes })
    }

    /// Write the whole state, replacing the file atomically.
    pub fn save(&self, path: &Path) -> Result<(), PersistError> {
        let io = |e: std::io::Error| PersistError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        };
        let text = toml::to_string(&self.axes).map_err(|e| PersistError::Format {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, text).map_err(io)?;
        std::fs::rename(&tmp, path).map_err(io)?;
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<SavedLimits> {
        self.axes.get(name).copied()
    }

    pub fn len(&self) -> usize {
        self.axes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.axes.is_empty()
    }

    pub fn record(&mut self, found: &FoundLimits) {
        self.axes.insert(
            found.name.clone(),
            SavedLimits {
                pos_limit: found.limits.pos,
                neg_limit: found.limits.neg,
            },
        );
    }

    /// Overwrite the configured range of every axis with a saved entry.
    /// Entries that would invert the range are skipped. Returns the number
    /// of axes updated.
    pub fn apply(&self, config: &mut ObservatoryConfig) -> usize {
        let mut applied = 0;
        for axis in axis_configs(config) {
            let Some(saved) = self.axes.get(&axis.name) else {
                continue;
            };
            if saved.neg_limit >= saved.pos_limit {
                continue;
            }
            axis.pos_limit = saved.pos_limit;
            axis.neg_limit = saved.neg_limit;
            applied += 1;
        }
        if applied > 0 {
            info!(axes = applied, "saved travel limits applied");
        }
        applied
    }
}

/// Record `found` in the state file at `path`, keeping other axes.
pub fn persist_found(path: &Path, found: &[FoundLimits]) -> Result<(), PersistError> {
    let mut state = LimitsState::load(path)?;
    for entry in found {
        state.record(entry);
    }
    state.save(path)?;
    info!(path = %path.display(), axes = found.len(), "found limits saved");
    Ok(())
}

fn axis_configs(config: &mut ObservatoryConfig) -> impl Iterator<Item = &mut AxisConfig> {
    let mount = &mut config.mount;
    [Some(&mut mount.x), Some(&mut mount.y), mount.r.as_mut()]
        .into_iter()
        .chain([
            config.dome.as_mut().map(|d| &mut d.az),
            config.focus.as_mut().map(|f| &mut f.axis),
            config.filter.as_mut().map(|f| &mut f.axis),
        ])
        .flatten()
}
