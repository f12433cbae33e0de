//! TelemetryStore: the per-tick observatory record.
//!
//! The control loop owns the store and is its only writer. At the end of
//! each tick `commit` publishes an immutable copy:
//!
//! - to the in-process [`SnapshotBoard`], where readers get an
//!   `Arc<TelemetrySnapshot>` plus a generation counter that increments
//!   once per commit;
//! - every `telemetry_interval` ticks, to an optional JSON file that is
//!   written beside its final name and renamed into place, so other
//!   processes never read a partial snapshot.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tcs_common::control_unit::telemetry::TelemetrySnapshot;
use thiserror::Error;
use tracing::trace;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("telemetry file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("telemetry encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

// ─── Snapshot Board ─────────────────────────────────────────────────

/// Latest committed snapshot for in-process readers.
#[derive(Debug, Default)]
pub struct SnapshotBoard {
    current: RwLock<Arc<TelemetrySnapshot>>,
    generation: AtomicU64,
}

impl SnapshotBoard {
    pub fn latest(&self) -> Arc<TelemetrySnapshot> {
        Arc::clone(&*self.current.read())
    }

    /// Number of commits so far; changes exactly when `latest` does.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    fn publish(&self, snapshot: Arc<TelemetrySnapshot>) {
        *self.current.write() = snapshot;
        self.generation.fetch_add(1, Ordering::Release);
    }
}

// ─── JSON File ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct JsonPublisher {
    path: PathBuf,
    tmp: PathBuf,
    interval: u32,
    countdown: u32,
}

impl JsonPublisher {
    /// Publish to `path` every `interval` commits (the first commit
    /// always writes).
    pub fn new(path: &Path, interval: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            tmp: path.with_extension("tmp"),
            interval: interval.max(1),
            countdown: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn offer(&mut self, snapshot: &TelemetrySnapshot) -> Result<(), TelemetryError> {
        if self.countdown > 0 {
            self.countdown -= 1;
            return Ok(());
        }
        self.countdown = self.interval - 1;
        let json = serde_json::to_vec(snapshot)?;
        std::fs::write(&self.tmp, json).map_err(|source| self.io(source))?;
        std::fs::rename(&self.tmp, &self.path).map_err(|source| self.io(source))?;
        trace!(path = %self.path.display(), tick = snapshot.tick, "telemetry file written");
        Ok(())
    }

    fn io(&self, source: std::io::Error) -> TelemetryError {
        TelemetryError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

// ─── Store ──────────────────────────────────────────────────────────

#[derive(Debug)]
pub struct TelemetryStore {
    working: TelemetrySnapshot,
    board: Arc<SnapshotBoard>,
    file: Option<JsonPublisher>,
}

impl TelemetryStore {
    pub fn new(file: Option<JsonPublisher>) -> Self {
        Self {
            working: TelemetrySnapshot::default(),
            board: Arc::new(SnapshotBoard::default()),
            file,
        }
    }

    /// Snapshot being assembled for the current tick.
    pub fn working(&self) -> &TelemetrySnapshot {
        &self.working
    }

    pub fn working_mut(&mut self) -> &mut TelemetrySnapshot {
        &mut self.working
    }

    /// Reader handle; survives runner resets.
    pub fn board(&self) -> Arc<SnapshotBoard> {
        Arc::clone(&self.board)
    }

    /// Publish the working snapshot as the tick's final state.
    ///
    /// The board is always updated; a file error is returned after that.
    pub fn commit(&mut self) -> Result<(), TelemetryError> {
        let published = Arc::new(self.working.clone());
        self.board.publish(Arc::clone(&published));
        match self.file.as_mut() {
            Some(file) => file.offer(&published),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tcs_common::control_unit::state::{OperationState, Subsystem};
    use tcs_common::control_unit::telemetry::AlertFlags;

    #[test]
    fn readers_see_whole_commits_only() {
        let mut store = TelemetryStore::new(None);
        let board = store.board();
        assert_eq!(board.generation(), 0);

        store.working_mut().tick = 1;
        store.working_mut().alerts = AlertFlags::ESTOP;
        // Not visible before commit.
        assert_eq!(board.latest().tick, 0);
        store.commit().unwrap();
        assert_eq!(board.generation(), 1);
        let snap = board.latest();
        assert_eq!(snap.tick, 1);
        assert!(snap.alerts.contains(AlertFlags::ESTOP));

        store.working_mut().tick = 2;
        store.commit().unwrap();
        // An earlier reader keeps its own copy.
        assert_eq!(snap.tick, 1);
        assert_eq!(board.latest().tick, 2);
    }

    #[test]
    fn json_file_follows_interval() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("telemetry.json");
        let mut store = TelemetryStore::new(Some(JsonPublisher::new(&path, 2)));

        store.working_mut().tick = 1;
        if let Some(entry) = store.working_mut().subsystem_mut(Subsystem::Dome) {
            entry.state = OperationState::Slewing;
        }
        store.commit().unwrap();
        let read = || -> TelemetrySnapshot {
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap()
        };
        assert_eq!(read().tick, 1);
        assert_eq!(read().state(Subsystem::Dome), OperationState::Slewing);

        store.working_mut().tick = 2;
        store.commit().unwrap();
        assert_eq!(read().tick, 1);

        store.working_mut().tick = 3;
        store.commit().unwrap();
        assert_eq!(read().tick, 3);
        assert!(!dir.path().join("telemetry.tmp").exists());
    }
}
