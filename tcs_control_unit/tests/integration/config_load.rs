//! Integration test: configuration files, saved limits, reset reloads and
//! the telemetry file.

use std::path::Path;

use tcs_common::control_unit::state::{OperationState, Subsystem};
use tcs_common::control_unit::telemetry::TelemetrySnapshot;
use tcs_control_unit::command::ChannelId;
use tcs_control_unit::config::load_config;

use super::{CONFIG, Observatory, code};

/// Write CONFIG with extra `[loop]` keys into `dir` and load it.
fn observatory_in(dir: &Path, loop_keys: &str) -> Observatory {
    let text = CONFIG.replacen("[loop]\n", &format!("[loop]\n{loop_keys}"), 1);
    let path = dir.join("observatory.toml");
    std::fs::write(&path, text).unwrap();
    Observatory::with_config(load_config(&path).unwrap())
}

#[test]
fn saved_limits_narrow_travel_at_startup() {
    let dir = tempfile::tempdir().unwrap();
    let limits = dir.path().join("limits.toml");
    std::fs::write(&limits, "[Dec]\npos_limit = 1.2\nneg_limit = -1.1\n").unwrap();
    let mut obs = observatory_in(
        dir.path(),
        &format!("limits_state_file = \"{}\"\n", limits.display()),
    );

    assert_eq!(obs.runner.config().observatory.mount.y.pos_limit, 1.2);
    assert_eq!(obs.runner.config().observatory.mount.y.neg_limit, -1.1);
    let refused = obs.command(ChannelId::Slew, "slew hadec 0 80");
    assert_eq!(code(&refused[0]), -3, "{refused:?}");
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Idle);
}

#[test]
fn reset_rereads_configuration_and_limits() {
    let dir = tempfile::tempdir().unwrap();
    let limits = dir.path().join("limits.toml");
    let mut obs = observatory_in(
        dir.path(),
        &format!("limits_state_file = \"{}\"\n", limits.display()),
    );
    assert_eq!(obs.runner.config().observatory.mount.y.pos_limit, 1.6);

    std::fs::write(&limits, "[Dec]\npos_limit = 0.5\nneg_limit = -0.5\n").unwrap();
    assert_eq!(obs.command(ChannelId::Control, "reset"), vec!["0 reset"]);
    assert_eq!(obs.runner.config().observatory.mount.y.pos_limit, 0.5);
}

#[test]
fn reset_with_broken_file_keeps_running() {
    let dir = tempfile::tempdir().unwrap();
    let mut obs = observatory_in(dir.path(), "");
    std::fs::write(dir.path().join("observatory.toml"), "[loop\n").unwrap();

    let reply = obs.command(ChannelId::Control, "reset");
    assert_eq!(reply.len(), 1);
    assert_eq!(code(&reply[0]), -2, "{reply:?}");

    // Still serving commands with the old configuration.
    assert!(obs.command(ChannelId::Dome, "dome 30").is_empty());
    assert_eq!(obs.runner.snapshot().state(Subsystem::Dome), OperationState::Slewing);
}

#[test]
fn telemetry_file_tracks_the_board() {
    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("telemetry.json");
    let mut obs = observatory_in(
        dir.path(),
        &format!("telemetry_path = \"{}\"\ntelemetry_interval = 1\n", file.display()),
    );
    obs.steps(2);
    obs.command(ChannelId::Slew, "slew hadec -0.5 10");

    let text = std::fs::read_to_string(&file).unwrap();
    let snap: TelemetrySnapshot = serde_json::from_str(&text).unwrap();
    assert_eq!(snap.tick, 3);
    assert_eq!(snap.state(Subsystem::Mount), OperationState::Slewing);
    assert_eq!(obs.runner.board().latest().tick, snap.tick);
}
