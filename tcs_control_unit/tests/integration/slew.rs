//! Integration test: slews through the Slew channel.

use tcs_common::control_unit::state::{AxisId, OperationState, Subsystem};
use tcs_control_unit::command::ChannelId;
use tcs_control_unit::config::load_config_from_str;

use super::{CONFIG, Observatory, code};

#[test]
fn slew_replies_once_on_arrival() {
    let mut obs = Observatory::new();
    obs.send(ChannelId::Slew, "slew hadec -0.2 35");
    let lines = obs.run_until_reply(ChannelId::Slew, 600);
    assert_eq!(lines.len(), 1, "{lines:?}");
    assert_eq!(code(&lines[0]), 0);

    let snap = obs.runner.snapshot();
    assert_eq!(snap.state(Subsystem::Mount), OperationState::Idle);
    let x = snap.axis(AxisId::MountX).unwrap();
    // x = -HA
    assert!((x.position - (0.2f64 * 15.0).to_radians()).abs() < 1e-4, "x {}", x.position);
    let y = snap.axis(AxisId::MountY).unwrap();
    assert!((y.position - 35f64.to_radians()).abs() < 1e-3, "y {}", y.position);

    // Nothing else arrives afterwards.
    obs.steps(10);
    assert!(obs.replies(ChannelId::Slew).is_empty());
}

#[test]
fn slew_outside_travel_is_refused_and_state_kept() {
    let text = CONFIG.replacen("pos_limit = 1.6", "pos_limit = 0.5", 1);
    let mut obs = Observatory::with_config(load_config_from_str(&text).unwrap());
    let lines = obs.command(ChannelId::Slew, "slew hadec 0 60");
    assert_eq!(lines.len(), 1);
    assert_eq!(code(&lines[0]), -3, "{lines:?}");
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Idle);
    assert!(!obs.runner.dispatcher().is_pending(ChannelId::Slew));
}

#[test]
fn track_supersedes_pending_slew() {
    let mut obs = Observatory::new();
    assert!(obs.command(ChannelId::Slew, "slew hadec -1 20").is_empty());
    obs.steps(3);

    assert!(obs.command(ChannelId::Track, "track radec 3 20").is_empty());
    let slew = obs.replies(ChannelId::Slew);
    assert_eq!(slew, vec!["-7 superseded by Track"]);
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Hunting);
    assert_eq!(
        obs.runner.snapshot().subsystem(Subsystem::Mount).unwrap().owner.as_deref(),
        Some("Track")
    );
}

#[test]
fn control_stop_interrupts_every_subsystem() {
    let mut obs = Observatory::new();
    obs.command(ChannelId::Slew, "slew hadec -1 20");
    obs.command(ChannelId::Dome, "dome 120");
    obs.steps(5);

    let stop = obs.command(ChannelId::Control, "stop");
    assert_eq!(stop, vec!["0 stopped"]);
    assert_eq!(obs.replies(ChannelId::Slew), vec!["-7 stopped by Control"]);
    assert_eq!(obs.replies(ChannelId::Dome), vec!["-7 stopped by Control"]);

    let snap = obs.runner.snapshot();
    assert_eq!(snap.state(Subsystem::Mount), OperationState::Stopped);
    assert_eq!(snap.state(Subsystem::Dome), OperationState::Stopped);
    // Stopped keeps the last target.
    assert!(snap.axis(AxisId::MountX).unwrap().target.is_some());
}

#[test]
fn slew_channel_stop_leaves_dome_alone() {
    let mut obs = Observatory::new();
    obs.command(ChannelId::Slew, "slew hadec -1 20");
    obs.command(ChannelId::Dome, "dome 120");

    assert_eq!(obs.command(ChannelId::Slew, "stop"), vec!["0 stopped"]);
    assert!(obs.replies(ChannelId::Dome).is_empty());
    assert_eq!(obs.runner.snapshot().state(Subsystem::Dome), OperationState::Slewing);
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Stopped);
}

#[test]
fn stalled_axis_fails_the_slew() {
    let mut obs = Observatory::new();
    obs.command(ChannelId::Slew, "slew hadec -2 10");
    obs.steps(10);
    obs.sim.set_stalled(AxisId::MountX, true);
    let lines = obs.run_until_reply(ChannelId::Slew, 30);
    assert_eq!(code(lines.last().unwrap()), -4, "{lines:?}");
    let mount = obs.runner.snapshot().subsystem(Subsystem::Mount).unwrap().clone();
    assert_eq!(mount.state, OperationState::Stopped);
    assert!(mount.last_failure.is_some());
}
