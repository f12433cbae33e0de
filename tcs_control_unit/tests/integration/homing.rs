//! Integration test: homing on the Control, Dome and Focus channels.

use tcs_common::control_unit::state::{AxisId, OperationState, Subsystem};
use tcs_common::control_unit::telemetry::AlertFlags;
use tcs_control_unit::command::ChannelId;

use super::{Observatory, code};

#[test]
fn mount_home_clears_not_homed() {
    let mut obs = Observatory::new();
    obs.sim.set_physical_angle(AxisId::MountX, -0.02);
    obs.sim.set_physical_angle(AxisId::MountY, -0.02);
    obs.step();
    assert!(obs.runner.snapshot().alerts.contains(AlertFlags::NOT_HOMED));

    obs.send(ChannelId::Control, "home");
    let lines = obs.run_until_reply(ChannelId::Control, 800);
    assert_eq!(code(lines.last().unwrap()), 0, "{lines:?}");
    // Every line before the last is progress.
    assert!(lines[..lines.len() - 1].iter().all(|l| code(l) == 1));

    let snap = obs.runner.snapshot();
    assert!(!snap.alerts.contains(AlertFlags::NOT_HOMED));
    assert!(snap.axis(AxisId::MountX).unwrap().homed);
    assert!(snap.axis(AxisId::MountY).unwrap().homed);
    assert_eq!(snap.state(Subsystem::Mount), OperationState::Idle);
}

#[test]
fn home_of_unfitted_axis_is_refused() {
    let mut obs = Observatory::new();
    let lines = obs.command(ChannelId::Control, "home r");
    assert_eq!(lines.len(), 1);
    assert_eq!(code(&lines[0]), -2, "{lines:?}");
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Idle);
}

#[test]
fn dome_and_focus_home_on_their_own_channels() {
    let mut obs = Observatory::new();
    obs.send(ChannelId::Dome, "home");
    obs.send(ChannelId::Focus, "home");

    let dome = obs.run_until_reply(ChannelId::Dome, 400);
    assert_eq!(code(dome.last().unwrap()), 0, "{dome:?}");
    let focus = obs.run_until_reply(ChannelId::Focus, 600);
    assert_eq!(code(focus.last().unwrap()), 0, "{focus:?}");

    let snap = obs.runner.snapshot();
    assert!(snap.axis(AxisId::DomeAz).unwrap().homed);
    assert!(snap.axis(AxisId::Focus).unwrap().homed);
    // The mount is untouched.
    assert_eq!(snap.state(Subsystem::Mount), OperationState::Idle);
    assert!(snap.alerts.contains(AlertFlags::NOT_HOMED));
}

#[test]
fn motion_during_homing_is_refused() {
    let mut obs = Observatory::new();
    obs.command(ChannelId::Control, "home");
    let jog = obs.command(ChannelId::Paddle, "jog N");
    assert_eq!(jog.len(), 1);
    assert_eq!(code(&jog[0]), -2, "{jog:?}");
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Homing);
    assert!(obs.runner.dispatcher().is_pending(ChannelId::Control));
}
