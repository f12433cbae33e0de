//! Integration test: channel vocabulary, instrument channels, reset and
//! hardware faults.

use tcs_common::control_unit::state::{AxisId, OperationState, Subsystem};
use tcs_common::control_unit::telemetry::AlertFlags;
use tcs_control_unit::command::ChannelId;

use super::{Observatory, code};

#[test]
fn malformed_and_misdirected_lines_are_format_errors() {
    let mut obs = Observatory::new();
    for (channel, line) in [
        (ChannelId::Control, "fly me to the moon"),
        (ChannelId::Slew, "slew radec 25"),
        (ChannelId::Slew, "track radec 1 2"),
        (ChannelId::Shutter, "home"),
        (ChannelId::Paddle, "jog q"),
    ] {
        let reply = obs.command(channel, line);
        assert_eq!(reply.len(), 1, "{line}: {reply:?}");
        assert_eq!(code(&reply[0]), -1, "{line}: {reply:?}");
    }
    for subsystem in [Subsystem::Mount, Subsystem::Dome, Subsystem::Shutter] {
        assert_eq!(obs.runner.snapshot().state(subsystem), OperationState::Idle);
    }
}

#[test]
fn filter_and_focus_complete_on_their_channels() {
    let mut obs = Observatory::new();
    obs.send(ChannelId::Filter, "filter V");
    let filter = obs.run_until_reply(ChannelId::Filter, 200);
    assert_eq!(code(filter.last().unwrap()), 0, "{filter:?}");
    assert_eq!(obs.runner.snapshot().filter.as_deref(), Some("V"));

    obs.send(ChannelId::Focus, "focus 250");
    let focus = obs.run_until_reply(ChannelId::Focus, 200);
    assert_eq!(code(focus.last().unwrap()), 0, "{focus:?}");
    let axis = obs.runner.snapshot().axis(AxisId::Focus).unwrap();
    assert!((axis.position - std::f64::consts::PI).abs() < 1e-3, "focus {}", axis.position);

    let unknown = obs.command(ChannelId::Filter, "filter Halpha");
    assert_eq!(code(&unknown[0]), -2, "{unknown:?}");
}

#[test]
fn dome_goto_and_manual() {
    let mut obs = Observatory::new();
    obs.send(ChannelId::Dome, "dome 90");
    let lines = obs.run_until_reply(ChannelId::Dome, 400);
    assert_eq!(code(lines.last().unwrap()), 0, "{lines:?}");
    let az = obs.runner.snapshot().axis(AxisId::DomeAz).unwrap().position;
    assert!((az - std::f64::consts::FRAC_PI_2).abs() < 0.01, "az {az}");

    let manual = obs.command(ChannelId::Dome, "dome manual");
    assert_eq!(manual, vec!["0 dome manual"]);
}

#[test]
fn new_command_on_a_channel_replaces_its_pending_reply() {
    let mut obs = Observatory::new();
    obs.command(ChannelId::Dome, "dome 90");
    obs.steps(2);
    obs.command(ChannelId::Dome, "dome 45");
    // The first move is simply forgotten; only the second is answered.
    let lines = obs.run_until_reply(ChannelId::Dome, 400);
    assert_eq!(lines.len(), 1, "{lines:?}");
    assert_eq!(code(&lines[0]), 0);
    let az = obs.runner.snapshot().axis(AxisId::DomeAz).unwrap().position;
    assert!((az - std::f64::consts::FRAC_PI_4).abs() < 0.01, "az {az}");
}

#[test]
fn reset_interrupts_everyone_and_rebuilds() {
    let mut obs = Observatory::new();
    obs.command(ChannelId::Slew, "slew hadec -1 20");
    obs.command(ChannelId::Focus, "focus 1000");
    obs.steps(3);

    let reset = obs.command(ChannelId::Control, "reset");
    assert_eq!(reset, vec!["0 reset"]);
    assert_eq!(obs.replies(ChannelId::Slew), vec!["-7 reset"]);
    assert_eq!(obs.replies(ChannelId::Focus), vec!["-7 reset"]);

    obs.step();
    let snap = obs.runner.snapshot();
    assert_eq!(snap.state(Subsystem::Mount), OperationState::Idle);
    assert_eq!(snap.state(Subsystem::Focus), OperationState::Idle);
    assert!(obs.runner.dispatcher().pending().is_empty());
}

#[test]
fn hardware_fault_answers_minus_six_and_recovers() {
    let mut obs = Observatory::new();
    obs.command(ChannelId::Slew, "slew hadec -1 20");
    obs.command(ChannelId::Filter, "filter B");

    obs.sim.inject_fault();
    obs.step();
    for channel in [ChannelId::Slew, ChannelId::Filter] {
        let reply = obs.replies(channel);
        assert_eq!(reply.len(), 1, "{channel}: {reply:?}");
        assert_eq!(code(&reply[0]), -6, "{channel}: {reply:?}");
    }
    assert!(obs.runner.snapshot().alerts.contains(AlertFlags::HW_FAULT));

    // The binding was reset; commands work again.
    obs.step();
    assert!(!obs.runner.snapshot().alerts.contains(AlertFlags::HW_FAULT));
    obs.send(ChannelId::Filter, "filter B");
    let lines = obs.run_until_reply(ChannelId::Filter, 200);
    assert_eq!(code(lines.last().unwrap()), 0, "{lines:?}");
}

#[test]
fn telemetry_names_the_owning_channel() {
    let mut obs = Observatory::new();
    obs.command(ChannelId::Slew, "slew hadec -1 20");
    let snap = obs.runner.board().latest();
    assert_eq!(
        snap.subsystem(Subsystem::Mount).unwrap().owner.as_deref(),
        Some("Slew")
    );
    assert_eq!(snap.subsystem(Subsystem::Dome).unwrap().owner, None);
    assert_eq!(snap.tick, 1);
}
