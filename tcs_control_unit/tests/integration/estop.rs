//! Integration test: e-stop and weather pre-emption.

use tcs_common::control_unit::state::{AxisId, OperationState, Subsystem};
use tcs_common::control_unit::telemetry::AlertFlags;
use tcs_control_unit::command::ChannelId;
use tcs_control_unit::config::load_config_from_str;

use super::{CONFIG, Observatory, code};

#[test]
fn estop_interrupts_slew_and_nudge_exactly_once() {
    let mut obs = Observatory::new();
    obs.command(ChannelId::Slew, "slew hadec -1.5 25");
    obs.command(ChannelId::Paddle, "jog w");
    obs.steps(5);
    assert!(obs.runner.dispatcher().is_pending(ChannelId::Slew));
    assert!(obs.runner.dispatcher().is_pending(ChannelId::Paddle));

    obs.sim.set_estop(true);
    obs.step();
    let slew = obs.replies(ChannelId::Slew);
    let paddle = obs.replies(ChannelId::Paddle);
    assert_eq!(slew.len(), 1, "{slew:?}");
    assert_eq!(paddle.len(), 1, "{paddle:?}");
    assert_eq!(code(&slew[0]), -7);
    assert_eq!(code(&paddle[0]), -7);

    let snap = obs.runner.snapshot();
    assert!(snap.alerts.contains(AlertFlags::ESTOP));
    assert_eq!(snap.state(Subsystem::Mount), OperationState::Stopped);

    // Held e-stop: no repeats, axes stay put.
    obs.steps(10);
    assert!(obs.replies(ChannelId::Slew).is_empty());
    assert!(obs.replies(ChannelId::Paddle).is_empty());
    let x = obs.runner.snapshot().axis(AxisId::MountX).unwrap();
    assert!(x.velocity.abs() < 1e-6, "velocity {}", x.velocity);
}

#[test]
fn motion_is_refused_while_estop_is_held() {
    let mut obs = Observatory::new();
    obs.sim.set_estop(true);
    obs.step();

    for (channel, line) in [
        (ChannelId::Slew, "slew hadec 0 20"),
        (ChannelId::Dome, "dome 45"),
        (ChannelId::Shutter, "open"),
        (ChannelId::Focus, "focus 10"),
    ] {
        let reply = obs.command(channel, line);
        assert_eq!(reply.len(), 1, "{line}: {reply:?}");
        assert_eq!(code(&reply[0]), -2, "{line}: {reply:?}");
    }
    // Stop is not motion.
    assert_eq!(obs.command(ChannelId::Control, "stop"), vec!["0 stopped"]);

    obs.sim.set_estop(false);
    obs.step();
    assert!(!obs.runner.snapshot().alerts.contains(AlertFlags::ESTOP));
    assert!(obs.command(ChannelId::Slew, "slew hadec 0 20").is_empty());
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Slewing);
}

#[test]
fn weather_alert_closes_shutter_and_refuses_open() {
    let dir = tempfile::tempdir().unwrap();
    let alert = dir.path().join("weather.alert");
    let text = format!(
        "{CONFIG}\n[hardware]\nweather_alert_file = \"{}\"\n",
        alert.display()
    );
    let mut obs = Observatory::with_config(load_config_from_str(&text).unwrap());

    obs.send(ChannelId::Shutter, "open");
    let lines = obs.run_until_reply(ChannelId::Shutter, 300);
    assert_eq!(code(lines.last().unwrap()), 0, "{lines:?}");

    // Start a close/open cycle, then raise the alert mid-open.
    obs.send(ChannelId::Shutter, "close");
    obs.run_until_reply(ChannelId::Shutter, 300);
    let opening = obs.command(ChannelId::Shutter, "open");
    assert!(opening.iter().all(|l| code(l) == 1), "{opening:?}");
    obs.steps(3);
    assert!(obs.runner.dispatcher().is_pending(ChannelId::Shutter));
    obs.replies(ChannelId::Shutter);

    std::fs::write(&alert, "rain").unwrap();
    obs.step();
    let interrupted = obs.replies(ChannelId::Shutter);
    assert_eq!(interrupted.len(), 1, "{interrupted:?}");
    assert_eq!(code(&interrupted[0]), -7);
    assert!(obs.runner.snapshot().alerts.contains(AlertFlags::WEATHER));

    let refused = obs.command(ChannelId::Shutter, "open");
    assert_eq!(code(&refused[0]), -2, "{refused:?}");

    // The forced close completes without anyone waiting on it.
    obs.steps(100);
    assert!(obs.replies(ChannelId::Shutter).is_empty());
    assert_eq!(obs.runner.snapshot().state(Subsystem::Shutter), OperationState::Idle);
}
