//! Integration test: hunting, tracking, sky offsets and paddle nudges.

use tcs_common::astro::sidereal::lst;
use tcs_common::control_unit::state::{OperationState, Subsystem};
use tcs_control_unit::command::ChannelId;

use super::{Observatory, at, code};

/// `track radec` line for an object `ha_offset` [rad] east of the meridian.
fn track_line(ha_offset: f64, dec_deg: f64) -> String {
    let ra = (lst(at(0), 0.0) + ha_offset).rem_euclid(std::f64::consts::TAU);
    format!("track radec {:.6} {dec_deg}", ra.to_degrees() / 15.0)
}

#[test]
fn track_replies_when_locked_and_keeps_tracking() {
    let mut obs = Observatory::new();
    obs.send(ChannelId::Track, &track_line(0.05, 23.0));
    let lines = obs.run_until_reply(ChannelId::Track, 900);
    let last = lines.last().unwrap();
    assert_eq!(code(last), 0, "{lines:?}");
    assert!(last.contains("tracking"), "{last}");
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Tracking);

    // Tracking has no timeout and no further replies.
    obs.steps(200);
    assert!(obs.replies(ChannelId::Track).is_empty());
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Tracking);
}

#[test]
fn offset_is_immediate_and_persists() {
    let mut obs = Observatory::new();
    obs.send(ChannelId::Track, &track_line(0.0, 10.0));
    obs.run_until_reply(ChannelId::Track, 900);

    let reply = obs.command(ChannelId::Track, "offset 30 -15");
    assert_eq!(reply.len(), 1);
    assert_eq!(code(&reply[0]), 0);
    let offsets = obs.runner.snapshot().offsets;
    assert!((offsets.ra - (30.0f64 / 3600.0).to_radians()).abs() < 1e-12);
    assert!((offsets.dec + (15.0f64 / 3600.0).to_radians()).abs() < 1e-12);

    // The mount stays with the target; a short re-hunt may follow.
    obs.steps(300);
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Tracking);
    assert_eq!(obs.runner.snapshot().offsets.ra, offsets.ra);
}

#[test]
fn paddle_nudge_rides_on_tracking() {
    let mut obs = Observatory::new();
    obs.send(ChannelId::Track, &track_line(0.0, 10.0));
    obs.run_until_reply(ChannelId::Track, 900);

    // A nudge does not replace the operation: no reply yet.
    assert!(obs.command(ChannelId::Paddle, "jog n").is_empty());
    assert!(obs.runner.dispatcher().is_pending(ChannelId::Paddle));
    obs.steps(10);
    assert!(obs.runner.snapshot().offsets.y > 0.0);
    assert!(obs.replies(ChannelId::Track).is_empty());

    let release = obs.command(ChannelId::Paddle, "jog 0");
    assert_eq!(release.len(), 1);
    assert_eq!(code(&release[0]), 0);
    assert!(!obs.runner.dispatcher().is_pending(ChannelId::Paddle));
    assert!(!obs.runner.dispatcher().is_pending(ChannelId::Track));
}

#[test]
fn paddle_alone_drives_and_stops() {
    let mut obs = Observatory::new();
    assert!(obs.command(ChannelId::Paddle, "jog E").is_empty());
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Slewing);
    obs.steps(20);

    obs.send(ChannelId::Paddle, "jog 0");
    let lines = obs.run_until_reply(ChannelId::Paddle, 100);
    assert_eq!(code(lines.last().unwrap()), 0, "{lines:?}");
    assert_eq!(obs.runner.snapshot().state(Subsystem::Mount), OperationState::Idle);
}
