//! Shutter (or roll-off roof) state machine.
//!
//! With a power position configured the drive only works while the dome
//! sits there, so a run first waits for the dome and then drives:
//!
//! ```text
//! Idle/Stopped --open|close-->  Slewing(AwaitPower) --dome ready-->  Slewing(Driving)
//! Slewing(Driving)  --end sensor-->  Idle
//! any active        --stop | timeout-->  Stopped
//! ```
//!
//! A weather alert forces a close unless the shutter is already closed or
//! closing.

use tcs_common::control_unit::config::{PowerPositionConfig, ShutterConfig};
use tcs_common::control_unit::state::{OperationState, ShutterPosition, Subsystem};
use tcs_common::control_unit::telemetry::TelemetrySnapshot;
use tcs_common::hal::driver::{HardwareBinding, HardwareError};
use tcs_common::hal::types::{ShutterDrive, ShutterSense};
use tcs_common::time::Timestamp;
use tracing::{debug, info, warn};

use super::transition::{Accepted, Transition};
use super::{OperationStateMachine, TickContext, log_transition, publish_subsystem, stopped_state};
use crate::error::ControlError;
use crate::model::Axis;
use crate::safety::{SafetyTimer, timer_expired, timer_started};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutterAction {
    Open,
    Close,
}

impl ShutterAction {
    fn drive(self) -> ShutterDrive {
        match self {
            Self::Open => ShutterDrive::Open,
            Self::Close => ShutterDrive::Close,
        }
    }

    fn reached(self, sense: ShutterSense) -> bool {
        match self {
            Self::Open => sense.open_limit,
            Self::Close => sense.closed_limit,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    AwaitPower,
    Driving,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ShutterRun {
    action: ShutterAction,
    stage: Stage,
}

pub struct ShutterMachine {
    config: ShutterConfig,
    state: OperationState,
    run: Option<ShutterRun>,
    sense: ShutterSense,
    timer: SafetyTimer,
    target: Option<String>,
    last_failure: Option<String>,
}

impl ShutterMachine {
    pub fn new(config: &ShutterConfig, now: Timestamp) -> Self {
        Self {
            config: config.clone(),
            state: OperationState::Idle,
            run: None,
            sense: ShutterSense::default(),
            timer: SafetyTimer::unbounded(now),
            target: None,
            last_failure: None,
        }
    }

    /// Last known position from the sensors and the run in progress.
    pub fn position(&self) -> ShutterPosition {
        match self.run {
            Some(ShutterRun {
                action: ShutterAction::Open,
                ..
            }) => ShutterPosition::Opening,
            Some(ShutterRun {
                action: ShutterAction::Close,
                ..
            }) => ShutterPosition::Closing,
            None if self.sense.open_limit => ShutterPosition::Open,
            None if self.sense.closed_limit => ShutterPosition::Closed,
            None => ShutterPosition::Unknown,
        }
    }

    /// Power position the dome must hold for the run in progress.
    pub fn power_request(&self) -> Option<PowerPositionConfig> {
        self.run.and(self.config.power_position)
    }

    /// Read the end-of-travel sensors.
    pub fn read_sense(&mut self, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError> {
        self.sense = hw.read_shutter()?;
        Ok(())
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Open, refused while the weather is bad.
    pub fn open(&mut self, weather: bool, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        if weather {
            return Err(ControlError::rejected("weather alert: shutter stays closed"));
        }
        self.begin(ShutterAction::Open, ctx)
    }

    pub fn close(&mut self, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        self.begin(ShutterAction::Close, ctx)
    }

    /// Close for a weather alert. Returns true when this starts a new
    /// close, which pre-empts a pending open.
    pub fn force_close(&mut self, ctx: &mut TickContext<'_>) -> Result<bool, ControlError> {
        if self.position().is_closed_or_closing() {
            return Ok(false);
        }
        warn!("weather alert, closing shutter");
        self.begin(ShutterAction::Close, ctx)?;
        Ok(true)
    }

    fn begin(&mut self, action: ShutterAction, ctx: &mut TickContext<'_>) -> Result<Accepted, ControlError> {
        if action.reached(self.sense) && self.run.is_none() {
            return Ok(Accepted::Immediate(format!("shutter already {}", action.as_str())));
        }
        let stage = if self.config.power_position.is_some() {
            // Whatever was driving loses power while the dome moves.
            ctx.hw.shutter(ShutterDrive::Halt)?;
            Stage::AwaitPower
        } else {
            ctx.hw.shutter(action.drive())?;
            Stage::Driving
        };
        log_transition(Subsystem::Shutter, self.state, OperationState::Slewing);
        info!(action = action.as_str(), ?stage, "shutter run started");
        self.state = OperationState::Slewing;
        self.run = Some(ShutterRun { action, stage });
        self.timer = timer_started(ctx.now, Some(self.config.timeout));
        self.target = Some(action.as_str().to_string());
        self.last_failure = None;
        Ok(Accepted::Operation)
    }

    // ─── Tick ───────────────────────────────────────────────────────

    /// One tick. `dome_ready` is true when the dome holds the power
    /// position (always true without one).
    pub fn advance(&mut self, ctx: &mut TickContext<'_>, dome_ready: bool) -> Result<Transition, HardwareError> {
        let Some(mut run) = self.run else {
            return Ok(Transition::Continue);
        };
        if timer_expired(&self.timer, ctx.now) {
            let elapsed = self.timer.elapsed(ctx.now);
            return self.abort(
                ctx.hw,
                ControlError::Timeout {
                    subsystem: Subsystem::Shutter,
                    elapsed,
                },
            );
        }
        let transition = match run.stage {
            Stage::AwaitPower if dome_ready => {
                ctx.hw.shutter(run.action.drive())?;
                run.stage = Stage::Driving;
                Transition::Progress("dome at power position".into())
            }
            Stage::AwaitPower => Transition::Continue,
            Stage::Driving if run.action.reached(self.sense) => {
                Transition::Done(format!("shutter {}", run.action.as_str()))
            }
            Stage::Driving => Transition::Continue,
        };
        self.run = Some(run);
        match &transition {
            Transition::Done(message) => {
                log_transition(Subsystem::Shutter, self.state, OperationState::Idle);
                info!(%message, "shutter run complete");
                self.state = OperationState::Idle;
                self.run = None;
                self.timer = SafetyTimer::unbounded(ctx.now);
            }
            Transition::Progress(message) => debug!(%message, "shutter driving"),
            _ => {}
        }
        Ok(transition)
    }

    fn abort(&mut self, hw: &mut dyn HardwareBinding, error: ControlError) -> Result<Transition, HardwareError> {
        warn!(state = %self.state, %error, "shutter run aborted");
        hw.shutter(ShutterDrive::Halt)?;
        log_transition(Subsystem::Shutter, self.state, OperationState::Stopped);
        self.state = OperationState::Stopped;
        self.run = None;
        self.last_failure = Some(error.to_string());
        Ok(Transition::Abort(error))
    }
}

impl OperationStateMachine for ShutterMachine {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Shutter
    }

    fn state(&self) -> OperationState {
        self.state
    }

    fn axes(&self) -> &[Axis] {
        &[]
    }

    fn axes_mut(&mut self) -> &mut [Axis] {
        &mut []
    }

    fn readraw(&mut self, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError> {
        self.read_sense(hw)
    }

    fn stop(&mut self, hw: &mut dyn HardwareBinding) -> Result<(), HardwareError> {
        hw.shutter(ShutterDrive::Halt)?;
        let next = stopped_state(self.state);
        log_transition(Subsystem::Shutter, self.state, next);
        self.state = next;
        self.run = None;
        Ok(())
    }

    fn telemetry(&self, snapshot: &mut TelemetrySnapshot, _on_target_ticks: u32) {
        publish_subsystem(
            snapshot,
            Subsystem::Shutter,
            self.state,
            self.target.as_deref(),
            self.last_failure.as_deref(),
        );
        snapshot.shutter = self.position();
    }
}
