//! Axis physics simulator.
//!
//! Each simulated axis keeps its true physical angle and a user origin
//! (moved by `set_position`). Motion follows a velocity ramp limited by the
//! commanded acceleration. Hard limit switches stop the motor when driven
//! into, like a real controller.

use std::f64::consts::TAU;
use tcs_common::control_unit::config::AxisConfig;
use tcs_common::hal::types::SwitchState;
use tracing::trace;

/// Distance of the simulated hard-limit switches beyond the soft limits [rad].
pub const LIMIT_SWITCH_OVERTRAVEL: f64 = 0.02;

/// Deceleration used when a stop arrives with no prior acceleration [rad/s²].
const DEFAULT_BRAKE: f64 = 0.05;

/// Commanded motion of one axis (angles relative to the user origin).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotionMode {
    /// At rest.
    Idle,
    /// Point-to-point move.
    MoveTo {
        /// Target angle [rad].
        target: f64,
        /// Cruise speed [rad/s].
        speed: f64,
        /// Ramp [rad/s²].
        accel: f64,
    },
    /// Constant-velocity run.
    Jog {
        /// Signed velocity [rad/s].
        omega: f64,
        /// Ramp [rad/s²].
        accel: f64,
    },
    /// Decelerating to rest.
    Stopping {
        /// Ramp [rad/s²].
        accel: f64,
    },
}

/// Simulated rotating axis.
#[derive(Debug, Clone)]
pub struct AxisSimulator {
    step_count: f64,
    sign: f64,
    feedback_counts: f64,
    feedback_sign: f64,
    home_direction: f64,
    home_active_low: bool,
    home_angle: f64,
    pos_switch: Option<f64>,
    neg_switch: Option<f64>,

    angle: f64,
    origin: f64,
    omega: f64,
    mode: MotionMode,
    last_accel: f64,
    stalled: bool,
}

impl AxisSimulator {
    /// Create a simulator at physical angle 0 from axis configuration.
    pub fn new(config: &AxisConfig) -> Self {
        let (feedback_counts, feedback_sign) = if config.has_encoder {
            (config.encoder_step_count as f64, config.encoder_sign as f64)
        } else {
            (config.step_count as f64, config.sign as f64)
        };
        let (pos_switch, neg_switch) = if config.has_limit_switches {
            (
                Some(config.pos_limit + LIMIT_SWITCH_OVERTRAVEL),
                Some(config.neg_limit - LIMIT_SWITCH_OVERTRAVEL),
            )
        } else {
            (None, None)
        };
        Self {
            step_count: config.step_count as f64,
            sign: config.sign as f64,
            feedback_counts,
            feedback_sign,
            home_direction: config.home.direction as f64,
            home_active_low: config.home.active_low,
            home_angle: 0.0,
            pos_switch,
            neg_switch,
            angle: 0.0,
            origin: 0.0,
            omega: 0.0,
            mode: MotionMode::Idle,
            last_accel: 0.0,
            stalled: false,
        }
    }

    // ─── Unit Conversion ────────────────────────────────────────────

    fn motor_to_rad(&self, raw: f64) -> f64 {
        self.sign * raw * TAU / self.step_count
    }

    fn rad_to_motor(&self, rad: f64) -> f64 {
        self.sign * rad * self.step_count / TAU
    }

    fn feedback_to_rad(&self, raw: f64) -> f64 {
        self.feedback_sign * raw * TAU / self.feedback_counts
    }

    fn rad_to_feedback(&self, rad: f64) -> f64 {
        self.feedback_sign * rad * self.feedback_counts / TAU
    }

    // ─── Commands ───────────────────────────────────────────────────

    /// Point-to-point move in motor steps.
    pub fn move_to(&mut self, raw_target: i64, raw_velocity: f64, raw_accel: f64) {
        let accel = self.motor_to_rad(raw_accel).abs();
        self.last_accel = accel;
        self.mode = MotionMode::MoveTo {
            target: self.motor_to_rad(raw_target as f64),
            speed: self.motor_to_rad(raw_velocity).abs(),
            accel,
        };
    }

    /// Continuous run in motor steps/s.
    pub fn jog_at(&mut self, raw_velocity: f64, raw_accel: f64) {
        let accel = self.motor_to_rad(raw_accel).abs();
        self.last_accel = accel;
        self.mode = MotionMode::Jog {
            omega: self.motor_to_rad(raw_velocity),
            accel,
        };
    }

    /// Decelerate to rest.
    pub fn stop(&mut self) {
        let accel = if self.last_accel > 0.0 {
            self.last_accel
        } else {
            DEFAULT_BRAKE
        };
        self.mode = MotionMode::Stopping { accel };
    }

    /// Immediate halt (e-stop, reset).
    pub fn halt(&mut self) {
        self.omega = 0.0;
        self.mode = MotionMode::Idle;
    }

    /// Redefine the current feedback reading.
    pub fn set_position(&mut self, raw: i64) {
        self.origin = self.angle - self.feedback_to_rad(raw as f64);
    }

    // ─── Readback ───────────────────────────────────────────────────

    /// Feedback counter (encoder when fitted).
    pub fn read_position(&self) -> i64 {
        self.rad_to_feedback(self.angle - self.origin).round() as i64
    }

    /// Reported velocity [motor steps/s]. A stalled motor still reports
    /// its commanded rate.
    pub fn read_velocity(&self) -> f64 {
        self.rad_to_motor(self.omega)
    }

    /// Raw switch levels.
    pub fn read_switches(&self) -> SwitchState {
        let mut state = SwitchState::empty();
        let home = (self.angle - self.home_angle) * self.home_direction > 0.0;
        if home != self.home_active_low {
            state |= SwitchState::HOME;
        }
        if self.pos_switch.is_some_and(|s| self.angle >= s) {
            state |= SwitchState::POS_LIMIT;
        }
        if self.neg_switch.is_some_and(|s| self.angle <= s) {
            state |= SwitchState::NEG_LIMIT;
        }
        state
    }

    /// Angle relative to the user origin [rad].
    pub fn user_angle(&self) -> f64 {
        self.angle - self.origin
    }

    /// Physical angle [rad].
    pub fn physical_angle(&self) -> f64 {
        self.angle
    }

    /// Current angular velocity [rad/s].
    pub fn omega(&self) -> f64 {
        self.omega
    }

    /// Current motion mode.
    pub fn mode(&self) -> MotionMode {
        self.mode
    }

    // ─── Test Hooks ─────────────────────────────────────────────────

    /// Teleport to a physical angle.
    pub fn set_physical_angle(&mut self, angle: f64) {
        self.angle = angle;
    }

    /// Freeze the shaft while the motor keeps reporting velocity.
    pub fn set_stalled(&mut self, stalled: bool) {
        self.stalled = stalled;
    }

    // ─── Physics ────────────────────────────────────────────────────

    /// Advance the model by `dt` seconds.
    pub fn update(&mut self, dt: f64) {
        if dt <= 0.0 {
            return;
        }
        match self.mode {
            MotionMode::Idle => self.omega = 0.0,
            MotionMode::Jog { omega, accel } => self.ramp_towards(omega, accel, dt),
            MotionMode::Stopping { accel } => {
                self.ramp_towards(0.0, accel, dt);
                if self.omega == 0.0 {
                    self.mode = MotionMode::Idle;
                }
            }
            MotionMode::MoveTo {
                target,
                speed,
                accel,
            } => {
                let error = target - self.user_angle();
                let stopping = self.omega * self.omega / (2.0 * accel);
                let desired = if error.abs() <= stopping {
                    error.signum() * (2.0 * accel * error.abs()).sqrt().min(speed)
                } else {
                    error.signum() * speed
                };
                self.ramp_towards(desired, accel, dt);
                let next_error = target - (self.user_angle() + self.omega * dt);
                if next_error.abs() < 1e-9 || next_error.signum() != error.signum() {
                    if !self.stalled {
                        self.angle = target + self.origin;
                    }
                    self.omega = 0.0;
                    self.mode = MotionMode::Idle;
                    return;
                }
            }
        }

        if self.omega > 0.0 && self.pos_switch.is_some_and(|s| self.angle >= s)
            || self.omega < 0.0 && self.neg_switch.is_some_and(|s| self.angle <= s)
        {
            trace!(angle = self.angle, "simulated limit switch stop");
            self.halt();
            return;
        }

        if !self.stalled {
            self.angle += self.omega * dt;
        }
    }

    fn ramp_towards(&mut self, target: f64, accel: f64, dt: f64) {
        let max_change = accel * dt;
        let change = (target - self.omega).clamp(-max_change, max_change);
        self.omega += change;
    }
}
