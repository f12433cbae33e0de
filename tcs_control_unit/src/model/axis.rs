//! One controllable rotating axis: configuration, raw/radian conversion and
//! the per-tick derived state.
//!
//! Canonical radians: `rad = sign * raw * 2π / counts`, where `counts` and
//! `sign` come from the motor or, when fitted, the encoder. Velocities
//! reported by the hardware are always motor steps per second.

use tcs_common::consts::TWO_PI;
use tcs_common::control_unit::config::AxisConfig;
use tcs_common::control_unit::state::AxisId;
use tcs_common::control_unit::telemetry::AxisTelemetry;
use tcs_common::hal::types::SwitchState;

/// Reported speeds below this count as standing still [motor steps/s].
const REST_STEPS: f64 = 0.5;

// ─── Travel Limits ──────────────────────────────────────────────────

/// Safe travel range `(neg, pos)`, both exclusive [rad].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TravelLimits {
    pub neg: f64,
    pub pos: f64,
}

impl TravelLimits {
    pub fn from_config(config: &AxisConfig) -> Self {
        Self {
            neg: config.neg_limit,
            pos: config.pos_limit,
        }
    }

    /// Strictly inside the range.
    #[inline]
    pub fn contains(&self, value: f64) -> bool {
        value > self.neg && value < self.pos
    }

    #[inline]
    pub fn midpoint(&self) -> f64 {
        0.5 * (self.neg + self.pos)
    }
}

// ─── Axis ───────────────────────────────────────────────────────────

/// Feedback from the previous tick, kept for stall detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// [rad]
    pub position: f64,
    /// [rad/s]
    pub velocity: f64,
    /// Rate commanded over the interval that ended at this sample [rad/s].
    pub commanded: f64,
}

#[derive(Debug, Clone)]
pub struct Axis {
    pub id: AxisId,
    pub config: AxisConfig,
    pub limits: TravelLimits,

    /// Raw feedback counter.
    pub raw: i64,
    /// Current position [rad].
    pub position: f64,
    /// Hardware-reported velocity [rad/s].
    pub velocity: f64,
    /// Goal of the current operation [rad].
    pub target: Option<f64>,
    /// Desired position at the next tick [rad].
    pub predicted: Option<f64>,
    /// Last velocity sent to the hardware [rad/s].
    pub last_commanded: f64,
    pub switches: SwitchState,
    pub homed: bool,

    /// Consecutive ticks within the on-target tolerance.
    pub on_target_ticks: u32,
    /// Consecutive ticks that looked stalled.
    pub stall_ticks: u32,
    previous: Option<Sample>,
    /// `last_commanded` as it stood when the latest sample was taken.
    sampled_command: f64,
}

impl Axis {
    pub fn new(id: AxisId, config: AxisConfig) -> Self {
        let limits = TravelLimits::from_config(&config);
        Self {
            id,
            config,
            limits,
            raw: 0,
            position: 0.0,
            velocity: 0.0,
            target: None,
            predicted: None,
            last_commanded: 0.0,
            switches: SwitchState::empty(),
            homed: false,
            on_target_ticks: 0,
            stall_ticks: 0,
            previous: None,
            sampled_command: 0.0,
        }
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    // ─── Conversions ────────────────────────────────────────────────

    #[inline]
    fn motor_scale(&self) -> f64 {
        self.config.sign as f64 * TWO_PI / self.config.step_count as f64
    }

    #[inline]
    fn feedback_scale(&self) -> f64 {
        if self.config.has_encoder {
            self.config.encoder_sign as f64 * TWO_PI / self.config.encoder_step_count as f64
        } else {
            self.motor_scale()
        }
    }

    /// Motor steps to radians.
    #[inline]
    pub fn motor_to_rad(&self, steps: f64) -> f64 {
        steps * self.motor_scale()
    }

    /// Radians to motor steps (unrounded; also used for rates).
    #[inline]
    pub fn rad_to_motor(&self, rad: f64) -> f64 {
        rad / self.motor_scale()
    }

    /// Nearest whole motor step for a position.
    #[inline]
    pub fn rad_to_motor_raw(&self, rad: f64) -> i64 {
        self.rad_to_motor(rad).round() as i64
    }

    /// Feedback counts to radians.
    #[inline]
    pub fn feedback_to_rad(&self, raw: i64) -> f64 {
        raw as f64 * self.feedback_scale()
    }

    /// One feedback step [rad].
    #[inline]
    pub fn step_size(&self) -> f64 {
        self.config.step_size()
    }

    // ─── Per-Tick State ─────────────────────────────────────────────

    /// Record one hardware sample. The previous sample is kept for
    /// stall detection, together with the rate that was commanded while
    /// the axis travelled to it.
    pub fn apply_sample(&mut self, raw: i64, raw_velocity: f64, switches: SwitchState) {
        self.previous = Some(Sample {
            position: self.position,
            velocity: self.velocity,
            commanded: self.sampled_command,
        });
        self.sampled_command = self.last_commanded;
        self.raw = raw;
        self.position = self.feedback_to_rad(raw);
        self.velocity = self.motor_to_rad(raw_velocity);
        self.switches = switches;
    }

    #[inline]
    pub fn previous(&self) -> Option<Sample> {
        self.previous
    }

    /// `target - position`, 0 without a target.
    #[inline]
    pub fn error(&self) -> f64 {
        self.target.map_or(0.0, |t| t - self.position)
    }

    /// Reported velocity below the rest threshold.
    #[inline]
    pub fn at_rest(&self) -> bool {
        self.rad_to_motor(self.velocity).abs() < REST_STEPS
    }

    /// Home switch active with the configured polarity.
    #[inline]
    pub fn home_active(&self) -> bool {
        self.switches.home_active(self.config.home.active_low)
    }

    /// Count a tick towards "on target"; returns the streak length.
    pub fn update_on_target(&mut self, tolerance: f64) -> u32 {
        if self.target.is_some() && self.error().abs() <= tolerance {
            self.on_target_ticks = self.on_target_ticks.saturating_add(1);
        } else {
            self.on_target_ticks = 0;
        }
        self.on_target_ticks
    }

    pub fn telemetry(&self, on_target_ticks_required: u32) -> AxisTelemetry {
        AxisTelemetry {
            axis: self.id,
            raw_position: self.raw,
            position: self.position,
            velocity: self.velocity,
            target: self.target,
            error: self.error(),
            homed: self.homed,
            on_target: self.target.is_some()
                && self.on_target_ticks >= on_target_ticks_required,
            stall_ticks: self.stall_ticks,
        }
    }
}
