//! Configuration structures for the observatory control unit.
//!
//! All config types use `serde::Deserialize` for TOML loading. Angles and
//! angular rates are radians unless a field says otherwise; site
//! coordinates are degrees. Optional fields use `#[serde(default)]`.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::config::LogLevel;
use crate::consts::{
    CYCLE_TIME_MS, CYCLE_TIME_MS_MAX, CYCLE_TIME_MS_MIN, ON_TARGET_TICKS_DEFAULT,
    OPERATION_TIMEOUT_DEFAULT, SHUTTER_TIMEOUT_DEFAULT, STALL_TICKS_DEFAULT, TWO_PI,
};

// ─── Top-Level Config ───────────────────────────────────────────────

/// Complete daemon configuration, one TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservatoryConfig {
    /// Control-loop parameters (`[loop]`).
    #[serde(default, rename = "loop")]
    pub cycle: LoopConfig,

    /// Observing site.
    pub site: SiteConfig,

    /// Telescope mount (always present).
    pub mount: MountConfig,

    #[serde(default)]
    pub dome: Option<DomeConfig>,

    #[serde(default)]
    pub shutter: Option<ShutterConfig>,

    #[serde(default)]
    pub focus: Option<FocusConfig>,

    #[serde(default)]
    pub filter: Option<FilterConfig>,

    #[serde(default)]
    pub channels: ChannelsConfig,

    #[serde(default)]
    pub hardware: HardwareConfig,
}

impl ObservatoryConfig {
    /// Validate every section.
    pub fn validate(&self) -> Result<(), String> {
        self.cycle.validate()?;
        self.site.validate()?;
        self.mount.validate()?;
        if let Some(ref dome) = self.dome {
            dome.validate()?;
        }
        if let Some(ref shutter) = self.shutter {
            shutter.validate()?;
            if shutter.power_position.is_some() && self.dome.is_none() {
                return Err("shutter.power_position requires a [dome] section".to_string());
            }
        }
        if let Some(ref focus) = self.focus {
            focus.validate()?;
        }
        if let Some(ref filter) = self.filter {
            filter.validate()?;
        }
        Ok(())
    }
}

// ─── Loop ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopConfig {
    /// Control tick period [ms] (default: 100).
    #[serde(default = "default_cycle_time_ms")]
    pub cycle_time_ms: u64,

    /// Consecutive in-tolerance ticks before "on target" (default: 3).
    #[serde(default = "default_on_target_ticks")]
    pub on_target_ticks: u32,

    /// Consecutive stalled ticks before abort (default: 5).
    #[serde(default = "default_stall_ticks")]
    pub stall_ticks: u32,

    /// JSON telemetry snapshot file for other processes.
    #[serde(default)]
    pub telemetry_path: Option<PathBuf>,

    /// Snapshot file write interval [ticks] (default: 1).
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval: u32,

    /// TOML file receiving limits found by FindingLimits.
    #[serde(default)]
    pub limits_state_file: Option<PathBuf>,

    #[serde(default)]
    pub log_level: LogLevel,
}

fn default_cycle_time_ms() -> u64 {
    CYCLE_TIME_MS
}
fn default_on_target_ticks() -> u32 {
    ON_TARGET_TICKS_DEFAULT
}
fn default_stall_ticks() -> u32 {
    STALL_TICKS_DEFAULT
}
fn default_telemetry_interval() -> u32 {
    1
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            cycle_time_ms: CYCLE_TIME_MS,
            on_target_ticks: ON_TARGET_TICKS_DEFAULT,
            stall_ticks: STALL_TICKS_DEFAULT,
            telemetry_path: None,
            telemetry_interval: 1,
            limits_state_file: None,
            log_level: LogLevel::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.cycle_time_ms < CYCLE_TIME_MS_MIN || self.cycle_time_ms > CYCLE_TIME_MS_MAX {
            return Err(format!(
                "cycle_time_ms {} out of range [{}, {}]",
                self.cycle_time_ms, CYCLE_TIME_MS_MIN, CYCLE_TIME_MS_MAX
            ));
        }
        if self.on_target_ticks == 0 {
            return Err("on_target_ticks must be at least 1".to_string());
        }
        if self.stall_ticks < 2 {
            return Err("stall_ticks must be at least 2 (one warning tick)".to_string());
        }
        if self.telemetry_interval == 0 {
            return Err("telemetry_interval must be at least 1".to_string());
        }
        Ok(())
    }

    /// Tick period [s].
    #[inline]
    pub fn period_secs(&self) -> f64 {
        self.cycle_time_ms as f64 / 1000.0
    }
}

// ─── Site ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Geodetic latitude [deg], north positive.
    pub latitude: f64,
    /// Longitude [deg], east positive.
    pub longitude: f64,
    #[serde(default)]
    pub elevation_m: f64,
}

impl SiteConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(format!("site.latitude {} out of range", self.latitude));
        }
        if !(-180.0..=360.0).contains(&self.longitude) {
            return Err(format!("site.longitude {} out of range", self.longitude));
        }
        Ok(())
    }
}

// ─── Axis ───────────────────────────────────────────────────────────

/// One physical rotating axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AxisConfig {
    /// Name used in logs and the limits state file.
    pub name: String,

    #[serde(default = "default_true")]
    pub present: bool,

    /// Motor steps per revolution.
    pub step_count: i64,

    /// Motor direction relative to the canonical direction (+1 / -1).
    #[serde(default = "default_sign")]
    pub sign: i8,

    /// [rad/s]
    pub max_velocity: f64,

    /// [rad/s²]
    pub max_accel_slew: f64,

    /// [rad/s²]
    pub max_accel_track: f64,

    /// Safety margin kept inside a found limit switch [rad].
    #[serde(default)]
    pub limit_margin: f64,

    /// Positive travel limit [rad].
    pub pos_limit: f64,

    /// Negative travel limit [rad].
    pub neg_limit: f64,

    #[serde(default)]
    pub has_encoder: bool,

    /// Encoder counts per revolution (when `has_encoder`).
    #[serde(default)]
    pub encoder_step_count: i64,

    #[serde(default = "default_sign")]
    pub encoder_sign: i8,

    /// Encoder vs. model weight while tracking, in [0, 1].
    #[serde(default = "default_half")]
    pub tracking_encoder_weight: f64,

    /// Error-closing weight while slewing/hunting, in [0, 1].
    #[serde(default = "default_half")]
    pub damping_factor: f64,

    #[serde(default)]
    pub home: HomeConfig,

    #[serde(default)]
    pub has_limit_switches: bool,

    /// Limit-seek speed [rad/s] (0 = use home speed).
    #[serde(default)]
    pub limit_speed: f64,
}

fn default_true() -> bool {
    true
}
fn default_sign() -> i8 {
    1
}
fn default_half() -> f64 {
    0.5
}

impl AxisConfig {
    pub fn validate(&self) -> Result<(), String> {
        let n = &self.name;
        if self.step_count <= 0 {
            return Err(format!("axis {n}: step_count must be positive"));
        }
        if self.sign != 1 && self.sign != -1 {
            return Err(format!("axis {n}: sign must be +1 or -1"));
        }
        if !(self.max_velocity > 0.0) {
            return Err(format!("axis {n}: max_velocity must be positive"));
        }
        if !(self.max_accel_slew > 0.0) || !(self.max_accel_track > 0.0) {
            return Err(format!("axis {n}: accelerations must be positive"));
        }
        if !(self.neg_limit < self.pos_limit) {
            return Err(format!(
                "axis {n}: neg_limit {} must be below pos_limit {}",
                self.neg_limit, self.pos_limit
            ));
        }
        if self.limit_margin < 0.0 {
            return Err(format!("axis {n}: limit_margin must not be negative"));
        }
        if self.has_encoder {
            if self.encoder_step_count <= 0 {
                return Err(format!("axis {n}: encoder_step_count must be positive"));
            }
            if self.encoder_sign != 1 && self.encoder_sign != -1 {
                return Err(format!("axis {n}: encoder_sign must be +1 or -1"));
            }
        }
        for (label, w) in [
            ("tracking_encoder_weight", self.tracking_encoder_weight),
            ("damping_factor", self.damping_factor),
        ] {
            if !(0.0..=1.0).contains(&w) {
                return Err(format!("axis {n}: {label} {w} outside [0, 1]"));
            }
        }
        self.home.validate(n)?;
        if self.limit_speed < 0.0 {
            return Err(format!("axis {n}: limit_speed must not be negative"));
        }
        Ok(())
    }

    /// Size of one feedback step [rad] (encoder when fitted, else motor).
    #[inline]
    pub fn step_size(&self) -> f64 {
        let counts = if self.has_encoder {
            self.encoder_step_count
        } else {
            self.step_count
        };
        TWO_PI / counts as f64
    }

    /// Speed used when seeking limit switches [rad/s].
    #[inline]
    pub fn limit_seek_speed(&self) -> f64 {
        if self.limit_speed > 0.0 {
            self.limit_speed
        } else {
            self.home.speed
        }
    }
}

/// Homing behaviour for one axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HomeConfig {
    /// A physical home switch is fitted.
    #[serde(default)]
    pub switch: bool,

    /// Seek direction (+1 / -1, canonical).
    #[serde(default = "default_sign")]
    pub direction: i8,

    /// Seek speed [rad/s].
    #[serde(default = "default_home_speed")]
    pub speed: f64,

    /// Switch reads low when active.
    #[serde(default)]
    pub active_low: bool,

    /// Dead-reckoning drive time when no switch is fitted [s].
    #[serde(default = "default_travel_time")]
    pub travel_time: f64,
}

fn default_home_speed() -> f64 {
    0.02
}
fn default_travel_time() -> f64 {
    10.0
}

impl Default for HomeConfig {
    fn default() -> Self {
        Self {
            switch: false,
            direction: 1,
            speed: default_home_speed(),
            active_low: false,
            travel_time: default_travel_time(),
        }
    }
}

impl HomeConfig {
    fn validate(&self, axis: &str) -> Result<(), String> {
        if self.direction != 1 && self.direction != -1 {
            return Err(format!("axis {axis}: home.direction must be +1 or -1"));
        }
        if !(self.speed > 0.0) {
            return Err(format!("axis {axis}: home.speed must be positive"));
        }
        if !(self.travel_time > 0.0) {
            return Err(format!("axis {axis}: home.travel_time must be positive"));
        }
        Ok(())
    }
}

// ─── Timeouts ───────────────────────────────────────────────────────

/// Per-operation wall-clock budgets [s]. Tracking has none.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OperationTimeouts {
    #[serde(default = "default_timeout")]
    pub home: f64,
    #[serde(default = "default_limits_timeout")]
    pub limits: f64,
    #[serde(default = "default_timeout")]
    pub slew: f64,
    #[serde(default = "default_timeout")]
    pub hunt: f64,
}

fn default_timeout() -> f64 {
    OPERATION_TIMEOUT_DEFAULT
}
fn default_limits_timeout() -> f64 {
    OPERATION_TIMEOUT_DEFAULT * 2.0
}

impl Default for OperationTimeouts {
    fn default() -> Self {
        Self {
            home: default_timeout(),
            limits: default_limits_timeout(),
            slew: default_timeout(),
            hunt: default_timeout(),
        }
    }
}

impl OperationTimeouts {
    fn validate(&self, section: &str) -> Result<(), String> {
        for (label, t) in [
            ("home", self.home),
            ("limits", self.limits),
            ("slew", self.slew),
            ("hunt", self.hunt),
        ] {
            if !(t > 0.0) {
                return Err(format!("{section}.timeouts.{label} must be positive"));
            }
        }
        Ok(())
    }
}

// ─── Mount ──────────────────────────────────────────────────────────

/// Mount axis arrangement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MountKind {
    /// x = hour angle, y = declination.
    #[default]
    Equatorial,
    /// x = azimuth, y = altitude.
    AltAz,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MountConfig {
    #[serde(default)]
    pub kind: MountKind,

    /// Optical-axis collimation error [rad].
    #[serde(default)]
    pub collimation: f64,

    /// Non-perpendicularity of the two mount axes [rad].
    #[serde(default)]
    pub non_perpendicularity: f64,

    /// Pointing-correction mesh (four numbers per line).
    #[serde(default)]
    pub mesh_file: Option<PathBuf>,

    /// Tracking lock tolerance [rad] (default: one feedback step).
    #[serde(default)]
    pub tracking_accuracy: Option<f64>,

    /// Fast paddle rate [rad/s].
    #[serde(default = "default_jog_fast")]
    pub jog_fast: f64,

    /// Slow paddle rate [rad/s].
    #[serde(default = "default_jog_slow")]
    pub jog_slow: f64,

    #[serde(default)]
    pub timeouts: OperationTimeouts,

    pub x: AxisConfig,
    pub y: AxisConfig,
    #[serde(default)]
    pub r: Option<AxisConfig>,
}

fn default_jog_fast() -> f64 {
    0.01
}
fn default_jog_slow() -> f64 {
    0.0005
}

impl MountConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.x.validate()?;
        self.y.validate()?;
        if let Some(ref r) = self.r {
            r.validate()?;
        }
        if let Some(acc) = self.tracking_accuracy {
            if !(acc > 0.0) {
                return Err("mount.tracking_accuracy must be positive".to_string());
            }
        }
        if !(self.jog_fast > 0.0) || !(self.jog_slow > 0.0) {
            return Err("mount jog rates must be positive".to_string());
        }
        self.timeouts.validate("mount")
    }

    /// Lock tolerance for an axis: configured value or one feedback step.
    #[inline]
    pub fn tracking_tolerance(&self, axis: &AxisConfig) -> f64 {
        self.tracking_accuracy.unwrap_or_else(|| axis.step_size())
    }
}

// ─── Dome & Shutter ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomeConfig {
    pub az: AxisConfig,

    /// Dome-vs-slit error tolerated while auto-following [rad].
    #[serde(default = "default_follow_tolerance")]
    pub auto_follow_tolerance: f64,

    /// Dome radius [m] (0 = no parallax correction).
    #[serde(default)]
    pub radius: f64,

    /// Mount axes intersection relative to dome centre [m].
    #[serde(default)]
    pub offset_east: f64,
    #[serde(default)]
    pub offset_north: f64,
    #[serde(default)]
    pub offset_up: f64,

    #[serde(default)]
    pub timeouts: OperationTimeouts,
}

fn default_follow_tolerance() -> f64 {
    0.05
}

impl DomeConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.az.validate()?;
        if !(self.auto_follow_tolerance > 0.0) {
            return Err("dome.auto_follow_tolerance must be positive".to_string());
        }
        if self.radius < 0.0 {
            return Err("dome.radius must not be negative".to_string());
        }
        let offset = (self.offset_east.powi(2) + self.offset_north.powi(2) + self.offset_up.powi(2))
            .sqrt();
        if self.radius > 0.0 && offset >= self.radius {
            return Err("dome mount offset must lie inside the dome radius".to_string());
        }
        self.timeouts.validate("dome")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShutterConfig {
    /// Open/close budget [s].
    #[serde(default = "default_shutter_timeout")]
    pub timeout: f64,

    /// Dome azimuth where the shutter receives power. Presence enables
    /// the power-position precondition.
    #[serde(default)]
    pub power_position: Option<PowerPositionConfig>,
}

fn default_shutter_timeout() -> f64 {
    SHUTTER_TIMEOUT_DEFAULT
}

impl ShutterConfig {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.timeout > 0.0) {
            return Err("shutter.timeout must be positive".to_string());
        }
        if let Some(ref pp) = self.power_position {
            if !(pp.tolerance > 0.0) {
                return Err("shutter.power_position.tolerance must be positive".to_string());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PowerPositionConfig {
    /// [rad]
    pub azimuth: f64,
    /// [rad]
    pub tolerance: f64,
}

// ─── Focus & Filter ─────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusConfig {
    pub axis: AxisConfig,

    /// Focus travel per motor revolution [µm].
    pub microns_per_rev: f64,

    #[serde(default)]
    pub timeouts: OperationTimeouts,
}

impl FocusConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.axis.validate()?;
        if !(self.microns_per_rev > 0.0) {
            return Err("focus.microns_per_rev must be positive".to_string());
        }
        self.timeouts.validate("focus")
    }

    /// Convert a focus offset [µm] to axis rotation [rad].
    #[inline]
    pub fn microns_to_rad(&self, microns: f64) -> f64 {
        microns / self.microns_per_rev * TWO_PI
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterConfig {
    pub axis: AxisConfig,
    pub slots: Vec<FilterSlot>,
    #[serde(default)]
    pub timeouts: OperationTimeouts,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSlot {
    pub name: String,
    /// Wheel position [rad].
    pub position: f64,
}

impl FilterConfig {
    pub fn validate(&self) -> Result<(), String> {
        self.axis.validate()?;
        if self.slots.is_empty() {
            return Err("filter.slots must not be empty".to_string());
        }
        for (i, a) in self.slots.iter().enumerate() {
            if self.slots[..i]
                .iter()
                .any(|b| b.name.eq_ignore_ascii_case(&a.name))
            {
                return Err(format!("duplicate filter name {}", a.name));
            }
        }
        self.timeouts.validate("filter")
    }

    /// Look up a slot position by (case-insensitive) name.
    pub fn slot_position(&self, name: &str) -> Option<f64> {
        self.slots
            .iter()
            .find(|s| s.name.eq_ignore_ascii_case(name))
            .map(|s| s.position)
    }
}

// ─── Channels & Hardware ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Directory holding `<Name>.in` / `<Name>.out` FIFOs.
    #[serde(default)]
    pub fifo_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HardwareConfig {
    /// Binding name looked up in the binding registry.
    #[serde(default = "default_driver")]
    pub driver: String,

    /// Weather alert is asserted while this file exists.
    #[serde(default)]
    pub weather_alert_file: Option<PathBuf>,
}

fn default_driver() -> String {
    "simulation".to_string()
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            weather_alert_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigLoader;

    const MINIMAL: &str = r#"
[site]
latitude = 31.9
longitude = -111.6

[mount.x]
name = "HA"
step_count = 200000
max_velocity = 0.05
max_accel_slew = 0.01
max_accel_track = 0.005
pos_limit = 3.0
neg_limit = -3.0

[mount.y]
name = "Dec"
step_count = 200000
max_velocity = 0.05
max_accel_slew = 0.01
max_accel_track = 0.005
pos_limit = 1.6
neg_limit = -1.0
"#;

    #[test]
    fn minimal_config_uses_defaults() {
        let cfg = ObservatoryConfig::load_str(MINIMAL).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.cycle.cycle_time_ms, CYCLE_TIME_MS);
        assert_eq!(cfg.mount.kind, MountKind::Equatorial);
        assert_eq!(cfg.mount.x.sign, 1);
        assert_eq!(cfg.mount.x.damping_factor, 0.5);
        assert!(cfg.mount.r.is_none());
        assert!(cfg.dome.is_none());
        assert_eq!(cfg.hardware.driver, "simulation");
    }

    #[test]
    fn tracking_tolerance_defaults_to_one_step() {
        let cfg = ObservatoryConfig::load_str(MINIMAL).unwrap();
        let tol = cfg.mount.tracking_tolerance(&cfg.mount.x);
        assert!((tol - TWO_PI / 200000.0).abs() < 1e-15);
    }

    #[test]
    fn rejects_inverted_limits() {
        let mut cfg = ObservatoryConfig::load_str(MINIMAL).unwrap();
        cfg.mount.y.neg_limit = 2.0;
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("neg_limit"));
    }

    #[test]
    fn rejects_bad_sign_and_weights() {
        let mut cfg = ObservatoryConfig::load_str(MINIMAL).unwrap();
        cfg.mount.x.sign = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = ObservatoryConfig::load_str(MINIMAL).unwrap();
        cfg.mount.x.damping_factor = 1.5;
        assert!(cfg.validate().unwrap_err().contains("damping_factor"));
    }

    #[test]
    fn power_position_needs_dome() {
        let mut cfg = ObservatoryConfig::load_str(MINIMAL).unwrap();
        cfg.shutter = Some(ShutterConfig {
            timeout: 30.0,
            power_position: Some(PowerPositionConfig {
                azimuth: 1.0,
                tolerance: 0.02,
            }),
        });
        assert!(cfg.validate().unwrap_err().contains("power_position"));
    }

    #[test]
    fn filter_slot_lookup_is_case_insensitive() {
        let axis = ObservatoryConfig::load_str(MINIMAL).unwrap().mount.x;
        let filter = FilterConfig {
            axis,
            slots: vec![
                FilterSlot { name: "R".into(), position: 0.0 },
                FilterSlot { name: "V".into(), position: 1.2 },
            ],
            timeouts: OperationTimeouts::default(),
        };
        filter.validate().unwrap();
        assert_eq!(filter.slot_position("v"), Some(1.2));
        assert_eq!(filter.slot_position("B"), None);
    }

    #[test]
    fn cycle_time_bounds() {
        let mut cycle = LoopConfig::default();
        cycle.cycle_time_ms = 1;
        assert!(cycle.validate().is_err());
        cycle.cycle_time_ms = 250;
        assert!(cycle.validate().is_ok());
        assert!((cycle.period_secs() - 0.25).abs() < 1e-12);
    }
}
