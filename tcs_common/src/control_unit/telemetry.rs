//! Telemetry snapshot published once per control tick.
//!
//! The control loop is the only writer. Readers (status channel, JSON
//! file publisher, tests) always see a complete snapshot from a single
//! tick, never a mix of two.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use super::state::{AxisId, OperationState, ShutterPosition, Subsystem};
use crate::time::Timestamp;

bitflags! {
    /// Observatory-wide alert conditions.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AlertFlags: u32 {
        /// Emergency stop asserted.
        const ESTOP          = 0x0001;
        /// Weather alert asserted (shutter must be closed).
        const WEATHER        = 0x0002;
        /// Last hardware call failed.
        const HW_FAULT       = 0x0004;
        /// At least one axis saw a single-tick stall.
        const STALL_WARNING  = 0x0008;
        /// A limit switch is active on some axis.
        const LIMIT_SWITCH   = 0x0010;
        /// The previous tick overran its period.
        const CYCLE_OVERRUN  = 0x0020;
        /// Mount axes have not been homed since start-up.
        const NOT_HOMED      = 0x0040;
    }
}

impl AlertFlags {
    /// Conditions that block new motion commands.
    pub const MOTION_INHIBIT: Self = Self::from_bits_truncate(Self::ESTOP.bits());
}

impl Serialize for AlertFlags {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for AlertFlags {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bits = u32::deserialize(deserializer)?;
        Ok(Self::from_bits_truncate(bits))
    }
}

// ─── Per-Axis ───────────────────────────────────────────────────────

/// Feedback and command state of one axis.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisTelemetry {
    pub axis: AxisId,
    /// Raw position counter (encoder when fitted).
    pub raw_position: i64,
    /// Position [rad].
    pub position: f64,
    /// Hardware-reported velocity [rad/s].
    pub velocity: f64,
    /// Current commanded target [rad], if any.
    pub target: Option<f64>,
    /// `target - position` [rad] (0 without a target).
    pub error: f64,
    pub homed: bool,
    pub on_target: bool,
    /// Consecutive stalled ticks.
    pub stall_ticks: u32,
}

impl AxisTelemetry {
    pub fn new(axis: AxisId) -> Self {
        Self {
            axis,
            raw_position: 0,
            position: 0.0,
            velocity: 0.0,
            target: None,
            error: 0.0,
            homed: false,
            on_target: false,
            stall_ticks: 0,
        }
    }
}

// ─── Per-Subsystem ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubsystemTelemetry {
    pub subsystem: Subsystem,
    pub state: OperationState,
    /// Channel holding the pending reply, if any.
    pub owner: Option<String>,
    /// Human-readable description of the current target.
    pub target: Option<String>,
    /// Message of the last failure (cleared by the next command).
    pub last_failure: Option<String>,
}

impl SubsystemTelemetry {
    pub fn new(subsystem: Subsystem) -> Self {
        Self {
            subsystem,
            state: OperationState::Idle,
            owner: None,
            target: None,
            last_failure: None,
        }
    }
}

/// User pointing offsets currently applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct OffsetTelemetry {
    /// Sky offsets [rad].
    pub ra: f64,
    pub dec: f64,
    /// Raw-axis nudges [rad].
    pub x: f64,
    pub y: f64,
    pub r: f64,
}

/// Where the mount currently points, from axis feedback [rad].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PointingTelemetry {
    pub ha: f64,
    pub dec: f64,
    pub alt: f64,
    pub az: f64,
}

/// Control-loop timing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleTelemetry {
    pub last_us: u64,
    pub min_us: u64,
    pub max_us: u64,
    pub avg_us: u64,
    pub overruns: u64,
}

// ─── Snapshot ───────────────────────────────────────────────────────

/// Complete observatory state as of one tick.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySnapshot {
    /// Tick counter (0 before the first tick).
    pub tick: u64,
    pub timestamp: Timestamp,
    pub subsystems: Vec<SubsystemTelemetry>,
    pub axes: Vec<AxisTelemetry>,
    pub shutter: ShutterPosition,
    pub alerts: AlertFlags,
    pub offsets: OffsetTelemetry,
    pub pointing: PointingTelemetry,
    /// Dome auto-follow enabled.
    pub dome_auto: bool,
    /// Name of the filter in the beam, if known.
    pub filter: Option<String>,
    pub cycle: CycleTelemetry,
}

impl Default for TelemetrySnapshot {
    fn default() -> Self {
        Self {
            tick: 0,
            timestamp: Timestamp::default(),
            subsystems: Subsystem::ALL
                .iter()
                .map(|s| SubsystemTelemetry::new(*s))
                .collect(),
            axes: Vec::new(),
            shutter: ShutterPosition::Unknown,
            alerts: AlertFlags::empty(),
            offsets: OffsetTelemetry::default(),
            pointing: PointingTelemetry::default(),
            dome_auto: false,
            filter: None,
            cycle: CycleTelemetry::default(),
        }
    }
}

impl TelemetrySnapshot {
    pub fn subsystem(&self, subsystem: Subsystem) -> Option<&SubsystemTelemetry> {
        self.subsystems.iter().find(|s| s.subsystem == subsystem)
    }

    pub fn subsystem_mut(&mut self, subsystem: Subsystem) -> Option<&mut SubsystemTelemetry> {
        self.subsystems.iter_mut().find(|s| s.subsystem == subsystem)
    }

    /// State of a subsystem (`Idle` when not configured).
    pub fn state(&self, subsystem: Subsystem) -> OperationState {
        self.subsystem(subsystem)
            .map(|s| s.state)
            .unwrap_or(OperationState::Idle)
    }

    pub fn axis(&self, axis: AxisId) -> Option<&AxisTelemetry> {
        self.axes.iter().find(|a| a.axis == axis)
    }

    pub fn axis_mut(&mut self, axis: AxisId) -> Option<&mut AxisTelemetry> {
        self.axes.iter_mut().find(|a| a.axis == axis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_snapshot_lists_every_subsystem_idle() {
        let snap = TelemetrySnapshot::default();
        for s in Subsystem::ALL {
            assert_eq!(snap.state(s), OperationState::Idle);
        }
        assert!(snap.axis(AxisId::MountX).is_none());
    }

    #[test]
    fn alert_flags_compose() {
        let mut alerts = AlertFlags::empty();
        alerts.insert(AlertFlags::ESTOP | AlertFlags::WEATHER);
        assert!(alerts.intersects(AlertFlags::MOTION_INHIBIT));
        alerts.remove(AlertFlags::ESTOP);
        assert!(!alerts.intersects(AlertFlags::MOTION_INHIBIT));
        assert_eq!(alerts.bits(), 0x0002);
    }

    #[test]
    fn axis_lookup_and_update() {
        let mut snap = TelemetrySnapshot::default();
        snap.axes.push(AxisTelemetry::new(AxisId::MountY));
        snap.axis_mut(AxisId::MountY).unwrap().position = 0.25;
        assert_eq!(snap.axis(AxisId::MountY).unwrap().position, 0.25);
    }
}
