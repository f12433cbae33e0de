//! Control-level error type.
//!
//! Per-axis failures (limit, stall) are aggregated here to the subsystem
//! level before they reach a channel. Every variant maps to exactly one
//! response code.

use tcs_common::astro::EphemerisError;
use tcs_common::control_unit::state::{ResponseCode, Subsystem};
use tcs_common::hal::driver::HardwareError;
use thiserror::Error;

use crate::safety::limits::LimitExceeded;
use crate::safety::stall::StallDetected;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ControlError {
    #[error(transparent)]
    Limit(#[from] LimitExceeded),

    #[error(transparent)]
    Stall(#[from] StallDetected),

    #[error("{subsystem} operation timed out after {elapsed:.1}s")]
    Timeout { subsystem: Subsystem, elapsed: f64 },

    #[error(transparent)]
    Hardware(#[from] HardwareError),

    #[error("ephemeris: {0}")]
    Ephemeris(#[from] EphemerisError),

    #[error("rejected: {0}")]
    Rejected(String),

    #[error("interrupted: {0}")]
    Interrupted(String),
}

impl ControlError {
    /// Response code sent to the owning channel.
    pub fn response_code(&self) -> ResponseCode {
        match self {
            Self::Limit(_) => ResponseCode::LimitExceeded,
            Self::Stall(_) => ResponseCode::Stall,
            Self::Timeout { .. } => ResponseCode::Timeout,
            Self::Hardware(_) => ResponseCode::HardwareError,
            Self::Ephemeris(_) | Self::Rejected(_) => ResponseCode::Rejected,
            Self::Interrupted(_) => ResponseCode::Interrupted,
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self::Rejected(reason.into())
    }
}
