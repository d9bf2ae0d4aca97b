//! Serial line protocol spoken with the motor and servo controllers.
//!
//! Every command is a single ASCII line of comma-separated fields, e.g.
//! `synchronized,120,forward`.  The controllers answer with free-form text
//! lines, plus two structured telemetry lines emitted by the servo firmware:
//!
//! ```text
//! servo_angle,<id>,<angle>
//! servo_stopped,<id>
//! ```

pub mod command;
pub mod telemetry;

use thiserror::Error;

pub use command::{
    DeviceCommand, Direction, MotorCommand, MotorDrive, ServoAction, ServoCommand, ServoId,
    ServoParams,
};
pub use telemetry::{decode_line, DeviceLine};

/// Errors produced while validating outgoing commands or decoding incoming lines.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// A command parameter is outside its allowed range or not recognised.
    ///
    /// Commands carrying invalid parameters are rejected before anything is
    /// written to a serial line.
    #[error("invalid parameter `{field}`: {reason}")]
    InvalidParameter { field: &'static str, reason: String },

    /// A telemetry line looked structured but could not be parsed.
    #[error("malformed telemetry line `{line}`: {reason}")]
    MalformedTelemetry { line: String, reason: String },
}

impl ProtocolError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            field,
            reason: reason.into(),
        }
    }
}
