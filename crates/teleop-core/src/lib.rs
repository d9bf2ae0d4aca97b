//! # teleop-core
//!
//! Shared library for the robot teleop server containing the serial command
//! protocol, the robot status model, and the MJPEG frame extractor.
//!
//! It has zero dependencies on serial ports, sockets, cameras or an async
//! runtime.  Everything in here is pure data transformation, which keeps it
//! trivially testable.
//!
//! # Architecture overview (for beginners)
//!
//! The robot carries two microcontrollers on serial lines: one drives four
//! wheel motors, the other drives two servos (`mg995` and `ds04`).  An operator
//! in a browser watches a camera feed and sends drive commands.
//!
//! This crate (`teleop-core`) is the shared foundation.  It defines:
//!
//! - **`protocol`** – How commands travel over the serial line.  Commands are
//!   validated into typed values and encoded as comma-separated text lines;
//!   lines coming back from the controllers are decoded into typed telemetry.
//!
//! - **`domain`** – Pure state with no I/O: motor and servo status snapshots,
//!   the stream configuration, device connection states, and the reconnect
//!   backoff policy.
//!
//! - **`frame`** – Turns a raw MJPEG byte stream into discrete JPEG frames and
//!   measures the observed frame rate.

pub mod domain;
pub mod frame;
pub mod protocol;

// Re-export the most-used types at the crate root so callers can write
// `teleop_core::MotorCommand` instead of `teleop_core::protocol::command::MotorCommand`.
pub use domain::backoff::Backoff;
pub use domain::device::{ConnectionState, DeviceKind};
pub use domain::status::{MotorMode, MotorState, MotorStatus, ServoState, ServoStatus};
pub use domain::stream::StreamConfig;
pub use frame::extractor::FrameExtractor;
pub use frame::rate::RateMeter;
pub use protocol::command::{
    DeviceCommand, Direction, MotorCommand, MotorDrive, ServoAction, ServoCommand, ServoId,
    ServoParams,
};
pub use protocol::telemetry::{decode_line, DeviceLine};
pub use protocol::ProtocolError;
