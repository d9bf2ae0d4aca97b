//! Application layer for teleop-server.
//!
//! The application layer orchestrates the robot: it knows *what* to do with
//! an operator request, but delegates *how* bytes reach a serial port or a
//! camera to the infrastructure layer.
//!
//! # Responsibilities
//!
//! - Fanning events out to every connected operator (`broadcast`)
//! - Discovering, handshaking and reconnecting the two controllers (`device_manager`)
//! - Running the capture → extract → pace → broadcast loop (`frame_pipeline`)
//! - Translating operator requests into device commands and stream changes (`control`)
//!
//! # What does NOT belong here?
//!
//! - Opening sockets, serial ports or subprocesses (that is infrastructure)
//! - JSON field names and config schema (that is the domain layer)
//! - Parsing command-line flags (that is done in `main.rs`)

pub mod broadcast;
pub mod control;
pub mod device_manager;
pub mod frame_pipeline;

pub use broadcast::{BroadcastSink, SubscriberId, Subscription};
pub use control::TeleopService;
pub use device_manager::{DeviceManager, DeviceSettings};
pub use frame_pipeline::FramePipeline;
