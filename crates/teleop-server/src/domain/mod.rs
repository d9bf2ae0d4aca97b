//! Domain types for the teleop server.
//!
//! - **`config`**   – [`AppConfig`]: every tunable, with defaults.
//! - **`messages`** – JSON types exchanged with operators over WebSocket.
//!
//! Neither module performs I/O.

pub mod config;
pub mod messages;

pub use config::{AppConfig, CaptureBackend};
pub use messages::{ClientRequest, CommandReply, ReplyStatus, ServerEvent, StreamState};
