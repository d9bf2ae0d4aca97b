//! Infrastructure layer for teleop-server.
//!
//! The infrastructure layer handles all I/O with the outside world.
//!
//! # Responsibilities
//!
//! - Opening serial ports and exchanging text lines with the controllers
//! - Spawning the camera encoder subprocess or grabbing from a capture device
//! - Reading and writing the TOML config file
//! - Binding the WebSocket listener and running per-operator sessions
//!
//! # What does NOT belong here?
//!
//! - Handshake, retry and replay policy (that is the application layer)
//! - Command validation and encoding (that is `teleop-core`)
//! - Message type definitions (that is the domain layer)

pub mod capture;
pub mod serial;
pub mod storage;
pub mod ws_server;

// Re-export the primary entry point so `main.rs` can call it concisely.
pub use ws_server::run_server;
