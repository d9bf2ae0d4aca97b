//! teleop-server library crate.
//!
//! This crate drives a camera-equipped wheeled robot: it owns the serial
//! links to the motor and servo controllers, streams camera frames, and
//! serves any number of operators over WebSocket.
//!
//! # Architecture (clean architecture)
//!
//! ```text
//! Operators (JSON over WebSocket)
//!         ↕
//! [teleop-server]
//!   ├── domain/            Pure types: AppConfig, operator messages
//!   ├── application/
//!   │     ├── control/         request handling, client join/leave
//!   │     ├── device_manager/  discovery, handshake, reconnect, replay
//!   │     ├── frame_pipeline/  capture → extract → pace → broadcast
//!   │     └── broadcast/       per-subscriber event queues
//!   └── infrastructure/
//!         ├── serial/     line-oriented serial links (serialport)
//!         ├── capture/    encoder subprocess or capture device
//!         ├── storage/    TOML config file
//!         └── ws_server/  WebSocket accept loop (tokio-tungstenite)
//!         ↕
//! Motor controller, servo controller, camera
//! ```
//!
//! # Layer rules
//!
//! - `domain` performs no I/O.
//! - `application` depends on `domain`, `teleop-core` and the infrastructure
//!   traits (`Link`, `ByteSource`), never on concrete ports or sockets.
//! - `infrastructure` depends on all other layers plus `tokio`, `serialport`
//!   and `tungstenite`.
//!
//! # For beginners: why this structure?
//!
//! The reconnect policy, the frame pacing and the request handling are the
//! interesting parts of this program, and they are all testable against fake
//! serial ports and scripted cameras because the application layer only sees
//! traits.  Swapping in real hardware happens in `main.rs`.

/// Domain layer: pure types (no I/O).
pub mod domain;

/// Application layer: device supervision, streaming and request handling.
pub mod application;

/// Infrastructure layer: serial ports, camera, config file, WebSocket server.
pub mod infrastructure;
