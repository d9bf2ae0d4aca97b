//! Configuration schema for the teleop server.
//!
//! [`AppConfig`] is the single source of truth for runtime settings.  It is
//! read from a TOML file (see [`crate::infrastructure::storage`]) and then
//! selectively overridden by command-line flags.
//!
//! # Serde default values
//!
//! Every field carries `#[serde(default = "...")]`, so a config file only has
//! to mention what it changes.  An empty file (or no file at all) yields the
//! defaults below:
//!
//! ```toml
//! [server]
//! bind_address = "0.0.0.0"
//! port = 5001
//! log_level = "info"
//! calibrate_servos_on_connect = true
//!
//! [serial]
//! baud_rate = 9600
//! candidate_ports = ["/dev/ttyACM0", "/dev/ttyUSB0", "/dev/ttyACM1", "/dev/ttyUSB1"]
//! settle_delay_ms = 2000
//! handshake_timeout_ms = 2000
//! poll_interval_ms = 100
//! motor_ack = ["Motores apagados"]
//! servo_ack = ["servo", "mg995", "ds04"]
//! motor_handshake_attempts = 3
//! servo_drain_ms = 1000
//!
//! [reconnect]
//! initial_delay_secs = 5.0
//! max_delay_secs = 30.0
//! factor = 1.5
//! check_interval_ms = 1000
//! shutdown_grace_ms = 2000
//!
//! [stream]
//! backend = "piped"
//! width = 640
//! height = 480
//! fps = 30
//! quality = 80
//! encoder_program = "libcamera-vid"
//! encoder_args = []
//! device_index = 0
//! stop_timeout_ms = 5000
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use teleop_core::{ProtocolError, StreamConfig};

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub serial: SerialSection,
    #[serde(default)]
    pub reconnect: ReconnectSection,
    #[serde(default)]
    pub stream: StreamSection,
}

/// Network listener and general behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSection {
    /// IP address the WebSocket listener binds to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// `tracing` filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Send a calibration move to both servos whenever an operator joins.
    #[serde(default = "default_true")]
    pub calibrate_servos_on_connect: bool,
}

/// Serial discovery and handshake.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerialSection {
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Probed in order; a path claimed by the other controller is skipped.
    #[serde(default = "default_candidate_ports")]
    pub candidate_ports: Vec<String>,
    /// Wait after opening a port; the boards reset when the port opens.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Substrings that identify the motor controller's handshake reply.
    #[serde(default = "default_motor_ack")]
    pub motor_ack: Vec<String>,
    /// Substrings (case-insensitive) that identify the servo controller's reply.
    #[serde(default = "default_servo_ack")]
    pub servo_ack: Vec<String>,
    #[serde(default = "default_motor_handshake_attempts")]
    pub motor_handshake_attempts: u32,
    /// Time spent discarding servo calibration chatter after the handshake.
    #[serde(default = "default_servo_drain_ms")]
    pub servo_drain_ms: u64,
}

/// Background reconnection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSection {
    #[serde(default = "default_initial_delay_secs")]
    pub initial_delay_secs: f64,
    #[serde(default = "default_max_delay_secs")]
    pub max_delay_secs: f64,
    #[serde(default = "default_factor")]
    pub factor: f64,
    /// How often the loop checks for dropped connections.
    #[serde(default = "default_check_interval_ms")]
    pub check_interval_ms: u64,
    #[serde(default = "default_shutdown_grace_ms")]
    pub shutdown_grace_ms: u64,
}

/// Which capture backend produces the MJPEG byte stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CaptureBackend {
    /// An encoder subprocess writing MJPEG to stdout.
    #[default]
    Piped,
    /// A camera device whose frames are re-encoded to JPEG in-process.
    Device,
}

impl CaptureBackend {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Piped => "piped",
            Self::Device => "device",
        }
    }
}

impl fmt::Display for CaptureBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CaptureBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "piped" => Ok(Self::Piped),
            "device" => Ok(Self::Device),
            other => Err(format!("unknown capture backend `{other}` (expected piped or device)")),
        }
    }
}

/// Video stream defaults and backend selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamSection {
    #[serde(default)]
    pub backend: CaptureBackend,
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_quality")]
    pub quality: u8,
    /// Program started by the piped backend.
    #[serde(default = "default_encoder_program")]
    pub encoder_program: String,
    /// Extra arguments appended after the generated ones.
    #[serde(default)]
    pub encoder_args: Vec<String>,
    /// Camera index used by the device backend.
    #[serde(default)]
    pub device_index: u32,
    /// Bound on waiting for the pipeline worker to exit.
    #[serde(default = "default_stop_timeout_ms")]
    pub stop_timeout_ms: u64,
}

impl StreamSection {
    /// Validated initial stream settings.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidParameter`] if any configured value is
    /// out of range.
    pub fn stream_config(&self) -> Result<StreamConfig, ProtocolError> {
        let mut cfg = StreamConfig::default();
        cfg.set_resolution(i64::from(self.width), i64::from(self.height))?;
        cfg.set_fps(i64::from(self.fps))?;
        cfg.set_quality(i64::from(self.quality))?;
        Ok(cfg)
    }
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    5001
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_baud_rate() -> u32 {
    9600
}
fn default_candidate_ports() -> Vec<String> {
    ["/dev/ttyACM0", "/dev/ttyUSB0", "/dev/ttyACM1", "/dev/ttyUSB1"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_settle_delay_ms() -> u64 {
    2000
}
fn default_handshake_timeout_ms() -> u64 {
    2000
}
fn default_poll_interval_ms() -> u64 {
    100
}
fn default_motor_ack() -> Vec<String> {
    vec!["Motores apagados".to_string()]
}
fn default_servo_ack() -> Vec<String> {
    vec!["servo".to_string(), "mg995".to_string(), "ds04".to_string()]
}
fn default_motor_handshake_attempts() -> u32 {
    3
}
fn default_servo_drain_ms() -> u64 {
    1000
}
fn default_initial_delay_secs() -> f64 {
    5.0
}
fn default_max_delay_secs() -> f64 {
    30.0
}
fn default_factor() -> f64 {
    1.5
}
fn default_check_interval_ms() -> u64 {
    1000
}
fn default_shutdown_grace_ms() -> u64 {
    2000
}
fn default_width() -> u32 {
    640
}
fn default_height() -> u32 {
    480
}
fn default_fps() -> u32 {
    30
}
fn default_quality() -> u8 {
    80
}
fn default_encoder_program() -> String {
    "libcamera-vid".to_string()
}
fn default_stop_timeout_ms() -> u64 {
    5000
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            log_level: default_log_level(),
            calibrate_servos_on_connect: default_true(),
        }
    }
}

impl Default for SerialSection {
    fn default() -> Self {
        Self {
            baud_rate: default_baud_rate(),
            candidate_ports: default_candidate_ports(),
            settle_delay_ms: default_settle_delay_ms(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            motor_ack: default_motor_ack(),
            servo_ack: default_servo_ack(),
            motor_handshake_attempts: default_motor_handshake_attempts(),
            servo_drain_ms: default_servo_drain_ms(),
        }
    }
}

impl Default for ReconnectSection {
    fn default() -> Self {
        Self {
            initial_delay_secs: default_initial_delay_secs(),
            max_delay_secs: default_max_delay_secs(),
            factor: default_factor(),
            check_interval_ms: default_check_interval_ms(),
            shutdown_grace_ms: default_shutdown_grace_ms(),
        }
    }
}

impl Default for StreamSection {
    fn default() -> Self {
        Self {
            backend: CaptureBackend::default(),
            width: default_width(),
            height: default_height(),
            fps: default_fps(),
            quality: default_quality(),
            encoder_program: default_encoder_program(),
            encoder_args: Vec::new(),
            device_index: 0,
            stop_timeout_ms: default_stop_timeout_ms(),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
