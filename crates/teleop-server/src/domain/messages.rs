//! JSON message types for the operator-facing WebSocket protocol.
//!
//! # Message flow
//!
//! ```text
//! Operator → Server:  JSON text frame  →  ClientRequest   (+ optional "id")
//! Server → Operator:  ServerEvent      →  JSON text frame
//! ```
//!
//! # JSON discriminant
//!
//! Every message is a JSON object with an `"event"` field naming the variant;
//! all other fields sit in the same object.  For example:
//!
//! ```json
//! {"id":7,"event":"synchronized_mode","speed":120,"reverse":false}
//! {"event":"servo_angle","servo_type":"mg995","angle":90}
//! {"event":"reply","id":7,"success":true,"response":"OK synchronized,120,forward"}
//! ```
//!
//! Requests may carry a numeric `"id"`; the matching `reply` echoes it so the
//! operator can correlate answers with requests.  Broadcast events carry no id.
//!
//! Numeric request fields are deserialized as plain `i64` and validated by the
//! command protocol, so an out-of-range value becomes a clean
//! `InvalidParameter` reply instead of a JSON error.

use serde::{Deserialize, Serialize};

use teleop_core::{ConnectionState, MotorStatus, ServoId, ServoStatus};

// ── Operator → Server ─────────────────────────────────────────────────────────

/// Every request an operator can send.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ClientRequest {
    /// Forces a motor controller (re)connection attempt.
    InitMotors,
    MotorsOff,
    SynchronizedMode {
        #[serde(default)]
        speed: i64,
        #[serde(default)]
        reverse: bool,
    },
    DifferentialMode {
        #[serde(default)]
        speed1: i64,
        #[serde(default)]
        speed2: i64,
        #[serde(default)]
        reverse1: bool,
        #[serde(default)]
        reverse2: bool,
    },
    IndependentMode {
        #[serde(default)]
        speed1: i64,
        #[serde(default)]
        speed2: i64,
        #[serde(default)]
        speed3: i64,
        #[serde(default)]
        speed4: i64,
        #[serde(default)]
        reverse1: bool,
        #[serde(default)]
        reverse2: bool,
        #[serde(default)]
        reverse3: bool,
        #[serde(default)]
        reverse4: bool,
    },
    MotorStatusRequest,
    ControlServos {
        servo_type: String,
        action: String,
        angle: Option<i64>,
        speed: Option<i64>,
        #[serde(default)]
        force_stop: bool,
        #[serde(default)]
        calibration: bool,
        #[serde(default)]
        priority: bool,
    },
    ServoStatusRequest,
    DeviceStatusRequest,
    StartStream {
        quality: Option<i64>,
        width: Option<i64>,
        height: Option<i64>,
        fps: Option<i64>,
    },
    StopStream,
    SetQuality {
        quality: i64,
    },
    SetResolution {
        width: i64,
        height: i64,
    },
    SetFps {
        fps: i64,
    },
    ServerInfo,
}

impl ClientRequest {
    /// Parses one inbound text frame into its optional correlation id and request.
    ///
    /// The id is recovered even when the request itself is malformed, so the
    /// error reply can still be correlated.
    pub fn parse(text: &str) -> (Option<u64>, Result<Self, serde_json::Error>) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => return (None, Err(e)),
        };
        let id = value.get("id").and_then(serde_json::Value::as_u64);
        (id, serde_json::from_value(value))
    }
}

// ── Server → Operator ─────────────────────────────────────────────────────────

/// Whether the video stream is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Started,
    Stopped,
}

/// Connection state of both controllers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceStates {
    pub motor: ConnectionState,
    pub servo: ConnectionState,
}

/// Current stream settings and state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamInfo {
    pub active: bool,
    pub backend: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub quality: u8,
}

/// Snapshot answered to a `server_info` request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerInfo {
    pub status: String,
    pub camera_type: String,
    pub stream_active: bool,
    pub clients_connected: usize,
    pub quality: u8,
    pub resolution: String,
    pub fps: u32,
    pub devices: DeviceStates,
    pub motor_status: MotorStatus,
    pub servo_status: ServoStatus,
}

/// Payload attached to a reply, shaped by the request it answers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ReplyStatus {
    Motor(MotorStatus),
    Servo(ServoStatus),
    Devices(DeviceStates),
    Stream(StreamInfo),
    Server(Box<ServerInfo>),
}

/// Synchronous answer to one request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommandReply {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<ReplyStatus>,
    /// Whether the addressed controller is connected, for status requests.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connected: Option<bool>,
}

impl CommandReply {
    pub fn ok(response: impl Into<String>) -> Self {
        Self {
            success: true,
            response: Some(response.into()),
            status: None,
            connected: None,
        }
    }

    pub fn failed(response: impl Into<String>) -> Self {
        Self {
            success: false,
            response: Some(response.into()),
            status: None,
            connected: None,
        }
    }

    pub fn with_status(mut self, status: ReplyStatus) -> Self {
        self.status = Some(status);
        self
    }
}

/// Everything the server pushes to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Sent to one operator right after it joins.
    ConnectionStatus { status: String },
    MotorStatus(MotorStatus),
    ServoStatus(ServoStatus),
    ServoAngle { servo_type: ServoId, angle: u16 },
    ServoStopped { servo_type: ServoId, success: bool },
    DeviceStatus(DeviceStates),
    StreamStatus { status: StreamState },
    /// One JPEG frame, base64-encoded, with the observed frame rate.
    VideoFrame {
        frame: String,
        fps: f32,
        width: u32,
        height: u32,
    },
    /// Observed frame rate over the last second.
    StreamRate { fps: f32 },
    Reply {
        id: Option<u64>,
        #[serde(flatten)]
        reply: CommandReply,
    },
}

impl ServerEvent {
    /// Short name for log lines; never includes frame payloads.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ConnectionStatus { .. } => "connection_status",
            Self::MotorStatus(_) => "motor_status",
            Self::ServoStatus(_) => "servo_status",
            Self::ServoAngle { .. } => "servo_angle",
            Self::ServoStopped { .. } => "servo_stopped",
            Self::DeviceStatus(_) => "device_status",
            Self::StreamStatus { .. } => "stream_status",
            Self::VideoFrame { .. } => "video_frame",
            Self::StreamRate { .. } => "stream_rate",
            Self::Reply { .. } => "reply",
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
