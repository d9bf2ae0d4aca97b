use std::fmt;

use serde::{Deserialize, Serialize};

/// Which of the two serial-attached controllers a connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceKind {
    Motor,
    Servo,
}

impl DeviceKind {
    pub const ALL: [DeviceKind; 2] = [DeviceKind::Motor, DeviceKind::Servo];

    /// The controller that is not `self`.
    pub fn other(self) -> Self {
        match self {
            Self::Motor => Self::Servo,
            Self::Servo => Self::Motor,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Motor => "motor",
            Self::Servo => "servo",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of one controller connection.
///
/// ```text
/// Disconnected ──► Probing ──► Handshaking ──► Connected
///      ▲              │             │              │
///      └──────────────┴─────────────┴──────────────┘  (I/O failure / no ack)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    /// Walking the candidate port list.
    Probing,
    /// A port is open and the handshake line has been sent.
    Handshaking,
    Connected,
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        self == Self::Connected
    }
}
