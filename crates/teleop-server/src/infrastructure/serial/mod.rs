//! Serial link infrastructure for the motor and servo controllers.
//!
//! A [`Link`] is one open, line-oriented serial connection.  It knows nothing
//! about handshakes or retries; the device manager builds those on top.
//!
//! # Testability
//!
//! The [`Link`] and [`LinkOpener`] traits let tests replace real serial ports
//! with scripted fake controllers (see [`mock`]), so discovery, handshake and
//! reconnect logic run without hardware.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod mock;
pub mod port;

pub use port::SerialLinkOpener;

/// Error type for serial link operations.
#[derive(Debug, Error)]
pub enum LinkError {
    /// The device path does not exist or is busy.
    #[error("port {path} unavailable: {reason}")]
    PortUnavailable { path: String, reason: String },

    /// No complete line arrived within the read timeout.
    #[error("timed out waiting for a line")]
    Timeout,

    /// The operating system reported an I/O failure.
    #[error("serial I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The link was used after `close()`.
    #[error("link is closed")]
    Closed,
}

/// One open serial connection speaking `\n`-terminated text lines.
#[async_trait]
pub trait Link: Send + Sync {
    /// Path of the device this link is attached to, e.g. `/dev/ttyACM0`.
    fn path(&self) -> &str;

    /// Writes `line` followed by a newline.
    async fn write_line(&mut self, line: &str) -> Result<(), LinkError>;

    /// Reads the next line, without its terminator.
    ///
    /// Fails with [`LinkError::Timeout`] if no complete line arrives in time.
    async fn read_line(&mut self, timeout: Duration) -> Result<String, LinkError>;

    /// Throws away anything already received but not yet read.
    async fn discard_input(&mut self) -> Result<(), LinkError>;

    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Opens links by device path.
#[async_trait]
pub trait LinkOpener: Send + Sync {
    /// Opens `path` with its input buffer cleared.
    ///
    /// Fails with [`LinkError::PortUnavailable`] if the path is missing or busy.
    async fn open(&self, path: &str) -> Result<Box<dyn Link>, LinkError>;
}
