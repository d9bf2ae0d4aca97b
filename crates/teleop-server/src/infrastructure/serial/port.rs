//! [`Link`] over a real serial port, via the `serialport` crate.
//!
//! `serialport` is a blocking API.  Every call that touches the port runs on
//! Tokio's blocking thread pool (`spawn_blocking`) so a slow controller never
//! stalls the async runtime.  The port itself lives behind a
//! `std::sync::Mutex` shared with those blocking tasks.

use std::io::{ErrorKind, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use tracing::{debug, info};

use super::{Link, LinkError, LinkOpener};

/// Granularity of a single blocking read; bounds how late a deadline is noticed.
const READ_SLICE: Duration = Duration::from_millis(20);

/// Opens [`SerialLink`]s at a fixed baud rate, 8N1, no flow control.
#[derive(Debug, Clone)]
pub struct SerialLinkOpener {
    baud_rate: u32,
}

impl SerialLinkOpener {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

#[async_trait]
impl LinkOpener for SerialLinkOpener {
    async fn open(&self, path: &str) -> Result<Box<dyn Link>, LinkError> {
        let owned = path.to_string();
        let baud_rate = self.baud_rate;
        let port = tokio::task::spawn_blocking(move || open_port(&owned, baud_rate))
            .await
            .map_err(join_error)??;

        info!(path, baud_rate, "opened serial port");
        Ok(Box::new(SerialLink {
            path: path.to_string(),
            state: Some(Arc::new(Mutex::new(PortState {
                port,
                pending: Vec::new(),
            }))),
        }))
    }
}

fn open_port(path: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, LinkError> {
    let port = serialport::new(path, baud_rate)
        .data_bits(DataBits::Eight)
        .parity(Parity::None)
        .stop_bits(StopBits::One)
        .flow_control(FlowControl::None)
        .timeout(READ_SLICE)
        .open()
        .map_err(|e| LinkError::PortUnavailable {
            path: path.to_string(),
            reason: e.to_string(),
        })?;
    port.clear(ClearBuffer::Input)
        .map_err(|e| LinkError::Io(e.into()))?;
    Ok(port)
}

struct PortState {
    port: Box<dyn SerialPort>,
    /// Bytes read past the last returned line.
    pending: Vec<u8>,
}

/// A serial connection to one controller.
pub struct SerialLink {
    path: String,
    state: Option<Arc<Mutex<PortState>>>,
}

impl SerialLink {
    fn shared(&self) -> Result<Arc<Mutex<PortState>>, LinkError> {
        self.state.clone().ok_or(LinkError::Closed)
    }
}

#[async_trait]
impl Link for SerialLink {
    fn path(&self) -> &str {
        &self.path
    }

    async fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        let state = self.shared()?;
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        tokio::task::spawn_blocking(move || -> Result<(), LinkError> {
            let mut guard = lock(&state);
            guard.port.write_all(&bytes)?;
            guard.port.flush()?;
            Ok(())
        })
        .await
        .map_err(join_error)?
    }

    async fn read_line(&mut self, timeout: Duration) -> Result<String, LinkError> {
        let state = self.shared()?;
        tokio::task::spawn_blocking(move || read_line_blocking(&state, timeout))
            .await
            .map_err(join_error)?
    }

    async fn discard_input(&mut self) -> Result<(), LinkError> {
        let state = self.shared()?;
        tokio::task::spawn_blocking(move || -> Result<(), LinkError> {
            let mut guard = lock(&state);
            guard.pending.clear();
            guard
                .port
                .clear(ClearBuffer::Input)
                .map_err(|e| LinkError::Io(e.into()))
        })
        .await
        .map_err(join_error)?
    }

    async fn close(&mut self) {
        if self.state.take().is_some() {
            debug!(path = %self.path, "closed serial port");
        }
    }

    fn is_open(&self) -> bool {
        self.state.is_some()
    }
}

fn read_line_blocking(state: &Mutex<PortState>, timeout: Duration) -> Result<String, LinkError> {
    let deadline = Instant::now() + timeout;
    let mut guard = lock(state);
    let PortState { port, pending } = &mut *guard;
    let mut chunk = [0u8; 256];

    loop {
        if let Some(pos) = pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = pending.drain(..=pos).collect();
            return Ok(String::from_utf8_lossy(&raw)
                .trim_end_matches(['\r', '\n'])
                .to_string());
        }
        if Instant::now() >= deadline {
            return Err(LinkError::Timeout);
        }
        match port.read(&mut chunk) {
            Ok(n) => pending.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::TimedOut => {}
            Err(e) => return Err(LinkError::Io(e)),
        }
    }
}

fn lock(state: &Mutex<PortState>) -> MutexGuard<'_, PortState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn join_error(e: tokio::task::JoinError) -> LinkError {
    LinkError::Io(std::io::Error::new(ErrorKind::Other, e))
}
