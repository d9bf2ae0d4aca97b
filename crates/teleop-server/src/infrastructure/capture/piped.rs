//! MJPEG from an external encoder process.
//!
//! The encoder is started with the stream's resolution and frame rate and told
//! to write MJPEG to stdout.  For `libcamera-vid` the generated arguments are:
//!
//! ```text
//! -t 0 --width <W> --height <H> --framerate <F> --codec mjpeg --output -
//! ```
//!
//! followed by any extra arguments from the config.  The child is killed when
//! the source is shut down or dropped.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStdout, Command};
use tracing::{debug, info, warn};

use teleop_core::StreamConfig;

use super::{ByteSource, CaptureError};

/// Bytes requested from the encoder's stdout per read.
const READ_CHUNK: usize = 4096;

/// How long to wait for the encoder to exit after it is killed.
const EXIT_WAIT: Duration = Duration::from_secs(2);

/// Command-line arguments for an MJPEG encoder at `config`'s settings.
pub fn encoder_args(config: &StreamConfig, extra: &[String]) -> Vec<String> {
    let mut args = vec![
        "-t".to_string(),
        "0".to_string(),
        "--width".to_string(),
        config.width.to_string(),
        "--height".to_string(),
        config.height.to_string(),
        "--framerate".to_string(),
        config.fps.to_string(),
        "--codec".to_string(),
        "mjpeg".to_string(),
        "--output".to_string(),
        "-".to_string(),
    ];
    args.extend(extra.iter().cloned());
    args
}

pub struct PipedSource {
    program: String,
    child: Child,
    stdout: ChildStdout,
    buf: Vec<u8>,
}

impl PipedSource {
    /// Starts `program` with [`encoder_args`].
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError::Spawn`] if the process cannot be started.
    pub fn spawn(program: &str, extra: &[String], config: &StreamConfig) -> Result<Self, CaptureError> {
        let args = encoder_args(config, extra);
        debug!(%program, ?args, "starting encoder");

        let spawn_error = |source| CaptureError::Spawn {
            program: program.to_string(),
            source,
        };
        let mut child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(spawn_error)?;

        let stdout = child.stdout.take().ok_or_else(|| {
            spawn_error(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "encoder stdout not captured",
            ))
        })?;

        info!(%program, pid = ?child.id(), "encoder started");
        Ok(Self {
            program: program.to_string(),
            child,
            stdout,
            buf: vec![0; READ_CHUNK],
        })
    }
}

#[async_trait]
impl ByteSource for PipedSource {
    async fn next_chunk(&mut self, _config: &StreamConfig) -> Result<Option<Vec<u8>>, CaptureError> {
        let n = self.stdout.read(&mut self.buf).await?;
        if n == 0 {
            info!(program = %self.program, "encoder closed its output");
            return Ok(None);
        }
        Ok(Some(self.buf[..n].to_vec()))
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(program = %self.program, "kill: {e}");
        }
        match tokio::time::timeout(EXIT_WAIT, self.child.wait()).await {
            Ok(Ok(status)) => info!(program = %self.program, %status, "encoder stopped"),
            Ok(Err(e)) => warn!(program = %self.program, "waiting for encoder: {e}"),
            Err(_) => warn!(program = %self.program, "encoder did not exit in time"),
        }
    }
}
