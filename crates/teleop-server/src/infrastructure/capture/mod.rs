//! Camera byte sources for the frame pipeline.
//!
//! A [`ByteSource`] yields raw chunks of an MJPEG byte stream.  The frame
//! pipeline does not care where the bytes come from; it feeds every chunk into
//! a `FrameExtractor` and broadcasts whatever complete JPEGs fall out.
//!
//! Two backends exist:
//!
//! - **piped** ([`piped::PipedSource`]) – an external encoder process (by
//!   default `libcamera-vid`) writing MJPEG to its stdout.
//! - **device** ([`device::CaptureDeviceSource`]) – a capture device read
//!   frame by frame and re-encoded to JPEG at the configured quality.
//!
//! [`SourceFactory`] is the seam the pipeline opens sources through; tests use
//! the scripted factory in [`mock`].

use async_trait::async_trait;
use thiserror::Error;

use teleop_core::StreamConfig;

use crate::domain::config::{CaptureBackend, StreamSection};

pub mod device;
pub mod mock;
pub mod piped;

/// Error type for capture backends.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The encoder process could not be started.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("capture I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A captured frame could not be encoded as JPEG.
    #[error("JPEG encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    /// The capture device failed or went away.
    #[error("capture device error: {0}")]
    Device(String),

    /// The selected backend is not available in this build.
    #[error("{0}")]
    Unsupported(&'static str),
}

/// A running camera producing MJPEG bytes.
#[async_trait]
pub trait ByteSource: Send {
    /// Returns the next chunk of bytes, or `None` at end of stream.
    ///
    /// Must be cancel-safe: the pipeline drops this future when asked to stop.
    async fn next_chunk(&mut self, config: &StreamConfig) -> Result<Option<Vec<u8>>, CaptureError>;

    /// Stops the camera and releases it.  Called exactly once by the pipeline.
    async fn shutdown(&mut self);
}

/// Opens [`ByteSource`]s for the configured backend.
#[async_trait]
pub trait SourceFactory: Send + Sync {
    async fn open(&self, config: &StreamConfig) -> Result<Box<dyn ByteSource>, CaptureError>;

    /// Short backend name reported to operators, e.g. `piped`.
    fn backend_name(&self) -> &'static str;
}

/// Factory for the backend selected in the `[stream]` config section.
#[derive(Debug, Clone)]
pub struct DefaultSourceFactory {
    section: StreamSection,
}

impl DefaultSourceFactory {
    pub fn new(section: StreamSection) -> Self {
        Self { section }
    }
}

#[async_trait]
impl SourceFactory for DefaultSourceFactory {
    async fn open(&self, config: &StreamConfig) -> Result<Box<dyn ByteSource>, CaptureError> {
        match self.section.backend {
            CaptureBackend::Piped => {
                let source = piped::PipedSource::spawn(
                    &self.section.encoder_program,
                    &self.section.encoder_args,
                    config,
                )?;
                Ok(Box::new(source))
            }
            CaptureBackend::Device => open_device(self.section.device_index, config).await,
        }
    }

    fn backend_name(&self) -> &'static str {
        self.section.backend.as_str()
    }
}

#[cfg(feature = "camera")]
async fn open_device(index: u32, config: &StreamConfig) -> Result<Box<dyn ByteSource>, CaptureError> {
    let grabber = device::camera::CameraGrabber::open(index, config).await?;
    Ok(Box::new(device::CaptureDeviceSource::new(grabber)))
}

#[cfg(not(feature = "camera"))]
async fn open_device(
    _index: u32,
    _config: &StreamConfig,
) -> Result<Box<dyn ByteSource>, CaptureError> {
    Err(CaptureError::Unsupported(
        "the device capture backend requires building with the `camera` feature",
    ))
}

#[cfg(all(test, not(feature = "camera")))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_device_backend_without_camera_feature_is_unsupported() {
        let section = StreamSection {
            backend: CaptureBackend::Device,
            ..StreamSection::default()
        };
        let factory = DefaultSourceFactory::new(section);

        let result = factory.open(&StreamConfig::default()).await;

        assert!(matches!(result, Err(CaptureError::Unsupported(_))));
        assert_eq!(factory.backend_name(), "device");
    }
}
