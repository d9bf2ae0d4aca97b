//! Frames from a capture device, re-encoded to JPEG.
//!
//! Grabbing a frame from a camera and compressing it are both blocking, so each
//! grab-and-encode runs on the blocking thread pool.  The grabber is moved into
//! that job and handed back with the result.  An in-flight job survives a
//! cancelled `next_chunk`, which keeps the source cancel-safe: the next call
//! simply resumes waiting for it.

use async_trait::async_trait;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::RgbImage;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use teleop_core::StreamConfig;

use super::{ByteSource, CaptureError};

/// One camera, producing RGB frames.
#[cfg_attr(test, mockall::automock)]
pub trait ImageGrabber: Send {
    /// Blocks until the next frame is available.
    fn grab(&mut self) -> Result<RgbImage, CaptureError>;

    /// Stops the camera.  No further `grab` calls follow.
    fn release(&mut self);
}

type GrabJob<G> = JoinHandle<(G, Result<Vec<u8>, CaptureError>)>;

pub struct CaptureDeviceSource<G: ImageGrabber + 'static> {
    grabber: Option<G>,
    inflight: Option<GrabJob<G>>,
}

impl<G: ImageGrabber + 'static> CaptureDeviceSource<G> {
    pub fn new(grabber: G) -> Self {
        Self {
            grabber: Some(grabber),
            inflight: None,
        }
    }

    async fn finish_inflight(&mut self) -> Result<Option<Vec<u8>>, CaptureError> {
        let Some(job) = self.inflight.as_mut() else {
            return Ok(None);
        };
        let joined = job.await;
        self.inflight = None;
        let (grabber, result) =
            joined.map_err(|e| CaptureError::Device(format!("capture job failed: {e}")))?;
        self.grabber = Some(grabber);
        result.map(Some)
    }
}

/// Encodes `frame` as a baseline JPEG, scaled to `width`x`height` if needed.
pub fn encode_jpeg(frame: &RgbImage, width: u32, height: u32, quality: u8) -> Result<Vec<u8>, CaptureError> {
    let resized;
    let frame = if frame.dimensions() == (width, height) {
        frame
    } else {
        resized = imageops::resize(frame, width, height, FilterType::Triangle);
        &resized
    };

    let mut out = Vec::new();
    JpegEncoder::new_with_quality(&mut out, quality).encode_image(frame)?;
    Ok(out)
}

#[async_trait]
impl<G: ImageGrabber + 'static> ByteSource for CaptureDeviceSource<G> {
    async fn next_chunk(&mut self, config: &StreamConfig) -> Result<Option<Vec<u8>>, CaptureError> {
        if self.inflight.is_none() {
            let mut grabber = self
                .grabber
                .take()
                .ok_or(CaptureError::Device("capture device already released".to_string()))?;
            let (width, height, quality) = (config.width, config.height, config.quality);
            self.inflight = Some(tokio::task::spawn_blocking(move || {
                let result = grabber
                    .grab()
                    .and_then(|frame| encode_jpeg(&frame, width, height, quality));
                (grabber, result)
            }));
        }
        match self.finish_inflight().await? {
            Some(jpeg) => Ok(Some(jpeg)),
            None => Err(CaptureError::Device("capture job vanished".to_string())),
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = self.finish_inflight().await {
            debug!("discarding last frame on shutdown: {e}");
        }
        let Some(mut grabber) = self.grabber.take() else {
            warn!("capture device lost before shutdown");
            return;
        };
        if let Err(e) = tokio::task::spawn_blocking(move || grabber.release()).await {
            warn!("releasing capture device: {e}");
        }
    }
}

// ── Camera grabber ────────────────────────────────────────────────────────────

/// [`ImageGrabber`] backed by a local camera through `nokhwa`.
///
/// The camera handle is not `Send`, so it lives on a dedicated thread that
/// serves one frame per request.
#[cfg(feature = "camera")]
pub mod camera {
    use std::sync::mpsc;
    use std::thread;

    use image::RgbImage;
    use nokhwa::pixel_format::RgbFormat;
    use nokhwa::utils::{
        CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
    };
    use nokhwa::Camera;
    use tracing::{info, warn};

    use teleop_core::StreamConfig;

    use super::{CaptureError, ImageGrabber};

    type FrameResult = Result<RgbImage, CaptureError>;

    pub struct CameraGrabber {
        requests: Option<mpsc::Sender<()>>,
        frames: mpsc::Receiver<FrameResult>,
        thread: Option<thread::JoinHandle<()>>,
    }

    impl CameraGrabber {
        /// Opens camera `index` as close to `config`'s settings as it supports.
        pub async fn open(index: u32, config: &StreamConfig) -> Result<Self, CaptureError> {
            let (width, height, fps) = (config.width, config.height, config.fps);
            let (request_tx, request_rx) = mpsc::channel::<()>();
            let (frame_tx, frame_rx) = mpsc::channel::<FrameResult>();
            let (ready_tx, ready_rx) = mpsc::channel::<Result<(), CaptureError>>();

            let thread = thread::Builder::new()
                .name("camera-capture".to_string())
                .spawn(move || {
                    let format = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
                    let requested =
                        RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(format));
                    let mut camera = match Camera::new(CameraIndex::Index(index), requested)
                        .and_then(|mut camera| camera.open_stream().map(|()| camera))
                    {
                        Ok(camera) => camera,
                        Err(e) => {
                            let _ = ready_tx.send(Err(CaptureError::Device(e.to_string())));
                            return;
                        }
                    };
                    info!(camera = %camera.info().human_name(), "camera opened");
                    let _ = ready_tx.send(Ok(()));

                    while request_rx.recv().is_ok() {
                        let frame = camera
                            .frame()
                            .and_then(|buffer| buffer.decode_image::<RgbFormat>())
                            .map_err(|e| CaptureError::Device(e.to_string()))
                            .and_then(|decoded| {
                                let (w, h) = (decoded.width(), decoded.height());
                                RgbImage::from_raw(w, h, decoded.into_raw()).ok_or_else(|| {
                                    CaptureError::Device("frame buffer size mismatch".to_string())
                                })
                            });
                        if frame_tx.send(frame).is_err() {
                            break;
                        }
                    }
                    if let Err(e) = camera.stop_stream() {
                        warn!("stopping camera stream: {e}");
                    }
                })?;

            let ready = tokio::task::spawn_blocking(move || ready_rx.recv())
                .await
                .map_err(|e| CaptureError::Device(e.to_string()))?
                .map_err(|_| CaptureError::Device("camera thread exited".to_string()))?;
            ready?;

            Ok(Self {
                requests: Some(request_tx),
                frames: frame_rx,
                thread: Some(thread),
            })
        }
    }

    impl ImageGrabber for CameraGrabber {
        fn grab(&mut self) -> FrameResult {
            let requests = self
                .requests
                .as_ref()
                .ok_or(CaptureError::Device("camera released".to_string()))?;
            requests
                .send(())
                .map_err(|_| CaptureError::Device("camera thread exited".to_string()))?;
            self.frames
                .recv()
                .map_err(|_| CaptureError::Device("camera thread exited".to_string()))?
        }

        fn release(&mut self) {
            self.requests.take();
            if let Some(thread) = self.thread.take() {
                if thread.join().is_err() {
                    warn!("camera thread panicked");
                }
            }
        }
    }
}
