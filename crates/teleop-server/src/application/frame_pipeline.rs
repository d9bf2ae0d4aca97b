//! Video frame pipeline: camera bytes in, paced `video_frame` events out.
//!
//! # How it works (for beginners)
//!
//! While the stream is active a single worker task owns the camera
//! ([`ByteSource`]).  It loops:
//!
//! 1. Read the next chunk of MJPEG bytes from the source.
//! 2. Feed it to a [`FrameExtractor`], which returns every complete JPEG
//!    (`FF D8 … FF D9`) the chunk finished.
//! 3. Broadcast each JPEG base64-encoded, then sleep
//!    `max(0, 1/fps − 10 ms)` to cap the outgoing frame rate.
//!
//! Once a second it also broadcasts the observed frame rate.
//!
//! The worker stops when asked to, when the source ends or fails, or when
//! nobody is subscribed any more.  It always shuts the source down on its way
//! out, so the camera is released exactly once per start.
//!
//! Settings live in a `watch` channel.  Quality and frame-rate changes reach a
//! running worker on its next frame; a resolution change restarts the source.

use std::sync::Arc;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use teleop_core::{FrameExtractor, ProtocolError, RateMeter, StreamConfig};

use crate::application::broadcast::BroadcastSink;
use crate::domain::messages::{ServerEvent, StreamInfo, StreamState};
use crate::infrastructure::capture::{ByteSource, CaptureError, SourceFactory};

/// Interval between `stream_rate` events.
const RATE_WINDOW: Duration = Duration::from_secs(1);

/// Default bound on waiting for the worker to exit.
pub const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StreamError {
    #[error(transparent)]
    Invalid(#[from] ProtocolError),

    #[error("camera error: {0}")]
    Capture(#[from] CaptureError),
}

struct PipelineRun {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl PipelineRun {
    fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

pub struct FramePipeline {
    factory: Arc<dyn SourceFactory>,
    sink: Arc<BroadcastSink>,
    config: watch::Sender<StreamConfig>,
    /// Serializes start, stop and restart.
    run: Mutex<Option<PipelineRun>>,
    stop_grace: Duration,
}

impl FramePipeline {
    pub fn new(factory: Arc<dyn SourceFactory>, sink: Arc<BroadcastSink>, config: StreamConfig) -> Self {
        let (config, _) = watch::channel(config);
        Self {
            factory,
            sink,
            config,
            run: Mutex::new(None),
            stop_grace: DEFAULT_STOP_GRACE,
        }
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn config(&self) -> StreamConfig {
        *self.config.borrow()
    }

    pub fn backend_name(&self) -> &'static str {
        self.factory.backend_name()
    }

    pub async fn is_active(&self) -> bool {
        self.run.lock().await.as_ref().is_some_and(PipelineRun::is_running)
    }

    pub async fn info(&self) -> StreamInfo {
        let config = self.config();
        StreamInfo {
            active: self.is_active().await,
            backend: self.backend_name().to_string(),
            width: config.width,
            height: config.height,
            fps: config.fps,
            quality: config.quality,
        }
    }

    // ── Lifecycle ─────────────────────────────────────────────────────────────

    /// Opens the camera and starts the worker.
    ///
    /// Returns `Ok(false)` if the stream was already running.
    ///
    /// # Errors
    ///
    /// Returns [`CaptureError`] if the camera cannot be opened.
    pub async fn start(&self) -> Result<bool, CaptureError> {
        let mut run = self.run.lock().await;
        self.start_locked(&mut run).await
    }

    async fn start_locked(&self, run: &mut Option<PipelineRun>) -> Result<bool, CaptureError> {
        if run.as_ref().is_some_and(PipelineRun::is_running) {
            return Ok(false);
        }
        if let Some(finished) = run.take() {
            let _ = finished.handle.await;
        }

        let config = self.config();
        let source = self.factory.open(&config).await?;
        let (stop_tx, stop_rx) = watch::channel(false);
        let worker = Worker {
            source,
            sink: Arc::clone(&self.sink),
            config: self.config.subscribe(),
            stop: stop_rx,
        };
        *run = Some(PipelineRun {
            stop_tx,
            handle: tokio::spawn(worker.run()),
        });

        info!(
            backend = self.backend_name(),
            width = config.width,
            height = config.height,
            fps = config.fps,
            "stream started"
        );
        self.sink.emit(ServerEvent::StreamStatus {
            status: StreamState::Started,
        });
        Ok(true)
    }

    /// Stops the worker and waits (bounded) for it to release the camera.
    ///
    /// Returns `false` if the stream was not running.
    pub async fn stop(&self) -> bool {
        let mut run = self.run.lock().await;
        self.stop_locked(&mut run).await
    }

    async fn stop_locked(&self, run: &mut Option<PipelineRun>) -> bool {
        let Some(PipelineRun { stop_tx, mut handle }) = run.take() else {
            return false;
        };
        let was_running = !handle.is_finished();
        let _ = stop_tx.send(true);

        if timeout(self.stop_grace, &mut handle).await.is_err() {
            warn!(grace = ?self.stop_grace, "stream worker did not stop in time; aborting");
            handle.abort();
        }

        if was_running {
            info!("stream stopped");
            self.sink.emit(ServerEvent::StreamStatus {
                status: StreamState::Stopped,
            });
        }
        was_running
    }

    // ── Settings ──────────────────────────────────────────────────────────────

    /// Applies to the next emitted frame.
    pub fn set_quality(&self, quality: i64) -> Result<(), StreamError> {
        let mut next = self.config();
        next.set_quality(quality)?;
        self.config.send_replace(next);
        Ok(())
    }

    /// Changes frame pacing only; the source keeps its own rate.
    pub fn set_fps(&self, fps: i64) -> Result<(), StreamError> {
        let mut next = self.config();
        next.set_fps(fps)?;
        self.config.send_replace(next);
        Ok(())
    }

    /// Changes the resolution, restarting the camera if the stream is running.
    ///
    /// Returns whether a restart happened.
    pub async fn set_resolution(&self, width: i64, height: i64) -> Result<bool, StreamError> {
        let mut next = self.config();
        next.set_resolution(width, height)?;
        self.restart_with(next).await
    }

    /// Publishes `next` and, if the stream is running, reopens the source so
    /// it is built from the complete new config.
    async fn restart_with(&self, next: StreamConfig) -> Result<bool, StreamError> {
        let mut run = self.run.lock().await;
        self.config.send_replace(next);
        if !run.as_ref().is_some_and(PipelineRun::is_running) {
            return Ok(false);
        }
        info!(
            width = next.width,
            height = next.height,
            fps = next.fps,
            "restarting stream for new resolution"
        );
        self.stop_locked(&mut run).await;
        self.start_locked(&mut run).await?;
        Ok(true)
    }

    /// Validates every provided setting before applying any of them.
    ///
    /// A resolution change restarts a running stream with the full new config.
    pub async fn apply_settings(
        &self,
        quality: Option<i64>,
        width: Option<i64>,
        height: Option<i64>,
        fps: Option<i64>,
    ) -> Result<(), StreamError> {
        let current = self.config();
        let mut next = current;
        if let Some(quality) = quality {
            next.set_quality(quality)?;
        }
        if let Some(fps) = fps {
            next.set_fps(fps)?;
        }
        if width.is_some() || height.is_some() {
            next.set_resolution(
                width.unwrap_or(i64::from(current.width)),
                height.unwrap_or(i64::from(current.height)),
            )?;
        }

        if (next.width, next.height) != (current.width, current.height) {
            self.restart_with(next).await?;
        } else {
            self.config.send_replace(next);
        }
        Ok(())
    }
}

// ── Worker ────────────────────────────────────────────────────────────────────

enum Exit {
    Stopped,
    NoSubscribers,
    EndOfStream,
    Failed(CaptureError),
}

struct Worker {
    source: Box<dyn ByteSource>,
    sink: Arc<BroadcastSink>,
    config: watch::Receiver<StreamConfig>,
    stop: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        let mut extractor = FrameExtractor::new();
        let mut meter = RateMeter::new(Instant::now().into_std());
        let mut rate_tick = interval_at(Instant::now() + RATE_WINDOW, RATE_WINDOW);
        rate_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let exit = 'run: loop {
            let config = *self.config.borrow();
            tokio::select! {
                biased;

                _ = self.stop.changed() => break 'run Exit::Stopped,

                _ = rate_tick.tick() => {
                    if meter.sample(Instant::now().into_std()).is_some() {
                        self.sink.emit(ServerEvent::StreamRate { fps: meter.current() });
                    }
                }

                chunk = self.source.next_chunk(&config) => {
                    let bytes = match chunk {
                        Ok(Some(bytes)) => bytes,
                        Ok(None) => break 'run Exit::EndOfStream,
                        Err(e) => break 'run Exit::Failed(e),
                    };
                    for jpeg in extractor.push(&bytes) {
                        if *self.stop.borrow() {
                            break 'run Exit::Stopped;
                        }
                        if self.sink.is_empty() {
                            break 'run Exit::NoSubscribers;
                        }

                        let config = *self.config.borrow();
                        meter.record_frame();
                        self.sink.emit(ServerEvent::VideoFrame {
                            frame: BASE64.encode(&jpeg),
                            fps: meter.current(),
                            width: config.width,
                            height: config.height,
                        });

                        tokio::select! {
                            _ = self.stop.changed() => break 'run Exit::Stopped,
                            _ = sleep(config.pacing_delay()) => {}
                        }
                    }
                }
            }
        };

        self.source.shutdown().await;
        match exit {
            Exit::Stopped => debug!("stream worker stopped on request"),
            Exit::NoSubscribers => info!("no subscribers left; stream worker exiting"),
            Exit::EndOfStream => {
                warn!("camera stream ended");
                self.emit_stopped();
            }
            Exit::Failed(e) => {
                warn!("camera failed: {e}");
                self.emit_stopped();
            }
        }
    }

    fn emit_stopped(&self) {
        self.sink.emit(ServerEvent::StreamStatus {
            status: StreamState::Stopped,
        });
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::capture::mock::{fake_jpeg, ScriptedSourceFactory, WhenExhausted};

    fn pipeline(factory: &ScriptedSourceFactory) -> (FramePipeline, Arc<BroadcastSink>) {
        let sink = Arc::new(BroadcastSink::new());
        let pipeline = FramePipeline::new(
            Arc::new(factory.clone()),
            Arc::clone(&sink),
            StreamConfig::default(),
        );
        (pipeline, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_is_idempotent() {
        // Arrange
        let factory = ScriptedSourceFactory::endless();
        let (pipeline, sink) = pipeline(&factory);
        let _sub = sink.subscribe();

        // Act
        let first = pipeline.start().await.unwrap();
        let second = pipeline.start().await.unwrap();

        // Assert
        assert!(first);
        assert!(!second);
        assert_eq!(factory.opens(), 1);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_releases_source_once() {
        let factory = ScriptedSourceFactory::endless();
        let (pipeline, sink) = pipeline(&factory);
        let _sub = sink.subscribe();
        pipeline.start().await.unwrap();

        assert!(pipeline.stop().await);
        assert!(!pipeline.stop().await);

        assert_eq!(factory.shutdowns(), 1);
        assert!(!pipeline.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_split_across_chunks_are_reassembled() {
        // Arrange: one JPEG split over two chunks.
        let jpeg = fake_jpeg(0x11);
        let factory = ScriptedSourceFactory::new(
            vec![jpeg[..3].to_vec(), jpeg[3..].to_vec()],
            WhenExhausted::Hang,
        );
        let (pipeline, sink) = pipeline(&factory);
        let mut sub = sink.subscribe();

        // Act
        pipeline.start().await.unwrap();
        sleep(Duration::from_millis(200)).await;
        pipeline.stop().await;

        // Assert
        let mut frames = Vec::new();
        while let Ok(event) = sub.events.try_recv() {
            if let ServerEvent::VideoFrame { frame, .. } = &*event {
                frames.push(BASE64.decode(frame).unwrap());
            }
        }
        assert_eq!(frames, vec![jpeg]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_are_paced_by_fps() {
        // Arrange
        let factory = ScriptedSourceFactory::endless();
        let (pipeline, sink) = pipeline(&factory);
        pipeline.set_fps(10).unwrap();
        let mut sub = sink.subscribe();

        // Act
        pipeline.start().await.unwrap();
        let mut stamps = Vec::new();
        while stamps.len() < 3 {
            let event = sub.events.recv().await.unwrap();
            if matches!(*event, ServerEvent::VideoFrame { .. }) {
                stamps.push(Instant::now());
            }
        }
        pipeline.stop().await;

        // Assert: 1/10 s minus the 10 ms margin between frames.
        assert!(stamps[1] - stamps[0] >= Duration::from_millis(90));
        assert!(stamps[2] - stamps[1] >= Duration::from_millis(90));
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_is_reported_every_second() {
        let factory = ScriptedSourceFactory::endless();
        let (pipeline, sink) = pipeline(&factory);
        pipeline.set_fps(10).unwrap();
        let mut sub = sink.subscribe();

        pipeline.start().await.unwrap();
        let fps = loop {
            let event = sub.events.recv().await.unwrap();
            if let ServerEvent::StreamRate { fps } = *event {
                break fps;
            }
        };
        pipeline.stop().await;

        // 90 ms pacing fits a little over ten frames into each second.
        assert!((10.0..=12.5).contains(&fps), "observed {fps}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_exits_when_subscribers_leave() {
        // Arrange
        let factory = ScriptedSourceFactory::endless();
        let (pipeline, sink) = pipeline(&factory);
        let sub = sink.subscribe();
        pipeline.start().await.unwrap();

        // Act
        sink.unsubscribe(sub.id);
        sleep(Duration::from_millis(200)).await;

        // Assert
        assert!(!pipeline.is_active().await);
        assert_eq!(factory.shutdowns(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_end_of_stream_reports_stopped() {
        let factory = ScriptedSourceFactory::new(vec![fake_jpeg(1)], WhenExhausted::End);
        let (pipeline, sink) = pipeline(&factory);
        let mut sub = sink.subscribe();

        pipeline.start().await.unwrap();
        sleep(Duration::from_millis(200)).await;

        let mut statuses = Vec::new();
        while let Ok(event) = sub.events.try_recv() {
            if let ServerEvent::StreamStatus { status } = *event {
                statuses.push(status);
            }
        }
        assert_eq!(statuses, vec![StreamState::Started, StreamState::Stopped]);
        assert!(!pipeline.is_active().await);

        // A finished run can be started again.
        assert!(pipeline.start().await.unwrap());
        assert_eq!(factory.opens(), 2);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unopenable_camera_is_an_error() {
        let factory = ScriptedSourceFactory::broken();
        let (pipeline, _sink) = pipeline(&factory);

        assert!(pipeline.start().await.is_err());
        assert!(!pipeline.is_active().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_change_restarts_running_stream() {
        // Arrange
        let factory = ScriptedSourceFactory::endless();
        let (pipeline, sink) = pipeline(&factory);
        let _sub = sink.subscribe();
        pipeline.start().await.unwrap();

        // Act
        let restarted = pipeline.set_resolution(320, 240).await.unwrap();

        // Assert
        assert!(restarted);
        assert_eq!(factory.opens(), 2);
        assert_eq!(factory.shutdowns(), 1);
        let last = factory.opened_with().last().copied().unwrap();
        assert_eq!((last.width, last.height), (320, 240));
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_combined_settings_reopen_camera_with_new_rate_and_quality() {
        // Arrange
        let factory = ScriptedSourceFactory::endless();
        let (pipeline, sink) = pipeline(&factory);
        let _sub = sink.subscribe();
        pipeline.start().await.unwrap();

        // Act
        pipeline
            .apply_settings(Some(50), Some(320), Some(240), Some(15))
            .await
            .unwrap();

        // Assert: the reopened source already sees every new setting.
        assert_eq!(factory.opens(), 2);
        let last = factory.opened_with().last().copied().unwrap();
        assert_eq!((last.width, last.height), (320, 240));
        assert_eq!(last.fps, 15);
        assert_eq!(last.quality, 50);
        assert_eq!(pipeline.config(), last);
        pipeline.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_settings_leave_config_untouched() {
        let factory = ScriptedSourceFactory::endless();
        let (pipeline, _sink) = pipeline(&factory);
        let before = pipeline.config();

        assert!(pipeline.set_quality(0).is_err());
        assert!(pipeline.set_fps(61).is_err());
        assert!(pipeline.set_resolution(0, 480).await.is_err());
        assert!(pipeline
            .apply_settings(Some(50), Some(800), Some(600), Some(0))
            .await
            .is_err());

        assert_eq!(pipeline.config(), before);
    }
}
