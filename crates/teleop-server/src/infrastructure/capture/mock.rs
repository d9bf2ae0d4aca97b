//! Scripted byte sources for testing the frame pipeline without a camera.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use teleop_core::StreamConfig;

use super::{ByteSource, CaptureError, SourceFactory};

/// A minimal byte sequence the frame extractor accepts as one JPEG.
pub fn fake_jpeg(payload: u8) -> Vec<u8> {
    vec![0xFF, 0xD8, payload, payload, 0xFF, 0xD9]
}

/// How a scripted source behaves once its chunks are used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WhenExhausted {
    /// Start over from the first chunk.
    Repeat,
    /// Report end of stream.
    End,
    /// Never produce anything again.
    Hang,
}

/// Opens [`ScriptedSource`]s and counts opens and shutdowns.  Clones share
/// the counters.
#[derive(Clone)]
pub struct ScriptedSourceFactory {
    chunks: Vec<Vec<u8>>,
    exhausted: WhenExhausted,
    opens: Arc<AtomicUsize>,
    shutdowns: Arc<AtomicUsize>,
    configs: Arc<Mutex<Vec<StreamConfig>>>,
    fail_open: bool,
}

impl ScriptedSourceFactory {
    pub fn new(chunks: Vec<Vec<u8>>, exhausted: WhenExhausted) -> Self {
        Self {
            chunks,
            exhausted,
            opens: Arc::new(AtomicUsize::new(0)),
            shutdowns: Arc::new(AtomicUsize::new(0)),
            configs: Arc::new(Mutex::new(Vec::new())),
            fail_open: false,
        }
    }

    /// A camera producing the same small frame forever.
    pub fn endless() -> Self {
        Self::new(vec![fake_jpeg(0x42)], WhenExhausted::Repeat)
    }

    /// A camera that cannot be opened.
    pub fn broken() -> Self {
        Self {
            fail_open: true,
            ..Self::new(Vec::new(), WhenExhausted::End)
        }
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn shutdowns(&self) -> usize {
        self.shutdowns.load(Ordering::SeqCst)
    }

    /// The stream settings each source was opened with, in order.
    pub fn opened_with(&self) -> Vec<StreamConfig> {
        self.configs.lock().expect("lock poisoned").clone()
    }
}

#[async_trait]
impl SourceFactory for ScriptedSourceFactory {
    async fn open(&self, config: &StreamConfig) -> Result<Box<dyn ByteSource>, CaptureError> {
        if self.fail_open {
            return Err(CaptureError::Device("no camera attached".to_string()));
        }
        self.opens.fetch_add(1, Ordering::SeqCst);
        self.configs.lock().expect("lock poisoned").push(*config);
        Ok(Box::new(ScriptedSource {
            chunks: self.chunks.clone(),
            next: 0,
            exhausted: self.exhausted,
            shutdowns: Arc::clone(&self.shutdowns),
        }))
    }

    fn backend_name(&self) -> &'static str {
        "scripted"
    }
}

pub struct ScriptedSource {
    chunks: Vec<Vec<u8>>,
    next: usize,
    exhausted: WhenExhausted,
    shutdowns: Arc<AtomicUsize>,
}

#[async_trait]
impl ByteSource for ScriptedSource {
    async fn next_chunk(&mut self, _config: &StreamConfig) -> Result<Option<Vec<u8>>, CaptureError> {
        if self.next >= self.chunks.len() {
            match self.exhausted {
                WhenExhausted::Repeat if !self.chunks.is_empty() => self.next = 0,
                WhenExhausted::Hang => std::future::pending::<()>().await,
                _ => return Ok(None),
            }
        }
        let chunk = self.chunks[self.next].clone();
        self.next += 1;
        tokio::task::yield_now().await;
        Ok(Some(chunk))
    }

    async fn shutdown(&mut self) {
        self.shutdowns.fetch_add(1, Ordering::SeqCst);
    }
}
