//! Stand-ins for ffmpeg and ffprobe.

use super::constants::NORMALIZED_SUFFIX;
use async_trait::async_trait;
use signsphere_asset_server::ingestion::{MediaInfo, MediaProber, TranscodeError, Transcoder};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Notify, Semaphore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscoderMode {
    /// Write the raw bytes plus [`NORMALIZED_SUFFIX`].
    Normalize,
    /// Write a partial output, then fail like ffmpeg would.
    Fail,
}

pub struct FakeTranscoder {
    mode: TranscoderMode,
    delay: Duration,
    /// When set, each transcode waits for one permit before finishing.
    gate: Option<Arc<Semaphore>>,
    pub started: Arc<Notify>,
    pub calls: AtomicUsize,
    running: AtomicUsize,
    pub max_running: AtomicUsize,
}

impl FakeTranscoder {
    pub fn new(mode: TranscoderMode, delay: Duration, gate: Option<Arc<Semaphore>>) -> Self {
        Self {
            mode,
            delay,
            gate,
            started: Arc::new(Notify::new()),
            calls: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    async fn run(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(gate) = &self.gate {
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
        }
        match self.mode {
            TranscoderMode::Normalize => {
                let mut data = tokio::fs::read(input).await?;
                data.extend_from_slice(NORMALIZED_SUFFIX);
                tokio::fs::write(output, data).await?;
                Ok(())
            }
            TranscoderMode::Fail => {
                tokio::fs::write(output, b"partial").await?;
                Err(TranscodeError::ConversionFailed {
                    status: "exit status: 1".to_string(),
                    stderr: "Invalid data found when processing input".to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl Transcoder for FakeTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);
        self.started.notify_one();

        let result = self.run(input, output).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

pub struct FakeProber {
    pub duration_seconds: Option<f64>,
}

#[async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, _path: &Path) -> Result<MediaInfo, TranscodeError> {
        Ok(MediaInfo {
            duration_seconds: self.duration_seconds,
            width: Some(1280),
            height: Some(720),
        })
    }
}
