//! Video normalization using ffmpeg/ffprobe.

use async_trait::async_trait;
use serde::Deserialize;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Longest stderr excerpt kept in an error message.
const MAX_STDERR_CHARS: usize = 500;

/// Errors that can occur while normalizing or probing a clip.
#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("ffmpeg failed ({status}): {stderr}")]
    ConversionFailed { status: String, stderr: String },

    #[error("ffprobe failed: {0}")]
    ProbeFailed(String),

    #[error("Invalid output: {0}")]
    InvalidOutput(String),

    #[error("Output has no usable duration")]
    MissingDuration,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Video metadata extracted from ffprobe.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub duration_seconds: Option<f64>,
    pub width: Option<i64>,
    pub height: Option<i64>,
}

/// Normalization profile applied to every clip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeProfile {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub crf: u32,
    pub preset: String,
}

impl Default for TranscodeProfile {
    fn default() -> Self {
        Self {
            fps: 30,
            width: 1280,
            height: 720,
            crf: 23,
            preset: "fast".to_string(),
        }
    }
}

impl TranscodeProfile {
    /// Video filter: constant frame rate, then fit into the frame preserving
    /// aspect ratio and letterbox the rest.
    pub fn video_filter(&self) -> String {
        format!(
            "fps={fps}:round=up,scale={w}:{h}:force_original_aspect_ratio=decrease,pad={w}:{h}:(ow-iw)/2:(oh-ih)/2",
            fps = self.fps,
            w = self.width,
            h = self.height,
        )
    }
}

/// Normalizes a raw clip into the delivery format.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait Transcoder: Send + Sync {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError>;
}

/// Reads duration and dimensions of a normalized clip.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait MediaProber: Send + Sync {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError>;
}

pub struct FfmpegTranscoder {
    ffmpeg_path: PathBuf,
    profile: TranscodeProfile,
}

impl FfmpegTranscoder {
    pub fn new(ffmpeg_path: impl Into<PathBuf>, profile: TranscodeProfile) -> Self {
        Self {
            ffmpeg_path: ffmpeg_path.into(),
            profile,
        }
    }

    pub fn build_args(&self, input: &Path, output: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["-hide_banner".into(), "-loglevel".into(), "error".into()];
        args.push("-i".into());
        args.push(input.as_os_str().to_owned());
        for arg in [
            "-vf".to_string(),
            self.profile.video_filter(),
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            self.profile.preset.clone(),
            "-crf".to_string(),
            self.profile.crf.to_string(),
            "-an".to_string(), // No audio
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-y".to_string(), // Overwrite output
        ] {
            args.push(arg.into());
        }
        args.push(output.as_os_str().to_owned());
        args
    }
}

#[async_trait]
impl Transcoder for FfmpegTranscoder {
    async fn transcode(&self, input: &Path, output: &Path) -> Result<(), TranscodeError> {
        debug!("Transcoding {:?} -> {:?}", input, output);
        let result = Command::new(&self.ffmpeg_path)
            .args(self.build_args(input, output))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !result.status.success() {
            return Err(TranscodeError::ConversionFailed {
                status: result.status.to_string(),
                stderr: stderr_excerpt(&result.stderr),
            });
        }
        Ok(())
    }
}

pub struct FfprobeProber {
    ffprobe_path: PathBuf,
}

impl FfprobeProber {
    pub fn new(ffprobe_path: impl Into<PathBuf>) -> Self {
        Self {
            ffprobe_path: ffprobe_path.into(),
        }
    }
}

#[async_trait]
impl MediaProber for FfprobeProber {
    async fn probe(&self, path: &Path) -> Result<MediaInfo, TranscodeError> {
        let output = Command::new(&self.ffprobe_path)
            .args([
                "-v",
                "quiet",
                "-print_format",
                "json",
                "-show_format",
                "-show_streams",
            ])
            .arg(path)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        if !output.status.success() {
            return Err(TranscodeError::ProbeFailed(stderr_excerpt(&output.stderr)));
        }
        parse_probe_output(&String::from_utf8_lossy(&output.stdout))
    }
}

/// ffprobe JSON output structure.
#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    format: Option<FfprobeFormat>,
    #[serde(default)]
    streams: Vec<FfprobeStream>,
}

#[derive(Debug, Deserialize)]
struct FfprobeFormat {
    duration: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    codec_type: Option<String>,
    width: Option<i64>,
    height: Option<i64>,
    duration: Option<String>,
}

pub fn parse_probe_output(json: &str) -> Result<MediaInfo, TranscodeError> {
    let probe: FfprobeOutput = serde_json::from_str(json)
        .map_err(|e| TranscodeError::InvalidOutput(format!("JSON parse error: {}", e)))?;

    let video = probe
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"));

    // Container duration first, stream duration as a fallback
    let duration_seconds = probe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .or_else(|| video.and_then(|v| v.duration.as_deref()))
        .and_then(|d| d.trim().parse::<f64>().ok())
        .filter(|d| d.is_finite());

    Ok(MediaInfo {
        duration_seconds,
        width: video.and_then(|v| v.width),
        height: video.and_then(|v| v.height),
    })
}

fn stderr_excerpt(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let text = text.trim();
    let char_count = text.chars().count();
    if char_count <= MAX_STDERR_CHARS {
        text.to_string()
    } else {
        let tail: String = text.chars().skip(char_count - MAX_STDERR_CHARS).collect();
        format!("...{}", tail)
    }
}
