mod file_config;

pub use file_config::{FileConfig, TranscodeConfig};

use crate::ingestion::TranscodeProfile;
use anyhow::{anyhow, bail, Result};
use byte_unit::Byte;
use std::path::PathBuf;

pub const DEFAULT_WORKER_POOL_SIZE: usize = 2;
pub const DEFAULT_MAX_UPLOAD_SIZE: &str = "500 MiB";

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub media_path: Option<PathBuf>,
    pub worker_pool_size: Option<usize>,
    pub max_upload_size: Option<String>,
    pub ffmpeg_path: Option<String>,
    pub ffprobe_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_dir: PathBuf,
    pub media_path: PathBuf,
    pub worker_pool_size: usize,
    /// Upload size limit in bytes.
    pub max_upload_bytes: u64,
    pub transcode: TranscodeSettings,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeSettings {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub profile: TranscodeProfile,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| anyhow!("db_dir must be specified via --db-dir or in config file"))?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let media_path = file
            .media_path
            .map(PathBuf::from)
            .or_else(|| cli.media_path.clone())
            .unwrap_or_else(|| db_dir.join("media"));

        let worker_pool_size = file
            .worker_pool_size
            .or(cli.worker_pool_size)
            .unwrap_or(DEFAULT_WORKER_POOL_SIZE);
        if worker_pool_size == 0 {
            bail!("worker_pool_size must be at least 1");
        }

        let max_upload_size = file
            .max_upload_size
            .or_else(|| cli.max_upload_size.clone())
            .unwrap_or_else(|| DEFAULT_MAX_UPLOAD_SIZE.to_string());
        let max_upload_bytes = parse_size(&max_upload_size)?;

        // Transcode settings - merge file config with defaults
        let tc_file = file.transcode.unwrap_or_default();
        let defaults = TranscodeProfile::default();
        let transcode = TranscodeSettings {
            ffmpeg_path: tc_file
                .ffmpeg_path
                .or_else(|| cli.ffmpeg_path.clone())
                .unwrap_or_else(|| "ffmpeg".to_string()),
            ffprobe_path: tc_file
                .ffprobe_path
                .or_else(|| cli.ffprobe_path.clone())
                .unwrap_or_else(|| "ffprobe".to_string()),
            profile: TranscodeProfile {
                fps: tc_file.fps.unwrap_or(defaults.fps),
                width: tc_file.width.unwrap_or(defaults.width),
                height: tc_file.height.unwrap_or(defaults.height),
                crf: tc_file.crf.unwrap_or(defaults.crf),
                preset: tc_file.preset.unwrap_or(defaults.preset),
            },
        };
        if transcode.profile.fps == 0 || transcode.profile.width == 0 || transcode.profile.height == 0
        {
            bail!("transcode fps, width and height must be positive");
        }

        Ok(Self {
            db_dir,
            media_path,
            worker_pool_size,
            max_upload_bytes,
            transcode,
        })
    }

    pub fn asset_db_path(&self) -> PathBuf {
        self.db_dir.join("assets.db")
    }
}

fn parse_size(value: &str) -> Result<u64> {
    let bytes = Byte::parse_str(value, true)
        .map_err(|e| anyhow!("Invalid max_upload_size {:?}: {}", value, e))?
        .as_u64();
    if bytes == 0 {
        bail!("max_upload_size must be greater than zero");
    }
    Ok(bytes)
}
