//! Upload validation and raw file handling.

use crate::assets::ASSET_EXTENSION;
use serde::Serialize;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Errors that can occur during file handling.
#[derive(Debug, Error)]
pub enum FileHandlerError {
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Unsupported file type: {0} (only .{ext} is accepted)", ext = ASSET_EXTENSION)]
    UnsupportedFileType(String),

    #[error("File too large: {0} bytes (max: {1})")]
    FileTooLarge(u64, u64),

    #[error("Empty upload: {0}")]
    EmptyFile(String),

    #[error("Content of {0} looks like {1}, not a video")]
    NotVideo(String, String),
}

impl FileHandlerError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// A non-fatal cleanup failure, reported instead of swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupWarning {
    pub path: PathBuf,
    pub message: String,
}

impl std::fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.path, self.message)
    }
}

/// Upload that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    /// Sanitized filename, as stored in the catalog.
    pub filename: String,
    /// Filename without its extension; names the asset folder and file.
    pub stem: String,
}

/// File handler for uploaded clips.
#[derive(Debug, Clone)]
pub struct FileHandler {
    /// Maximum upload size in bytes.
    max_file_size: u64,
}

impl FileHandler {
    pub fn new(max_file_size: u64) -> Self {
        Self { max_file_size }
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Check an upload before anything touches the disk.
    pub fn validate_upload(
        &self,
        filename: &str,
        data: &[u8],
    ) -> Result<ValidatedUpload, FileHandlerError> {
        let filename = sanitize_filename(filename)?;
        if !Self::is_supported_video(&filename) {
            return Err(FileHandlerError::UnsupportedFileType(filename));
        }
        let stem = Path::new(&filename)
            .file_stem()
            .and_then(|s| s.to_str())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| FileHandlerError::InvalidFilename(filename.clone()))?
            .to_string();

        let size = data.len() as u64;
        if size == 0 {
            return Err(FileHandlerError::EmptyFile(filename));
        }
        if size > self.max_file_size {
            return Err(FileHandlerError::FileTooLarge(size, self.max_file_size));
        }
        if let Some(kind) = infer::get(data) {
            if !kind.mime_type().starts_with("video/") {
                return Err(FileHandlerError::NotVideo(
                    filename,
                    kind.mime_type().to_string(),
                ));
            }
        }

        Ok(ValidatedUpload { filename, stem })
    }

    /// Check if a file has the accepted video extension.
    pub fn is_supported_video(filename: &str) -> bool {
        Path::new(filename)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case(ASSET_EXTENSION))
            .unwrap_or(false)
    }

    /// Write `data` to `path`, replacing any existing file.
    pub async fn write_file(&self, path: &Path, data: &[u8]) -> Result<(), FileHandlerError> {
        let mut file = fs::File::create(path)
            .await
            .map_err(|e| FileHandlerError::io(path, e))?;
        file.write_all(data)
            .await
            .map_err(|e| FileHandlerError::io(path, e))?;
        file.flush().await.map_err(|e| FileHandlerError::io(path, e))?;
        Ok(())
    }
}

/// Best-effort removal of `path` and of its parent directory once empty.
///
/// A missing file or a non-empty directory is not a failure.
pub async fn remove_file_and_empty_dir(path: &Path) -> Vec<CleanupWarning> {
    let mut warnings = Vec::new();

    match fs::remove_file(path).await {
        Ok(()) => debug!("Removed {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Nothing to remove at {:?}", path)
        }
        Err(e) => {
            warn!("Failed to remove {:?}: {}", path, e);
            warnings.push(CleanupWarning {
                path: path.to_path_buf(),
                message: format!("failed to remove file: {}", e),
            });
        }
    }

    let Some(dir) = path.parent() else {
        return warnings;
    };
    match is_empty_dir(dir).await {
        Ok(true) => {
            if let Err(e) = fs::remove_dir(dir).await {
                warn!("Failed to remove directory {:?}: {}", dir, e);
                warnings.push(CleanupWarning {
                    path: dir.to_path_buf(),
                    message: format!("failed to remove directory: {}", e),
                });
            }
        }
        Ok(false) => debug!("Keeping non-empty directory {:?}", dir),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            warn!("Failed to inspect directory {:?}: {}", dir, e);
            warnings.push(CleanupWarning {
                path: dir.to_path_buf(),
                message: format!("failed to inspect directory: {}", e),
            });
        }
    }

    warnings
}

async fn is_empty_dir(dir: &Path) -> std::io::Result<bool> {
    let mut entries = fs::read_dir(dir).await?;
    Ok(entries.next_entry().await?.is_none())
}

/// Sanitize a filename to prevent path traversal.
fn sanitize_filename(filename: &str) -> Result<String, FileHandlerError> {
    // Just the filename part, no path
    let name = Path::new(filename)
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| FileHandlerError::InvalidFilename(filename.to_string()))?;

    if name.contains('\0') || name.starts_with('.') {
        return Err(FileHandlerError::InvalidFilename(filename.to_string()));
    }

    let sanitized: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect();

    if sanitized.trim().is_empty() {
        return Err(FileHandlerError::InvalidFilename(filename.to_string()));
    }

    Ok(sanitized)
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX: u64 = 1024;

    #[test]
    fn test_is_supported_video() {
        assert!(FileHandler::is_supported_video("clip.mp4"));
        assert!(FileHandler::is_supported_video("clip.MP4"));
        assert!(FileHandler::is_supported_video("clip.Mp4"));
        assert!(!FileHandler::is_supported_video("clip.mov"));
        assert!(!FileHandler::is_supported_video("clip.mp4.exe"));
        assert!(!FileHandler::is_supported_video("clip"));
    }

    #[test]
    fn test_sanitize_filename() {
        assert_eq!(sanitize_filename("clip.mp4").unwrap(), "clip.mp4");
        assert_eq!(
            sanitize_filename("/path/to/clip.mp4").unwrap(),
            "clip.mp4"
        );
        assert_eq!(sanitize_filename("../clip.mp4").unwrap(), "clip.mp4");
        assert_eq!(sanitize_filename("a:b.mp4").unwrap(), "a_b.mp4");
        assert!(sanitize_filename(".hidden.mp4").is_err());
        assert!(sanitize_filename("..").is_err());
        assert!(sanitize_filename("").is_err());
    }

    #[test]
    fn validate_accepts_mp4_and_extracts_stem() {
        let handler = FileHandler::new(MAX);
        let upload = handler.validate_upload("Good Morning.MP4", b"raw").unwrap();
        assert_eq!(upload.filename, "Good Morning.MP4");
        assert_eq!(upload.stem, "Good Morning");
    }

    #[test]
    fn validate_rejects_bad_uploads() {
        let handler = FileHandler::new(MAX);
        assert!(matches!(
            handler.validate_upload("clip.avi", b"raw"),
            Err(FileHandlerError::UnsupportedFileType(_))
        ));
        assert!(matches!(
            handler.validate_upload(".mp4", b"raw"),
            Err(FileHandlerError::InvalidFilename(_))
        ));
        assert!(matches!(
            handler.validate_upload("clip.mp4", b""),
            Err(FileHandlerError::EmptyFile(_))
        ));
        assert!(matches!(
            handler.validate_upload("clip.mp4", &vec![0u8; MAX as usize + 1]),
            Err(FileHandlerError::FileTooLarge(1025, 1024))
        ));
    }

    #[test]
    fn validate_rejects_non_video_content() {
        let handler = FileHandler::new(MAX);
        let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
        assert!(matches!(
            handler.validate_upload("clip.mp4", &png),
            Err(FileHandlerError::NotVideo(_, _))
        ));
    }

    #[tokio::test]
    async fn remove_cleans_file_and_empty_dir() {
        let base = tempfile::tempdir().unwrap();
        let dir = base.path().join("hello");
        std::fs::create_dir_all(&dir).unwrap();
        let file = dir.join("hello.mp4");

        let handler = FileHandler::new(MAX);
        handler.write_file(&file, b"raw").await.unwrap();
        assert_eq!(std::fs::read(&file).unwrap(), b"raw");

        let warnings = remove_file_and_empty_dir(&file).await;
        assert!(warnings.is_empty());
        assert!(!dir.exists());

        // Already gone: still nothing to report
        assert!(remove_file_and_empty_dir(&file).await.is_empty());
    }

    #[tokio::test]
    async fn remove_keeps_non_empty_dir() {
        let base = tempfile::tempdir().unwrap();
        let dir = base.path().join("hello");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("hello.mp4"), b"raw").unwrap();
        std::fs::write(dir.join("hello_processed.mp4"), b"partial").unwrap();

        let warnings = remove_file_and_empty_dir(&dir.join("hello.mp4")).await;
        assert!(warnings.is_empty());
        assert!(dir.join("hello_processed.mp4").exists());
    }

    #[tokio::test]
    async fn remove_reports_failures() {
        let base = tempfile::tempdir().unwrap();
        // A directory where the file should be cannot be removed with remove_file
        let path = base.path().join("hello").join("hello.mp4");
        std::fs::create_dir_all(&path).unwrap();

        let warnings = remove_file_and_empty_dir(&path).await;
        assert_eq!(warnings.len(), 1);
        assert_eq!(warnings[0].path, path);
    }
}
