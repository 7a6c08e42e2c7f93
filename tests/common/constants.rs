//! Shared constants for end-to-end tests

/// Raw clip content. Plain text so content sniffing finds no known format.
pub const CLIP_BYTES: &[u8] = b"raw sign clip: hello";

/// Appended to the raw bytes by the fake transcoder.
pub const NORMALIZED_SUFFIX: &[u8] = b"|normalized";

/// Duration the fake prober reports by default.
pub const DEFAULT_DURATION: f64 = 2.5;

/// Upload limit used by the default test environment.
pub const MAX_UPLOAD_BYTES: u64 = 64 * 1024;

/// Size of a clip after the fake transcoder ran.
#[allow(dead_code)]
pub fn normalized_len(raw: &[u8]) -> i64 {
    (raw.len() + NORMALIZED_SUFFIX.len()) as i64
}
