//! Common test infrastructure
//!
//! Every test gets an isolated environment: its own temp directory, a file
//! backed asset database and a transcode pool driven by fake ffmpeg/ffprobe
//! implementations. Tests should only import from this module.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::{TestEnv, CLIP_BYTES};
//!
//! #[tokio::test]
//! async fn test_ingest() {
//!     let env = TestEnv::spawn();
//!     let receipt = env.ingest("hello.mp4", "male", CLIP_BYTES).await.unwrap();
//!     env.settle().await;
//!     assert!(env.asset(receipt.asset_id).is_active);
//! }
//! ```

mod constants;
mod env;
mod fakes;

pub use constants::*;
pub use env::{TestEnv, TestEnvOptions};
#[allow(unused_imports)]
pub use fakes::{FakeProber, FakeTranscoder, TranscoderMode};
