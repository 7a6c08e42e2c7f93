//! Ingestion pipeline: upload validation, on-disk layout, background
//! transcoding and the orchestrator tying them together.

pub mod converter;
mod file_handler;
mod layout;
mod manager;
mod queue;
mod worker;

pub use converter::{
    parse_probe_output, FfmpegTranscoder, FfprobeProber, MediaInfo, MediaProber, TranscodeError,
    TranscodeProfile, Transcoder,
};
pub use file_handler::{
    remove_file_and_empty_dir, CleanupWarning, FileHandler, FileHandlerError, ValidatedUpload,
};
pub use layout::{StorageLayout, PROCESSED_SUFFIX};
pub use manager::{
    IngestOptions, IngestReceipt, IngestRequest, IngestStatus, IngestionManager, ResumeReport,
};
pub use queue::TranscodeQueue;
pub use worker::{TranscodeOutcome, TranscodeTask, TranscodeWorker};

#[cfg(feature = "mock")]
pub use converter::{MockMediaProber, MockTranscoder};
