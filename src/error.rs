//! Error taxonomy for the detection pipeline
//!
//! Errors fall into three classes: startup-fatal (the checkpoint cannot be
//! served), request-scoped (one image fails), and remote-dependency (catalog
//! or results API).

use std::path::PathBuf;
use thiserror::Error;

/// Pipeline error
#[derive(Debug, Error)]
pub enum Error {
    /// Checkpoint directory does not exist
    #[error("checkpoint `{}` not found", .0.display())]
    CheckpointMissing(PathBuf),

    /// Checkpoint directory holds no restorable state
    #[error("no restorable checkpoint state in {}: {reason}", .path.display())]
    CheckpointState { path: PathBuf, reason: String },

    /// Model file does not match the configured digest
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Execution context could not be built
    #[error("failed to load model from {}: {source:#}", .path.display())]
    ModelLoad {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },

    #[error("image has zero area ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    /// Forward pass failed
    #[error("forward pass failed: {0:#}")]
    Forward(#[source] anyhow::Error),

    /// Score/geometry maps could not be decoded into boxes
    #[error("box decoding failed: {0}")]
    BoxDecode(String),

    /// Session directory already exists
    #[error("session directory already exists: {}", .0.display())]
    SessionCollision(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    /// Manifest could not be read or parsed
    #[error("manifest {}: {reason}", .path.display())]
    Manifest { path: PathBuf, reason: String },

    /// Catalog lookup failed
    #[error("catalog lookup for `{id}` failed: {reason}")]
    Catalog { id: String, reason: String },

    /// Image download failed
    #[error("download of {url} failed: {reason}")]
    Download { url: String, reason: String },

    /// Results API rejected or never received the report
    #[error("report for menu `{menu_id}` failed: {reason}")]
    Report { menu_id: String, reason: String },

    /// Worker thread panicked or was cancelled by the runtime
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("batch pass cancelled")]
    Cancelled,
}

impl Error {
    /// Whether this error means the service cannot serve until fixed
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            Error::CheckpointMissing(_)
                | Error::CheckpointState { .. }
                | Error::ChecksumMismatch { .. }
                | Error::ModelLoad { .. }
        )
    }

    /// Whether this error came from a remote dependency
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            Error::Catalog { .. } | Error::Download { .. } | Error::Report { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
