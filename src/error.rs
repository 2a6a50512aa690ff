//! Error types for the batch and for individual assets

use std::path::PathBuf;
use thiserror::Error;

/// Failure of a single image reference. Never aborts the batch.
#[derive(Debug, Error)]
pub enum AssetError {
    #[error("Invalid image URL: {0}")]
    InvalidUrl(String),
    #[error("Failed to execute HTTP request: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Failed to download image: {0}")]
    Status(reqwest::StatusCode),
    #[error("File size mismatch: expected {expected} bytes, got {actual} bytes")]
    SizeMismatch { expected: u64, actual: u64 },
    #[error("Failed to save image to file: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure that stops the whole batch before any output is written.
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("Failed to load source table: {0:#}")]
    Source(anyhow::Error),
    #[error("No data in CSV")]
    NoData,
    #[error("Missing required column: {0}")]
    MissingColumn(&'static str),
    #[error("Failed to create image directory {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to write output file: {0:#}")]
    Output(anyhow::Error),
}
