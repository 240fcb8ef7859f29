//! Error types
//!
//! Backend failures are caught by the controllers and turned into a reset to
//! the idle state. Catalog failures are handed back to the caller for display.

use std::path::PathBuf;
use thiserror::Error;

/// Failure while opening, driving or finalizing a capture session
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Failed to create output file {path:?}: {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("WAV encoding failed: {0}")]
    Encode(#[from] hound::Error),

    #[error("Audio backend error: {0}")]
    Backend(String),

    #[error("Capture session is not in a state that allows {0}")]
    IllegalState(&'static str),
}

/// Failure while preparing or driving a playback session
#[derive(Error, Debug)]
pub enum PlaybackError {
    #[error("File not found: {0:?}")]
    NotFound(PathBuf),

    #[error("Failed to decode {path:?}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },

    #[error("Audio backend error: {0}")]
    Backend(String),
}

/// Failure of a catalog file operation
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("File name cannot be empty")]
    BlankName,

    #[error("Recording not found: {0}")]
    NotFound(String),

    #[error("A file with that name already exists: {0}")]
    AlreadyExists(String),

    #[error("Still recording to {0}; stop the recording first")]
    RecordingInProgress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
