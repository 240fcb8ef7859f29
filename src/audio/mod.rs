//! Audio capture and playback backends
//!
//! This module provides:
//! - The backend traits the controllers drive
//! - Microphone capture to WAV files via PipeWire
//! - File playback with position tracking via PipeWire
//! - WAV encoding and decoding via hound

mod capture;
mod playback;
mod stream;
pub mod wav;

pub use capture::PipeWireCapture;
pub use playback::PipeWirePlayer;
pub use wav::CaptureFormat;

use crate::error::{CaptureError, PlaybackError};
use std::path::Path;

/// One open capture handle writing to a single output file
pub trait CaptureSession: Send + Sync + 'static {
    /// Stop feeding samples to the output file
    fn pause(&self) -> Result<(), CaptureError>;

    /// Resume feeding samples after a pause
    fn resume(&self) -> Result<(), CaptureError>;

    /// Peak level since the previous call, on the 16-bit scale
    fn max_amplitude(&self) -> u16;

    /// Stop capture, finalize the output file and release the device
    fn stop(&self) -> Result<(), CaptureError>;
}

/// Platform audio capture service
pub trait CaptureBackend: Send + Sync {
    type Session: CaptureSession;

    /// Whether sessions can pause and resume without closing the file
    fn supports_pause(&self) -> bool {
        true
    }

    /// Open the device and start writing to `path`
    fn start(&self, path: &Path, format: CaptureFormat) -> Result<Self::Session, CaptureError>;
}

/// Progress of a playback session as reported by the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionStatus {
    Playing,
    Finished,
    Failed(String),
}

/// One decoded file bound to an output stream
pub trait PlaybackSession: Send + Sync + 'static {
    fn duration_ms(&self) -> u64;

    fn position_ms(&self) -> u64;

    /// Begin output from the current position
    fn start(&self) -> Result<(), PlaybackError>;

    fn seek_to(&self, position_ms: u64);

    fn is_playing(&self) -> bool;

    fn status(&self) -> SessionStatus;

    /// Halt output and free the stream; safe to call more than once
    fn release(&self);
}

/// Platform decode/output service
pub trait PlaybackBackend: Send + Sync + 'static {
    type Session: PlaybackSession;

    /// Decode `path` and bind it to an output stream without starting it
    ///
    /// May block; the controller calls it off the control thread.
    fn prepare(&self, path: &Path) -> Result<Self::Session, PlaybackError>;
}
