use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A recording as found on disk
///
/// Rebuilt from file metadata on every catalog refresh; the path is its only identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Recording {
    pub name: String,
    pub path: PathBuf,
    pub size_bytes: u64,
    pub modified: DateTime<Utc>,
}

/// Status of the recorder controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RecordingState {
    #[default]
    NotRecording,
    /// Actively capturing
    Recording,
    Paused,
}

impl fmt::Display for RecordingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecordingState::NotRecording => "idle",
            RecordingState::Recording => "recording",
            RecordingState::Paused => "paused",
        };
        f.write_str(label)
    }
}

/// Why a playback session ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    /// Reached the end of the media
    Finished,
    /// Stopped or superseded by the caller
    Stopped,
    Failed(String),
}

/// Payload of the playback completion notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackEnd {
    pub path: PathBuf,
    pub reason: EndReason,
}

/// Format milliseconds as `HH:MM:SS` (recording timer)
pub fn format_elapsed(millis: u64) -> String {
    let total_seconds = millis / 1000;
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
}

/// Format milliseconds as `MM:SS` (playback position)
pub fn format_position(millis: u64) -> String {
    let total_seconds = millis / 1000;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{:02}:{:02}", minutes, seconds)
}

/// Human readable file size with at most two decimals, e.g. `1.5 KB`
pub fn format_file_size(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    if bytes == 0 {
        return "0 B".to_string();
    }

    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }

    let formatted = format!("{:.2}", value);
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{} {}", trimmed, UNITS[unit])
}

/// Format a timestamp in local time as `Mon DD, HH:MM:SS`
pub fn format_date_time(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%b %d, %H:%M:%S")
        .to_string()
}
