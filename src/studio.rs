//! Coordinating layer over the recorder, the player and the catalog
//!
//! The controllers never look at each other; whether recording and playback
//! may overlap is decided here.

use crate::audio::{CaptureBackend, PlaybackBackend};
use crate::catalog::RecordingCatalog;
use crate::error::CatalogError;
use crate::models::{PlaybackEnd, Recording, RecordingState};
use crate::playback::VoicePlayback;
use crate::recorder::{PauseOutcome, VoiceRecorder};
use log::info;
use std::path::{Path, PathBuf};
use tokio::runtime::Handle;

/// Whether recording and playback may run at the same time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AudioPolicy {
    /// Starting one side stops the other
    #[default]
    Exclusive,
    Overlap,
}

impl AudioPolicy {
    pub fn from_allow_overlap(allow_overlap: bool) -> Self {
        if allow_overlap {
            AudioPolicy::Overlap
        } else {
            AudioPolicy::Exclusive
        }
    }
}

/// Outcome of a playback toggle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Started {
        /// Recording that had to be finished first
        stopped_recording: Option<PathBuf>,
    },
    Stopped,
}

/// Owns one recorder, one player and the catalog they share
pub struct Studio<C: CaptureBackend, P: PlaybackBackend> {
    recorder: VoiceRecorder<C>,
    player: VoicePlayback<P>,
    catalog: RecordingCatalog,
    policy: AudioPolicy,
}

impl<C: CaptureBackend, P: PlaybackBackend> Studio<C, P> {
    pub fn new(
        capture: C,
        playback: P,
        runtime: Handle,
        recordings_dir: impl AsRef<Path>,
        policy: AudioPolicy,
    ) -> Self {
        let dir = recordings_dir.as_ref();
        Self {
            recorder: VoiceRecorder::new(capture, runtime.clone(), dir),
            player: VoicePlayback::new(playback, runtime),
            catalog: RecordingCatalog::new(dir),
            policy,
        }
    }

    pub fn recorder(&self) -> &VoiceRecorder<C> {
        &self.recorder
    }

    pub fn player(&self) -> &VoicePlayback<P> {
        &self.player
    }

    pub fn catalog(&self) -> &RecordingCatalog {
        &self.catalog
    }

    pub fn policy(&self) -> AudioPolicy {
        self.policy
    }

    pub fn on_playback_complete(&self, listener: impl Fn(PlaybackEnd) + Send + Sync + 'static) {
        self.player.set_completion_listener(listener);
    }

    fn yield_playback(&self) {
        if self.policy == AudioPolicy::Exclusive && self.player.is_active() {
            info!("Stopping playback to record");
            self.player.stop_playback();
        }
    }

    pub fn start_recording(&mut self) -> Option<PathBuf> {
        self.yield_playback();
        self.recorder.start()
    }

    pub fn pause_recording(&mut self) -> PauseOutcome {
        self.recorder.pause()
    }

    pub fn resume_recording(&mut self) -> bool {
        if self.recorder.state() == RecordingState::Paused {
            self.yield_playback();
        }
        self.recorder.resume()
    }

    pub fn stop_recording(&mut self) -> Option<PathBuf> {
        self.recorder.stop()
    }

    /// Stop `path` if it is the active playback, otherwise play it
    pub fn toggle_playback(&mut self, path: &Path) -> ToggleOutcome {
        if self.player.current_path().as_deref() == Some(path) {
            self.player.stop_playback();
            return ToggleOutcome::Stopped;
        }

        let mut stopped_recording = None;
        if self.policy == AudioPolicy::Exclusive
            && self.recorder.state() != RecordingState::NotRecording
        {
            info!("Stopping recording to play audio");
            stopped_recording = self.recorder.stop();
        }

        self.player.start_playback(path);
        ToggleOutcome::Started { stopped_recording }
    }

    pub fn stop_playback(&self) {
        self.player.stop_playback();
    }

    pub fn seek_to(&self, position_ms: u64) {
        self.player.seek_to(position_ms);
    }

    /// Refresh the catalog
    pub fn recordings(&self) -> Result<Vec<Recording>, CatalogError> {
        self.catalog.refresh()
    }

    /// Rename a recording, stopping its playback first
    ///
    /// The file being recorded is refused.
    pub fn rename(&self, recording: &Recording, new_name: &str) -> Result<Recording, CatalogError> {
        self.release_file(recording)?;
        self.catalog.rename(recording, new_name)
    }

    /// Delete a recording, stopping its playback first
    ///
    /// The file being recorded is refused.
    pub fn delete(&self, recording: &Recording) -> Result<(), CatalogError> {
        self.release_file(recording)?;
        self.catalog.delete(recording)
    }

    fn release_file(&self, recording: &Recording) -> Result<(), CatalogError> {
        if self.recorder.current_path() == Some(recording.path.as_path()) {
            return Err(CatalogError::RecordingInProgress(recording.name.clone()));
        }
        if self.player.current_path().as_deref() == Some(recording.path.as_path()) {
            self.player.stop_playback();
        }
        Ok(())
    }

    /// Stop both controllers
    pub fn shutdown(&mut self) {
        self.player.stop_playback();
        self.recorder.stop();
    }
}
