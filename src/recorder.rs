//! Recorder controller
//!
//! Owns at most one capture session and publishes its status and a 10Hz
//! amplitude signal through watch channels.

use crate::audio::{CaptureBackend, CaptureFormat, CaptureSession};
use crate::models::RecordingState;
use log::{debug, error, info, warn};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Interval between amplitude samples
pub const AMPLITUDE_INTERVAL: Duration = Duration::from_millis(100);

/// File name prefix for new recordings
pub const RECORDING_PREFIX: &str = "REC_";

/// Extension for new recordings
pub const RECORDING_EXTENSION: &str = "wav";

/// An open capture handle together with the file it writes
struct ActiveCapture<S> {
    handle: Arc<S>,
    path: PathBuf,
}

/// Recorder session state machine
enum Session<S> {
    Idle,
    Active(ActiveCapture<S>),
    Paused(ActiveCapture<S>),
}

impl<S> Session<S> {
    fn state(&self) -> RecordingState {
        match self {
            Session::Idle => RecordingState::NotRecording,
            Session::Active(_) => RecordingState::Recording,
            Session::Paused(_) => RecordingState::Paused,
        }
    }

    fn capture(&self) -> Option<&ActiveCapture<S>> {
        match self {
            Session::Idle => None,
            Session::Active(capture) | Session::Paused(capture) => Some(capture),
        }
    }
}

/// Result of a pause request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PauseOutcome {
    Paused,
    /// The backend cannot pause, so the recording was finished instead
    Stopped(Option<PathBuf>),
    /// Not recording, or the backend refused
    Ignored,
}

/// Controller for a single microphone recording at a time
pub struct VoiceRecorder<B: CaptureBackend> {
    backend: B,
    runtime: Handle,
    recordings_dir: PathBuf,
    format: CaptureFormat,
    session: Session<B::Session>,
    state_tx: watch::Sender<RecordingState>,
    amplitude_tx: Arc<watch::Sender<u16>>,
    amplitude_job: Option<JoinHandle<()>>,
}

impl<B: CaptureBackend> VoiceRecorder<B> {
    /// Create a recorder writing into `recordings_dir`
    ///
    /// The amplitude sampler is spawned on `runtime`.
    pub fn new(backend: B, runtime: Handle, recordings_dir: impl AsRef<Path>) -> Self {
        let (state_tx, _) = watch::channel(RecordingState::NotRecording);
        let (amplitude_tx, _) = watch::channel(0u16);

        Self {
            backend,
            runtime,
            recordings_dir: recordings_dir.as_ref().to_path_buf(),
            format: CaptureFormat::VOICE_MEMO,
            session: Session::Idle,
            state_tx,
            amplitude_tx: Arc::new(amplitude_tx),
            amplitude_job: None,
        }
    }

    pub fn state(&self) -> RecordingState {
        *self.state_tx.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RecordingState> {
        self.state_tx.subscribe()
    }

    /// Latest amplitude sample (0..=32767)
    pub fn amplitude(&self) -> u16 {
        *self.amplitude_tx.borrow()
    }

    pub fn subscribe_amplitude(&self) -> watch::Receiver<u16> {
        self.amplitude_tx.subscribe()
    }

    /// Path of the file being written, if a session is open
    pub fn current_path(&self) -> Option<&Path> {
        self.session.capture().map(|c| c.path.as_path())
    }

    /// Start a new recording
    ///
    /// Any open session is finished first. Returns the output path, or `None`
    /// if the capture session could not be prepared.
    pub fn start(&mut self) -> Option<PathBuf> {
        if !matches!(self.session, Session::Idle) {
            debug!("Finishing open session before starting a new one");
            self.stop();
        }

        if let Err(e) = fs::create_dir_all(&self.recordings_dir) {
            error!(
                "Failed to create recordings directory {:?}: {}",
                self.recordings_dir, e
            );
            self.stop();
            return None;
        }

        let path = self.next_output_path();
        match self.backend.start(&path, self.format) {
            Ok(handle) => {
                let handle = Arc::new(handle);
                self.session = Session::Active(ActiveCapture {
                    handle: handle.clone(),
                    path: path.clone(),
                });
                self.publish_state();
                self.spawn_amplitude_sampler(handle);
                info!("Recording started: {:?}", path);
                Some(path)
            }
            Err(e) => {
                error!("Failed to start recording: {}", e);
                self.stop();
                None
            }
        }
    }

    /// Pause an active recording
    pub fn pause(&mut self) -> PauseOutcome {
        let Session::Active(capture) = &self.session else {
            debug!("Ignoring pause while {}", self.state());
            return PauseOutcome::Ignored;
        };

        if !self.backend.supports_pause() {
            warn!("Pause not supported by the capture backend, stopping recording");
            return PauseOutcome::Stopped(self.stop());
        }

        if let Err(e) = capture.handle.pause() {
            error!("Failed to pause recording: {}", e);
            return PauseOutcome::Ignored;
        }

        self.transition(|session| match session {
            Session::Active(capture) => Session::Paused(capture),
            other => other,
        });
        self.amplitude_tx.send_replace(0);
        info!("Recording paused");
        PauseOutcome::Paused
    }

    /// Resume a paused recording
    ///
    /// Returns whether the recorder is capturing again.
    pub fn resume(&mut self) -> bool {
        let Session::Paused(capture) = &self.session else {
            debug!("Ignoring resume while {}", self.state());
            return false;
        };

        if !self.backend.supports_pause() {
            warn!("Resume not supported by the capture backend");
            return false;
        }

        if let Err(e) = capture.handle.resume() {
            error!("Failed to resume recording: {}", e);
            return false;
        }

        self.transition(|session| match session {
            Session::Paused(capture) => Session::Active(capture),
            other => other,
        });
        info!("Recording resumed");
        true
    }

    /// Finish the recording and release the capture device
    ///
    /// Returns the path of the finished file. Calling this with no open
    /// session only resets the published amplitude.
    pub fn stop(&mut self) -> Option<PathBuf> {
        if let Some(job) = self.amplitude_job.take() {
            job.abort();
        }

        let finished = match std::mem::replace(&mut self.session, Session::Idle) {
            Session::Active(capture) | Session::Paused(capture) => {
                match capture.handle.stop() {
                    Ok(()) => info!("Recording stopped: {:?}", capture.path),
                    Err(e) => error!("Failed to finalize recording {:?}: {}", capture.path, e),
                }
                Some(capture.path)
            }
            Session::Idle => None,
        };

        // State first, so a late sampler tick reads NotRecording and publishes zero
        self.publish_state();
        self.amplitude_tx.send_replace(0);
        finished
    }

    fn transition(&mut self, f: impl FnOnce(Session<B::Session>) -> Session<B::Session>) {
        let session = std::mem::replace(&mut self.session, Session::Idle);
        self.session = f(session);
        self.publish_state();
    }

    fn publish_state(&self) {
        self.state_tx.send_replace(self.session.state());
    }

    /// `REC_<epoch-millis>.wav`, bumped forward if that name is taken
    fn next_output_path(&self) -> PathBuf {
        let mut millis = chrono::Utc::now().timestamp_millis();
        loop {
            let path = self.recordings_dir.join(format!(
                "{}{}.{}",
                RECORDING_PREFIX, millis, RECORDING_EXTENSION
            ));
            if !path.exists() {
                return path;
            }
            millis += 1;
        }
    }

    fn spawn_amplitude_sampler(&mut self, handle: Arc<B::Session>) {
        let state_rx = self.state_tx.subscribe();
        let amplitude_tx = self.amplitude_tx.clone();

        self.amplitude_job = Some(self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(AMPLITUDE_INTERVAL);
            loop {
                ticker.tick().await;
                let level = handle.max_amplitude();
                amplitude_tx.send_if_modified(|current| {
                    let next = if *state_rx.borrow() == RecordingState::Recording {
                        level
                    } else {
                        0
                    };
                    let changed = *current != next;
                    *current = next;
                    changed
                });
            }
        }));
    }
}

impl<B: CaptureBackend> Drop for VoiceRecorder<B> {
    fn drop(&mut self) {
        if !matches!(self.session, Session::Idle) {
            self.stop();
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::catalog::RecordingCatalog;
    use crate::error::CaptureError;
    use chrono::{DateTime, Utc};
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::SystemTime;
    use std::sync::Mutex;

    /// Capture backend that writes a placeholder file and records calls
    #[derive(Clone, Default)]
    pub(crate) struct FakeCapture {
        pub fail_start: bool,
        pub fail_pause: bool,
        pub no_pause: bool,
        pub level: u16,
        pub calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeCapture {
        pub(crate) fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    pub(crate) struct FakeCaptureSession {
        backend: FakeCapture,
        path: PathBuf,
        stopped: AtomicBool,
    }

    impl CaptureBackend for FakeCapture {
        type Session = FakeCaptureSession;

        fn supports_pause(&self) -> bool {
            !self.no_pause
        }

        fn start(
            &self,
            path: &Path,
            _format: CaptureFormat,
        ) -> Result<Self::Session, CaptureError> {
            self.calls.lock().unwrap().push("start".to_string());
            if self.fail_start {
                return Err(CaptureError::Backend("device busy".to_string()));
            }
            fs::write(path, b"RIFF").unwrap();
            Ok(FakeCaptureSession {
                backend: self.clone(),
                path: path.to_path_buf(),
                stopped: AtomicBool::new(false),
            })
        }
    }

    impl CaptureSession for FakeCaptureSession {
        fn pause(&self) -> Result<(), CaptureError> {
            self.backend.calls.lock().unwrap().push("pause".to_string());
            if self.backend.fail_pause {
                return Err(CaptureError::IllegalState("pause"));
            }
            Ok(())
        }

        fn resume(&self) -> Result<(), CaptureError> {
            self.backend.calls.lock().unwrap().push("resume".to_string());
            Ok(())
        }

        fn max_amplitude(&self) -> u16 {
            self.backend.level
        }

        fn stop(&self) -> Result<(), CaptureError> {
            assert!(!self.stopped.swap(true, Ordering::SeqCst), "stopped twice");
            self.backend.calls.lock().unwrap().push("stop".to_string());
            // Finalizing rewrites the header, like the real sink
            if let Ok(mut file) = fs::OpenOptions::new().write(true).open(&self.path) {
                file.write_all(b"RIFF").unwrap();
            }
            Ok(())
        }
    }

    #[derive(Clone, Copy, Debug)]
    enum Op {
        Start,
        Pause,
        Resume,
        Stop,
    }

    fn expected(state: RecordingState, op: Op) -> RecordingState {
        match (state, op) {
            (_, Op::Start) => RecordingState::Recording,
            (RecordingState::Recording, Op::Pause) => RecordingState::Paused,
            (RecordingState::Paused, Op::Resume) => RecordingState::Recording,
            (_, Op::Stop) => RecordingState::NotRecording,
            (state, _) => state,
        }
    }

    fn apply(recorder: &mut VoiceRecorder<FakeCapture>, op: Op) {
        match op {
            Op::Start => {
                recorder.start();
            }
            Op::Pause => {
                recorder.pause();
            }
            Op::Resume => {
                recorder.resume();
            }
            Op::Stop => {
                recorder.stop();
            }
        }
    }

    #[tokio::test]
    async fn test_start_creates_timestamped_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut recorder =
            VoiceRecorder::new(FakeCapture::default(), Handle::current(), dir.path().join("memos"));

        let path = recorder.start().expect("recording should start");
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("REC_"));
        assert!(name.ends_with(".wav"));
        assert!(path.exists());
        assert_eq!(recorder.state(), RecordingState::Recording);
        assert_eq!(recorder.current_path(), Some(path.as_path()));
    }

    #[tokio::test]
    async fn test_stopped_recording_is_newest_in_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let hour_ago = SystemTime::now() - Duration::from_secs(3600);
        for name in ["REC_100.wav", "Groceries.wav"] {
            let older = dir.path().join(name);
            fs::write(&older, b"RIFF").unwrap();
            fs::File::options()
                .write(true)
                .open(&older)
                .unwrap()
                .set_modified(hour_ago)
                .unwrap();
        }
        let mut recorder =
            VoiceRecorder::new(FakeCapture::default(), Handle::current(), dir.path());

        let path = recorder.start().unwrap();
        // The session began five seconds before it is stopped
        let created = SystemTime::now() - Duration::from_millis(5000);
        fs::File::options()
            .write(true)
            .open(&path)
            .unwrap()
            .set_modified(created)
            .unwrap();
        assert_eq!(recorder.stop(), Some(path.clone()));

        let recordings = RecordingCatalog::new(dir.path()).refresh().unwrap();
        assert_eq!(recordings.len(), 3);
        assert_eq!(recordings[0].path, path);
        let created: DateTime<Utc> = created.into();
        assert!((recordings[0].modified - created).num_milliseconds() >= 5000);
    }

    #[tokio::test]
    async fn test_transitions_follow_legal_edges_only() {
        let ops = [Op::Start, Op::Pause, Op::Resume, Op::Stop];
        let dir = tempfile::tempdir().unwrap();

        for a in ops {
            for b in ops {
                for c in ops {
                    for d in ops {
                        let mut recorder = VoiceRecorder::new(
                            FakeCapture::default(),
                            Handle::current(),
                            dir.path(),
                        );
                        let state_rx = recorder.subscribe_state();
                        let mut model = RecordingState::NotRecording;

                        for op in [a, b, c, d] {
                            apply(&mut recorder, op);
                            model = expected(model, op);
                            assert_eq!(
                                recorder.state(),
                                model,
                                "after {:?} in {:?}",
                                op,
                                [a, b, c, d]
                            );
                            assert_eq!(*state_rx.borrow(), model);
                        }
                    }
                }
            }
        }
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeCapture::default();
        let mut recorder = VoiceRecorder::new(backend.clone(), Handle::current(), dir.path());

        let path = recorder.start();
        assert_eq!(recorder.stop(), path);
        assert_eq!(recorder.stop(), None);
        assert_eq!(recorder.stop(), None);

        assert_eq!(recorder.state(), RecordingState::NotRecording);
        assert_eq!(recorder.amplitude(), 0);
        assert_eq!(recorder.current_path(), None);
        assert_eq!(backend.calls(), vec!["start", "stop"]);
    }

    #[tokio::test]
    async fn test_start_while_recording_resets_silently() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeCapture::default();
        let mut recorder = VoiceRecorder::new(backend.clone(), Handle::current(), dir.path());

        let first = recorder.start().unwrap();
        recorder.pause();
        let second = recorder.start().unwrap();

        assert_ne!(first, second);
        assert_eq!(recorder.state(), RecordingState::Recording);
        assert_eq!(backend.calls(), vec!["start", "pause", "stop", "start"]);
    }

    #[tokio::test]
    async fn test_failed_start_returns_none() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeCapture {
            fail_start: true,
            ..Default::default()
        };
        let mut recorder = VoiceRecorder::new(backend, Handle::current(), dir.path());

        assert_eq!(recorder.start(), None);
        assert_eq!(recorder.state(), RecordingState::NotRecording);
        assert_eq!(recorder.current_path(), None);
    }

    #[tokio::test]
    async fn test_pause_without_backend_support_stops() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeCapture {
            no_pause: true,
            ..Default::default()
        };
        let mut recorder = VoiceRecorder::new(backend, Handle::current(), dir.path());

        let path = recorder.start();
        assert_eq!(recorder.pause(), PauseOutcome::Stopped(path));
        assert_eq!(recorder.state(), RecordingState::NotRecording);
    }

    #[tokio::test]
    async fn test_backend_pause_error_keeps_recording() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeCapture {
            fail_pause: true,
            ..Default::default()
        };
        let mut recorder = VoiceRecorder::new(backend, Handle::current(), dir.path());

        recorder.start();
        assert_eq!(recorder.pause(), PauseOutcome::Ignored);
        assert_eq!(recorder.state(), RecordingState::Recording);
    }

    #[tokio::test(start_paused = true)]
    async fn test_amplitude_sampled_only_while_recording() {
        let dir = tempfile::tempdir().unwrap();
        let backend = FakeCapture {
            level: 1200,
            ..Default::default()
        };
        let mut recorder = VoiceRecorder::new(backend, Handle::current(), dir.path());

        recorder.start();
        tokio::time::sleep(AMPLITUDE_INTERVAL * 2).await;
        assert_eq!(recorder.amplitude(), 1200);

        recorder.pause();
        assert_eq!(recorder.amplitude(), 0);
        tokio::time::sleep(AMPLITUDE_INTERVAL * 3).await;
        assert_eq!(recorder.amplitude(), 0);

        recorder.resume();
        tokio::time::sleep(AMPLITUDE_INTERVAL * 2).await;
        assert_eq!(recorder.amplitude(), 1200);

        recorder.stop();
        tokio::time::sleep(AMPLITUDE_INTERVAL * 2).await;
        assert_eq!(recorder.amplitude(), 0);
    }
}
