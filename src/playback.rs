//! Playback controller
//!
//! Owns at most one playback session. Preparation runs off the control
//! thread; a generation counter makes superseded preparations inert, so only
//! the newest request ever publishes position and duration.

use crate::audio::{PlaybackBackend, PlaybackSession, SessionStatus};
use crate::error::PlaybackError;
use crate::models::{EndReason, PlaybackEnd};
use log::{debug, error, info};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Interval between position samples
pub const POSITION_INTERVAL: Duration = Duration::from_millis(50);

/// Callback fired once for every playback session that ends
pub type CompletionListener = Arc<dyn Fn(PlaybackEnd) + Send + Sync>;

enum Slot<S> {
    Idle,
    Preparing { path: PathBuf },
    Playing { path: PathBuf, session: Arc<S> },
}

struct PlayerInner<S> {
    /// Bumped on every start and teardown; a preparation applies only if it still matches
    generation: u64,
    slot: Slot<S>,
    progress_job: Option<JoinHandle<()>>,
}

struct Shared<S> {
    inner: Mutex<PlayerInner<S>>,
    position_tx: watch::Sender<u64>,
    duration_tx: watch::Sender<u64>,
    listener: Mutex<Option<CompletionListener>>,
}

impl<S: PlaybackSession> Shared<S> {
    fn lock(&self) -> MutexGuard<'_, PlayerInner<S>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Release whatever the slot holds and zero the published progress
    ///
    /// Returns the end event for the session that was torn down, if any.
    fn teardown(&self, inner: &mut PlayerInner<S>, reason: EndReason) -> Option<PlaybackEnd> {
        inner.generation += 1;
        if let Some(job) = inner.progress_job.take() {
            job.abort();
        }

        let path = match std::mem::replace(&mut inner.slot, Slot::Idle) {
            Slot::Idle => None,
            Slot::Preparing { path } => Some(path),
            Slot::Playing { path, session } => {
                session.release();
                Some(path)
            }
        };

        self.position_tx.send_replace(0);
        self.duration_tx.send_replace(0);
        path.map(|path| PlaybackEnd { path, reason })
    }

    fn notify(&self, end: PlaybackEnd) {
        let listener = self
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(listener) = listener {
            listener(end);
        }
    }
}

/// Controller for playing one recording at a time
pub struct VoicePlayback<B: PlaybackBackend> {
    backend: Arc<B>,
    runtime: Handle,
    shared: Arc<Shared<B::Session>>,
}

impl<B: PlaybackBackend> VoicePlayback<B> {
    pub fn new(backend: B, runtime: Handle) -> Self {
        let (position_tx, _) = watch::channel(0u64);
        let (duration_tx, _) = watch::channel(0u64);

        Self {
            backend: Arc::new(backend),
            runtime,
            shared: Arc::new(Shared {
                inner: Mutex::new(PlayerInner {
                    generation: 0,
                    slot: Slot::Idle,
                    progress_job: None,
                }),
                position_tx,
                duration_tx,
                listener: Mutex::new(None),
            }),
        }
    }

    /// Register the callback fired when a session ends for any reason
    pub fn set_completion_listener(&self, listener: impl Fn(PlaybackEnd) + Send + Sync + 'static) {
        *self
            .shared
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
    }

    /// Current position in milliseconds
    pub fn position(&self) -> u64 {
        *self.shared.position_tx.borrow()
    }

    pub fn subscribe_position(&self) -> watch::Receiver<u64> {
        self.shared.position_tx.subscribe()
    }

    /// Duration of the playing recording in milliseconds, zero when stopped
    pub fn duration(&self) -> u64 {
        *self.shared.duration_tx.borrow()
    }

    pub fn subscribe_duration(&self) -> watch::Receiver<u64> {
        self.shared.duration_tx.subscribe()
    }

    pub fn is_playing(&self) -> bool {
        match &self.shared.lock().slot {
            Slot::Playing { session, .. } => session.is_playing(),
            _ => false,
        }
    }

    pub fn is_playing_path(&self, path: &Path) -> bool {
        match &self.shared.lock().slot {
            Slot::Playing {
                path: playing,
                session,
            } => playing == path && session.is_playing(),
            _ => false,
        }
    }

    /// Whether a session is preparing or playing
    pub fn is_active(&self) -> bool {
        !matches!(self.shared.lock().slot, Slot::Idle)
    }

    /// Path of the preparing or playing recording
    pub fn current_path(&self) -> Option<PathBuf> {
        match &self.shared.lock().slot {
            Slot::Idle => None,
            Slot::Preparing { path } | Slot::Playing { path, .. } => Some(path.clone()),
        }
    }

    /// Play `path` from the start, stopping any current session first
    ///
    /// Returns immediately; playback begins once the file is decoded.
    pub fn start_playback(&self, path: impl AsRef<Path>) {
        self.stop_playback();

        let path = path.as_ref().to_path_buf();
        let generation = {
            let mut inner = self.shared.lock();
            inner.generation += 1;
            inner.slot = Slot::Preparing { path: path.clone() };
            inner.generation
        };
        debug!("Preparing playback of {:?}", path);

        let backend = self.backend.clone();
        let shared = self.shared.clone();
        let runtime = self.runtime.clone();

        self.runtime.spawn(async move {
            let prepare_path = path.clone();
            let prepared = tokio::task::spawn_blocking(move || backend.prepare(&prepare_path))
                .await
                .unwrap_or_else(|e| {
                    Err(PlaybackError::Backend(format!(
                        "Preparation task failed: {}",
                        e
                    )))
                });
            finish_prepare(&shared, &runtime, generation, path, prepared);
        });
    }

    /// Stop playback and release the session
    ///
    /// Fires the completion listener if a session was preparing or playing.
    pub fn stop_playback(&self) {
        let end = {
            let mut inner = self.shared.lock();
            self.shared.teardown(&mut inner, EndReason::Stopped)
        };

        if let Some(end) = end {
            info!("Playback stopped: {:?}", end.path);
            self.shared.notify(end);
        }
    }

    /// Seek the active session and publish the new position immediately
    pub fn seek_to(&self, position_ms: u64) {
        let inner = self.shared.lock();
        let Slot::Playing { session, .. } = &inner.slot else {
            debug!("Ignoring seek with no active playback");
            return;
        };

        let target = position_ms.min(session.duration_ms());
        session.seek_to(target);
        self.shared.position_tx.send_replace(target);
    }
}

impl<B: PlaybackBackend> Drop for VoicePlayback<B> {
    fn drop(&mut self) {
        self.stop_playback();
    }
}

/// Apply the result of a preparation if it is still the current request
fn finish_prepare<S: PlaybackSession>(
    shared: &Arc<Shared<S>>,
    runtime: &Handle,
    generation: u64,
    path: PathBuf,
    prepared: Result<S, PlaybackError>,
) {
    let mut inner = shared.lock();
    if inner.generation != generation || !matches!(inner.slot, Slot::Preparing { .. }) {
        drop(inner);
        debug!("Discarding stale preparation of {:?}", path);
        if let Ok(session) = prepared {
            session.release();
        }
        return;
    }

    let started = prepared.and_then(|session| match session.start() {
        Ok(()) => Ok(session),
        Err(e) => {
            session.release();
            Err(e)
        }
    });

    match started {
        Ok(session) => {
            let session = Arc::new(session);
            shared.duration_tx.send_replace(session.duration_ms());
            shared.position_tx.send_replace(session.position_ms());
            inner.slot = Slot::Playing {
                path: path.clone(),
                session,
            };
            inner.progress_job = Some(runtime.spawn(track_progress(shared.clone(), generation)));
            info!("Playback started: {:?}", path);
        }
        Err(e) => {
            error!("Failed to start playback of {:?}: {}", path, e);
            let end = shared.teardown(&mut inner, EndReason::Failed(e.to_string()));
            drop(inner);
            if let Some(end) = end {
                shared.notify(end);
            }
        }
    }
}

/// Publish the position every tick until the session ends or is replaced
async fn track_progress<S: PlaybackSession>(shared: Arc<Shared<S>>, generation: u64) {
    let mut ticker = tokio::time::interval(POSITION_INTERVAL);
    loop {
        ticker.tick().await;
        if !sample_progress(&shared, generation) {
            break;
        }
    }
}

/// One progress tick; returns whether to keep sampling
fn sample_progress<S: PlaybackSession>(shared: &Shared<S>, generation: u64) -> bool {
    let mut inner = shared.lock();
    if inner.generation != generation {
        return false;
    }
    let Slot::Playing { session, .. } = &inner.slot else {
        return false;
    };

    let reason = match session.status() {
        SessionStatus::Playing => {
            shared.position_tx.send_replace(session.position_ms());
            return true;
        }
        SessionStatus::Finished => EndReason::Finished,
        SessionStatus::Failed(e) => {
            error!("Playback failed: {}", e);
            EndReason::Failed(e)
        }
    };

    // Teardown aborts this very task; it returns before its next await
    let end = shared.teardown(&mut inner, reason);
    drop(inner);
    if let Some(end) = end {
        info!("Playback ended: {:?} ({:?})", end.path, end.reason);
        shared.notify(end);
    }
    false
}
