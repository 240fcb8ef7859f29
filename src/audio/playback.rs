//! Audio playback using PipeWire
//!
//! Decodes a whole recording up front and feeds it to an output stream with
//! sample-accurate position tracking.

use super::stream::{self, Connection, Stop};
use super::wav;
use super::{PlaybackBackend, PlaybackSession, SessionStatus};
use crate::error::PlaybackError;
use log::{debug, error, warn};
use pipewire as pw;
use pw::spa;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Playback backend that plays WAV files on the default PipeWire sink
#[derive(Clone, Copy, Debug, Default)]
pub struct PipeWirePlayer;

impl PlaybackBackend for PipeWirePlayer {
    type Session = PipeWirePlaybackSession;

    fn prepare(&self, path: &Path) -> Result<Self::Session, PlaybackError> {
        let (samples, sample_rate) = wav::load(path)?;
        debug!(
            "Decoded {:?}: {} samples at {}Hz",
            path,
            samples.len(),
            sample_rate
        );
        Ok(PipeWirePlaybackSession::new(samples, sample_rate))
    }
}

/// Shared state for audio playback - thread-safe
#[derive(Clone)]
struct SharedPlaybackState {
    inner: Arc<Mutex<PlaybackStateInner>>,
}

struct PlaybackStateInner {
    /// Decoded mono samples
    samples: Vec<f32>,
    sample_rate: u32,
    /// Current playback position (sample index)
    position: usize,
    /// Set once the last sample has been handed to the stream
    finished: bool,
    error: Option<String>,
}

impl SharedPlaybackState {
    fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PlaybackStateInner {
                samples,
                sample_rate,
                position: 0,
                finished: false,
                error: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PlaybackStateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn sample_rate(&self) -> u32 {
        self.lock().sample_rate
    }

    fn duration_ms(&self) -> u64 {
        let inner = self.lock();
        wav::duration_millis(inner.samples.len(), inner.sample_rate)
    }

    fn position_ms(&self) -> u64 {
        let inner = self.lock();
        wav::duration_millis(inner.position, inner.sample_rate)
    }

    /// Move the read head, clamped to the end of the media
    ///
    /// Running out of media stops the main loop, so `finished` is final.
    fn seek_ms(&self, position_ms: u64) {
        let mut inner = self.lock();
        if inner.finished {
            debug!("Ignoring seek after end of media");
            return;
        }
        let target = (position_ms * inner.sample_rate as u64 / 1000) as usize;
        inner.position = target.min(inner.samples.len());
    }

    fn set_error(&self, error: String) {
        self.lock().error = Some(error);
    }

    fn status(&self) -> SessionStatus {
        let inner = self.lock();
        if let Some(e) = &inner.error {
            SessionStatus::Failed(e.clone())
        } else if inner.finished {
            SessionStatus::Finished
        } else {
            SessionStatus::Playing
        }
    }

    fn is_finished(&self) -> bool {
        self.lock().finished
    }

    /// Get samples for playback (advances position)
    fn get_samples(&self, count: usize) -> Option<Vec<f32>> {
        let mut inner = self.lock();
        if inner.position >= inner.samples.len() {
            inner.finished = true;
            return None;
        }

        let end = (inner.position + count).min(inner.samples.len());
        let samples = inner.samples[inner.position..end].to_vec();
        inner.position = end;

        Some(samples)
    }
}

/// A decoded recording bound to a PipeWire output stream
pub struct PipeWirePlaybackSession {
    state: SharedPlaybackState,
    is_running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    sender: Mutex<Option<pw::channel::Sender<Stop>>>,
}

impl PipeWirePlaybackSession {
    fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            state: SharedPlaybackState::new(samples, sample_rate),
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: Mutex::new(None),
            sender: Mutex::new(None),
        }
    }
}

impl PlaybackSession for PipeWirePlaybackSession {
    fn duration_ms(&self) -> u64 {
        self.state.duration_ms()
    }

    fn position_ms(&self) -> u64 {
        self.state.position_ms()
    }

    fn start(&self) -> Result<(), PlaybackError> {
        if self.is_running.swap(true, Ordering::SeqCst) {
            return Err(PlaybackError::Backend("Playback already running".to_string()));
        }

        let state = self.state.clone();
        let is_running = self.is_running.clone();
        let (sender, receiver) = pw::channel::channel::<Stop>();

        let handle = thread::spawn(move || {
            if let Err(e) = run_playback_loop(state.clone(), receiver) {
                error!("Playback error: {}", e);
                state.set_error(e);
            }
            is_running.store(false, Ordering::SeqCst);
        });

        *self.sender.lock().unwrap_or_else(PoisonError::into_inner) = Some(sender);
        *self.thread_handle.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    fn seek_to(&self, position_ms: u64) {
        self.state.seek_ms(position_ms);
    }

    fn is_playing(&self) -> bool {
        self.is_running.load(Ordering::SeqCst) && !self.state.is_finished()
    }

    fn status(&self) -> SessionStatus {
        self.state.status()
    }

    fn release(&self) {
        if let Some(sender) = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = sender.send(Stop);
        }

        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("Playback thread panicked during release");
            }
        }

        self.is_running.store(false, Ordering::SeqCst);
    }
}

impl Drop for PipeWirePlaybackSession {
    fn drop(&mut self) {
        self.release();
    }
}

/// Run the PipeWire playback loop on the session thread
fn run_playback_loop(
    state: SharedPlaybackState,
    receiver: pw::channel::Receiver<Stop>,
) -> Result<(), String> {
    let connection = Connection::open()?;

    let mainloop_weak = connection.mainloop.downgrade();
    let _receiver = receiver.attach(connection.mainloop.loop_(), move |Stop| {
        if let Some(mainloop) = mainloop_weak.upgrade() {
            mainloop.quit();
        }
    });

    struct UserData {
        format: spa::param::audio::AudioInfoRaw,
        state: SharedPlaybackState,
        mainloop_weak: pw::main_loop::MainLoopWeak,
    }

    let sample_rate = state.sample_rate();
    let user_data = UserData {
        format: Default::default(),
        state,
        mainloop_weak: connection.mainloop.downgrade(),
    };

    let stream = connection.stream("rech-playback", "Playback", "Music")?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            if stream::update_format(&mut user_data.format, id, param) {
                debug!("Playback format negotiated: {} channel(s)", user_data.format.channels());
            }
        })
        .process(|stream, user_data| {
            let Some(mut buffer) = stream.dequeue_buffer() else {
                return;
            };
            let Some(data) = buffer.datas_mut().first_mut() else {
                return;
            };

            let channels = user_data.format.channels().max(1) as usize;
            let stride = std::mem::size_of::<f32>() * channels;
            let Some(bytes) = data.data() else {
                return;
            };

            let Some(samples) = user_data.state.get_samples(bytes.len() / stride) else {
                // Out of media: let the position tracker see Finished
                if let Some(mainloop) = user_data.mainloop_weak.upgrade() {
                    mainloop.quit();
                }
                return;
            };

            let written = fill_frames(bytes, &samples, channels);
            let chunk = data.chunk_mut();
            *chunk.offset_mut() = 0;
            *chunk.stride_mut() = stride as i32;
            *chunk.size_mut() = written as u32;
        })
        .register()
        .map_err(|e| format!("Cannot listen on playback stream: {}", e))?;

    // Mono at the file's rate; PipeWire resamples and upmixes to the sink
    stream::connect(&stream, spa::utils::Direction::Output, sample_rate, 1)?;

    connection.mainloop.run();

    Ok(())
}

/// Copy each mono sample into every channel of a frame and zero the rest;
/// returns the number of bytes holding audio
fn fill_frames(bytes: &mut [u8], samples: &[f32], channels: usize) -> usize {
    let stride = std::mem::size_of::<f32>() * channels;
    for (frame, sample) in bytes.chunks_exact_mut(stride).zip(samples) {
        let le = sample.to_le_bytes();
        for channel in frame.chunks_exact_mut(4) {
            channel.copy_from_slice(&le);
        }
    }

    let written = (samples.len() * stride).min(bytes.len());
    bytes[written..].fill(0);
    written
}
