//! Microphone capture using PipeWire
//!
//! Each session runs its own PipeWire main loop on a dedicated thread and
//! streams samples straight into a WAV file.

use super::stream::{self, Connection, Stop};
use super::wav::{peak_amplitude, CaptureFormat, WavSink};
use super::{CaptureBackend, CaptureSession};
use crate::error::CaptureError;
use log::{debug, error, info, warn};
use pipewire as pw;
use pw::spa;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

/// Capture backend that records from the default PipeWire source
#[derive(Clone, Copy, Debug, Default)]
pub struct PipeWireCapture;

impl CaptureBackend for PipeWireCapture {
    type Session = PipeWireCaptureSession;

    fn start(&self, path: &Path, format: CaptureFormat) -> Result<Self::Session, CaptureError> {
        let sink = WavSink::create(path, format)?;
        let mut session = PipeWireCaptureSession::new(sink);
        session.spawn(format)?;
        Ok(session)
    }
}

/// Shared state between the control thread and the PipeWire process callback
#[derive(Clone)]
struct SharedCaptureState {
    inner: Arc<Mutex<CaptureStateInner>>,
}

struct CaptureStateInner {
    sink: Option<WavSink>,
    paused: bool,
    /// Peak level since the last amplitude read
    peak: u16,
    /// First write error hit by the process callback
    error: Option<String>,
}

impl SharedCaptureState {
    fn new(sink: WavSink) -> Self {
        Self {
            inner: Arc::new(Mutex::new(CaptureStateInner {
                sink: Some(sink),
                paused: false,
                peak: 0,
                error: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CaptureStateInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_paused(&self, paused: bool) {
        let mut inner = self.lock();
        inner.paused = paused;
        inner.peak = 0;
    }

    fn take_peak(&self) -> u16 {
        std::mem::take(&mut self.lock().peak)
    }

    fn take_sink(&self) -> Option<WavSink> {
        self.lock().sink.take()
    }

    fn take_error(&self) -> Option<String> {
        self.lock().error.take()
    }

    /// Record a stream failure; later samples are dropped
    fn fail(&self, message: String) {
        let mut inner = self.lock();
        if inner.error.is_none() {
            error!("Capture failed: {}", message);
            inner.error = Some(message);
        }
    }

    /// Process incoming mono samples
    fn process_samples(&self, samples: &[f32]) {
        let mut inner = self.lock();
        if inner.paused || inner.error.is_some() || samples.is_empty() {
            return;
        }

        inner.peak = inner.peak.max(peak_amplitude(samples));

        let result = match inner.sink.as_mut() {
            Some(sink) => sink.write(samples),
            None => return,
        };
        if let Err(e) = result {
            if inner.error.is_none() {
                error!("Failed to write captured audio: {}", e);
                inner.error = Some(e.to_string());
            }
        }
    }
}

/// An open PipeWire capture stream writing to one file
pub struct PipeWireCaptureSession {
    state: SharedCaptureState,
    is_running: Arc<AtomicBool>,
    thread_handle: Mutex<Option<JoinHandle<()>>>,
    sender: Mutex<Option<pw::channel::Sender<Stop>>>,
}

impl PipeWireCaptureSession {
    fn new(sink: WavSink) -> Self {
        Self {
            state: SharedCaptureState::new(sink),
            is_running: Arc::new(AtomicBool::new(false)),
            thread_handle: Mutex::new(None),
            sender: Mutex::new(None),
        }
    }

    /// Start the capture thread and wait until the stream is connected
    fn spawn(&mut self, format: CaptureFormat) -> Result<(), CaptureError> {
        self.is_running.store(true, Ordering::SeqCst);

        let state = self.state.clone();
        let is_running = self.is_running.clone();
        let (sender, receiver) = pw::channel::channel::<Stop>();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<(), String>>(1);

        let handle = thread::spawn(move || {
            if let Err(e) = run_capture_loop(state, format, receiver, ready_tx.clone()) {
                // Only reaches the controller if the stream never connected
                let _ = ready_tx.try_send(Err(e));
            }
            is_running.store(false, Ordering::SeqCst);
        });

        *self.sender.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(sender);
        *self.thread_handle.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(handle);

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                self.shutdown_thread();
                self.discard_output();
                Err(CaptureError::Backend(e))
            }
            Err(_) => {
                self.shutdown_thread();
                self.discard_output();
                Err(CaptureError::Backend(
                    "Capture thread exited before the stream connected".to_string(),
                ))
            }
        }
    }

    fn shutdown_thread(&self) {
        if let Some(sender) = self.sender.lock().unwrap_or_else(PoisonError::into_inner).take() {
            let _ = sender.send(Stop);
        }

        let handle = self
            .thread_handle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }

        self.is_running.store(false, Ordering::SeqCst);
    }

    /// Remove the half-written output of a session that never started
    fn discard_output(&self) {
        if let Some(sink) = self.state.take_sink() {
            let path = sink.path().to_path_buf();
            drop(sink);
            if let Err(e) = std::fs::remove_file(&path) {
                warn!("Failed to remove unused output {:?}: {}", path, e);
            }
        }
    }
}

impl CaptureSession for PipeWireCaptureSession {
    fn pause(&self) -> Result<(), CaptureError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(CaptureError::IllegalState("pause"));
        }
        self.state.set_paused(true);
        Ok(())
    }

    fn resume(&self) -> Result<(), CaptureError> {
        if !self.is_running.load(Ordering::SeqCst) {
            return Err(CaptureError::IllegalState("resume"));
        }
        self.state.set_paused(false);
        Ok(())
    }

    fn max_amplitude(&self) -> u16 {
        self.state.take_peak()
    }

    fn stop(&self) -> Result<(), CaptureError> {
        self.shutdown_thread();

        let Some(sink) = self.state.take_sink() else {
            return Ok(());
        };
        let samples = sink.samples_written();
        let path = sink.finalize()?;
        info!("Capture finalized: {:?} ({} samples)", path, samples);

        match self.state.take_error() {
            Some(e) => Err(CaptureError::Backend(e)),
            None => Ok(()),
        }
    }
}

impl Drop for PipeWireCaptureSession {
    fn drop(&mut self) {
        if self.is_running.load(Ordering::SeqCst) {
            let _ = self.stop();
        }
    }
}

/// Run the PipeWire capture loop on the session thread
fn run_capture_loop(
    state: SharedCaptureState,
    format: CaptureFormat,
    receiver: pw::channel::Receiver<Stop>,
    ready: mpsc::SyncSender<Result<(), String>>,
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
        expected_rate: u32,
        state: SharedCaptureState,
    }

    let user_data = UserData {
        format: Default::default(),
        expected_rate: format.sample_rate,
        state,
    };

    let stream = connection.stream("rech-capture", "Capture", "Communication")?;

    let _listener = stream
        .add_local_listener_with_user_data(user_data)
        .param_changed(|_, user_data, id, param| {
            if stream::update_format(&mut user_data.format, id, param) {
                debug!(
                    "Capture format negotiated: {}Hz, {} channel(s)",
                    user_data.format.rate(),
                    user_data.format.channels()
                );
                if let Err(e) = check_rate(user_data.expected_rate, user_data.format.rate()) {
                    user_data.state.fail(e);
                }
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
            let used = data.chunk().size() as usize;
            let Some(bytes) = data.data() else {
                return;
            };

            let mono = mix_to_mono(&bytes[..used.min(bytes.len())], channels);
            user_data.state.process_samples(&mono);
        })
        .register()
        .map_err(|e| format!("Cannot listen on capture stream: {}", e))?;

    stream::connect(
        &stream,
        spa::utils::Direction::Input,
        format.sample_rate,
        format.channels as u32,
    )?;

    let _ = ready.send(Ok(()));
    connection.mainloop.run();

    Ok(())
}

/// The stream must run at the rate written in the WAV header
fn check_rate(expected: u32, negotiated: u32) -> Result<(), String> {
    if negotiated == expected {
        Ok(())
    } else {
        Err(format!(
            "PipeWire negotiated {}Hz but the recording is {}Hz",
            negotiated, expected
        ))
    }
}

/// Average interleaved little-endian f32 frames into one channel
fn mix_to_mono(bytes: &[u8], channels: usize) -> Vec<f32> {
    bytes
        .chunks_exact(channels * std::mem::size_of::<f32>())
        .map(|frame| {
            let sum: f32 = frame
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .sum();
            sum / channels as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frames(samples: &[f32]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    #[test]
    fn test_mix_to_mono_averages_channels() {
        let bytes = frames(&[0.5, -0.5, 1.0, 0.0]);
        assert_eq!(mix_to_mono(&bytes, 2), vec![0.0, 0.5]);
        assert_eq!(mix_to_mono(&bytes, 1), vec![0.5, -0.5, 1.0, 0.0]);
    }

    #[test]
    fn test_mix_to_mono_drops_partial_frame() {
        let bytes = frames(&[0.25, 0.25, 0.75]);
        assert_eq!(mix_to_mono(&bytes, 2), vec![0.25]);
    }

    #[test]
    fn test_rate_mismatch_fails_session() {
        assert!(check_rate(44_100, 44_100).is_ok());
        let message = check_rate(44_100, 48_000).unwrap_err();
        assert!(message.contains("48000Hz"));

        let dir = tempfile::tempdir().unwrap();
        let sink = WavSink::create(&dir.path().join("b.wav"), CaptureFormat::VOICE_MEMO).unwrap();
        let state = SharedCaptureState::new(sink);
        state.process_samples(&[0.5; 4]);
        state.fail(message.clone());
        state.fail("later".to_string());
        state.process_samples(&[0.5; 4]);

        assert_eq!(state.take_error(), Some(message));
        assert_eq!(state.take_sink().unwrap().samples_written(), 4);
    }

    #[test]
    fn test_paused_state_drops_samples() {
        let dir = tempfile::tempdir().unwrap();
        let sink = WavSink::create(&dir.path().join("a.wav"), CaptureFormat::VOICE_MEMO).unwrap();
        let state = SharedCaptureState::new(sink);

        state.process_samples(&[0.5; 10]);
        state.set_paused(true);
        state.process_samples(&[0.5; 10]);

        assert_eq!(state.take_peak(), 0);
        assert_eq!(state.take_sink().unwrap().samples_written(), 10);
    }
}
