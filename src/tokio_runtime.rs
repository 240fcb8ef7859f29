//! Tokio runtime for the controllers' background work
//!
//! The control loop runs on the main thread and stays synchronous; amplitude
//! and position sampling plus playback preparation run on this runtime.

use tokio::runtime::Runtime;

/// Build the runtime. Keep it alive for as long as any controller exists.
pub fn build() -> std::io::Result<Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("rech-worker")
        .enable_all()
        .build()
}
