//! One-shot subcommands
//!
//! Each command opens what it needs, does one thing and returns. The
//! interactive shell lives in `shell.rs`.

use crate::audio::{PipeWireCapture, PipeWirePlayer};
use crate::catalog::RecordingCatalog;
use crate::models::{
    format_date_time, format_elapsed, format_file_size, format_position, EndReason,
    RecordingState,
};
use crate::settings::{self, Settings};
use crate::shell::{level_meter, Shell};
use crate::studio::{AudioPolicy, Studio};
use anyhow::{anyhow, bail, Context, Result};
use log::info;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;

const REFRESH_INTERVAL: Duration = Duration::from_millis(100);

fn open_studio(settings: &Settings, runtime: Handle) -> Studio<PipeWireCapture, PipeWirePlayer> {
    Studio::new(
        PipeWireCapture,
        PipeWirePlayer,
        runtime,
        &settings.recordings_dir,
        AudioPolicy::from_allow_overlap(settings.allow_overlap),
    )
}

pub fn shell(settings: &Settings, runtime: Handle) -> Result<()> {
    let mut studio = open_studio(settings, runtime);
    let stdin = io::stdin();
    Shell::new(&mut studio, io::stdout(), settings.confirm_on_delete)
        .run(&mut stdin.lock())
        .context("Shell I/O failed")
}

pub fn list(settings: &Settings, json: bool) -> Result<()> {
    let catalog = RecordingCatalog::new(&settings.recordings_dir);
    let recordings = catalog
        .refresh()
        .with_context(|| format!("Failed to read {:?}", catalog.dir()))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&recordings)?);
        return Ok(());
    }

    if recordings.is_empty() {
        println!("No recordings in {:?}", catalog.dir());
        return Ok(());
    }

    for recording in &recordings {
        println!(
            "{:<40} {:>10}  {}",
            recording.name,
            format_file_size(recording.size_bytes),
            format_date_time(&recording.modified)
        );
    }
    Ok(())
}

pub fn rename(settings: &Settings, name: &str, new_name: &str) -> Result<()> {
    let catalog = RecordingCatalog::new(&settings.recordings_dir);
    let recording = catalog.find(name)?;
    let renamed = catalog
        .rename(&recording, new_name)
        .with_context(|| format!("Failed to rename '{}'", name))?;
    println!("Renamed to: {}", renamed.name);
    Ok(())
}

pub fn delete(settings: &Settings, name: &str, yes: bool) -> Result<()> {
    let catalog = RecordingCatalog::new(&settings.recordings_dir);
    let recording = catalog.find(name)?;

    if settings.confirm_on_delete && !yes {
        print!("Are you sure you want to delete '{}'? [y/N] ", recording.name);
        io::stdout().flush()?;
        let mut answer = String::new();
        io::stdin().lock().read_line(&mut answer)?;
        if !matches!(answer.trim().to_lowercase().as_str(), "y" | "yes") {
            println!("Kept {}", recording.name);
            return Ok(());
        }
    }

    catalog
        .delete(&recording)
        .with_context(|| format!("Failed to delete '{}'", name))?;
    println!("Deleted: {}", recording.name);
    Ok(())
}

/// Record until Enter is pressed or `seconds` have passed
pub fn record(settings: &Settings, runtime: Handle, seconds: Option<u64>) -> Result<()> {
    let mut studio = open_studio(settings, runtime);
    let path = studio
        .start_recording()
        .ok_or_else(|| anyhow!("Failed to start recording"))?;
    info!("Recording to {:?}", path);

    let (enter_tx, enter_rx) = mpsc::channel();
    thread::spawn(move || {
        let mut line = String::new();
        let _ = io::stdin().lock().read_line(&mut line);
        let _ = enter_tx.send(());
    });

    match seconds {
        Some(s) => println!("Recording for {}s (press Enter to stop early)", s),
        None => println!("Recording... press Enter to stop"),
    }

    let state = studio.recorder().subscribe_state();
    let amplitude = studio.recorder().subscribe_amplitude();
    let limit = seconds.map(Duration::from_secs);
    let started = Instant::now();
    loop {
        match enter_rx.recv_timeout(REFRESH_INTERVAL) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        if *state.borrow() == RecordingState::NotRecording {
            break;
        }
        let elapsed = started.elapsed();
        if limit.is_some_and(|limit| elapsed >= limit) {
            break;
        }
        print!(
            "\r{} {}",
            format_elapsed(elapsed.as_millis() as u64),
            level_meter(*amplitude.borrow(), 30)
        );
        io::stdout().flush()?;
    }
    println!();

    let saved = studio
        .stop_recording()
        .ok_or_else(|| anyhow!("Recording was interrupted by the audio backend"))?;
    println!("Saved {}", saved.display());
    Ok(())
}

/// Play a recording to the end
pub fn play(settings: &Settings, runtime: Handle, name: &str) -> Result<()> {
    let mut studio = open_studio(settings, runtime);
    let recording = studio.catalog().find(name)?;

    let (end_tx, end_rx) = mpsc::channel();
    studio.on_playback_complete(move |end| {
        let _ = end_tx.send(end);
    });
    let position = studio.player().subscribe_position();
    let duration = studio.player().subscribe_duration();
    studio.toggle_playback(&recording.path);
    println!("Playing {}", recording.name);

    let end = loop {
        match end_rx.recv_timeout(REFRESH_INTERVAL) {
            Ok(end) => break end,
            Err(RecvTimeoutError::Timeout) => {
                print!(
                    "\r{} / {}",
                    format_position(*position.borrow()),
                    format_position(*duration.borrow())
                );
                io::stdout().flush()?;
            }
            Err(RecvTimeoutError::Disconnected) => bail!("Player went away"),
        }
    };
    println!();

    match end.reason {
        EndReason::Finished | EndReason::Stopped => Ok(()),
        EndReason::Failed(e) => Err(anyhow!("Could not play {}: {}", recording.name, e)),
    }
}

pub fn config(
    recordings_dir: Option<PathBuf>,
    confirm_on_delete: Option<bool>,
    allow_overlap: Option<bool>,
) -> Result<()> {
    if let Some(dir) = recordings_dir {
        settings::set_recordings_dir(&dir);
    }
    if let Some(confirm) = confirm_on_delete {
        settings::set_confirm_on_delete(confirm);
    }
    if let Some(allow) = allow_overlap {
        settings::set_allow_overlap(allow);
    }

    let current = Settings::load();
    println!("recordings-dir     {}", current.recordings_dir.display());
    println!("confirm-on-delete  {}", current.confirm_on_delete);
    println!("allow-overlap      {}", current.allow_overlap);
    Ok(())
}
