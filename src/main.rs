//! Rech - A voice memo recorder for Linux
//!
//! This is the main entry point for the Rech application.

mod audio;
mod catalog;
mod cli;
mod commands;
mod error;
mod models;
mod playback;
mod recorder;
mod settings;
mod shell;
mod studio;
mod tokio_runtime;

use anyhow::{Context, Result};
use clap::Parser;
use cli::Command;
use log::info;
use settings::Settings;

fn main() -> Result<()> {
    // Parse command-line arguments and initialize logging
    let args = cli::Args::parse();
    cli::init_logging(&args);

    info!("Starting Rech voice memo recorder");

    let mut settings = Settings::load();
    if let Some(dir) = &args.dir {
        settings.recordings_dir = dir.clone();
    }
    if args.allow_overlap {
        settings.allow_overlap = true;
    }

    match args.command.unwrap_or(Command::Shell) {
        Command::List { json } => commands::list(&settings, json),
        Command::Rename { name, new_name } => commands::rename(&settings, &name, &new_name),
        Command::Delete { name, yes } => commands::delete(&settings, &name, yes),
        Command::Config {
            recordings_dir,
            confirm_on_delete,
            allow_overlap,
        } => commands::config(recordings_dir, confirm_on_delete, allow_overlap),
        command => {
            // Audio commands sample and prepare on background tasks
            let runtime = tokio_runtime::build().context("Failed to start Tokio runtime")?;
            let handle = runtime.handle().clone();
            match command {
                Command::Record { seconds } => commands::record(&settings, handle, seconds),
                Command::Play { name } => commands::play(&settings, handle, &name),
                _ => commands::shell(&settings, handle),
            }
        }
    }
}
