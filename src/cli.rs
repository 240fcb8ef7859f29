//! Command-line interface for Rech
//!
//! Handles argument parsing and logging configuration.

use clap::{Parser, Subcommand};
use log::LevelFilter;
use std::path::PathBuf;

/// Rech - Voice memo recorder
#[derive(Parser, Debug)]
#[command(name = "rech")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Increase logging verbosity
    /// -v = info, -vv = debug, -vvv = trace, -vvvv = all deps
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Recordings directory (overrides the saved setting)
    #[arg(short, long, global = true, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    /// Allow playback while recording (overrides the saved setting)
    #[arg(long, global = true)]
    pub allow_overlap: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Interactive recorder shell (default)
    Shell,

    /// List recordings, newest first
    List {
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Record until Enter is pressed or the time limit is reached
    Record {
        /// Stop automatically after this many seconds
        #[arg(short, long)]
        seconds: Option<u64>,
    },

    /// Play a recording to the end
    Play {
        /// File name of the recording
        name: String,
    },

    /// Rename a recording (the extension is kept)
    Rename {
        name: String,
        new_name: String,
    },

    /// Delete a recording
    Delete {
        name: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Show or change saved settings
    Config {
        #[arg(long, value_name = "DIR")]
        recordings_dir: Option<PathBuf>,

        #[arg(long, value_name = "BOOL")]
        confirm_on_delete: Option<bool>,

        #[arg(long = "set-allow-overlap", value_name = "BOOL")]
        allow_overlap: Option<bool>,
    },
}

impl Args {
    /// Get the log level filter based on verbosity flags
    pub fn log_level(&self) -> LevelFilter {
        if self.quiet {
            LevelFilter::Error
        } else {
            match self.verbose {
                0 => LevelFilter::Warn,
                1 => LevelFilter::Info,
                2 => LevelFilter::Debug,
                _ => LevelFilter::Trace,
            }
        }
    }
}

/// Initialize the logging system based on CLI arguments
pub fn init_logging(args: &Args) {
    let mut builder = env_logger::Builder::new();

    // Base level for all modules - keep at warn to suppress noisy deps
    builder.filter_level(LevelFilter::Warn);

    builder.filter_module("rech", args.log_level());

    // PipeWire and runtime internals only at -vvvv
    if args.verbose >= 4 {
        builder.filter_level(args.log_level());
    }

    builder.format_timestamp_millis().init();
}
