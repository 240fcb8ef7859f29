//! Interactive recorder shell
//!
//! A line-oriented stand-in for the record/list/play screen. Recordings are
//! addressed by their 1-based position in the most recent listing, which is
//! refreshed after every file-system change.

use crate::audio::{CaptureBackend, PlaybackBackend};
use crate::models::{
    format_date_time, format_elapsed, format_file_size, format_position, EndReason, PlaybackEnd,
    Recording, RecordingState,
};
use crate::recorder::PauseOutcome;
use crate::studio::{AudioPolicy, Studio, ToggleOutcome};
use std::io::{self, BufRead, Write};
use std::sync::mpsc;
use std::time::{Duration, Instant};

const HELP: &str = "\
Commands:
  record              start a new recording
  pause | resume      pause or resume the recording
  stop                finish the recording
  list                list recordings, newest first
  play <n>            play recording n (again to stop)
  halt                stop playback
  seek <s|mm:ss>      jump to a position in the playing recording
  rename <n> <name>   rename recording n
  delete <n>          delete recording n
  status              show recorder and player state
  help                show this help
  quit                stop everything and exit";

/// A parsed shell command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShellCommand {
    Record,
    Pause,
    Resume,
    Stop,
    List,
    Play(usize),
    Halt,
    Seek(u64),
    Rename(usize, String),
    Delete(usize),
    Status,
    Help,
    Quit,
}

/// Parse one input line; blank lines yield `None`
pub fn parse_command(line: &str) -> Result<Option<ShellCommand>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };

    let command = match word.to_lowercase().as_str() {
        "record" | "rec" | "r" => ShellCommand::Record,
        "pause" => ShellCommand::Pause,
        "resume" => ShellCommand::Resume,
        "stop" => ShellCommand::Stop,
        "list" | "ls" => ShellCommand::List,
        "play" | "p" => ShellCommand::Play(parse_index(rest)?),
        "halt" => ShellCommand::Halt,
        "seek" => ShellCommand::Seek(parse_position(rest)?),
        "rename" | "mv" => {
            let (index, name) = rest
                .split_once(char::is_whitespace)
                .ok_or("usage: rename <n> <name>")?;
            ShellCommand::Rename(parse_index(index)?, name.trim().to_string())
        }
        "delete" | "rm" => ShellCommand::Delete(parse_index(rest)?),
        "status" | "st" => ShellCommand::Status,
        "help" | "?" => ShellCommand::Help,
        "quit" | "exit" | "q" => ShellCommand::Quit,
        other => return Err(format!("Unknown command '{}'. Type 'help'.", other)),
    };

    Ok(Some(command))
}

fn parse_index(arg: &str) -> Result<usize, String> {
    match arg.trim().parse::<usize>() {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(format!("Expected a recording number, got '{}'", arg)),
    }
}

/// Parse `90`, `1.5` (seconds) or `1:30` (minutes:seconds) into milliseconds
pub fn parse_position(arg: &str) -> Result<u64, String> {
    let invalid = || format!("Expected seconds or mm:ss, got '{}'", arg);
    let arg = arg.trim();

    if let Some((minutes, seconds)) = arg.split_once(':') {
        let minutes: u64 = minutes.parse().map_err(|_| invalid())?;
        let seconds: u64 = seconds.parse().map_err(|_| invalid())?;
        if seconds >= 60 {
            return Err(invalid());
        }
        return Ok((minutes * 60 + seconds) * 1000);
    }

    let seconds: f64 = arg.parse().map_err(|_| invalid())?;
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(invalid());
    }
    Ok((seconds * 1000.0).round() as u64)
}

/// Render an amplitude sample as a fixed-width level meter
pub fn level_meter(amplitude: u16, width: usize) -> String {
    let filled = (amplitude as usize * width).div_ceil(i16::MAX as usize).min(width);
    format!("[{}{}]", "#".repeat(filled), "-".repeat(width - filled))
}

/// Elapsed recording time, excluding pauses
#[derive(Debug, Default)]
struct RecordingTimer {
    accumulated: Duration,
    running_since: Option<Instant>,
}

impl RecordingTimer {
    fn start(&mut self) {
        self.accumulated = Duration::ZERO;
        self.running_since = Some(Instant::now());
    }

    fn pause(&mut self) {
        if let Some(since) = self.running_since.take() {
            self.accumulated += since.elapsed();
        }
    }

    fn resume(&mut self) {
        if self.running_since.is_none() {
            self.running_since = Some(Instant::now());
        }
    }

    fn reset(&mut self) {
        *self = Self::default();
    }

    fn elapsed(&self) -> Duration {
        self.accumulated + self.running_since.map(|s| s.elapsed()).unwrap_or_default()
    }
}

/// The interactive shell over a studio
pub struct Shell<'a, C: CaptureBackend, P: PlaybackBackend, W: Write> {
    studio: &'a mut Studio<C, P>,
    out: W,
    confirm_on_delete: bool,
    listing: Vec<Recording>,
    timer: RecordingTimer,
    ends: mpsc::Receiver<PlaybackEnd>,
}

impl<'a, C: CaptureBackend, P: PlaybackBackend, W: Write> Shell<'a, C, P, W> {
    pub fn new(studio: &'a mut Studio<C, P>, out: W, confirm_on_delete: bool) -> Self {
        let (tx, ends) = mpsc::channel();
        studio.on_playback_complete(move |end| {
            let _ = tx.send(end);
        });

        Self {
            studio,
            out,
            confirm_on_delete,
            listing: Vec::new(),
            timer: RecordingTimer::default(),
            ends,
        }
    }

    /// Read commands from `input` until `quit` or end of input
    pub fn run(&mut self, input: &mut impl BufRead) -> io::Result<()> {
        writeln!(self.out, "Recordings in {:?}", self.studio.catalog().dir())?;
        if self.studio.policy() == AudioPolicy::Overlap {
            writeln!(self.out, "Playback may overlap recording.")?;
        }
        self.refresh_listing()?;
        self.print_listing()?;
        writeln!(self.out, "Type 'help' for commands.")?;

        let mut line = String::new();
        loop {
            self.drain_playback_events()?;
            write!(self.out, "rech> ")?;
            self.out.flush()?;

            line.clear();
            if input.read_line(&mut line)? == 0 {
                break;
            }
            self.drain_playback_events()?;

            match parse_command(&line) {
                Ok(Some(ShellCommand::Quit)) => break,
                Ok(Some(command)) => self.execute(command, input)?,
                Ok(None) => {}
                Err(message) => writeln!(self.out, "{}", message)?,
            }
        }

        self.studio.shutdown();
        self.timer.reset();
        self.drain_playback_events()?;
        writeln!(self.out, "Bye.")
    }

    fn execute(&mut self, command: ShellCommand, input: &mut impl BufRead) -> io::Result<()> {
        match command {
            ShellCommand::Record => match self.studio.start_recording() {
                Some(path) => {
                    self.timer.start();
                    writeln!(self.out, "Recording started: {}", path.display())?;
                }
                None => writeln!(self.out, "Failed to start recording.")?,
            },
            ShellCommand::Pause => match self.studio.pause_recording() {
                PauseOutcome::Paused => {
                    self.timer.pause();
                    writeln!(self.out, "Recording paused.")?;
                }
                PauseOutcome::Stopped(path) => {
                    self.timer.reset();
                    writeln!(self.out, "Pause not supported. Recording stopped.")?;
                    if let Some(path) = path {
                        writeln!(self.out, "Saved {}", path.display())?;
                    }
                    self.refresh_listing()?;
                }
                PauseOutcome::Ignored => writeln!(self.out, "Not recording.")?,
            },
            ShellCommand::Resume => {
                if self.studio.resume_recording() {
                    self.timer.resume();
                    writeln!(self.out, "Recording resumed.")?;
                } else {
                    writeln!(self.out, "Nothing to resume.")?;
                }
            }
            ShellCommand::Stop => {
                let elapsed = self.timer.elapsed();
                self.timer.reset();
                match self.studio.stop_recording() {
                    Some(path) => {
                        writeln!(
                            self.out,
                            "Recording stopped after {}: {}",
                            format_elapsed(elapsed.as_millis() as u64),
                            path.display()
                        )?;
                        self.refresh_listing()?;
                    }
                    None => writeln!(self.out, "Not recording.")?,
                }
            }
            ShellCommand::List => {
                self.refresh_listing()?;
                self.print_listing()?;
            }
            ShellCommand::Play(index) => {
                let Some(recording) = self.entry(index)? else {
                    return Ok(());
                };
                match self.studio.toggle_playback(&recording.path) {
                    ToggleOutcome::Started { stopped_recording } => {
                        if let Some(path) = stopped_recording {
                            self.timer.reset();
                            writeln!(
                                self.out,
                                "Recording stopped to play audio: {}",
                                path.display()
                            )?;
                            self.refresh_listing()?;
                        }
                        writeln!(self.out, "Playing {}", recording.name)?;
                    }
                    ToggleOutcome::Stopped => {}
                }
            }
            ShellCommand::Halt => {
                if self.studio.player().is_active() {
                    self.studio.stop_playback();
                } else {
                    writeln!(self.out, "Nothing is playing.")?;
                }
            }
            ShellCommand::Seek(position_ms) => {
                if self.studio.player().is_playing() {
                    self.studio.seek_to(position_ms);
                    let player = self.studio.player();
                    writeln!(
                        self.out,
                        "{} / {}",
                        format_position(player.position()),
                        format_position(player.duration())
                    )?;
                } else {
                    writeln!(self.out, "Nothing is playing.")?;
                }
            }
            ShellCommand::Rename(index, new_name) => {
                let Some(recording) = self.entry(index)? else {
                    return Ok(());
                };
                match self.studio.rename(&recording, &new_name) {
                    Ok(renamed) => writeln!(self.out, "Renamed to: {}", renamed.name)?,
                    Err(e) => writeln!(self.out, "Failed to rename '{}': {}", recording.name, e)?,
                }
                self.refresh_listing()?;
            }
            ShellCommand::Delete(index) => {
                let Some(recording) = self.entry(index)? else {
                    return Ok(());
                };
                if self.confirm_on_delete && !self.confirm(&recording, input)? {
                    writeln!(self.out, "Kept {}", recording.name)?;
                    return Ok(());
                }
                match self.studio.delete(&recording) {
                    Ok(()) => writeln!(self.out, "Deleted: {}", recording.name)?,
                    Err(e) => writeln!(self.out, "Failed to delete '{}': {}", recording.name, e)?,
                }
                self.refresh_listing()?;
            }
            ShellCommand::Status => self.print_status()?,
            ShellCommand::Help => writeln!(self.out, "{}", HELP)?,
            ShellCommand::Quit => {}
        }
        Ok(())
    }

    fn entry(&mut self, index: usize) -> io::Result<Option<Recording>> {
        let entry = self.listing.get(index - 1).cloned();
        if entry.is_none() {
            writeln!(self.out, "No recording #{}. Run 'list' to see them.", index)?;
        }
        Ok(entry)
    }

    fn confirm(&mut self, recording: &Recording, input: &mut impl BufRead) -> io::Result<bool> {
        write!(
            self.out,
            "Are you sure you want to delete '{}'? [y/N] ",
            recording.name
        )?;
        self.out.flush()?;

        let mut answer = String::new();
        input.read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"))
    }

    fn refresh_listing(&mut self) -> io::Result<()> {
        match self.studio.recordings() {
            Ok(recordings) => self.listing = recordings,
            Err(e) => {
                self.listing.clear();
                writeln!(self.out, "Failed to read recordings: {}", e)?;
            }
        }
        Ok(())
    }

    fn print_listing(&mut self) -> io::Result<()> {
        if self.listing.is_empty() {
            return writeln!(self.out, "No recordings yet. Type 'record' to start!");
        }

        let player = self.studio.player();
        for (i, recording) in self.listing.iter().enumerate() {
            let marker = if player.is_playing_path(&recording.path) {
                ">"
            } else {
                " "
            };
            writeln!(
                self.out,
                "{}{:>3}. {}  ({}, {})",
                marker,
                i + 1,
                recording.name,
                format_file_size(recording.size_bytes),
                format_date_time(&recording.modified)
            )?;
        }
        Ok(())
    }

    fn print_status(&mut self) -> io::Result<()> {
        let recorder = self.studio.recorder();
        match recorder.state() {
            RecordingState::NotRecording => writeln!(self.out, "Recorder: idle")?,
            state => writeln!(
                self.out,
                "Recorder: {} {} {} {}",
                state,
                format_elapsed(self.timer.elapsed().as_millis() as u64),
                level_meter(recorder.amplitude(), 20),
                recorder
                    .current_path()
                    .and_then(|p| p.file_name())
                    .unwrap_or_default()
                    .to_string_lossy()
            )?,
        }

        let player = self.studio.player();
        match player.current_path() {
            Some(path) if player.is_playing() => writeln!(
                self.out,
                "Player: playing {} {} / {}",
                path.file_name().unwrap_or_default().to_string_lossy(),
                format_position(player.position()),
                format_position(player.duration())
            ),
            Some(path) => writeln!(
                self.out,
                "Player: loading {}",
                path.file_name().unwrap_or_default().to_string_lossy()
            ),
            None => writeln!(self.out, "Player: stopped"),
        }
    }

    fn drain_playback_events(&mut self) -> io::Result<()> {
        while let Ok(end) = self.ends.try_recv() {
            let name = end.path.file_name().unwrap_or_default().to_string_lossy().into_owned();
            match end.reason {
                EndReason::Finished => writeln!(self.out, "Finished playing {}", name)?,
                EndReason::Stopped => writeln!(self.out, "Stopped {}", name)?,
                EndReason::Failed(e) => writeln!(self.out, "Could not play {}: {}", name, e)?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::tests::FakePlayer;
    use crate::recorder::tests::FakeCapture;
    use tokio::runtime::Handle;

    #[test]
    fn test_parse_commands() {
        assert_eq!(parse_command("  "), Ok(None));
        assert_eq!(parse_command("REC"), Ok(Some(ShellCommand::Record)));
        assert_eq!(parse_command("play 3"), Ok(Some(ShellCommand::Play(3))));
        assert_eq!(
            parse_command("rename 2  Weekly sync "),
            Ok(Some(ShellCommand::Rename(2, "Weekly sync".to_string())))
        );
        assert_eq!(parse_command("seek 1:30"), Ok(Some(ShellCommand::Seek(90_000))));
        assert!(parse_command("play 0").is_err());
        assert!(parse_command("rename 2").is_err());
        assert!(parse_command("dance").is_err());
    }

    #[test]
    fn test_parse_position() {
        assert_eq!(parse_position("90"), Ok(90_000));
        assert_eq!(parse_position("1.5"), Ok(1_500));
        assert_eq!(parse_position("2:05"), Ok(125_000));
        assert!(parse_position("1:75").is_err());
        assert!(parse_position("-3").is_err());
    }

    #[test]
    fn test_level_meter() {
        assert_eq!(level_meter(0, 4), "[----]");
        assert_eq!(level_meter(i16::MAX as u16, 4), "[####]");
        assert_eq!(level_meter(1, 4), "[#---]");
    }

    fn run_script(
        studio: &mut Studio<FakeCapture, FakePlayer>,
        script: &str,
        confirm: bool,
    ) -> String {
        let mut out = Vec::new();
        Shell::new(studio, &mut out, confirm)
            .run(&mut script.as_bytes())
            .unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_record_rename_delete_session() {
        let dir = tempfile::tempdir().unwrap();
        let mut studio = Studio::new(
            FakeCapture::default(),
            FakePlayer::default(),
            Handle::current(),
            dir.path(),
            AudioPolicy::Exclusive,
        );

        let output = run_script(
            &mut studio,
            "record\nstatus\npause\nresume\nstop\nrename 1 Groceries\nlist\n\
             delete 1\nn\ndelete 1\nyes\nlist\nquit\n",
            true,
        );

        assert!(output.contains("No recordings yet"));
        assert!(output.contains("Recording started:"));
        assert!(output.contains("Recorder: recording"));
        assert!(output.contains("Recording paused."));
        assert!(output.contains("Recording resumed."));
        assert!(output.contains("Recording stopped after"));
        assert!(output.contains("Renamed to: Groceries.wav"));
        assert!(output.contains("  1. Groceries.wav"));
        assert!(output.contains("Kept Groceries.wav"));
        assert!(output.contains("Deleted: Groceries.wav"));
        assert!(output.trim_end().ends_with("Bye."));
        assert!(studio.recordings().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_blank_rename_and_unknown_index() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("memo.wav"), b"RIFF").unwrap();
        let mut studio = Studio::new(
            FakeCapture::default(),
            FakePlayer::default(),
            Handle::current(),
            dir.path(),
            AudioPolicy::Exclusive,
        );

        let output = run_script(&mut studio, "rename 1 ***\nplay 4\ndelete 1\n", false);

        assert!(output.contains("Failed to rename 'memo.wav': File name cannot be empty"));
        assert!(output.contains("No recording #4."));
        assert!(output.contains("Deleted: memo.wav"));
    }

    #[tokio::test]
    async fn test_cannot_delete_recording_in_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut studio = Studio::new(
            FakeCapture::default(),
            FakePlayer::default(),
            Handle::current(),
            dir.path(),
            AudioPolicy::Exclusive,
        );

        let output = run_script(&mut studio, "record\nlist\ndelete 1\nstop\nlist\n", false);

        assert!(output.contains("Still recording to REC_"));
        assert!(!output.contains("Deleted:"));
        assert!(output.contains("Recording stopped after"));
        assert_eq!(studio.recordings().unwrap().len(), 1);
    }
}
