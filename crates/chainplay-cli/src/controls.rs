//! Interactive commands read from stdin and the progress line.

use std::io::{BufRead, Write};

use crossbeam_channel::{unbounded, Receiver};
use tracing::debug;

pub const HELP: &str = "commands: p = play, s = stop, 0.0-1.0 or N% = seek, q = quit";

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    Play,
    Stop,
    Seek(f32),
    Quit,
    Help,
}

/// Parse one line of input. Blank lines and unknown words are ignored.
pub fn parse_command(line: &str) -> Option<Command> {
    let line = line.trim();
    match line {
        "" => None,
        "p" | "play" => Some(Command::Play),
        "s" | "stop" => Some(Command::Stop),
        "q" | "quit" | "exit" => Some(Command::Quit),
        "h" | "help" | "?" => Some(Command::Help),
        _ => parse_position(line).map(Command::Seek),
    }
}

fn parse_position(text: &str) -> Option<f32> {
    let value = match text.strip_suffix('%') {
        Some(percent) => percent.trim().parse::<f32>().ok()? / 100.0,
        None => text.parse::<f32>().ok()?,
    };
    value.is_finite().then(|| value.clamp(0.0, 1.0))
}

/// Read commands from stdin on a background thread.
///
/// The channel disconnects when stdin closes.
pub fn spawn_stdin_reader() -> std::io::Result<Receiver<Command>> {
    let (tx, rx) = unbounded();
    std::thread::Builder::new()
        .name("stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else {
                    break;
                };
                match parse_command(&line) {
                    Some(command) => {
                        if tx.send(command).is_err() {
                            break;
                        }
                    }
                    None => debug!("Ignoring input {line:?}"),
                }
            }
        })?;
    Ok(rx)
}

/// Redraws a one-line progress bar when the whole percentage changes.
#[derive(Debug, Default)]
pub struct ProgressMeter {
    last_percent: Option<u32>,
}

impl ProgressMeter {
    const WIDTH: usize = 40;

    /// Returns the line to draw, or `None` when nothing visible changed.
    pub fn update(&mut self, progress: f32) -> Option<String> {
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let percent = (progress.clamp(0.0, 1.0) * 100.0).floor() as u32;
        if self.last_percent == Some(percent) {
            return None;
        }
        self.last_percent = Some(percent);

        let filled = Self::WIDTH * percent as usize / 100;
        Some(format!(
            "[{}{}] {percent:3}%",
            "#".repeat(filled),
            " ".repeat(Self::WIDTH - filled)
        ))
    }

    pub fn reset(&mut self) {
        self.last_percent = None;
    }

    pub fn draw(&mut self, progress: f32) {
        if let Some(line) = self.update(progress) {
            let mut stdout = std::io::stdout().lock();
            let _ = write!(stdout, "\r{line}");
            let _ = stdout.flush();
        }
    }
}
