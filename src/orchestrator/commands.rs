use std::io::BufRead;
use std::thread;

use chrono::NaiveTime;
use tokio::sync::mpsc;
use tracing::{debug, error};

use crate::media::MediaRef;
use crate::scheduler::ScheduleEntry;

pub const HELP_TEXT: &str = "\
Commands:
  start            cast a random catalog entry
  start <media>    cast a file name, an http(s) URL or youtube:<id>
  stop             stop casting
  schedule <start HH:MM> <stop HH:MM> [media] [volume]
                   add a daily start/stop pair
  list             show the media catalog
  jobs             show scheduled events
  help             show this help
  q                stop everything and quit";

/// One line of operator input.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(Option<MediaRef>),
    Stop,
    /// A daily start/stop pair added at run time.
    Schedule {
        start: NaiveTime,
        stop: NaiveTime,
        media: Option<MediaRef>,
        volume: Option<f32>,
    },
    List,
    Jobs,
    Help,
    Quit,
    Empty,
    /// A known command with bad arguments, and why.
    Invalid(String),
    Unknown(String),
}

impl Command {
    pub fn parse(line: &str) -> Command {
        let line = line.trim();
        let (word, rest) = match line.split_once(char::is_whitespace) {
            Some((word, rest)) => (word, rest.trim()),
            None => (line, ""),
        };

        match (word.to_ascii_lowercase().as_str(), rest) {
            ("", _) => Command::Empty,
            ("start", "") => Command::Start(None),
            ("start", media) => Command::Start(Some(MediaRef::parse(media))),
            ("stop", "") => Command::Stop,
            ("schedule", args) => parse_schedule(args),
            ("list", "") => Command::List,
            ("jobs", "") => Command::Jobs,
            ("help" | "?", "") => Command::Help,
            ("q" | "quit" | "exit", "") => Command::Quit,
            _ => Command::Unknown(line.to_string()),
        }
    }
}

fn parse_schedule(args: &str) -> Command {
    let usage = "usage: schedule <start HH:MM> <stop HH:MM> [media] [volume]";
    let words: Vec<&str> = args.split_whitespace().collect();
    let (start, stop, rest) = match words.as_slice() {
        [start, stop, rest @ ..] if rest.len() <= 2 => (*start, *stop, rest),
        _ => return Command::Invalid(usage.to_string()),
    };

    let (start, stop) = match (ScheduleEntry::parse_time(start), ScheduleEntry::parse_time(stop)) {
        (Ok(start), Ok(stop)) => (start, stop),
        (Err(e), _) | (_, Err(e)) => return Command::Invalid(e.to_string()),
    };

    let (media, volume) = match rest {
        [] => (None, None),
        [only] => match only.parse::<f32>() {
            Ok(volume) => (None, Some(volume)),
            Err(_) => (Some(MediaRef::parse(only)), None),
        },
        [media, volume] => match volume.parse::<f32>() {
            Ok(volume) => (Some(MediaRef::parse(media)), Some(volume)),
            Err(_) => return Command::Invalid(format!("invalid volume '{}'", volume)),
        },
        _ => return Command::Invalid(usage.to_string()),
    };
    if let Some(volume) = volume {
        if !(0.0..=1.0).contains(&volume) {
            return Command::Invalid(format!("volume {} is outside 0.0..=1.0", volume));
        }
    }

    Command::Schedule {
        start,
        stop,
        media,
        volume,
    }
}

/// Forwards stdin lines to `lines` from a dedicated thread. The channel
/// closes when stdin reaches end of input.
pub fn spawn_stdin_reader(lines: mpsc::UnboundedSender<String>) -> std::io::Result<thread::JoinHandle<()>> {
    thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                match line {
                    Ok(line) => {
                        if lines.send(line).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        error!("Failed to read from stdin: {}", e);
                        break;
                    }
                }
            }
            debug!("stdin reader finished");
        })
}
