use std::fmt;
use std::fs;
use std::io;
use std::iter;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use log::{error, info, log, Level};

use crate::adjust::adjust;
use crate::app::error_chain;
use crate::classify::PendingJobs;
use crate::slurm::{Runner, Slurm, SystemRunner};

/// Lowest niceness that may be requested via a message file
pub const MIN_NICE: i64 = 0;
/// Highest niceness that may be requested via a message file
pub const MAX_NICE: i64 = 1_000_000;

/// Result of polling a message file once
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// A valid request to set the niceness of pending array jobs
    Nice(u32),
    Missing,
    Unreadable(String),
    /// The file does not end with a newline, and may still be being written
    Incomplete(String),
    MultipleLines(String),
    Malformed(String),
    OutOfRange(i64),
}

impl Message {
    pub fn level(&self) -> Level {
        match self {
            Message::Nice(_) => Level::Info,
            Message::Missing | Message::Incomplete(_) => Level::Warn,
            Message::Unreadable(_)
            | Message::MultipleLines(_)
            | Message::Malformed(_)
            | Message::OutOfRange(_) => Level::Error,
        }
    }

    /// Parses the content of a message file
    pub fn parse(text: &str) -> Message {
        let Some(line) = text.strip_suffix('\n') else {
            return Message::Incomplete(text.to_string());
        };

        if line.contains('\n') {
            return Message::MultipleLines(text.to_string());
        }

        match line.trim().parse::<i64>() {
            Ok(nice) if (MIN_NICE..=MAX_NICE).contains(&nice) => Message::Nice(nice as u32),
            Ok(nice) => Message::OutOfRange(nice),
            Err(_) => Message::Malformed(line.to_string()),
        }
    }

    /// Reads and parses the message file at `path`
    pub fn read(path: &Path) -> Message {
        match fs::read_to_string(path) {
            Ok(text) => Message::parse(&text),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Message::Missing,
            Err(err) => Message::Unreadable(err.to_string()),
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Message::Nice(nice) => write!(f, "requested nice value {}", nice),
            Message::Missing => f.write_str("message file not found"),
            Message::Unreadable(err) => write!(f, "error reading message file: {}", err),
            Message::Incomplete(text) => write!(f, "ignoring incomplete message: {:?}", text),
            Message::MultipleLines(text) => write!(f, "message has multiple lines: {:?}", text),
            Message::Malformed(text) => write!(f, "malformed message: {:?}", text),
            Message::OutOfRange(nice) => write!(f, "nice value out of range: {}", nice),
        }
    }
}

/// Iterator adapter that skips consecutive duplicates
pub struct Changes<I: Iterator> {
    inner: I,
    last: Option<I::Item>,
}

impl<I> Iterator for Changes<I>
where
    I: Iterator,
    I::Item: PartialEq + Clone,
{
    type Item = I::Item;

    fn next(&mut self) -> Option<Self::Item> {
        for item in self.inner.by_ref() {
            if self.last.as_ref() != Some(&item) {
                self.last = Some(item.clone());
                return Some(item);
            }
        }

        None
    }
}

pub trait ChangesExt: Iterator + Sized {
    fn changes(self) -> Changes<Self> {
        Changes {
            inner: self,
            last: None,
        }
    }
}

impl<I: Iterator> ChangesExt for I {}

/// Location of the message file of `user` below `root`
pub fn message_path(root: &Path, user: &str) -> PathBuf {
    root.join("nice").join(user)
}

/// Where accepted requests are applied
pub struct Target<R = SystemRunner> {
    pub slurm: Slurm<R>,
    pub partition: String,
    pub user: String,
}

/// Polls a message file and reports every change in its content
pub struct Watcher<R = SystemRunner> {
    path: PathBuf,
    interval: Duration,
    target: Option<Target<R>>,
}

impl<R: Runner> Watcher<R> {
    pub fn new(path: PathBuf, interval: Duration, target: Option<Target<R>>) -> Self {
        Self {
            path,
            interval,
            target,
        }
    }

    /// Reads the message file every interval, yielding the first result immediately
    pub fn poll(&self) -> impl Iterator<Item = Message> + '_ {
        let mut first = true;
        iter::repeat_with(move || {
            if !first {
                thread::sleep(self.interval);
            }

            first = false;
            Message::read(&self.path)
        })
    }

    /// Processes messages until the process is terminated
    pub fn run(&self) {
        info!("watching message file {}", self.path.display());

        for message in self.poll().changes() {
            self.process(&message);
        }
    }

    pub fn process(&self, message: &Message) {
        log!(message.level(), "{}", message);

        let Message::Nice(nice) = *message else {
            return;
        };

        let Some(target) = &self.target else {
            info!("no partition given; not applying nice value {}", nice);
            return;
        };

        let result = target
            .slurm
            .pending_jobs(&target.partition, &target.user)
            .map(PendingJobs::classify);

        match result {
            Ok(pending) => match adjust(&target.slurm, pending.array, nice) {
                Ok(adjustment) => info!("{}", adjustment),
                Err(err) => error!("{}", error_chain(&err)),
            },
            Err(err) => error!("{}", error_chain(&err)),
        }
    }
}
