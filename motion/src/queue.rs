//! Textual command queue in front of the parser.
//!
//! Holds a few commands so the host can stream ahead of the planner, and
//! answers each executed command with an `ok` carrying how much room is
//! left here and in the planner ring.

use core::fmt;
use heapless::{Deque, String};

/// Commands held at once.
pub const BUFSIZE: usize = 4;
/// Longest command in bytes, after comments are stripped.
pub const MAX_CMD_SIZE: usize = 96;

pub type Command = String<MAX_CMD_SIZE>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum QueueError {
    Full,
    LineTooLong,
    LineNumberMismatch { expected: u32, got: u32 },
    ChecksumMismatch { last_line: u32 },
    MissingChecksum { last_line: u32 },
}

impl fmt::Display for QueueError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueueError::Full => f.write_str("command queue full"),
            QueueError::LineTooLong => write!(f, "command longer than {} bytes", MAX_CMD_SIZE),
            QueueError::LineNumberMismatch { expected, got } => write!(
                f,
                "Line Number is not Last Line Number+1, Last Line: {} (got {})",
                expected.wrapping_sub(1),
                got
            ),
            QueueError::ChecksumMismatch { last_line } => {
                write!(f, "checksum mismatch, Last Line: {}", last_line)
            }
            QueueError::MissingChecksum { last_line } => {
                write!(f, "No Checksum with line number, Last Line: {}", last_line)
            }
        }
    }
}

/// Flow-control reply to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ack {
    pub line: Option<u32>,
    pub planner_free: usize,
    pub queue_free: usize,
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ok")?;
        if let Some(line) = self.line {
            write!(f, " N{}", line)?;
        }
        write!(f, " P{} B{}", self.planner_free, self.queue_free)
    }
}

#[derive(Debug, Clone)]
struct Entry {
    command: Command,
    line: Option<u32>,
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    commands: Deque<Entry, BUFSIZE>,
    last_line: u32,
}

impl CommandQueue {
    pub const fn new() -> Self {
        Self {
            commands: Deque::new(),
            last_line: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn free(&self) -> usize {
        BUFSIZE - self.commands.len()
    }

    /// Number of the last line accepted through
    /// [`enqueue_serial_line`](Self::enqueue_serial_line).
    pub fn last_line(&self) -> u32 {
        self.last_line
    }

    /// Expect `line + 1` next. Called when an `M110 N<line>` runs that did
    /// not come with a line number of its own.
    pub fn set_last_line(&mut self, line: u32) {
        self.last_line = line;
    }

    /// Queue a local command (no line number). Returns false when nothing
    /// but a comment or whitespace was given.
    pub fn enqueue(&mut self, line: &str) -> Result<bool, QueueError> {
        self.push(strip(line), None)
    }

    /// Queue a line from a host that may number its lines. Numbered lines
    /// must carry a checksum and follow the previous one, unless they are
    /// `M110`, which sets the line number.
    pub fn enqueue_serial_line(&mut self, raw: &str) -> Result<bool, QueueError> {
        let line = strip(raw);
        if !line.starts_with('N') {
            return self.push(line, None);
        }
        if self.commands.is_full() {
            return Err(QueueError::Full);
        }

        let m110 = line.contains("M110");
        let number_at = if m110 {
            line.get(4..)
                .and_then(|rest| rest.find('N'))
                .map_or(0, |i| i + 4)
        } else {
            0
        };
        let number = leading_number(&line[number_at + 1..]).unwrap_or(0);
        let expected = self.last_line.wrapping_add(1);
        if number != expected && !m110 {
            warn!("line {} out of sequence, expected {}", number, expected);
            return Err(QueueError::LineNumberMismatch {
                expected,
                got: number,
            });
        }

        let Some(star) = line.rfind('*') else {
            return Err(QueueError::MissingChecksum {
                last_line: self.last_line,
            });
        };
        let sum = line.as_bytes()[..star].iter().fold(0u8, |acc, b| acc ^ b);
        if leading_number(line[star + 1..].trim()) != Some(sum as u32) {
            return Err(QueueError::ChecksumMismatch {
                last_line: self.last_line,
            });
        }

        // body without the line number and checksum
        let body = line[..star]
            .trim_start_matches('N')
            .trim_start_matches(|c: char| c.is_ascii_digit() || c == '-')
            .trim();
        let queued = self.push(body, Some(number))?;
        self.last_line = number;
        Ok(queued)
    }

    /// The oldest command, next to be executed.
    pub fn front(&self) -> Option<&str> {
        self.commands.front().map(|e| e.command.as_str())
    }

    /// Retire the oldest command once it has run, with the reply for the
    /// host. `planner_free` is the room left in the planner ring.
    pub fn pop(&mut self, planner_free: usize) -> Option<(Command, Ack)> {
        let entry = self.commands.pop_front()?;
        let ack = Ack {
            line: entry.line,
            planner_free,
            queue_free: self.free(),
        };
        Some((entry.command, ack))
    }

    pub fn clear(&mut self) {
        self.commands.clear();
    }

    fn push(&mut self, command: &str, line: Option<u32>) -> Result<bool, QueueError> {
        if command.is_empty() {
            return Ok(false);
        }
        if self.commands.is_full() {
            return Err(QueueError::Full);
        }
        let mut text = Command::new();
        text.push_str(command)
            .map_err(|_| QueueError::LineTooLong)?;
        self.commands
            .push_back(Entry {
                command: text,
                line,
            })
            .map_err(|_| QueueError::Full)?;
        Ok(true)
    }
}

fn strip(line: &str) -> &str {
    line.split(';').next().unwrap_or("").trim()
}

fn leading_number(s: &str) -> Option<u32> {
    let end = s
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(s.len());
    s[..end].parse().ok()
}
