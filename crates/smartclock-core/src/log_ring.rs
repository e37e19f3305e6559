//! Bounded in-memory copy of the most recent log lines.

use core::fmt::{self, Write};

use heapless::{Deque, String};

pub const LOG_LINES: usize = 50;
/// Per-line budget including the terminator slot of the wire format.
pub const LOG_LINE_BYTES: usize = 128;

pub type LogLine = String<{ LOG_LINE_BYTES - 1 }>;

pub struct LogRing {
    lines: Deque<LogLine, LOG_LINES>,
}

impl LogRing {
    pub const fn new() -> Self {
        Self {
            lines: Deque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Appends one line, evicting the oldest when full. Overlong text is cut.
    pub fn push(&mut self, line: &str) {
        let mut entry = LogLine::new();
        let _ = Truncating(&mut entry).write_str(line);
        self.store(entry);
    }

    pub fn push_fmt(&mut self, args: fmt::Arguments<'_>) {
        let mut entry = LogLine::new();
        let _ = Truncating(&mut entry).write_fmt(args);
        self.store(entry);
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(|line| line.as_str())
    }

    /// Oldest first, one line per `\n`.
    pub fn write_to<W: Write>(&self, out: &mut W) -> fmt::Result {
        for line in self.iter() {
            out.write_str(line)?;
            out.write_char('\n')?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.lines.clear();
    }

    fn store(&mut self, entry: LogLine) {
        if self.lines.is_full() {
            self.lines.pop_front();
        }
        let _ = self.lines.push_back(entry);
    }
}

impl Default for LogRing {
    fn default() -> Self {
        Self::new()
    }
}

/// Writes what fits and silently drops the rest.
struct Truncating<'a>(&'a mut LogLine);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for ch in s.chars() {
            if self.0.push(ch).is_err() {
                break;
            }
        }
        Ok(())
    }
}
