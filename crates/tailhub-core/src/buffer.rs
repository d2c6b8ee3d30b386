//! Bounded line buffer backing every tracked log.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// Default number of lines kept per log.
pub const DEFAULT_BUFFER_LINES: usize = 10_000;

/// One buffered line.
///
/// `seq` is the 1-based count of lines received since tracking began. It
/// keeps increasing across evictions and clears, so it doubles as a stable
/// position for search results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogLine {
    pub seq: u64,
    pub text: String,
}

/// FIFO ring of the most recent lines of a log.
///
/// Eviction is by line count, oldest first. Lines are never reordered.
#[derive(Debug, Clone)]
pub struct LineBuffer {
    lines: VecDeque<LogLine>,
    capacity: usize,
    next_seq: u64,
}

impl LineBuffer {
    /// Creates an empty buffer. A zero capacity is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            lines: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            next_seq: 1,
        }
    }

    /// Appends a line, evicting the oldest one when full.
    ///
    /// Returns the stored line.
    pub fn push(&mut self, text: String) -> LogLine {
        if self.lines.len() >= self.capacity {
            self.lines.pop_front();
        }
        let line = LogLine {
            seq: self.next_seq,
            text,
        };
        self.next_seq = self.next_seq.saturating_add(1);
        self.lines.push_back(line.clone());
        line
    }

    /// Returns up to the `n` most recent lines in write order.
    pub fn tail(&self, n: usize) -> Vec<LogLine> {
        let skip = self.lines.len().saturating_sub(n);
        self.lines.iter().skip(skip).cloned().collect()
    }

    /// Iterates buffered lines oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &LogLine> {
        self.lines.iter()
    }

    /// Drops all buffered lines. Sequence numbering continues.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Total lines ever pushed, including evicted and cleared ones.
    pub fn total_received(&self) -> u64 {
        self.next_seq.saturating_sub(1)
    }
}

impl Default for LineBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_BUFFER_LINES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(lines: &[LogLine]) -> Vec<&str> {
        lines.iter().map(|l| l.text.as_str()).collect()
    }

    #[test]
    fn test_tail_returns_last_min_n_total() {
        for total in 0..12usize {
            let mut buffer = LineBuffer::new(100);
            for i in 0..total {
                buffer.push(format!("l{i}"));
            }
            for n in 0..15usize {
                let tail = buffer.tail(n);
                let expected: Vec<String> =
                    (total.saturating_sub(n)..total).map(|i| format!("l{i}")).collect();
                assert_eq!(
                    tail.iter().map(|l| l.text.clone()).collect::<Vec<_>>(),
                    expected,
                    "total={total} n={n}"
                );
            }
        }
    }

    #[test]
    fn test_eviction_keeps_most_recent_capacity_lines() {
        let mut buffer = LineBuffer::new(3);
        for i in 1..=7 {
            buffer.push(format!("l{i}"));
        }
        assert_eq!(buffer.len(), 3);
        assert_eq!(texts(&buffer.tail(10)), vec!["l5", "l6", "l7"]);
        assert_eq!(buffer.total_received(), 7);
    }

    #[test]
    fn test_seq_is_monotonic_across_eviction_and_clear() {
        let mut buffer = LineBuffer::new(2);
        assert_eq!(buffer.push("a".into()).seq, 1);
        assert_eq!(buffer.push("b".into()).seq, 2);
        assert_eq!(buffer.push("c".into()).seq, 3);
        buffer.clear();
        assert!(buffer.is_empty());
        assert_eq!(buffer.push("d".into()).seq, 4);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let mut buffer = LineBuffer::new(0);
        buffer.push("only".into());
        buffer.push("latest".into());
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(texts(&buffer.tail(5)), vec!["latest"]);
    }
}
