//! Command history tracking and repeated-command abuse detection.
//!
//! Grounded in `original_source/.../command.c`'s `cmd_runtime` history array and its abuse check:
//! the original keeps a fixed-size ring of recently issued commands and, once the same command
//! shows up enough times in a row, sends back a mocking reply instead of executing it again. The
//! 1024-entry cap and the 5-in-a-row threshold both come from the original's constants.
use rand::seq::SliceRandom;
use std::collections::VecDeque;

/// Maximum number of commands retained in history.
pub const HISTORY_CAPACITY: usize = 1024;

/// How many of the most recent commands are inspected for repetition.
const REPEAT_WINDOW: usize = 5;

/// Number of identical commands within the window that counts as abuse.
const REPEAT_THRESHOLD: usize = 5;

/// Stock responses sent back when repeated-command abuse is detected, picked at random so the
/// same reproach doesn't appear every time (matching the original's randomized message table).
const REPROACH_MESSAGES: &[&str] = &[
    "you've made your point",
    "yes, still the same answer",
    "try something else",
];

/// Ring buffer of recently issued command strings.
#[derive(Debug, Default)]
pub struct CommandHistory {
    entries: VecDeque<String>,
}

impl CommandHistory {
    pub fn new() -> Self {
        CommandHistory {
            entries: VecDeque::with_capacity(HISTORY_CAPACITY),
        }
    }

    /// Record a command, evicting the oldest entry if at capacity.
    pub fn push(&mut self, command: &str) {
        if self.entries.len() >= HISTORY_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back(command.to_string());
    }

    /// Whether the last `REPEAT_WINDOW` entries are all equal to `command` and number at least
    /// `REPEAT_THRESHOLD` (i.e. the window is full of nothing but this command).
    pub fn is_abusive_repeat(&self, command: &str) -> bool {
        if self.entries.len() < REPEAT_WINDOW {
            return false;
        }
        let tail: Vec<&String> = self.entries.iter().rev().take(REPEAT_WINDOW).collect();
        let matching = tail.iter().filter(|c| c.as_str() == command).count();
        matching >= REPEAT_THRESHOLD
    }

    /// Pick a randomized reproach message for an abusive repeat.
    pub fn reproach<R: rand::Rng>(&self, rng: &mut R) -> &'static str {
        REPROACH_MESSAGES.choose(rng).copied().unwrap_or(REPROACH_MESSAGES[0])
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::rngs::mock::StepRng;

    #[test]
    fn caps_at_capacity() {
        let mut h = CommandHistory::new();
        for i in 0..HISTORY_CAPACITY + 10 {
            h.push(&format!("cmd{i}"));
        }
        assert_eq!(h.len(), HISTORY_CAPACITY);
    }

    #[test]
    fn detects_five_in_a_row() {
        let mut h = CommandHistory::new();
        for _ in 0..4 {
            h.push("status");
        }
        assert!(!h.is_abusive_repeat("status"));
        h.push("status");
        assert!(h.is_abusive_repeat("status"));
    }

    #[test]
    fn does_not_flag_mixed_window() {
        let mut h = CommandHistory::new();
        h.push("status");
        h.push("status");
        h.push("reboot");
        h.push("status");
        h.push("status");
        assert!(!h.is_abusive_repeat("status"));
    }

    #[test]
    fn reproach_picks_a_known_message() {
        let h = CommandHistory::new();
        let mut rng = StepRng::new(0, 1);
        assert!(REPROACH_MESSAGES.contains(&h.reproach(&mut rng)));
    }
}
