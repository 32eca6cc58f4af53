//! Partial-success accounting shared by every report.
//!
//! Restore and merge routinely finish with some files missing. Reports carry
//! explicit counts so callers can tell "7 of 10" from "all" or "none".

use std::fmt;

pub use crate::storage::FileFailure;

/// How much of an operation's expected work was done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Everything expected was done (including "nothing was expected").
    Complete,
    /// Some but not all.
    Partial,
    /// Work was expected and none of it happened.
    Nothing,
}

/// Completed versus expected count.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Tally {
    pub completed: usize,
    pub expected: usize,
}

impl Tally {
    pub fn new(completed: usize, expected: usize) -> Self {
        Self {
            completed,
            expected,
        }
    }

    /// Records one expected item that was completed.
    pub fn hit(&mut self) {
        self.completed += 1;
        self.expected += 1;
    }

    /// Records one expected item that was not.
    pub fn miss(&mut self) {
        self.expected += 1;
    }

    pub fn missing(&self) -> usize {
        self.expected.saturating_sub(self.completed)
    }

    pub fn completion(&self) -> Completion {
        if self.completed >= self.expected {
            Completion::Complete
        } else if self.completed == 0 {
            Completion::Nothing
        } else {
            Completion::Partial
        }
    }

    pub fn combine(self, other: Tally) -> Tally {
        Tally {
            completed: self.completed + other.completed,
            expected: self.expected + other.expected,
        }
    }
}

impl fmt::Display for Tally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.completed, self.expected)
    }
}
