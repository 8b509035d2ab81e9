// SPDX-License-Identifier: GPL-3.0-only
//! Run identity and cooperative cancellation
//!
//! Every apply run is stamped with a [`RunId`]. Continuations (helper exits,
//! retry timers) carry the id they were scheduled under and are dropped when
//! it no longer matches [`RunToken::current`].

use std::fmt;

use serde::Serialize;

/// Identifier of one apply run
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct RunId(u64);

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Monotonic counter deciding which run is current
#[derive(Debug, Default)]
pub struct RunToken {
    counter: u64,
}

impl RunToken {
    /// Start a new run. The returned id becomes the only current one.
    pub fn begin(&mut self) -> RunId {
        self.counter += 1;
        RunId(self.counter)
    }

    /// Whether `run` is still the current run
    pub fn is_current(&self, run: RunId) -> bool {
        run.0 == self.counter
    }

    /// Invalidate every id handed out so far
    pub fn cancel(&mut self) {
        self.counter += 1;
    }

    pub fn current(&self) -> RunId {
        RunId(self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_supersedes_previous_run() {
        let mut token = RunToken::default();
        let first = token.begin();
        assert!(token.is_current(first));

        let second = token.begin();
        assert!(second > first);
        assert!(!token.is_current(first));
        assert!(token.is_current(second));
    }

    #[test]
    fn test_cancel_invalidates_current_run() {
        let mut token = RunToken::default();
        let run = token.begin();
        token.cancel();
        assert!(!token.is_current(run));

        // A run started after cancellation is current again
        let next = token.begin();
        assert!(token.is_current(next));
        assert_ne!(next, run);
    }
}
