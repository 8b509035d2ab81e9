// SPDX-License-Identifier: GPL-3.0-only
//! Apply orchestration
//!
//! Brings every detected display to a target brightness/contrast/blue triple.
//!
//! # Architecture
//!
//! - [`token`]: run identity, used to discard continuations of superseded runs
//! - [`stage`]: one setting on one display, retried with a fixed delay
//! - [`display`]: the three stages of one display as a state machine
//! - [`orchestrator`]: detection, sequential fan-out and aggregation, written
//!   as a pure `(state, event) -> effect` transition function
//! - [`runner`]: the tokio task that executes effects and feeds their
//!   completions back as events
//!
//! All state lives in the runner task and is only touched while handling one
//! event at a time, so no locks are involved.

pub mod display;
pub mod orchestrator;
pub mod runner;
pub mod stage;
pub mod token;

use serde::{Deserialize, Serialize};

pub use orchestrator::ApplyReport;
pub use runner::Applier;
pub use stage::RetryPolicy;
pub use token::RunId;

pub const MAX_LEVEL: u8 = 100;

/// Brightness, contrast and blue level, each 0-100
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct Targets {
    pub brightness: u8,
    pub contrast: u8,
    pub blue: u8,
}

impl Targets {
    /// Build a triple, clamping every value to 0-100
    pub fn new(brightness: u8, contrast: u8, blue: u8) -> Self {
        Self {
            brightness: brightness.min(MAX_LEVEL),
            contrast: contrast.min(MAX_LEVEL),
            blue: blue.min(MAX_LEVEL),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_targets_are_clamped() {
        let targets = Targets::new(150, 100, 0);
        assert_eq!(
            targets,
            Targets {
                brightness: 100,
                contrast: 100,
                blue: 0
            }
        );
        assert_eq!(Targets::new(255, 101, 7), Targets::new(100, 100, 7));
    }
}
