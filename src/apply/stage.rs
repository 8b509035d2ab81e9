// SPDX-License-Identifier: GPL-3.0-only
//! Per-stage retry logic
//!
//! A stage writes one setting (brightness, contrast or blue) to one display
//! and keeps trying until the helper confirms the exact target or the
//! attempt budget is spent. The executor is plain state: the caller asks for
//! the next argument list, runs it however it likes, and feeds the payload
//! back through [`StageExecutor::on_response`].

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::Targets;
use super::display::DisplayState;
use crate::helper::{Command, SetResponse};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(2000);

/// Fixed-delay retry policy shared by every stage
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            delay,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY)
    }
}

/// The three settings, in the order they are applied
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Brightness,
    Contrast,
    Blue,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::Brightness, Stage::Contrast, Stage::Blue];

    /// State the display machine is in while this stage runs
    pub fn state(self) -> DisplayState {
        match self {
            Stage::Brightness => DisplayState::SetBrightness,
            Stage::Contrast => DisplayState::SetContrast,
            Stage::Blue => DisplayState::SetBlue,
        }
    }

    pub fn command(self) -> Command {
        match self {
            Stage::Brightness => Command::SetBrightness,
            Stage::Contrast => Command::SetContrast,
            Stage::Blue => Command::SetBlue,
        }
    }

    /// Name of the field carrying the reading in the helper's answer
    pub fn field(self) -> &'static str {
        match self {
            Stage::Brightness => "brightness",
            Stage::Contrast => "contrast",
            Stage::Blue => "blue",
        }
    }

    /// Stage named by its field, as used for the custom sliders
    pub fn from_field(field: &str) -> Option<Self> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.field().eq_ignore_ascii_case(field.trim()))
    }

    pub fn target(self, targets: &Targets) -> u8 {
        match self {
            Stage::Brightness => targets.brightness,
            Stage::Contrast => targets.contrast,
            Stage::Blue => targets.blue,
        }
    }
}

/// Outcome of one stage on one display
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ActionResult {
    pub target: u8,
    /// Last reading reported by the helper, `-1` until one was parsed
    pub value: i64,
    pub attempts: u32,
    pub ok: bool,
}

impl ActionResult {
    pub const UNSET: i64 = -1;

    pub fn new(target: u8) -> Self {
        Self {
            target,
            value: Self::UNSET,
            attempts: 0,
            ok: false,
        }
    }
}

/// What to do after an attempt has been answered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    Succeeded,
    RetryAfter(Duration),
    Failed,
}

/// Drives one (display, stage) pair to convergence
#[derive(Debug)]
pub struct StageExecutor {
    bus: i64,
    stage: Stage,
    policy: RetryPolicy,
    result: ActionResult,
}

impl StageExecutor {
    pub fn new(bus: i64, stage: Stage, target: u8, policy: RetryPolicy) -> Self {
        Self {
            bus,
            stage,
            policy,
            result: ActionResult::new(target),
        }
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn result(&self) -> &ActionResult {
        &self.result
    }

    /// Count a new attempt and return the helper arguments for it
    ///
    /// The counter is bumped before the helper runs so the result reflects
    /// the attempts made even if the answer never arrives.
    pub fn next_attempt(&mut self) -> Vec<String> {
        self.result.attempts += 1;
        debug!(
            bus = self.bus,
            stage = self.stage.field(),
            target = self.result.target,
            "Attempt {}/{}",
            self.result.attempts,
            self.policy.max_attempts
        );
        self.stage.command().set_args(self.bus, self.result.target)
    }

    /// Record the helper's answer to the current attempt
    pub fn on_response(&mut self, payload: Option<&Value>) -> StageOutcome {
        let response = payload
            .map(|p| SetResponse::from_payload(p, self.stage.field()))
            .unwrap_or_default();

        if let Some(value) = response.value {
            self.result.value = value;
        }
        self.result.ok = response.confirms(self.result.target);

        if self.result.ok {
            return StageOutcome::Succeeded;
        }

        if self.result.attempts < self.policy.max_attempts {
            debug!(
                bus = self.bus,
                stage = self.stage.field(),
                reported = self.result.value,
                helper_ok = response.ok,
                "Attempt {} not confirmed, retrying in {:?}",
                self.result.attempts,
                self.policy.delay
            );
            StageOutcome::RetryAfter(self.policy.delay)
        } else {
            warn!(
                bus = self.bus,
                stage = self.stage.field(),
                target = self.result.target,
                reported = self.result.value,
                "Giving up after {} attempts",
                self.result.attempts
            );
            StageOutcome::Failed
        }
    }
}
