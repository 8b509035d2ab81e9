// SPDX-License-Identifier: GPL-3.0-only
//! Per-display state machine
//!
//! ```text
//! INIT -> SET_BRIGHTNESS -> SET_CONTRAST -> SET_BLUE -> DONE
//!              |                 |              |
//!              +-----------------+--------------+--> FAILED
//! ```
//!
//! Stages run strictly in order. The first stage that exhausts its attempts
//! ends the machine in `FAILED` and the remaining stages are not attempted.

use std::fmt;
use std::time::Duration;

use serde::{Serialize, Serializer};
use serde_json::Value;

use super::Targets;
use super::stage::{ActionResult, RetryPolicy, Stage, StageExecutor, StageOutcome};
use crate::helper::DisplayDescriptor;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    Init,
    SetBrightness,
    SetContrast,
    SetBlue,
    Done,
    Failed,
}

impl DisplayState {
    pub fn as_str(self) -> &'static str {
        match self {
            DisplayState::Init => "init",
            DisplayState::SetBrightness => "set_brightness",
            DisplayState::SetContrast => "set_contrast",
            DisplayState::SetBlue => "set_blue",
            DisplayState::Done => "done",
            DisplayState::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DisplayState::Done | DisplayState::Failed)
    }
}

impl fmt::Display for DisplayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Append-only record of the states a display went through
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StateTrace(Vec<DisplayState>);

impl StateTrace {
    pub const DELIMITER: char = '>';

    pub fn push(&mut self, state: DisplayState) {
        self.0.push(state);
    }
}

impl fmt::Display for StateTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, state) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "{}", Self::DELIMITER)?;
            }
            f.write_str(state.as_str())?;
        }
        Ok(())
    }
}

impl Serialize for StateTrace {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Everything known about one display after (or during) a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayResult {
    pub bus: i64,
    pub serial: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub ok: bool,
    pub state: DisplayState,
    /// Field name of the stage that failed, empty otherwise
    pub failed_step: String,
    pub state_trace: StateTrace,
    pub brightness: ActionResult,
    pub contrast: ActionResult,
    pub blue: ActionResult,
}

impl DisplayResult {
    fn new(display: &DisplayDescriptor, targets: &Targets) -> Self {
        let mut state_trace = StateTrace::default();
        state_trace.push(DisplayState::Init);

        Self {
            bus: display.bus,
            serial: display.serial.clone(),
            model: display.model.clone(),
            ok: false,
            state: DisplayState::Init,
            failed_step: String::new(),
            state_trace,
            brightness: ActionResult::new(targets.brightness),
            contrast: ActionResult::new(targets.contrast),
            blue: ActionResult::new(targets.blue),
        }
    }

    fn action_mut(&mut self, stage: Stage) -> &mut ActionResult {
        match stage {
            Stage::Brightness => &mut self.brightness,
            Stage::Contrast => &mut self.contrast,
            Stage::Blue => &mut self.blue,
        }
    }

    fn enter(&mut self, state: DisplayState) {
        self.state = state;
        self.state_trace.push(state);
    }
}

/// What the machine needs next
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisplayStep {
    /// Run the helper with these arguments and report the payload
    Invoke(Vec<String>),
    /// Wait this long, then call [`DisplayStateMachine::on_retry_elapsed`]
    Wait(Duration),
    /// The machine reached `DONE` or `FAILED`
    Finished,
}

/// Applies a target triple to one display
#[derive(Debug)]
pub struct DisplayStateMachine {
    targets: Targets,
    policy: RetryPolicy,
    result: DisplayResult,
    stage_index: usize,
    current: Option<StageExecutor>,
}

impl DisplayStateMachine {
    pub fn new(display: &DisplayDescriptor, targets: Targets, policy: RetryPolicy) -> Self {
        Self {
            result: DisplayResult::new(display, &targets),
            targets,
            policy,
            stage_index: 0,
            current: None,
        }
    }

    #[cfg(test)]
    pub fn result(&self) -> &DisplayResult {
        &self.result
    }

    pub fn into_result(self) -> DisplayResult {
        self.result
    }

    pub fn is_finished(&self) -> bool {
        self.result.state.is_terminal()
    }

    /// Leave `INIT` and issue the first brightness attempt
    pub fn start(&mut self) -> DisplayStep {
        if self.is_finished() {
            return DisplayStep::Finished;
        }
        self.enter_stage()
    }

    /// Feed the answer to the attempt issued last
    pub fn on_response(&mut self, payload: Option<&Value>) -> DisplayStep {
        let Some(executor) = self.current.as_mut() else {
            return self.start();
        };

        let stage = executor.stage();
        let outcome = executor.on_response(payload);
        *self.result.action_mut(stage) = *executor.result();

        match outcome {
            StageOutcome::Succeeded => {
                self.current = None;
                self.stage_index += 1;
                self.enter_stage()
            }
            StageOutcome::RetryAfter(delay) => DisplayStep::Wait(delay),
            StageOutcome::Failed => {
                self.current = None;
                self.result.failed_step = stage.field().to_string();
                self.result.enter(DisplayState::Failed);
                DisplayStep::Finished
            }
        }
    }

    /// The retry delay of the current stage has passed
    pub fn on_retry_elapsed(&mut self) -> DisplayStep {
        match self.current.as_mut() {
            Some(executor) => {
                let args = executor.next_attempt();
                self.result.action_mut(executor.stage()).attempts = executor.result().attempts;
                DisplayStep::Invoke(args)
            }
            None => self.start(),
        }
    }

    fn enter_stage(&mut self) -> DisplayStep {
        let Some(&stage) = Stage::ALL.get(self.stage_index) else {
            self.result.ok = true;
            self.result.enter(DisplayState::Done);
            return DisplayStep::Finished;
        };

        self.result.enter(stage.state());
        let mut executor =
            StageExecutor::new(self.result.bus, stage, stage.target(&self.targets), self.policy);
        let args = executor.next_attempt();
        self.result.action_mut(stage).attempts = executor.result().attempts;
        self.current = Some(executor);
        DisplayStep::Invoke(args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::helper::mock::confirm;
    use serde_json::json;

    fn machine() -> DisplayStateMachine {
        DisplayStateMachine::new(
            &DisplayDescriptor::new(1, "SN1"),
            Targets::new(80, 60, 30),
            RetryPolicy::default(),
        )
    }

    /// Run the machine against `answer`, skipping waits
    fn drive(
        machine: &mut DisplayStateMachine,
        answer: impl Fn(&[String]) -> Option<Value>,
    ) -> Vec<Vec<String>> {
        let mut calls = Vec::new();
        let mut step = machine.start();
        loop {
            step = match step {
                DisplayStep::Invoke(args) => {
                    let payload = answer(&args);
                    calls.push(args);
                    machine.on_response(payload.as_ref())
                }
                DisplayStep::Wait(_) => machine.on_retry_elapsed(),
                DisplayStep::Finished => return calls,
            };
        }
    }

    #[test]
    fn test_full_success() {
        let mut machine = machine();
        let calls = drive(&mut machine, |args| Some(confirm(&args[0], &args[2])));

        assert_eq!(
            calls,
            vec![
                vec!["set-bus", "1", "80"],
                vec!["set-contrast-bus", "1", "60"],
                vec!["set-blue-bus", "1", "30"],
            ]
        );
        let result = machine.into_result();
        assert!(result.ok);
        assert_eq!(result.state, DisplayState::Done);
        assert_eq!(result.failed_step, "");
        assert_eq!(
            result.state_trace.to_string(),
            "init>set_brightness>set_contrast>set_blue>done"
        );
        for action in [result.brightness, result.contrast, result.blue] {
            assert!(action.ok);
            assert_eq!(action.attempts, 1);
            assert_eq!(action.value, i64::from(action.target));
        }
    }

    #[test]
    fn test_brightness_failure_halts_machine() {
        let mut machine = machine();
        let calls = drive(&mut machine, |_| None);

        assert_eq!(calls.len(), 5);
        assert!(calls.iter().all(|args| args[0] == "set-bus"));

        let result = machine.into_result();
        assert!(!result.ok);
        assert_eq!(result.state, DisplayState::Failed);
        assert_eq!(result.failed_step, "brightness");
        assert_eq!(result.state_trace.to_string(), "init>set_brightness>failed");
        assert_eq!(result.brightness.attempts, 5);
        assert_eq!(result.contrast.attempts, 0);
        assert_eq!(result.blue, ActionResult::new(30));
    }

    #[test]
    fn test_blue_failure_after_retries() {
        let mut machine = machine();
        drive(&mut machine, |args| match args[0].as_str() {
            "set-blue-bus" => Some(json!({"ok": true, "blue": 29})),
            command => Some(confirm(command, &args[2])),
        });

        let result = machine.into_result();
        assert_eq!(result.failed_step, "blue");
        assert_eq!(
            result.state_trace.to_string(),
            "init>set_brightness>set_contrast>set_blue>failed"
        );
        assert!(result.brightness.ok && result.contrast.ok);
        assert_eq!(result.blue.value, 29);
        assert_eq!(result.blue.attempts, 5);
    }

    #[test]
    fn test_retry_then_success_waits_between_attempts() {
        let mut machine = machine();
        assert_eq!(
            machine.start(),
            DisplayStep::Invoke(vec!["set-bus".into(), "1".into(), "80".into()])
        );
        assert_eq!(
            machine.on_response(None),
            DisplayStep::Wait(Duration::from_millis(2000))
        );
        assert_eq!(machine.result().brightness.attempts, 1);

        assert!(matches!(machine.on_retry_elapsed(), DisplayStep::Invoke(_)));
        assert_eq!(machine.result().brightness.attempts, 2);

        let next = machine.on_response(Some(&json!({"ok": true, "brightness": 80})));
        assert_eq!(
            next,
            DisplayStep::Invoke(vec!["set-contrast-bus".into(), "1".into(), "60".into()])
        );
        assert_eq!(machine.result().state, DisplayState::SetContrast);
    }

    #[test]
    fn test_result_serializes_for_logs() {
        let mut machine = machine();
        drive(&mut machine, |_| None);
        let value = serde_json::to_value(machine.result()).unwrap();

        assert_eq!(value["state"], "failed");
        assert_eq!(value["failedStep"], "brightness");
        assert_eq!(value["stateTrace"], "init>set_brightness>failed");
        assert_eq!(value["brightness"]["attempts"], 5);
        assert_eq!(value["contrast"]["value"], -1);
        assert!(value.get("model").is_none());
    }
}
