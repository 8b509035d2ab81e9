// SPDX-License-Identifier: GPL-3.0-only
//! Run-level orchestration
//!
//! [`ApplyOrchestrator`] owns the run token, the busy flag and the state of
//! the current run. It never performs I/O itself: every [`Event`] is turned
//! into at most one [`Effect`] for the runner to execute, and the runner
//! reports the effect's completion back as another event stamped with the
//! run it belongs to.
//!
//! Displays are processed one after another in detection order. They share
//! one control bus, so the next display only starts once the previous one
//! reached `DONE` or `FAILED`.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;

use super::Targets;
use super::display::{DisplayResult, DisplayStateMachine, DisplayStep};
use super::stage::RetryPolicy;
use super::token::{RunId, RunToken};
use crate::helper::{DisplayDescriptor, parse_detect};

/// Inputs to the orchestrator
///
/// New runs are started through [`ApplyOrchestrator::begin`], which also
/// hands out the run id.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
    /// `detect` finished
    Detected { run: RunId, payload: Option<Value> },
    /// A `set-*` command finished
    Responded { run: RunId, payload: Option<Value> },
    /// A retry delay elapsed
    RetryElapsed { run: RunId },
    /// Invalidate the current run
    Cancel,
}

/// Work the runner has to carry out
#[derive(Clone, Debug, PartialEq)]
pub enum Effect {
    /// Run `detect`, answer with [`Event::Detected`]
    Detect { run: RunId },
    /// Run the helper with `args`, answer with [`Event::Responded`]
    Invoke { run: RunId, args: Vec<String> },
    /// Wait, then answer with [`Event::RetryElapsed`]
    Sleep { run: RunId, delay: Duration },
    /// The run finished; publish the report
    Complete(ApplyReport),
}

/// Aggregate outcome of one run
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyReport {
    pub run: RunId,
    pub all_ok: bool,
    /// `true` when `detect` did not return a display list
    pub detection_failed: bool,
    pub displays: Vec<DisplayResult>,
}

impl ApplyReport {
    pub fn failed_displays(&self) -> impl Iterator<Item = &DisplayResult> {
        self.displays.iter().filter(|d| !d.ok)
    }
}

#[derive(Debug)]
struct ActiveRun {
    id: RunId,
    targets: Targets,
    pending: VecDeque<DisplayDescriptor>,
    machine: Option<DisplayStateMachine>,
    results: Vec<DisplayResult>,
    all_ok: bool,
}

#[derive(Debug, Default)]
pub struct ApplyOrchestrator {
    token: RunToken,
    busy: bool,
    policy: RetryPolicy,
    run: Option<ActiveRun>,
}

impl ApplyOrchestrator {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    pub fn is_current(&self, run: RunId) -> bool {
        self.token.is_current(run)
    }

    pub fn current_run(&self) -> RunId {
        self.token.current()
    }

    /// Start a run towards `targets` and return the effect that kicks it off
    ///
    /// The targets are a snapshot: later changes to the settings do not
    /// affect this run.
    pub fn begin(&mut self, targets: Targets) -> (RunId, Effect) {
        let id = self.token.begin();
        if let Some(previous) = self.run.take() {
            info!(
                "Run {} superseded by {} ({} display(s) finished)",
                previous.id,
                id,
                previous.results.len()
            );
        }

        info!(
            run = %id,
            brightness = targets.brightness,
            contrast = targets.contrast,
            blue = targets.blue,
            "Starting apply run"
        );

        self.busy = true;
        self.run = Some(ActiveRun {
            id,
            targets,
            pending: VecDeque::new(),
            machine: None,
            results: Vec::new(),
            all_ok: true,
        });
        (id, Effect::Detect { run: id })
    }

    /// Invalidate the current run; its pending continuations become no-ops
    pub fn cancel(&mut self) {
        self.token.cancel();
        if let Some(run) = self.run.take() {
            info!("Run {} cancelled", run.id);
        }
        self.busy = false;
    }

    /// Advance the state machine by one event
    pub fn handle(&mut self, event: Event) -> Option<Effect> {
        match event {
            Event::Cancel => {
                self.cancel();
                None
            }
            Event::Detected { run, payload } => {
                self.active(run)?;
                self.on_detected(payload.as_ref())
            }
            Event::Responded { run, payload } => {
                let machine = self.active(run)?.machine.as_mut()?;
                let step = machine.on_response(payload.as_ref());
                self.on_step(step)
            }
            Event::RetryElapsed { run } => {
                let machine = self.active(run)?.machine.as_mut()?;
                let step = machine.on_retry_elapsed();
                self.on_step(step)
            }
        }
    }

    /// The run `run` if it is still current
    fn active(&mut self, run: RunId) -> Option<&mut ActiveRun> {
        if !self.token.is_current(run) {
            trace!("Dropping continuation of stale run {}", run);
            return None;
        }
        self.run.as_mut().filter(|active| active.id == run)
    }

    fn on_detected(&mut self, payload: Option<&Value>) -> Option<Effect> {
        let Some(displays) = payload.and_then(parse_detect) else {
            error!("Display detection failed, aborting run");
            return self.finish(false, true);
        };

        if displays.is_empty() {
            info!("No displays detected, nothing to apply");
            return self.finish(true, false);
        }

        info!("Detected {} display(s)", displays.len());
        if let Some(run) = self.run.as_mut() {
            run.pending = displays.into();
        }
        self.next_display()
    }

    fn on_step(&mut self, step: DisplayStep) -> Option<Effect> {
        let run = self.run.as_mut()?;
        match step {
            DisplayStep::Invoke(args) => Some(Effect::Invoke { run: run.id, args }),
            DisplayStep::Wait(delay) => Some(Effect::Sleep { run: run.id, delay }),
            DisplayStep::Finished => {
                if let Some(machine) = run.machine.take() {
                    let result = machine.into_result();
                    if result.ok {
                        info!(bus = result.bus, serial = %result.serial, "Display applied");
                    } else {
                        run.all_ok = false;
                        error!(
                            run = %run.id,
                            "Display apply failed: {}",
                            serde_json::to_string(&result).unwrap_or_default()
                        );
                    }
                    run.results.push(result);
                }
                self.next_display()
            }
        }
    }

    fn next_display(&mut self) -> Option<Effect> {
        let run = self.run.as_mut()?;
        let Some(descriptor) = run.pending.pop_front() else {
            let all_ok = run.all_ok;
            return self.finish(all_ok, false);
        };

        debug!(bus = descriptor.bus, serial = %descriptor.serial, "Processing display");
        let mut machine = DisplayStateMachine::new(&descriptor, run.targets, self.policy);
        let step = machine.start();
        run.machine = Some(machine);
        self.on_step(step)
    }

    fn finish(&mut self, all_ok: bool, detection_failed: bool) -> Option<Effect> {
        let run = self.run.take()?;
        self.busy = false;

        if !all_ok {
            error!("Apply run {} finished with failures", run.id);
        } else {
            info!("Apply run {} finished ({} display(s))", run.id, run.results.len());
        }

        Some(Effect::Complete(ApplyReport {
            run: run.id,
            all_ok,
            detection_failed,
            displays: run.results,
        }))
    }
}
