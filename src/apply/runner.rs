// SPDX-License-Identifier: GPL-3.0-only
//! Event loop around [`ApplyOrchestrator`]
//!
//! One task owns the orchestrator and handles events strictly one at a
//! time. Helper invocations and retry timers run as separate tasks that post
//! their completion back into the loop, stamped with the run that scheduled
//! them. A superseded run's in-flight helper process is left to finish; its
//! answer is simply dropped by the token check.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot, watch};

use super::Targets;
use super::orchestrator::{ApplyOrchestrator, ApplyReport, Effect, Event};
use super::stage::RetryPolicy;
use super::token::RunId;
use crate::error::{AppError, Result};
use crate::helper::{Command, HelperInvoker};

enum Message {
    Apply(Targets, oneshot::Sender<RunId>),
    Event(Event),
    Shutdown,
}

/// Handle to the apply event loop
///
/// Dropping the handle tears the loop down: the current run is invalidated
/// and no further reports are published.
pub struct Applier {
    tx: mpsc::UnboundedSender<Message>,
    busy: watch::Receiver<bool>,
    current: watch::Receiver<RunId>,
    reports: broadcast::Sender<ApplyReport>,
}

impl Applier {
    /// Spawn the event loop on the current tokio runtime
    pub fn spawn(invoker: Arc<dyn HelperInvoker>, policy: RetryPolicy) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (busy_tx, busy) = watch::channel(false);
        let (current_tx, current) = watch::channel(RunId::default());
        let (reports, _) = broadcast::channel(16);

        let event_loop = EventLoop {
            orchestrator: ApplyOrchestrator::new(policy),
            invoker,
            tx: tx.clone(),
            busy: busy_tx,
            current: current_tx,
            reports: reports.clone(),
        };
        tokio::spawn(event_loop.run(rx));

        Self {
            tx,
            busy,
            current,
            reports,
        }
    }

    /// Start a new run towards `targets`
    ///
    /// A run in flight is superseded. Callers that want to avoid that check
    /// [`Applier::is_busy`] first.
    pub async fn apply(&self, targets: Targets) -> Result<RunId> {
        let (reply, run) = oneshot::channel();
        self.tx
            .send(Message::Apply(targets, reply))
            .map_err(|_| AppError::ApplierGone)?;
        run.await.map_err(|_| AppError::ApplierGone)
    }

    /// Start a run and wait for its report
    ///
    /// Fails with [`AppError::Superseded`] if another run starts before this
    /// one finished.
    pub async fn apply_and_wait(&self, targets: Targets) -> Result<ApplyReport> {
        let mut reports = self.reports.subscribe();
        let mut current = self.current.clone();
        current.mark_unchanged();
        let run = self.apply(targets).await?;

        loop {
            tokio::select! {
                report = reports.recv() => match report {
                    Ok(report) if report.run == run => return Ok(report),
                    Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return Err(AppError::ApplierGone),
                },
                changed = current.changed() => {
                    if changed.is_err() {
                        return Err(AppError::ApplierGone);
                    }
                    if *current.borrow_and_update() != run {
                        return Err(AppError::Superseded(run));
                    }
                }
            }
        }
    }

    /// Invalidate the current run without starting a new one
    pub fn cancel(&self) {
        let _ = self.tx.send(Message::Event(Event::Cancel));
    }

    pub fn is_busy(&self) -> bool {
        *self.busy.borrow()
    }

    /// Watch the busy flag
    pub fn busy(&self) -> watch::Receiver<bool> {
        self.busy.clone()
    }

    /// Receive the report of every run that completes while still current
    pub fn subscribe(&self) -> broadcast::Receiver<ApplyReport> {
        self.reports.subscribe()
    }
}

impl Drop for Applier {
    fn drop(&mut self) {
        let _ = self.tx.send(Message::Shutdown);
    }
}

struct EventLoop {
    orchestrator: ApplyOrchestrator,
    invoker: Arc<dyn HelperInvoker>,
    tx: mpsc::UnboundedSender<Message>,
    busy: watch::Sender<bool>,
    current: watch::Sender<RunId>,
    reports: broadcast::Sender<ApplyReport>,
}

impl EventLoop {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        debug!("Apply event loop started");

        while let Some(message) = rx.recv().await {
            let effect = match message {
                Message::Apply(targets, reply) => {
                    let (run, effect) = self.orchestrator.begin(targets);
                    // Callers checking `is_busy` right after `apply` must see the new run
                    self.publish_state();
                    let _ = reply.send(run);
                    Some(effect)
                }
                Message::Event(event) => self.orchestrator.handle(event),
                Message::Shutdown => break,
            };

            self.publish_state();
            if let Some(effect) = effect {
                self.execute(effect);
            }
        }

        self.orchestrator.cancel();
        self.publish_state();
        debug!("Apply event loop stopped");
    }

    fn publish_state(&self) {
        self.busy.send_if_modified(|busy| {
            let now = self.orchestrator.is_busy();
            std::mem::replace(busy, now) != now
        });
        self.current.send_if_modified(|current| {
            let now = self.orchestrator.current_run();
            std::mem::replace(current, now) != now
        });
    }

    fn execute(&self, effect: Effect) {
        match effect {
            Effect::Detect { run } => {
                let detect = self.invoker.invoke(Command::detect_args());
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let payload = detect.await;
                    let _ = tx.send(Message::Event(Event::Detected { run, payload }));
                });
            }
            Effect::Invoke { run, args } => {
                let invocation = self.invoker.invoke(args);
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let payload = invocation.await;
                    let _ = tx.send(Message::Event(Event::Responded { run, payload }));
                });
            }
            Effect::Sleep { run, delay } => {
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = tx.send(Message::Event(Event::RetryElapsed { run }));
                });
            }
            Effect::Complete(report) => {
                // Only the current run ever completes, but check again before publishing
                if self.orchestrator.is_current(report.run) {
                    let _ = self.reports.send(report);
                }
            }
        }
    }
}
