// SPDX-License-Identifier: GPL-3.0-only
//! Scripted helper for testing
//!
//! Answers every invocation through a closure and records the argument
//! lists it was called with, so tests can drive the orchestrator without a
//! real helper binary or monitors.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::{Value, json};

use super::HelperInvoker;

type Script = dyn Fn(&[String]) -> Option<Value> + Send + Sync;

/// A helper whose answers come from a closure
#[derive(Clone)]
pub struct ScriptedInvoker {
    script: Arc<Script>,
    calls: Arc<Mutex<Vec<Vec<String>>>>,
    latency: Duration,
}

impl ScriptedInvoker {
    pub fn new(script: impl Fn(&[String]) -> Option<Value> + Send + Sync + 'static) -> Self {
        Self {
            script: Arc::new(script),
            calls: Arc::new(Mutex::new(Vec::new())),
            latency: Duration::ZERO,
        }
    }

    /// Helper that reports `displays` and confirms every `set-*` request
    pub fn confirming(displays: Value) -> Self {
        Self::new(move |args| match args[0].as_str() {
            "detect" => Some(displays.clone()),
            command => Some(confirm(command, &args[2])),
        })
    }

    /// Delay every answer by `latency` (use with paused tokio time)
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Every argument list received so far
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of invocations whose first argument is `command`
    pub fn count(&self, command: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args[0] == command)
            .count()
    }

    /// Number of invocations of `command` addressed to `bus`
    pub fn count_for_bus(&self, command: &str, bus: i64) -> usize {
        let bus = bus.to_string();
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|args| args[0] == command && args.get(1) == Some(&bus))
            .count()
    }
}

impl HelperInvoker for ScriptedInvoker {
    fn invoke(&self, args: Vec<String>) -> BoxFuture<'static, Option<Value>> {
        self.calls.lock().unwrap().push(args.clone());
        let answer = (self.script)(&args);
        let latency = self.latency;
        Box::pin(async move {
            if !latency.is_zero() {
                tokio::time::sleep(latency).await;
            }
            answer
        })
    }
}

/// The payload a healthy helper prints for `command <bus> <value>`
pub fn confirm(command: &str, value: &str) -> Value {
    let value: i64 = value.parse().unwrap();
    match command {
        "set-bus" => json!({"ok": true, "brightness": value}),
        "set-contrast-bus" => json!({"ok": true, "contrast": value}),
        "set-blue-bus" => json!({"ok": true, "blue": value}),
        other => panic!("unexpected helper command {other}"),
    }
}
