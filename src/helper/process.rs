// SPDX-License-Identifier: GPL-3.0-only
//! Helper invocation through a child process
//!
//! One process per command. Only the first line of stdout is used, stderr is
//! discarded. A missing binary, an abnormal exit or unparsable output all
//! turn into a `None` payload.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

use super::HelperInvoker;

/// Runs the real helper binary
#[derive(Clone, Debug)]
pub struct ProcessInvoker {
    helper_path: PathBuf,
    timeout: Option<Duration>,
}

impl ProcessInvoker {
    /// Create an invoker for the helper at `helper_path`
    ///
    /// A bare program name is looked up in `PATH`.
    pub fn new(helper_path: impl Into<PathBuf>) -> Self {
        Self {
            helper_path: helper_path.into(),
            timeout: None,
        }
    }

    /// Bound every invocation by `timeout`, killing the child when it expires
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(helper_path: PathBuf, args: Vec<String>, timeout: Option<Duration>) -> Option<Value> {
        let invocation = read_first_line(&helper_path, &args);
        let line = match timeout {
            Some(limit) => match tokio::time::timeout(limit, invocation).await {
                Ok(line) => line,
                Err(_) => {
                    warn!(
                        helper = %helper_path.display(),
                        ?args,
                        "Helper did not finish within {:?}, killing it",
                        limit
                    );
                    None
                }
            },
            None => invocation.await,
        }?;

        parse_line(&line)
    }
}

impl HelperInvoker for ProcessInvoker {
    fn invoke(&self, args: Vec<String>) -> BoxFuture<'static, Option<Value>> {
        Box::pin(Self::run(self.helper_path.clone(), args, self.timeout))
    }
}

/// Spawn the helper, wait for it to exit and return its first stdout line
///
/// The child is killed if this future is dropped before it exits, which only
/// happens when a timeout is configured.
async fn read_first_line(helper_path: &Path, args: &[String]) -> Option<String> {
    let mut child = match Command::new(helper_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
    {
        Ok(child) => child,
        Err(e) => {
            error!("Failed to spawn helper {}: {}", helper_path.display(), e);
            return None;
        }
    };

    let mut line = String::new();
    if let Some(stdout) = child.stdout.take() {
        let mut reader = BufReader::new(stdout);
        if let Err(e) = reader.read_line(&mut line).await {
            debug!("Failed to read helper output: {}", e);
            line.clear();
        }
        // Keep draining in the background so the helper never blocks on a full
        // pipe. The invocation itself ends with the helper, even if a process it
        // left behind still holds stdout open.
        tokio::spawn(async move {
            let _ = tokio::io::copy(&mut reader, &mut tokio::io::sink()).await;
        });
    }

    match child.wait().await {
        Ok(status) if status.success() => {}
        Ok(status) => {
            debug!(?args, "Helper exited with {}", status);
            return None;
        }
        Err(e) => {
            error!("Failed to wait for helper: {}", e);
            return None;
        }
    }

    let line = line.trim();
    if line.is_empty() {
        debug!(?args, "Helper produced no output");
        None
    } else {
        Some(line.to_string())
    }
}

fn parse_line(line: &str) -> Option<Value> {
    match serde_json::from_str(line) {
        Ok(value) => Some(value),
        Err(e) => {
            error!("Invalid helper JSON: {} (output: {:?})", e, line);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_parses_first_line_only() {
        let invoker = ProcessInvoker::new("/bin/sh");
        let payload = invoker
            .invoke(sh(r#"echo '{"ok":true,"brightness":40}'; echo 'trailing noise'"#))
            .await;
        assert_eq!(payload, Some(json!({"ok": true, "brightness": 40})));
    }

    #[tokio::test]
    async fn test_detect_style_array() {
        let invoker = ProcessInvoker::new("/bin/sh");
        let payload = invoker.invoke(sh(r#"echo '[{"bus":3,"serial":"S1"}]'"#)).await;
        assert_eq!(payload, Some(json!([{"bus": 3, "serial": "S1"}])));
    }

    #[tokio::test]
    async fn test_stderr_is_ignored() {
        let invoker = ProcessInvoker::new("/bin/sh");
        let payload = invoker.invoke(sh("echo 'boom' >&2; echo '[]'")).await;
        assert_eq!(payload, Some(json!([])));
    }

    #[tokio::test]
    async fn test_failures_become_none() {
        let invoker = ProcessInvoker::new("/bin/sh");
        assert_eq!(invoker.invoke(sh("echo 'not json'")).await, None);
        assert_eq!(invoker.invoke(sh("true")).await, None);
        assert_eq!(invoker.invoke(sh(r#"echo '{"ok":true}'; exit 1"#)).await, None);

        let missing = ProcessInvoker::new("/nonexistent/easy-brightness-helper");
        assert_eq!(missing.invoke(vec!["detect".to_string()]).await, None);
    }

    #[tokio::test]
    async fn test_returns_when_helper_exits_despite_open_stdout() {
        let invoker = ProcessInvoker::new("/bin/sh");
        let started = std::time::Instant::now();
        // The backgrounded sleep inherits stdout and outlives the helper
        let payload = invoker.invoke(sh("echo '[]'; sleep 6 & exit 0")).await;

        assert_eq!(payload, Some(json!([])));
        let elapsed = started.elapsed();
        assert!(elapsed < Duration::from_secs(3), "elapsed {elapsed:?}");
    }

    #[tokio::test]
    async fn test_timeout_yields_none() {
        let invoker =
            ProcessInvoker::new("/bin/sh").with_timeout(Some(Duration::from_millis(100)));
        assert_eq!(invoker.invoke(sh("sleep 5; echo '[]'")).await, None);
    }
}
