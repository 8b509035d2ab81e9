// SPDX-License-Identifier: GPL-3.0-only
//! External helper invocation
//!
//! The helper is a small command-line program that talks DDC/CI to the
//! monitors. Each invocation runs one command and prints a single line of
//! JSON on stdout. This module hides process handling behind
//! [`HelperInvoker`] so the orchestration logic can run against a scripted
//! helper in tests.

#[cfg(test)]
pub mod mock;
pub mod process;
pub mod response;

use futures::future::BoxFuture;
use serde_json::Value;

pub use process::ProcessInvoker;
pub use response::{DisplayDescriptor, SetResponse, parse_detect};

/// Common trait for everything that can run a helper command
///
/// Implementations never fail: any problem running the command or reading
/// its answer is reported as `None`.
pub trait HelperInvoker: Send + Sync {
    /// Run the helper with `args` and return its parsed JSON payload
    fn invoke(&self, args: Vec<String>) -> BoxFuture<'static, Option<Value>>;
}

/// Commands understood by the helper
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    /// List attached displays
    Detect,
    /// Set brightness (VCP 0x10) on one bus
    SetBrightness,
    /// Set contrast (VCP 0x12) on one bus
    SetContrast,
    /// Set blue gain (VCP 0x1A) on one bus
    SetBlue,
}

impl Command {
    /// Name of the command on the helper's command line
    pub fn as_str(self) -> &'static str {
        match self {
            Command::Detect => "detect",
            Command::SetBrightness => "set-bus",
            Command::SetContrast => "set-contrast-bus",
            Command::SetBlue => "set-blue-bus",
        }
    }

    /// Argument list for `detect`
    pub fn detect_args() -> Vec<String> {
        vec![Command::Detect.as_str().to_string()]
    }

    /// Argument list for one of the `set-*` commands
    pub fn set_args(self, bus: i64, value: u8) -> Vec<String> {
        vec![self.as_str().to_string(), bus.to_string(), value.to_string()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_args_are_decimal_strings() {
        assert_eq!(
            Command::SetContrast.set_args(7, 42),
            vec!["set-contrast-bus", "7", "42"]
        );
        assert_eq!(Command::detect_args(), vec!["detect"]);
    }
}
