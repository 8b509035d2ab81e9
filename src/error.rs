// SPDX-License-Identifier: GPL-3.0-only
//! Error types for the application
//!
//! Apply failures (helper errors, value mismatches, exhausted retries) are
//! never errors: they end up as data in [`crate::apply::ApplyReport`]. The
//! types here cover everything around the orchestration, such as loading the
//! configuration or reaching the event loop.

use std::path::PathBuf;

use thiserror::Error;

use crate::apply::RunId;

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Reading or writing the configuration file failed
    #[error("Failed to access config file {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid JSON for [`crate::config::Config`]
    #[error("Invalid config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// No configuration directory could be determined
    #[error("No config directory available")]
    NoConfigDir,

    /// Unknown mode name
    #[error("Unknown mode {0:?}, expected day, night or custom")]
    UnknownMode(String),

    /// Unknown custom slider name
    #[error("Unknown setting {0:?}, expected brightness, contrast or blue")]
    UnknownSetting(String),

    /// The apply event loop has shut down
    #[error("Apply event loop is not running")]
    ApplierGone,

    /// The awaited run was replaced by a newer one before it finished
    #[error("Apply run {0} was superseded by a newer run")]
    Superseded(RunId),

    /// Another daemon instance holds the lock
    #[error("Another instance is already running (lock: {0})")]
    AlreadyRunning(PathBuf),

    /// D-Bus error (for the daemon service)
    #[cfg(feature = "dbus-service")]
    #[error("D-Bus error: {0}")]
    DBus(#[from] zbus::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for AppError
pub type Result<T> = std::result::Result<T, AppError>;
