// SPDX-License-Identifier: GPL-3.0-only
//! Persistent settings
//!
//! Holds the three target triples (day, night, custom), the active mode and
//! the tuning knobs of the apply loop. Stored as JSON under the user's config
//! directory; missing keys fall back to their defaults.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::apply::stage::{DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY, Stage};
use crate::apply::{MAX_LEVEL, RetryPolicy, Targets};
use crate::error::{AppError, Result};

pub const CONFIG_VERSION: u64 = 1;
pub const APP_DIR: &str = "easy-brightness";
pub const DEFAULT_HELPER: &str = "easy-brightness-helper";

pub const DEFAULT_DAY: Targets = Targets {
    brightness: 100,
    contrast: 50,
    blue: 50,
};
pub const DEFAULT_NIGHT: Targets = Targets {
    brightness: 30,
    contrast: 40,
    blue: 30,
};
pub const DEFAULT_CUSTOM: Targets = Targets {
    brightness: 50,
    contrast: 50,
    blue: 50,
};

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Day,
    Night,
    Custom,
}

impl Mode {
    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Day => "day",
            Mode::Night => "night",
            Mode::Custom => "custom",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Mode::Day => "Day",
            Mode::Night => "Night",
            Mode::Custom => "Custom",
        }
    }

    /// Mode selected by a click on the toggle: day and night alternate,
    /// custom falls back to day
    pub fn toggled(self) -> Self {
        match self {
            Mode::Day => Mode::Night,
            Mode::Night | Mode::Custom => Mode::Day,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Mode::Day),
            "night" => Ok(Mode::Night),
            "custom" => Ok(Mode::Custom),
            _ => Err(AppError::UnknownMode(s.to_string())),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct Config {
    pub version: u64,
    /// Helper binary; a bare name is looked up in `PATH`
    pub helper_path: PathBuf,
    pub mode: Mode,
    #[serde(deserialize_with = "day_targets")]
    pub day: Targets,
    #[serde(deserialize_with = "night_targets")]
    pub night: Targets,
    #[serde(deserialize_with = "custom_targets")]
    pub custom: Targets,
    /// Delay between a mode toggle and the apply it triggers
    pub mode_debounce_ms: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    /// Kill a helper invocation that runs longer than this; unbounded if unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub helper_timeout_ms: Option<u64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            helper_path: PathBuf::from(DEFAULT_HELPER),
            mode: Mode::Day,
            day: DEFAULT_DAY,
            night: DEFAULT_NIGHT,
            custom: DEFAULT_CUSTOM,
            mode_debounce_ms: 750,
            retry_attempts: DEFAULT_MAX_ATTEMPTS,
            retry_delay_ms: DEFAULT_RETRY_DELAY.as_millis() as u64,
            helper_timeout_ms: None,
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/easy-brightness/config.json`
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join(APP_DIR).join("config.json"))
            .ok_or(AppError::NoConfigDir)
    }

    /// Load the config at `path`; a missing file yields the defaults
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(AppError::ConfigIo {
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        let config: Self = serde_json::from_str(&raw).map_err(|source| AppError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(config.normalized())
    }

    /// Like [`Config::load`] but logs errors and falls back to the defaults
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                error!("errors loading config: {}", e);
                Self::default()
            }
        }
    }

    /// Write the config atomically (temp file, then rename)
    pub fn save(&self, path: &Path) -> Result<()> {
        let io_err = |source| AppError::ConfigIo {
            path: path.to_path_buf(),
            source,
        };

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(io_err)?;
        }
        let json = serde_json::to_string_pretty(self).map_err(|source| AppError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json + "\n").map_err(io_err)?;
        fs::rename(&tmp, path).map_err(io_err)?;
        debug!("Saved config to {}", path.display());
        Ok(())
    }

    fn normalized(mut self) -> Self {
        if self.version != CONFIG_VERSION {
            warn!(
                "Config version {} differs from {}, unknown keys are ignored",
                self.version, CONFIG_VERSION
            );
            self.version = CONFIG_VERSION;
        }
        self
    }

    /// Snapshot of the triple configured for `mode`
    pub fn targets(&self, mode: Mode) -> Targets {
        match mode {
            Mode::Day => self.day,
            Mode::Night => self.night,
            Mode::Custom => self.custom,
        }
    }

    /// Snapshot of the triple for the active mode
    pub fn active_targets(&self) -> Targets {
        self.targets(self.mode)
    }

    /// Store one custom value and switch to custom mode
    pub fn set_custom(&mut self, setting: Stage, percent: u8) {
        let percent = percent.min(crate::apply::MAX_LEVEL);
        match setting {
            Stage::Brightness => self.custom.brightness = percent,
            Stage::Contrast => self.custom.contrast = percent,
            Stage::Blue => self.custom.blue = percent,
        }
        self.mode = Mode::Custom;
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_attempts, Duration::from_millis(self.retry_delay_ms))
    }

    pub fn helper_timeout(&self) -> Option<Duration> {
        self.helper_timeout_ms.map(Duration::from_millis)
    }

    pub fn mode_debounce(&self) -> Duration {
        Duration::from_millis(self.mode_debounce_ms)
    }

    /// "Day | Brightness: 100% | Contrast: 50% | Blue: 50%"
    pub fn summary(&self) -> String {
        let targets = self.active_targets();
        format!(
            "{} | Brightness: {}% | Contrast: {}% | Blue: {}%",
            self.mode.label(),
            targets.brightness,
            targets.contrast,
            targets.blue
        )
    }
}

/// A triple as written in the settings file
///
/// Hand-edited files may miss a value or hold one outside 0-100. Missing or
/// non-numeric values take the mode's default and the rest are clamped, so
/// one bad entry never discards the whole file.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StoredTargets {
    brightness: Option<Value>,
    contrast: Option<Value>,
    blue: Option<Value>,
}

impl StoredTargets {
    fn resolve(self, mode: Mode, fallback: Targets) -> Targets {
        let level = |field: &str, raw: Option<Value>, default: u8| -> u8 {
            let Some(raw) = raw else {
                return default;
            };
            let number = raw
                .as_i64()
                .or_else(|| raw.as_f64().map(|f| f.round() as i64))
                .or_else(|| raw.as_str().and_then(|s| s.trim().parse().ok()));
            match number {
                Some(n) if (0..=i64::from(MAX_LEVEL)).contains(&n) => n as u8,
                Some(n) => {
                    let clamped = n.clamp(0, i64::from(MAX_LEVEL)) as u8;
                    warn!("Clamping {}.{} from {} to {}", mode, field, n, clamped);
                    clamped
                }
                None => {
                    warn!("Ignoring {}.{} = {}, using {}", mode, field, raw, default);
                    default
                }
            }
        };

        Targets {
            brightness: level("brightness", self.brightness, fallback.brightness),
            contrast: level("contrast", self.contrast, fallback.contrast),
            blue: level("blue", self.blue, fallback.blue),
        }
    }
}

fn day_targets<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Targets, D::Error> {
    StoredTargets::deserialize(d).map(|t| t.resolve(Mode::Day, DEFAULT_DAY))
}

fn night_targets<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Targets, D::Error> {
    StoredTargets::deserialize(d).map(|t| t.resolve(Mode::Night, DEFAULT_NIGHT))
}

fn custom_targets<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Targets, D::Error> {
    StoredTargets::deserialize(d).map(|t| t.resolve(Mode::Custom, DEFAULT_CUSTOM))
}
