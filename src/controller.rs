// SPDX-License-Identifier: GPL-3.0-only
//! Mode and slider triggers
//!
//! Translates user intent (toggle day/night, pick a mode, move a custom
//! slider) into persisted settings and apply runs. Requests arriving while a
//! run is in flight are ignored, the same way the panel ignores clicks while
//! its icon shows the busy state.

use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::apply::stage::Stage;
use crate::apply::{Applier, RunId};
use crate::config::{Config, Mode};
use crate::error::Result;

pub struct Controller {
    applier: Applier,
    config: Mutex<Config>,
    /// Where settings changes are persisted; `None` keeps them in memory
    config_path: Option<PathBuf>,
    pending_toggle: Mutex<Option<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(applier: Applier, config: Config, config_path: Option<PathBuf>) -> Arc<Self> {
        Arc::new(Self {
            applier,
            config: Mutex::new(config),
            config_path,
            pending_toggle: Mutex::new(None),
        })
    }

    pub fn applier(&self) -> &Applier {
        &self.applier
    }

    pub async fn mode(&self) -> Mode {
        self.config.lock().await.mode
    }

    /// Status line for the active mode
    pub async fn summary(&self) -> String {
        self.config.lock().await.summary()
    }

    /// Apply the active mode's values
    ///
    /// Returns `None` when a run is already in flight.
    pub async fn apply_current(&self) -> Result<Option<RunId>> {
        if self.applier.is_busy() {
            debug!("Apply requested while busy, ignoring");
            return Ok(None);
        }
        let targets = self.config.lock().await.active_targets();
        self.applier.apply(targets).await.map(Some)
    }

    /// Switch between day and night, applying after the debounce delay
    ///
    /// Toggling again within the delay restarts it, so a burst of clicks
    /// results in a single run.
    pub async fn toggle(self: &Arc<Self>) -> Option<Mode> {
        if self.applier.is_busy() {
            debug!("Toggle requested while busy, ignoring");
            return None;
        }

        let (mode, debounce) = {
            let mut config = self.config.lock().await;
            config.mode = config.mode.toggled();
            self.persist(&config);
            (config.mode, config.mode_debounce())
        };
        info!("Mode toggled to {}", mode);

        let mut pending = self.pending_toggle.lock().await;
        if let Some(previous) = pending.take() {
            previous.abort();
        }
        let this = Arc::clone(self);
        *pending = Some(tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Err(e) = this.apply_current().await {
                error!("Failed to apply {} mode: {}", mode, e);
            }
        }));

        Some(mode)
    }

    /// Select `mode` and apply it immediately
    pub async fn set_mode(&self, mode: Mode) -> Result<Option<RunId>> {
        if self.applier.is_busy() {
            debug!("Mode change to {} requested while busy, ignoring", mode);
            return Ok(None);
        }
        {
            let mut config = self.config.lock().await;
            config.mode = mode;
            self.persist(&config);
        }
        self.apply_current().await
    }

    /// Store one custom value, switch to custom mode and apply immediately
    pub async fn set_custom(&self, setting: Stage, percent: u8) -> Result<Option<RunId>> {
        if self.applier.is_busy() {
            debug!("Custom {} change requested while busy, ignoring", setting.field());
            return Ok(None);
        }
        {
            let mut config = self.config.lock().await;
            config.set_custom(setting, percent);
            self.persist(&config);
        }
        self.apply_current().await
    }

    fn persist(&self, config: &Config) {
        if let Some(path) = &self.config_path {
            if let Err(e) = config.save(path) {
                error!("Failed to save settings: {}", e);
            }
        }
    }
}
