// SPDX-License-Identifier: GPL-3.0-only
//! Long-running apply daemon
//!
//! Applies the saved mode at startup and then waits for triggers. With the
//! `dbus-service` feature the triggers come from the session bus:
//!
//! - `Toggle`, `SetMode(s)`, `SetCustom(s, u)`, `Apply` methods
//! - `Busy`, `Mode`, `Summary` properties
//! - `ApplyFinished(b)` signal, emitted once per completed run
//!
//! Only one daemon may run per user session.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;

use crate::apply::ApplyReport;
use crate::controller::Controller;
use crate::instance::InstanceLock;

#[cfg(feature = "dbus-service")]
pub const BUS_NAME: &str = "io.github.easy_brightness";
#[cfg(feature = "dbus-service")]
pub const OBJECT_PATH: &str = "/io/github/easy_brightness/Applier";

#[cfg(feature = "dbus-service")]
mod service {
    use std::sync::Arc;

    use tokio::sync::broadcast;
    use zbus::fdo;
    use zbus::interface;
    use zbus::object_server::{InterfaceRef, SignalEmitter};

    use crate::apply::MAX_LEVEL;
    use crate::apply::stage::Stage;
    use crate::config::Mode;
    use crate::controller::Controller;
    use crate::error::AppError;

    pub struct ApplierService {
        pub controller: Arc<Controller>,
    }

    fn failed(e: AppError) -> fdo::Error {
        fdo::Error::Failed(e.to_string())
    }

    #[interface(name = "io.github.easy_brightness.Applier")]
    impl ApplierService {
        /// Switch day/night; returns the new mode, or an empty string if busy
        async fn toggle(&self) -> String {
            self.controller
                .toggle()
                .await
                .map(|mode| mode.to_string())
                .unwrap_or_default()
        }

        /// Select a mode and apply it; `false` if a run was in flight
        async fn set_mode(&self, mode: &str) -> fdo::Result<bool> {
            let mode: Mode = mode
                .parse()
                .map_err(|e: AppError| fdo::Error::InvalidArgs(e.to_string()))?;
            let run = self.controller.set_mode(mode).await.map_err(failed)?;
            Ok(run.is_some())
        }

        /// Change one custom value and apply; `false` if a run was in flight
        async fn set_custom(&self, setting: &str, percent: u32) -> fdo::Result<bool> {
            let stage = Stage::from_field(setting).ok_or_else(|| {
                fdo::Error::InvalidArgs(AppError::UnknownSetting(setting.to_string()).to_string())
            })?;
            let run = self
                .controller
                .set_custom(stage, percent.min(u32::from(MAX_LEVEL)) as u8)
                .await
                .map_err(failed)?;
            Ok(run.is_some())
        }

        /// Re-apply the active mode; `false` if a run was in flight
        async fn apply(&self) -> fdo::Result<bool> {
            let run = self.controller.apply_current().await.map_err(failed)?;
            Ok(run.is_some())
        }

        #[zbus(property)]
        async fn busy(&self) -> bool {
            self.controller.applier().is_busy()
        }

        #[zbus(property)]
        async fn mode(&self) -> String {
            self.controller.mode().await.to_string()
        }

        #[zbus(property)]
        async fn summary(&self) -> String {
            self.controller.summary().await
        }

        #[zbus(signal)]
        async fn apply_finished(emitter: &SignalEmitter<'_>, all_ok: bool) -> zbus::Result<()>;
    }

    /// Forward run completions and busy changes to bus clients
    pub async fn forward_changes(
        controller: Arc<Controller>,
        iface: InterfaceRef<ApplierService>,
        emitter: SignalEmitter<'static>,
    ) {
        let mut reports = controller.applier().subscribe();
        let mut busy = controller.applier().busy();

        loop {
            tokio::select! {
                report = reports.recv() => match report {
                    Ok(report) => {
                        if let Err(e) = ApplierService::apply_finished(&emitter, report.all_ok).await {
                            warn!("Failed to emit ApplyFinished: {}", e);
                        }
                        let service = iface.get().await;
                        if let Err(e) = service.mode_changed(&emitter).await {
                            debug!("Failed to emit Mode change: {}", e);
                        }
                        if let Err(e) = service.summary_changed(&emitter).await {
                            debug!("Failed to emit Summary change: {}", e);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                },
                changed = busy.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if let Err(e) = iface.get().await.busy_changed(&emitter).await {
                        debug!("Failed to emit Busy change: {}", e);
                    }
                }
            }
        }
    }
}

/// Log the outcome of every completed run
async fn log_reports(mut reports: broadcast::Receiver<ApplyReport>) {
    loop {
        match reports.recv().await {
            Ok(report) => {
                if report.all_ok {
                    info!(
                        "Run {} applied to {} display(s)",
                        report.run,
                        report.displays.len()
                    );
                } else {
                    error!(
                        "easy-brightness: apply state machine finished with failures ({} of {} display(s) failed{})",
                        report.failed_displays().count(),
                        report.displays.len(),
                        if report.detection_failed { ", detection failed" } else { "" }
                    );
                }
            }
            Err(broadcast::error::RecvError::Lagged(n)) => {
                warn!("Missed {} apply report(s)", n);
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[cfg(feature = "dbus-service")]
async fn serve(controller: Arc<Controller>) -> Result<zbus::Connection> {
    use zbus::object_server::SignalEmitter;

    let connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(
            OBJECT_PATH,
            service::ApplierService {
                controller: Arc::clone(&controller),
            },
        )?
        .build()
        .await
        .context("Failed to register on the D-Bus session bus")?;

    info!("Serving {} at {}", BUS_NAME, OBJECT_PATH);

    let emitter = SignalEmitter::new(&connection, OBJECT_PATH)?.into_owned();
    let iface = connection
        .object_server()
        .interface::<_, service::ApplierService>(OBJECT_PATH)
        .await?;
    tokio::spawn(service::forward_changes(controller, iface, emitter));

    Ok(connection)
}

/// Run the daemon until Ctrl-C
pub async fn run(controller: Arc<Controller>) -> Result<()> {
    let lock_path = InstanceLock::default_path();
    let _lock = InstanceLock::acquire(&lock_path)?;

    tokio::spawn(log_reports(controller.applier().subscribe()));

    #[cfg(feature = "dbus-service")]
    let _connection = serve(Arc::clone(&controller)).await?;

    info!("Applying saved mode: {}", controller.summary().await);
    controller
        .apply_current()
        .await
        .context("Failed to start initial apply")?;

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Shutting down");
    controller.applier().cancel();
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::apply::{Applier, RetryPolicy, Targets};
    use crate::helper::mock::ScriptedInvoker;

    #[tokio::test(start_paused = true)]
    async fn test_log_reports_ends_with_applier() {
        let invoker = ScriptedInvoker::confirming(json!([{"bus": 1}]));
        let applier = Applier::spawn(Arc::new(invoker), RetryPolicy::default());
        let logger = tokio::spawn(log_reports(applier.subscribe()));

        applier.apply_and_wait(Targets::new(1, 2, 3)).await.unwrap();
        drop(applier);
        tokio::time::timeout(Duration::from_secs(5), logger)
            .await
            .expect("logger stops once the event loop is gone")
            .unwrap();
    }
}
