//! Periodic link status polling
//!
//! Once bring-up succeeds, a background task asks the modem for its
//! registration status every period and pushes the result to the netdev.

use super::error::ModemError;
use super::netdev::NetdevSink;
use super::power::DeviceState;
use super::transport::{parse_cereg_stat, AtTransport, RegistrationStatus};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Default polling period
pub const LINK_MONITOR_PERIOD: Duration = Duration::from_secs(60);

/// Query registration status once
///
/// A powered-off device is reported as [`ModemError::PoweredOff`] without
/// touching the channel.
pub async fn check_link_status(
    at: &dyn AtTransport,
    state: &RwLock<DeviceState>,
    timeout: Duration,
) -> Result<bool, ModemError> {
    if !state.read().power_status {
        debug!("the power is off");
        return Err(ModemError::PoweredOff);
    }

    let resp = at.exec("AT+CEREG?", timeout).await?;
    Ok(parse_cereg_stat(&resp)
        .map(RegistrationStatus::from_code)
        .is_some_and(|status| status.is_registered()))
}

/// Handle to a running link monitor task
pub struct LinkMonitor {
    name: String,
    cancel_tx: Option<mpsc::Sender<()>>,
    task: JoinHandle<()>,
}

impl LinkMonitor {
    /// Spawn the polling task
    pub fn start(
        name: &str,
        at: Arc<dyn AtTransport>,
        state: Arc<RwLock<DeviceState>>,
        netdev: Arc<dyn NetdevSink>,
        period: Duration,
        command_timeout: Duration,
    ) -> Self {
        let (cancel_tx, mut cancel_rx) = mpsc::channel::<()>(1);
        let task_name = name.to_string();

        let task = tokio::spawn(async move {
            loop {
                let link_up = check_link_status(at.as_ref(), &state, command_timeout)
                    .await
                    .unwrap_or(false);
                netdev.set_link_status(link_up);
                debug!(device = %task_name, link_up, "link status");

                tokio::select! {
                    _ = cancel_rx.recv() => {
                        info!(device = %task_name, "link monitor stopped");
                        break;
                    }
                    _ = tokio::time::sleep(period) => {}
                }
            }
        });

        Self {
            name: name.to_string(),
            cancel_tx: Some(cancel_tx),
            task,
        }
    }

    /// Monitor name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check if the task is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    /// Stop the task
    pub fn stop(&mut self) {
        if let Some(tx) = self.cancel_tx.take() {
            let _ = tx.try_send(());
        }
        self.task.abort();
    }
}

impl Drop for LinkMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Running monitors keyed by netdev name
#[derive(Default)]
pub struct MonitorRegistry {
    monitors: Mutex<HashMap<String, LinkMonitor>>,
}

impl MonitorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a monitor unless one with the same name is running
    ///
    /// Returns `true` when `start` was invoked.
    pub fn start_if_absent<F>(&self, name: &str, start: F) -> bool
    where
        F: FnOnce() -> LinkMonitor,
    {
        let mut monitors = self.monitors.lock();
        if monitors.get(name).is_some_and(LinkMonitor::is_running) {
            return false;
        }
        monitors.insert(name.to_string(), start());
        true
    }

    /// Check if a named monitor is running
    pub fn is_running(&self, name: &str) -> bool {
        self.monitors.lock().get(name).is_some_and(LinkMonitor::is_running)
    }

    /// Stop one monitor
    pub fn stop(&self, name: &str) {
        self.monitors.lock().remove(name);
    }

    /// Stop every monitor
    pub fn stop_all(&self) {
        self.monitors.lock().clear();
    }
}
