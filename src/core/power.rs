//! Power sequencing and power-saving control

use super::error::ModemError;
use super::transport::AtTransport;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

const CMD_RESET: &str = "AT+NRB";
const CMD_ENTER_PSM: &str = "AT+CPSMS=1,,,00111110,00000001";
const CMD_LEAVE_PSM: &str = "AT+CPSMS=0";

/// Power and lifecycle flags of one device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceState {
    /// Supply is on
    pub power_status: bool,
    /// Power-saving mode is active
    pub sleep_status: bool,
    /// Bring-up completed
    pub initialized: bool,
}

/// GPIO line that switches the modem supply
#[cfg_attr(test, mockall::automock)]
pub trait PowerPin: Send + Sync {
    /// Drive the line (high = powered)
    fn set_level(&self, high: bool);
}

/// Power controller
pub struct PowerController {
    name: String,
    at: Arc<dyn AtTransport>,
    pin: Option<Arc<dyn PowerPin>>,
    state: Arc<RwLock<DeviceState>>,
    command_timeout: Duration,
}

impl PowerController {
    /// Create a controller sharing `state` with its device
    pub fn new(
        name: &str,
        at: Arc<dyn AtTransport>,
        pin: Option<Arc<dyn PowerPin>>,
        state: Arc<RwLock<DeviceState>>,
        command_timeout: Duration,
    ) -> Self {
        Self {
            name: name.to_string(),
            at,
            pin,
            state,
            command_timeout,
        }
    }

    /// Whether a supply pin is wired
    pub fn has_power_pin(&self) -> bool {
        self.pin.is_some()
    }

    /// Current flags
    pub fn state(&self) -> DeviceState {
        *self.state.read()
    }

    /// Check if powered
    pub fn is_powered(&self) -> bool {
        self.state.read().power_status
    }

    /// Check if in power-saving mode
    pub fn is_sleeping(&self) -> bool {
        self.state.read().sleep_status
    }

    /// Put the pin in its initial (off) level
    pub fn init_pin(&self) {
        if let Some(pin) = &self.pin {
            pin.set_level(false);
        }
    }

    /// Switch the supply on
    pub fn power_on(&self) {
        self.state.write().power_status = true;
        if let Some(pin) = &self.pin {
            pin.set_level(true);
        }
        debug!(device = %self.name, "power on success");
    }

    /// Switch the supply off
    pub fn power_off(&self) {
        self.state.write().power_status = false;
        if let Some(pin) = &self.pin {
            pin.set_level(false);
        }
        debug!(device = %self.name, "power off success");
    }

    /// Soft reset the modem
    ///
    /// `AT+NRB` reboots without acknowledging, so a missing reply is fine.
    pub async fn reset(&self) -> Result<(), ModemError> {
        if self.has_power_pin() && !self.is_powered() {
            error!(device = %self.name, "the power is off and the reset cannot be performed");
            return Err(ModemError::PoweredOff);
        }

        if let Err(err) = self.at.exec(CMD_RESET, self.command_timeout).await {
            debug!(device = %self.name, %err, "reset issued without reply");
        }

        debug!(device = %self.name, "reset success");
        Ok(())
    }

    /// Enter power-saving mode
    pub async fn sleep(&self) -> Result<(), ModemError> {
        let state = self.state();
        if !state.power_status || state.sleep_status {
            return Ok(());
        }

        if let Err(err) = self.at.exec(CMD_ENTER_PSM, self.command_timeout).await {
            debug!(device = %self.name, %err, "enable sleep fail");
            return Err(err.into());
        }

        self.state.write().sleep_status = true;
        debug!(device = %self.name, "sleep success");
        Ok(())
    }

    /// Leave power-saving mode
    pub async fn wakeup(&self) -> Result<(), ModemError> {
        let state = self.state();
        if !state.power_status {
            error!(device = %self.name, "the power is off and the wake-up cannot be performed");
            return Err(ModemError::PoweredOff);
        }
        if !state.sleep_status {
            return Ok(());
        }

        if let Err(err) = self.at.exec(CMD_LEAVE_PSM, self.command_timeout).await {
            debug!(device = %self.name, %err, "wake up fail");
            return Err(err.into());
        }

        self.state.write().sleep_status = false;
        debug!(device = %self.name, "wake up success");
        Ok(())
    }
}
