//! Modem bring-up state machine
//!
//! Drives a freshly powered modem from power-on to an attached, addressed
//! state. Each attempt walks the stages in order; polled stages get a poll
//! budget, and any stage that fails or runs out of budget aborts the attempt.
//! Aborted attempts power the modem off and start over, up to a fixed number
//! of attempts.

use super::error::ModemError;
use super::power::PowerController;
use super::transport::{
    is_valid_rssi, parse_cereg_stat, parse_cgpaddr, parse_csq, AtTransport, RegistrationStatus,
};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info};

/// Bring-up stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stage {
    /// Power the modem (and soft reset it when there is no supply pin)
    PowerOn,
    /// Wait for the modem to answer `AT`
    WaitConnect,
    /// Poll for the SIM card
    SimCheck,
    /// Turn power-saving mode off
    DisablePsm,
    /// Turn extended discontinuous reception off
    DisableEdrx,
    /// Poll for a usable signal reading
    SignalCheck,
    /// Poll for network registration
    RegistrationCheck,
    /// Poll for an IP address
    IpAcquire,
    /// Bring-up finished
    Done,
}

impl Stage {
    /// Stage that follows this one on success
    pub fn next(&self) -> Stage {
        match self {
            Self::PowerOn => Self::WaitConnect,
            Self::WaitConnect => Self::SimCheck,
            Self::SimCheck => Self::DisablePsm,
            Self::DisablePsm => Self::DisableEdrx,
            Self::DisableEdrx => Self::SignalCheck,
            Self::SignalCheck => Self::RegistrationCheck,
            Self::RegistrationCheck => Self::IpAcquire,
            Self::IpAcquire | Self::Done => Self::Done,
        }
    }

    /// Stages that poll repeatedly against a budget
    pub fn is_polled(&self) -> bool {
        matches!(
            self,
            Self::SimCheck | Self::SignalCheck | Self::RegistrationCheck | Self::IpAcquire
        )
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PowerOn => "power on",
            Self::WaitConnect => "wait connect",
            Self::SimCheck => "SIM check",
            Self::DisablePsm => "disable PSM",
            Self::DisableEdrx => "disable eDRX",
            Self::SignalCheck => "signal check",
            Self::RegistrationCheck => "registration check",
            Self::IpAcquire => "IP acquire",
            Self::Done => "done",
        };
        f.write_str(name)
    }
}

/// Result of processing one stage
#[derive(Debug)]
pub enum StageOutcome {
    /// Move on to the given stage
    Continue(Stage),
    /// Poll again if the stage budget allows
    Retry,
    /// Abort the attempt
    Fail(ModemError),
    /// Bring-up complete
    Done,
}

/// Whether `set_up` waits for bring-up or runs it in the background
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BringupMode {
    /// Run bring-up on the caller's task
    Blocking,
    /// Spawn bring-up and return a handle
    #[default]
    Background,
}

/// Budgets and delays of the bring-up sequence
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BringupPolicy {
    /// Outer attempt budget
    pub max_attempts: u32,
    /// Delay after power-on before talking to the modem
    pub settle_delay_ms: u64,
    /// Liveness wait bound
    pub wait_connect_ms: u64,
    /// Delay before each poll of a polled stage
    pub poll_interval_ms: u64,
    /// SIM poll budget
    pub sim_polls: u32,
    /// Signal poll budget
    pub signal_polls: u32,
    /// Registration poll budget
    pub registration_polls: u32,
    /// IP address poll budget
    pub ip_polls: u32,
    /// Timeout of every bring-up command
    pub command_timeout_ms: u64,
    /// Delay after powering off a failed attempt
    pub retry_delay_ms: u64,
}

impl Default for BringupPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            settle_delay_ms: 3000,
            wait_connect_ms: 5000,
            poll_interval_ms: 1000,
            sim_polls: 10,
            signal_polls: 20,
            registration_polls: 60,
            ip_polls: 10,
            command_timeout_ms: 500,
            retry_delay_ms: 2000,
        }
    }
}

impl BringupPolicy {
    /// Settle delay
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    /// Liveness wait bound
    pub fn wait_connect(&self) -> Duration {
        Duration::from_millis(self.wait_connect_ms)
    }

    /// Poll interval
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Command timeout
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }

    /// Retry delay
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    /// Poll budget of a polled stage, `None` for single-shot stages
    pub fn poll_budget(&self, stage: Stage) -> Option<u32> {
        match stage {
            Stage::SimCheck => Some(self.sim_polls),
            Stage::SignalCheck => Some(self.signal_polls),
            Stage::RegistrationCheck => Some(self.registration_polls),
            Stage::IpAcquire => Some(self.ip_polls),
            _ => None,
        }
    }
}

/// One recorded stage change
#[derive(Debug, Clone, Serialize)]
pub struct StageTransition {
    /// Attempt number, starting at 1
    pub attempt: u32,
    /// Stage left
    pub from: Stage,
    /// Stage entered
    pub to: Stage,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Failure that ended the attempt, if any
    pub error: Option<String>,
}

/// Summary of a successful bring-up
#[derive(Debug, Clone, Serialize)]
pub struct BringupReport {
    /// Attempts used
    pub attempts: u32,
    /// Address reported by the IP stage
    pub ip_address: Option<String>,
    /// Every stage change across all attempts
    pub history: Vec<StageTransition>,
}

/// Bring-up state machine
pub struct BringupStateMachine {
    name: String,
    at: Arc<dyn AtTransport>,
    power: Arc<PowerController>,
    policy: BringupPolicy,
    history: Vec<StageTransition>,
    ip_address: Option<String>,
}

impl BringupStateMachine {
    /// Create a state machine for the named device
    pub fn new(
        name: &str,
        at: Arc<dyn AtTransport>,
        power: Arc<PowerController>,
        policy: BringupPolicy,
    ) -> Self {
        Self {
            name: name.to_string(),
            at,
            power,
            policy,
            history: Vec::new(),
            ip_address: None,
        }
    }

    /// Transition history so far
    pub fn history(&self) -> &[StageTransition] {
        &self.history
    }

    /// Run attempts until one succeeds or the budget is spent
    pub async fn run(mut self) -> Result<BringupReport, ModemError> {
        debug!(device = %self.name, "start init device");

        let mut last_failure = None;
        for attempt in 1..=self.policy.max_attempts {
            match self.run_attempt(attempt).await {
                Ok(()) => {
                    info!(device = %self.name, attempt, "device network initialize success");
                    return Ok(BringupReport {
                        attempts: attempt,
                        ip_address: self.ip_address.take(),
                        history: self.history,
                    });
                }
                Err((stage, err)) => {
                    self.power.power_off();
                    tokio::time::sleep(self.policy.retry_delay()).await;
                    info!(device = %self.name, attempt, %stage, %err, "device initialize retry");
                    last_failure = Some((stage, err));
                }
            }
        }

        let (stage, source) = last_failure.unwrap_or((
            Stage::PowerOn,
            ModemError::InvalidArgument("bring-up attempt budget is zero".to_string()),
        ));
        error!(device = %self.name, %stage, "device network initialize failed");
        Err(ModemError::BringupFailed {
            attempts: self.policy.max_attempts,
            stage,
            source: Box::new(source),
        })
    }

    /// Walk the stages once
    async fn run_attempt(&mut self, attempt: u32) -> Result<(), (Stage, ModemError)> {
        let mut stage = Stage::PowerOn;
        let mut polls = 0u32;

        loop {
            if stage.is_polled() {
                tokio::time::sleep(self.policy.poll_interval()).await;
                polls += 1;
            }

            match self.step(stage).await {
                StageOutcome::Continue(next) => {
                    self.record(attempt, stage, next, None);
                    stage = next;
                    polls = 0;
                }
                StageOutcome::Retry => {
                    let budget = self.policy.poll_budget(stage).unwrap_or(0);
                    if polls >= budget {
                        error!(device = %self.name, %stage, polls, "stage budget exhausted");
                        let err = ModemError::CommandFailed(format!("{stage} budget exhausted"));
                        self.record(attempt, stage, Stage::PowerOn, Some(err.to_string()));
                        return Err((stage, err));
                    }
                }
                StageOutcome::Fail(err) => {
                    error!(device = %self.name, %stage, %err, "stage failed");
                    self.record(attempt, stage, Stage::PowerOn, Some(err.to_string()));
                    return Err((stage, err));
                }
                StageOutcome::Done => {
                    if stage != Stage::Done {
                        self.record(attempt, stage, Stage::Done, None);
                    }
                    return Ok(());
                }
            }
        }
    }

    /// Process one attempt at `stage`
    pub async fn step(&mut self, stage: Stage) -> StageOutcome {
        let timeout = self.policy.command_timeout();

        match stage {
            Stage::PowerOn => {
                self.power.power_on();
                if !self.power.has_power_pin() {
                    if let Err(err) = self.power.reset().await {
                        return StageOutcome::Fail(err);
                    }
                }
                tokio::time::sleep(self.policy.settle_delay()).await;
                StageOutcome::Continue(stage.next())
            }
            Stage::WaitConnect => match self.at.wait_connect(self.policy.wait_connect()).await {
                Ok(()) => StageOutcome::Continue(stage.next()),
                Err(err) => StageOutcome::Fail(err.into()),
            },
            Stage::SimCheck => match self.at.exec("AT+NCCID?", timeout).await {
                Ok(_) => StageOutcome::Continue(stage.next()),
                Err(_) => StageOutcome::Retry,
            },
            Stage::DisablePsm => self.single_shot("AT+CPSMS=0", stage).await,
            Stage::DisableEdrx => self.single_shot("AT+CEDRXS=0,5", stage).await,
            Stage::SignalCheck => {
                let rssi = self
                    .at
                    .exec("AT+CSQ", timeout)
                    .await
                    .ok()
                    .and_then(|resp| parse_csq(&resp));
                match rssi {
                    Some(rssi) if is_valid_rssi(rssi) => {
                        debug!(device = %self.name, rssi, "device signal strength");
                        StageOutcome::Continue(stage.next())
                    }
                    _ => StageOutcome::Retry,
                }
            }
            Stage::RegistrationCheck => {
                let stat = self
                    .at
                    .exec("AT+CEREG?", timeout)
                    .await
                    .ok()
                    .and_then(|resp| parse_cereg_stat(&resp));
                match stat.map(RegistrationStatus::from_code) {
                    Some(status) if status.is_registered() => {
                        debug!(device = %self.name, ?status, "device is registered");
                        StageOutcome::Continue(stage.next())
                    }
                    _ => StageOutcome::Retry,
                }
            }
            Stage::IpAcquire => {
                let address = self
                    .at
                    .exec("AT+CGPADDR=0", timeout)
                    .await
                    .ok()
                    .and_then(|resp| parse_cgpaddr(&resp).map(str::to_string));
                match address {
                    Some(address) => {
                        debug!(device = %self.name, %address, "device IP address");
                        self.ip_address = Some(address);
                        StageOutcome::Done
                    }
                    None => StageOutcome::Retry,
                }
            }
            Stage::Done => StageOutcome::Done,
        }
    }

    async fn single_shot(&self, command: &str, stage: Stage) -> StageOutcome {
        match self.at.exec(command, self.policy.command_timeout()).await {
            Ok(_) => StageOutcome::Continue(stage.next()),
            Err(err) => StageOutcome::Fail(err.into()),
        }
    }

    fn record(&mut self, attempt: u32, from: Stage, to: Stage, error: Option<String>) {
        debug!(device = %self.name, attempt, %from, %to, "bring-up transition");
        self.history.push(StageTransition {
            attempt,
            from,
            to,
            timestamp: Local::now(),
            error,
        });
    }
}
