//! Modem device
//!
//! A [`ModemDevice`] owns one modem's power controller, slot table, URC
//! reader and link monitor, and exposes the control and network-interface
//! surface on top of them. A [`DeviceRegistry`] tracks devices for lookups
//! that are not tied to a particular one, such as domain resolution.

use super::bringup::{BringupMode, BringupPolicy, BringupReport, BringupStateMachine};
use super::error::ModemError;
use super::link_monitor::{LinkMonitor, MonitorRegistry};
use super::netdev::{NetdevSink, NetdevState};
use super::netinfo::NetworkInfoResolver;
use super::power::{DeviceState, PowerController, PowerPin};
use super::socket::{
    EventBroadcaster, SocketConfig, SocketEventHandler, SocketSessionManager, SocketTable,
};
use super::transport::{parse_nping, AtTransport, RawReader, UrcRouter};
use super::urc::frame::FrameTimeouts;
use super::urc::UrcFrameReader;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

/// Device control commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlCommand {
    /// Power on
    PowerOn,
    /// Power off
    PowerOff,
    /// Low-power mode
    LowPower,
    /// Enter power-saving mode
    Sleep,
    /// Leave power-saving mode
    Wakeup,
    /// Connect to the network
    NetConnect,
    /// Disconnect from the network
    NetDisconnect,
    /// Configure Wi-Fi credentials
    SetWifiInfo,
    /// Read signal strength
    GetSignal,
    /// Read GPS position
    GetGps,
    /// Read firmware version
    GetVersion,
    /// Soft reset
    Reset,
}

impl ControlCommand {
    const ALL: [ControlCommand; 12] = [
        Self::PowerOn,
        Self::PowerOff,
        Self::LowPower,
        Self::Sleep,
        Self::Wakeup,
        Self::NetConnect,
        Self::NetDisconnect,
        Self::SetWifiInfo,
        Self::GetSignal,
        Self::GetGps,
        Self::GetVersion,
        Self::Reset,
    ];

    /// Map a numeric control code (1..=12)
    pub fn from_code(code: i32) -> Result<Self, ModemError> {
        usize::try_from(code)
            .ok()
            .and_then(|code| code.checked_sub(1))
            .and_then(|idx| Self::ALL.get(idx).copied())
            .ok_or_else(|| ModemError::InvalidArgument(format!("unknown control command {code}")))
    }

    /// Numeric control code
    pub fn code(&self) -> i32 {
        Self::ALL
            .iter()
            .position(|cmd| cmd == self)
            .map_or(0, |idx| idx as i32 + 1)
    }

    /// Check if this modem implements the command
    pub fn is_supported(&self) -> bool {
        matches!(self, Self::Sleep | Self::Wakeup | Self::Reset)
    }
}

/// Reply to a ping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PingReply {
    /// Address that answered
    pub ip_addr: IpAddr,
    /// Payload size sent
    pub data_len: usize,
    /// Time to live
    pub ttl: u32,
    /// Round-trip time in milliseconds
    pub time_ms: u32,
}

/// Per-device configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModemConfig {
    /// Device and netdev name
    pub name: String,
    /// GPIO line of the supply switch, if there is one
    ///
    /// The number is informational. The caller opens the line and hands it
    /// to [`ModemDeviceBuilder::power_pin`]; a device built without a pin
    /// resets with `AT+NRB` whatever this says.
    pub power_pin: Option<u32>,
    /// Bring-up mode
    pub init_mode: BringupMode,
    /// Link monitor period
    pub link_monitor_period_secs: u64,
    /// Timeout of power, info and link status commands
    pub info_timeout_ms: u64,
    /// Ping timeout used when the caller passes zero
    pub ping_timeout_ms: u64,
    /// Bring-up budgets and delays
    pub bringup: BringupPolicy,
    /// Socket timeouts and limits
    pub sockets: SocketConfig,
}

impl Default for ModemConfig {
    fn default() -> Self {
        Self {
            name: "ctm201".to_string(),
            power_pin: None,
            init_mode: BringupMode::default(),
            link_monitor_period_secs: 60,
            info_timeout_ms: 300,
            ping_timeout_ms: 10_000,
            bringup: BringupPolicy::default(),
            sockets: SocketConfig::default(),
        }
    }
}

impl ModemConfig {
    /// Link monitor period
    pub fn link_monitor_period(&self) -> Duration {
        Duration::from_secs(self.link_monitor_period_secs)
    }

    /// Info command timeout
    pub fn info_timeout(&self) -> Duration {
        Duration::from_millis(self.info_timeout_ms)
    }

    /// Default ping timeout
    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }
}

/// Result of [`ModemDevice::set_up`]
#[derive(Debug)]
pub enum SetUp {
    /// The device was already initialized
    AlreadyUp,
    /// Another bring-up is running
    InProgress,
    /// Bring-up ran to completion on the caller's task
    Completed(BringupReport),
    /// Bring-up was spawned
    Started(BringupHandle),
}

/// Handle to a background bring-up
#[derive(Debug)]
pub struct BringupHandle {
    join: JoinHandle<()>,
    done: oneshot::Receiver<Result<BringupReport, ModemError>>,
}

impl BringupHandle {
    /// Wait for the bring-up outcome
    pub async fn wait(self) -> Result<BringupReport, ModemError> {
        self.done.await.map_err(|_| {
            ModemError::CommandFailed("bring-up task ended without a result".to_string())
        })?
    }

    /// Check if the task has finished
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Cancel the bring-up task
    ///
    /// The modem is powered off and a new `set_up` may start once the task
    /// has unwound.
    pub fn abort(&self) {
        self.join.abort();
    }
}

/// Releases the running flag when a bring-up ends or is cancelled
struct BringupGuard<'a> {
    shared: &'a Shared,
    finished: bool,
}

impl Drop for BringupGuard<'_> {
    fn drop(&mut self) {
        if !self.finished {
            warn!(device = %self.shared.config.name, "bring-up cancelled");
            self.shared.power.power_off();
        }
        self.shared.bringup_running.store(false, Ordering::SeqCst);
    }
}

/// State shared with background bring-up tasks
struct Shared {
    config: ModemConfig,
    at: Arc<dyn AtTransport>,
    state: Arc<RwLock<DeviceState>>,
    power: Arc<PowerController>,
    netdev: Arc<dyn NetdevSink>,
    monitors: Arc<MonitorRegistry>,
    bringup_running: AtomicBool,
    torn_down: AtomicBool,
}

impl Shared {
    async fn bring_up(&self) -> Result<BringupReport, ModemError> {
        let mut guard = BringupGuard {
            shared: self,
            finished: false,
        };
        let result = self.run_bring_up().await;
        guard.finished = true;
        result
    }

    async fn run_bring_up(&self) -> Result<BringupReport, ModemError> {
        let name = &self.config.name;
        let machine = BringupStateMachine::new(
            name,
            self.at.clone(),
            self.power.clone(),
            self.config.bringup.clone(),
        );

        match machine.run().await {
            Ok(report) => {
                let resolver = NetworkInfoResolver::new(
                    name,
                    self.at.clone(),
                    self.netdev.clone(),
                    self.config.info_timeout(),
                );
                if let Err(err) = resolver.resolve().await {
                    warn!(device = %name, %err, "network info unavailable");
                }

                if self.torn_down.load(Ordering::SeqCst) {
                    return Err(self.abandon());
                }

                let started = self.monitors.start_if_absent(name, || {
                    LinkMonitor::start(
                        name,
                        self.at.clone(),
                        self.state.clone(),
                        self.netdev.clone(),
                        self.config.link_monitor_period(),
                        self.config.info_timeout(),
                    )
                });
                if self.torn_down.load(Ordering::SeqCst) {
                    // teardown raced the start
                    self.monitors.stop(name);
                    return Err(self.abandon());
                }
                if started {
                    debug!(device = %name, "link monitor started");
                }

                self.state.write().initialized = true;
                Ok(report)
            }
            Err(err) => {
                self.netdev.set_status(false);
                Err(err)
            }
        }
    }

    fn abandon(&self) -> ModemError {
        debug!(device = %self.config.name, "device dropped during bring-up");
        self.power.power_off();
        self.netdev.set_status(false);
        ModemError::CommandFailed("device dropped during bring-up".to_string())
    }
}

/// One modem on one AT channel
pub struct ModemDevice {
    shared: Arc<Shared>,
    router: Arc<dyn UrcRouter>,
    sockets: Arc<SocketSessionManager>,
    urc: Arc<UrcFrameReader>,
    bringup_task: Mutex<Option<AbortHandle>>,
}

impl ModemDevice {
    /// Start building a device
    pub fn builder(config: ModemConfig) -> ModemDeviceBuilder {
        ModemDeviceBuilder::new(config)
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Device configuration
    pub fn config(&self) -> &ModemConfig {
        &self.shared.config
    }

    /// Current flags
    pub fn state(&self) -> DeviceState {
        *self.shared.state.read()
    }

    /// Check if bring-up completed
    pub fn is_initialized(&self) -> bool {
        self.shared.state.read().initialized
    }

    /// Check if a bring-up is running
    pub fn is_bringup_running(&self) -> bool {
        self.shared.bringup_running.load(Ordering::SeqCst)
    }

    /// Power controller
    pub fn power(&self) -> &Arc<PowerController> {
        &self.shared.power
    }

    /// Socket operations
    pub fn sockets(&self) -> &Arc<SocketSessionManager> {
        &self.sockets
    }

    /// URC handler installed on the channel
    pub fn urc_reader(&self) -> &Arc<UrcFrameReader> {
        &self.urc
    }

    /// Check if the link monitor is running
    pub fn is_link_monitor_running(&self) -> bool {
        self.shared.monitors.is_running(self.name())
    }

    /// Bring the interface up
    pub async fn set_up(&self) -> Result<SetUp, ModemError> {
        if self.is_initialized() {
            return Ok(SetUp::AlreadyUp);
        }
        if self.shared.bringup_running.swap(true, Ordering::SeqCst) {
            return Ok(SetUp::InProgress);
        }

        info!(
            device = %self.name(),
            mode = ?self.shared.config.init_mode,
            "network interface set up"
        );
        match self.shared.config.init_mode {
            BringupMode::Blocking => self.shared.bring_up().await.map(SetUp::Completed),
            BringupMode::Background => {
                let (tx, done) = oneshot::channel();
                let shared = self.shared.clone();
                let join = tokio::spawn(async move {
                    let _ = tx.send(shared.bring_up().await);
                });
                *self.bringup_task.lock() = Some(join.abort_handle());
                Ok(SetUp::Started(BringupHandle { join, done }))
            }
        }
    }

    /// Take the interface down and power the modem off
    pub fn set_down(&self) {
        if !self.is_initialized() {
            return;
        }

        self.shared.power.power_off();
        self.shared.state.write().initialized = false;
        self.shared.netdev.set_status(false);
        debug!(device = %self.name(), "network interface set down");
    }

    /// Run a control command
    pub async fn control(&self, command: ControlCommand) -> Result<(), ModemError> {
        match command {
            ControlCommand::Sleep => self.shared.power.sleep().await,
            ControlCommand::Wakeup => self.shared.power.wakeup().await,
            ControlCommand::Reset => self.shared.power.reset().await,
            other => {
                warn!(device = %self.name(), command = ?other, "not support the control command");
                Err(ModemError::Unsupported(other))
            }
        }
    }

    /// Run a control command given by numeric code
    pub async fn control_code(&self, code: i32) -> Result<(), ModemError> {
        let command = ControlCommand::from_code(code).map_err(|err| {
            error!(device = %self.name(), code, "input error control command");
            err
        })?;
        self.control(command).await
    }

    /// Ping `host` through the modem
    ///
    /// A zero `timeout` uses the configured default.
    pub async fn ping(
        &self,
        host: &str,
        data_len: usize,
        timeout: Duration,
    ) -> Result<PingReply, ModemError> {
        let timeout = if timeout.is_zero() {
            self.shared.config.ping_timeout()
        } else {
            timeout
        };

        let command = format!("AT+NPING={host},{data_len},{}", timeout.as_millis());
        let resp = self.shared.at.exec(&command, timeout).await?;

        let (address, ttl, time_ms) =
            parse_nping(&resp).ok_or_else(|| ModemError::ParseFailed(command.clone()))?;
        let ip_addr = address
            .parse()
            .map_err(|_| ModemError::ParseFailed(format!("bad ping address {address:?}")))?;

        Ok(PingReply {
            ip_addr,
            data_len,
            ttl,
            time_ms,
        })
    }

    /// Resolve a host name on this device
    pub async fn resolve_domain(&self, name: &str) -> Result<String, ModemError> {
        self.sockets.resolve_domain(name).await
    }
}

impl Drop for ModemDevice {
    fn drop(&mut self) {
        self.shared.torn_down.store(true, Ordering::SeqCst);
        if let Some(task) = self.bringup_task.lock().take() {
            task.abort();
        }
        self.router.clear_urc_table();
        self.shared.monitors.stop(&self.shared.config.name);
    }
}

/// Builder for [`ModemDevice`]
pub struct ModemDeviceBuilder {
    config: ModemConfig,
    power_pin: Option<Arc<dyn PowerPin>>,
    netdev: Option<Arc<dyn NetdevSink>>,
    events: Option<Arc<dyn SocketEventHandler>>,
    monitors: Option<Arc<MonitorRegistry>>,
}

impl ModemDeviceBuilder {
    /// Create a builder
    pub fn new(config: ModemConfig) -> Self {
        Self {
            config,
            power_pin: None,
            netdev: None,
            events: None,
            monitors: None,
        }
    }

    /// Switch the supply through `pin`
    #[must_use]
    pub fn power_pin(mut self, pin: Arc<dyn PowerPin>) -> Self {
        self.power_pin = Some(pin);
        self
    }

    /// Report interface state to `netdev`
    #[must_use]
    pub fn netdev(mut self, netdev: Arc<dyn NetdevSink>) -> Self {
        self.netdev = Some(netdev);
        self
    }

    /// Deliver socket events to `events`
    #[must_use]
    pub fn events(mut self, events: Arc<dyn SocketEventHandler>) -> Self {
        self.events = Some(events);
        self
    }

    /// Share link monitors with other devices
    #[must_use]
    pub fn monitors(mut self, monitors: Arc<MonitorRegistry>) -> Self {
        self.monitors = Some(monitors);
        self
    }

    /// Build the device on `channel`
    ///
    /// Installs the socket URCs on the channel and starts with every slot free.
    pub fn build<C>(self, channel: Arc<C>) -> ModemDevice
    where
        C: AtTransport + RawReader + UrcRouter + 'static,
    {
        let config = self.config;
        let at: Arc<dyn AtTransport> = channel.clone();
        let raw: Arc<dyn RawReader> = channel.clone();
        let router: Arc<dyn UrcRouter> = channel;

        match (config.power_pin, self.power_pin.is_some()) {
            (Some(line), false) => {
                warn!(device = %config.name, line, "power pin configured but not supplied");
            }
            (None, true) => {
                debug!(device = %config.name, "power pin supplied without a configured line");
            }
            (Some(line), true) => debug!(device = %config.name, line, "switched supply"),
            (None, false) => {}
        }

        let state = Arc::new(RwLock::new(DeviceState::default()));
        let power = Arc::new(PowerController::new(
            &config.name,
            at.clone(),
            self.power_pin,
            state.clone(),
            config.info_timeout(),
        ));
        power.init_pin();

        let netdev = self
            .netdev
            .unwrap_or_else(|| Arc::new(NetdevState::new(&config.name)) as Arc<dyn NetdevSink>);
        let events = self.events.unwrap_or_else(|| {
            Arc::new(EventBroadcaster::default()) as Arc<dyn SocketEventHandler>
        });

        let table = Arc::new(SocketTable::new());
        table.reset();
        let sockets = Arc::new(SocketSessionManager::new(
            &config.name,
            at.clone(),
            table.clone(),
            config.sockets.clone(),
        ));
        let urc = Arc::new(UrcFrameReader::new(
            &config.name,
            at.clone(),
            raw,
            table,
            events,
            FrameTimeouts::from(&config.sockets),
        ));
        router.set_urc_table(urc.urc_table());

        ModemDevice {
            shared: Arc::new(Shared {
                config,
                at,
                state,
                power,
                netdev,
                monitors: self.monitors.unwrap_or_default(),
                bringup_running: AtomicBool::new(false),
                torn_down: AtomicBool::new(false),
            }),
            router,
            sockets,
            urc,
            bringup_task: Mutex::new(None),
        }
    }
}

/// Registered devices
#[derive(Default)]
pub struct DeviceRegistry {
    devices: RwLock<Vec<Arc<ModemDevice>>>,
}

impl DeviceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a device
    pub fn register(&self, device: Arc<ModemDevice>) {
        self.devices.write().push(device);
    }

    /// Device by name
    pub fn get_by_name(&self, name: &str) -> Option<Arc<ModemDevice>> {
        self.devices.read().iter().find(|d| d.name() == name).cloned()
    }

    /// First device that completed bring-up
    pub fn first_initialized(&self) -> Option<Arc<ModemDevice>> {
        self.devices.read().iter().find(|d| d.is_initialized()).cloned()
    }

    /// Number of devices
    pub fn len(&self) -> usize {
        self.devices.read().len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.devices.read().is_empty()
    }

    /// Resolve a host name on the first initialized device
    pub async fn resolve_domain(&self, name: &str) -> Result<String, ModemError> {
        let device = self.first_initialized().ok_or_else(|| {
            error!("get first init device failed");
            ModemError::NotInitialized
        })?;
        device.resolve_domain(name).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::simulator::{CommandMatch, SimReply, SimulatedModem};

    fn blocking() -> ModemConfig {
        ModemConfig {
            init_mode: BringupMode::Blocking,
            ..Default::default()
        }
    }

    #[test]
    fn test_control_codes() {
        assert_eq!(ControlCommand::from_code(1).unwrap(), ControlCommand::PowerOn);
        assert_eq!(ControlCommand::from_code(4).unwrap(), ControlCommand::Sleep);
        assert_eq!(ControlCommand::from_code(12).unwrap(), ControlCommand::Reset);
        assert!(matches!(ControlCommand::from_code(0), Err(ModemError::InvalidArgument(_))));
        assert!(matches!(ControlCommand::from_code(13), Err(ModemError::InvalidArgument(_))));
        assert!(matches!(ControlCommand::from_code(-4), Err(ModemError::InvalidArgument(_))));

        for code in 1..=12 {
            assert_eq!(ControlCommand::from_code(code).unwrap().code(), code);
        }
    }

    #[tokio::test]
    async fn test_build_installs_urc_table() {
        let sim = Arc::new(SimulatedModem::healthy());
        let device = ModemDevice::builder(blocking()).build(sim.clone());
        assert_eq!(sim.urc_prefixes(), vec!["+NSOCLI:", "+NSONMI:"]);
        assert!(device.sockets().table().occupied().is_empty());

        drop(device);
        assert!(sim.urc_prefixes().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_controls() {
        let sim = Arc::new(SimulatedModem::healthy());
        let device = ModemDevice::builder(blocking()).build(sim.clone());

        for command in [
            ControlCommand::PowerOn,
            ControlCommand::PowerOff,
            ControlCommand::LowPower,
            ControlCommand::NetConnect,
            ControlCommand::NetDisconnect,
            ControlCommand::SetWifiInfo,
            ControlCommand::GetSignal,
            ControlCommand::GetGps,
            ControlCommand::GetVersion,
        ] {
            assert!(!command.is_supported());
            assert!(matches!(
                device.control(command).await,
                Err(ModemError::Unsupported(c)) if c == command
            ));
        }
        assert!(matches!(device.control_code(99).await, Err(ModemError::InvalidArgument(_))));
        assert!(sim.commands().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ping() {
        let sim = Arc::new(SimulatedModem::healthy());
        let device = ModemDevice::builder(blocking()).build(sim.clone());

        let reply = device.ping("example.com", 32, Duration::ZERO).await.unwrap();
        assert_eq!(reply.ip_addr, "93.184.216.34".parse::<IpAddr>().unwrap());
        assert_eq!((reply.data_len, reply.ttl, reply.time_ms), (32, 52, 1330));
        assert_eq!(sim.commands(), vec!["AT+NPING=example.com,32,10000"]);

        sim.on(CommandMatch::prefix("AT+NPING="), SimReply::lines(["+NPING:"]));
        let result = device.ping("example.com", 32, Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ModemError::ParseFailed(_))));
        assert_eq!(sim.commands().last().map(String::as_str), Some("AT+NPING=example.com,32,2000"));
    }

    #[tokio::test]
    async fn test_configured_pin_line_without_pin_resets_softly() {
        let sim = Arc::new(SimulatedModem::healthy());
        let config = ModemConfig {
            power_pin: Some(17),
            ..blocking()
        };
        let device = ModemDevice::builder(config).build(sim.clone());

        assert!(!device.state().power_status);
        device.control(ControlCommand::Reset).await.unwrap();
        assert_eq!(sim.count("AT+NRB"), 1);
    }

    #[tokio::test]
    async fn test_registry_requires_initialized_device() {
        let registry = DeviceRegistry::new();
        assert!(registry.is_empty());
        assert!(matches!(
            registry.resolve_domain("example.com").await,
            Err(ModemError::NotInitialized)
        ));

        let sim = Arc::new(SimulatedModem::healthy());
        registry.register(Arc::new(ModemDevice::builder(blocking()).build(sim)));
        assert_eq!(registry.len(), 1);
        assert!(registry.get_by_name("ctm201").is_some());
        assert!(registry.first_initialized().is_none());
        assert!(matches!(
            registry.resolve_domain("example.com").await,
            Err(ModemError::NotInitialized)
        ));
    }
}
