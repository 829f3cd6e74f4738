//! Device lifecycle against the simulated modem

use cellsock_core::core::bringup::BringupPolicy;
use cellsock_core::core::link_monitor::MonitorRegistry;
use cellsock_core::{
    BringupMode, CommandMatch, DeviceRegistry, ModemConfig, ModemDevice, ModemError, NetdevSink,
    NetdevState, SetUp, SimReply, SimulatedModem, SimulatedPin, Stage,
};
use mockall::mock;
use mockall::predicate::eq;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

mock! {
    Netdev {}
    impl NetdevSink for Netdev {
        fn set_status(&self, up: bool);
        fn set_link_status(&self, up: bool);
        fn set_dhcp_status(&self, enabled: bool);
        fn set_hwaddr(&self, hwaddr: &[u8]);
        fn set_ipaddr(&self, addr: IpAddr);
    }
}

fn config(mode: BringupMode) -> ModemConfig {
    ModemConfig {
        name: "nb0".to_string(),
        init_mode: mode,
        ..ModemConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_blocking_set_up_reports_interface() {
    let sim = Arc::new(SimulatedModem::healthy());
    let netdev = Arc::new(NetdevState::new("nb0"));
    let device = ModemDevice::builder(config(BringupMode::Blocking))
        .netdev(netdev.clone())
        .build(sim.clone());

    let report = match device.set_up().await.unwrap() {
        SetUp::Completed(report) => report,
        other => panic!("unexpected {other:?}"),
    };
    assert_eq!(report.attempts, 1);
    assert_eq!(report.ip_address.as_deref(), Some("10.0.0.7"));
    assert!(device.is_initialized());
    assert!(device.is_link_monitor_running());

    // let the monitor take its first sample
    tokio::time::sleep(Duration::from_millis(1)).await;

    let snap = netdev.snapshot();
    assert!(snap.up && snap.link_up && snap.dhcp);
    assert_eq!(snap.hwaddr_string(), "0c:22:38:4e:5a:0c:22:05");
    assert_eq!(snap.ipaddr, Some("10.0.0.7".parse().unwrap()));
    assert!(snap.link_reports >= 1);

    assert!(matches!(device.set_up().await.unwrap(), SetUp::AlreadyUp));
}

#[tokio::test(start_paused = true)]
async fn test_background_set_up_rejects_overlap() {
    let sim = Arc::new(SimulatedModem::healthy());
    let device = ModemDevice::builder(config(BringupMode::Background)).build(sim.clone());

    let handle = match device.set_up().await.unwrap() {
        SetUp::Started(handle) => handle,
        other => panic!("unexpected {other:?}"),
    };
    assert!(device.is_bringup_running());
    assert!(matches!(device.set_up().await.unwrap(), SetUp::InProgress));

    let report = handle.wait().await.unwrap();
    assert_eq!(report.attempts, 1);
    assert!(device.is_initialized());
    assert!(!device.is_bringup_running());
    assert_eq!(sim.count("AT+NSOCR="), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_bringup_takes_interface_down() {
    let sim = Arc::new(SimulatedModem::healthy());
    sim.on(CommandMatch::exact("AT+NCCID?"), SimReply::Error);

    let mut netdev = MockNetdev::new();
    netdev
        .expect_set_status()
        .with(eq(false))
        .times(1)
        .return_const(());

    let mut cfg = config(BringupMode::Blocking);
    cfg.bringup = BringupPolicy {
        max_attempts: 2,
        ..BringupPolicy::default()
    };
    let device = ModemDevice::builder(cfg)
        .netdev(Arc::new(netdev))
        .build(sim.clone());

    let err = device.set_up().await.unwrap_err();
    assert!(matches!(
        err,
        ModemError::BringupFailed {
            attempts: 2,
            stage: Stage::SimCheck,
            ..
        }
    ));
    assert!(!device.is_initialized());
    assert!(!device.is_bringup_running());
    assert!(!device.is_link_monitor_running());
    assert!(!device.state().power_status);
}

#[tokio::test(start_paused = true)]
async fn test_power_pin_skips_soft_reset() {
    let sim = Arc::new(SimulatedModem::healthy());
    let pin = Arc::new(SimulatedPin::new());
    let device = ModemDevice::builder(config(BringupMode::Blocking))
        .power_pin(pin.clone())
        .build(sim.clone());

    assert_eq!(pin.level(), Some(false));
    assert!(matches!(device.set_up().await.unwrap(), SetUp::Completed(_)));
    assert_eq!(pin.level(), Some(true));
    assert_eq!(sim.count("AT+NRB"), 0);

    device.set_down();
    assert_eq!(pin.level(), Some(false));
    assert!(!device.is_initialized());
}

#[tokio::test(start_paused = true)]
async fn test_set_down_keeps_monitor() {
    let sim = Arc::new(SimulatedModem::healthy());
    let netdev = Arc::new(NetdevState::new("nb0"));
    let device = ModemDevice::builder(config(BringupMode::Blocking))
        .netdev(netdev.clone())
        .build(sim.clone());
    device.set_up().await.unwrap();

    device.set_down();
    let state = device.state();
    assert!(!state.power_status && !state.initialized);
    assert!(!netdev.snapshot().up);
    assert!(device.is_link_monitor_running());

    // next sample sees the modem off without asking it
    sim.clear_history();
    tokio::time::sleep(device.config().link_monitor_period() + Duration::from_secs(1)).await;
    assert!(!netdev.snapshot().link_up);
    assert_eq!(sim.count("AT+CEREG?"), 0);
}

#[tokio::test(start_paused = true)]
async fn test_control_codes() {
    let sim = Arc::new(SimulatedModem::healthy());
    let device = ModemDevice::builder(config(BringupMode::Blocking)).build(sim.clone());
    device.set_up().await.unwrap();

    device.control_code(4).await.unwrap();
    assert!(device.state().sleep_status);
    assert_eq!(sim.count("AT+CPSMS=1"), 1);

    device.control_code(5).await.unwrap();
    assert!(!device.state().sleep_status);

    assert!(matches!(
        device.control_code(10).await,
        Err(ModemError::Unsupported(_))
    ));
    assert!(matches!(
        device.control_code(99).await,
        Err(ModemError::InvalidArgument(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_registry_resolves_on_initialized_device() {
    let registry = DeviceRegistry::new();
    let monitors = Arc::new(MonitorRegistry::new());
    let sim = Arc::new(SimulatedModem::healthy());
    let device = Arc::new(
        ModemDevice::builder(config(BringupMode::Blocking))
            .monitors(monitors.clone())
            .build(sim.clone()),
    );
    registry.register(device.clone());

    assert!(matches!(
        registry.resolve_domain("example.com").await,
        Err(ModemError::NotInitialized)
    ));

    device.set_up().await.unwrap();
    assert!(monitors.is_running("nb0"));
    assert_eq!(
        registry.resolve_domain("example.com").await.unwrap(),
        "93.184.216.34"
    );
    assert!(registry.get_by_name("nb0").is_some());
    assert!(registry.get_by_name("nb1").is_none());
}

#[tokio::test(start_paused = true)]
async fn test_drop_cancels_background_bringup() {
    let sim = Arc::new(SimulatedModem::healthy());
    let monitors = Arc::new(MonitorRegistry::new());
    let device = ModemDevice::builder(config(BringupMode::Background))
        .monitors(monitors.clone())
        .build(sim.clone());

    let handle = match device.set_up().await.unwrap() {
        SetUp::Started(handle) => handle,
        other => panic!("unexpected {other:?}"),
    };

    // powered on and waiting out the reset
    tokio::time::sleep(Duration::from_millis(100)).await;
    drop(device);
    sim.clear_history();

    tokio::time::sleep(Duration::from_secs(200)).await;
    assert!(sim.commands().is_empty());
    assert!(!monitors.is_running("nb0"));
    assert!(handle.wait().await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_aborted_bringup_allows_restart() {
    let sim = Arc::new(SimulatedModem::healthy());
    let device = ModemDevice::builder(config(BringupMode::Background)).build(sim.clone());

    let handle = match device.set_up().await.unwrap() {
        SetUp::Started(handle) => handle,
        other => panic!("unexpected {other:?}"),
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(device.state().power_status);

    handle.abort();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert!(handle.is_finished());
    assert!(!device.is_bringup_running());
    assert!(!device.state().power_status);
    assert!(!device.is_initialized());
    assert!(handle.wait().await.is_err());

    let handle = match device.set_up().await.unwrap() {
        SetUp::Started(handle) => handle,
        other => panic!("unexpected {other:?}"),
    };
    assert!(handle.wait().await.is_ok());
    assert!(device.is_initialized());
    assert!(device.is_link_monitor_running());
}
