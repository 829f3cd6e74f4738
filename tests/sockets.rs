//! Socket multiplexing through a device on the simulated modem

use bytes::Bytes;
use cellsock_core::core::socket::{LOCAL_PORT_BASE, SOCKET_SLOTS};
use cellsock_core::{
    BringupMode, CommandMatch, EventBroadcaster, ModemConfig, ModemDevice, ModemError, SimReply,
    SimulatedModem, SocketEvent, SocketEventHandler, SocketKind,
};
use mockall::mock;
use mockall::predicate::eq;
use std::sync::Arc;
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

mock! {
    Events {}
    impl SocketEventHandler for Events {
        fn on_receive(&self, slot: u8, data: Bytes);
        fn on_closed(&self, slot: u8);
    }
}

async fn device_with(
    sim: &Arc<SimulatedModem>,
    events: Arc<dyn SocketEventHandler>,
) -> ModemDevice {
    let config = ModemConfig {
        init_mode: BringupMode::Blocking,
        ..ModemConfig::default()
    };
    let device = ModemDevice::builder(config).events(events).build(sim.clone());
    assert_ok!(device.set_up().await);
    sim.clear_history();
    device
}

#[tokio::test(start_paused = true)]
async fn test_tcp_echo_round_trip() {
    let sim = Arc::new(SimulatedModem::healthy());
    let events = Arc::new(EventBroadcaster::default());
    let mut rx = events.subscribe();
    let device = device_with(&sim, events.clone()).await;
    let sockets = device.sockets();

    assert_ok!(sockets.connect(2, "93.184.216.34", 7, SocketKind::Tcp, true).await);
    let id = sockets.table().device_socket(2).unwrap();
    assert_eq!(
        sim.commands(),
        vec![
            format!("AT+NSOCR=STREAM,6,{},1", LOCAL_PORT_BASE + 2),
            format!("AT+NSOCO={id},93.184.216.34,7"),
        ]
    );

    assert_eq!(sockets.send(2, b"ping", SocketKind::Tcp).await.unwrap(), 4);
    assert_eq!(sim.count(&format!("AT+NSOSD={id},4,70696E67")), 1);

    assert!(sim.deliver(id, "93.184.216.34", 7, b"pong").await);
    assert_eq!(
        rx.try_recv().unwrap(),
        SocketEvent::DataReceived {
            slot: 2,
            data: Bytes::from_static(b"pong"),
        }
    );
    assert_eq!(sim.raw_pending(), 0);

    assert_ok!(sockets.close(2).await);
    assert!(sockets.table().get(2).unwrap().is_free());
    assert_eq!(sim.count(&format!("AT+NSOCL={id}")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_udp_sends_carry_remote() {
    let sim = Arc::new(SimulatedModem::healthy());
    let device = device_with(&sim, Arc::new(EventBroadcaster::default())).await;
    let sockets = device.sockets();

    assert_ok!(sockets.connect(0, "10.1.2.3", 5683, SocketKind::Udp, true).await);
    assert_eq!(sim.count("AT+NSOCO="), 0);

    let id = sockets.table().device_socket(0).unwrap();
    assert_eq!(sockets.send(0, &[0x40, 0x01], SocketKind::Udp).await.unwrap(), 2);
    assert_eq!(sim.count(&format!("AT+NSOST={id},10.1.2.3,5683,2,4001")), 1);
}

#[tokio::test(start_paused = true)]
async fn test_large_send_is_chunked() {
    let sim = Arc::new(SimulatedModem::healthy());
    let device = device_with(&sim, Arc::new(EventBroadcaster::default())).await;
    let sockets = device.sockets();
    assert_ok!(sockets.connect(1, "10.1.2.3", 80, SocketKind::Tcp, true).await);

    let data = vec![0xAB; 3000];
    assert_eq!(sockets.send(1, &data, SocketKind::Tcp).await.unwrap(), 3000);
    assert_eq!(sim.count("AT+NSOSD="), 3);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_sends_do_not_interleave() {
    let sim = Arc::new(SimulatedModem::healthy());
    let device = device_with(&sim, Arc::new(EventBroadcaster::default())).await;
    let sockets = device.sockets();
    assert_ok!(sockets.connect(0, "10.1.2.3", 80, SocketKind::Tcp, true).await);
    assert_ok!(sockets.connect(1, "10.1.2.4", 80, SocketKind::Tcp, true).await);

    sim.set_latency(Duration::from_millis(10));
    sim.clear_history();

    let data = vec![0x5A; 3000];
    let (first, second) = tokio::join!(
        sockets.send(0, &data, SocketKind::Tcp),
        sockets.send(1, &data, SocketKind::Tcp),
    );
    assert_eq!(first.unwrap(), 3000);
    assert_eq!(second.unwrap(), 3000);

    let ids: Vec<String> = sim
        .commands()
        .iter()
        .filter_map(|command| command.strip_prefix("AT+NSOSD="))
        .filter_map(|rest| rest.split(',').next())
        .map(str::to_string)
        .collect();
    assert_eq!(ids.len(), 6);
    assert!(ids[..3].iter().all(|id| *id == ids[0]));
    assert!(ids[3..].iter().all(|id| *id == ids[3]));
    assert_ne!(ids[0], ids[3]);
}

#[tokio::test(start_paused = true)]
async fn test_every_slot_gets_its_own_socket() {
    let sim = Arc::new(SimulatedModem::healthy());
    let device = device_with(&sim, Arc::new(EventBroadcaster::default())).await;
    let sockets = device.sockets();

    for slot in 0..SOCKET_SLOTS as u8 {
        assert_ok!(sockets.connect(slot, "10.1.2.3", 80, SocketKind::Tcp, true).await);
    }
    assert_eq!(sockets.table().occupied().len(), SOCKET_SLOTS);
    assert_err!(
        sockets
            .connect(SOCKET_SLOTS as u8, "10.1.2.3", 80, SocketKind::Tcp, true)
            .await
    );

    let mut ids: Vec<i32> = (0..SOCKET_SLOTS as u8)
        .filter_map(|slot| sockets.table().device_socket(slot))
        .collect();
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), SOCKET_SLOTS);
}

#[tokio::test(start_paused = true)]
async fn test_peer_close_notifies_handler() {
    let sim = Arc::new(SimulatedModem::healthy());
    let mut events = MockEvents::new();
    events
        .expect_on_closed()
        .with(eq(3))
        .times(1)
        .return_const(());
    events.expect_on_receive().never();

    let device = device_with(&sim, Arc::new(events)).await;
    let sockets = device.sockets();
    assert_ok!(sockets.connect(3, "10.1.2.3", 80, SocketKind::Tcp, true).await);
    let id = sockets.table().device_socket(3).unwrap();

    assert!(sim.inject_urc(&format!("+NSOCLI:{id}")).await);
    // the slot stays allocated until the owner closes it
    assert_eq!(sockets.table().device_socket(3), Some(id));
}

#[tokio::test(start_paused = true)]
async fn test_failed_connect_leaves_slot_free() {
    let sim = Arc::new(SimulatedModem::healthy());
    sim.on(CommandMatch::prefix("AT+NSOCO="), SimReply::Error);
    let device = device_with(&sim, Arc::new(EventBroadcaster::default())).await;
    let sockets = device.sockets();

    assert!(matches!(
        sockets.connect(0, "10.1.2.3", 80, SocketKind::Tcp, true).await,
        Err(ModemError::ConnectFailed)
    ));
    assert!(sockets.table().get(0).unwrap().is_free());
    assert_eq!(sim.count("AT+NSOCL="), 1);

    assert!(matches!(
        sockets.send(0, b"x", SocketKind::Tcp).await,
        Err(ModemError::InvalidArgument(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn test_device_drop_uninstalls_socket_urcs() {
    let sim = Arc::new(SimulatedModem::healthy());
    let device = device_with(&sim, Arc::new(EventBroadcaster::default())).await;
    assert_eq!(sim.urc_prefixes().len(), 2);

    drop(device);
    assert!(sim.urc_prefixes().is_empty());
    assert!(!sim.inject_urc("+NSONMI:0,4").await);
}
