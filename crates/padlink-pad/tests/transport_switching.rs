//! Integration tests for the connection manager driving the UDP transport
//! end to end: mode restore, handshake, dispatch encoding, and the
//! single-active-transport rule — all through the public API, against a
//! fake server socket.

use std::sync::Arc;
use std::time::Duration;

use padlink_core::discovery::{DESCRIPTOR_ACK, DESCRIPTOR_MAGIC};
use padlink_core::{buttons, ConnectionState, HatDirection, LogicalInputState, TriggerPolicy};
use padlink_pad::application::connection_manager::{ConnectionManager, TransportMode};
use padlink_pad::application::transport::Transport;
use padlink_pad::infrastructure::transport::udp::{UdpTransport, UdpTransportConfig};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// A stand-in for the server's data port: acknowledges handshakes and
/// forwards report datagrams on a channel.
async fn spawn_fake_server() -> (std::net::SocketAddr, mpsc::UnboundedReceiver<Vec<u8>>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let mut buf = vec![0u8; 8192];
        loop {
            let Ok((len, src)) = socket.recv_from(&mut buf).await else {
                break;
            };
            let datagram = buf[..len].to_vec();
            if datagram.starts_with(DESCRIPTOR_MAGIC) {
                let _ = socket.send_to(DESCRIPTOR_ACK, src).await;
            } else {
                let _ = tx.send(datagram);
            }
        }
    });
    (addr, rx)
}

fn udp_manager(policy: TriggerPolicy) -> (ConnectionManager, tokio::sync::watch::Receiver<ConnectionState>) {
    ConnectionManager::new(
        Box::new(|mode| {
            assert_eq!(mode, TransportMode::Udp);
            Arc::new(UdpTransport::new(UdpTransportConfig {
                handshake_timeout: Duration::from_millis(300),
                liveness_interval: Duration::from_millis(50),
                ..UdpTransportConfig::default()
            })) as Arc<dyn Transport>
        }),
        policy,
    )
}

#[tokio::test]
async fn test_udp_mode_connects_and_dispatches_extended_reports() {
    let (server, mut rx) = spawn_fake_server().await;
    let (manager, _state) = udp_manager(TriggerPolicy::PreferAnalog);

    manager.switch_mode(TransportMode::Udp).await;
    assert!(manager.connect(&server.to_string()).await);

    let mut state = LogicalInputState::NEUTRAL;
    state.set_button(buttons::A, true);
    state.hat = HatDirection::East;
    state.l2 = 64;
    manager.dispatch(&state);

    let datagram = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .expect("report must arrive")
        .unwrap();
    // The 6-axis layout: [id][lx][ly][rx][l2][r2][ry][btnLo][btnHi][hat].
    assert_eq!(datagram, vec![1, 127, 127, 127, 64, 0, 127, 1, 0, 2]);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_digital_trigger_policy_flows_through_dispatch() {
    let (server, mut rx) = spawn_fake_server().await;
    let (manager, _state) = udp_manager(TriggerPolicy::PreferDigital);

    manager.switch_mode(TransportMode::Udp).await;
    assert!(manager.connect(&server.to_string()).await);

    let mut state = LogicalInputState::NEUTRAL;
    state.l2 = 90; // ignored: the digital bit is clear
    state.set_button(buttons::R2, true);
    manager.dispatch(&state);

    let datagram = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(datagram[4], 0, "l2 forced to zero under PreferDigital");
    assert_eq!(datagram[5], 255, "r2 forced to full scale from the bit");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_aggregated_state_reaches_connected_and_reverts_on_shutdown() {
    let (server, _rx) = spawn_fake_server().await;
    let (manager, mut state_rx) = udp_manager(TriggerPolicy::PreferAnalog);

    manager.switch_mode(TransportMode::Udp).await;
    assert!(manager.connect(&server.to_string()).await);

    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            if *state_rx.borrow_and_update() == ConnectionState::Connected {
                break;
            }
            state_rx.changed().await.unwrap();
        }
    })
    .await
    .expect("aggregated state must reach Connected");

    manager.shutdown().await;
    assert_eq!(*state_rx.borrow(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_dispatch_before_any_mode_is_selected_is_a_no_op() {
    let (manager, _state) = udp_manager(TriggerPolicy::PreferAnalog);
    // No switch_mode call: must not panic, must not consume the factory.
    manager.dispatch(&LogicalInputState::NEUTRAL);
    assert_eq!(manager.current_mode(), None);
}

#[tokio::test]
async fn test_failed_connect_leaves_manager_usable() {
    // A server that never acknowledges.
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let silent_addr = silent.local_addr().unwrap();
    let (manager, _state) = udp_manager(TriggerPolicy::PreferAnalog);

    manager.switch_mode(TransportMode::Udp).await;
    assert!(!manager.connect(&silent_addr.to_string()).await);

    // A follow-up attempt against a working server still succeeds.
    let (server, _rx) = spawn_fake_server().await;
    assert!(manager.connect(&server.to_string()).await);
    manager.shutdown().await;
}
