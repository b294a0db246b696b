//! PadLink handheld application entry point.
//!
//! Wires the configuration, the transport factory, and the connection
//! manager together, restores the persisted transport mode, and runs until
//! Ctrl-C.  The on-screen input surface is an external component: it holds a
//! reference to the [`ConnectionManager`] and calls
//! [`ConnectionManager::dispatch`] with each sampled input state.
//!
//! # Architecture
//!
//! ```text
//! main()
//!  └─ load_config()            -- persisted mode, trigger policy, ports
//!  └─ ConnectionManager::new() -- single instance, passed by reference
//!       ├─ ClassicHidTransport -- platform HID profile seam
//!       ├─ BleHidTransport     -- platform GATT peripheral seam
//!       └─ UdpTransport        -- discovery + report relay sockets
//! ```

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use padlink_pad::application::connection_manager::{ConnectionManager, TransportMode};
use padlink_pad::application::transport::Transport;
use padlink_pad::infrastructure::platform::{UnavailableGattPeripheral, UnavailableHidProfile};
use padlink_pad::infrastructure::storage::config;
use padlink_pad::infrastructure::transport::ble::BleHidTransport;
use padlink_pad::infrastructure::transport::classic::ClassicHidTransport;
use padlink_pad::infrastructure::transport::udp::{UdpTransport, UdpTransportConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config, using defaults: {e}");
            config::AppConfig::default()
        }
    };

    // Level from config unless RUST_LOG overrides it.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.pad.log_level.clone())),
        )
        .init();

    info!("PadLink starting as {:?}", cfg.pad.device_name);

    // Persist the first-run instance id (and any newly defaulted fields).
    if let Err(e) = config::save_config(&cfg) {
        error!("could not persist config: {e}");
    }

    let device_name = cfg.pad.device_name.clone();
    let udp_config = UdpTransportConfig {
        discovery_port: cfg.network.discovery_port,
        data_port: cfg.network.data_port,
        ..UdpTransportConfig::default()
    };

    let factory = move |mode: TransportMode| -> Arc<dyn Transport> {
        match mode {
            TransportMode::Classic => Arc::new(ClassicHidTransport::new(
                Arc::new(UnavailableHidProfile),
                device_name.clone(),
            )),
            TransportMode::Ble => Arc::new(BleHidTransport::new(
                Arc::new(UnavailableGattPeripheral),
                device_name.clone(),
            )),
            TransportMode::Udp => Arc::new(UdpTransport::new(udp_config.clone())),
        }
    };

    let (manager, mut state_rx) =
        ConnectionManager::new(Box::new(factory), cfg.transport.trigger_policy);
    let manager = Arc::new(manager);

    // Restore the persisted mode.
    manager.switch_mode(cfg.transport.mode).await;

    // Log aggregated connection-state transitions.
    tokio::spawn(async move {
        while state_rx.changed().await.is_ok() {
            info!("connection state: {}", *state_rx.borrow_and_update());
        }
    });

    info!("PadLink ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    manager.shutdown().await;
    info!("PadLink stopped");
    Ok(())
}
