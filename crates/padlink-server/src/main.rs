//! PadLink virtual-device server entry point.
//!
//! Opens (or provisions) the kernel uhid interface, binds the two UDP
//! ports, and runs the discovery responder, the active broadcaster, and the
//! report relay until Ctrl-C.  At shutdown the virtual device is destroyed
//! before the handle closes.
//!
//! # Failure policy
//!
//! - uhid setup failure → degraded mode: discovery and handshakes still
//!   answer, reports are dropped.
//! - UDP port bind failure → fatal; nothing works without the ports.
//! - everything else → logged, never fatal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use padlink_core::uhid::DeviceIdentity;
use padlink_server::application::relay::RelaySession;
use padlink_server::infrastructure::network;
use padlink_server::infrastructure::storage::config;
use padlink_server::infrastructure::uhid::UhidDevice;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = match config::load_config() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("failed to load config, using defaults: {e}");
            config::ServerConfig::default()
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(cfg.server.log_level.clone())),
        )
        .init();

    info!("PadLink server starting");

    let running = Arc::new(AtomicBool::new(true));

    // ── Kernel interface ──────────────────────────────────────────────────────
    let identity = DeviceIdentity::from(&cfg.device);
    let device = match UhidDevice::open(identity) {
        Ok(device) => {
            if let Err(e) = device.spawn_event_reader(Arc::clone(&running)) {
                warn!("could not start uhid event reader: {e}");
            }
            Some(device)
        }
        Err(e) => {
            warn!("uhid setup failed: {e} (continuing without a virtual device)");
            None
        }
    };
    let session = Arc::new(Mutex::new(RelaySession::new(device)));

    // ── Sockets (the only fatal startup errors) ───────────────────────────────
    let discovery_socket = Arc::new(
        network::bind_port(cfg.network.discovery_port)
            .await
            .context("discovery port unavailable")?,
    );
    let data_socket = Arc::new(
        network::bind_port(cfg.network.data_port)
            .await
            .context("data port unavailable")?,
    );

    info!(
        "listening for discovery on port {} and reports on port {}",
        cfg.network.discovery_port, cfg.network.data_port
    );
    info!(
        "advertising as {:?} ({})",
        cfg.server.device_name,
        network::local_ip()
    );

    // ── Services ──────────────────────────────────────────────────────────────
    tokio::spawn(network::run_discovery_responder(
        Arc::clone(&discovery_socket),
        cfg.server.device_name.clone(),
        Arc::clone(&running),
    ));
    tokio::spawn(network::run_broadcaster(
        Arc::clone(&discovery_socket),
        Arc::clone(&session),
        cfg.server.device_name.clone(),
        cfg.network.discovery_port,
        Arc::clone(&running),
    ));
    tokio::spawn(network::run_data_loop(
        Arc::clone(&data_socket),
        Arc::clone(&session),
        Arc::clone(&running),
    ));

    info!("PadLink server ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c().await?;
    info!("shutting down");

    running.store(false, Ordering::Relaxed);
    session.lock().unwrap_or_else(|e| e.into_inner()).shutdown();

    info!("PadLink server stopped");
    Ok(())
}
