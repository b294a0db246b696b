//! The `/dev/uhid` virtual-device handle.
//!
//! Opens the kernel's user-space HID character device — provisioning it
//! first when the node is missing — and implements the session's
//! [`DeviceSink`] over it: CREATE2 on the first accepted handshake, INPUT2
//! per report, DESTROY at shutdown.  A dedicated blocking thread drains
//! kernel-originated lifecycle events for diagnostics.
//!
//! # Provisioning
//!
//! Opening `/dev/uhid` can fail for two reasons worth retrying: the `uhid`
//! module is not loaded, or the device node does not exist.  The sequence
//! mirrors what an operator would do by hand:
//!
//! 1. `modprobe uhid` — ignored on failure, since many kernels (including
//!    Android's) build uhid in and forbid modprobe anyway.
//! 2. `mknod /dev/uhid c 10 223` — retried with `sudo` when direct creation
//!    is denied.
//! 3. `chmod 666 /dev/uhid` — best-effort.
//!
//! If the node still cannot be opened the server runs degraded: discovery
//! and handshakes keep working, reports are dropped.  Nothing here is a
//! process-fatal error.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use padlink_core::uhid::{
    encode_create2, encode_destroy, encode_input2, parse_kernel_event, DeviceIdentity,
    KernelEvent, UHID_EVENT_SIZE,
};
use thiserror::Error;
use tracing::{debug, info, trace, warn};

use crate::application::relay::{DeviceSink, DeviceSinkError};

/// The kernel's user-space HID character device.
pub const UHID_DEVICE_PATH: &str = "/dev/uhid";

/// Kernel module providing the device.
const UHID_MODULE: &str = "uhid";

/// Errors from opening or provisioning the device node.
#[derive(Debug, Error)]
pub enum UhidSetupError {
    /// The node exists (or was created) but cannot be opened.
    #[error("failed to open {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },
    /// The node is missing and could not be created.
    #[error("failed to create device node: {0}")]
    NodeCreation(String),
}

/// An open handle to the kernel virtual-device interface.
pub struct UhidDevice {
    file: File,
    identity: DeviceIdentity,
}

impl UhidDevice {
    /// Opens `/dev/uhid`, provisioning the module and node when necessary.
    ///
    /// # Errors
    ///
    /// Returns [`UhidSetupError`] when the node cannot be opened even after
    /// provisioning.  The caller treats this as degraded mode, not a fatal
    /// condition.
    pub fn open(identity: DeviceIdentity) -> Result<Self, UhidSetupError> {
        Self::open_at(UHID_DEVICE_PATH, identity)
    }

    /// Like [`UhidDevice::open`] with an explicit path (used by tests).
    pub fn open_at(path: &str, identity: DeviceIdentity) -> Result<Self, UhidSetupError> {
        // Fast path: the node exists and is writable.
        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(file) => {
                info!("uhid device opened (pre-existing)");
                return Ok(Self { file, identity });
            }
            Err(e) => {
                warn!("could not open {path} directly: {e}; attempting setup");
            }
        }

        if path == UHID_DEVICE_PATH {
            provision_device_node()?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| UhidSetupError::Open {
                path: path.to_string(),
                source,
            })?;
        info!("uhid device opened");
        Ok(Self { file, identity })
    }

    /// Spawns the blocking thread draining kernel lifecycle events.
    ///
    /// The events are logged for diagnostics only — GET_REPORT / SET_REPORT
    /// are never answered; hosts treat the missing reply as unsupported.
    pub fn spawn_event_reader(
        &self,
        running: Arc<AtomicBool>,
    ) -> std::io::Result<std::thread::JoinHandle<()>> {
        let mut file = self.file.try_clone()?;
        std::thread::Builder::new()
            .name("uhid-events".to_string())
            .spawn(move || {
                let mut buf = vec![0u8; UHID_EVENT_SIZE];
                debug!("uhid event reader started");
                while running.load(Ordering::Relaxed) {
                    let n = match file.read(&mut buf) {
                        Ok(n) => n,
                        Err(e) => {
                            if running.load(Ordering::Relaxed) {
                                warn!("uhid event read error: {e}");
                            }
                            break;
                        }
                    };
                    match parse_kernel_event(&buf[..n]) {
                        Some(KernelEvent::Start) => info!("device started by kernel"),
                        Some(KernelEvent::Stop) => info!("device stopped by kernel"),
                        Some(KernelEvent::Open) => info!("device opened by an application"),
                        Some(KernelEvent::Close) => info!("device closed by an application"),
                        Some(KernelEvent::Output) => debug!("output report from host ({n} bytes)"),
                        Some(KernelEvent::GetReport) => debug!("GET_REPORT requested (unanswered)"),
                        Some(KernelEvent::SetReport) => debug!("SET_REPORT requested (unanswered)"),
                        Some(KernelEvent::Other(ty)) => trace!("uhid event type {ty}"),
                        None => trace!("short uhid read ({n} bytes)"),
                    }
                }
                debug!("uhid event reader stopped");
            })
    }
}

impl DeviceSink for UhidDevice {
    fn create_device(&mut self, descriptor: &[u8]) -> Result<(), DeviceSinkError> {
        let event = encode_create2(&self.identity, descriptor)?;
        self.file.write_all(&event)?;
        debug!(
            "CREATE2 written: name={:?} vendor={:#06X} product={:#06X} descriptor={} bytes",
            self.identity.name,
            self.identity.vendor,
            self.identity.product,
            descriptor.len()
        );
        Ok(())
    }

    fn forward_report(&mut self, report: &[u8]) -> Result<(), DeviceSinkError> {
        let event = encode_input2(report)?;
        self.file.write_all(&event)?;
        Ok(())
    }

    fn destroy_device(&mut self) -> Result<(), DeviceSinkError> {
        self.file.write_all(&encode_destroy())?;
        Ok(())
    }
}

// ── Node provisioning ─────────────────────────────────────────────────────────

/// Loads the module (best-effort) and creates the device node if missing.
fn provision_device_node() -> Result<(), UhidSetupError> {
    if !is_module_loaded() {
        warn!("uhid module not loaded, attempting modprobe");
        // Ignored on failure: the capability may be built into the kernel,
        // or modprobe may be forbidden while the node still works.
        match Command::new("modprobe").arg(UHID_MODULE).status() {
            Ok(status) if status.success() => info!("uhid module loaded"),
            Ok(status) => warn!("modprobe exited with {status}, proceeding anyway"),
            Err(e) => warn!("modprobe unavailable: {e}, proceeding anyway"),
        }
    }

    if !Path::new(UHID_DEVICE_PATH).exists() {
        warn!("device node missing, attempting mknod");
        create_device_node()?;
        info!("device node created");
    }
    Ok(())
}

/// Checks `/proc/modules` for the uhid module.
fn is_module_loaded() -> bool {
    std::fs::read_to_string("/proc/modules")
        .map(|modules| modules.contains(UHID_MODULE))
        .unwrap_or(false)
}

/// Creates `/dev/uhid` (char 10:223) and relaxes its permissions.
fn create_device_node() -> Result<(), UhidSetupError> {
    let direct = Command::new("mknod")
        .args([UHID_DEVICE_PATH, "c", "10", "223"])
        .status();
    let created = match direct {
        Ok(status) if status.success() => true,
        _ => {
            // Retry escalated before giving up.
            matches!(
                Command::new("sudo")
                    .args(["mknod", UHID_DEVICE_PATH, "c", "10", "223"])
                    .status(),
                Ok(status) if status.success()
            )
        }
    };
    if !created {
        return Err(UhidSetupError::NodeCreation(format!(
            "mknod {UHID_DEVICE_PATH} failed (also with sudo)"
        )));
    }

    // Best-effort: a read-only node still lets root run the server.
    let chmod = Command::new("chmod").args(["666", UHID_DEVICE_PATH]).status();
    if !matches!(chmod, Ok(status) if status.success()) {
        let escalated = Command::new("sudo")
            .args(["chmod", "666", UHID_DEVICE_PATH])
            .status();
        if !matches!(escalated, Ok(status) if status.success()) {
            warn!("could not relax permissions on {UHID_DEVICE_PATH}");
        }
    }
    Ok(())
}

// ── Tests ─────────────────────────────────────────────────────────────────────
