//! TUN implementation for BSD-style unices
//!
//! No clone device here: each interface has its own device node, so
//! creation probes /dev/tun0 through /dev/tun31 and takes the first
//! node that opens.

use crate::device::TunDevice;
use crate::error::{TunnelError, TunnelResult};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};

const MAX_DEVICE_ID: u32 = 32;

/// BSD TUN device
pub struct BsdTun {
    name: String,
    fd: File,
}

impl BsdTun {
    /// Open the first available TUN device node
    pub fn create() -> TunnelResult<Self> {
        for dev_id in 0..MAX_DEVICE_ID {
            let name = format!("tun{}", dev_id);
            let path = format!("/dev/{}", name);
            match OpenOptions::new().read(true).write(true).open(&path) {
                Ok(fd) => {
                    tracing::info!("Created TUN device: {}", name);
                    return Ok(Self { name, fd });
                }
                Err(e) if e.raw_os_error() == Some(libc::EACCES) => {
                    return Err(TunnelError::PermissionDenied(format!(
                        "Cannot open {}. Try running as root",
                        path
                    )));
                }
                Err(_) => continue,
            }
        }

        Err(TunnelError::DeviceCreation(format!(
            "No usable device node in /dev/tun0..{}",
            MAX_DEVICE_ID - 1
        )))
    }
}

impl TunDevice for BsdTun {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Drop for BsdTun {
    fn drop(&mut self) {
        tracing::debug!("Closing TUN device: {}", self.name);
    }
}
