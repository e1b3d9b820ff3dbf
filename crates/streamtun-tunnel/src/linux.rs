//! Linux TUN implementation
//!
//! Uses the standard Linux TUN/TAP driver via /dev/net/tun

use crate::device::TunDevice;
use crate::error::{TunnelError, TunnelResult};
use std::fs::{File, OpenOptions};
use std::os::fd::{AsRawFd, RawFd};

/// Linux TUN device
pub struct LinuxTun {
    name: String,
    fd: File,
}

// ioctl constants
const TUNSETIFF: libc::c_ulong = 0x400454ca;
const IFF_TUN: libc::c_short = 0x0001;
const IFF_NO_PI: libc::c_short = 0x1000;

#[repr(C)]
struct IfReq {
    ifr_name: [libc::c_char; libc::IFNAMSIZ],
    ifr_flags: libc::c_short,
    _padding: [u8; 22],
}

impl LinuxTun {
    /// Create a new TUN device
    pub fn create(name: &str) -> TunnelResult<Self> {
        let fd = OpenOptions::new()
            .read(true)
            .write(true)
            .open("/dev/net/tun")
            .map_err(|e| {
                if e.raw_os_error() == Some(libc::EACCES) {
                    TunnelError::PermissionDenied(
                        "Cannot open /dev/net/tun. Try running as root or with CAP_NET_ADMIN"
                            .into(),
                    )
                } else {
                    TunnelError::DeviceCreation(format!("Failed to open /dev/net/tun: {}", e))
                }
            })?;

        let mut ifr = IfReq {
            ifr_name: [0; libc::IFNAMSIZ],
            ifr_flags: IFF_TUN | IFF_NO_PI,
            _padding: [0; 22],
        };

        // An all-zero name lets the kernel assign tun%d.
        let name_bytes = name.as_bytes();
        let copy_len = name_bytes.len().min(libc::IFNAMSIZ - 1);
        for (i, &b) in name_bytes[..copy_len].iter().enumerate() {
            ifr.ifr_name[i] = b as libc::c_char;
        }

        let ret = unsafe { libc::ioctl(fd.as_raw_fd(), TUNSETIFF, &mut ifr as *mut IfReq) };

        if ret < 0 {
            let err = std::io::Error::last_os_error();
            return Err(TunnelError::DeviceCreation(format!(
                "Failed to create TUN device: {}",
                err
            )));
        }

        // The kernel may have picked a different name than requested.
        let actual_name = unsafe {
            let ptr = ifr.ifr_name.as_ptr();
            let len = libc::strlen(ptr);
            let slice = std::slice::from_raw_parts(ptr as *const u8, len);
            String::from_utf8_lossy(slice).to_string()
        };

        tracing::info!("Created TUN device: {}", actual_name);

        Ok(Self {
            name: actual_name,
            fd,
        })
    }
}

impl TunDevice for LinuxTun {
    fn name(&self) -> &str {
        &self.name
    }

    fn raw_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }
}

impl Drop for LinuxTun {
    fn drop(&mut self) {
        tracing::debug!("Closing TUN device: {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ifreq_matches_kernel_layout() {
        // The kernel's struct ifreq is IFNAMSIZ bytes of name plus a
        // 24-byte union; TUNSETIFF reads flags from the union's head.
        assert_eq!(std::mem::size_of::<IfReq>(), libc::IFNAMSIZ + 24);
    }
}
