//! TUN device abstraction
//!
//! This module provides a cross-platform interface for TUN devices.

use crate::error::TunnelResult;
use std::os::fd::RawFd;

#[cfg(not(unix))]
use crate::error::TunnelError;

/// TUN device trait for cross-platform operations
pub trait TunDevice {
    /// Get the device name
    fn name(&self) -> &str;

    /// Get the raw descriptor for event-loop registration
    fn raw_fd(&self) -> RawFd;
}

/// Handle to a TUN device - cross-platform wrapper
pub struct DeviceHandle {
    #[cfg(target_os = "linux")]
    inner: crate::linux::LinuxTun,

    #[cfg(all(unix, not(target_os = "linux")))]
    inner: crate::bsd::BsdTun,
}

impl DeviceHandle {
    /// Create a new TUN device
    ///
    /// On Linux an empty `name` lets the kernel pick one; the assigned
    /// name is reported by [`DeviceHandle::name`].
    pub fn create(name: &str) -> TunnelResult<Self> {
        #[cfg(target_os = "linux")]
        {
            let inner = crate::linux::LinuxTun::create(name)?;
            Ok(Self { inner })
        }

        #[cfg(all(unix, not(target_os = "linux")))]
        {
            let _ = name;
            let inner = crate::bsd::BsdTun::create()?;
            Ok(Self { inner })
        }

        #[cfg(not(unix))]
        {
            let _ = name;
            Err(TunnelError::PlatformNotSupported(
                "TUN devices not supported on this platform".into(),
            ))
        }
    }

    /// Get device name
    pub fn name(&self) -> &str {
        #[cfg(unix)]
        {
            self.inner.name()
        }

        #[cfg(not(unix))]
        {
            "unknown"
        }
    }

    /// Get the raw descriptor
    pub fn raw_fd(&self) -> RawFd {
        #[cfg(unix)]
        {
            self.inner.raw_fd()
        }

        #[cfg(not(unix))]
        {
            -1
        }
    }
}
