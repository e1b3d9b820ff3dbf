//! streamtun tunnel library
//!
//! Bridges a TUN device and a single TCP connection, forwarding whole
//! IP packets in both directions with the IPv4 total-length field as
//! the framing mechanism.

#![warn(missing_docs)]

pub mod bridge;
pub mod buffer;
pub mod config;
pub mod ctl;
pub mod device;
pub mod error;
pub mod framing;
pub mod io;

// Platform-specific modules - only compile on their target
#[cfg(target_os = "linux")]
pub mod linux;

#[cfg(all(unix, not(target_os = "linux")))]
pub mod bsd;

// Re-exports
pub use bridge::Bridge;
pub use buffer::PacketBuffer;
pub use config::BridgeConfig;
pub use ctl::{CtlCommand, CtlMsg, CtlSocket};
pub use device::DeviceHandle;
pub use error::{TunnelError, TunnelResult};

/// Capacity of each endpoint buffer
pub const BUFFER_SIZE: usize = 32 * 1024;

/// Default TCP port
pub const DEFAULT_PORT: u16 = 5000;

/// Runtime directory for control sockets
pub const RUNTIME_DIR: &str = "/run/streamtun";
