//! Non-blocking transfer primitives shared by the TUN and socket sides.
//!
//! Every descriptor the bridge touches is in non-blocking mode, so each
//! read or write collapses into one of four outcomes the event loop can
//! dispatch on. Retryable errno values are folded into [`Transfer::WouldBlock`]
//! and everything unrecoverable into [`Transfer::Closed`], keeping errno
//! handling out of the loop itself.

use std::io;
use std::os::fd::RawFd;

use socket2::Socket;
use tracing::warn;

/// Outcome of a single non-blocking read or write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    /// `n` bytes were moved. Never zero.
    Data(usize),
    /// The operation would block or was interrupted; retry after poll.
    WouldBlock,
    /// The caller passed an empty buffer, nothing to do.
    Empty,
    /// End of stream or an unrecoverable descriptor error.
    Closed,
}

/// Read from `fd` into `buf` without blocking.
pub fn try_read(fd: RawFd, buf: &mut [u8]) -> Transfer {
    if buf.is_empty() {
        return Transfer::Empty;
    }
    let ret = unsafe { libc::read(fd, buf.as_mut_ptr() as *mut libc::c_void, buf.len()) };
    match ret {
        n if n > 0 => Transfer::Data(n as usize),
        0 => Transfer::Closed,
        _ => match io::Error::last_os_error() {
            e if retryable(&e) => Transfer::WouldBlock,
            e => {
                warn!("read failed: {e}");
                Transfer::Closed
            }
        },
    }
}

/// Write `buf` to `fd` without blocking.
pub fn try_write(fd: RawFd, buf: &[u8]) -> Transfer {
    if buf.is_empty() {
        return Transfer::Empty;
    }
    let ret = unsafe { libc::write(fd, buf.as_ptr() as *const libc::c_void, buf.len()) };
    match ret {
        n if n > 0 => Transfer::Data(n as usize),
        0 => Transfer::Closed,
        _ => match io::Error::last_os_error() {
            e if retryable(&e) => Transfer::WouldBlock,
            e => {
                warn!("write failed: {e}");
                Transfer::Closed
            }
        },
    }
}

fn retryable(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EAGAIN) | Some(libc::EWOULDBLOCK) | Some(libc::EINTR)
    )
}

/// Put a raw descriptor into non-blocking mode.
pub fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let ret = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Apply the bridge's TCP tuning to a freshly connected stream.
///
/// Nagle is always disabled. A congestion control algorithm is applied
/// only when requested, and a kernel that rejects the name is logged
/// and otherwise ignored so the bridge still comes up.
pub fn configure_stream(socket: &Socket, congestion: Option<&str>) {
    if let Err(e) = socket.set_nodelay(true) {
        warn!("could not disable nagle: {e}");
    }
    if let Some(algo) = congestion {
        if let Err(e) = set_congestion(socket, algo) {
            warn!(algorithm = algo, "could not set congestion control: {e}");
        }
    }
}

#[cfg(target_os = "linux")]
fn set_congestion(socket: &Socket, algo: &str) -> io::Result<()> {
    use std::os::fd::AsRawFd;

    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_TCP,
            libc::TCP_CONGESTION,
            algo.as_ptr() as *const libc::c_void,
            algo.len() as libc::socklen_t,
        )
    };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_congestion(_socket: &Socket, _algo: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "congestion control selection requires linux",
    ))
}
