//! Connection lifecycle and the packet bridge loop.
//!
//! This module implements the main event loop that:
//! - Acquires a TCP connection (accept in listener mode, dial otherwise),
//!   retrying with a fixed backoff until the shutdown flag is raised
//! - Polls the TUN and socket descriptors and pumps whole IP packets
//!   between them, using the IPv4 total-length field as the only framing
//! - Restarts the connection on peer loss or stream desynchronization
//! - Terminates with a distinct error class when the local device fails

use std::io;
use std::net::{Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use crate::buffer::PacketBuffer;
use crate::config::BridgeConfig;
use crate::device::DeviceHandle;
use crate::error::{TunnelError, TunnelResult};
use crate::framing::{packet_size, stamp_packet_size, Boundary, IPV4_HEADER_LEN};
use crate::io::{configure_stream, set_nonblocking, try_read, try_write, Transfer};

/// Delay between connection acquisition attempts.
const RETRY_DELAY: Duration = Duration::from_millis(100);

/// Whether the current connection can keep carrying traffic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Keep bridging on this connection.
    Continue,
    /// Abandon this connection and acquire a new one.
    Restart,
}

/// TUN-to-TCP packet bridge
pub struct Bridge {
    config: BridgeConfig,
    shutdown: Arc<AtomicBool>,
}

impl Bridge {
    /// Create a bridge from a validated configuration
    pub fn new(config: BridgeConfig) -> TunnelResult<Self> {
        config.validate().map_err(TunnelError::Config)?;
        Ok(Self {
            config,
            shutdown: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Get the shutdown flag for signal handler setup
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Signal shutdown
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Run the bridge until shutdown (blocking).
    ///
    /// The TUN device persists for the whole run; the TCP connection is
    /// acquired, bridged, and on recoverable loss reacquired in an
    /// unbounded retry loop bounded only by the shutdown flag.
    pub fn run(&self) -> TunnelResult<()> {
        let device = DeviceHandle::create(&self.config.device_name)?;
        set_nonblocking(device.raw_fd())?;

        let transport = Transport::new(&self.config)?;

        let mut tun_buf = PacketBuffer::new(self.config.buffer_size);
        let mut sock_buf = PacketBuffer::new(self.config.buffer_size);

        while !self.shutdown.load(Ordering::Relaxed) {
            let stream = match transport.acquire() {
                Some(stream) => stream,
                None => {
                    std::thread::sleep(RETRY_DELAY);
                    continue;
                }
            };

            if let Err(e) = set_nonblocking(stream.as_raw_fd()) {
                tracing::warn!("could not set connection non-blocking: {}", e);
                continue;
            }
            configure_stream(&stream, self.config.congestion.as_deref());
            tracing::info!("bridging {} over the connection", device.name());

            match self.bridge_connection(
                device.raw_fd(),
                stream.as_raw_fd(),
                &mut tun_buf,
                &mut sock_buf,
            )? {
                Flow::Restart => {
                    tracing::warn!("connection lost, reacquiring");
                    // A fresh connection is a fresh logical stream; the
                    // old one's unparsed tail must not leak into it.
                    sock_buf.clear();
                }
                Flow::Continue => break,
            }
        }

        tracing::info!("bridge shut down");
        Ok(())
    }

    /// Pump packets over one connection until it fails or shutdown.
    ///
    /// Returns `Flow::Restart` when the connection is gone but the
    /// process should continue, `Flow::Continue` on shutdown. Local
    /// device failure and poll failure propagate as errors.
    fn bridge_connection(
        &self,
        tun_fd: RawFd,
        sock_fd: RawFd,
        tun_buf: &mut PacketBuffer,
        sock_buf: &mut PacketBuffer,
    ) -> TunnelResult<Flow> {
        let mut tun_want_write = false;
        let mut sock_want_write = false;
        let mut pending = 0usize;

        while !self.shutdown.load(Ordering::Relaxed) {
            let mut fds = [
                libc::pollfd {
                    fd: tun_fd,
                    events: poll_events(tun_want_write),
                    revents: 0,
                },
                libc::pollfd {
                    fd: sock_fd,
                    events: poll_events(sock_want_write),
                    revents: 0,
                },
            ];

            let ret = unsafe { libc::poll(fds.as_mut_ptr(), 2, -1) };
            if ret < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    // Signal delivery; the loop condition rechecks the flag.
                    continue;
                }
                return Err(TunnelError::Io(err));
            }

            tun_buf.compact();

            if fds[0].revents & libc::POLLIN != 0 {
                fill_from_tun(tun_fd, tun_buf)?;
            }

            if fds[1].revents & libc::POLLOUT != 0 {
                sock_want_write = false;
            }

            if tun_buf.read_len() > 0 {
                flush_to_socket(sock_fd, tun_buf, &mut sock_want_write)?;
            }

            sock_buf.compact();

            if fds[1].revents & libc::POLLIN != 0 {
                if read_from_socket(sock_fd, sock_buf) == Flow::Restart {
                    return Ok(Flow::Restart);
                }
            }

            if fds[0].revents & libc::POLLOUT != 0 {
                tun_want_write = false;
            }

            if drain_to_tun(tun_fd, sock_buf, &mut pending, &mut tun_want_write)? == Flow::Restart
            {
                return Ok(Flow::Restart);
            }
        }

        Ok(Flow::Continue)
    }
}

fn poll_events(want_write: bool) -> libc::c_short {
    if want_write {
        libc::POLLIN | libc::POLLOUT
    } else {
        libc::POLLIN
    }
}

// ─── Connection acquisition ──────────────────────────────────────────

/// How new connections are obtained: a pre-bound listening socket, or
/// an ordered list of resolved candidates to dial.
enum Transport {
    Listener(Socket),
    Dialer(Vec<SocketAddr>),
}

impl Transport {
    fn new(config: &BridgeConfig) -> TunnelResult<Self> {
        if config.listener {
            let candidates = match &config.host {
                Some(host) => resolve(host, config.port)?,
                None => vec![SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port))],
            };
            let listener = bind_listener(&candidates)?;
            Ok(Transport::Listener(listener))
        } else {
            // validate() guarantees a host in dialer mode
            let host = config.host.as_deref().unwrap_or_default();
            Ok(Transport::Dialer(resolve(host, config.port)?))
        }
    }

    /// Try once to obtain a connection. `None` means back off and retry.
    fn acquire(&self) -> Option<Socket> {
        match self {
            Transport::Listener(listener) => match listener.accept() {
                Ok((stream, peer)) => {
                    tracing::info!("accepted connection from {:?}", peer.as_socket());
                    Some(stream)
                }
                Err(e) => {
                    tracing::debug!("accept failed: {}", e);
                    None
                }
            },
            Transport::Dialer(candidates) => {
                for addr in candidates {
                    match dial(*addr) {
                        Ok(stream) => {
                            tracing::info!("connected to {}", addr);
                            return Some(stream);
                        }
                        Err(e) => tracing::debug!("connect to {} failed: {}", addr, e),
                    }
                }
                None
            }
        }
    }
}

fn resolve(host: &str, port: u16) -> TunnelResult<Vec<SocketAddr>> {
    let candidates: Vec<SocketAddr> = (host, port)
        .to_socket_addrs()
        .map_err(|e| TunnelError::Resolution(format!("{}:{}: {}", host, port, e)))?
        .collect();
    if candidates.is_empty() {
        return Err(TunnelError::Resolution(format!(
            "{}:{} yielded no addresses",
            host, port
        )));
    }
    Ok(candidates)
}

fn bind_listener(candidates: &[SocketAddr]) -> TunnelResult<Socket> {
    let mut last_err = None;
    for addr in candidates {
        match try_bind(*addr) {
            Ok(listener) => {
                tracing::info!("listening on {}", addr);
                return Ok(listener);
            }
            Err(e) => last_err = Some(e),
        }
    }
    Err(TunnelError::Io(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no candidate address")
    })))
}

fn try_bind(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1)?;
    Ok(socket)
}

fn dial(addr: SocketAddr) -> io::Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    match socket.connect(&addr.into()) {
        Ok(()) => Ok(socket),
        // An interrupted connect completes asynchronously; the first
        // poll on the descriptor picks it up like any other readiness.
        Err(e) if e.raw_os_error() == Some(libc::EINTR) => Ok(socket),
        Err(e) => Err(e),
    }
}

// ─── Packet pumps ────────────────────────────────────────────────────

/// Drain the TUN device into its buffer, one whole packet per commit.
///
/// The freshly read region is only committed once it parses as an IPv4
/// packet: a read shorter than the declared length is a kernel-side
/// truncation, so the header is re-stamped to the transferred amount; a
/// read longer than the declared length is discarded by leaving the
/// write cursor in place, letting the next read overwrite it.
fn fill_from_tun(fd: RawFd, buf: &mut PacketBuffer) -> TunnelResult<()> {
    loop {
        let n = match try_read(fd, buf.writable()) {
            Transfer::Closed => {
                return Err(TunnelError::DeviceFailed("read returned end of stream".into()))
            }
            Transfer::WouldBlock | Transfer::Empty => return Ok(()),
            Transfer::Data(n) => n,
        };

        let region = buf.writable();
        match packet_size(&region[..n]) {
            Boundary::NeedMore | Boundary::NotV4 => return Ok(()),
            Boundary::Size(size) => {
                if n > size {
                    return Ok(());
                }
                if n < size {
                    stamp_packet_size(region, n);
                }
                buf.advance_write(n);
            }
        }
    }
}

/// One attempt to push everything buffered from the TUN toward the peer.
///
/// Packets taken off the device cannot be returned to it, so a closed
/// socket here is as unrecoverable as losing the device itself.
fn flush_to_socket(fd: RawFd, buf: &mut PacketBuffer, want_write: &mut bool) -> TunnelResult<()> {
    match try_write(fd, buf.readable()) {
        Transfer::Closed => Err(TunnelError::StreamFailed(
            "connection closed with packets in flight".into(),
        )),
        Transfer::WouldBlock => {
            *want_write = true;
            Ok(())
        }
        Transfer::Empty => Ok(()),
        Transfer::Data(n) => {
            buf.advance_read(n);
            Ok(())
        }
    }
}

/// One read from the peer into the socket-side buffer.
fn read_from_socket(fd: RawFd, buf: &mut PacketBuffer) -> Flow {
    match try_read(fd, buf.writable()) {
        Transfer::Closed => Flow::Restart,
        Transfer::Data(n) => {
            buf.advance_write(n);
            Flow::Continue
        }
        Transfer::WouldBlock | Transfer::Empty => Flow::Continue,
    }
}

/// Drain complete packets from the socket buffer into the TUN device.
///
/// `pending` counts the bytes remaining of a packet whose write to the
/// device came up short; while non-zero, the head of the buffer is that
/// packet's tail and must be flushed as raw bytes, never re-parsed as a
/// header. A declared length shorter than an IPv4 header or larger than
/// the buffer capacity can never correspond to an assemblable packet
/// and is treated as desynchronization, like a non-IPv4 lead byte.
fn drain_to_tun(
    fd: RawFd,
    buf: &mut PacketBuffer,
    pending: &mut usize,
    want_write: &mut bool,
) -> TunnelResult<Flow> {
    loop {
        let chunk = if *pending > 0 {
            *pending
        } else {
            match packet_size(buf.readable()) {
                Boundary::NeedMore => return Ok(Flow::Continue),
                Boundary::NotV4 => return Ok(Flow::Restart),
                Boundary::Size(size) => {
                    if size < IPV4_HEADER_LEN || size > buf.capacity() {
                        return Ok(Flow::Restart);
                    }
                    if size > buf.read_len() {
                        return Ok(Flow::Continue);
                    }
                    size
                }
            }
        };

        match try_write(fd, &buf.readable()[..chunk]) {
            Transfer::Closed => {
                return Err(TunnelError::DeviceFailed("write returned end of stream".into()))
            }
            Transfer::WouldBlock => {
                *want_write = true;
                return Ok(Flow::Continue);
            }
            Transfer::Empty => return Ok(Flow::Continue),
            Transfer::Data(n) => {
                buf.advance_read(n);
                *pending = chunk - n;
            }
        }
    }
}
