//! Out-of-band control channel.
//!
//! A connectionless unix-datagram exchange bound under a well-known
//! runtime directory. Every message on the wire has the same fixed
//! size; a request carries a command, a reply echoes the command with
//! the reply marker set and a status code that maps onto an OS error
//! when non-zero. The packet bridge itself never touches this channel;
//! it exists for side tools to query a running daemon.

use std::fs;
use std::io;
use std::os::unix::fs::DirBuilderExt;
use std::os::unix::net::UnixDatagram;
use std::path::{Path, PathBuf};

use crate::error::{TunnelError, TunnelResult};

/// Highest suffix probed when binding an anonymous endpoint.
const BIND_MAX: u32 = 64;

/// Bytes of opaque payload carried by every message.
pub const CTL_PAYLOAD_LEN: usize = 58;

/// Total wire size of a control message.
pub const CTL_MSG_LEN: usize = 1 + 1 + 4 + CTL_PAYLOAD_LEN;

/// Command carried by a control message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CtlCommand {
    /// No-op, useful as a liveness probe.
    None = 0,
    /// Ask the daemon to report its connection state.
    State = 1,
    /// Ask the daemon for traffic counters.
    Status = 2,
}

impl CtlCommand {
    fn from_byte(b: u8) -> TunnelResult<Self> {
        match b {
            0 => Ok(CtlCommand::None),
            1 => Ok(CtlCommand::State),
            2 => Ok(CtlCommand::Status),
            other => Err(TunnelError::Ctl(format!("unknown command byte {}", other))),
        }
    }
}

/// Fixed-size control message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CtlMsg {
    /// Command this message carries or answers.
    pub command: CtlCommand,
    /// Set on replies, clear on requests.
    pub reply: bool,
    /// OS error code; zero means success. Only meaningful on replies.
    pub status: i32,
    /// Command-specific bytes, opaque to the channel.
    pub payload: [u8; CTL_PAYLOAD_LEN],
}

impl CtlMsg {
    /// Build a request for `command` with an empty payload.
    pub fn request(command: CtlCommand) -> Self {
        Self {
            command,
            reply: false,
            status: 0,
            payload: [0; CTL_PAYLOAD_LEN],
        }
    }

    /// Build the reply to `req` carrying `status`.
    pub fn reply_to(req: &CtlMsg, status: i32) -> Self {
        Self {
            command: req.command,
            reply: true,
            status,
            payload: [0; CTL_PAYLOAD_LEN],
        }
    }

    fn encode(&self) -> [u8; CTL_MSG_LEN] {
        let mut wire = [0u8; CTL_MSG_LEN];
        wire[0] = self.command as u8;
        wire[1] = self.reply as u8;
        wire[2..6].copy_from_slice(&self.status.to_ne_bytes());
        wire[6..].copy_from_slice(&self.payload);
        wire
    }

    fn decode(wire: &[u8]) -> TunnelResult<Self> {
        if wire.len() != CTL_MSG_LEN {
            return Err(TunnelError::Ctl(format!(
                "message of {} bytes, expected {}",
                wire.len(),
                CTL_MSG_LEN
            )));
        }
        let mut status = [0u8; 4];
        status.copy_from_slice(&wire[2..6]);
        let mut payload = [0u8; CTL_PAYLOAD_LEN];
        payload.copy_from_slice(&wire[6..]);
        Ok(Self {
            command: CtlCommand::from_byte(wire[0])?,
            reply: wire[1] != 0,
            status: i32::from_ne_bytes(status),
            payload,
        })
    }
}

/// A bound control endpoint. The bound path is unlinked on drop.
pub struct CtlSocket {
    socket: UnixDatagram,
    path: PathBuf,
}

impl CtlSocket {
    /// Bind an endpoint under `dir`, creating the directory if needed.
    ///
    /// With a name, any stale socket file of that name is replaced.
    /// Without one, numeric hidden names `.0` through `.63` are probed
    /// and the first free slot is taken.
    pub fn create(dir: &Path, name: Option<&str>) -> TunnelResult<Self> {
        match fs::DirBuilder::new().mode(0o700).create(dir) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(TunnelError::Ctl(format!("{}: {}", dir.display(), e))),
        }

        let socket = UnixDatagram::unbound().map_err(TunnelError::Io)?;

        let path = match name {
            Some(name) => {
                let path = dir.join(name);
                let _ = fs::remove_file(&path);
                Self::bind_path(&socket, &path)
                    .map_err(|e| TunnelError::Ctl(format!("{}: {}", path.display(), e)))?;
                path
            }
            None => Self::bind_anonymous(&socket, dir)?,
        };

        Ok(Self { socket, path })
    }

    fn bind_path(socket: &UnixDatagram, path: &Path) -> io::Result<()> {
        let addr = socket2::SockAddr::unix(path)?;
        socket2::SockRef::from(socket).bind(&addr)
    }

    fn bind_anonymous(socket: &UnixDatagram, dir: &Path) -> TunnelResult<PathBuf> {
        for i in 0..BIND_MAX {
            let path = dir.join(format!(".{}", i));
            if Self::bind_path(socket, &path).is_ok() {
                return Ok(path);
            }
        }
        Err(TunnelError::Ctl(format!(
            "no free endpoint slot in {}",
            dir.display()
        )))
    }

    /// Connect to a daemon's endpoint under `dir`.
    ///
    /// With no name the directory is scanned and exactly one visible
    /// socket must be present; zero or several is an error so a caller
    /// never silently talks to the wrong daemon.
    pub fn connect(dir: &Path, name: Option<&str>) -> TunnelResult<Self> {
        let target = match name {
            Some(name) => dir.join(name),
            None => Self::scan_single(dir)?,
        };

        let endpoint = Self::create(dir, None)?;
        endpoint
            .socket
            .connect(&target)
            .map_err(|e| TunnelError::Ctl(format!("{}: {}", target.display(), e)))?;
        Ok(endpoint)
    }

    fn scan_single(dir: &Path) -> TunnelResult<PathBuf> {
        let mut found = None;
        let entries =
            fs::read_dir(dir).map_err(|e| TunnelError::Ctl(format!("{}: {}", dir.display(), e)))?;
        for entry in entries {
            let entry = entry.map_err(TunnelError::Io)?;
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            if found.is_some() {
                return Err(TunnelError::Ctl(format!(
                    "several sockets in {}, name one explicitly",
                    dir.display()
                )));
            }
            found = Some(entry.path());
        }
        found.ok_or_else(|| TunnelError::Ctl(format!("no socket in {}", dir.display())))
    }

    /// Send one request and wait for its reply.
    ///
    /// The reply must echo the request's command with the reply marker
    /// set; a non-zero status is surfaced as the OS error it encodes.
    pub fn request(&self, req: &CtlMsg) -> TunnelResult<CtlMsg> {
        self.socket.send(&req.encode()).map_err(TunnelError::Io)?;

        let mut wire = [0u8; CTL_MSG_LEN];
        let n = self.socket.recv(&mut wire).map_err(TunnelError::Io)?;
        let res = CtlMsg::decode(&wire[..n])?;

        if res.command != req.command || !res.reply {
            return Err(TunnelError::Ctl("reply does not match request".into()));
        }
        if res.status != 0 {
            return Err(TunnelError::Io(io::Error::from_raw_os_error(res.status)));
        }
        Ok(res)
    }

    /// Receive one request along with the path to answer it on.
    pub fn receive(&self) -> TunnelResult<(CtlMsg, PathBuf)> {
        let mut wire = [0u8; CTL_MSG_LEN];
        let (n, from) = self.socket.recv_from(&mut wire).map_err(TunnelError::Io)?;
        let msg = CtlMsg::decode(&wire[..n])?;
        let from = from
            .as_pathname()
            .ok_or_else(|| TunnelError::Ctl("request from unbound sender".into()))?
            .to_path_buf();
        Ok((msg, from))
    }

    /// Send `msg` to the endpoint bound at `to`.
    pub fn respond(&self, msg: &CtlMsg, to: &Path) -> TunnelResult<()> {
        self.socket
            .send_to(&msg.encode(), to)
            .map_err(TunnelError::Io)?;
        Ok(())
    }

    /// Path this endpoint is bound at.
    pub fn local_path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CtlSocket {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_message_round_trips_through_wire_form() {
        let mut req = CtlMsg::request(CtlCommand::Status);
        req.payload[0] = 0xAA;
        req.payload[CTL_PAYLOAD_LEN - 1] = 0xBB;
        let decoded = CtlMsg::decode(&req.encode()).unwrap();
        assert_eq!(decoded, req);
    }

    #[test]
    fn test_decode_rejects_short_message() {
        assert!(CtlMsg::decode(&[0u8; 4]).is_err());
        assert!(CtlMsg::decode(&[0xFFu8; CTL_MSG_LEN]).is_err());
    }

    #[test]
    fn test_anonymous_binds_take_successive_slots() {
        let dir = tempdir().unwrap();
        let first = CtlSocket::create(dir.path(), None).unwrap();
        let second = CtlSocket::create(dir.path(), None).unwrap();
        assert_eq!(first.local_path(), dir.path().join(".0"));
        assert_eq!(second.local_path(), dir.path().join(".1"));
    }

    #[test]
    fn test_named_bind_replaces_stale_socket() {
        let dir = tempdir().unwrap();
        let path = {
            let sock = CtlSocket::create(dir.path(), Some("tun0")).unwrap();
            sock.local_path().to_path_buf()
        };
        // Simulate a crash leaving the file behind.
        let _stale = std::os::unix::net::UnixDatagram::bind(&path).unwrap();
        let sock = CtlSocket::create(dir.path(), Some("tun0")).unwrap();
        assert_eq!(sock.local_path(), path);
    }

    #[test]
    fn test_drop_unlinks_bound_path() {
        let dir = tempdir().unwrap();
        let path = {
            let sock = CtlSocket::create(dir.path(), Some("tun0")).unwrap();
            sock.local_path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn test_connect_requires_exactly_one_socket() {
        let dir = tempdir().unwrap();
        assert!(CtlSocket::connect(dir.path(), None).is_err());

        let _a = CtlSocket::create(dir.path(), Some("tun0")).unwrap();
        assert!(CtlSocket::connect(dir.path(), None).is_ok());

        let _b = CtlSocket::create(dir.path(), Some("tun1")).unwrap();
        assert!(CtlSocket::connect(dir.path(), None).is_err());
    }

    #[test]
    fn test_request_reply_exchange() {
        let dir = tempdir().unwrap();
        let daemon = CtlSocket::create(dir.path(), Some("tun0")).unwrap();

        let server = std::thread::spawn(move || {
            let (req, from) = daemon.receive().unwrap();
            assert_eq!(req.command, CtlCommand::State);
            assert!(!req.reply);
            daemon.respond(&CtlMsg::reply_to(&req, 0), &from).unwrap();
        });

        let client = CtlSocket::connect(dir.path(), Some("tun0")).unwrap();
        let res = client.request(&CtlMsg::request(CtlCommand::State)).unwrap();
        assert!(res.reply);
        assert_eq!(res.command, CtlCommand::State);
        server.join().unwrap();
    }

    #[test]
    fn test_nonzero_status_surfaces_as_os_error() {
        let dir = tempdir().unwrap();
        let daemon = CtlSocket::create(dir.path(), Some("tun0")).unwrap();

        let server = std::thread::spawn(move || {
            let (req, from) = daemon.receive().unwrap();
            let res = CtlMsg::reply_to(&req, libc::ENODEV);
            daemon.respond(&res, &from).unwrap();
        });

        let client = CtlSocket::connect(dir.path(), Some("tun0")).unwrap();
        let err = client
            .request(&CtlMsg::request(CtlCommand::Status))
            .unwrap_err();
        match err {
            TunnelError::Io(e) => assert_eq!(e.raw_os_error(), Some(libc::ENODEV)),
            other => panic!("unexpected error: {}", other),
        }
        server.join().unwrap();
    }

    #[test]
    fn test_mismatched_reply_rejected() {
        let dir = tempdir().unwrap();
        let daemon = CtlSocket::create(dir.path(), Some("tun0")).unwrap();

        let server = std::thread::spawn(move || {
            let (_req, from) = daemon.receive().unwrap();
            // Answer with the wrong command.
            let res = CtlMsg::reply_to(&CtlMsg::request(CtlCommand::None), 0);
            daemon.respond(&res, &from).unwrap();
        });

        let client = CtlSocket::connect(dir.path(), Some("tun0")).unwrap();
        let err = client
            .request(&CtlMsg::request(CtlCommand::Status))
            .unwrap_err();
        assert!(matches!(err, TunnelError::Ctl(_)));
        server.join().unwrap();
    }
}
