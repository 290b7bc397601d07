//! A [Mage platform](../mage/platform/index.html) for running Mage on top of the Rust standard
//! library.
//!
//! Transport is either real TCP (via [`std::net`], with every socket in non-blocking mode) or an
//! in-process loopback that never touches the network, selected by [`TransportKind`].

use std::io::{Read as _, Write as _};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::str::FromStr;

use mage::platform::TransportError;
use thiserror::Error;

pub mod loopback;

use loopback::{LoopbackListener, LoopbackSession, Registry};

/// Which transport a [`StdPlatform`] uses
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TransportKind {
    #[default]
    Tcp,
    Loopback,
}

/// Error from parsing a [`TransportKind`]
#[derive(Error, Debug)]
#[error("Unknown transport {0:?}; expected \"tcp\" or \"loopback\"")]
pub struct UnknownTransport(String);

impl FromStr for TransportKind {
    type Err = UnknownTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => Ok(TransportKind::Tcp),
            "loopback" => Ok(TransportKind::Loopback),
            _ => Err(UnknownTransport(s.to_owned())),
        }
    }
}

/// The standard-library platform.
///
/// This implements the main [`mage::platform::Provider`] trait, i.e., implements all platform
/// traits.
pub struct StdPlatform {
    transport: TransportKind,
    loopback: Registry,
}

impl StdPlatform {
    /// Create a new platform using `transport`.
    pub fn new(transport: TransportKind) -> &'static Self {
        // The platform lives as long as the process does.
        Box::leak(Box::new(Self {
            transport,
            loopback: Registry::new(),
        }))
    }

    pub fn transport(&self) -> TransportKind {
        self.transport
    }
}

impl mage::platform::Provider for StdPlatform {}

/// An established session
pub enum StdSession {
    Tcp(TcpStream),
    Loopback(LoopbackSession),
}

/// A listening context
pub enum StdListener {
    Tcp(TcpListener),
    Loopback(LoopbackListener),
}

impl StdListener {
    /// The address actually listened on
    pub fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            StdListener::Tcp(l) => l.local_addr().ok(),
            StdListener::Loopback(l) => Some(l.local_addr()),
        }
    }
}

fn transport_error(e: &std::io::Error) -> TransportError {
    use std::io::ErrorKind;
    match e.kind() {
        ErrorKind::WouldBlock | ErrorKind::Interrupted => TransportError::WouldBlock,
        ErrorKind::ConnectionRefused => TransportError::ConnectionRefused,
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe => {
            TransportError::ConnectionReset
        }
        ErrorKind::NetworkUnreachable | ErrorKind::HostUnreachable => TransportError::Unreachable,
        ErrorKind::AddrInUse => TransportError::AddressInUse,
        _ => TransportError::Other,
    }
}

fn nonblocking_stream(stream: TcpStream) -> Result<StdSession, TransportError> {
    stream
        .set_nonblocking(true)
        .map_err(|e| transport_error(&e))?;
    Ok(StdSession::Tcp(stream))
}

impl mage::platform::TransportProvider for StdPlatform {
    type Session = StdSession;
    type Listener = StdListener;

    fn connect(&self, addr: &SocketAddr) -> Result<Self::Session, TransportError> {
        match self.transport {
            TransportKind::Tcp => {
                nonblocking_stream(TcpStream::connect(addr).map_err(|e| transport_error(&e))?)
            }
            TransportKind::Loopback => self.loopback.connect(addr).map(StdSession::Loopback),
        }
    }

    fn listen(
        &self,
        local_addr: &SocketAddr,
        _backlog: u16,
    ) -> Result<Self::Listener, TransportError> {
        match self.transport {
            TransportKind::Tcp => {
                // std picks the kernel backlog itself; Mage bounds its own queue by `backlog`.
                let listener = TcpListener::bind(local_addr).map_err(|e| transport_error(&e))?;
                listener
                    .set_nonblocking(true)
                    .map_err(|e| transport_error(&e))?;
                Ok(StdListener::Tcp(listener))
            }
            TransportKind::Loopback => self.loopback.listen(local_addr).map(StdListener::Loopback),
        }
    }

    fn accept_one(
        &self,
        listener: &Self::Listener,
    ) -> Result<(Self::Session, SocketAddr), TransportError> {
        match listener {
            StdListener::Tcp(l) => {
                let (stream, peer) = l.accept().map_err(|e| transport_error(&e))?;
                Ok((nonblocking_stream(stream)?, peer))
            }
            StdListener::Loopback(l) => l
                .accept()
                .map(|(session, peer)| (StdSession::Loopback(session), peer)),
        }
    }

    fn write(&self, session: &Self::Session, buf: &[u8]) -> Result<usize, TransportError> {
        match session {
            StdSession::Tcp(stream) => {
                let mut stream: &TcpStream = stream;
                stream.write(buf).map_err(|e| transport_error(&e))
            }
            StdSession::Loopback(s) => s.write(buf),
        }
    }

    fn read(&self, session: &Self::Session, buf: &mut [u8]) -> Result<usize, TransportError> {
        match session {
            StdSession::Tcp(stream) => {
                let mut stream: &TcpStream = stream;
                stream.read(buf).map_err(|e| transport_error(&e))
            }
            StdSession::Loopback(s) => s.read(buf),
        }
    }
}

impl mage::platform::TimeProvider for StdPlatform {
    type Instant = Instant;

    fn now(&self) -> Self::Instant {
        Instant {
            inner: std::time::Instant::now(),
        }
    }

    fn block_briefly(&self, limit: Option<core::time::Duration>) {
        let nap = limit.map_or(MAX_NAP, |limit| limit.min(MAX_NAP));
        if nap.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(nap);
        }
    }
}

/// Longest single sleep of a waiting operation; bounds how late an arrival is noticed.
const MAX_NAP: core::time::Duration = core::time::Duration::from_millis(1);

pub struct Instant {
    inner: std::time::Instant,
}

impl mage::platform::Instant for Instant {
    fn checked_duration_since(&self, earlier: &Self) -> Option<core::time::Duration> {
        self.inner.checked_duration_since(earlier.inner)
    }
}

impl mage::platform::DebugLogProvider for StdPlatform {
    fn debug_log_print(&self, msg: &str) {
        eprint!("{msg}");
    }
}
