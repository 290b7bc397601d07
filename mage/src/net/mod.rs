// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Networking-related functionality: the socket lifecycle state machine.
//!
//! Every socket is a record in a [`HandleTable`], moving along
//! `Closed -> Bound -> Listening -> Connected` (with `Accepting` reported by a listening socket
//! while some caller is blocked in [`Network::accept`]). Operations that are not legal in the
//! current state fail without side effects; bytes and connections are delegated to the platform's
//! [`TransportProvider`](platform::TransportProvider).

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::net::{Ipv4Addr, SocketAddr};
use core::time::Duration;

use arrayvec::ArrayString;
use bitflags::bitflags;

use crate::handle::{Handle, HandleError, HandleTable, TableEntry};
use crate::platform::{self, Instant as _, TransportError};

pub mod errors;
mod local_ports;

#[cfg(test)]
mod tests;

use errors::{
    AcceptError, BindError, CloseError, ConnectError, ListenError, LocalAddrError, ReceiveError,
    RemoteAddrError, SendError, SetOptionError, SocketError,
};
use local_ports::{LocalPort, LocalPortAllocator};

pub use local_ports::EPHEMERAL_PORTS;

/// Maximum number of pending connections that can be queued for a listening socket.
pub const MAX_BACKLOG: u16 = 4096;

/// Number of times a waiting operation spins before handing the CPU back to the platform.
const SPIN_LIMIT: u32 = 100;

macro_rules! debug_log_println {
    ($platform:expr, $($tt:tt)*) => {{
        if cfg!(debug_assertions) {
            use core::fmt::Write as _;
            let mut t: ArrayString<256> = ArrayString::new();
            // An overlong message is simply cut short.
            let _ = writeln!(t, $($tt)*);
            platform::DebugLogProvider::debug_log_print($platform, &t);
        }
    }}
}

/// The lifecycle state of a socket
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    Closed,
    Bound,
    Listening,
    Connected,
    /// Listening, with at least one caller currently blocked in [`Network::accept`]
    Accepting,
}

/// Whether pending connections are pulled from the transport on demand, or only when
/// [`Network::perform_platform_interaction`] is invoked.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PlatformInteraction {
    #[default]
    Automatic,
    Manual,
}

/// Per-socket blocking configuration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub struct SocketOptions {
    /// Fail with "would block" rather than waiting
    pub nonblocking: bool,
    /// Upper bound on any single wait; `None` waits forever
    pub timeout: Option<Duration>,
}

bitflags! {
    /// Flags for [`Network::send`]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct SendFlags: u32 {
        /// Do not wait for the transport, even on a blocking socket
        const DONTWAIT = 0x40;
        /// Accepted for compatibility; the transport never raises signals
        const NOSIGNAL = 0x4000;
    }
}

bitflags! {
    /// Flags for [`Network::receive`]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ReceiveFlags: u32 {
        /// Do not wait for the transport, even on a blocking socket
        const DONTWAIT = 0x40;
    }
}

enum Connection<Platform: platform::TransportProvider> {
    None,
    Listener(Platform::Listener),
    Session(Platform::Session),
}

struct SocketState<Platform: platform::TransportProvider> {
    lifecycle: Lifecycle,
    local_address: Option<SocketAddr>,
    backlog: u16,
    peer_address: Option<SocketAddr>,
    /// Connected-but-unaccepted children, oldest first, with their peer addresses
    pending_children: VecDeque<(Handle, SocketAddr)>,
    local_port: Option<LocalPort>,
    connection: Connection<Platform>,
    options: SocketOptions,
    /// Number of callers blocked in `accept`
    waiters: usize,
    /// Sitting in some listener's `pending_children`; only that listener may touch it until it is
    /// accepted.
    queued: bool,
    reclaimed: bool,
}

impl<Platform: platform::TransportProvider> SocketState<Platform> {
    fn new(options: SocketOptions) -> Self {
        Self {
            lifecycle: Lifecycle::Closed,
            local_address: None,
            backlog: 0,
            peer_address: None,
            pending_children: VecDeque::new(),
            local_port: None,
            connection: Connection::None,
            options,
            waiters: 0,
            queued: false,
            reclaimed: false,
        }
    }

    /// Whether callers may operate on this record through its handle
    fn is_open(&self) -> bool {
        !self.reclaimed && !self.queued
    }
}

impl<Platform: platform::TransportProvider> TableEntry for SocketState<Platform> {
    fn reclaim(&mut self) -> Vec<Handle> {
        self.reclaimed = true;
        self.lifecycle = Lifecycle::Closed;
        self.peer_address = None;
        self.connection = Connection::None;
        self.pending_children.drain(..).map(|(h, _)| h).collect()
    }
}

/// Failure of a (possibly waiting) operation on a connected session
enum SessionIoError {
    InvalidFd,
    InvalidState,
    WouldBlock,
    TimedOut,
    Transport(TransportError),
}

impl From<SessionIoError> for SendError {
    fn from(value: SessionIoError) -> Self {
        match value {
            SessionIoError::InvalidFd => SendError::InvalidFd,
            SessionIoError::InvalidState => SendError::SocketInInvalidState,
            SessionIoError::WouldBlock => SendError::WouldBlock,
            SessionIoError::TimedOut => SendError::TimedOut,
            SessionIoError::Transport(e) => SendError::Transport(e),
        }
    }
}

impl From<SessionIoError> for ReceiveError {
    fn from(value: SessionIoError) -> Self {
        match value {
            SessionIoError::InvalidFd => ReceiveError::InvalidFd,
            SessionIoError::InvalidState => ReceiveError::SocketInInvalidState,
            SessionIoError::WouldBlock => ReceiveError::WouldBlock,
            SessionIoError::TimedOut => ReceiveError::TimedOut,
            SessionIoError::Transport(e) => ReceiveError::Transport(e),
        }
    }
}

/// The socket state machine, over a table of socket handles.
pub struct Network<Platform: platform::Provider + 'static> {
    platform: &'static Platform,
    handles: HandleTable<SocketState<Platform>>,
    local_ports: spin::Mutex<LocalPortAllocator>,
    platform_interaction: PlatformInteraction,
    default_peer: Option<SocketAddr>,
    default_listen_address: Option<SocketAddr>,
    default_options: SocketOptions,
}

impl<Platform: platform::Provider + 'static> Network<Platform> {
    /// Construct a new `Network` instance
    pub fn new(platform: &'static Platform) -> Self {
        Self {
            platform,
            handles: HandleTable::new(),
            local_ports: spin::Mutex::new(LocalPortAllocator::new()),
            platform_interaction: PlatformInteraction::Automatic,
            default_peer: None,
            default_listen_address: None,
            default_options: SocketOptions::default(),
        }
    }

    /// Set the platform interaction mode; see [`PlatformInteraction`].
    pub fn set_platform_interaction(&mut self, interaction: PlatformInteraction) {
        self.platform_interaction = interaction;
    }

    /// The destination used by [`Self::connect`] when no address is given.
    pub fn set_default_peer(&mut self, peer: Option<SocketAddr>) {
        self.default_peer = peer;
    }

    /// The address an unbound socket is implicitly bound to by [`Self::listen`]. Without one, an
    /// ephemeral port on the wildcard address is used.
    pub fn set_default_listen_address(&mut self, addr: Option<SocketAddr>) {
        self.default_listen_address = addr;
    }

    /// Options every newly created socket starts out with.
    pub fn set_default_options(&mut self, options: SocketOptions) {
        self.default_options = options;
    }

    /// Run `f` on the live record for `handle`.
    fn with_socket<R>(
        &self,
        handle: Handle,
        f: impl FnOnce(&mut SocketState<Platform>) -> R,
    ) -> Result<R, HandleError> {
        let entry = self.handles.lookup(handle)?;
        let mut socket = entry.lock();
        if !socket.is_open() {
            return Err(HandleError::NotFound);
        }
        Ok(f(&mut socket))
    }

    /// Create a new socket, in the [`Lifecycle::Closed`] state.
    pub fn socket(&self) -> Result<Handle, SocketError> {
        self.handles
            .allocate(SocketState::new(self.default_options))
            .map_err(|_| SocketError::TableFull)
    }

    /// Bind `handle` to `addr`. No address (or port 0) picks an ephemeral port.
    pub fn bind(&self, handle: Handle, addr: Option<SocketAddr>) -> Result<(), BindError> {
        self.with_socket(handle, |socket| {
            if socket.lifecycle != Lifecycle::Closed {
                return Err(BindError::AlreadyBound);
            }
            let requested = addr.unwrap_or(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0));
            let port = self.local_ports.lock().allocate(requested.port())?;
            socket.local_address = Some(SocketAddr::new(requested.ip(), port.port()));
            socket.local_port = Some(port);
            socket.lifecycle = Lifecycle::Bound;
            Ok(())
        })
        .map_err(|_| BindError::InvalidFd)?
    }

    /// Start listening on `handle`.
    ///
    /// An unbound socket is implicitly bound first. The backlog is capped at [`MAX_BACKLOG`].
    pub fn listen(&self, handle: Handle, backlog: i32) -> Result<(), ListenError> {
        self.with_socket(handle, |socket| {
            let implicit_bind = match socket.lifecycle {
                Lifecycle::Bound => false,
                Lifecycle::Closed => true,
                _ => return Err(ListenError::InvalidState),
            };
            if backlog < 0 {
                return Err(ListenError::InvalidBacklog(backlog));
            }
            let backlog = u16::try_from(backlog)
                .unwrap_or(MAX_BACKLOG)
                .min(MAX_BACKLOG);

            let (local_address, port) = if implicit_bind {
                let requested = self
                    .default_listen_address
                    .unwrap_or(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0));
                let port = self.local_ports.lock().allocate(requested.port())?;
                (SocketAddr::new(requested.ip(), port.port()), Some(port))
            } else {
                let Some(local_address) = socket.local_address else {
                    unreachable!("a bound socket always has a local address")
                };
                (local_address, None)
            };

            match self.platform.listen(&local_address, backlog) {
                Ok(listener) => {
                    if implicit_bind {
                        socket.local_address = Some(local_address);
                        socket.local_port = port;
                    }
                    socket.connection = Connection::Listener(listener);
                    socket.backlog = backlog;
                    socket.lifecycle = Lifecycle::Listening;
                    Ok(())
                }
                Err(e) => {
                    if let Some(port) = port {
                        self.local_ports.lock().deallocate(port);
                    }
                    debug_log_println!(self.platform, "listen on {local_address} failed: {e}");
                    Err(ListenError::Transport(e))
                }
            }
        })
        .map_err(|_| ListenError::InvalidFd)?
    }

    /// Connect `handle` to `addr`, or to the default peer if no address is given.
    ///
    /// On failure the socket is left exactly as it was.
    pub fn connect(&self, handle: Handle, addr: Option<SocketAddr>) -> Result<(), ConnectError> {
        self.with_socket(handle, |socket| {
            if !matches!(socket.lifecycle, Lifecycle::Closed | Lifecycle::Bound) {
                return Err(ConnectError::InvalidState);
            }
            let remote = addr
                .or(self.default_peer)
                .ok_or(ConnectError::NoDestination)?;
            let session = self.platform.connect(&remote).map_err(|e| {
                debug_log_println!(self.platform, "connect to {remote} failed: {e}");
                ConnectError::Transport(remote, e)
            })?;
            socket.connection = Connection::Session(session);
            socket.peer_address = Some(remote);
            socket.lifecycle = Lifecycle::Connected;
            Ok(())
        })
        .map_err(|_| ConnectError::InvalidFd)?
    }

    /// Accept the oldest pending connection on the listening socket `handle`, returning the new
    /// (connected) socket and its peer address.
    ///
    /// A blocking socket waits for an arrival, bounded by its timeout; a non-blocking socket fails
    /// immediately with [`AcceptError::NoConnectionsReady`].
    pub fn accept(&self, handle: Handle) -> Result<(Handle, SocketAddr), AcceptError> {
        let entry = self
            .handles
            .lookup(handle)
            .map_err(|_| AcceptError::InvalidFd)?;
        let start = self.platform.now();
        let mut spins = 0;
        let mut waiting = false;
        let result = loop {
            let mut guard = entry.lock();
            let socket = &mut *guard;
            if !socket.is_open() {
                break Err(AcceptError::InvalidFd);
            }
            if !matches!(socket.lifecycle, Lifecycle::Listening | Lifecycle::Accepting) {
                break Err(AcceptError::NotListening);
            }
            match self.try_accept(socket) {
                Ok(Some(accepted)) => break Ok(accepted),
                Ok(None) => {}
                Err(e) => break Err(e),
            }
            if socket.options.nonblocking {
                break Err(AcceptError::NoConnectionsReady);
            }
            let Ok(remaining) = self.remaining_wait(socket.options.timeout, &start) else {
                debug_log_println!(
                    self.platform,
                    "accept timed out after {:?}",
                    socket.options.timeout
                );
                break Err(AcceptError::TimedOut);
            };
            if !waiting {
                waiting = true;
                socket.waiters += 1;
                socket.lifecycle = Lifecycle::Accepting;
            }
            drop(guard);
            self.back_off(&mut spins, remaining);
        };
        if waiting {
            let mut socket = entry.lock();
            socket.waiters -= 1;
            if socket.waiters == 0 && socket.lifecycle == Lifecycle::Accepting {
                socket.lifecycle = Lifecycle::Listening;
            }
        }
        result
    }

    /// A single non-waiting accept attempt on a listening socket.
    fn try_accept(
        &self,
        socket: &mut SocketState<Platform>,
    ) -> Result<Option<(Handle, SocketAddr)>, AcceptError> {
        if self.platform_interaction == PlatformInteraction::Automatic {
            self.refill_to_backlog(socket)?;
        }
        if let Some((child, peer)) = socket.pending_children.pop_front() {
            let Ok(entry) = self.handles.lookup(child) else {
                unreachable!("queued children are only released through their listener")
            };
            entry.lock().queued = false;
            return Ok(Some((child, peer)));
        }
        if socket.backlog > 0 {
            return Ok(None);
        }
        // Nothing can ever be queued with a zero backlog, so hand over an arrival directly.
        let Connection::Listener(listener) = &socket.connection else {
            unreachable!("a listening socket always has a listener")
        };
        match self.platform.accept_one(listener) {
            Ok((session, peer)) => {
                let child = self.new_child(session, peer, socket.local_address, false)?;
                Ok(Some((child, peer)))
            }
            Err(TransportError::WouldBlock) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Pull arrivals from the transport into `pending_children`, up to the backlog.
    fn refill_to_backlog(&self, socket: &mut SocketState<Platform>) -> Result<(), AcceptError> {
        let Connection::Listener(listener) = &socket.connection else {
            return Ok(());
        };
        while socket.pending_children.len() < usize::from(socket.backlog) {
            match self.platform.accept_one(listener) {
                Ok((session, peer)) => {
                    let child = self.new_child(session, peer, socket.local_address, true)?;
                    socket.pending_children.push_back((child, peer));
                }
                Err(TransportError::WouldBlock) => break,
                Err(e) => {
                    debug_log_println!(self.platform, "accept from transport failed: {e}");
                    return Err(e.into());
                }
            }
        }
        Ok(())
    }

    /// A connected socket for an arrival. A `queued` child stays unreachable by its handle until
    /// [`Self::try_accept`] hands it out.
    fn new_child(
        &self,
        session: Platform::Session,
        peer: SocketAddr,
        local_address: Option<SocketAddr>,
        queued: bool,
    ) -> Result<Handle, AcceptError> {
        let mut child = SocketState::new(self.default_options);
        child.queued = queued;
        child.lifecycle = Lifecycle::Connected;
        child.local_address = local_address;
        child.peer_address = Some(peer);
        child.connection = Connection::Session(session);
        self.handles
            .allocate(child)
            .map_err(|_| AcceptError::TableFull)
    }

    /// Pull pending arrivals from the transport for every listening socket, returning how many
    /// connections were queued in total.
    ///
    /// Needed only with [`PlatformInteraction::Manual`]; in automatic mode this happens on demand.
    pub fn perform_platform_interaction(&self) -> Result<usize, AcceptError> {
        let mut queued = 0;
        for (_, entry) in self.handles.snapshot() {
            let mut guard = entry.lock();
            let socket = &mut *guard;
            if socket.reclaimed
                || !matches!(socket.lifecycle, Lifecycle::Listening | Lifecycle::Accepting)
            {
                continue;
            }
            let before = socket.pending_children.len();
            self.refill_to_backlog(socket)?;
            queued += socket.pending_children.len() - before;
        }
        Ok(queued)
    }

    /// Wait until `op` makes progress on the session of `handle`.
    fn session_io<R>(
        &self,
        handle: Handle,
        dontwait: bool,
        mut op: impl FnMut(&Platform::Session) -> Result<R, TransportError>,
    ) -> Result<R, SessionIoError> {
        let entry = self
            .handles
            .lookup(handle)
            .map_err(|_| SessionIoError::InvalidFd)?;
        let start = self.platform.now();
        let mut spins = 0;
        loop {
            let socket = entry.lock();
            if !socket.is_open() {
                return Err(SessionIoError::InvalidFd);
            }
            let (Lifecycle::Connected, Connection::Session(session)) =
                (socket.lifecycle, &socket.connection)
            else {
                return Err(SessionIoError::InvalidState);
            };
            match op(session) {
                Ok(r) => return Ok(r),
                Err(TransportError::WouldBlock) => {}
                Err(e) => {
                    debug_log_println!(self.platform, "transport I/O failed: {e}");
                    return Err(SessionIoError::Transport(e));
                }
            }
            if dontwait || socket.options.nonblocking {
                return Err(SessionIoError::WouldBlock);
            }
            let remaining = self
                .remaining_wait(socket.options.timeout, &start)
                .map_err(|()| SessionIoError::TimedOut)?;
            drop(socket);
            self.back_off(&mut spins, remaining);
        }
    }

    /// How much longer a wait that began at `start` may go on; `Err` once `timeout` has passed.
    fn remaining_wait(
        &self,
        timeout: Option<Duration>,
        start: &<Platform as platform::TimeProvider>::Instant,
    ) -> Result<Option<Duration>, ()> {
        let Some(timeout) = timeout else {
            return Ok(None);
        };
        let elapsed = self.platform.now().duration_since(start);
        timeout
            .checked_sub(elapsed)
            .filter(|d| !d.is_zero())
            .map(Some)
            .ok_or(())
    }

    /// Pause between two attempts of a waiting operation: spin at first, then let the platform
    /// block for at most `remaining`.
    fn back_off(&self, spins: &mut u32, remaining: Option<Duration>) {
        if *spins < SPIN_LIMIT {
            *spins += 1;
            core::hint::spin_loop();
        } else {
            self.platform.block_briefly(remaining);
        }
    }

    /// Send `buf` on the connected socket `handle`, returning how many bytes the transport took.
    ///
    /// This may be fewer than `buf.len()`; the remainder is the caller's to resend.
    pub fn send(&self, handle: Handle, buf: &[u8], flags: SendFlags) -> Result<usize, SendError> {
        Ok(self.session_io(handle, flags.contains(SendFlags::DONTWAIT), |session| {
            self.platform.write(session, buf)
        })?)
    }

    /// Receive into `buf` from the connected socket `handle`.
    ///
    /// `Ok(0)` for a non-empty `buf` means the peer closed the connection.
    pub fn receive(
        &self,
        handle: Handle,
        buf: &mut [u8],
        flags: ReceiveFlags,
    ) -> Result<usize, ReceiveError> {
        Ok(self.session_io(handle, flags.contains(ReceiveFlags::DONTWAIT), |session| {
            self.platform.read(session, buf)
        })?)
    }

    /// Close `handle`, discarding any connections still pending on it.
    pub fn close(&self, handle: Handle) -> Result<(), CloseError> {
        let entry = self
            .handles
            .lookup(handle)
            .map_err(|_| CloseError::InvalidFd)?;
        if entry.lock().queued {
            return Err(CloseError::InvalidFd);
        }
        // `queued` is never set again once cleared.
        let record = self
            .handles
            .release_record(handle, &entry)
            .map_err(|_| CloseError::InvalidFd)?;
        let port = record.lock().local_port.take();
        if let Some(port) = port {
            self.local_ports.lock().deallocate(port);
        }
        Ok(())
    }

    /// The current lifecycle state of `handle`
    pub fn lifecycle(&self, handle: Handle) -> Result<Lifecycle, HandleError> {
        self.with_socket(handle, |socket| socket.lifecycle)
    }

    /// Number of accepted-by-the-transport connections waiting on the listening socket `handle`
    pub fn pending_connections(&self, handle: Handle) -> Result<usize, HandleError> {
        self.with_socket(handle, |socket| socket.pending_children.len())
    }

    /// The address `handle` is bound to
    pub fn local_address(&self, handle: Handle) -> Result<SocketAddr, LocalAddrError> {
        self.with_socket(handle, |socket| socket.local_address)
            .map_err(|_| LocalAddrError::InvalidFd)?
            .ok_or(LocalAddrError::NotBound)
    }

    /// The address of the remote end of the connected socket `handle`
    pub fn peer_address(&self, handle: Handle) -> Result<SocketAddr, RemoteAddrError> {
        self.with_socket(handle, |socket| {
            if socket.lifecycle == Lifecycle::Connected {
                socket.peer_address
            } else {
                None
            }
        })
        .map_err(|_| RemoteAddrError::InvalidFd)?
        .ok_or(RemoteAddrError::NotConnected)
    }

    /// Make waiting operations on `handle` fail immediately instead.
    pub fn set_nonblocking(&self, handle: Handle, nonblocking: bool) -> Result<(), SetOptionError> {
        self.with_socket(handle, |socket| socket.options.nonblocking = nonblocking)
            .map_err(|_| SetOptionError::InvalidFd)
    }

    /// Bound every wait on `handle` by `timeout` (`None` waits forever).
    pub fn set_timeout(
        &self,
        handle: Handle,
        timeout: Option<Duration>,
    ) -> Result<(), SetOptionError> {
        self.with_socket(handle, |socket| socket.options.timeout = timeout)
            .map_err(|_| SetOptionError::InvalidFd)
    }

    /// The options `handle` currently has
    pub fn options(&self, handle: Handle) -> Result<SocketOptions, HandleError> {
        self.with_socket(handle, |socket| socket.options)
    }

    /// Number of live sockets, including connections not yet accepted
    pub fn live_sockets(&self) -> usize {
        self.handles.len()
    }
}

