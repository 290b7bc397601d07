// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Crate-local test-only mock platform for easily running tests in the various modules.

// Pull in `std` for the test-only world, so that we have a nicer/easier time writing tests
extern crate std;

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::vec::Vec;

use super::*;

/// A mock platform that is a [`platform::Provider`](Provider), useful purely for testing within
/// this crate.
///
/// - Full determinism: time moves at one millisecond per "now" call, and per "block" call
/// - Transport is a set of in-memory pipes; the "remote" side of the world is driven directly by
///   the test through [`Self::remote_connect`] and [`Self::remote_listen`]
/// - Debugging output goes to stderr
pub(crate) struct MockPlatform {
    current_time: AtomicU64,
    listeners: Mutex<HashMap<SocketAddr, Arc<MockListenerShared>>>,
    next_remote_port: AtomicU16,
    /// When set, every outbound `connect` is refused.
    pub(crate) refuse_connections: AtomicBool,
    /// Maximum number of bytes a single `write` will take.
    pub(crate) write_limit: AtomicUsize,
    /// Number of times a waiting operation handed the CPU back.
    pub(crate) blocked: AtomicUsize,
}

impl MockPlatform {
    pub(crate) fn new() -> &'static Self {
        //  Since this is used entirely for tests, leaking a bit of memory is perfectly fine in
        //  order to give ourselves a statically lived platform easily.
        alloc::boxed::Box::leak(alloc::boxed::Box::new(MockPlatform {
            current_time: AtomicU64::new(0),
            listeners: Mutex::new(HashMap::new()),
            next_remote_port: AtomicU16::new(40000),
            refuse_connections: AtomicBool::new(false),
            write_limit: AtomicUsize::new(usize::MAX),
            blocked: AtomicUsize::new(0),
        }))
    }

    /// Simulate a connection arriving from the outside world to `addr`, returning the remote end.
    pub(crate) fn remote_connect(&self, addr: &SocketAddr) -> Result<MockSession, TransportError> {
        let from = SocketAddr::new(
            core::net::Ipv4Addr::LOCALHOST.into(),
            self.next_remote_port.fetch_add(1, Ordering::SeqCst),
        );
        self.link(addr, from)
    }

    /// Register a listener owned by the outside world, so that outbound connects succeed.
    pub(crate) fn remote_listen(&self, addr: SocketAddr) -> MockListener {
        self.listen(&addr, 16).unwrap()
    }

    fn link(&self, to: &SocketAddr, from: SocketAddr) -> Result<MockSession, TransportError> {
        let listeners = self.listeners.lock().unwrap();
        let wildcard = SocketAddr::new(core::net::Ipv4Addr::UNSPECIFIED.into(), to.port());
        let Some(listener) = listeners
            .get(to)
            .or_else(|| listeners.get(&wildcard))
            .filter(|l| l.open.load(Ordering::SeqCst))
        else {
            return Err(TransportError::ConnectionRefused);
        };
        let (near, far) = MockSession::pair();
        listener.queue.lock().unwrap().push_back((far, from));
        Ok(near)
    }
}

impl Provider for MockPlatform {}

impl TransportProvider for MockPlatform {
    type Session = MockSession;
    type Listener = MockListener;

    fn connect(&self, addr: &SocketAddr) -> Result<Self::Session, TransportError> {
        if self.refuse_connections.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionRefused);
        }
        let from = SocketAddr::new(
            core::net::Ipv4Addr::LOCALHOST.into(),
            self.next_remote_port.fetch_add(1, Ordering::SeqCst),
        );
        self.link(addr, from)
    }

    fn listen(
        &self,
        local_addr: &SocketAddr,
        _backlog: u16,
    ) -> Result<Self::Listener, TransportError> {
        let mut listeners = self.listeners.lock().unwrap();
        if listeners
            .get(local_addr)
            .is_some_and(|l| l.open.load(Ordering::SeqCst))
        {
            return Err(TransportError::AddressInUse);
        }
        let shared = Arc::new(MockListenerShared {
            open: AtomicBool::new(true),
            queue: Mutex::new(VecDeque::new()),
        });
        listeners.insert(*local_addr, shared.clone());
        Ok(MockListener { shared })
    }

    fn accept_one(
        &self,
        listener: &Self::Listener,
    ) -> Result<(Self::Session, SocketAddr), TransportError> {
        listener.accept().ok_or(TransportError::WouldBlock)
    }

    fn write(&self, session: &Self::Session, buf: &[u8]) -> Result<usize, TransportError> {
        let limit = self.write_limit.load(Ordering::SeqCst);
        session.send(&buf[..buf.len().min(limit)])
    }

    fn read(&self, session: &Self::Session, buf: &mut [u8]) -> Result<usize, TransportError> {
        session.recv(buf)
    }
}

struct MockListenerShared {
    open: AtomicBool,
    queue: Mutex<VecDeque<(MockSession, SocketAddr)>>,
}

pub(crate) struct MockListener {
    shared: Arc<MockListenerShared>,
}

impl MockListener {
    pub(crate) fn accept(&self) -> Option<(MockSession, SocketAddr)> {
        self.shared.queue.lock().unwrap().pop_front()
    }
}

impl Drop for MockListener {
    fn drop(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
        self.shared.queue.lock().unwrap().clear();
    }
}

const PIPE_CAPACITY: usize = 4096;

#[derive(Default, Debug)]
struct Pipe {
    data: VecDeque<u8>,
    closed: bool,
}

/// One end of an in-memory bidirectional pipe.
#[derive(Debug)]
pub(crate) struct MockSession {
    rx: Arc<Mutex<Pipe>>,
    tx: Arc<Mutex<Pipe>>,
}

impl MockSession {
    fn pair() -> (Self, Self) {
        let a = Arc::new(Mutex::new(Pipe::default()));
        let b = Arc::new(Mutex::new(Pipe::default()));
        (
            MockSession {
                rx: a.clone(),
                tx: b.clone(),
            },
            MockSession { rx: b, tx: a },
        )
    }

    pub(crate) fn send(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut tx = self.tx.lock().unwrap();
        if tx.closed {
            return Err(TransportError::ConnectionReset);
        }
        let n = buf.len().min(PIPE_CAPACITY - tx.data.len());
        if n == 0 && !buf.is_empty() {
            return Err(TransportError::WouldBlock);
        }
        tx.data.extend(&buf[..n]);
        Ok(n)
    }

    pub(crate) fn recv(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut rx = self.rx.lock().unwrap();
        if rx.data.is_empty() {
            return if rx.closed || buf.is_empty() {
                Ok(0)
            } else {
                Err(TransportError::WouldBlock)
            };
        }
        let n = buf.len().min(rx.data.len());
        for (dst, src) in buf.iter_mut().zip(rx.data.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    /// Drain everything currently readable.
    pub(crate) fn recv_all(&self) -> Vec<u8> {
        self.rx.lock().unwrap().data.drain(..).collect()
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.rx.lock().unwrap().closed = true;
        self.tx.lock().unwrap().closed = true;
    }
}

impl TimeProvider for MockPlatform {
    type Instant = MockInstant;

    fn now(&self) -> Self::Instant {
        MockInstant {
            time: self.current_time.fetch_add(1, Ordering::SeqCst),
        }
    }

    fn block_briefly(&self, _limit: Option<core::time::Duration>) {
        self.blocked.fetch_add(1, Ordering::SeqCst);
        self.current_time.fetch_add(1, Ordering::SeqCst);
        std::thread::yield_now();
    }
}

pub(crate) struct MockInstant {
    time: u64,
}

impl Instant for MockInstant {
    fn checked_duration_since(&self, earlier: &Self) -> Option<core::time::Duration> {
        self.time
            .checked_sub(earlier.time)
            .map(core::time::Duration::from_millis)
    }
}

impl DebugLogProvider for MockPlatform {
    fn debug_log_print(&self, msg: &str) {
        std::eprint!("{msg}");
    }
}
