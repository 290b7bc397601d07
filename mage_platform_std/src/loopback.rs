// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! An in-process transport: listeners live in a registry keyed by address, and sessions are pairs
//! of bounded byte pipes.

use std::collections::{HashMap, VecDeque};
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use mage::platform::TransportError;

/// Bytes a pipe holds before writers see back-pressure
pub const PIPE_CAPACITY: usize = 64 * 1024;
/// Sessions a listener holds before further connects are refused
const MAX_QUEUED: usize = 4096;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Pipe {
    data: VecDeque<u8>,
    closed: bool,
}

/// One end of a loopback session. Dropping it closes both directions.
pub struct LoopbackSession {
    rx: Arc<Mutex<Pipe>>,
    tx: Arc<Mutex<Pipe>>,
}

impl LoopbackSession {
    fn pair() -> (Self, Self) {
        let a = Arc::new(Mutex::new(Pipe::default()));
        let b = Arc::new(Mutex::new(Pipe::default()));
        (
            LoopbackSession {
                rx: a.clone(),
                tx: b.clone(),
            },
            LoopbackSession { rx: b, tx: a },
        )
    }

    pub(crate) fn write(&self, buf: &[u8]) -> Result<usize, TransportError> {
        let mut tx = lock(&self.tx);
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

    pub(crate) fn read(&self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let mut rx = lock(&self.rx);
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
}

impl Drop for LoopbackSession {
    fn drop(&mut self) {
        lock(&self.rx).closed = true;
        lock(&self.tx).closed = true;
    }
}

struct ListenerShared {
    addr: SocketAddr,
    open: AtomicBool,
    queue: Mutex<VecDeque<(LoopbackSession, SocketAddr)>>,
}

/// A registered loopback listener. Dropping it unregisters it and drops unaccepted sessions.
pub struct LoopbackListener {
    shared: Arc<ListenerShared>,
}

impl LoopbackListener {
    pub(crate) fn accept(&self) -> Result<(LoopbackSession, SocketAddr), TransportError> {
        lock(&self.shared.queue)
            .pop_front()
            .ok_or(TransportError::WouldBlock)
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.shared.addr
    }
}

impl Drop for LoopbackListener {
    fn drop(&mut self) {
        self.shared.open.store(false, Ordering::SeqCst);
        lock(&self.shared.queue).clear();
    }
}

/// The set of loopback listeners for one platform instance.
pub(crate) struct Registry {
    listeners: Mutex<HashMap<SocketAddr, Arc<ListenerShared>>>,
    next_client_port: AtomicU16,
}

impl Registry {
    pub(crate) fn new() -> Self {
        Self {
            listeners: Mutex::new(HashMap::new()),
            next_client_port: AtomicU16::new(32768),
        }
    }

    pub(crate) fn listen(&self, addr: &SocketAddr) -> Result<LoopbackListener, TransportError> {
        let mut listeners = lock(&self.listeners);
        listeners.retain(|_, l| l.open.load(Ordering::SeqCst));
        if listeners.contains_key(addr) {
            return Err(TransportError::AddressInUse);
        }
        let shared = Arc::new(ListenerShared {
            addr: *addr,
            open: AtomicBool::new(true),
            queue: Mutex::new(VecDeque::new()),
        });
        listeners.insert(*addr, shared.clone());
        Ok(LoopbackListener { shared })
    }

    pub(crate) fn connect(&self, addr: &SocketAddr) -> Result<LoopbackSession, TransportError> {
        let listeners = lock(&self.listeners);
        let wildcard = SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), addr.port());
        let listener = listeners
            .get(addr)
            .or_else(|| listeners.get(&wildcard))
            .filter(|l| l.open.load(Ordering::SeqCst))
            .ok_or(TransportError::ConnectionRefused)?;
        let mut queue = lock(&listener.queue);
        if queue.len() >= MAX_QUEUED {
            return Err(TransportError::ConnectionRefused);
        }
        let port = self.next_client_port.fetch_add(1, Ordering::SeqCst);
        let from = SocketAddr::new(Ipv4Addr::LOCALHOST.into(), port);
        let (near, far) = LoopbackSession::pair();
        queue.push_back((far, from));
        Ok(near)
    }
}
