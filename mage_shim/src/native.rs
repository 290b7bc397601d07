// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The safe Rust surface over the process-global shim.
//!
//! Descriptors are plain `i32`s, interchangeable with those of the [`abi`](crate::abi) and
//! [`ffi`](crate::ffi) surfaces.

use std::net::SocketAddr;
use std::time::Duration;

use mage::net::{ReceiveFlags, SendFlags};
use mage_common_posix::MsgFlags;
use mage_common_posix::errno::Errno;

use crate::Shim;
use crate::syscalls::{SocketRequest, to_int_fd};

fn dispatch(request: SocketRequest<'_>) -> Result<usize, Errno> {
    Shim::installed().dispatch(request)
}

/// Create a socket.
pub fn socket() -> Result<i32, Errno> {
    to_int_fd(dispatch(SocketRequest::Socket)?)
}

/// Bind `fd` to `addr`; a fresh identifier binds a new socket. Returns the bound socket's
/// descriptor.
pub fn bind(fd: i32, addr: Option<SocketAddr>) -> Result<i32, Errno> {
    to_int_fd(dispatch(SocketRequest::Bind { fd, addr })?)
}

/// Start listening on `fd`, binding it first if needed; a fresh identifier listens on a new
/// socket. Returns the listening socket's descriptor.
pub fn listen(fd: i32, backlog: i32) -> Result<i32, Errno> {
    to_int_fd(dispatch(SocketRequest::Listen { fd, backlog })?)
}

/// Connect `fd` to `addr` (or the configured default peer); a fresh identifier connects a new
/// socket. Returns the connected socket's descriptor.
pub fn connect(fd: i32, addr: Option<SocketAddr>) -> Result<i32, Errno> {
    to_int_fd(dispatch(SocketRequest::Connect { fd, addr })?)
}

/// Accept a connection on the listening socket `fd`.
pub fn accept(fd: i32) -> Result<(i32, SocketAddr), Errno> {
    let mut peer = None;
    let child = to_int_fd(dispatch(SocketRequest::Accept {
        fd,
        peer: Some(&mut peer),
    })?)?;
    let Some(peer) = peer else {
        unreachable!("a successful accept always reports its peer")
    };
    Ok((child, peer))
}

pub fn send(fd: i32, buf: &[u8], flags: SendFlags) -> Result<usize, Errno> {
    let flags = convert_flags!(flags, SendFlags, MsgFlags, DONTWAIT, NOSIGNAL);
    dispatch(SocketRequest::Send { fd, buf, flags })
}

pub fn recv(fd: i32, buf: &mut [u8], flags: ReceiveFlags) -> Result<usize, Errno> {
    let flags = convert_flags!(flags, ReceiveFlags, MsgFlags, DONTWAIT);
    dispatch(SocketRequest::Recv { fd, buf, flags })
}

pub fn close(fd: i32) -> Result<(), Errno> {
    dispatch(SocketRequest::Close { fd }).map(|_| ())
}

pub fn set_nonblocking(fd: i32, nonblocking: bool) -> Result<(), Errno> {
    dispatch(SocketRequest::SetNonblocking { fd, nonblocking }).map(|_| ())
}

pub fn set_timeout(fd: i32, timeout: Option<Duration>) -> Result<(), Errno> {
    dispatch(SocketRequest::SetTimeout { fd, timeout }).map(|_| ())
}

pub fn local_address(fd: i32) -> Result<SocketAddr, Errno> {
    let mut addr = None;
    dispatch(SocketRequest::LocalAddress {
        fd,
        addr: &mut addr,
    })?;
    let Some(addr) = addr else {
        unreachable!("a successful query always reports an address")
    };
    Ok(addr)
}

pub fn peer_address(fd: i32) -> Result<SocketAddr, Errno> {
    let mut addr = None;
    dispatch(SocketRequest::PeerAddress {
        fd,
        addr: &mut addr,
    })?;
    let Some(addr) = addr else {
        unreachable!("a successful query always reports an address")
    };
    Ok(addr)
}
