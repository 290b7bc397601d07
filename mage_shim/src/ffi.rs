// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The text FFI surface: `usize` descriptors, addresses as UTF-8 `"ip:port"` text with an
//! explicit length, no flags, and results as `isize` with failures reported as `-errno`.
//!
//! A null or empty address means "no address". Addresses handed back are written as text,
//! truncated to the caller's capacity, and NUL-terminated when there is room.

use std::net::SocketAddr;
use std::time::Duration;

use mage_common_posix::MsgFlags;
use mage_common_posix::errno::Errno;

use crate::Shim;
use crate::syscalls::SocketRequest;
use crate::user_memory;

fn ret(result: Result<usize, Errno>) -> isize {
    match result {
        Ok(v) => isize::try_from(v).unwrap_or(isize::MAX),
        Err(e) => e.as_neg() as isize,
    }
}

fn fd(raw: usize) -> Result<i32, Errno> {
    i32::try_from(raw).map_err(|_| Errno::EBADF)
}

/// # Safety
///
/// Unless `len` is zero, `text` must be null or readable for `len` bytes.
unsafe fn parse_addr(text: *const u8, len: usize) -> Result<Option<SocketAddr>, Errno> {
    if text.is_null() {
        return Ok(None);
    }
    // SAFETY: forwarded to the caller
    let bytes = unsafe { user_memory::slice(text, len) }?;
    let text = core::str::from_utf8(bytes)
        .map_err(|_| Errno::EINVAL)?
        .trim_end_matches('\0')
        .trim();
    if text.is_empty() {
        return Ok(None);
    }
    text.parse().map(Some).map_err(|_| Errno::EINVAL)
}

/// # Safety
///
/// Unless null, `out` must be writable for `cap` bytes.
unsafe fn write_addr(addr: SocketAddr, out: *mut u8, cap: usize) {
    if out.is_null() {
        return;
    }
    let text = addr.to_string();
    // SAFETY: forwarded to the caller
    let n = unsafe { user_memory::copy_truncated(text.as_bytes(), out, cap) };
    if n < cap {
        // SAFETY: non-null, and `n < cap`
        unsafe { out.add(n).write(0) };
    }
}

/// Parse the address at `text` and hand it to `f`.
///
/// # Safety
///
/// See [`parse_addr`].
unsafe fn with_addr(
    text: *const u8,
    len: usize,
    f: impl FnOnce(Option<SocketAddr>) -> Result<usize, Errno>,
) -> isize {
    // SAFETY: forwarded to the caller
    ret(unsafe { parse_addr(text, len) }.and_then(f))
}

#[unsafe(no_mangle)]
pub extern "C" fn ffi_socket() -> isize {
    ret(Shim::installed().dispatch(SocketRequest::Socket))
}

/// Bind `fd` (or, for a fresh identifier, a new socket) to the address in `addr`, returning its
/// descriptor.
///
/// # Safety
///
/// Unless `addr_len` is zero, `addr` must be null or readable for `addr_len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ffi_bind(fd_raw: usize, addr: *const u8, addr_len: usize) -> isize {
    // SAFETY: forwarded to the caller
    unsafe {
        with_addr(addr, addr_len, |addr| {
            Shim::installed().dispatch(SocketRequest::Bind {
                fd: fd(fd_raw)?,
                addr,
            })
        })
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn ffi_listen(fd_raw: usize, backlog: i32) -> isize {
    ret(fd(fd_raw)
        .and_then(|fd| Shim::installed().dispatch(SocketRequest::Listen { fd, backlog })))
}

/// Connect `fd` (or, for a fresh identifier, a new socket) to the address in `addr`, returning
/// its descriptor.
///
/// # Safety
///
/// Unless `addr_len` is zero, `addr` must be null or readable for `addr_len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ffi_connect(fd_raw: usize, addr: *const u8, addr_len: usize) -> isize {
    // SAFETY: forwarded to the caller
    unsafe {
        with_addr(addr, addr_len, |addr| {
            Shim::installed().dispatch(SocketRequest::Connect {
                fd: fd(fd_raw)?,
                addr,
            })
        })
    }
}

/// Accept a connection on `fd`, writing the peer's address as text into `addr_out`.
///
/// # Safety
///
/// Unless null, `addr_out` must be writable for `addr_cap` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ffi_accept(fd_raw: usize, addr_out: *mut u8, addr_cap: usize) -> isize {
    let mut peer = None;
    let result = fd(fd_raw).and_then(|fd| {
        Shim::installed().dispatch(SocketRequest::Accept {
            fd,
            peer: Some(&mut peer),
        })
    });
    if let (Ok(_), Some(peer)) = (&result, peer) {
        // SAFETY: forwarded to the caller
        unsafe { write_addr(peer, addr_out, addr_cap) };
    }
    ret(result)
}

/// Send up to `len` bytes from `buf`, waiting according to the socket's options.
///
/// # Safety
///
/// Unless `len` is zero, `buf` must be null or readable for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ffi_send(fd_raw: usize, buf: *const u8, len: usize) -> isize {
    // SAFETY: forwarded to the caller
    ret(unsafe { user_memory::slice(buf, len) }.and_then(|buf| {
        Shim::installed().dispatch(SocketRequest::Send {
            fd: fd(fd_raw)?,
            buf,
            flags: MsgFlags::empty(),
        })
    }))
}

/// Receive up to `len` bytes into `buf`, waiting according to the socket's options.
///
/// # Safety
///
/// Unless `len` is zero, `buf` must be null or writable for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ffi_recv(fd_raw: usize, buf: *mut u8, len: usize) -> isize {
    // SAFETY: forwarded to the caller
    ret(unsafe { user_memory::slice_mut(buf, len) }.and_then(|buf| {
        Shim::installed().dispatch(SocketRequest::Recv {
            fd: fd(fd_raw)?,
            buf,
            flags: MsgFlags::empty(),
        })
    }))
}

#[unsafe(no_mangle)]
pub extern "C" fn ffi_close(fd_raw: usize) -> isize {
    ret(fd(fd_raw).and_then(|fd| Shim::installed().dispatch(SocketRequest::Close { fd })))
}

#[unsafe(no_mangle)]
pub extern "C" fn ffi_set_nonblocking(fd_raw: usize, nonblocking: bool) -> isize {
    ret(fd(fd_raw).and_then(|fd| {
        Shim::installed().dispatch(SocketRequest::SetNonblocking { fd, nonblocking })
    }))
}

/// Bound every wait on `fd` by `millis` milliseconds; zero waits forever.
#[unsafe(no_mangle)]
pub extern "C" fn ffi_set_timeout(fd_raw: usize, millis: u64) -> isize {
    let timeout = (millis != 0).then(|| Duration::from_millis(millis));
    ret(fd(fd_raw)
        .and_then(|fd| Shim::installed().dispatch(SocketRequest::SetTimeout { fd, timeout })))
}

/// Write the address `fd` is bound to as text into `addr_out`.
///
/// # Safety
///
/// Unless null, `addr_out` must be writable for `addr_cap` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ffi_local_address(
    fd_raw: usize,
    addr_out: *mut u8,
    addr_cap: usize,
) -> isize {
    let mut local = None;
    let result = fd(fd_raw).and_then(|fd| {
        Shim::installed().dispatch(SocketRequest::LocalAddress {
            fd,
            addr: &mut local,
        })
    });
    if let Some(local) = local {
        // SAFETY: forwarded to the caller
        unsafe { write_addr(local, addr_out, addr_cap) };
    }
    ret(result)
}

/// Write the address of `fd`'s remote end as text into `addr_out`.
///
/// # Safety
///
/// Unless null, `addr_out` must be writable for `addr_cap` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn ffi_peer_address(
    fd_raw: usize,
    addr_out: *mut u8,
    addr_cap: usize,
) -> isize {
    let mut peer = None;
    let result = fd(fd_raw).and_then(|fd| {
        Shim::installed().dispatch(SocketRequest::PeerAddress {
            fd,
            addr: &mut peer,
        })
    });
    if let Some(peer) = peer {
        // SAFETY: forwarded to the caller
        unsafe { write_addr(peer, addr_out, addr_cap) };
    }
    ret(result)
}
