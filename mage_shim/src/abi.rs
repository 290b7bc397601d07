// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The C ABI surface: `sockaddr_in` addresses with their length passed by reference, raw `MSG_*`
//! flags, and `-1` on failure with the error number left for [`abi_errno`].
//!
//! A null address, a null length pointer, or a zero length all mean "no address".

use core::cell::Cell;
use core::ffi::c_int;
use std::net::SocketAddr;
use std::time::Duration;

use mage_common_posix::errno::Errno;
use mage_common_posix::{AddressFamily, CSockInetAddr, MsgFlags};

use crate::Shim;
use crate::syscalls::{SocketRequest, to_int_fd};
use crate::user_memory;

const SOCKADDR_IN_LEN: u32 = 16;
const _: () = assert!(core::mem::size_of::<CSockInetAddr>() == SOCKADDR_IN_LEN as usize);

std::thread_local! {
    static LAST_ERRNO: Cell<c_int> = const { Cell::new(0) };
}

/// The error number of the most recent failing `abi_*` call on this thread.
#[unsafe(no_mangle)]
pub extern "C" fn abi_errno() -> c_int {
    LAST_ERRNO.get()
}

fn fail(e: Errno) {
    LAST_ERRNO.set(e.into());
}

fn int_result(result: Result<usize, Errno>) -> c_int {
    match result.and_then(to_int_fd) {
        Ok(v) => v,
        Err(e) => {
            fail(e);
            -1
        }
    }
}

fn size_result(result: Result<usize, Errno>) -> isize {
    match result {
        // Byte counts are bounded by a slice length, which is at most `isize::MAX`.
        Ok(n) => isize::try_from(n).unwrap_or(isize::MAX),
        Err(e) => {
            fail(e);
            -1
        }
    }
}

/// # Safety
///
/// `addrlen` must be null or valid for a read; if it is non-null and non-zero, `addr` must be
/// null or valid for reads of that many bytes.
unsafe fn read_sockaddr(
    addr: *const CSockInetAddr,
    addrlen: *const u32,
) -> Result<Option<SocketAddr>, Errno> {
    if addr.is_null() || addrlen.is_null() {
        return Ok(None);
    }
    // SAFETY: non-null, and valid per the caller
    let len = unsafe { addrlen.read_unaligned() } as usize;
    if len == 0 {
        return Ok(None);
    }
    if len < SOCKADDR_IN_LEN as usize {
        return Err(Errno::EINVAL);
    }
    // SAFETY: non-null, and at least `SOCKADDR_IN_LEN` readable bytes per the caller
    let c_addr = unsafe { addr.read_unaligned() };
    match AddressFamily::try_from(u32::from(c_addr.family)) {
        Ok(AddressFamily::INET) => Ok(Some(SocketAddr::V4(c_addr.into()))),
        _ => Err(Errno::EINVAL),
    }
}

/// Store `value` into the caller's `sockaddr_in`, truncated to `*addrlen` bytes, and the full
/// length into `*addrlen`. Addresses with no IPv4 form store a length of 0.
///
/// # Safety
///
/// `addrlen` must be null or valid for reads and writes; if non-null, `addr` must be null or
/// valid for writes of `*addrlen` bytes.
unsafe fn write_sockaddr(value: SocketAddr, addr: *mut CSockInetAddr, addrlen: *mut u32) {
    if addr.is_null() || addrlen.is_null() {
        return;
    }
    let v4 = match value {
        SocketAddr::V4(v4) => Some(v4),
        SocketAddr::V6(v6) => v6
            .ip()
            .to_ipv4_mapped()
            .map(|ip| std::net::SocketAddrV4::new(ip, v6.port())),
    };
    let Some(v4) = v4 else {
        // SAFETY: non-null, and valid per the caller
        unsafe { addrlen.write_unaligned(0) };
        return;
    };
    let c_addr = CSockInetAddr::from(v4);
    // SAFETY: `c_addr` is plain old data, and valid for reads of its own size
    let bytes = unsafe {
        core::slice::from_raw_parts((&raw const c_addr).cast::<u8>(), SOCKADDR_IN_LEN as usize)
    };
    // SAFETY: valid per the caller
    unsafe {
        let cap = addrlen.read_unaligned() as usize;
        user_memory::copy_truncated(bytes, addr.cast::<u8>(), cap);
        addrlen.write_unaligned(SOCKADDR_IN_LEN);
    }
}

#[unsafe(no_mangle)]
pub extern "C" fn abi_socket() -> c_int {
    int_result(Shim::installed().dispatch(SocketRequest::Socket))
}

/// Bind `fd` (or, for a fresh identifier, a new socket) to `addr`, returning its descriptor.
///
/// # Safety
///
/// See [`abi_connect`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abi_bind(
    fd: c_int,
    addr: *const CSockInetAddr,
    addrlen: *const u32,
) -> c_int {
    // SAFETY: forwarded to the caller
    let addr = match unsafe { read_sockaddr(addr, addrlen) } {
        Ok(addr) => addr,
        Err(e) => return int_result(Err(e)),
    };
    int_result(Shim::installed().dispatch(SocketRequest::Bind { fd, addr }))
}

#[unsafe(no_mangle)]
pub extern "C" fn abi_listen(fd: c_int, backlog: c_int) -> c_int {
    int_result(Shim::installed().dispatch(SocketRequest::Listen { fd, backlog }))
}

/// Connect `fd` (or, for a fresh identifier, a new socket) to `addr`, returning its descriptor.
///
/// # Safety
///
/// `addrlen` must be null or point to a readable `u32`. If that length is non-zero, `addr` must
/// be null or readable for that many bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abi_connect(
    fd: c_int,
    addr: *const CSockInetAddr,
    addrlen: *const u32,
) -> c_int {
    // SAFETY: forwarded to the caller
    let addr = match unsafe { read_sockaddr(addr, addrlen) } {
        Ok(addr) => addr,
        Err(e) => return int_result(Err(e)),
    };
    int_result(Shim::installed().dispatch(SocketRequest::Connect { fd, addr }))
}

/// Accept a connection on `fd`, storing the peer's address into `addr` (truncated to `*addrlen`
/// bytes; the untruncated length is stored back into `*addrlen`).
///
/// # Safety
///
/// `addrlen` must be null or point to a readable and writable `u32`; if non-null, `addr` must be
/// null or writable for that many bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abi_accept(
    fd: c_int,
    addr: *mut CSockInetAddr,
    addrlen: *mut u32,
) -> c_int {
    let mut peer = None;
    let result = Shim::installed().dispatch(SocketRequest::Accept {
        fd,
        peer: Some(&mut peer),
    });
    if let (Ok(_), Some(peer)) = (&result, peer) {
        // SAFETY: forwarded to the caller
        unsafe { write_sockaddr(peer, addr, addrlen) };
    }
    int_result(result)
}

/// Send up to `len` bytes from `buf`.
///
/// # Safety
///
/// Unless `len` is zero, `buf` must be null or readable for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abi_send(fd: c_int, buf: *const u8, len: usize, flags: c_int) -> isize {
    // SAFETY: forwarded to the caller
    let buf = match unsafe { user_memory::slice(buf, len) } {
        Ok(buf) => buf,
        Err(e) => return size_result(Err(e)),
    };
    let flags = MsgFlags::from_bits_retain(flags);
    size_result(Shim::installed().dispatch(SocketRequest::Send { fd, buf, flags }))
}

/// Receive up to `len` bytes into `buf`.
///
/// # Safety
///
/// Unless `len` is zero, `buf` must be null or writable for `len` bytes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abi_recv(fd: c_int, buf: *mut u8, len: usize, flags: c_int) -> isize {
    // SAFETY: forwarded to the caller
    let buf = match unsafe { user_memory::slice_mut(buf, len) } {
        Ok(buf) => buf,
        Err(e) => return size_result(Err(e)),
    };
    let flags = MsgFlags::from_bits_retain(flags);
    size_result(Shim::installed().dispatch(SocketRequest::Recv { fd, buf, flags }))
}

#[unsafe(no_mangle)]
pub extern "C" fn abi_close(fd: c_int) -> c_int {
    int_result(Shim::installed().dispatch(SocketRequest::Close { fd }))
}

#[unsafe(no_mangle)]
pub extern "C" fn abi_set_nonblocking(fd: c_int, nonblocking: c_int) -> c_int {
    int_result(Shim::installed().dispatch(SocketRequest::SetNonblocking {
        fd,
        nonblocking: nonblocking != 0,
    }))
}

/// Bound every wait on `fd` by `millis` milliseconds. Zero waits forever; negative values are
/// rejected.
#[unsafe(no_mangle)]
pub extern "C" fn abi_set_timeout(fd: c_int, millis: i64) -> c_int {
    let timeout = match u64::try_from(millis) {
        Ok(0) => None,
        Ok(millis) => Some(Duration::from_millis(millis)),
        Err(_) => return int_result(Err(Errno::EINVAL)),
    };
    int_result(Shim::installed().dispatch(SocketRequest::SetTimeout { fd, timeout }))
}

/// # Safety
///
/// See [`abi_accept`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abi_getsockname(
    fd: c_int,
    addr: *mut CSockInetAddr,
    addrlen: *mut u32,
) -> c_int {
    let mut local = None;
    let result = Shim::installed().dispatch(SocketRequest::LocalAddress {
        fd,
        addr: &mut local,
    });
    if let Some(local) = local {
        // SAFETY: forwarded to the caller
        unsafe { write_sockaddr(local, addr, addrlen) };
    }
    int_result(result)
}

/// # Safety
///
/// See [`abi_accept`].
#[unsafe(no_mangle)]
pub unsafe extern "C" fn abi_getpeername(
    fd: c_int,
    addr: *mut CSockInetAddr,
    addrlen: *mut u32,
) -> c_int {
    let mut peer = None;
    let result = Shim::installed().dispatch(SocketRequest::PeerAddress {
        fd,
        addr: &mut peer,
    });
    if let Some(peer) = peer {
        // SAFETY: forwarded to the caller
        unsafe { write_sockaddr(peer, addr, addrlen) };
    }
    int_result(result)
}
