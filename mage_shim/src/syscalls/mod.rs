// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! The canonical socket operations, and their dispatch onto the socket table.

use std::net::SocketAddr;
use std::time::Duration;

use mage::handle::Handle;
use mage_common_posix::MsgFlags;
use mage_common_posix::errno::Errno;

use crate::Shim;

pub mod net;


/// A socket operation, with its arguments already unpacked from whichever calling convention
/// delivered it.
///
/// Descriptors are raw boundary integers; anything below the shim's descriptor base is a fresh
/// identifier, which [`Bind`](Self::Bind), [`Listen`](Self::Listen) and
/// [`Connect`](Self::Connect) turn into a new socket.
#[non_exhaustive]
pub enum SocketRequest<'a> {
    Socket,
    Bind {
        fd: i32,
        addr: Option<SocketAddr>,
    },
    Listen {
        fd: i32,
        backlog: i32,
    },
    Connect {
        fd: i32,
        addr: Option<SocketAddr>,
    },
    Accept {
        fd: i32,
        peer: Option<&'a mut Option<SocketAddr>>,
    },
    Send {
        fd: i32,
        buf: &'a [u8],
        flags: MsgFlags,
    },
    Recv {
        fd: i32,
        buf: &'a mut [u8],
        flags: MsgFlags,
    },
    Close {
        fd: i32,
    },
    SetNonblocking {
        fd: i32,
        nonblocking: bool,
    },
    SetTimeout {
        fd: i32,
        timeout: Option<Duration>,
    },
    LocalAddress {
        fd: i32,
        addr: &'a mut Option<SocketAddr>,
    },
    PeerAddress {
        fd: i32,
        addr: &'a mut Option<SocketAddr>,
    },
}

/// Narrow a descriptor returned by [`Shim::dispatch`] to a C `int`.
pub(crate) fn to_int_fd(value: usize) -> Result<i32, Errno> {
    i32::try_from(value).map_err(|_| Errno::EMFILE)
}

impl Shim {
    /// Perform `request`, returning a descriptor, a byte count, or 0, depending on the operation.
    pub fn dispatch(&self, request: SocketRequest<'_>) -> Result<usize, Errno> {
        match request {
            SocketRequest::Socket => self.sys_socket(),
            SocketRequest::Bind { fd, addr } => self.sys_bind(fd, addr),
            SocketRequest::Listen { fd, backlog } => self.sys_listen(fd, backlog),
            SocketRequest::Connect { fd, addr } => self.sys_connect(fd, addr),
            SocketRequest::Accept { fd, peer } => self.sys_accept(fd, peer),
            SocketRequest::Send { fd, buf, flags } => self.sys_send(fd, buf, flags),
            SocketRequest::Recv { fd, buf, flags } => self.sys_recv(fd, buf, flags),
            SocketRequest::Close { fd } => self.sys_close(fd).map(|()| 0),
            SocketRequest::SetNonblocking { fd, nonblocking } => {
                self.sys_set_nonblocking(fd, nonblocking).map(|()| 0)
            }
            SocketRequest::SetTimeout { fd, timeout } => {
                self.sys_set_timeout(fd, timeout).map(|()| 0)
            }
            SocketRequest::LocalAddress { fd, addr } => {
                *addr = Some(self.sys_getsockname(fd)?);
                Ok(0)
            }
            SocketRequest::PeerAddress { fd, addr } => {
                *addr = Some(self.sys_getpeername(fd)?);
                Ok(0)
            }
        }
    }

    /// The descriptor naming `handle`. Every descriptor fits a C `int`; a handle that would not
    /// is reported as [`Errno::EMFILE`].
    pub(crate) fn descriptor(&self, handle: Handle) -> Result<usize, Errno> {
        i32::try_from(handle.as_raw())
            .ok()
            .and_then(|raw| self.descriptor_base.checked_add(raw))
            .and_then(|fd| usize::try_from(fd).ok())
            .ok_or(Errno::EMFILE)
    }

    /// The descriptor naming the socket `handle` that was just created; the socket is closed
    /// again if it cannot be named.
    pub(crate) fn descriptor_of_new(&self, handle: Handle) -> Result<usize, Errno> {
        self.descriptor(handle).inspect_err(|_| {
            let _ = self.network.close(handle);
        })
    }

    /// The live handle named by `fd`. Fresh identifiers name nothing.
    pub(crate) fn handle(&self, fd: i32) -> Result<Handle, Errno> {
        if fd < self.descriptor_base {
            return Err(Errno::EBADF);
        }
        Ok(Handle::from_raw(fd.abs_diff(self.descriptor_base) as usize))
    }

    /// Run `op` on the socket named by `fd`, first creating one if `fd` is a fresh identifier.
    /// A socket created here does not outlive a failing `op`.
    pub(crate) fn with_new_or_existing(
        &self,
        fd: i32,
        op: impl FnOnce(Handle) -> Result<(), Errno>,
    ) -> Result<usize, Errno> {
        if fd >= self.descriptor_base {
            let handle = self.handle(fd)?;
            op(handle)?;
            return self.descriptor(handle);
        }
        let handle = self.network.socket()?;
        match op(handle) {
            Ok(()) => self.descriptor_of_new(handle),
            Err(e) => {
                let _ = self.network.close(handle);
                Err(e)
            }
        }
    }
}
