// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Socket-related syscalls, e.g., socket, bind, listen, etc.

use std::net::SocketAddr;
use std::time::Duration;

use mage::net::{ReceiveFlags, SendFlags};
use mage_common_posix::MsgFlags;
use mage_common_posix::errno::Errno;

use crate::Shim;

impl Shim {
    /// Handle syscall `socket`
    pub(crate) fn sys_socket(&self) -> Result<usize, Errno> {
        let handle = self.network.socket()?;
        self.descriptor_of_new(handle)
    }

    /// Handle syscall `bind`
    pub(crate) fn sys_bind(&self, fd: i32, addr: Option<SocketAddr>) -> Result<usize, Errno> {
        self.with_new_or_existing(fd, |handle| Ok(self.network.bind(handle, addr)?))
    }

    /// Handle syscall `listen`
    pub(crate) fn sys_listen(&self, fd: i32, backlog: i32) -> Result<usize, Errno> {
        self.with_new_or_existing(fd, |handle| Ok(self.network.listen(handle, backlog)?))
    }

    /// Handle syscall `connect`
    pub(crate) fn sys_connect(&self, fd: i32, addr: Option<SocketAddr>) -> Result<usize, Errno> {
        self.with_new_or_existing(fd, |handle| Ok(self.network.connect(handle, addr)?))
    }

    /// Handle syscall `accept`
    pub(crate) fn sys_accept(
        &self,
        fd: i32,
        peer: Option<&mut Option<SocketAddr>>,
    ) -> Result<usize, Errno> {
        let handle = self.handle(fd)?;
        let (child, peer_addr) = self.network.accept(handle)?;
        let child = self.descriptor_of_new(child)?;
        if let Some(peer) = peer {
            *peer = Some(peer_addr);
        }
        Ok(child)
    }

    /// Handle syscall `send`
    pub(crate) fn sys_send(&self, fd: i32, buf: &[u8], flags: MsgFlags) -> Result<usize, Errno> {
        let supported = MsgFlags::DONTWAIT | MsgFlags::NOSIGNAL;
        if !supported.contains(flags) {
            log_unsupported!(self.platform, "send flags {:?}", flags.difference(supported));
            return Err(Errno::EOPNOTSUPP);
        }
        let handle = self.handle(fd)?;
        let flags = convert_flags!(flags, MsgFlags, SendFlags, DONTWAIT, NOSIGNAL);
        Ok(self.network.send(handle, buf, flags)?)
    }

    /// Handle syscall `recv`
    pub(crate) fn sys_recv(
        &self,
        fd: i32,
        buf: &mut [u8],
        flags: MsgFlags,
    ) -> Result<usize, Errno> {
        if !MsgFlags::DONTWAIT.contains(flags) {
            log_unsupported!(
                self.platform,
                "recv flags {:?}",
                flags.difference(MsgFlags::DONTWAIT)
            );
            return Err(Errno::EOPNOTSUPP);
        }
        let handle = self.handle(fd)?;
        let flags = convert_flags!(flags, MsgFlags, ReceiveFlags, DONTWAIT);
        Ok(self.network.receive(handle, buf, flags)?)
    }

    /// Handle syscall `close`
    pub(crate) fn sys_close(&self, fd: i32) -> Result<(), Errno> {
        Ok(self.network.close(self.handle(fd)?)?)
    }

    pub(crate) fn sys_set_nonblocking(&self, fd: i32, nonblocking: bool) -> Result<(), Errno> {
        Ok(self
            .network
            .set_nonblocking(self.handle(fd)?, nonblocking)?)
    }

    pub(crate) fn sys_set_timeout(&self, fd: i32, timeout: Option<Duration>) -> Result<(), Errno> {
        Ok(self.network.set_timeout(self.handle(fd)?, timeout)?)
    }

    /// Handle syscall `getsockname`
    pub(crate) fn sys_getsockname(&self, fd: i32) -> Result<SocketAddr, Errno> {
        Ok(self.network.local_address(self.handle(fd)?)?)
    }

    /// Handle syscall `getpeername`
    pub(crate) fn sys_getpeername(&self, fd: i32) -> Result<SocketAddr, Errno> {
        Ok(self.network.peer_address(self.handle(fd)?)?)
    }
}
