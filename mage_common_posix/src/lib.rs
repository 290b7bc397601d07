//! Common POSIX-y items shared by the boundary layers sitting on top of Mage.

#![no_std]

use int_enum::IntEnum;

pub mod errno;

#[repr(u32)]
#[non_exhaustive]
#[derive(Debug, IntEnum, PartialEq, Eq, Clone, Copy)]
pub enum AddressFamily {
    UNSPEC = 0,
    UNIX = 1,
    INET = 2,
    INET6 = 10,
}

bitflags::bitflags! {
    /// The raw `MSG_*` flags accepted by `send`/`recv`
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MsgFlags: core::ffi::c_int {
        const OOB = 0x1;
        const PEEK = 0x2;
        const DONTROUTE = 0x4;
        const TRUNC = 0x20;
        const DONTWAIT = 0x40;
        const EOR = 0x80;
        const WAITALL = 0x100;
        const NOSIGNAL = 0x4000;
        const MORE = 0x8000;
        /// <https://docs.rs/bitflags/*/bitflags/#externally-defined-flags>
        const _ = !0;
    }
}

/// The C `struct sockaddr_in` layout
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct CSockInetAddr {
    pub family: u16,
    /// Big-endian
    pub port: u16,
    pub addr: [u8; 4],
    pub zero: [u8; 8],
}

impl From<CSockInetAddr> for core::net::SocketAddrV4 {
    fn from(c_addr: CSockInetAddr) -> Self {
        core::net::SocketAddrV4::new(c_addr.addr.into(), u16::from_be(c_addr.port))
    }
}

impl From<core::net::SocketAddrV4> for CSockInetAddr {
    fn from(addr: core::net::SocketAddrV4) -> Self {
        CSockInetAddr {
            family: AddressFamily::INET as u16,
            port: addr.port().to_be(),
            addr: addr.ip().octets(),
            zero: [0; 8],
        }
    }
}
