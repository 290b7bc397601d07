// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Error handling. See [`Errno`].

#![expect(
    clippy::match_same_arms,
    reason = "in this one module, we want every error variant spelled out, even when codes coincide"
)]

use mage::net::errors::{
    AcceptError, BindError, CloseError, ConnectError, ErrorKind, ListenError, LocalAddrError,
    ReceiveError, RemoteAddrError, SendError, SetOptionError, SocketError,
};
use mage::platform::TransportError;
use thiserror::Error;

/// POSIX error numbers (with Linux values)
///
/// This is a transparent wrapper around error numbers (i.e., `i32`s) intended to provide some type
/// safety by expecting explicit conversions to/from `i32`s.
#[derive(PartialEq, Eq, Clone, Copy, Error)]
pub struct Errno {
    value: core::num::NonZeroU8,
}

impl From<Errno> for i32 {
    fn from(e: Errno) -> Self {
        e.value.get().into()
    }
}

impl core::fmt::Display for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl core::fmt::Debug for Errno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Errno({} = {})", self.value.get(), self.as_str())
    }
}

macro_rules! errno_table {
    ($($name:ident = $value:literal: $text:literal,)+) => {
        impl Errno {
            $(
                #[doc = $text]
                pub const $name: Self = Self::from_const($value);
            )+

            /// Human-friendly readable version of `self`.
            pub const fn as_str(self) -> &'static str {
                match self.value.get() {
                    $($value => concat!(stringify!($name), ": ", $text),)+
                    _ => "Unknown error",
                }
            }

            /// Whether `value` is one of the error numbers known here
            const fn is_known(value: u8) -> bool {
                matches!(value, $($value)|+)
            }
        }
    };
}

errno_table! {
    EIO = 5: "Input/output error",
    EBADF = 9: "Bad file descriptor",
    EAGAIN = 11: "Resource temporarily unavailable",
    EFAULT = 14: "Bad address",
    EINVAL = 22: "Invalid argument",
    EMFILE = 24: "Too many open files",
    EOPNOTSUPP = 95: "Operation not supported",
    EADDRINUSE = 98: "Address already in use",
    EADDRNOTAVAIL = 99: "Cannot assign requested address",
    ENETUNREACH = 101: "Network is unreachable",
    ECONNRESET = 104: "Connection reset by peer",
    EISCONN = 106: "Transport endpoint is already connected",
    ETIMEDOUT = 110: "Connection timed out",
    ECONNREFUSED = 111: "Connection refused",
}

impl Errno {
    /// Alias of [`Self::EAGAIN`]
    pub const EWOULDBLOCK: Self = Self::EAGAIN;

    /// Provide the negative integer representation of the error
    ///
    /// ```
    /// # use mage_common_posix::errno::Errno;
    /// assert_eq!(-9, Errno::EBADF.as_neg());
    /// // Direct conversion to i32 will give the positive variant
    /// assert_eq!(9, i32::from(Errno::EBADF));
    /// ```
    pub fn as_neg(self) -> i32 {
        -i32::from(self)
    }

    /// (Private-only) Helper function that makes the associated constants on [`Errno`] significantly more
    /// readable. Not intended to be used outside this module.
    const fn from_const(v: u8) -> Self {
        Self {
            value: core::num::NonZeroU8::new(v).unwrap(),
        }
    }
}

/// Errors when converting to an [`Errno`]
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ErrnoConversionError {
    #[error("Expected positive error number")]
    ExpectedPositive,
    #[error("Error number cannot be zero")]
    ExpectedNonZero,
    #[error("Unknown error number")]
    Unknown,
}

impl TryFrom<i32> for Errno {
    type Error = ErrnoConversionError;
    fn try_from(value: i32) -> Result<Self, Self::Error> {
        if value == 0 {
            return Err(ErrnoConversionError::ExpectedNonZero);
        }
        let value: u8 = value.try_into().map_err(|_| {
            if value < 0 {
                ErrnoConversionError::ExpectedPositive
            } else {
                ErrnoConversionError::Unknown
            }
        })?;
        if Self::is_known(value) {
            Ok(Self::from_const(value))
        } else {
            Err(ErrnoConversionError::Unknown)
        }
    }
}

impl From<TransportError> for Errno {
    fn from(value: TransportError) -> Self {
        match value {
            TransportError::WouldBlock => Errno::EAGAIN,
            TransportError::ConnectionRefused => Errno::ECONNREFUSED,
            TransportError::ConnectionReset => Errno::ECONNRESET,
            TransportError::Unreachable => Errno::ENETUNREACH,
            TransportError::AddressInUse => Errno::EADDRINUSE,
            TransportError::Other => Errno::EIO,
            _ => Errno::EIO,
        }
    }
}

impl From<ErrorKind> for Errno {
    fn from(value: ErrorKind) -> Self {
        match value {
            ErrorKind::NotFound => Errno::EBADF,
            ErrorKind::InvalidState => Errno::EOPNOTSUPP,
            ErrorKind::AlreadyBound => Errno::EISCONN,
            ErrorKind::InvalidArgument => Errno::EINVAL,
            ErrorKind::AddressInUse => Errno::EADDRINUSE,
            ErrorKind::NoFreePorts => Errno::EADDRNOTAVAIL,
            ErrorKind::TableFull => Errno::EMFILE,
            ErrorKind::WouldBlock => Errno::EAGAIN,
            ErrorKind::Timeout => Errno::ETIMEDOUT,
            ErrorKind::Transport(e) => e.into(),
        }
    }
}

macro_rules! errno_by_kind {
    ($($err:ty),+ $(,)?) => {
        $(
            impl From<$err> for Errno {
                fn from(value: $err) -> Self {
                    value.kind().into()
                }
            }
        )+
    };
}

errno_by_kind!(
    SocketError,
    CloseError,
    BindError,
    ListenError,
    ConnectError,
    AcceptError,
    SendError,
    ReceiveError,
    LocalAddrError,
    RemoteAddrError,
    SetOptionError,
);
