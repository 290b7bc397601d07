// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Possible errors from [`Network`]

use core::net::SocketAddr;

use super::local_ports::LocalPortAllocationError;
use crate::handle::HandleError;
use crate::platform::TransportError;

#[expect(
    unused_imports,
    reason = "used for doc string links to work out, but not for code"
)]
use super::Network;

use thiserror::Error;

/// The coarse classification shared by every error produced by [`Network`].
///
/// Boundary layers translate errors by kind, so the same kind always yields the same code no
/// matter which operation produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The handle does not name a live socket
    NotFound,
    /// The operation is not legal in the socket's current lifecycle state
    InvalidState,
    /// `bind` on a socket that already has an address
    AlreadyBound,
    InvalidArgument,
    AddressInUse,
    NoFreePorts,
    TableFull,
    WouldBlock,
    Timeout,
    /// An uninterpreted failure of the underlying transport
    Transport(TransportError),
}

impl From<HandleError> for ErrorKind {
    fn from(value: HandleError) -> Self {
        match value {
            HandleError::NotFound => ErrorKind::NotFound,
            HandleError::TableFull => ErrorKind::TableFull,
        }
    }
}

impl From<&LocalPortAllocationError> for ErrorKind {
    fn from(value: &LocalPortAllocationError) -> Self {
        match value {
            LocalPortAllocationError::AlreadyInUse(_) => ErrorKind::AddressInUse,
            LocalPortAllocationError::NoAvailableFreePorts => ErrorKind::NoFreePorts,
        }
    }
}

/// Possible errors from [`Network::socket`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("Too many open sockets")]
    TableFull,
}

impl SocketError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SocketError::TableFull => ErrorKind::TableFull,
        }
    }
}

/// Possible errors from [`Network::close`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CloseError {
    #[error("Not a valid open file descriptor")]
    InvalidFd,
}

impl CloseError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CloseError::InvalidFd => ErrorKind::NotFound,
        }
    }
}

/// Possible errors from [`Network::bind`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BindError {
    #[error("Not a valid open file descriptor")]
    InvalidFd,
    #[error("Socket is already bound")]
    AlreadyBound,
    #[error("Port allocation failed: {0}")]
    PortAllocationFailure(#[from] LocalPortAllocationError),
}

impl BindError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BindError::InvalidFd => ErrorKind::NotFound,
            BindError::AlreadyBound => ErrorKind::AlreadyBound,
            BindError::PortAllocationFailure(e) => e.into(),
        }
    }
}

/// Possible errors from [`Network::listen`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ListenError {
    #[error("Not a valid open file descriptor")]
    InvalidFd,
    #[error("Socket is in an invalid state")]
    InvalidState,
    #[error("Invalid backlog {0}")]
    InvalidBacklog(i32),
    #[error("Port allocation failed: {0}")]
    PortAllocationFailure(#[from] LocalPortAllocationError),
    #[error("Transport failed to listen: {0}")]
    Transport(#[from] TransportError),
}

impl ListenError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ListenError::InvalidFd => ErrorKind::NotFound,
            ListenError::InvalidState => ErrorKind::InvalidState,
            ListenError::InvalidBacklog(_) => ErrorKind::InvalidArgument,
            ListenError::PortAllocationFailure(e) => e.into(),
            ListenError::Transport(e) => ErrorKind::Transport(*e),
        }
    }
}

/// Possible errors from [`Network::connect`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("Not a valid open file descriptor")]
    InvalidFd,
    #[error("Socket is in an invalid state")]
    InvalidState,
    #[error("No destination address given, and no default peer configured")]
    NoDestination,
    #[error("Transport failed to connect to {0}: {1}")]
    Transport(SocketAddr, TransportError),
}

impl ConnectError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConnectError::InvalidFd => ErrorKind::NotFound,
            ConnectError::InvalidState => ErrorKind::InvalidState,
            ConnectError::NoDestination => ErrorKind::InvalidArgument,
            ConnectError::Transport(_, e) => ErrorKind::Transport(*e),
        }
    }
}

/// Possible errors from [`Network::accept`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum AcceptError {
    #[error("Not a valid open file descriptor")]
    InvalidFd,
    #[error("Socket is not listening")]
    NotListening,
    #[error("No connections ready")]
    NoConnectionsReady,
    #[error("Timed out waiting for a connection")]
    TimedOut,
    #[error("Too many open sockets")]
    TableFull,
    #[error("Transport failed to accept: {0}")]
    Transport(#[from] TransportError),
}

impl AcceptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AcceptError::InvalidFd => ErrorKind::NotFound,
            AcceptError::NotListening => ErrorKind::InvalidState,
            AcceptError::NoConnectionsReady => ErrorKind::WouldBlock,
            AcceptError::TimedOut => ErrorKind::Timeout,
            AcceptError::TableFull => ErrorKind::TableFull,
            AcceptError::Transport(e) => ErrorKind::Transport(*e),
        }
    }
}

/// Possible errors from [`Network::send`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SendError {
    #[error("Not a valid open file descriptor")]
    InvalidFd,
    #[error("Socket is not connected")]
    SocketInInvalidState,
    #[error("Send would block")]
    WouldBlock,
    #[error("Timed out waiting to send")]
    TimedOut,
    #[error("Transport failed to send: {0}")]
    Transport(#[from] TransportError),
}

impl SendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SendError::InvalidFd => ErrorKind::NotFound,
            SendError::SocketInInvalidState => ErrorKind::InvalidState,
            SendError::WouldBlock => ErrorKind::WouldBlock,
            SendError::TimedOut => ErrorKind::Timeout,
            SendError::Transport(e) => ErrorKind::Transport(*e),
        }
    }
}

/// Possible errors from [`Network::receive`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ReceiveError {
    #[error("Not a valid open file descriptor")]
    InvalidFd,
    #[error("Socket is not connected")]
    SocketInInvalidState,
    #[error("Receive would block")]
    WouldBlock,
    #[error("Timed out waiting to receive")]
    TimedOut,
    #[error("Transport failed to receive: {0}")]
    Transport(#[from] TransportError),
}

impl ReceiveError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ReceiveError::InvalidFd => ErrorKind::NotFound,
            ReceiveError::SocketInInvalidState => ErrorKind::InvalidState,
            ReceiveError::WouldBlock => ErrorKind::WouldBlock,
            ReceiveError::TimedOut => ErrorKind::Timeout,
            ReceiveError::Transport(e) => ErrorKind::Transport(*e),
        }
    }
}

/// Possible errors from [`Network::local_address`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum LocalAddrError {
    #[error("Not a valid open file descriptor")]
    InvalidFd,
    #[error("Socket is not bound")]
    NotBound,
}

impl LocalAddrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LocalAddrError::InvalidFd => ErrorKind::NotFound,
            LocalAddrError::NotBound => ErrorKind::InvalidState,
        }
    }
}

/// Possible errors from [`Network::peer_address`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum RemoteAddrError {
    #[error("Not a valid open file descriptor")]
    InvalidFd,
    #[error("Socket is not connected")]
    NotConnected,
}

impl RemoteAddrError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RemoteAddrError::InvalidFd => ErrorKind::NotFound,
            RemoteAddrError::NotConnected => ErrorKind::InvalidState,
        }
    }
}

/// Possible errors from [`Network::set_nonblocking`] and [`Network::set_timeout`]
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SetOptionError {
    #[error("Not a valid open file descriptor")]
    InvalidFd,
}

impl SetOptionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SetOptionError::InvalidFd => ErrorKind::NotFound,
        }
    }
}
