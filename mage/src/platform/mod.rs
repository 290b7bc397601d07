//! The underlying platform upon which Mage resides.
//!
//! The top-level trait that denotes something is a valid Mage platform is [`Provider`]. This
//! trait is merely a collection of subtraits that could be composed independently from various
//! other crates that implement them upon various types.

#[cfg(test)]
pub(crate) mod mock;

use core::net::SocketAddr;

use thiserror::Error;

/// A provider of a platform upon which Mage can execute.
///
/// Most of the provided APIs act upon an `&self` to allow storage of any useful "globals" (such
/// as a transport's listener registry) within it.
pub trait Provider: TransportProvider + TimeProvider + DebugLogProvider {}

/// A connection-oriented byte transport to the outside world.
///
/// None of the operations may block indefinitely; an operation that cannot make progress right now
/// must report [`TransportError::WouldBlock`], and Mage decides whether (and how long) to wait.
/// `connect` is the one exception, since establishing a session is allowed to take as long as the
/// underlying transport needs.
pub trait TransportProvider {
    /// An established bidirectional byte stream. Dropping it closes the stream.
    type Session: Send;
    /// A listening context that produces inbound sessions. Dropping it stops listening.
    type Listener: Send;

    /// Establish a session to `addr`.
    fn connect(&self, addr: &SocketAddr) -> Result<Self::Session, TransportError>;

    /// Open a listening context on `local_addr`, queueing at most `backlog` connections at the
    /// transport level (implementations may treat this as a hint).
    fn listen(&self, local_addr: &SocketAddr, backlog: u16)
    -> Result<Self::Listener, TransportError>;

    /// Take one inbound session from `listener`, along with the address of its remote end.
    fn accept_one(
        &self,
        listener: &Self::Listener,
    ) -> Result<(Self::Session, SocketAddr), TransportError>;

    /// Write as much of `buf` as the transport will currently take, returning the count written.
    fn write(&self, session: &Self::Session, buf: &[u8]) -> Result<usize, TransportError>;

    /// Read into `buf`, returning the number of bytes read. `Ok(0)` (for a non-empty `buf`) means
    /// the remote end closed the session.
    fn read(&self, session: &Self::Session, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// A non-exhaustive list of errors that can be produced by a [`TransportProvider`].
///
/// Other than [`TransportError::WouldBlock`], Mage never interprets these; they are surfaced to
/// the caller as-is.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum TransportError {
    #[error("Operation would block")]
    WouldBlock,
    #[error("Connection refused")]
    ConnectionRefused,
    #[error("Connection reset by peer")]
    ConnectionReset,
    #[error("Destination unreachable")]
    Unreachable,
    #[error("Address already in use")]
    AddressInUse,
    #[error("Transport failure")]
    Other,
}

/// An interface to understanding time.
pub trait TimeProvider {
    type Instant: Instant;
    /// Returns an instant coresponding to "now".
    fn now(&self) -> Self::Instant;
    /// Give up the CPU for a short while, never for longer than `limit` (if any).
    ///
    /// Waiting operations call this once spinning on their condition stops paying off. Returning
    /// early is always allowed, since the caller re-checks its condition and calls again.
    fn block_briefly(&self, limit: Option<core::time::Duration>);
}

/// An opaque measurement of a monotonically nondecreasing clock.
pub trait Instant {
    /// Returns the amount of time elapsed from another instant to this one, or `None` if that
    /// instant is later than this one.
    fn checked_duration_since(&self, earlier: &Self) -> Option<core::time::Duration>;
    /// Returns the amount of time elapsed from another instant to this one, or zero duration if
    /// that instant is later than this one.
    fn duration_since(&self, earlier: &Self) -> core::time::Duration {
        self.checked_duration_since(earlier)
            .unwrap_or(core::time::Duration::from_secs(0))
    }
}

/// An interface to dumping debug output for tracing purposes.
pub trait DebugLogProvider {
    /// Print `msg` to the debug log
    ///
    /// Newlines are *not* automatically appended to `msg`, thus the caller must make sure to
    /// include newlines if necessary.
    fn debug_log_print(&self, msg: &str);
}
