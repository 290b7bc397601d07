//! # Mage
//!
//! > A socket-call emulation core.
//!
//! Mage exposes a BSD-socket-like interface "above" when it is provided a `Platform` interface
//! "below". All socket state lives in a single [`handle::HandleTable`], driven by the lifecycle
//! state machine in [`net::Network`]; actual bytes move through the platform's
//! [`platform::TransportProvider`].
//!
//! To use Mage, you must provide a type that implements the [`platform::Provider`] trait; then,
//! one obtains the socket operations via [`net::Network`].

#![no_std]

extern crate alloc;

pub mod handle;
pub mod net;
pub mod platform;
pub mod utils;
