// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Handling the allocation of local ports

use core::num::{NonZeroU16, NonZeroU64};
use core::ops::RangeInclusive;

use hashbrown::HashSet;
use thiserror::Error;

use crate::utils::rng::FastRng;

/// The range ephemeral ports are drawn from.
pub const EPHEMERAL_PORTS: RangeInclusive<u16> = 49152..=65535;

/// An allocator for local ports, making sure that no already-allocated ports are given out either
/// in case of ephemeral port allocation, or in the case of asking for a specific port.
pub(crate) struct LocalPortAllocator {
    in_use: HashSet<NonZeroU16>,
    rng: FastRng,
}

impl Default for LocalPortAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalPortAllocator {
    const SEED: NonZeroU64 = NonZeroU64::new(0x1337_4a41_5942_1337).unwrap();

    /// Sets up a new local port allocator
    pub(crate) fn new() -> Self {
        Self {
            in_use: HashSet::new(),
            rng: FastRng::new_from_seed(Self::SEED),
        }
    }

    /// Allocate a new ephemeral local port
    pub(crate) fn ephemeral_port(&mut self) -> Result<LocalPort, LocalPortAllocationError> {
        for _ in 0..100 {
            let port = self.rng.next_port_in(EPHEMERAL_PORTS);
            if let Ok(local_port) = self.allocate(port) {
                return Ok(local_port);
            }
        }
        // After 100 misses most of the range is likely taken; walk it one by one instead
        for port in EPHEMERAL_PORTS {
            if let Ok(local_port) = self.allocate(port) {
                return Ok(local_port);
            }
        }
        Err(LocalPortAllocationError::NoAvailableFreePorts)
    }

    /// Allocate a local port, either ephemeral (if `port` is 0) or specific (if `port` is non-zero)
    pub(crate) fn allocate(&mut self, port: u16) -> Result<LocalPort, LocalPortAllocationError> {
        let Some(port) = NonZeroU16::new(port) else {
            return self.ephemeral_port();
        };
        if self.in_use.insert(port) {
            Ok(LocalPort { port })
        } else {
            Err(LocalPortAllocationError::AlreadyInUse(port.get()))
        }
    }

    /// Consumes a [`LocalPort`], marking it as available again.
    pub(crate) fn deallocate(&mut self, port: LocalPort) {
        let removed = self.in_use.remove(&port.port);
        debug_assert!(removed, "a LocalPort token always refers to an in-use port");
    }
}

/// A token expressing ownership over a specific local port.
///
/// Explicitly not cloneable/copyable.
pub(crate) struct LocalPort {
    port: NonZeroU16,
}

impl LocalPort {
    pub(crate) fn port(&self) -> u16 {
        self.port.get()
    }
}

/// Errors that could be returned when allocating a port
#[derive(Debug, Error)]
pub enum LocalPortAllocationError {
    #[error("Port {0} is already in use")]
    AlreadyInUse(u16),
    #[error("No free ports are available")]
    NoAvailableFreePorts,
}
