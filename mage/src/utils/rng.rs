// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! Random number generation

/// A non-cryptographically-secure random number generator.
///
/// Deterministic once seeded; used for ephemeral port selection.
pub struct FastRng {
    state: u64,
}

impl FastRng {
    // Constant taken from the [`xorshift*` PRNG](https://en.wikipedia.org/wiki/Xorshift#xorshift*)
    const MAGIC: u64 = 0x2545_F491_4F6C_DD1D;

    /// Create a new rng from a particular seed.
    pub const fn new_from_seed(seed: core::num::NonZeroU64) -> Self {
        FastRng {
            state: seed.get().wrapping_mul(Self::MAGIC),
        }
    }

    /// Obtain a pseudo-random `u64` value
    pub fn next_u64(&mut self) -> u64 {
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(Self::MAGIC)
    }

    /// Obtain a pseudo-random `u32` value, taken from the high bits of [`Self::next_u64`]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Obtain a pseudo-random port within `range`
    ///
    /// # Panics
    ///
    /// Panics if the range is empty.
    pub fn next_port_in(&mut self, range: core::ops::RangeInclusive<u16>) -> u16 {
        let (start, end) = (u32::from(*range.start()), u32::from(*range.end()));
        assert!(start <= end, "range must be non-empty");
        let offset = self.next_u32() % (end - start + 1);
        u16::try_from(start + offset).unwrap_or(*range.end())
    }
}
