// Copyright (c) Microsoft Corporation.
// Licensed under the MIT license.

//! A shim that exposes Mage sockets through three interchangeable calling conventions.
//!
//! Every boundary call is normalized into a [`syscalls::SocketRequest`] and routed through
//! [`Shim::dispatch`] to one shared [`Network`](mage::net::Network). The conventions differ only
//! in how they pass arguments and report failures:
//!
//! * [`native`]: a safe Rust API returning `Result<_, Errno>`.
//! * [`abi`]: `extern "C"` functions taking `sockaddr_in` pointers, returning `-1` and leaving the
//!   error in [`abi::abi_errno`].
//! * [`ffi`]: `extern "C"` functions taking `"ip:port"` text, returning negative error numbers.
//!
//! The C surfaces use the process-global shim ([`Shim::install`]); a descriptor obtained through
//! any of them is valid in all the others.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use mage::handle::MAX_HANDLES;
use mage::net::{Network, PlatformInteraction, SocketOptions};
use mage::platform::DebugLogProvider as _;
use mage_common_posix::errno::Errno;
use mage_platform_std::TransportKind;

/// On debug builds, logs that the user attempted to use an unsupported feature.
// DEVNOTE: this is before the `mod` declarations so that it can be used within them.
macro_rules! log_unsupported {
    ($platform:expr, $($arg:tt)*) => {
        $crate::log_unsupported_fmt($platform, core::format_args!($($arg)*));
    };
}

/// Copy the flags named in the list from `$src` into a fresh `$dst_type`.
macro_rules! convert_flags {
    ($src:expr, $src_type:ty, $dst_type:ty, $($flag:ident),+ $(,)?) => {
        {
            let mut result = <$dst_type>::empty();
            $(
                if $src.contains(<$src_type>::$flag) {
                    result |= <$dst_type>::$flag;
                }
            )+
            result
        }
    };
}

pub mod abi;
pub mod ffi;
pub mod native;
pub mod syscalls;
mod user_memory;

/// The platform every shim runs on
pub type Platform = mage_platform_std::StdPlatform;

/// First descriptor handed out, unless configured otherwise
pub const DEFAULT_DESCRIPTOR_BASE: i32 = 1000;

/// Where a connect without a destination goes, unless configured otherwise
pub const DEFAULT_PEER: SocketAddr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, 4444));

const ENV_TRANSPORT: &str = "MAGE_TRANSPORT";
const ENV_PEER_ADDRESS: &str = "MAGE_PEER_ADDRESS";
const ENV_LISTEN_ADDRESS: &str = "MAGE_LISTEN_ADDRESS";
const ENV_DESCRIPTOR_BASE: &str = "MAGE_DESCRIPTOR_BASE";

/// On debug builds, logs that the user attempted to use an unsupported feature.
fn log_unsupported_fmt(platform: &Platform, args: core::fmt::Arguments<'_>) {
    if cfg!(debug_assertions) {
        let msg = format!("WARNING: unsupported: {args}\n");
        platform.debug_log_print(&msg);
    }
}

static SHIM: once_cell::race::OnceRef<'static, Shim> = once_cell::race::OnceRef::new();

/// Builder for a [`Shim`].
pub struct ShimBuilder {
    platform: Option<&'static Platform>,
    descriptor_base: i32,
    default_peer: SocketAddr,
    default_listen_address: Option<SocketAddr>,
    default_options: SocketOptions,
    platform_interaction: PlatformInteraction,
}

impl Default for ShimBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ShimBuilder {
    /// Returns a new shim builder.
    pub fn new() -> Self {
        Self {
            platform: None,
            descriptor_base: DEFAULT_DESCRIPTOR_BASE,
            default_peer: DEFAULT_PEER,
            default_listen_address: None,
            default_options: SocketOptions::default(),
            platform_interaction: PlatformInteraction::default(),
        }
    }

    /// Returns a builder configured from the `MAGE_*` environment variables.
    ///
    /// `MAGE_TRANSPORT` picks the transport (`tcp` or `loopback`), `MAGE_PEER_ADDRESS` and
    /// `MAGE_LISTEN_ADDRESS` take `ip:port` text, and `MAGE_DESCRIPTOR_BASE` an integer. Unset
    /// variables keep their defaults; unparsable ones do too, with a message on debug builds.
    pub fn from_env() -> Self {
        let transport = env_setting::<TransportKind>(None, ENV_TRANSPORT).unwrap_or_default();
        let platform = Platform::new(transport);
        let mut builder = Self::new().with_platform(platform);
        if let Some(peer) = env_setting(Some(platform), ENV_PEER_ADDRESS) {
            builder = builder.with_default_peer(peer);
        }
        if let Some(addr) = env_setting(Some(platform), ENV_LISTEN_ADDRESS) {
            builder = builder.with_default_listen_address(addr);
        }
        if let Some(base) = env_setting(Some(platform), ENV_DESCRIPTOR_BASE) {
            builder = builder.with_descriptor_base(base);
        }
        builder
    }

    /// Use `platform` rather than a fresh TCP platform.
    #[must_use]
    pub fn with_platform(mut self, platform: &'static Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Number descriptors from `base` upwards. Anything below `base` counts as a fresh
    /// identifier. The base is clamped so that every descriptor fits a C `int`.
    #[must_use]
    pub fn with_descriptor_base(mut self, base: i32) -> Self {
        let highest = i32::try_from(MAX_HANDLES).map_or(0, |handles| i32::MAX - handles);
        self.descriptor_base = base.clamp(0, highest);
        self
    }

    /// Destination of a connect that names no address.
    #[must_use]
    pub fn with_default_peer(mut self, peer: SocketAddr) -> Self {
        self.default_peer = peer;
        self
    }

    /// Address an unbound socket is bound to when it starts listening.
    #[must_use]
    pub fn with_default_listen_address(mut self, addr: SocketAddr) -> Self {
        self.default_listen_address = Some(addr);
        self
    }

    /// Whether new sockets start out non-blocking.
    #[must_use]
    pub fn with_nonblocking_default(mut self, nonblocking: bool) -> Self {
        self.default_options.nonblocking = nonblocking;
        self
    }

    /// Timeout new sockets start out with.
    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_options.timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_platform_interaction(mut self, interaction: PlatformInteraction) -> Self {
        self.platform_interaction = interaction;
        self
    }

    pub fn build(self) -> Shim {
        let platform = self
            .platform
            .unwrap_or_else(|| Platform::new(TransportKind::default()));
        let mut network = Network::new(platform);
        network.set_platform_interaction(self.platform_interaction);
        network.set_default_peer(Some(self.default_peer));
        network.set_default_listen_address(self.default_listen_address);
        network.set_default_options(self.default_options);
        Shim {
            platform,
            network,
            descriptor_base: self.descriptor_base,
        }
    }
}

/// Parse the environment variable `name`, logging (via `platform`, if any) when it is present but
/// malformed.
fn env_setting<T: core::str::FromStr>(platform: Option<&Platform>, name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    let parsed = raw.parse().ok();
    if parsed.is_none() && cfg!(debug_assertions) {
        let msg = format!("WARNING: ignoring {name}={raw:?}\n");
        match platform {
            Some(platform) => platform.debug_log_print(&msg),
            None => eprint!("{msg}"),
        }
    }
    parsed
}

/// A socket shim: one socket table, reachable through every calling convention.
pub struct Shim {
    platform: &'static Platform,
    network: Network<Platform>,
    descriptor_base: i32,
}

impl Shim {
    /// Make `self` the process-global shim used by the [`abi`] and [`ffi`] surfaces.
    ///
    /// # Panics
    ///
    /// Panics if a global shim is already in place, whether installed explicitly or built on
    /// first use.
    pub fn install(self) -> &'static Shim {
        let shim: &'static Shim = Box::leak(Box::new(self));
        match SHIM.set(shim) {
            Ok(()) => shim,
            Err(()) => panic!("Shim::install should only be called once per process"),
        }
    }

    /// The process-global shim. If none has been installed, one is built
    /// [from the environment](ShimBuilder::from_env).
    pub fn installed() -> &'static Shim {
        SHIM.get_or_init(|| Box::leak(Box::new(ShimBuilder::from_env().build())))
    }

    pub fn platform(&self) -> &'static Platform {
        self.platform
    }

    pub fn descriptor_base(&self) -> i32 {
        self.descriptor_base
    }

    /// The underlying socket state machine
    pub fn network(&self) -> &Network<Platform> {
        &self.network
    }

    /// Pull pending arrivals from the transport into every listening socket's queue. Only
    /// needed with [`PlatformInteraction::Manual`].
    pub fn perform_platform_interaction(&self) -> Result<usize, Errno> {
        Ok(self.network.perform_platform_interaction()?)
    }
}
