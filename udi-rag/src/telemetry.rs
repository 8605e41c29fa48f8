//! Log output setup.
//!
//! The library only emits `tracing` events; applications and tests that want
//! to see them call [`init_tracing`] once at startup.

use tracing_subscriber::EnvFilter;

/// Default directive when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info";

/// Install a fmt subscriber filtered by `RUST_LOG` (default `info`).
///
/// Returns `false` if a global subscriber was already installed, in which
/// case nothing changes.
pub fn init_tracing() -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter)
}

/// Install a fmt subscriber with an explicit filter such as
/// `"udi_rag=debug,info"`, ignoring `RUST_LOG`.
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing_with_filter(directives: &str) -> bool {
    let filter = EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    install(filter)
}

fn install(filter: EnvFilter) -> bool {
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).try_init().is_ok()
}
