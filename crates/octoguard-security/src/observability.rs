//! Tracing setup for processes embedding the security layer.
//!
//! Library code only emits `tracing` events. Binaries call [`init_tracing`]
//! once at startup; the filter can be swapped later with
//! [`apply_logging_level`] without reinstalling the subscriber.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, fmt, prelude::*, reload};

use crate::config::LoggingConfig;

static LOG_RELOAD_HANDLE: OnceLock<reload::Handle<EnvFilter, tracing_subscriber::Registry>> =
    OnceLock::new();

/// Installs the global subscriber. `RUST_LOG` wins over `config.level`.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_tracing(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (reload_layer, handle) = reload::Layer::new(filter);
    let installed = tracing_subscriber::registry()
        .with(reload_layer)
        .with(fmt::layer().with_target(true))
        .try_init()
        .is_ok();

    if installed {
        let _ = LOG_RELOAD_HANDLE.set(handle);
        tracing::debug!(level = %config.level, "tracing initialized");
    }
    installed
}

/// Apply a new logging level at runtime if the subscriber was installed here.
pub fn apply_logging_level(level: &str) -> bool {
    match LOG_RELOAD_HANDLE.get() {
        Some(handle) => handle
            .modify(|filter| *filter = EnvFilter::new(level))
            .is_ok(),
        None => false,
    }
}
