//! Log setup and message prefixes
//!
//! Library code only emits events. Hosts and tests that want to see them
//! install a subscriber with [`init`] or [`try_init_with_filter`].

use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Filter used when RUST_LOG is unset.
pub const DEFAULT_FILTER: &str = "kvdao=info,kvdao_core=warn";

/// Install a compact subscriber filtered by RUST_LOG or [`DEFAULT_FILTER`].
///
/// Does nothing if a global subscriber is already set.
pub fn init() {
    init_with_filter(DEFAULT_FILTER);
}

/// Like [`init`] with a caller-chosen fallback filter.
pub fn init_with_filter(default_filter: &str) {
    // Hosts often install their own subscriber first
    let _ = try_init_with_filter(default_filter);
}

pub fn try_init_with_filter(default_filter: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false))
        .try_init()
}

/// Glyphs that lead log messages, one per lifecycle segment.
pub mod prefix {
    /// Database opened or version changed
    pub const OPEN: &str = "✿";
    /// Session closed, data wiped, or recovery redirect
    pub const CLOSE: &str = "❀";
    /// Store and schema operations
    pub const DB: &str = "⊔";
}
