//! Process-wide tracing setup.
//!
//! The crate itself only emits events through `tracing`; installing a
//! subscriber is the embedding application's job. These helpers cover the
//! common case: `RUST_LOG` controls the filter, defaulting to `info` for
//! this crate and `warn` elsewhere.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

const DEFAULT_DIRECTIVES: &str = "warn,refill_core=info";

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVES))
}

/// Install a human-readable stderr subscriber.
///
/// Returns `false` if a global subscriber was already installed, which is
/// fine: the host application's subscriber wins.
pub fn init() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}

/// Install a JSON-lines stderr subscriber for log aggregation.
pub fn init_json() -> bool {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().json().with_writer(std::io::stderr))
        .try_init()
        .is_ok()
}
