//! Tracing setup for hosts and tests.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tasklane_core::defaults::LOG_FILTER;

/// Install a global `tracing` subscriber.
///
/// Environment variables:
///   LOG_FORMAT  - "json" or "text" (default: "text")
///   LOG_ANSI    - "true"/"false" override ANSI colors (auto-detected by default)
///   RUST_LOG    - standard env filter (default: `tasklane_sync=info,tasklane_core=info`)
///
/// Returns false when a global subscriber was already installed (by the host
/// or an earlier test), in which case nothing changes.
pub fn init_tracing() -> bool {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let log_ansi = std::env::var("LOG_ANSI")
        .ok()
        .map(|v| v == "true" || v == "1");

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| LOG_FILTER.into());
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = if log_format == "json" {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
            .is_ok()
    } else {
        let mut layer = tracing_subscriber::fmt::layer();
        if let Some(ansi) = log_ansi {
            layer = layer.with_ansi(ansi);
        }
        registry.with(layer).try_init().is_ok()
    };

    if installed {
        tracing::info!(log_format = %log_format, "Logging initialized");
    }
    installed
}
