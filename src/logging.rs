//! Tracing subscriber setup shared by binaries and tests.

use tracing_subscriber::EnvFilter;

/// Filter used when neither an explicit filter nor `RUST_LOG` is set.
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// Installs a stderr `fmt` subscriber.
///
/// An explicit non-blank `filter` wins over `RUST_LOG`. Returns `false` when a
/// global subscriber was already installed, so repeated calls are harmless.
pub fn init_tracing(filter: Option<&str>) -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(resolve_filter(filter))
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init()
        .is_ok()
}

fn resolve_filter(filter: Option<&str>) -> EnvFilter {
    match filter.map(str::trim).filter(|value| !value.is_empty()) {
        Some(directives) => {
            EnvFilter::try_new(directives).unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
        }
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER)),
    }
}
