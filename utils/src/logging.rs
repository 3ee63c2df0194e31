//! Minimal tracing bootstrap for one-shot tools.

use tracing_subscriber::EnvFilter;

/// Initialize a compact stderr subscriber.
///
/// `RUST_LOG` wins when set; otherwise `default_level` is used. Calling it
/// twice is harmless: the second call leaves the first subscriber in place.
pub fn init_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}
