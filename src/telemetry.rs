use tracing_subscriber::{EnvFilter, fmt};

/// Installs a compact stderr subscriber filtered by `RUST_LOG` (default
/// `info`). A no-op when the embedding binary already installed one.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).compact().try_init();
}
