use tracing_subscriber::EnvFilter;

use crate::config::LogSettings;

/// `RUST_LOG` wins over the configured filter when it is set.
pub fn init_tracing(settings: &LogSettings) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(settings.ansi)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}
