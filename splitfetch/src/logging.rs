//! Logging setup for binaries and tests embedding the downloader.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Default filter when `RUST_LOG` is unset.
pub const DEFAULT_FILTER: &str = "splitfetch=info";

/// Install a global `tracing` subscriber writing to stderr.
///
/// `RUST_LOG` takes precedence over `default_filter`. Calling this again, or
/// after another subscriber was installed, is a no-op.
pub fn init_logging(default_filter: &str) {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init();
}
