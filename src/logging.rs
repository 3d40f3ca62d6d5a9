/// Logging setup
///
/// Library code logs through `tracing`; the Redis store uses the `log`
/// facade, which `try_init` bridges into the same subscriber.

use crate::config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global subscriber. `RUST_LOG` overrides the configured level.
///
/// Returns false when a subscriber was already installed, which is not an
/// error: the existing one keeps receiving events.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("steward={},warn", config.level)));

    let registry = tracing_subscriber::registry().with(filter);
    let result = if config.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true))
            .try_init()
    } else {
        registry.with(fmt::layer().with_target(true)).try_init()
    };

    match result {
        Ok(()) => {
            tracing::debug!(level = %config.level, format = %config.format, "Logging initialized");
            true
        }
        Err(_) => false,
    }
}
