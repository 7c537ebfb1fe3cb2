//! Tracing initialization.
//!
//! Sets up a `tracing-subscriber` registry with an [`EnvFilter`] and a console formatter. The
//! filter comes from `RUST_LOG` when it is set, otherwise from `log.filter` in the configuration.
//! The formatter is either human readable or one JSON object per line:
//!
//! ```yaml
//! log:
//!   format: json
//!   filter: "snapnsend=debug,tower_http=info,info"
//! ```

use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::{LogConfig, LogFormat};

/// Install the global subscriber. Fails if one is already installed or the filter is invalid.
pub fn init_telemetry(config: &LogConfig) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.filter)?,
    };

    match config.format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?,
    }

    info!(format = ?config.format, "Telemetry initialized");
    Ok(())
}
