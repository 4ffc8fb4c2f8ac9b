//! Tracing subscriber setup.
//!
//! Security events emitted by this crate flow through the subscriber as
//! structured fields, so machine-readable output matters in production.
//! The configured format is honored everywhere else.

use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{Environment, LogFormat, LoggingConfig};

/// Production log pipelines ingest JSON; a pretty format configured there
/// is overridden rather than rejected.
fn effective_format(config: &LoggingConfig, environment: Environment) -> LogFormat {
    if environment.is_production() {
        LogFormat::Json
    } else {
        config.format
    }
}

/// Default filter: the configured level for this crate, info for the rest.
/// `RUST_LOG` still wins when set.
fn default_filter(config: &LoggingConfig) -> String {
    format!("resona_gateway={},info", config.level)
}

pub fn init_logging(config: &LoggingConfig, environment: Environment) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(config)));

    let format = effective_format(config, environment);
    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_span_events(FmtSpan::CLOSE))
                .init();
        }
        LogFormat::Pretty => {
            tracing_subscriber::registry()
                .with(filter)
                .with(
                    fmt::layer()
                        .pretty()
                        .with_target(true)
                        .with_span_events(FmtSpan::CLOSE),
                )
                .init();
        }
    }

    tracing::info!(
        level = %config.level,
        format = ?format,
        environment = ?environment,
        "logging initialized"
    );
}
