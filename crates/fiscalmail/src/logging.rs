//! Tracing subscriber setup for hosts of the pipeline.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::{LogFormat, LoggingConfig};

/// Installs the global subscriber and routes `log` records into it.
/// `RUST_LOG` overrides `config.level`.
///
/// Returns false when logging was already initialized.
pub fn init(config: &LoggingConfig) -> bool {
    if tracing_log::LogTracer::init().is_err() {
        return false;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.level.as_str()));
    let registry = tracing_subscriber::registry().with(filter);

    let installed = match config.format {
        LogFormat::Pretty => {
            tracing::subscriber::set_global_default(registry.with(fmt::layer().with_target(true)))
        }
        LogFormat::Json => tracing::subscriber::set_global_default(
            registry.with(fmt::layer().json().with_current_span(true)),
        ),
    };

    installed.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_rejected() {
        let config = LoggingConfig::default();
        init(&config);
        assert!(!init(&config));
    }
}
