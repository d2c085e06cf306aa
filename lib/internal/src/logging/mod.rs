use hive_gateway_config::log::{LogFormat, LoggingConfig};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, time::UtcTime},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer, Registry,
};

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Invalid log filter \"{0}\": {1}")]
    InvalidFilter(String, String),
    #[error("Failed to install the global logger: {0}")]
    InitFailure(String),
}

pub fn build_env_filter(config: &LoggingConfig) -> Result<EnvFilter, LoggingError> {
    let directives = config.env_filter_str();
    EnvFilter::try_new(directives)
        .map_err(|err| LoggingError::InvalidFilter(directives.to_string(), err.to_string()))
}

fn build_layer(format: &LogFormat) -> Box<dyn Layer<Registry> + Send + Sync> {
    let timer = UtcTime::rfc_3339();

    match format {
        LogFormat::PrettyTree => tracing_tree::HierarchicalLayer::new(2)
            .with_bracketed_fields(true)
            .with_deferred_spans(false)
            .with_wraparound(25)
            .with_indent_lines(true)
            .with_timer(tracing_tree::time::Uptime::default())
            .with_thread_names(false)
            .with_thread_ids(false)
            .with_targets(false)
            .boxed(),
        LogFormat::Json => fmt::Layer::<Registry>::default()
            .json()
            .with_timer(timer)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
        LogFormat::PrettyCompact => fmt::Layer::<Registry>::default()
            .compact()
            .with_timer(timer)
            .with_span_events(FmtSpan::CLOSE)
            .boxed(),
    }
}

/// Installs the global `tracing` subscriber described by the logging configuration.
pub fn configure_logging(config: &LoggingConfig) -> Result<(), LoggingError> {
    let filter = build_env_filter(config)?;
    let layer = build_layer(&config.format);

    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .try_init()
        .map_err(|err| LoggingError::InitFailure(err.to_string()))
}

#[cfg(test)]
mod tests {
    use hive_gateway_config::log::{LogLevel, LoggingConfig};

    use super::{build_env_filter, LoggingError};

    #[test]
    fn filter_falls_back_to_level() {
        let config = LoggingConfig {
            level: LogLevel::Warn,
            ..Default::default()
        };
        let filter = build_env_filter(&config).expect("level is a valid filter");
        assert_eq!(filter.to_string(), "warn");
    }

    #[test]
    fn explicit_filter_wins_over_level() {
        let config = LoggingConfig {
            level: LogLevel::Warn,
            filter: Some("hive_gateway_executor=trace".to_string()),
            ..Default::default()
        };
        let filter = build_env_filter(&config).expect("filter is valid");
        assert_eq!(filter.to_string(), "hive_gateway_executor=trace");
    }

    #[test]
    fn malformed_filter_is_reported() {
        let config = LoggingConfig {
            filter: Some("hive_gateway_executor=[".to_string()),
            ..Default::default()
        };
        assert!(matches!(
            build_env_filter(&config),
            Err(LoggingError::InvalidFilter(_, _))
        ));
    }
}
