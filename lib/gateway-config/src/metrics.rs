use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enables the Prometheus metrics plugin.
    ///
    /// Can also be set via the `METRICS_ENABLED` environment variable.
    #[serde(default)]
    pub enabled: bool,

    /// Optional prefix prepended to every metric name (e.g. `mygateway`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,

    /// Toggles for the individual instruments.
    #[serde(default)]
    pub instruments: MetricsInstrumentsConfig,

    /// Histogram buckets, in seconds, used by the duration instruments.
    #[serde(default = "default_buckets")]
    pub buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            prefix: None,
            instruments: MetricsInstrumentsConfig::default(),
            buckets: default_buckets(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct MetricsInstrumentsConfig {
    /// Histogram of the time spent on a single delegated subschema execution.
    #[serde(default = "enabled_by_default")]
    pub subgraph_execute_duration: bool,
    /// Counter of failed subschema executions and of GraphQL errors they returned.
    #[serde(default = "enabled_by_default")]
    pub subgraph_execute_errors: bool,
    /// Histogram of the time spent on calls of the underlying executors.
    #[serde(default = "enabled_by_default")]
    pub fetch_duration: bool,
    /// Histogram of the amount of requests sent per underlying executor call.
    #[serde(default = "enabled_by_default")]
    pub batch_size: bool,
}

impl Default for MetricsInstrumentsConfig {
    fn default() -> Self {
        Self {
            subgraph_execute_duration: true,
            subgraph_execute_errors: true,
            fetch_duration: true,
            batch_size: true,
        }
    }
}

fn enabled_by_default() -> bool {
    true
}

fn default_buckets() -> Vec<f64> {
    vec![
        0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
    ]
}
