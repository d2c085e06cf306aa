use hive_gateway_config::metrics::MetricsConfig;
use hive_gateway_internal::telemetry::metrics::{
    catalog::{self, labels, names, values},
    MetricsError, RegistryHandle,
};
use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts};

use crate::{
    executors::common::ExecutorResponse,
    plugins::{
        hooks::{
            on_fetch::FetchEvent,
            on_subgraph_execute::{
                OnSubgraphExecuteEndHookPayload, OnSubgraphExecuteStartHookPayload,
                OnSubgraphExecuteStartHookResult,
            },
        },
        plugin_trait::GatewayPlugin,
    },
};

const BATCH_SIZE_BUCKETS: &[f64] = &[1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0];

/// Records subschema executions and executor invocations as Prometheus instruments.
///
/// Instruments are registered through the given [`RegistryHandle`], so the plugin can be
/// created before the registry it reports to exists.
pub struct PrometheusPlugin {
    subgraph_execute_duration: Option<HistogramVec>,
    subgraph_execute_errors: Option<IntCounterVec>,
    fetch_duration: Option<HistogramVec>,
    batch_size: Option<HistogramVec>,
}

fn descriptor_of(name: &'static str) -> (&'static str, &'static [&'static str]) {
    catalog::descriptor(name)
        .map(|descriptor| (descriptor.help, descriptor.labels))
        .unwrap_or((name, &[]))
}

fn histogram(
    config: &MetricsConfig,
    registry: &RegistryHandle,
    name: &'static str,
    buckets: Vec<f64>,
) -> Result<HistogramVec, MetricsError> {
    let (help, label_names) = descriptor_of(name);
    let histogram = HistogramVec::new(
        HistogramOpts::new(catalog::full_name(config.prefix.as_deref(), name), help)
            .buckets(buckets),
        label_names,
    )?;
    registry.register(&histogram)?;
    Ok(histogram)
}

fn counter(
    config: &MetricsConfig,
    registry: &RegistryHandle,
    name: &'static str,
) -> Result<IntCounterVec, MetricsError> {
    let (help, label_names) = descriptor_of(name);
    let counter = IntCounterVec::new(
        Opts::new(catalog::full_name(config.prefix.as_deref(), name), help),
        label_names,
    )?;
    registry.register(&counter)?;
    Ok(counter)
}

impl PrometheusPlugin {
    pub fn new(config: &MetricsConfig, registry: &RegistryHandle) -> Result<Self, MetricsError> {
        let instruments = &config.instruments;

        Ok(PrometheusPlugin {
            subgraph_execute_duration: instruments
                .subgraph_execute_duration
                .then(|| {
                    histogram(
                        config,
                        registry,
                        names::SUBGRAPH_EXECUTE_DURATION,
                        config.buckets.clone(),
                    )
                })
                .transpose()?,
            subgraph_execute_errors: instruments
                .subgraph_execute_errors
                .then(|| counter(config, registry, names::SUBGRAPH_EXECUTE_ERRORS))
                .transpose()?,
            fetch_duration: instruments
                .fetch_duration
                .then(|| histogram(config, registry, names::FETCH_DURATION, config.buckets.clone()))
                .transpose()?,
            batch_size: instruments
                .batch_size
                .then(|| {
                    histogram(
                        config,
                        registry,
                        names::BATCH_SIZE,
                        BATCH_SIZE_BUCKETS.to_vec(),
                    )
                })
                .transpose()?,
        })
    }

    fn record_execution(&self, payload: &OnSubgraphExecuteEndHookPayload<'_>) {
        let operation_name = payload
            .info
            .client_operation_name
            .as_deref()
            .unwrap_or(values::UNKNOWN);
        let operation_type = payload.operation_type.as_str();

        if let Some(histogram) = &self.subgraph_execute_duration {
            histogram
                .with_label_values(&[payload.subschema_name, operation_type, operation_name])
                .observe(payload.duration.as_secs_f64());
        }

        let Some(counter) = &self.subgraph_execute_errors else {
            return;
        };
        let (error_kind, count) = match &payload.outcome {
            Err(_) => (values::ErrorKind::Transport, 1),
            Ok(ExecutorResponse::Single(result)) => {
                (values::ErrorKind::GraphQL, result.errors().len() as u64)
            }
            Ok(ExecutorResponse::Stream(_)) => return,
        };
        if count > 0 {
            counter
                .with_label_values(&[
                    payload.subschema_name,
                    operation_type,
                    operation_name,
                    error_kind.as_str(),
                ])
                .inc_by(count);
        }
    }
}

#[async_trait::async_trait]
impl GatewayPlugin for PrometheusPlugin {
    fn plugin_name(&self) -> &'static str {
        "prometheus"
    }

    async fn on_subgraph_execute<'exec>(
        &'exec self,
        start_payload: OnSubgraphExecuteStartHookPayload<'exec>,
    ) -> OnSubgraphExecuteStartHookResult<'exec> {
        start_payload.on_end(move |end_payload| {
            self.record_execution(&end_payload);
            end_payload.proceed()
        })
    }

    fn on_fetch(&self, event: &FetchEvent) {
        let subschema_name = event.subschema_name.as_str();
        if let Some(histogram) = &self.fetch_duration {
            let fetch_mode = if event.batched {
                values::FetchMode::Batched
            } else {
                values::FetchMode::Single
            };
            histogram
                .with_label_values(&[subschema_name, fetch_mode.as_str()])
                .observe(event.duration.as_secs_f64());
        }
        if let Some(histogram) = &self.batch_size {
            histogram
                .with_label_values(&[subschema_name])
                .observe(event.batch_size as f64);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use hive_gateway_config::metrics::MetricsConfig;
    use hive_gateway_internal::telemetry::metrics::RegistryHandle;
    use prometheus::Registry;

    use super::PrometheusPlugin;
    use crate::plugins::{hooks::on_fetch::FetchEvent, plugin_trait::GatewayPlugin};

    #[test]
    fn disabled_instruments_are_not_registered() {
        let mut config = MetricsConfig {
            prefix: Some("edge".to_string()),
            ..Default::default()
        };
        config.instruments.fetch_duration = false;
        config.instruments.subgraph_execute_duration = false;
        config.instruments.subgraph_execute_errors = false;

        let handle = RegistryHandle::pending();
        let plugin = PrometheusPlugin::new(&config, &handle).expect("instruments are valid");
        handle.bind(Registry::new()).expect("binds once");

        plugin.on_fetch(&FetchEvent {
            subschema_name: "products".to_string(),
            batch_size: 3,
            batched: true,
            duration: Duration::from_millis(2),
            error: None,
        });

        let text = handle.encode_text().expect("encodes");
        assert!(text.contains("edge_batch_size_count{subgraphName=\"products\"} 1"));
        assert!(text.contains("edge_batch_size_sum{subgraphName=\"products\"} 3"));
        assert!(!text.contains("edge_fetch_duration"));
    }
}
