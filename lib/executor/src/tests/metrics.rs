use std::collections::HashMap;

use hive_gateway_config::{metrics::MetricsConfig, parse_yaml_config};
use hive_gateway_internal::telemetry::metrics::{
    catalog::{self, names, values},
    MetricsError, RegistryHandle,
};
use prometheus::Registry;
use serde_json::json;

use super::{recorded, request};
use crate::{
    context::GatewayContext,
    delegation::subschema::Subschema,
    execution_request::{ExecutionRequest, OperationKind},
    executors::{common::FnExecutor, error::ExecutorError, local::LocalExecutor},
    gateway::{StitchedGateway, SubschemaSource},
    plugins::prometheus::PrometheusPlugin,
};

/// Value of the first sample of `name` carrying every label in `labels`.
fn sample(text: &str, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
    text.lines()
        .filter(|line| line.starts_with(&format!("{name}{{")))
        .find(|line| {
            labels
                .iter()
                .all(|(label, value)| line.contains(&format!("{label}=\"{value}\"")))
        })
        .and_then(|line| line.rsplit(' ').next())
        .and_then(|value| value.parse().ok())
}

const CONFIG: &str = r#"
metrics:
  enabled: true
  prefix: gw
subschemas:
  - name: accounts
    batch: true
"#;

#[tokio::test]
async fn batched_fetches_are_reported_once_per_window() {
    let config = parse_yaml_config(CONFIG.to_string()).expect("valid config");
    let (executor, log) = recorded(LocalExecutor::new(subgraphs::accounts::get_subgraph()));
    let sources = HashMap::from([(
        "accounts".to_string(),
        SubschemaSource {
            sdl: subgraphs::accounts::SDL.to_string(),
            executor,
        },
    )]);
    let handle = RegistryHandle::bound(Registry::new());
    let gateway = StitchedGateway::from_config(&config, sources, &handle).expect("valid gateway");

    let response = gateway
        .execute(
            request(r#"{ a: user(id: "1") { name } b: user(id: "2") { name } }"#),
            GatewayContext::new(),
        )
        .await
        .into_single()
        .expect("single result");
    assert_eq!(
        response.to_json(),
        json!({ "data": { "a": { "name": "Uri Goldshtein" }, "b": { "name": "Dotan Simha" } } })
    );
    assert_eq!(log.len(), 1);

    let text = handle.encode_text().expect("bound registry");
    let accounts = ("subgraphName", "accounts");
    assert_eq!(sample(&text, "gw_batch_size_count", &[accounts]), Some(1.0));
    assert_eq!(sample(&text, "gw_batch_size_sum", &[accounts]), Some(2.0));
    assert_eq!(
        sample(
            &text,
            "gw_fetch_duration_count",
            &[accounts, ("fetchMode", values::FetchMode::Batched.as_str())]
        ),
        Some(1.0)
    );
    assert_eq!(
        sample(
            &text,
            "gw_subgraph_execute_duration_count",
            &[
                accounts,
                ("operationType", OperationKind::Query.as_str()),
                ("operationName", values::UNKNOWN),
            ]
        ),
        Some(2.0)
    );
    assert!(!text.contains("gw_subgraph_execute_errors"));
}

#[tokio::test]
async fn instruments_registered_before_binding_report_failures() {
    let handle = RegistryHandle::pending();
    let plugin =
        PrometheusPlugin::new(&MetricsConfig::default(), &handle).expect("valid instruments");

    let down = FnExecutor::new(|_request: ExecutionRequest| async {
        Err(ExecutorError::transport("connection refused"))
    });
    let gateway = StitchedGateway::builder()
        .subschema(
            Subschema::new("flaky", "type Query { down: String }", std::sync::Arc::new(down))
                .expect("valid subschema"),
        )
        .plugin(plugin)
        .build()
        .expect("valid gateway");

    let registry = Registry::new();
    handle.bind(registry.clone()).expect("first bind");
    assert!(matches!(
        handle.bind(Registry::new()),
        Err(MetricsError::AlreadyBound)
    ));

    let response = gateway
        .execute(request("query Broken { down }"), GatewayContext::new())
        .await
        .into_single()
        .expect("single result");
    assert_eq!(response.errors().len(), 1);

    let text = handle.encode_text().expect("bound registry");
    let flaky = ("subgraphName", "flaky");
    assert_eq!(
        sample(
            &text,
            &catalog::full_name(None, names::SUBGRAPH_EXECUTE_ERRORS),
            &[
                flaky,
                ("operationName", "Broken"),
                ("errorKind", values::ErrorKind::Transport.as_str()),
            ]
        ),
        Some(1.0)
    );
    assert_eq!(
        sample(
            &text,
            &format!("{}_count", catalog::full_name(None, names::FETCH_DURATION)),
            &[flaky, ("fetchMode", values::FetchMode::Single.as_str())]
        ),
        Some(1.0)
    );

    handle.dispose();
    assert!(handle.is_disposed());
    assert!(registry.gather().is_empty());
    assert!(matches!(handle.encode_text(), Err(MetricsError::Disposed)));
}
