use std::collections::HashMap;
use std::env;
use std::error::Error;
use std::process;
use std::sync::Arc;

use futures::StreamExt;
use hive_gateway_config::{load_config, parse_yaml_config, HiveGatewayConfig};
use hive_gateway_executor::{
    ExecutorArc, GatewayContext, GatewayResponse, GraphQLRequest, LocalExecutor,
    StitchedGateway, SubschemaSource,
};
use hive_gateway_internal::{logging::configure_logging, telemetry::metrics::RegistryHandle};
use prometheus::Registry;
use tracing::info;

/// Stitching of the demo services, used when the loaded configuration declares no subschema.
const DEMO_CONFIG: &str = r#"
metrics:
  enabled: true
subschemas:
  - name: products
    merge:
      - type_name: Product
        selection_set: "{ upc }"
        field_name: product
        args:
          - name: upc
            key: upc
  - name: inventory
    batch: true
    merge:
      - type_name: Product
        selection_set: "{ upc }"
        field_name: productByUpc
        args:
          - name: upc
            key: upc
  - name: reviews
    batch: true
    merge:
      - type_name: User
        selection_set: "{ id }"
        field_name: author
        args:
          - name: id
            key: id
      - type_name: Product
        selection_set: "{ upc }"
        field_name: reviewedProduct
        args:
          - name: upc
            key: upc
  - name: accounts
    batch: true
    merge:
      - type_name: User
        selection_set: "{ id }"
        field_name: user
        args:
          - name: id
            key: id
"#;

fn demo_sources() -> HashMap<String, SubschemaSource> {
    fn source(sdl: &str, executor: ExecutorArc) -> SubschemaSource {
        SubschemaSource {
            sdl: sdl.to_string(),
            executor,
        }
    }

    HashMap::from([
        (
            "products".to_string(),
            source(
                subgraphs::products::SDL,
                Arc::new(LocalExecutor::new(subgraphs::products::get_subgraph())),
            ),
        ),
        (
            "inventory".to_string(),
            source(
                subgraphs::inventory::SDL,
                Arc::new(LocalExecutor::new(subgraphs::inventory::get_subgraph())),
            ),
        ),
        (
            "reviews".to_string(),
            source(
                subgraphs::reviews::SDL,
                Arc::new(LocalExecutor::new(subgraphs::reviews::get_subgraph())),
            ),
        ),
        (
            "accounts".to_string(),
            source(
                subgraphs::accounts::SDL,
                Arc::new(LocalExecutor::new(subgraphs::accounts::get_subgraph())),
            ),
        ),
    ])
}

fn read_config(path: Option<String>) -> Result<HiveGatewayConfig, Box<dyn Error>> {
    let config = load_config(path)?;
    if !config.subschemas.is_empty() {
        return Ok(config);
    }
    let mut demo = parse_yaml_config(DEMO_CONFIG.to_string())?;
    demo.log = config.log;
    Ok(demo)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: gateway-dev-cli <operation_path> [config_path]");
        process::exit(1);
    }

    let query = std::fs::read_to_string(&args[1])?;
    let config = read_config(args.get(2).cloned())?;
    configure_logging(&config.log)?;

    let metrics = RegistryHandle::pending();
    let gateway = StitchedGateway::from_config(&config, demo_sources(), &metrics)?;
    if config.metrics.enabled {
        metrics.bind(Registry::new())?;
    }
    info!(
        types = gateway.schema().types().count(),
        "gateway ready"
    );

    match gateway
        .execute(GraphQLRequest::new(query), GatewayContext::new())
        .await
    {
        GatewayResponse::Single(result) => {
            println!("{}", serde_json::to_string_pretty(&result.to_json())?);
        }
        GatewayResponse::Incremental(mut payloads) => {
            while let Some(payload) = payloads.next().await {
                println!("{}", serde_json::to_string_pretty(&payload.to_json())?);
            }
        }
    }

    if config.metrics.enabled {
        println!("{}", metrics.encode_text()?);
    }
    metrics.dispose();

    Ok(())
}
