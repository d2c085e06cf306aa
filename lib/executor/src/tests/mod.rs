use std::sync::{Arc, Mutex};

use hive_gateway_config::subschema::{MergeArgConfig, MergedTypeConfig};
use serde_json::{Map, Value};

use crate::{
    delegation::subschema::Subschema,
    execution_request::ExecutionRequest,
    executors::{
        batch::BatchingOptions,
        common::{Executor, ExecutorArc, FnExecutor},
        local::LocalExecutor,
    },
    gateway::{GraphQLRequest, StitchedGateway},
};

mod batching;
mod metrics;
mod subscriptions;
mod transforms;

/// Requests an executor received, in arrival order.
#[derive(Clone, Default)]
pub(crate) struct CallLog(Arc<Mutex<Vec<ExecutionRequest>>>);

impl CallLog {
    fn push(&self, request: &ExecutionRequest) {
        self.0.lock().expect("log lock").push(request.clone());
    }

    pub fn len(&self) -> usize {
        self.0.lock().expect("log lock").len()
    }

    pub fn documents(&self) -> Vec<String> {
        self.0
            .lock()
            .expect("log lock")
            .iter()
            .map(|request| request.document.to_string())
            .collect()
    }
}

/// Wraps `executor`, recording every call made to it.
pub(crate) fn recorded(executor: impl Executor + 'static) -> (ExecutorArc, CallLog) {
    let executor: ExecutorArc = Arc::new(executor);
    let log = CallLog::default();
    let recording: ExecutorArc = {
        let log = log.clone();
        Arc::new(FnExecutor::new(move |request: ExecutionRequest| {
            log.push(&request);
            let executor = executor.clone();
            async move { executor.execute(request).await }
        }))
    };
    (recording, log)
}

pub(crate) fn merged_type(type_name: &str, key: &str, field_name: &str, arg: &str) -> MergedTypeConfig {
    MergedTypeConfig {
        type_name: type_name.to_string(),
        selection_set: format!("{{ {key} }}"),
        field_name: field_name.to_string(),
        args: vec![MergeArgConfig {
            name: arg.to_string(),
            key: key.to_string(),
        }],
    }
}

pub(crate) fn variables(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

pub(crate) struct DemoLogs {
    pub products: CallLog,
    pub inventory: CallLog,
    pub reviews: CallLog,
    pub accounts: CallLog,
}

/// The four demo services stitched together, products first.
pub(crate) fn demo_gateway(batching: Option<BatchingOptions>) -> (StitchedGateway, DemoLogs) {
    let (products_executor, products) = recorded(LocalExecutor::new(subgraphs::products::get_subgraph()));
    let (inventory_executor, inventory) =
        recorded(LocalExecutor::new(subgraphs::inventory::get_subgraph()));
    let (reviews_executor, reviews) = recorded(LocalExecutor::new(subgraphs::reviews::get_subgraph()));
    let (accounts_executor, accounts) =
        recorded(LocalExecutor::new(subgraphs::accounts::get_subgraph()));

    let batch = |subschema: Subschema| match &batching {
        Some(options) => subschema.batched(options.clone()),
        None => subschema,
    };

    let products_subschema = Subschema::new("products", subgraphs::products::SDL, products_executor)
        .and_then(|subschema| subschema.merge(&merged_type("Product", "upc", "product", "upc")))
        .expect("valid products subschema");
    let inventory_subschema =
        Subschema::new("inventory", subgraphs::inventory::SDL, inventory_executor)
            .and_then(|subschema| {
                subschema.merge(&merged_type("Product", "upc", "productByUpc", "upc"))
            })
            .expect("valid inventory subschema");
    let reviews_subschema = Subschema::new("reviews", subgraphs::reviews::SDL, reviews_executor)
        .and_then(|subschema| subschema.merge(&merged_type("User", "id", "author", "id")))
        .and_then(|subschema| {
            subschema.merge(&merged_type("Product", "upc", "reviewedProduct", "upc"))
        })
        .expect("valid reviews subschema");
    let accounts_subschema = Subschema::new("accounts", subgraphs::accounts::SDL, accounts_executor)
        .and_then(|subschema| subschema.merge(&merged_type("User", "id", "user", "id")))
        .expect("valid accounts subschema");

    let gateway = StitchedGateway::builder()
        .subschema(batch(products_subschema))
        .subschema(batch(inventory_subschema))
        .subschema(batch(reviews_subschema))
        .subschema(batch(accounts_subschema))
        .build()
        .expect("valid gateway");

    (
        gateway,
        DemoLogs {
            products,
            inventory,
            reviews,
            accounts,
        },
    )
}

pub(crate) fn request(query: &str) -> GraphQLRequest {
    GraphQLRequest::new(query)
}
