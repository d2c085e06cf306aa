use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use serde_json::{json, Value};

use super::{demo_gateway, recorded, request};
use crate::{
    context::GatewayContext,
    delegation::subschema::Subschema,
    execution_request::ExecutionRequest,
    executors::{
        batch::{BatchingExecutor, BatchingOptions, FlushSchedule},
        common::{BatchExecutorArc, Executor, ExecutorResponse, FnBatchExecutor},
        error::ExecutorError,
        local::LocalExecutor,
    },
    gateway::StitchedGateway,
    response::execution_result::ExecutionResult,
    schema::transforms::FilterFields,
};

/// Batch sizes seen by the underlying executor, one entry per invocation.
#[derive(Clone, Default)]
struct Invocations(Arc<Mutex<Vec<Vec<Value>>>>);

impl Invocations {
    fn record(&self, requests: &[ExecutionRequest]) {
        let ids = requests
            .iter()
            .map(|request| request.variables.get("id").cloned().unwrap_or(Value::Null))
            .collect();
        self.0.lock().expect("invocations lock").push(ids);
    }

    fn all(&self) -> Vec<Vec<Value>> {
        self.0.lock().expect("invocations lock").clone()
    }
}

/// Answers every request with the `id` variable it was sent with.
fn echo_batch_executor() -> (BatchExecutorArc, Invocations) {
    let invocations = Invocations::default();
    let executor = {
        let invocations = invocations.clone();
        FnBatchExecutor::new(move |requests: Vec<ExecutionRequest>| {
            invocations.record(&requests);
            let responses: Vec<ExecutorResponse> = requests
                .iter()
                .map(|request| {
                    ExecutorResponse::single(ExecutionResult::from_data(json!({
                        "user": { "id": request.variables.get("id").cloned().unwrap_or(Value::Null) }
                    })))
                })
                .collect();
            async move { Ok(responses) }
        })
    };
    (Arc::new(executor), invocations)
}

fn user_request(id: &str) -> ExecutionRequest {
    ExecutionRequest::query("query($id: ID!) { user(id: $id) { id } }").with_variable("id", json!(id))
}

fn user_id(response: Result<ExecutorResponse, ExecutorError>) -> Value {
    let result = response
        .expect("successful response")
        .into_single()
        .expect("single result");
    result.data.clone().unwrap_or_default()["user"]["id"].clone()
}

#[tokio::test]
async fn identical_requests_share_one_call_and_one_result() {
    let (executor, invocations) = echo_batch_executor();
    let coalescer = BatchingExecutor::new(executor, BatchingOptions::default());

    let (first, second, third) = tokio::join!(
        coalescer.execute(user_request("1")),
        coalescer.execute(user_request("1")),
        coalescer.execute(user_request("1")),
    );

    let first = first.expect("ok").into_single().expect("single");
    let second = second.expect("ok").into_single().expect("single");
    let third = third.expect("ok").into_single().expect("single");
    assert!(Arc::ptr_eq(&first, &second));
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(invocations.all(), vec![vec![json!("1")]]);
}

#[tokio::test]
async fn distinct_requests_are_sent_together_in_arrival_order() {
    let (executor, invocations) = echo_batch_executor();
    let coalescer = BatchingExecutor::new(executor, BatchingOptions::default());

    let (first, second, third, again) = tokio::join!(
        coalescer.execute(user_request("3")),
        coalescer.execute(user_request("1")),
        coalescer.execute(user_request("2")),
        coalescer.execute(user_request("3")),
    );

    assert_eq!(invocations.all(), vec![vec![json!("3"), json!("1"), json!("2")]]);
    assert_eq!(user_id(first), json!("3"));
    assert_eq!(user_id(second), json!("1"));
    assert_eq!(user_id(third), json!("2"));
    assert_eq!(user_id(again), json!("3"));
}

#[tokio::test]
async fn nothing_is_shared_across_windows() {
    let (executor, invocations) = echo_batch_executor();
    let coalescer = BatchingExecutor::new(executor, BatchingOptions::default());

    let first = coalescer.execute(user_request("1")).await;
    let second = coalescer.execute(user_request("1")).await;

    assert_eq!(user_id(first), json!("1"));
    assert_eq!(user_id(second), json!("1"));
    assert_eq!(invocations.all(), vec![vec![json!("1")], vec![json!("1")]]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sibling_requests_share_a_window_on_every_worker() {
    let (executor, invocations) = echo_batch_executor();
    let coalescer = BatchingExecutor::new(executor, BatchingOptions::default());

    for round in 0..50 {
        let ids: Vec<String> = (0..20).map(|index| format!("{round}-{index}")).collect();
        let responses =
            futures::future::join_all(ids.iter().map(|id| coalescer.execute(user_request(id)))).await;
        for (id, response) in ids.iter().zip(responses) {
            assert_eq!(user_id(response), json!(id));
        }
    }

    let invocations = invocations.all();
    assert_eq!(invocations.len(), 50);
    assert!(invocations.iter().all(|batch| batch.len() == 20));
}

#[tokio::test]
async fn full_windows_are_sent_right_away() {
    let (executor, invocations) = echo_batch_executor();
    let coalescer = BatchingExecutor::new(
        executor,
        BatchingOptions {
            max_batch_size: Some(2),
            flush: FlushSchedule::NextTick,
        },
    );

    let (first, second, third) = tokio::join!(
        coalescer.execute(user_request("1")),
        coalescer.execute(user_request("2")),
        coalescer.execute(user_request("3")),
    );

    assert_eq!(user_id(first), json!("1"));
    assert_eq!(user_id(second), json!("2"));
    assert_eq!(user_id(third), json!("3"));
    assert_eq!(
        invocations.all(),
        vec![vec![json!("1"), json!("2")], vec![json!("3")]]
    );
}

#[tokio::test]
async fn delayed_windows_collect_later_requests() {
    let (executor, invocations) = echo_batch_executor();
    let coalescer = BatchingExecutor::new(
        executor,
        BatchingOptions {
            max_batch_size: None,
            flush: FlushSchedule::Delay(Duration::from_millis(20)),
        },
    );

    let (first, second) = tokio::join!(coalescer.execute(user_request("1")), async {
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        coalescer.execute(user_request("2")).await
    });

    assert_eq!(user_id(first), json!("1"));
    assert_eq!(user_id(second), json!("2"));
    assert_eq!(invocations.all(), vec![vec![json!("1"), json!("2")]]);
}

#[tokio::test]
async fn failures_reject_every_caller() {
    let calls = Arc::new(AtomicUsize::new(0));
    let executor = {
        let calls = calls.clone();
        FnBatchExecutor::new(move |_requests: Vec<ExecutionRequest>| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<Vec<ExecutorResponse>, _>(ExecutorError::transport("upstream is down")) }
        })
    };
    let coalescer = BatchingExecutor::new(Arc::new(executor), BatchingOptions::default());

    let (first, second, third) = tokio::join!(
        coalescer.execute(user_request("1")),
        coalescer.execute(user_request("1")),
        coalescer.execute(user_request("2")),
    );

    let expected = ExecutorError::transport("upstream is down");
    assert_eq!(first.err(), Some(expected.clone()));
    assert_eq!(second.err(), Some(expected.clone()));
    assert_eq!(third.err(), Some(expected));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn miscounted_batches_reject_every_caller() {
    let executor = FnBatchExecutor::new(|_requests: Vec<ExecutionRequest>| async {
        Ok(vec![ExecutorResponse::single(ExecutionResult::default())])
    });
    let coalescer = BatchingExecutor::new(Arc::new(executor), BatchingOptions::default());

    let (first, second) = tokio::join!(
        coalescer.execute(user_request("1")),
        coalescer.execute(user_request("2")),
    );

    let expected = ExecutorError::BatchCardinalityMismatch {
        expected: 2,
        received: 1,
    };
    assert_eq!(first.err(), Some(expected.clone()));
    assert_eq!(second.err(), Some(expected));
}

#[tokio::test]
async fn cancelled_callers_do_not_cancel_the_batch() {
    let (executor, invocations) = echo_batch_executor();
    let coalescer = BatchingExecutor::new(executor, BatchingOptions::default());

    let mut cancelled = Box::pin(coalescer.execute(user_request("1")));
    assert!(futures::poll!(&mut cancelled).is_pending());
    let kept = coalescer.execute(user_request("2"));
    drop(cancelled);

    assert_eq!(user_id(kept.await), json!("2"));
    assert_eq!(invocations.all(), vec![vec![json!("1"), json!("2")]]);
}

#[tokio::test]
async fn batched_subschemas_send_one_request_per_window() {
    let query = "{ reviews { body author { name } } }";
    let (unbatched, unbatched_logs) = demo_gateway(None);
    let (batched, batched_logs) = demo_gateway(Some(BatchingOptions::default()));

    let expected = unbatched
        .execute(request(query), GatewayContext::new())
        .await
        .into_single()
        .expect("single result");
    let response = batched
        .execute(request(query), GatewayContext::new())
        .await
        .into_single()
        .expect("single result");

    assert_eq!(response, expected);
    assert!(response.errors.is_none());
    // five reviews written by three users
    assert_eq!(unbatched_logs.accounts.len(), 5);
    assert_eq!(batched_logs.accounts.len(), 1);
    let merged = &batched_logs.accounts.documents()[0];
    assert!(merged.contains("_2__entity"));
    assert!(!merged.contains("_3__entity"));
}

#[tokio::test]
async fn subschemas_over_one_executor_share_the_window() {
    let (executor, log) = recorded(LocalExecutor::new(subgraphs::accounts::get_subgraph()));
    let me_only = Subschema::new("me", subgraphs::accounts::SDL, executor.clone())
        .expect("valid subschema")
        .transform(Arc::new(FilterFields::new("Query", vec!["users".to_string()])))
        .batched(BatchingOptions::default());
    let users_only = Subschema::new("directory", subgraphs::accounts::SDL, executor)
        .expect("valid subschema")
        .transform(Arc::new(FilterFields::new("Query", vec!["me".to_string()])))
        .batched(BatchingOptions::default());
    let gateway = StitchedGateway::builder()
        .subschema(me_only)
        .subschema(users_only)
        .build()
        .expect("valid gateway");

    let response = gateway
        .execute(
            request("{ me { name } users { id } }"),
            GatewayContext::new(),
        )
        .await
        .into_single()
        .expect("single result");

    assert_eq!(
        response.to_json(),
        json!({
            "data": {
                "me": { "name": "Uri Goldshtein" },
                "users": [
                    { "id": "1" }, { "id": "2" }, { "id": "3" },
                    { "id": "4" }, { "id": "5" }, { "id": "6" }
                ]
            }
        })
    );
    assert_eq!(log.len(), 1);
}

#[tokio::test]
async fn isolated_windows_are_never_shared() {
    let (executor, log) = recorded(LocalExecutor::new(subgraphs::accounts::get_subgraph()));
    let me_only = Subschema::new("me", subgraphs::accounts::SDL, executor.clone())
        .expect("valid subschema")
        .transform(Arc::new(FilterFields::new("Query", vec!["users".to_string()])))
        .batched(BatchingOptions::default());
    let users_only = Subschema::new("directory", subgraphs::accounts::SDL, executor)
        .expect("valid subschema")
        .transform(Arc::new(FilterFields::new("Query", vec!["me".to_string()])))
        .batched_isolated(BatchingOptions::default());
    let gateway = StitchedGateway::builder()
        .subschema(me_only)
        .subschema(users_only)
        .build()
        .expect("valid gateway");

    let response = gateway
        .execute(request("{ me { name } users { id } }"), GatewayContext::new())
        .await
        .into_single()
        .expect("single result");

    assert!(response.errors.is_none());
    assert_eq!(response.to_json()["data"]["me"]["name"], json!("Uri Goldshtein"));
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn explicitly_shared_coalescers_send_one_request() {
    let (executor, log) = recorded(LocalExecutor::new(subgraphs::accounts::get_subgraph()));
    let coalescer = Arc::new(BatchingExecutor::merging(
        executor.clone(),
        BatchingOptions::default(),
    ));
    let me_only = Subschema::new("me", subgraphs::accounts::SDL, executor.clone())
        .expect("valid subschema")
        .transform(Arc::new(FilterFields::new("Query", vec!["users".to_string()])))
        .with_shared_batching(coalescer.clone());
    let users_only = Subschema::new("directory", subgraphs::accounts::SDL, executor)
        .expect("valid subschema")
        .transform(Arc::new(FilterFields::new("Query", vec!["me".to_string()])))
        .with_shared_batching(coalescer);
    let gateway = StitchedGateway::builder()
        .subschema(me_only)
        .subschema(users_only)
        .build()
        .expect("valid gateway");

    let response = gateway
        .execute(
            request(r#"{ me { username } user(id: "2") { username } }"#),
            GatewayContext::new(),
        )
        .await
        .into_single()
        .expect("single result");

    assert_eq!(
        response.to_json(),
        json!({
            "data": {
                "me": { "username": "urigo" },
                "user": { "username": "dotansimha" }
            }
        })
    );
    assert_eq!(log.len(), 1);
}
