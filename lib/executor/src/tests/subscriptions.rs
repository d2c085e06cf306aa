use std::sync::Arc;

use futures::{stream, StreamExt};
use serde_json::json;

use super::{demo_gateway, request};
use hive_gateway_config::subschema::{MergeArgConfig, MergedTypeConfig};

use crate::{
    context::GatewayContext,
    delegation::subschema::Subschema,
    execution_request::{ExecutionRequest, OperationKind},
    executors::{
        batch::{BatchingExecutor, BatchingOptions},
        common::{Executor, ExecutorResponse, FnBatchExecutor, FnExecutor},
    },
    gateway::StitchedGateway,
    response::execution_result::ExecutionResult,
};

#[tokio::test]
async fn subscription_events_are_completed_like_queries() {
    let (gateway, logs) = demo_gateway(None);

    let events: Vec<_> = gateway
        .subscribe(
            request(r#"subscription { reviewAdded(upc: "1") { body product { name } } }"#),
            GatewayContext::new(),
        )
        .map(|event| event.to_json())
        .collect()
        .await;

    assert_eq!(
        events,
        vec![
            json!({ "data": { "reviewAdded": { "body": "Love it!", "product": { "name": "Table" } } } }),
            json!({ "data": { "reviewAdded": { "body": "Prefer something else.", "product": { "name": "Table" } } } }),
        ]
    );
    assert_eq!(logs.reviews.len(), 1);
    assert_eq!(logs.products.len(), 2);
}

#[tokio::test]
async fn executing_a_subscription_answers_incrementally() {
    let (gateway, _) = demo_gateway(None);

    let response = gateway
        .execute(
            request(r#"subscription { reviewAdded(upc: "2") { body } }"#),
            GatewayContext::new(),
        )
        .await;
    assert!(response.is_incremental());

    let events: Vec<_> = response
        .into_stream()
        .map(|event| event.to_json())
        .collect()
        .await;
    assert_eq!(
        events,
        vec![
            json!({ "data": { "reviewAdded": { "body": "Too expensive." } } }),
            json!({ "data": { "reviewAdded": { "body": "Perfect for the living room." } } }),
        ]
    );
}

#[tokio::test]
async fn subscriptions_select_a_single_root_field() {
    let (gateway, logs) = demo_gateway(None);

    let events: Vec<_> = gateway
        .subscribe(
            request("subscription { a: reviewAdded { body } b: reviewAdded { body } }"),
            GatewayContext::new(),
        )
        .map(|event| event.to_json())
        .collect()
        .await;

    assert_eq!(
        events,
        vec![json!({
            "errors": [{ "message": "Subscription operations must select exactly one root field, found 2" }]
        })]
    );
    assert_eq!(logs.reviews.len(), 0);
}

#[tokio::test]
async fn streamed_query_results_end_with_a_final_payload() {
    let executor = FnExecutor::new(|_request: ExecutionRequest| async {
        Ok(ExecutorResponse::Stream(
            stream::iter(vec![
                ExecutionResult {
                    data: Some(json!({ "feed": { "__typename": "FeedItem", "id": "1" } })),
                    has_next: Some(true),
                    ..Default::default()
                },
                ExecutionResult {
                    data: Some(json!({ "__typename": "FeedItem", "body": "late", "secret": "x" })),
                    path: Some(vec!["feed".into()]),
                    has_next: Some(false),
                    ..Default::default()
                },
            ])
            .boxed(),
        ))
    });
    let gateway = StitchedGateway::builder()
        .subschema(
            Subschema::new(
                "feed",
                "type Query { feed: FeedItem } type FeedItem { id: ID! body: String }",
                Arc::new(executor),
            )
            .expect("valid subschema"),
        )
        .build()
        .expect("valid gateway");

    let payloads: Vec<_> = gateway
        .execute(request("{ feed { id body } }"), GatewayContext::new())
        .await
        .into_stream()
        .map(|payload| payload.to_json())
        .collect()
        .await;

    assert_eq!(
        payloads,
        vec![
            json!({ "data": { "feed": { "id": "1", "body": null } }, "hasNext": true }),
            json!({ "data": { "body": "late" }, "path": ["feed"], "hasNext": true }),
            json!({ "hasNext": false }),
        ]
    );
}

/// A feed subschema streaming `body` late, and an authors subschema merged by item id whose
/// answers come from `authors`.
fn feed_gateway(
    feed: Vec<ExecutionResult>,
    authors: impl Fn(String) -> ExecutorResponse + Send + Sync + 'static,
) -> StitchedGateway {
    let feed = FnExecutor::new(move |_request: ExecutionRequest| {
        let payloads = feed.clone();
        async move { Ok(ExecutorResponse::Stream(stream::iter(payloads).boxed())) }
    });
    let authors = FnExecutor::new(move |request: ExecutionRequest| {
        let id = request.variables.get("_key_id").and_then(|id| id.as_str()).unwrap_or_default();
        let response = authors(id.to_string());
        async move { Ok(response) }
    });

    StitchedGateway::builder()
        .subschema(
            Subschema::new(
                "feed",
                "type Query { feed: [FeedItem] } type FeedItem { id: ID! body: String }",
                Arc::new(feed),
            )
            .expect("valid subschema"),
        )
        .subschema(
            Subschema::new(
                "authors",
                "type Query { feedItem(id: ID!): FeedItem } type FeedItem { id: ID! author: String }",
                Arc::new(authors),
            )
            .expect("valid subschema")
            .merge(&MergedTypeConfig {
                type_name: "FeedItem".to_string(),
                selection_set: "{ id }".to_string(),
                field_name: "feedItem".to_string(),
                args: vec![MergeArgConfig {
                    name: "id".to_string(),
                    key: "id".to_string(),
                }],
            })
            .expect("valid merge"),
        )
        .build()
        .expect("valid gateway")
}

fn author(name: String) -> ExecutorResponse {
    ExecutorResponse::single(ExecutionResult::from_data(
        json!({ "_entity": { "author": name } }),
    ))
}

#[tokio::test]
async fn streamed_payloads_are_merged_and_shaped_for_the_client() {
    let gateway = feed_gateway(
        vec![
            ExecutionResult {
                data: Some(json!({ "f": [{ "__typename": "FeedItem", "id": "1" }] })),
                has_next: Some(true),
                ..Default::default()
            },
            ExecutionResult {
                data: Some(json!({ "__typename": "FeedItem", "id": "2", "body": "late", "secret": "x" })),
                path: Some(vec!["f".into(), 0.into()]),
                has_next: Some(false),
                ..Default::default()
            },
        ],
        |id| author(format!("author of {id}")),
    );

    let payloads: Vec<_> = gateway
        .execute(request("{ f: feed { body author } }"), GatewayContext::new())
        .await
        .into_stream()
        .map(|payload| payload.to_json())
        .collect()
        .await;

    assert_eq!(
        payloads,
        vec![
            json!({ "data": { "f": [{ "body": null, "author": "author of 1" }] }, "hasNext": true }),
            json!({
                "data": { "body": "late", "author": "author of 2" },
                "path": ["f", 0],
                "hasNext": true
            }),
            json!({ "hasNext": false }),
        ]
    );
}

#[tokio::test]
async fn streamed_merge_answers_reach_the_merged_object() {
    let gateway = feed_gateway(
        vec![ExecutionResult::from_data(
            json!({ "feed": [{ "id": "1", "body": "hello" }] }),
        )],
        |id| {
            ExecutorResponse::Stream(
                stream::iter(vec![
                    ExecutionResult::from_data(json!({ "_entity": { "author": "Ada" } })),
                    ExecutionResult {
                        data: Some(json!({ "author": format!("Ada, author of {id}") })),
                        path: Some(vec!["_entity".into()]),
                        ..Default::default()
                    },
                ])
                .boxed(),
            )
        },
    );

    let payloads: Vec<_> = gateway
        .execute(request("{ feed { body author } }"), GatewayContext::new())
        .await
        .into_stream()
        .map(|payload| payload.to_json())
        .collect()
        .await;

    assert_eq!(
        payloads,
        vec![
            json!({ "data": { "feed": [{ "body": "hello", "author": "Ada" }] }, "hasNext": true }),
            json!({
                "data": { "author": "Ada, author of 1" },
                "path": ["feed", 0],
                "hasNext": true
            }),
            json!({ "hasNext": false }),
        ]
    );
}

#[tokio::test]
async fn coalesced_streams_reach_every_caller() {
    let executor = FnBatchExecutor::new(|requests: Vec<ExecutionRequest>| {
        let responses: Vec<ExecutorResponse> = requests
            .iter()
            .map(|_| {
                ExecutorResponse::Stream(
                    stream::iter(vec![
                        ExecutionResult::from_data(json!({ "tick": 1 })),
                        ExecutionResult::from_data(json!({ "tick": 2 })),
                    ])
                    .boxed(),
                )
            })
            .collect();
        async move { Ok(responses) }
    });
    let coalescer = BatchingExecutor::new(Arc::new(executor), BatchingOptions::default());
    let subscription = || ExecutionRequest::new("subscription { tick }", OperationKind::Subscription);

    let (first, second) = tokio::join!(
        coalescer.execute(subscription()),
        coalescer.execute(subscription()),
    );

    for response in [first, second] {
        let ticks: Vec<_> = response
            .expect("successful response")
            .into_stream()
            .map(|result| result.data)
            .collect()
            .await;
        assert_eq!(ticks, vec![Some(json!({ "tick": 1 })), Some(json!({ "tick": 2 }))]);
    }
}
