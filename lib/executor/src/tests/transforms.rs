use std::collections::HashMap;

use hive_gateway_config::parse_yaml_config;
use hive_gateway_internal::telemetry::metrics::RegistryHandle;
use serde_json::json;

use super::{recorded, request, CallLog};
use crate::{
    context::GatewayContext,
    delegation::error::SubschemaError,
    executors::local::LocalExecutor,
    gateway::{GatewayBuildError, StitchedGateway, SubschemaSource},
};

const CONFIG: &str = r#"
subschemas:
  - name: products
    transforms:
      - kind: rename_fields
        type_name: StoreProduct
        renames:
          - from: name
            to: title
      - kind: rename_types
        renames:
          - from: Product
            to: StoreProduct
      - kind: filter_fields
        type_name: Product
        hidden: [weight]
    merge:
      - type_name: StoreProduct
        selection_set: "{ upc }"
        field_name: product
        args:
          - name: upc
            key: upc
  - name: inventory
    transforms:
      - kind: rename_types
        renames:
          - from: Product
            to: StoreProduct
    merge:
      - type_name: StoreProduct
        selection_set: "{ upc }"
        field_name: productByUpc
        args:
          - name: upc
            key: upc
"#;

fn sources() -> (HashMap<String, SubschemaSource>, CallLog, CallLog) {
    let (products_executor, products) =
        recorded(LocalExecutor::new(subgraphs::products::get_subgraph()));
    let (inventory_executor, inventory) =
        recorded(LocalExecutor::new(subgraphs::inventory::get_subgraph()));

    let sources = HashMap::from([
        (
            "products".to_string(),
            SubschemaSource {
                sdl: subgraphs::products::SDL.to_string(),
                executor: products_executor,
            },
        ),
        (
            "inventory".to_string(),
            SubschemaSource {
                sdl: subgraphs::inventory::SDL.to_string(),
                executor: inventory_executor,
            },
        ),
    ]);
    (sources, products, inventory)
}

#[tokio::test]
async fn transformed_subschemas_are_exposed_under_their_outer_names() {
    let config = parse_yaml_config(CONFIG.to_string()).expect("valid config");
    let (sources, products, inventory) = sources();
    let gateway = StitchedGateway::from_config(&config, sources, &RegistryHandle::pending())
        .expect("valid gateway");

    let schema = gateway.schema();
    assert!(schema.type_metadata("Product").is_none());
    let store_product = schema.type_metadata("StoreProduct").expect("renamed type");
    assert_eq!(
        store_product.fields.keys().collect::<Vec<_>>(),
        vec!["upc", "title", "price", "inStock", "shippingEstimate"]
    );
    let products_subschema = gateway.subschema("products").expect("configured");
    assert!(products_subschema.inner_schema().type_metadata("Product").is_some());
    assert!(products_subschema.schema().type_metadata("Product").is_none());

    let response = gateway
        .execute(
            request("{ topProducts(first: 2) { __typename title inStock ... on StoreProduct { upc } } }"),
            GatewayContext::new(),
        )
        .await
        .into_single()
        .expect("single result");

    assert_eq!(
        response.to_json(),
        json!({
            "data": {
                "topProducts": [
                    { "__typename": "StoreProduct", "title": "Table", "inStock": true, "upc": "1" },
                    { "__typename": "StoreProduct", "title": "Couch", "inStock": false, "upc": "2" }
                ]
            }
        })
    );
    insta::assert_snapshot!(
        products.documents()[0],
        @"query{topProducts(first:2){__typename title:name ...on Product{upc} upc}}"
    );
    insta::assert_snapshot!(
        inventory.documents()[0],
        @"query($_key_upc:String!){_entity:productByUpc(upc:$_key_upc){__typename inStock}}"
    );
}

#[tokio::test]
async fn hidden_fields_cannot_be_queried() {
    let config = parse_yaml_config(CONFIG.to_string()).expect("valid config");
    let (sources, products, _) = sources();
    let gateway = StitchedGateway::from_config(&config, sources, &RegistryHandle::pending())
        .expect("valid gateway");

    let response = gateway
        .execute(
            request("{ topProducts(first: 1) { title weight } }"),
            GatewayContext::new(),
        )
        .await
        .into_single()
        .expect("single result");

    assert_eq!(
        response.to_json(),
        json!({
            "data": { "topProducts": [{ "title": "Table" }] },
            "errors": [{
                "message": "Cannot query field \"weight\" on type \"StoreProduct\".",
                "path": ["topProducts", "weight"]
            }]
        })
    );
    assert!(!products.documents()[0].contains("weight"));
}

#[test]
fn configuration_mistakes_are_reported_at_startup() {
    let config = parse_yaml_config(CONFIG.to_string()).expect("valid config");
    let (mut without_inventory, _, _) = sources();
    without_inventory.remove("inventory");
    assert!(matches!(
        StitchedGateway::from_config(&config, without_inventory, &RegistryHandle::pending()),
        Err(GatewayBuildError::MissingSource(name)) if name == "inventory"
    ));

    let config = parse_yaml_config(CONFIG.replace("field_name: product\n", "field_name: productById\n"))
        .expect("valid config");
    let (renamed_merge, _, _) = sources();
    assert!(matches!(
        StitchedGateway::from_config(&config, renamed_merge, &RegistryHandle::pending()),
        Err(GatewayBuildError::Subschema(SubschemaError::InvalidMerge { subschema, .. })) if subschema == "products"
    ));
}
