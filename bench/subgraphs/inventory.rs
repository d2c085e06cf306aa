use async_graphql::{ComplexObject, EmptyMutation, EmptySubscription, Object, Schema, SimpleObject};
use lazy_static::lazy_static;

pub const SDL: &str = r#"
type Query {
  productByUpc(upc: String!): Product
}

type Product {
  upc: String!
  inStock: Boolean
  shippingEstimate(zip: String): Int
}
"#;

/// `(upc, in stock, weight)`
const STOCK: &[(&str, bool, i64)] = &[
    ("1", true, 100),
    ("2", false, 1000),
    ("3", false, 20),
    ("4", false, 100),
    ("5", true, 1000),
    ("6", true, 300),
    ("7", true, 2000),
    ("8", false, 6000),
    ("9", true, 800),
];

lazy_static! {
    static ref INVENTORY: Vec<Product> = STOCK
        .iter()
        .map(|(upc, in_stock, weight)| Product {
            upc: upc.to_string(),
            in_stock: Some(*in_stock),
            weight: *weight,
        })
        .collect();
}

#[derive(SimpleObject, Clone)]
#[graphql(complex)]
pub struct Product {
    upc: String,
    in_stock: Option<bool>,
    #[graphql(skip)]
    weight: i64,
}

#[ComplexObject]
impl Product {
    /// Free shipping within the `10` zip area.
    async fn shipping_estimate(&self, zip: Option<String>) -> Option<i64> {
        match zip {
            Some(zip) if zip.starts_with("10") => Some(0),
            _ => Some(self.weight / 2),
        }
    }
}

pub struct Query;

#[Object]
impl Query {
    async fn product_by_upc(&self, upc: String) -> Option<Product> {
        INVENTORY.iter().find(|product| product.upc == upc).cloned()
    }
}

pub fn get_subgraph() -> Schema<Query, EmptyMutation, EmptySubscription> {
    Schema::build(Query, EmptyMutation, EmptySubscription).finish()
}
