use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema, SimpleObject};
use lazy_static::lazy_static;

pub const SDL: &str = r#"
type Query {
  topProducts(first: Int = 5): [Product]
  product(upc: String!): Product
}

type Product {
  upc: String!
  name: String
  price: Int
  weight: Int
}
"#;

/// `(upc, name, price, weight)`
const CATALOG: &[(&str, &str, i64, i64)] = &[
    ("1", "Table", 899, 100),
    ("2", "Couch", 1299, 1000),
    ("3", "Glass", 15, 20),
    ("4", "Chair", 499, 100),
    ("5", "TV", 1299, 1000),
    ("6", "Lamp", 6999, 300),
    ("7", "Grill", 3999, 2000),
    ("8", "Fridge", 100000, 6000),
    ("9", "Sofa", 9999, 800),
];

lazy_static! {
    static ref PRODUCTS: Vec<Product> = CATALOG
        .iter()
        .map(|(upc, name, price, weight)| Product {
            upc: upc.to_string(),
            name: Some(name.to_string()),
            price: Some(*price),
            weight: Some(*weight),
        })
        .collect();
}

#[derive(SimpleObject, Clone)]
pub struct Product {
    upc: String,
    name: Option<String>,
    price: Option<i64>,
    weight: Option<i64>,
}

pub struct Query;

#[Object]
impl Query {
    async fn top_products(
        &self,
        #[graphql(default = 5)] first: Option<i32>,
    ) -> Option<Vec<Option<Product>>> {
        let first = usize::try_from(first.unwrap_or(5)).unwrap_or(0);
        Some(PRODUCTS.iter().take(first).cloned().map(Some).collect())
    }

    async fn product(&self, upc: String) -> Option<Product> {
        PRODUCTS.iter().find(|product| product.upc == upc).cloned()
    }
}

pub fn get_subgraph() -> Schema<Query, EmptyMutation, EmptySubscription> {
    Schema::build(Query, EmptyMutation, EmptySubscription).finish()
}
