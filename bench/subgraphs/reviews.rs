use async_graphql::{ComplexObject, EmptyMutation, Object, Schema, SimpleObject, Subscription, ID};
use futures::{stream, Stream};
use lazy_static::lazy_static;

pub const SDL: &str = r#"
type Query {
  reviews(first: Int): [Review]
  author(id: ID!): User
  reviewedProduct(upc: String!): Product
}

type Subscription {
  reviewAdded(upc: String): Review
}

type Review {
  id: ID!
  body: String
  author: User
  product: Product
}

type User {
  id: ID!
  reviews: [Review]
}

type Product {
  upc: String!
  reviews: [Review]
}
"#;

struct ReviewRecord {
    id: &'static str,
    body: &'static str,
    author_id: &'static str,
    upc: &'static str,
}

lazy_static! {
    static ref REVIEWS: Vec<ReviewRecord> = vec![
        ReviewRecord {
            id: "1",
            body: "Love it!",
            author_id: "1",
            upc: "1",
        },
        ReviewRecord {
            id: "2",
            body: "Too expensive.",
            author_id: "1",
            upc: "2",
        },
        ReviewRecord {
            id: "3",
            body: "Could be better.",
            author_id: "2",
            upc: "3",
        },
        ReviewRecord {
            id: "4",
            body: "Prefer something else.",
            author_id: "2",
            upc: "1",
        },
        ReviewRecord {
            id: "5",
            body: "Perfect for the living room.",
            author_id: "3",
            upc: "2",
        },
    ];
}

#[derive(SimpleObject, Clone)]
#[graphql(complex)]
pub struct Review {
    id: ID,
    body: Option<String>,
    #[graphql(skip)]
    author_id: String,
    #[graphql(skip)]
    upc: String,
}

impl From<&ReviewRecord> for Review {
    fn from(record: &ReviewRecord) -> Self {
        Review {
            id: ID(record.id.to_string()),
            body: Some(record.body.to_string()),
            author_id: record.author_id.to_string(),
            upc: record.upc.to_string(),
        }
    }
}

#[ComplexObject]
impl Review {
    async fn author(&self) -> Option<User> {
        Some(User {
            id: ID(self.author_id.clone()),
        })
    }

    async fn product(&self) -> Option<Product> {
        Some(Product {
            upc: self.upc.clone(),
        })
    }
}

#[derive(SimpleObject, Clone)]
#[graphql(complex)]
pub struct User {
    id: ID,
}

#[ComplexObject]
impl User {
    async fn reviews(&self) -> Option<Vec<Option<Review>>> {
        Some(
            REVIEWS
                .iter()
                .filter(|review| review.author_id == self.id.as_str())
                .map(|review| Some(review.into()))
                .collect(),
        )
    }
}

#[derive(SimpleObject, Clone)]
#[graphql(complex)]
pub struct Product {
    upc: String,
}

#[ComplexObject]
impl Product {
    async fn reviews(&self) -> Option<Vec<Option<Review>>> {
        Some(
            REVIEWS
                .iter()
                .filter(|review| review.upc == self.upc)
                .map(|review| Some(review.into()))
                .collect(),
        )
    }
}

pub struct Query;

#[Object]
impl Query {
    async fn reviews(&self, first: Option<i32>) -> Option<Vec<Option<Review>>> {
        let first = first.map_or(REVIEWS.len(), |first| first.max(0) as usize);
        Some(
            REVIEWS
                .iter()
                .take(first)
                .map(|review| Some(review.into()))
                .collect(),
        )
    }

    async fn author(&self, id: ID) -> Option<User> {
        Some(User { id })
    }

    async fn reviewed_product(&self, upc: String) -> Option<Product> {
        Some(Product { upc })
    }
}

pub struct Subscription;

#[Subscription]
impl Subscription {
    /// Replays the existing reviews, optionally only the ones of one product.
    async fn review_added(&self, upc: Option<String>) -> impl Stream<Item = Option<Review>> {
        let reviews: Vec<Option<Review>> = REVIEWS
            .iter()
            .filter(|review| upc.as_deref().is_none_or(|upc| review.upc == upc))
            .map(|review| Some(review.into()))
            .collect();
        stream::iter(reviews)
    }
}

pub fn get_subgraph() -> Schema<Query, EmptyMutation, Subscription> {
    Schema::build(Query, EmptyMutation, Subscription).finish()
}
