use async_graphql::{EmptyMutation, EmptySubscription, Object, Schema, SimpleObject, ID};
use lazy_static::lazy_static;

pub const SDL: &str = r#"
type Query {
  me: User
  user(id: ID!): User
  users: [User]
}

type User {
  id: ID!
  name: String
  username: String
  birthday: Int
}
"#;

/// `(id, name, username)`
const PEOPLE: &[(&str, &str, &str)] = &[
    ("1", "Uri Goldshtein", "urigo"),
    ("2", "Dotan Simha", "dotansimha"),
    ("3", "Kamil Kisiela", "kamilkisiela"),
    ("4", "Arda Tanrikulu", "ardatan"),
    ("5", "Gil Gardosh", "gilgardosh"),
    ("6", "Laurin Quast", "laurin"),
];

lazy_static! {
    static ref USERS: Vec<User> = PEOPLE
        .iter()
        .map(|(id, name, username)| User {
            id: ID(id.to_string()),
            name: Some(name.to_string()),
            username: Some(username.to_string()),
            birthday: Some(1234567890),
        })
        .collect();
}

#[derive(SimpleObject, Clone)]
pub struct User {
    id: ID,
    name: Option<String>,
    username: Option<String>,
    birthday: Option<i32>,
}

pub struct Query;

#[Object]
impl Query {
    /// The signed-in user is always the first one.
    async fn me(&self) -> Option<User> {
        USERS.first().cloned()
    }

    async fn user(&self, id: ID) -> Option<User> {
        USERS.iter().find(|user| user.id == id).cloned()
    }

    async fn users(&self) -> Option<Vec<Option<User>>> {
        Some(USERS.iter().cloned().map(Some).collect())
    }
}

pub fn get_subgraph() -> Schema<Query, EmptyMutation, EmptySubscription> {
    Schema::build(Query, EmptyMutation, EmptySubscription).finish()
}
