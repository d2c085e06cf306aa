//! GraphQL services executed in-process, used by the gateway tests and the dev CLI.
//!
//! Each module exposes the service (`get_subgraph`) and the SDL the gateway is given for it.

pub mod accounts;
pub mod inventory;
pub mod products;
pub mod reviews;
