pub mod on_fetch;
pub mod on_subgraph_execute;
