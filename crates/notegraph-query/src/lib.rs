//! Query and ranking engine over a note graph.
//!
//! Boolean tag/category expressions, a generic filter/sort/limit pipeline,
//! Cluster and Key-Node RRF, semantic neighbors, hybrid traversal, path
//! finding and orphan detection, dispatched by [`QueryEngine`].

pub mod accessors;
pub mod cache;
pub mod engine;
pub mod expr;
pub mod filter;
pub mod key_nodes;
pub mod orphan;
pub mod path;
pub mod rrf;
pub mod semantic;
pub mod traverse;
pub mod types;

pub use cache::QueryCache;
pub use engine::{QueryEngine, Repositories};
pub use expr::{BoolExpr, Predicate};
pub use filter::{ItemFieldAccessor, ItemFilter};
pub use types::*;
