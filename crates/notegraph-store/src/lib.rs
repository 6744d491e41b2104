//! Notegraph Store: graph data model, read-side collaborator traits, and a
//! SQLite reference backend (FTS5 + uint8 chunk vectors).

pub mod embedding;
pub mod graph;
pub mod repository;
pub mod schema;
pub mod sqlite;
pub mod types;

pub use graph::Subgraph;
pub use repository::*;
pub use sqlite::SqliteGraphStore;
pub use types::*;
