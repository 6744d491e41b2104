//! Notegraph Core: error taxonomy and configuration shared by every crate.

pub mod config;
pub mod error;

pub use config::{ClusterWeights, DataPaths, NotegraphConfig, QueryConfig};
pub use error::{Error, Result};
