//! Configuration and data directory management.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Paths to the Notegraph data directories.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataPaths {
    /// Root data directory (e.g., `data/`).
    pub root: PathBuf,
    /// Graph database directory (`data/graph/`).
    pub graph: PathBuf,
}

impl DataPaths {
    /// Create data paths from a root directory. Creates directories if needed.
    pub fn new(root: impl AsRef<Path>) -> std::io::Result<Self> {
        let root = root.as_ref().to_path_buf();
        let paths = Self {
            graph: root.join("graph"),
            root,
        };
        std::fs::create_dir_all(&paths.graph)?;
        Ok(paths)
    }
}

/// Per-dimension weights for Cluster RRF.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterWeights {
    pub density: f64,
    pub recency: f64,
    pub richness: f64,
    pub open_count: f64,
    pub last_open: f64,
    pub similarity: f64,
}

impl Default for ClusterWeights {
    fn default() -> Self {
        Self {
            density: 1.0,
            recency: 1.0,
            richness: 1.0,
            open_count: 0.8,
            last_open: 0.8,
            similarity: 1.0,
        }
    }
}

impl ClusterWeights {
    fn all(&self) -> [f64; 6] {
        [
            self.density,
            self.recency,
            self.richness,
            self.open_count,
            self.last_open,
            self.similarity,
        ]
    }
}

/// Tunables for the query and ranking engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    /// RRF damping constant `K` in `weight / (K + rank)`.
    pub rrf_k: f64,
    /// Wall-clock budget for one traversal or path search, in milliseconds.
    pub step_timeout_ms: u64,
    /// Semantic fan-out per depth after the first hop. Depth 0 uses the
    /// caller's `limit`; depths past the end of this table get nothing.
    pub semantic_decay: Vec<usize>,
    /// Additive Cluster RRF bonus for nodes reached over a stored edge.
    pub physical_bonus: f64,
    /// Additive Key-Node RRF bonus for bridge nodes.
    pub bridge_bonus: f64,
    pub cluster_weights: ClusterWeights,
    /// Weight of the degree term in Key-Node RRF.
    pub degree_weight: f64,
    /// Weight of the semantic-filter term in Key-Node RRF.
    pub semantic_weight: f64,
    /// Size of each top-by-degree list pulled as the key-node candidate pool.
    pub key_node_pool: usize,
    /// Degree asymmetry needed to classify a node as hub or authority.
    pub hub_ratio: f64,
    /// Minimum directional degree for hub or authority.
    pub min_directional_degree: usize,
    /// Cap on hard-orphan candidates pulled from the edge store.
    pub orphan_candidate_cap: usize,
    /// Neighbors requested per orphan when looking for a revival suggestion.
    pub revival_candidates: usize,
    pub default_limit: usize,
    pub max_path_hops: usize,
    /// Entries per map in the compiled regex / expression cache.
    pub cache_capacity: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            rrf_k: 10.0,
            step_timeout_ms: 5000,
            semantic_decay: vec![3, 1],
            physical_bonus: 0.02,
            bridge_bonus: 0.05,
            cluster_weights: ClusterWeights::default(),
            degree_weight: 1.0,
            semantic_weight: 1.0,
            key_node_pool: 300,
            hub_ratio: 1.2,
            min_directional_degree: 3,
            orphan_candidate_cap: 200,
            revival_candidates: 5,
            default_limit: 10,
            max_path_hops: 6,
            cache_capacity: 256,
        }
    }
}

impl QueryConfig {
    /// Defaults, with `NOTEGRAPH_STEP_TIMEOUT_MS` and `NOTEGRAPH_RRF_K`
    /// applied when set and parseable.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(ms) = env_parse::<u64>("NOTEGRAPH_STEP_TIMEOUT_MS") {
            config.step_timeout_ms = ms;
        }
        if let Some(k) = env_parse::<f64>("NOTEGRAPH_RRF_K") {
            config.rrf_k = k;
        }
        config
    }

    /// Reject values that would make scores meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.rrf_k.is_nan() || self.rrf_k <= 0.0 {
            return Err(Error::Config(format!("rrf_k must be positive, got {}", self.rrf_k)));
        }
        if self.physical_bonus < 0.0 || self.bridge_bonus < 0.0 {
            return Err(Error::Config("score bonuses must not be negative".into()));
        }
        if self.degree_weight < 0.0
            || self.semantic_weight < 0.0
            || self.cluster_weights.all().iter().any(|w| *w < 0.0)
        {
            return Err(Error::Config("RRF weights must not be negative".into()));
        }
        if self.hub_ratio < 1.0 {
            return Err(Error::Config(format!(
                "hub_ratio must be at least 1.0, got {}",
                self.hub_ratio
            )));
        }
        Ok(())
    }

    /// Semantic neighbor budget for expanding a node at `depth`.
    pub fn semantic_budget(&self, depth: usize, limit: usize) -> usize {
        match depth {
            0 => limit,
            d => self.semantic_decay.get(d - 1).copied().unwrap_or(0),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!("Ignoring unparseable {}={}", key, raw);
            None
        }
    }
}

/// Top-level Notegraph configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotegraphConfig {
    /// Data directory paths.
    pub data_paths: DataPaths,
    /// Embedding dimension of stored chunk vectors.
    pub embedding_dim: usize,
    pub query: QueryConfig,
}

impl NotegraphConfig {
    /// Create configuration from environment and defaults.
    pub fn from_env(data_dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let embedding_dim = env_parse("NOTEGRAPH_EMBEDDING_DIM").unwrap_or(384);
        let data_paths = DataPaths::new(data_dir)?;

        Ok(Self {
            data_paths,
            embedding_dim,
            query: QueryConfig::from_env(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semantic_budget_decays_by_depth() {
        let config = QueryConfig::default();
        assert_eq!(config.semantic_budget(0, 12), 12);
        assert_eq!(config.semantic_budget(1, 12), 3);
        assert_eq!(config.semantic_budget(2, 12), 1);
        assert_eq!(config.semantic_budget(3, 12), 0);
        assert_eq!(config.semantic_budget(10, 12), 0);
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(QueryConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = QueryConfig {
            rrf_k: 0.0,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let config = QueryConfig {
            hub_ratio: 0.5,
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));

        let mut config = QueryConfig::default();
        config.cluster_weights.recency = -1.0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_partial_config_deserializes_with_defaults() {
        let config: QueryConfig = serde_json::from_str(r#"{"rrf_k": 60.0}"#).unwrap();
        assert_eq!(config.rrf_k, 60.0);
        assert_eq!(config.key_node_pool, 300);
        assert_eq!(config.semantic_decay, vec![3, 1]);
    }

    #[test]
    fn test_data_paths_creates_graph_dir() {
        let dir = tempfile::tempdir().unwrap();
        let paths = DataPaths::new(dir.path()).unwrap();
        assert!(paths.graph.is_dir());
        assert_eq!(paths.root, dir.path());
    }
}
