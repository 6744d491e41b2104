//! Cluster RRF: shrink a cluster of discovered documents to a limit.
//!
//! Each candidate collects `weight / (K + rank)` from every ranking it
//! appears in (edge density, recency, richness, open count, last open, and
//! similarity for semantic discoveries). Physical discoveries get a flat
//! bonus. Rankings come from the store; a failed lookup contributes nothing.

use std::collections::HashMap;

use notegraph_core::{ClusterWeights, QueryConfig};
use notegraph_store::{DocStatisticsRepository, EdgeRepository, GraphNode, StatMetric};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// How a node was first reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Discovery {
    Physical,
    Semantic,
}

/// `weight / (k + rank)` with a 0-based rank.
pub fn rrf_term(weight: f64, k: f64, rank: usize) -> f64 {
    weight / (k + rank as f64)
}

/// Position of each id in a best-first list. Duplicates keep their first rank.
pub fn rank_map<I, S>(ordered: I) -> HashMap<String, usize>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let mut ranks = HashMap::new();
    for (rank, id) in ordered.into_iter().enumerate() {
        ranks.entry(id.into()).or_insert(rank);
    }
    ranks
}

#[derive(Debug, Clone)]
pub struct ClusterCandidate {
    pub node: GraphNode,
    pub via: Discovery,
    pub similarity: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct ScoredCandidate {
    pub candidate: ClusterCandidate,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ClusterOutcome {
    /// Best first; ties broken by node id.
    pub kept: Vec<ScoredCandidate>,
    /// Candidates dropped to honor the limit.
    pub omitted: usize,
}

/// Ranking signals for one cluster, keyed by node id.
#[derive(Debug, Default)]
struct Signals {
    density: HashMap<String, usize>,
    recency: HashMap<String, usize>,
    richness: HashMap<String, usize>,
    open_count: HashMap<String, usize>,
    last_open: HashMap<String, usize>,
    similarity: HashMap<String, usize>,
}

pub struct ClusterRanker<'a> {
    edges: &'a dyn EdgeRepository,
    stats: &'a dyn DocStatisticsRepository,
    config: &'a QueryConfig,
}

impl<'a> ClusterRanker<'a> {
    pub fn new(
        edges: &'a dyn EdgeRepository,
        stats: &'a dyn DocStatisticsRepository,
        config: &'a QueryConfig,
    ) -> Self {
        Self {
            edges,
            stats,
            config,
        }
    }

    /// Score every candidate and keep the best `limit`.
    pub async fn shrink(&self, candidates: Vec<ClusterCandidate>, limit: usize) -> ClusterOutcome {
        if candidates.is_empty() {
            return ClusterOutcome::default();
        }
        let signals = self.signals(&candidates).await;
        let mut scored: Vec<ScoredCandidate> = candidates
            .into_iter()
            .map(|candidate| ScoredCandidate {
                score: fuse(
                    &signals,
                    &candidate,
                    &self.config.cluster_weights,
                    self.config.rrf_k,
                    self.config.physical_bonus,
                ),
                candidate,
            })
            .collect();
        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.candidate.node.id.cmp(&b.candidate.node.id))
        });

        let omitted = scored.len().saturating_sub(limit);
        scored.truncate(limit);
        if omitted > 0 {
            debug!("Cluster RRF kept {}, omitted {}", scored.len(), omitted);
        }
        ClusterOutcome {
            kept: scored,
            omitted,
        }
    }

    async fn signals(&self, candidates: &[ClusterCandidate]) -> Signals {
        let ids: Vec<String> = candidates.iter().map(|c| c.node.id.clone()).collect();
        let k = ids.len();

        let (counts, richness, open_count, last_open) = tokio::join!(
            self.edges.count_edges_by_node(&ids),
            self.stats.top_by_doc_ids(&ids, StatMetric::Richness, k),
            self.stats.top_by_doc_ids(&ids, StatMetric::OpenCount, k),
            self.stats.top_by_doc_ids(&ids, StatMetric::LastOpen, k),
        );

        let density = match counts {
            Ok(counts) => {
                let mut by_total: Vec<(&String, usize)> =
                    counts.iter().map(|(id, c)| (id, c.total)).collect();
                by_total.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
                rank_map(by_total.into_iter().map(|(id, _)| id.clone()))
            }
            Err(e) => {
                warn!("Failed to load edge counts for cluster ranking: {}", e);
                HashMap::new()
            }
        };

        let mut by_recency: Vec<&GraphNode> = candidates.iter().map(|c| &c.node).collect();
        by_recency.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));

        let mut by_similarity: Vec<(&String, f64)> = candidates
            .iter()
            .filter(|c| c.via == Discovery::Semantic)
            .filter_map(|c| c.similarity.map(|s| (&c.node.id, s)))
            .collect();
        by_similarity.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(b.0)));

        Signals {
            density,
            recency: rank_map(by_recency.into_iter().map(|n| n.id.clone())),
            richness: stat_ranks(richness, "richness"),
            open_count: stat_ranks(open_count, "open count"),
            last_open: stat_ranks(last_open, "last open"),
            similarity: rank_map(by_similarity.into_iter().map(|(id, _)| id.clone())),
        }
    }
}

fn stat_ranks(result: notegraph_core::Result<Vec<String>>, what: &str) -> HashMap<String, usize> {
    match result {
        Ok(ids) => rank_map(ids),
        Err(e) => {
            warn!("Failed to load {} ranking: {}", what, e);
            HashMap::new()
        }
    }
}

fn fuse(
    signals: &Signals,
    candidate: &ClusterCandidate,
    weights: &ClusterWeights,
    k: f64,
    physical_bonus: f64,
) -> f64 {
    let id = &candidate.node.id;
    let term = |ranks: &HashMap<String, usize>, weight: f64| {
        ranks.get(id).map_or(0.0, |&rank| rrf_term(weight, k, rank))
    };

    let mut score = term(&signals.density, weights.density)
        + term(&signals.recency, weights.recency)
        + term(&signals.richness, weights.richness)
        + term(&signals.open_count, weights.open_count)
        + term(&signals.last_open, weights.last_open);
    match candidate.via {
        Discovery::Semantic => score += term(&signals.similarity, weights.similarity),
        Discovery::Physical => score += physical_bonus,
    }
    score
}
