//! Key-Node RRF: globally influential documents without a full graph scan.
//!
//! The candidate pool is the union of the top out-degree and top in-degree
//! lists. Each candidate scores `rrf(min(out_rank, in_rank))`, plus a
//! semantic term when a query narrows the pool, plus a bonus for bridges.

use std::collections::{HashMap, HashSet};

use notegraph_core::{QueryConfig, Result};
use notegraph_store::{DegreeEntry, DegreeRanking, EdgeCounts, EdgeType, SearchScope};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::Repositories;
use crate::rrf::{rank_map, rrf_term};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Bridge,
    Hub,
    Authority,
    Balanced,
}

impl NodeRole {
    /// First match wins: bridge, hub, authority, balanced.
    pub fn classify(
        out_degree: usize,
        in_degree: usize,
        category_count: usize,
        hub_ratio: f64,
        min_degree: usize,
    ) -> Self {
        if category_count >= 2 {
            Self::Bridge
        } else if out_degree as f64 > hub_ratio * in_degree as f64 && out_degree > min_degree {
            Self::Hub
        } else if in_degree as f64 > hub_ratio * out_degree as f64 && in_degree > min_degree {
            Self::Authority
        } else {
            Self::Balanced
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyNode {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub role: NodeRole,
    pub score: f64,
    pub out_degree: usize,
    pub in_degree: usize,
    pub category_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegreeListEntry {
    pub id: String,
    pub label: String,
    pub degree: usize,
    pub role: NodeRole,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyNodeReport {
    /// Up to `2 × limit` candidates, best first.
    pub key_nodes: Vec<KeyNode>,
    /// Highest out-degree among `key_nodes`.
    pub sources: Vec<DegreeListEntry>,
    /// Highest in-degree among `key_nodes`.
    pub sinks: Vec<DegreeListEntry>,
    pub candidate_pool: usize,
}

pub struct KeyNodeFinder<'a> {
    repos: &'a Repositories,
    config: &'a QueryConfig,
}

impl<'a> KeyNodeFinder<'a> {
    pub fn new(repos: &'a Repositories, config: &'a QueryConfig) -> Self {
        Self { repos, config }
    }

    pub async fn find(&self, limit: usize, semantic_query: Option<&str>) -> Result<KeyNodeReport> {
        let ranking = self
            .repos
            .edges
            .get_top_node_ids_by_degree(self.config.key_node_pool, None)
            .await?;
        let mut pool: Vec<String> = Vec::new();
        for entry in ranking.top_out.iter().chain(ranking.top_in.iter()) {
            if !pool.contains(&entry.node_id) {
                pool.push(entry.node_id.clone());
            }
        }

        let semantic_ranks = match semantic_query.map(str::trim).filter(|q| !q.is_empty()) {
            Some(query) => match self
                .repos
                .search
                .vector_search(query, pool.len(), &SearchScope::Ids(pool.clone()))
                .await
            {
                Ok(hits) => {
                    let ranks = rank_map(hits.into_iter().map(|h| h.id));
                    pool.retain(|id| ranks.contains_key(id));
                    Some(ranks)
                }
                Err(e) => {
                    warn!("Semantic filter for key nodes failed: {}", e);
                    None
                }
            },
            None => None,
        };
        let candidate_pool = pool.len();
        if pool.is_empty() {
            return Ok(KeyNodeReport::default());
        }

        let counts = self
            .repos
            .edges
            .count_edges_by_node(&pool)
            .await
            .unwrap_or_else(|e| {
                warn!("Degree counts for key nodes unavailable: {}", e);
                HashMap::new()
            });
        let out_ranks = degree_ranks(&pool, &counts, |c| c.outgoing);
        let in_ranks = degree_ranks(&pool, &counts, |c| c.incoming);
        let categories = self.category_spans(&pool).await;

        let k = self.config.rrf_k;
        let mut scored: Vec<(String, f64, NodeRole)> = pool
            .iter()
            .map(|id| {
                let c = counts.get(id).copied().unwrap_or_default();
                let span = categories.get(id).map_or(0, HashSet::len);
                let role = NodeRole::classify(
                    c.outgoing,
                    c.incoming,
                    span,
                    self.config.hub_ratio,
                    self.config.min_directional_degree,
                );
                let best_rank = out_ranks[id].min(in_ranks[id]);
                let mut score = rrf_term(self.config.degree_weight, k, best_rank);
                if let Some(rank) = semantic_ranks.as_ref().and_then(|r| r.get(id)) {
                    score += rrf_term(self.config.semantic_weight, k, *rank);
                }
                if role == NodeRole::Bridge {
                    score += self.config.bridge_bonus;
                }
                (id.clone(), score, role)
            })
            .collect();
        scored.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        scored.truncate(limit.saturating_mul(2));

        let kept: Vec<String> = scored.iter().map(|(id, _, _)| id.clone()).collect();
        let nodes = self.repos.nodes.get_by_ids(&kept).await?;
        let key_nodes: Vec<KeyNode> = scored
            .into_iter()
            .map(|(id, score, role)| {
                let c = counts.get(&id).copied().unwrap_or_default();
                let node = nodes.get(&id);
                KeyNode {
                    label: node.map(|n| n.label.clone()).unwrap_or_else(|| id.clone()),
                    path: node.and_then(|n| n.path()).map(str::to_string),
                    category_count: categories.get(&id).map_or(0, HashSet::len),
                    out_degree: c.outgoing,
                    in_degree: c.incoming,
                    role,
                    score,
                    id,
                }
            })
            .collect();

        let exact = self
            .repos
            .edges
            .get_top_node_ids_by_degree(limit, Some(&kept))
            .await
            .unwrap_or_else(|e| {
                warn!("Source and sink lists unavailable: {}", e);
                DegreeRanking::default()
            });
        let by_id: HashMap<&str, &KeyNode> =
            key_nodes.iter().map(|n| (n.id.as_str(), n)).collect();
        let entries = |list: &[DegreeEntry]| -> Vec<DegreeListEntry> {
            list.iter()
                .filter_map(|e| {
                    let node = by_id.get(e.node_id.as_str())?;
                    Some(DegreeListEntry {
                        id: e.node_id.clone(),
                        label: node.label.clone(),
                        degree: e.degree,
                        role: node.role,
                    })
                })
                .collect()
        };
        let sources = entries(&exact.top_out);
        let sinks = entries(&exact.top_in);

        info!(
            "Key nodes: pool={}, kept={}, sources={}, sinks={}",
            candidate_pool,
            key_nodes.len(),
            sources.len(),
            sinks.len()
        );
        Ok(KeyNodeReport {
            key_nodes,
            sources,
            sinks,
            candidate_pool,
        })
    }

    /// Distinct categories each node touches: its own plus those of the
    /// documents it links to. Lookup failures yield no spans.
    async fn category_spans(&self, ids: &[String]) -> HashMap<String, HashSet<String>> {
        let edges = &self.repos.edges;
        let first = match edges
            .get_by_from_nodes_and_types(ids, &[EdgeType::Categorized, EdgeType::Link])
            .await
        {
            Ok(edges) => edges,
            Err(e) => {
                warn!("Failed to load category edges for key nodes: {}", e);
                return HashMap::new();
            }
        };

        let mut spans: HashMap<String, HashSet<String>> = HashMap::new();
        let mut linked: HashMap<String, Vec<String>> = HashMap::new();
        for edge in first {
            match edge.edge_type {
                EdgeType::Categorized => {
                    spans
                        .entry(edge.from_node_id)
                        .or_default()
                        .insert(edge.to_node_id);
                }
                _ => linked
                    .entry(edge.from_node_id)
                    .or_default()
                    .push(edge.to_node_id),
            }
        }

        let mut neighbors: Vec<String> = linked.values().flatten().cloned().collect();
        neighbors.sort();
        neighbors.dedup();
        if neighbors.is_empty() {
            return spans;
        }
        let second = match edges
            .get_by_from_nodes_and_types(&neighbors, &[EdgeType::Categorized])
            .await
        {
            Ok(edges) => edges,
            Err(e) => {
                warn!("Failed to load neighbor categories for key nodes: {}", e);
                return spans;
            }
        };
        let mut neighbor_categories: HashMap<String, Vec<String>> = HashMap::new();
        for edge in second {
            neighbor_categories
                .entry(edge.from_node_id)
                .or_default()
                .push(edge.to_node_id);
        }
        for (id, targets) in linked {
            let span = spans.entry(id).or_default();
            for target in targets {
                if let Some(cats) = neighbor_categories.get(&target) {
                    span.extend(cats.iter().cloned());
                }
            }
        }
        spans
    }
}

/// Rank of every pool id by one degree direction, highest first, ties by id.
fn degree_ranks(
    pool: &[String],
    counts: &HashMap<String, EdgeCounts>,
    degree: impl Fn(&EdgeCounts) -> usize,
) -> HashMap<String, usize> {
    let mut ordered: Vec<(&String, usize)> = pool
        .iter()
        .map(|id| (id, counts.get(id).map_or(0, &degree)))
        .collect();
    ordered.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    rank_map(ordered.into_iter().map(|(id, _)| id.clone()))
}
