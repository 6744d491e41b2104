//! Hybrid breadth-first traversal over stored edges and semantic neighbors.
//!
//! A node is marked visited the first time it is seen, so its depth is the
//! order of discovery over a queue that mixes physical and semantic
//! expansion. That is not a shortest distance over a unified metric and is
//! kept that way on purpose.
//!
//! The wall-clock budget is checked once per dequeue. When it runs out the
//! traversal stops and returns what it has with `is_timeout` set.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use notegraph_core::{QueryConfig, Result};
use notegraph_store::{EdgeType, GraphEdge, GraphNode, NodeType};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::engine::Repositories;
use crate::rrf::{ClusterCandidate, ClusterRanker, Discovery};
use crate::semantic::{semantic_neighbors, similarity_label};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TraverseParams {
    pub hops: usize,
    /// Per-node edge cap, semantic budget at depth 0, and documents kept
    /// per depth.
    pub limit: usize,
    pub include_semantic: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversedNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub depth: usize,
    pub via: Discovery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepthLevel {
    pub depth: usize,
    pub documents: Vec<TraversedNode>,
    /// Documents dropped by Cluster RRF at this depth.
    pub omitted: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tags: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub categories: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalResult {
    pub start_id: String,
    pub levels: Vec<DepthLevel>,
    /// Start node plus every document kept at any depth.
    pub nodes: Vec<TraversedNode>,
    /// Edges whose endpoints are both in `nodes`.
    pub edges: Vec<GraphEdge>,
    #[serde(rename = "isTimeOut")]
    pub is_timeout: bool,
}

struct Visit {
    node: GraphNode,
    depth: usize,
    via: Discovery,
    similarity: Option<f64>,
}

pub struct Traversal<'a> {
    repos: &'a Repositories,
    config: &'a QueryConfig,
}

impl<'a> Traversal<'a> {
    pub fn new(repos: &'a Repositories, config: &'a QueryConfig) -> Self {
        Self { repos, config }
    }

    pub async fn run(&self, start: GraphNode, params: TraverseParams) -> Result<TraversalResult> {
        let budget = Duration::from_millis(self.config.step_timeout_ms);
        let started = Instant::now();
        let start_id = start.id.clone();

        let mut visited: HashSet<String> = HashSet::from([start.id.clone()]);
        let mut queue = VecDeque::from([Visit {
            node: start,
            depth: 0,
            via: Discovery::Physical,
            similarity: None,
        }]);
        let mut collected: Vec<Visit> = Vec::new();
        let mut edges: Vec<GraphEdge> = Vec::new();
        let mut is_timeout = false;

        while let Some(visit) = queue.pop_front() {
            if started.elapsed() > budget {
                warn!(
                    "Traversal from {} hit the {}ms budget with {} nodes queued",
                    start_id,
                    self.config.step_timeout_ms,
                    queue.len() + 1
                );
                is_timeout = true;
                break;
            }
            if visit.depth > params.hops {
                continue;
            }
            let depth = visit.depth;
            let expand = depth < params.hops;
            let cur = visit.node.clone();
            collected.push(visit);
            if !expand {
                continue;
            }

            let physical = self
                .repos
                .edges
                .get_all_edges_for_node(&cur.id, params.limit)
                .await?;
            let mut outgoing = Vec::new();
            let mut incoming = Vec::new();
            for edge in &physical {
                if edge.from_node_id == cur.id {
                    outgoing.push(edge.to_node_id.clone());
                } else {
                    incoming.push(edge.from_node_id.clone());
                }
            }
            edges.extend(physical);

            let mut neighbor_ids: Vec<String> = Vec::new();
            for id in outgoing.into_iter().chain(incoming) {
                if id != cur.id && !neighbor_ids.contains(&id) {
                    neighbor_ids.push(id);
                }
            }

            let semantic = if params.include_semantic && cur.is_document() {
                let budget = self.config.semantic_budget(depth, params.limit);
                let exclude: HashSet<String> = neighbor_ids.iter().cloned().collect();
                match semantic_neighbors(self.repos.embeddings.as_ref(), &cur.id, budget, &exclude)
                    .await
                {
                    Ok(found) => found,
                    Err(e) => {
                        warn!("Semantic neighbors for {} unavailable: {}", cur.id, e);
                        Vec::new()
                    }
                }
            } else {
                Vec::new()
            };

            let fresh: Vec<String> = neighbor_ids
                .iter()
                .chain(semantic.iter().map(|n| &n.doc_id))
                .filter(|id| !visited.contains(*id))
                .cloned()
                .collect();
            let mut fetched = self.repos.nodes.get_by_ids(&fresh).await?;

            for id in &neighbor_ids {
                if visited.contains(id) {
                    continue;
                }
                if let Some(node) = fetched.remove(id) {
                    visited.insert(id.clone());
                    queue.push_back(Visit {
                        node,
                        depth: depth + 1,
                        via: Discovery::Physical,
                        similarity: None,
                    });
                }
            }
            for neighbor in semantic {
                if visited.contains(&neighbor.doc_id) {
                    continue;
                }
                if let Some(node) = fetched.remove(&neighbor.doc_id) {
                    visited.insert(neighbor.doc_id.clone());
                    edges.push(GraphEdge {
                        from_node_id: cur.id.clone(),
                        to_node_id: neighbor.doc_id.clone(),
                        edge_type: EdgeType::Semantic,
                        weight: neighbor.similarity,
                    });
                    queue.push_back(Visit {
                        node,
                        depth: depth + 1,
                        via: Discovery::Semantic,
                        similarity: Some(neighbor.similarity),
                    });
                }
            }
            debug!("Expanded {} at depth {}; queue={}", cur.id, depth, queue.len());
        }

        let result = self.assemble(start_id, collected, edges, params.limit, is_timeout).await;
        info!(
            "Traversal from {}: {} nodes, {} edges, {} levels, timeout={} in {:?}",
            result.start_id,
            result.nodes.len(),
            result.edges.len(),
            result.levels.len(),
            result.is_timeout,
            started.elapsed()
        );
        Ok(result)
    }

    /// Group by depth, shrink each depth's documents with Cluster RRF and
    /// summarize tags and categories.
    async fn assemble(
        &self,
        start_id: String,
        collected: Vec<Visit>,
        edges: Vec<GraphEdge>,
        limit: usize,
        is_timeout: bool,
    ) -> TraversalResult {
        let mut by_depth: BTreeMap<usize, Vec<Visit>> = BTreeMap::new();
        for visit in collected {
            by_depth.entry(visit.depth).or_default().push(visit);
        }

        let ranker = ClusterRanker::new(
            self.repos.edges.as_ref(),
            self.repos.stats.as_ref(),
            self.config,
        );
        let mut levels = Vec::with_capacity(by_depth.len());
        let mut nodes = Vec::new();
        for (depth, visits) in by_depth {
            let mut level = DepthLevel {
                depth,
                ..Default::default()
            };
            let mut tags = Vec::new();
            let mut categories = Vec::new();
            let mut documents = Vec::new();
            for visit in visits {
                match visit.node.node_type {
                    NodeType::Tag => tags.push(visit.node.label),
                    NodeType::Category => categories.push(visit.node.label),
                    NodeType::Document => documents.push(visit),
                }
            }
            level.tags = (!tags.is_empty()).then(|| tags.join(", "));
            level.categories = (!categories.is_empty()).then(|| categories.join(", "));

            if depth == 0 {
                level.documents = documents
                    .into_iter()
                    .map(|v| traversed(v.node, 0, v.via, v.similarity, None))
                    .collect();
            } else {
                let candidates = documents
                    .into_iter()
                    .map(|v| ClusterCandidate {
                        node: v.node,
                        via: v.via,
                        similarity: v.similarity,
                    })
                    .collect();
                let outcome = ranker.shrink(candidates, limit).await;
                level.omitted = outcome.omitted;
                level.documents = outcome
                    .kept
                    .into_iter()
                    .map(|s| {
                        let c = s.candidate;
                        traversed(c.node, depth, c.via, c.similarity, Some(s.score))
                    })
                    .collect();
            }
            nodes.extend(level.documents.iter().cloned());
            levels.push(level);
        }

        // Tag and category start nodes are not documents but still belong.
        if !nodes.iter().any(|n| n.id == start_id) {
            if let Some(level) = levels.first() {
                if level.depth == 0 && level.documents.is_empty() {
                    if let Ok(Some(start)) = self.repos.nodes.get_by_id(&start_id).await {
                        nodes.insert(0, traversed(start, 0, Discovery::Physical, None, None));
                    }
                }
            }
        }

        let kept: HashSet<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        let mut seen = HashSet::new();
        let edges = edges
            .into_iter()
            .filter(|e| {
                kept.contains(e.from_node_id.as_str()) && kept.contains(e.to_node_id.as_str())
            })
            .filter(|e| {
                seen.insert((
                    e.from_node_id.clone(),
                    e.to_node_id.clone(),
                    e.edge_type.as_str().to_string(),
                ))
            })
            .collect();

        TraversalResult {
            start_id,
            levels,
            nodes,
            edges,
            is_timeout,
        }
    }
}

fn traversed(
    node: GraphNode,
    depth: usize,
    via: Discovery,
    similarity: Option<f64>,
    score: Option<f64>,
) -> TraversedNode {
    TraversedNode {
        path: node.path().map(str::to_string),
        id: node.id,
        label: node.label,
        node_type: node.node_type,
        depth,
        via,
        similarity: similarity.map(similarity_label),
        score,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array1;
    use notegraph_store::SqliteGraphStore;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn doc(id: &str) -> GraphNode {
        GraphNode {
            id: id.into(),
            node_type: NodeType::Document,
            label: id.to_uppercase(),
            attributes: serde_json::json!({ "path": format!("{}.md", id) }),
            created_at: 0,
            updated_at: 0,
        }
    }

    fn tag(id: &str, label: &str) -> GraphNode {
        GraphNode {
            id: id.into(),
            node_type: NodeType::Tag,
            label: label.into(),
            attributes: serde_json::Value::Null,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn edge(from: &str, to: &str, edge_type: EdgeType) -> GraphEdge {
        GraphEdge {
            from_node_id: from.into(),
            to_node_id: to.into(),
            edge_type,
            weight: 1.0,
        }
    }

    fn open() -> (Arc<SqliteGraphStore>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteGraphStore::open(dir.path(), 4).unwrap();
        (Arc::new(store), dir)
    }

    fn params(hops: usize, limit: usize, include_semantic: bool) -> TraverseParams {
        TraverseParams {
            hops,
            limit,
            include_semantic,
        }
    }

    fn ids(result: &TraversalResult) -> Vec<&str> {
        result.nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[tokio::test]
    async fn test_one_hop_stops_at_neighbors() {
        let (store, _dir) = open();
        for id in ["a", "b", "c"] {
            store.upsert_node(&doc(id)).unwrap();
        }
        store.add_edge(&edge("a", "b", EdgeType::Link)).unwrap();
        store.add_edge(&edge("b", "c", EdgeType::Link)).unwrap();

        let repos = Repositories::from_store(store);
        let config = QueryConfig::default();
        let result = Traversal::new(&repos, &config)
            .run(doc("a"), params(1, 10, false))
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["a", "b"]);
        assert!(!result.is_timeout);
        assert_eq!(result.edges.len(), 1);
        assert!(result.nodes.iter().all(|n| n.depth <= 1));
    }

    #[tokio::test]
    async fn test_depth_bound_and_incoming_edges() {
        let (store, _dir) = open();
        for id in ["a", "b", "c", "d"] {
            store.upsert_node(&doc(id)).unwrap();
        }
        store.add_edge(&edge("b", "a", EdgeType::Link)).unwrap();
        store.add_edge(&edge("b", "c", EdgeType::Link)).unwrap();
        store.add_edge(&edge("c", "d", EdgeType::Link)).unwrap();

        let repos = Repositories::from_store(store);
        let config = QueryConfig::default();
        let result = Traversal::new(&repos, &config)
            .run(doc("a"), params(2, 10, false))
            .await
            .unwrap();

        assert_eq!(ids(&result), vec!["a", "b", "c"]);
        let c = result.nodes.iter().find(|n| n.id == "c").unwrap();
        assert_eq!(c.depth, 2);
        assert_eq!(result.levels.len(), 3);
    }

    #[tokio::test]
    async fn test_cluster_limit_and_tag_summary() {
        let (store, _dir) = open();
        store.upsert_node(&doc("a")).unwrap();
        for id in ["n1", "n2", "n3"] {
            store.upsert_node(&doc(id)).unwrap();
            store.add_edge(&edge("a", id, EdgeType::Link)).unwrap();
        }
        store.upsert_node(&tag("t-rust", "rust")).unwrap();
        store.add_edge(&edge("a", "t-rust", EdgeType::Tagged)).unwrap();

        let repos = Repositories::from_store(store);
        let config = QueryConfig::default();
        let result = Traversal::new(&repos, &config)
            .run(doc("a"), params(1, 2, false))
            .await
            .unwrap();

        // Edge cap of 2 per node: the traversal sees at most two neighbors.
        let level = &result.levels[1];
        assert!(level.documents.len() + level.omitted <= 2);
        assert!(result.nodes.iter().all(|n| n.node_type == NodeType::Document));

        let result = Traversal::new(&repos, &config)
            .run(doc("a"), params(1, 10, false))
            .await
            .unwrap();
        let level = &result.levels[1];
        assert_eq!(level.tags.as_deref(), Some("rust"));
        assert_eq!(level.documents.len(), 3);
    }

    #[tokio::test]
    async fn test_semantic_neighbors_are_discovered() {
        let (store, _dir) = open();
        for id in ["a", "b", "s"] {
            store.upsert_node(&doc(id)).unwrap();
        }
        store.add_edge(&edge("a", "b", EdgeType::Link)).unwrap();
        let put = |chunk: &str, id: &str, v: [f32; 4]| {
            store
                .add_chunk_embedding(chunk, id, &Array1::from(v.to_vec()))
                .unwrap();
        };
        put("a#0", "a", [1.0, 0.0, 0.0, 0.0]);
        put("b#0", "b", [0.9, 0.1, 0.0, 0.0]);
        put("s#0", "s", [1.0, 0.2, 0.0, 0.0]);

        let repos = Repositories::from_store(store);
        let config = QueryConfig::default();
        let result = Traversal::new(&repos, &config)
            .run(doc("a"), params(1, 10, true))
            .await
            .unwrap();

        let s = result.nodes.iter().find(|n| n.id == "s").unwrap();
        assert_eq!(s.via, Discovery::Semantic);
        assert!(s.similarity.as_deref().is_some_and(|l| l.ends_with('%')));
        let b = result.nodes.iter().find(|n| n.id == "b").unwrap();
        assert_eq!(b.via, Discovery::Physical);
        assert!(result
            .edges
            .iter()
            .any(|e| e.edge_type == EdgeType::Semantic && e.to_node_id == "s"));
    }

    #[tokio::test]
    async fn test_zero_budget_times_out() {
        let (store, _dir) = open();
        store.upsert_node(&doc("a")).unwrap();
        let repos = Repositories::from_store(store);
        let config = QueryConfig {
            step_timeout_ms: 0,
            ..Default::default()
        };
        let result = Traversal::new(&repos, &config)
            .run(doc("a"), params(2, 10, false))
            .await
            .unwrap();
        // Elapsed time is almost always nonzero by the first check; when it
        // is not, the single node is still returned.
        assert!(result.is_timeout || result.nodes.len() == 1);
    }
}
