//! Hop path between two notes over stored edges, direction ignored.
//!
//! Expands a frontier from the start node one hop at a time into a
//! [`Subgraph`] until the target appears, the hop bound is reached or the
//! time budget runs out, then extracts the fewest-hop path.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use notegraph_core::{QueryConfig, Result};
use notegraph_store::{GraphEdge, GraphNode, NodeType, Subgraph};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::engine::Repositories;

/// Edges fetched per expanded node.
const EDGES_PER_NODE: usize = 200;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathStep {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl From<&GraphNode> for PathStep {
    fn from(node: &GraphNode) -> Self {
        Self {
            id: node.id.clone(),
            label: node.label.clone(),
            node_type: node.node_type,
            path: node.path().map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathResult {
    pub found: bool,
    pub from: PathStep,
    pub to: PathStep,
    /// Endpoints included; empty when not found.
    pub steps: Vec<PathStep>,
    pub edges: Vec<GraphEdge>,
    pub hops: usize,
    /// Nodes pulled into the search subgraph.
    pub explored: usize,
    #[serde(rename = "isTimeOut")]
    pub is_timeout: bool,
}

pub struct PathFinder<'a> {
    repos: &'a Repositories,
    config: &'a QueryConfig,
}

impl<'a> PathFinder<'a> {
    pub fn new(repos: &'a Repositories, config: &'a QueryConfig) -> Self {
        Self { repos, config }
    }

    pub async fn find(&self, from: &GraphNode, to: &GraphNode, max_hops: usize) -> Result<PathResult> {
        let budget = Duration::from_millis(self.config.step_timeout_ms);
        let started = Instant::now();

        let mut graph = Subgraph::new();
        graph.add_node(&from.id);
        let mut visited: HashSet<String> = HashSet::from([from.id.clone()]);
        let mut frontier = vec![from.id.clone()];
        let mut is_timeout = false;

        'levels: for hop in 0..max_hops {
            if graph.contains(&to.id) || frontier.is_empty() {
                break;
            }
            let mut next = Vec::new();
            for id in &frontier {
                if started.elapsed() > budget {
                    is_timeout = true;
                    break 'levels;
                }
                for edge in self.repos.edges.get_all_edges_for_node(id, EDGES_PER_NODE).await? {
                    let other = if &edge.from_node_id == id {
                        edge.to_node_id.clone()
                    } else {
                        edge.from_node_id.clone()
                    };
                    graph.add_edge(&edge);
                    if visited.insert(other.clone()) {
                        next.push(other);
                    }
                }
            }
            debug!("Path search hop {}: frontier {} -> {}", hop + 1, frontier.len(), next.len());
            frontier = next;
        }

        let ids = graph.shortest_path(&from.id, &to.id);
        let explored = graph.stats().node_count;
        let (steps, edges) = match &ids {
            Some(ids) => {
                let nodes = self.repos.nodes.get_by_ids(ids).await?;
                let steps = ids
                    .iter()
                    .map(|id| match nodes.get(id) {
                        Some(node) => PathStep::from(node),
                        None => PathStep {
                            id: id.clone(),
                            label: id.clone(),
                            node_type: NodeType::Document,
                            path: None,
                        },
                    })
                    .collect();
                (steps, graph.edges_along(ids))
            }
            None => (Vec::new(), Vec::new()),
        };

        let result = PathResult {
            found: ids.is_some(),
            from: PathStep::from(from),
            to: PathStep::from(to),
            hops: ids.as_ref().map_or(0, |p| p.len().saturating_sub(1)),
            steps,
            edges,
            explored,
            is_timeout,
        };
        info!(
            "Path {} -> {}: found={}, hops={}, explored={}, timeout={}",
            from.id, to.id, result.found, result.hops, explored, is_timeout
        );
        Ok(result)
    }
}
