//! In-memory subgraph built from fetched edges, backed by petgraph.
//!
//! Used for path extraction once a bounded neighborhood has been pulled from
//! the edge repository. Direction is ignored: a link is walkable both ways.

use petgraph::algo::astar;
use petgraph::graph::{NodeIndex, UnGraph};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::GraphEdge;

pub struct Subgraph {
    graph: UnGraph<String, GraphEdge>,
    node_index: HashMap<String, NodeIndex>,
}

impl Subgraph {
    pub fn new() -> Self {
        Self {
            graph: UnGraph::new_undirected(),
            node_index: HashMap::new(),
        }
    }

    /// Insert a node id if absent and return its index.
    pub fn add_node(&mut self, id: &str) -> NodeIndex {
        if let Some(&idx) = self.node_index.get(id) {
            return idx;
        }
        let idx = self.graph.add_node(id.to_string());
        self.node_index.insert(id.to_string(), idx);
        idx
    }

    pub fn add_edge(&mut self, edge: &GraphEdge) {
        let a = self.add_node(&edge.from_node_id);
        let b = self.add_node(&edge.to_node_id);
        if self.graph.find_edge(a, b).is_none() {
            self.graph.add_edge(a, b, edge.clone());
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.node_index.contains_key(id)
    }

    /// Fewest-hop path from `from` to `to` as node ids, endpoints included.
    pub fn shortest_path(&self, from: &str, to: &str) -> Option<Vec<String>> {
        let start = *self.node_index.get(from)?;
        let goal = *self.node_index.get(to)?;
        let (_, path) = astar(&self.graph, start, |n| n == goal, |_| 1usize, |_| 0)?;
        Some(path.into_iter().map(|idx| self.graph[idx].clone()).collect())
    }

    /// Stored edges joining consecutive ids of `path`.
    pub fn edges_along(&self, path: &[String]) -> Vec<GraphEdge> {
        path.windows(2)
            .filter_map(|pair| {
                let a = *self.node_index.get(&pair[0])?;
                let b = *self.node_index.get(&pair[1])?;
                let e = self.graph.find_edge(a, b)?;
                Some(self.graph[e].clone())
            })
            .collect()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            node_count: self.graph.node_count(),
            edge_count: self.graph.edge_count(),
        }
    }
}

impl Default for Subgraph {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphStats {
    pub node_count: usize,
    pub edge_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EdgeType;

    fn link(from: &str, to: &str) -> GraphEdge {
        GraphEdge {
            from_node_id: from.into(),
            to_node_id: to.into(),
            edge_type: EdgeType::Link,
            weight: 1.0,
        }
    }

    #[test]
    fn test_shortest_path_ignores_direction() {
        let mut g = Subgraph::new();
        g.add_edge(&link("a", "b"));
        g.add_edge(&link("c", "b"));
        g.add_edge(&link("c", "d"));

        let path = g.shortest_path("a", "d").unwrap();
        assert_eq!(path, vec!["a", "b", "c", "d"]);
        assert_eq!(g.edges_along(&path).len(), 3);
    }

    #[test]
    fn test_prefers_fewest_hops() {
        let mut g = Subgraph::new();
        g.add_edge(&link("a", "b"));
        g.add_edge(&link("b", "c"));
        g.add_edge(&link("c", "d"));
        g.add_edge(&link("a", "d"));
        assert_eq!(g.shortest_path("a", "d").unwrap(), vec!["a", "d"]);
    }

    #[test]
    fn test_disconnected_has_no_path() {
        let mut g = Subgraph::new();
        g.add_edge(&link("a", "b"));
        g.add_node("z");
        assert!(g.shortest_path("a", "z").is_none());
        assert!(g.shortest_path("a", "missing").is_none());
    }

    #[test]
    fn test_duplicate_edges_collapse() {
        let mut g = Subgraph::new();
        g.add_edge(&link("a", "b"));
        g.add_edge(&link("b", "a"));
        let stats = g.stats();
        assert_eq!(stats.node_count, 2);
        assert_eq!(stats.edge_count, 1);
    }
}
