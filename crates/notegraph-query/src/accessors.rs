//! [`ItemFieldAccessor`] adapters for each item kind the engine filters.

use std::collections::HashMap;

use notegraph_core::Result;
use notegraph_store::{
    DocStatistics, EdgeCounts, EdgeRepository, EdgeType, GraphNode, NodeRepository, NodeType,
    SearchResultItem,
};

use crate::filter::ItemFieldAccessor;

/// Tags, category, timestamps and link counts for a batch of items.
#[derive(Debug, Clone, Default)]
pub struct ItemContext {
    pub tags: HashMap<String, Vec<String>>,
    pub categories: HashMap<String, String>,
    pub counts: HashMap<String, EdgeCounts>,
    pub created: HashMap<String, i64>,
}

impl ItemContext {
    /// Load everything the pipeline may ask about `ids` in three batched
    /// lookups.
    pub async fn load(
        nodes: &dyn NodeRepository,
        edges: &dyn EdgeRepository,
        ids: &[String],
    ) -> Result<Self> {
        if ids.is_empty() {
            return Ok(Self::default());
        }
        let (dimension_edges, counts) = tokio::join!(
            edges.get_by_from_nodes_and_types(ids, &[EdgeType::Tagged, EdgeType::Categorized]),
            edges.count_edges_by_node(ids),
        );
        let dimension_edges = dimension_edges?;
        let counts = counts?;

        let mut lookup: Vec<String> = ids.to_vec();
        for edge in &dimension_edges {
            if !lookup.contains(&edge.to_node_id) {
                lookup.push(edge.to_node_id.clone());
            }
        }
        let resolved = nodes.get_by_ids(&lookup).await?;

        let mut ctx = Self {
            counts,
            ..Default::default()
        };
        for id in ids {
            if let Some(node) = resolved.get(id) {
                ctx.created.insert(id.clone(), node.created_at);
            }
        }
        for edge in dimension_edges {
            let Some(target) = resolved.get(&edge.to_node_id) else {
                continue;
            };
            match (target.node_type, &edge.edge_type) {
                (NodeType::Tag, EdgeType::Tagged) => {
                    ctx.tags
                        .entry(edge.from_node_id)
                        .or_default()
                        .push(target.label.clone());
                }
                (NodeType::Category, EdgeType::Categorized) => {
                    // First category wins; documents normally carry one.
                    ctx.categories
                        .entry(edge.from_node_id)
                        .or_insert_with(|| target.label.clone());
                }
                _ => {}
            }
        }
        Ok(ctx)
    }

    fn tags_of(&self, id: &str) -> Vec<String> {
        self.tags.get(id).cloned().unwrap_or_default()
    }

    fn count(&self, id: &str) -> EdgeCounts {
        self.counts.get(id).copied().unwrap_or_default()
    }
}

fn input_ranks<'a>(ids: impl Iterator<Item = &'a str>) -> HashMap<String, usize> {
    let mut ranks = HashMap::new();
    for (rank, id) in ids.enumerate() {
        ranks.entry(id.to_string()).or_insert(rank);
    }
    ranks
}

/// Graph nodes; result rank is the order the producing query returned them.
pub struct NodeAccessor<'a> {
    ctx: &'a ItemContext,
    ranks: HashMap<String, usize>,
}

impl<'a> NodeAccessor<'a> {
    pub fn new(ctx: &'a ItemContext, nodes: &[GraphNode]) -> Self {
        Self {
            ctx,
            ranks: input_ranks(nodes.iter().map(|n| n.id.as_str())),
        }
    }
}

impl ItemFieldAccessor<GraphNode> for NodeAccessor<'_> {
    fn path(&self, item: &GraphNode) -> Option<String> {
        item.path().map(str::to_string)
    }
    fn modified(&self, item: &GraphNode) -> Option<i64> {
        Some(item.updated_at)
    }
    fn created(&self, item: &GraphNode) -> Option<i64> {
        Some(item.created_at)
    }
    fn tags(&self, item: &GraphNode) -> Vec<String> {
        self.ctx.tags_of(&item.id)
    }
    fn category(&self, item: &GraphNode) -> Option<String> {
        self.ctx.categories.get(&item.id).cloned()
    }
    fn result_rank(&self, item: &GraphNode) -> Option<usize> {
        self.ranks.get(&item.id).copied()
    }
    fn total_links(&self, item: &GraphNode) -> Option<usize> {
        Some(self.ctx.count(&item.id).total)
    }
    fn incoming_links(&self, item: &GraphNode) -> Option<usize> {
        Some(self.ctx.count(&item.id).incoming)
    }
    fn outgoing_links(&self, item: &GraphNode) -> Option<usize> {
        Some(self.ctx.count(&item.id).outgoing)
    }
}

/// Search hits; result rank is the position by `final_score`, best first.
pub struct SearchResultAccessor<'a> {
    ctx: &'a ItemContext,
    ranks: HashMap<String, usize>,
}

impl<'a> SearchResultAccessor<'a> {
    pub fn new(ctx: &'a ItemContext, hits: &[SearchResultItem]) -> Self {
        let mut ordered: Vec<&SearchResultItem> = hits.iter().collect();
        ordered.sort_by(|a, b| b.final_score.total_cmp(&a.final_score));
        Self {
            ctx,
            ranks: input_ranks(ordered.into_iter().map(|h| h.id.as_str())),
        }
    }
}

impl ItemFieldAccessor<SearchResultItem> for SearchResultAccessor<'_> {
    fn path(&self, item: &SearchResultItem) -> Option<String> {
        (!item.path.is_empty()).then(|| item.path.clone())
    }
    fn modified(&self, item: &SearchResultItem) -> Option<i64> {
        Some(item.last_modified)
    }
    fn created(&self, item: &SearchResultItem) -> Option<i64> {
        self.ctx.created.get(&item.id).copied()
    }
    fn tags(&self, item: &SearchResultItem) -> Vec<String> {
        self.ctx.tags_of(&item.id)
    }
    fn category(&self, item: &SearchResultItem) -> Option<String> {
        self.ctx.categories.get(&item.id).cloned()
    }
    fn result_rank(&self, item: &SearchResultItem) -> Option<usize> {
        self.ranks.get(&item.id).copied()
    }
    fn total_links(&self, item: &SearchResultItem) -> Option<usize> {
        Some(self.ctx.count(&item.id).total)
    }
    fn incoming_links(&self, item: &SearchResultItem) -> Option<usize> {
        Some(self.ctx.count(&item.id).incoming)
    }
    fn outgoing_links(&self, item: &SearchResultItem) -> Option<usize> {
        Some(self.ctx.count(&item.id).outgoing)
    }
}

/// A hard-orphan document awaiting a revival suggestion.
#[derive(Debug, Clone)]
pub struct OrphanCandidate {
    pub node: GraphNode,
    pub stats: Option<DocStatistics>,
}

/// Orphans have no edges, so no tags, no category and zero link counts.
/// Result rank orders by richness, richest first.
pub struct OrphanAccessor {
    ranks: HashMap<String, usize>,
}

impl OrphanAccessor {
    pub fn new(candidates: &[OrphanCandidate]) -> Self {
        let mut ordered: Vec<&OrphanCandidate> = candidates.iter().collect();
        ordered.sort_by(|a, b| {
            let ra = a.stats.as_ref().map_or(0.0, |s| s.richness_score);
            let rb = b.stats.as_ref().map_or(0.0, |s| s.richness_score);
            rb.total_cmp(&ra)
        });
        Self {
            ranks: input_ranks(ordered.into_iter().map(|c| c.node.id.as_str())),
        }
    }
}

impl ItemFieldAccessor<OrphanCandidate> for OrphanAccessor {
    fn path(&self, item: &OrphanCandidate) -> Option<String> {
        item.node.path().map(str::to_string)
    }
    fn modified(&self, item: &OrphanCandidate) -> Option<i64> {
        Some(item.node.updated_at)
    }
    fn created(&self, item: &OrphanCandidate) -> Option<i64> {
        Some(item.node.created_at)
    }
    fn tags(&self, _item: &OrphanCandidate) -> Vec<String> {
        Vec::new()
    }
    fn category(&self, _item: &OrphanCandidate) -> Option<String> {
        None
    }
    fn result_rank(&self, item: &OrphanCandidate) -> Option<usize> {
        self.ranks.get(&item.node.id).copied()
    }
    fn total_links(&self, _item: &OrphanCandidate) -> Option<usize> {
        Some(0)
    }
    fn incoming_links(&self, _item: &OrphanCandidate) -> Option<usize> {
        Some(0)
    }
    fn outgoing_links(&self, _item: &OrphanCandidate) -> Option<usize> {
        Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::QueryCache;
    use crate::filter::{apply, ItemFilter};
    use notegraph_store::{GraphEdge, SqliteGraphStore};
    use tempfile::TempDir;

    fn node(id: &str, node_type: NodeType, label: &str, path: Option<&str>) -> GraphNode {
        GraphNode {
            id: id.into(),
            node_type,
            label: label.into(),
            attributes: match path {
                Some(p) => serde_json::json!({ "path": p }),
                None => serde_json::Value::Null,
            },
            created_at: 100,
            updated_at: 200,
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

    fn seeded() -> (SqliteGraphStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteGraphStore::open(dir.path(), 4).unwrap();
        store.upsert_node(&node("a", NodeType::Document, "A", Some("a.md"))).unwrap();
        store.upsert_node(&node("b", NodeType::Document, "B", Some("b.md"))).unwrap();
        store.upsert_node(&node("t-rust", NodeType::Tag, "rust", None)).unwrap();
        store.upsert_node(&node("c-dev", NodeType::Category, "dev", None)).unwrap();
        store.add_edge(&edge("a", "t-rust", EdgeType::Tagged)).unwrap();
        store.add_edge(&edge("a", "c-dev", EdgeType::Categorized)).unwrap();
        store.add_edge(&edge("b", "a", EdgeType::Link)).unwrap();
        (store, dir)
    }

    #[tokio::test]
    async fn test_item_context_load() {
        let (store, _dir) = seeded();
        let ids = vec!["a".to_string(), "b".to_string()];
        let ctx = ItemContext::load(&store, &store, &ids).await.unwrap();

        assert_eq!(ctx.tags_of("a"), vec!["rust"]);
        assert!(ctx.tags_of("b").is_empty());
        assert_eq!(ctx.categories.get("a").map(String::as_str), Some("dev"));
        assert_eq!(ctx.count("a").incoming, 1);
        assert_eq!(ctx.count("a").outgoing, 2);
        assert_eq!(ctx.count("b").outgoing, 1);
        assert_eq!(ctx.created.get("b"), Some(&100));
    }

    #[tokio::test]
    async fn test_node_accessor_drives_pipeline() {
        let (store, _dir) = seeded();
        let nodes = vec![
            node("b", NodeType::Document, "B", Some("b.md")),
            node("a", NodeType::Document, "A", Some("a.md")),
        ];
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let ctx = ItemContext::load(&store, &store, &ids).await.unwrap();
        let accessor = NodeAccessor::new(&ctx, &nodes);
        assert_eq!(accessor.result_rank(&nodes[0]), Some(0));

        let filter = ItemFilter {
            tag_category_boolean_expression: Some("tag:rust AND category:dev".into()),
            ..Default::default()
        };
        let out = apply(nodes.clone(), &accessor, &filter, &QueryCache::new(4), 0).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, "a");

        let filter = ItemFilter {
            sort: Some("total_links_count_desc".into()),
            ..Default::default()
        };
        let out = apply(nodes, &accessor, &filter, &QueryCache::new(4), 0).unwrap();
        assert_eq!(out[0].id, "a");
    }

    #[test]
    fn test_search_result_rank_follows_final_score() {
        let hit = |id: &str, final_score: f64| SearchResultItem {
            path: format!("{}.md", id),
            id: id.into(),
            score: final_score,
            final_score,
            last_modified: 0,
            item_type: "document".into(),
            highlight: None,
        };
        let hits = vec![hit("low", 0.1), hit("high", 0.9), hit("mid", 0.5)];
        let ctx = ItemContext::default();
        let accessor = SearchResultAccessor::new(&ctx, &hits);
        assert_eq!(accessor.result_rank(&hits[1]), Some(0));
        assert_eq!(accessor.result_rank(&hits[2]), Some(1));
        assert_eq!(accessor.result_rank(&hits[0]), Some(2));
        assert_eq!(accessor.total_links(&hits[0]), Some(0));
    }

    #[test]
    fn test_orphan_accessor_ranks_by_richness() {
        let candidate = |id: &str, richness: Option<f64>| OrphanCandidate {
            node: node(id, NodeType::Document, id, Some("x.md")),
            stats: richness.map(|r| DocStatistics {
                doc_id: id.into(),
                richness_score: r,
                ..Default::default()
            }),
        };
        let items = vec![candidate("bare", None), candidate("rich", Some(0.8))];
        let accessor = OrphanAccessor::new(&items);
        assert_eq!(accessor.result_rank(&items[1]), Some(0));
        assert_eq!(accessor.result_rank(&items[0]), Some(1));
        assert!(accessor.tags(&items[1]).is_empty());
    }
}
