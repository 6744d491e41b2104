//! Query requests, responses and the views list modes return.

use notegraph_store::{DocStatistics, EdgeCounts, GraphNode, SearchResultItem};
use serde::{Deserialize, Serialize};

use crate::accessors::ItemContext;
use crate::filter::ItemFilter;
use crate::key_nodes::KeyNodeReport;
use crate::orphan::OrphanListing;
use crate::path::PathResult;
use crate::rrf::{ClusterOutcome, Discovery};
use crate::semantic::similarity_label;
use crate::traverse::TraversalResult;

fn default_hops() -> usize {
    1
}

/// One query. `note`, `from` and `to` take a node id or a document path.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum QueryRequest {
    Inspect {
        note: String,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        include_semantic: bool,
    },
    Traverse {
        note: String,
        #[serde(default = "default_hops")]
        hops: usize,
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        include_semantic: bool,
    },
    Path {
        from: String,
        to: String,
        #[serde(default)]
        max_hops: Option<usize>,
    },
    KeyNodes {
        #[serde(default)]
        limit: Option<usize>,
        #[serde(default)]
        semantic_query: Option<String>,
    },
    Orphans {
        #[serde(default)]
        filter: ItemFilter,
    },
    /// Without an expression, lists the most used tags.
    Dimensional {
        #[serde(default)]
        expression: Option<String>,
        #[serde(default)]
        filter: ItemFilter,
    },
    Folder {
        path: String,
        #[serde(default)]
        filter: ItemFilter,
    },
    Recent {
        #[serde(default)]
        filter: ItemFilter,
    },
    Search {
        query: String,
        #[serde(default)]
        semantic: bool,
        #[serde(default)]
        filter: ItemFilter,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryResponse {
    Note(NoteReport),
    Traversal(TraversalResult),
    Path(PathResult),
    KeyNodes(KeyNodeReport),
    Orphans(OrphanListing),
    Items(ItemList),
    TopTags { tags: Vec<TagUsage> },
    /// A start or end note does not exist. Not an error for callers.
    NotFound { message: String },
}

impl QueryResponse {
    pub fn not_found(note: &str) -> Self {
        Self::NotFound {
            message: format!("Note \"{}\" was not found in the graph", note),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagUsage {
    pub id: String,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemList {
    pub items: Vec<ItemView>,
    /// Candidates before filtering and limiting.
    pub total: usize,
    /// The candidate source hit its cap, so older matches may be missing.
    #[serde(default)]
    pub truncated: bool,
}

/// A list-mode row, whichever kind of item produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemView {
    pub id: String,
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(rename = "type")]
    pub item_type: String,
    pub modified: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    pub incoming_links: usize,
    pub outgoing_links: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,
}

impl ItemView {
    pub fn from_node(node: GraphNode, ctx: &ItemContext) -> Self {
        let counts = ctx.counts.get(&node.id).copied().unwrap_or_default();
        Self {
            path: node.path().unwrap_or_default().to_string(),
            tags: ctx.tags.get(&node.id).cloned().unwrap_or_default(),
            category: ctx.categories.get(&node.id).cloned(),
            item_type: node.node_type.as_str().to_string(),
            modified: node.updated_at,
            label: Some(node.label),
            id: node.id,
            score: None,
            incoming_links: counts.incoming,
            outgoing_links: counts.outgoing,
            highlight: None,
        }
    }

    pub fn from_hit(hit: SearchResultItem, ctx: &ItemContext) -> Self {
        let counts = ctx.counts.get(&hit.id).copied().unwrap_or_default();
        Self {
            tags: ctx.tags.get(&hit.id).cloned().unwrap_or_default(),
            category: ctx.categories.get(&hit.id).cloned(),
            path: hit.path,
            label: None,
            item_type: hit.item_type,
            modified: hit.last_modified,
            score: Some(hit.final_score),
            incoming_links: counts.incoming,
            outgoing_links: counts.outgoing,
            highlight: hit.highlight,
            id: hit.id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeighborView {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub score: f64,
    pub via: Discovery,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterView {
    pub nodes: Vec<NeighborView>,
    pub omitted: usize,
}

impl From<ClusterOutcome> for ClusterView {
    fn from(outcome: ClusterOutcome) -> Self {
        Self {
            omitted: outcome.omitted,
            nodes: outcome
                .kept
                .into_iter()
                .map(|s| {
                    let c = s.candidate;
                    NeighborView {
                        path: c.node.path().map(str::to_string),
                        id: c.node.id,
                        label: c.node.label,
                        score: s.score,
                        via: c.via,
                        similarity: c.similarity.map(similarity_label),
                    }
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SemanticView {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub similarity: f64,
    pub similarity_label: String,
}

/// Everything `inspect` reports about one note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NoteReport {
    pub node: GraphNode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub statistics: Option<DocStatistics>,
    pub edge_counts: EdgeCounts,
    pub tags: Vec<String>,
    pub categories: Vec<String>,
    /// Documents linking here, shrunk by Cluster RRF.
    pub incoming: ClusterView,
    /// Documents linked from here, shrunk by Cluster RRF.
    pub outgoing: ClusterView,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub semantic: Vec<SemanticView>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::ItemKind;

    #[test]
    fn test_request_parsing() {
        let req: QueryRequest =
            serde_json::from_str(r#"{"mode":"traverse","note":"notes/a.md"}"#).unwrap();
        match req {
            QueryRequest::Traverse {
                note,
                hops,
                limit,
                include_semantic,
            } => {
                assert_eq!(note, "notes/a.md");
                assert_eq!(hops, 1);
                assert!(limit.is_none());
                assert!(!include_semantic);
            }
            other => panic!("unexpected {:?}", other),
        }

        let req: QueryRequest = serde_json::from_str(
            r#"{"mode":"dimensional","expression":"tag:a","filter":{"type":"note","limit":5,"modified_within":"this_week"}}"#,
        )
        .unwrap();
        match req {
            QueryRequest::Dimensional { expression, filter } => {
                assert_eq!(expression.as_deref(), Some("tag:a"));
                assert_eq!(filter.kind, Some(ItemKind::Note));
                assert_eq!(filter.effective_limit(), Some(5));
            }
            other => panic!("unexpected {:?}", other),
        }

        assert!(serde_json::from_str::<QueryRequest>(r#"{"mode":"teleport"}"#).is_err());
    }

    #[test]
    fn test_not_found_serializes_with_kind() {
        let json = serde_json::to_value(QueryResponse::not_found("ghost.md")).unwrap();
        assert_eq!(json["kind"], "not_found");
        assert!(json["message"].as_str().unwrap().contains("ghost.md"));
    }
}
