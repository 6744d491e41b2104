//! Data types for graph nodes, edges, statistics, and search results.

use serde::{Deserialize, Serialize};

/// Kind of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Document,
    Tag,
    Category,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Document => "document",
            Self::Tag => "tag",
            Self::Category => "category",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "document" => Some(Self::Document),
            "tag" => Some(Self::Tag),
            "category" => Some(Self::Category),
            _ => None,
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A node row from the graph store. Written by the indexer, read-only here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub label: String,
    /// Opaque attribute blob; documents carry `path`.
    #[serde(default)]
    pub attributes: serde_json::Value,
    pub created_at: i64,
    pub updated_at: i64,
}

impl GraphNode {
    /// Vault-relative path from the attribute blob, if any.
    pub fn path(&self) -> Option<&str> {
        self.attributes.get("path").and_then(|p| p.as_str())
    }

    pub fn is_document(&self) -> bool {
        self.node_type == NodeType::Document
    }
}

/// Edge kind. Unknown kinds written by newer indexers are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EdgeType {
    Link,
    Tagged,
    Categorized,
    /// Synthetic edge produced by traversal for semantic neighbors.
    Semantic,
    Other(String),
}

impl EdgeType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Link => "link",
            Self::Tagged => "tagged",
            Self::Categorized => "categorized",
            Self::Semantic => "semantic",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for EdgeType {
    fn from(s: String) -> Self {
        match s.as_str() {
            "link" => Self::Link,
            "tagged" => Self::Tagged,
            "categorized" => Self::Categorized,
            "semantic" => Self::Semantic,
            _ => Self::Other(s),
        }
    }
}

impl From<EdgeType> for String {
    fn from(t: EdgeType) -> Self {
        t.as_str().to_string()
    }
}

/// A directed edge. Several edges of different types may join the same pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub from_node_id: String,
    pub to_node_id: String,
    #[serde(rename = "type")]
    pub edge_type: EdgeType,
    pub weight: f64,
}

/// Usage and content statistics for one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocStatistics {
    pub doc_id: String,
    pub richness_score: f64,
    pub open_count: i64,
    pub last_open_ts: i64,
    pub word_count: i64,
    pub char_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

/// Statistic a `top_by_doc_ids` ranking is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatMetric {
    Richness,
    OpenCount,
    LastOpen,
}

/// Edge counts, either aggregated over a set of nodes or for one node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeCounts {
    pub incoming: usize,
    pub outgoing: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DegreeEntry {
    pub node_id: String,
    pub degree: usize,
}

/// Top nodes by raw out-degree and in-degree, best first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DegreeRanking {
    pub top_out: Vec<DegreeEntry>,
    pub top_in: Vec<DegreeEntry>,
}

/// Chunk-level similarity hit. A document may appear more than once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarDoc {
    pub doc_id: String,
    pub similarity: f64,
}

/// A hit from the search client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub path: String,
    pub id: String,
    pub score: f64,
    #[serde(rename = "finalScore")]
    pub final_score: f64,
    #[serde(rename = "lastModified")]
    pub last_modified: i64,
    #[serde(rename = "type")]
    pub item_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub highlight: Option<String>,
}

/// Restricts which documents a search may return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchScope {
    #[default]
    All,
    /// Only these node ids.
    Ids(Vec<String>),
    /// Only documents whose path starts with this prefix.
    Folder(String),
}

/// Store-level statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_nodes: i64,
    pub total_documents: i64,
    pub total_edges: i64,
    pub embeddings_stored: i64,
    pub embedding_dimension: usize,
    pub db_path: String,
    pub matrix_rows: usize,
}
