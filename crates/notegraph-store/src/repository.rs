//! Read-side collaborator contracts consumed by the query engine.
//!
//! Every trait is async and read-only. `SqliteGraphStore` implements all of
//! them; other backends only need to implement these traits to be queried.

use std::collections::HashMap;

use async_trait::async_trait;
use notegraph_core::Result;

use crate::types::*;

#[async_trait]
pub trait NodeRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> Result<Option<GraphNode>>;

    /// Missing ids are absent from the returned map.
    async fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, GraphNode>>;

    async fn get_by_type_and_labels(
        &self,
        node_type: NodeType,
        labels: &[String],
    ) -> Result<Vec<GraphNode>>;

    async fn get_document_by_path(&self, path: &str) -> Result<Option<GraphNode>>;

    /// Documents whose path starts with `prefix`, ordered by path.
    async fn list_documents_under(&self, prefix: &str, limit: usize) -> Result<Vec<GraphNode>>;
}

#[async_trait]
pub trait EdgeRepository: Send + Sync {
    /// Edges in either direction touching `id`, at most `per_node_limit`.
    async fn get_all_edges_for_node(&self, id: &str, per_node_limit: usize)
        -> Result<Vec<GraphEdge>>;

    /// Counts aggregated over all of `ids`.
    async fn count_edges(&self, ids: &[String], type_filter: Option<&[EdgeType]>)
        -> Result<EdgeCounts>;

    /// Counts per node; ids without edges map to zero counts.
    async fn count_edges_by_node(&self, ids: &[String]) -> Result<HashMap<String, EdgeCounts>>;

    /// Document ids with no edge in either direction.
    async fn get_hard_orphans(&self, limit: usize) -> Result<Vec<String>>;

    async fn get_top_node_ids_by_degree(
        &self,
        limit: usize,
        restrict_to: Option<&[String]>,
    ) -> Result<DegreeRanking>;

    /// Sources with an edge to every one of `target_ids`.
    async fn get_source_nodes_connected_to_all_targets(
        &self,
        target_ids: &[String],
    ) -> Result<Vec<String>>;

    async fn get_by_from_nodes_and_types(
        &self,
        ids: &[String],
        types: &[EdgeType],
    ) -> Result<Vec<GraphEdge>>;

    /// Tag nodes with the most incoming `tagged` edges.
    async fn get_top_tagged_nodes(&self, limit: usize) -> Result<Vec<DegreeEntry>>;
}

#[async_trait]
pub trait DocStatisticsRepository: Send + Sync {
    async fn get_by_doc_ids(&self, ids: &[String]) -> Result<HashMap<String, DocStatistics>>;

    /// Ids among `ids` ordered best-first by `metric`, at most `k`.
    /// Documents lacking the signal (no row, never opened) are omitted.
    async fn top_by_doc_ids(
        &self,
        ids: &[String],
        metric: StatMetric,
        k: usize,
    ) -> Result<Vec<String>>;
}

#[async_trait]
pub trait EmbeddingStore: Send + Sync {
    /// Mean of the document's chunk vectors, or `None` if it has none.
    async fn get_average_embedding_for_doc(&self, id: &str) -> Result<Option<Vec<f32>>>;

    /// Chunk-level nearest neighbors, most similar first.
    async fn search_similar(&self, vector: &[f32], k: usize) -> Result<Vec<SimilarDoc>>;
}

#[async_trait]
pub trait SearchClient: Send + Sync {
    async fn vector_search(
        &self,
        query: &str,
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<SearchResultItem>>;

    async fn fulltext_search(
        &self,
        query: &str,
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<SearchResultItem>>;

    async fn get_recent(&self, limit: usize) -> Result<Vec<SearchResultItem>>;
}
