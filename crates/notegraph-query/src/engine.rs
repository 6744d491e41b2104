//! Query engine: resolves a [`QueryRequest`] against the repositories.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use notegraph_core::{QueryConfig, Result};
use notegraph_store::{
    DocStatisticsRepository, EdgeRepository, EdgeType, EmbeddingStore, GraphNode,
    NodeRepository, NodeType, SearchClient, SearchScope, SqliteGraphStore,
};
use tracing::{debug, info, warn};

use crate::accessors::{ItemContext, NodeAccessor, SearchResultAccessor};
use crate::cache::QueryCache;
use crate::filter::{self, ItemFilter};
use crate::key_nodes::KeyNodeFinder;
use crate::orphan::OrphanFinder;
use crate::path::PathFinder;
use crate::rrf::{ClusterCandidate, ClusterRanker, Discovery};
use crate::semantic::semantic_neighbors;
use crate::traverse::{Traversal, TraverseParams};
use crate::types::*;

/// Edges read when inspecting a single note.
const NEIGHBOR_FETCH_CAP: usize = 500;
/// Candidates pulled from search, recent and folder listings before filtering.
const CANDIDATE_POOL: usize = 200;
/// Documents listed when browsing a folder.
const FOLDER_SCAN_CAP: usize = 1000;

/// The collaborators a query reads from.
#[derive(Clone)]
pub struct Repositories {
    pub nodes: Arc<dyn NodeRepository>,
    pub edges: Arc<dyn EdgeRepository>,
    pub stats: Arc<dyn DocStatisticsRepository>,
    pub embeddings: Arc<dyn EmbeddingStore>,
    pub search: Arc<dyn SearchClient>,
}

impl Repositories {
    /// Every collaborator served by one SQLite store.
    pub fn from_store(store: Arc<SqliteGraphStore>) -> Self {
        Self {
            nodes: store.clone(),
            edges: store.clone(),
            stats: store.clone(),
            embeddings: store.clone(),
            search: store,
        }
    }
}

pub struct QueryEngine {
    repos: Repositories,
    config: QueryConfig,
    cache: QueryCache,
}

impl QueryEngine {
    pub fn new(repos: Repositories, config: QueryConfig) -> Result<Self> {
        config.validate()?;
        let cache = QueryCache::new(config.cache_capacity);
        Ok(Self {
            repos,
            config,
            cache,
        })
    }

    pub fn from_store(store: Arc<SqliteGraphStore>, config: QueryConfig) -> Result<Self> {
        Self::new(Repositories::from_store(store), config)
    }

    pub fn config(&self) -> &QueryConfig {
        &self.config
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    pub async fn execute(&self, request: QueryRequest) -> Result<QueryResponse> {
        debug!("Executing {:?}", request);
        match request {
            QueryRequest::Inspect {
                note,
                limit,
                include_semantic,
            } => self.inspect(&note, self.limit_or_default(limit), include_semantic).await,
            QueryRequest::Traverse {
                note,
                hops,
                limit,
                include_semantic,
            } => {
                let params = TraverseParams {
                    hops,
                    limit: self.limit_or_default(limit),
                    include_semantic,
                };
                self.traverse(&note, params).await
            }
            QueryRequest::Path { from, to, max_hops } => {
                let max_hops = max_hops.unwrap_or(self.config.max_path_hops);
                self.path(&from, &to, max_hops).await
            }
            QueryRequest::KeyNodes {
                limit,
                semantic_query,
            } => {
                let report = KeyNodeFinder::new(&self.repos, &self.config)
                    .find(self.limit_or_default(limit), semantic_query.as_deref())
                    .await?;
                Ok(QueryResponse::KeyNodes(report))
            }
            QueryRequest::Orphans { filter } => {
                let listing = OrphanFinder::new(&self.repos, &self.config, &self.cache)
                    .find(&filter, now_ms())
                    .await?;
                Ok(QueryResponse::Orphans(listing))
            }
            QueryRequest::Dimensional { expression, filter } => {
                match expression.as_deref().map(str::trim).filter(|e| !e.is_empty()) {
                    Some(expression) => self.dimensional(expression, &filter).await,
                    None => self.top_tags(&filter).await,
                }
            }
            QueryRequest::Folder { path, filter } => self.folder(&path, &filter).await,
            QueryRequest::Recent { filter } => {
                let hits = self.repos.search.get_recent(CANDIDATE_POOL).await?;
                self.hit_list(hits, &filter).await
            }
            QueryRequest::Search {
                query,
                semantic,
                filter,
            } => {
                let hits = if semantic {
                    self.repos
                        .search
                        .vector_search(&query, CANDIDATE_POOL, &SearchScope::All)
                        .await?
                } else {
                    self.repos
                        .search
                        .fulltext_search(&query, CANDIDATE_POOL, &SearchScope::All)
                        .await?
                };
                self.hit_list(hits, &filter).await
            }
        }
    }

    fn limit_or_default(&self, limit: Option<usize>) -> usize {
        limit.filter(|l| *l > 0).unwrap_or(self.config.default_limit)
    }

    /// Look a note up by id, then by document path.
    pub async fn resolve_note(&self, note: &str) -> Result<Option<GraphNode>> {
        if let Some(node) = self.repos.nodes.get_by_id(note).await? {
            return Ok(Some(node));
        }
        if let Some(node) = self.repos.nodes.get_document_by_path(note).await? {
            return Ok(Some(node));
        }
        let trimmed = note.trim_start_matches('/');
        if trimmed != note {
            return self.repos.nodes.get_document_by_path(trimmed).await;
        }
        Ok(None)
    }

    // ---------------------------------------------------------------
    // Graph modes
    // ---------------------------------------------------------------

    pub async fn inspect(
        &self,
        note: &str,
        limit: usize,
        include_semantic: bool,
    ) -> Result<QueryResponse> {
        let Some(node) = self.resolve_note(note).await? else {
            return Ok(QueryResponse::not_found(note));
        };
        let ids = vec![node.id.clone()];
        let (edges, stats, edge_counts) = tokio::join!(
            self.repos.edges.get_all_edges_for_node(&node.id, NEIGHBOR_FETCH_CAP),
            self.repos.stats.get_by_doc_ids(&ids),
            self.repos.edges.count_edges(&ids, None),
        );
        let edges = edges?;
        let edge_counts = edge_counts?;
        let statistics = match stats {
            Ok(mut map) => map.remove(&node.id),
            Err(e) => {
                warn!("Failed to load statistics for {}: {}", node.id, e);
                None
            }
        };

        let mut neighbor_ids: Vec<String> = Vec::new();
        for edge in &edges {
            for id in [&edge.from_node_id, &edge.to_node_id] {
                if *id != node.id && !neighbor_ids.contains(id) {
                    neighbor_ids.push(id.clone());
                }
            }
        }
        let neighbors = self.repos.nodes.get_by_ids(&neighbor_ids).await?;

        let mut tags = Vec::new();
        let mut categories = Vec::new();
        let mut incoming = Vec::new();
        let mut outgoing = Vec::new();
        let mut seen_in = HashSet::new();
        let mut seen_out = HashSet::new();
        for edge in &edges {
            let (other, is_outgoing) = if edge.from_node_id == node.id {
                (&edge.to_node_id, true)
            } else {
                (&edge.from_node_id, false)
            };
            let Some(neighbor) = neighbors.get(other) else {
                continue;
            };
            match neighbor.node_type {
                NodeType::Tag => {
                    if !tags.contains(&neighbor.label) {
                        tags.push(neighbor.label.clone());
                    }
                }
                NodeType::Category => {
                    if !categories.contains(&neighbor.label) {
                        categories.push(neighbor.label.clone());
                    }
                }
                NodeType::Document => {
                    let (list, seen) = if is_outgoing {
                        (&mut outgoing, &mut seen_out)
                    } else {
                        (&mut incoming, &mut seen_in)
                    };
                    if seen.insert(neighbor.id.clone()) {
                        list.push(ClusterCandidate {
                            node: neighbor.clone(),
                            via: Discovery::Physical,
                            similarity: None,
                        });
                    }
                }
            }
        }

        let ranker = ClusterRanker::new(
            self.repos.edges.as_ref(),
            self.repos.stats.as_ref(),
            &self.config,
        );
        let incoming = ranker.shrink(incoming, limit).await;
        let outgoing = ranker.shrink(outgoing, limit).await;

        let semantic = if include_semantic && node.is_document() {
            let exclude: HashSet<String> = neighbor_ids.into_iter().collect();
            self.semantic_views(&node.id, limit, &exclude).await
        } else {
            Vec::new()
        };

        info!(
            "Inspect {}: {} incoming, {} outgoing, {} semantic",
            node.id,
            incoming.kept.len(),
            outgoing.kept.len(),
            semantic.len()
        );
        Ok(QueryResponse::Note(NoteReport {
            node,
            statistics,
            edge_counts,
            tags,
            categories,
            incoming: incoming.into(),
            outgoing: outgoing.into(),
            semantic,
        }))
    }

    async fn semantic_views(
        &self,
        id: &str,
        limit: usize,
        exclude: &HashSet<String>,
    ) -> Vec<SemanticView> {
        let found =
            match semantic_neighbors(self.repos.embeddings.as_ref(), id, limit, exclude).await {
                Ok(found) => found,
                Err(e) => {
                    warn!("Semantic neighbors for {} unavailable: {}", id, e);
                    return Vec::new();
                }
            };
        let ids: Vec<String> = found.iter().map(|n| n.doc_id.clone()).collect();
        let nodes = match self.repos.nodes.get_by_ids(&ids).await {
            Ok(nodes) => nodes,
            Err(e) => {
                warn!("Failed to resolve semantic neighbors of {}: {}", id, e);
                return Vec::new();
            }
        };
        found
            .into_iter()
            .filter_map(|n| {
                let node = nodes.get(&n.doc_id)?;
                Some(SemanticView {
                    id: n.doc_id,
                    label: node.label.clone(),
                    path: node.path().map(str::to_string),
                    similarity: n.similarity,
                    similarity_label: n.similarity_label,
                })
            })
            .collect()
    }

    pub async fn traverse(&self, note: &str, params: TraverseParams) -> Result<QueryResponse> {
        let Some(start) = self.resolve_note(note).await? else {
            return Ok(QueryResponse::not_found(note));
        };
        let result = Traversal::new(&self.repos, &self.config)
            .run(start, params)
            .await?;
        Ok(QueryResponse::Traversal(result))
    }

    pub async fn path(&self, from: &str, to: &str, max_hops: usize) -> Result<QueryResponse> {
        let Some(start) = self.resolve_note(from).await? else {
            return Ok(QueryResponse::not_found(from));
        };
        let Some(end) = self.resolve_note(to).await? else {
            return Ok(QueryResponse::not_found(to));
        };
        let result = PathFinder::new(&self.repos, &self.config)
            .find(&start, &end, max_hops)
            .await?;
        Ok(QueryResponse::Path(result))
    }

    // ---------------------------------------------------------------
    // List modes
    // ---------------------------------------------------------------

    /// Documents satisfying a tag/category expression.
    ///
    /// Candidates are the documents linked to any referenced tag or
    /// category; a pure conjunction uses the AND-join lookup instead. When
    /// the expression holds for a document with no tags at all (`NOT ...`),
    /// every document up to the scan cap is a candidate.
    pub async fn dimensional(&self, expression: &str, filter: &ItemFilter) -> Result<QueryResponse> {
        let expr = self.cache.expression(expression)?;
        let dims = expr.extract_dimensions();
        let (tag_nodes, category_nodes) = tokio::join!(
            self.repos.nodes.get_by_type_and_labels(NodeType::Tag, &dims.tags),
            self.repos.nodes.get_by_type_and_labels(NodeType::Category, &dims.categories),
        );
        let tag_ids: HashMap<String, String> =
            tag_nodes?.into_iter().map(|n| (n.label, n.id)).collect();
        let category_ids: HashMap<String, String> =
            category_nodes?.into_iter().map(|n| (n.label, n.id)).collect();
        let predicate = expr.build_predicate(
            &|label: &str| tag_ids.get(label).cloned(),
            &|label: &str| category_ids.get(label).cloned(),
        );

        let mut candidates: Vec<String> = Vec::new();
        let mut truncated = false;
        if let Some(required) = predicate.required_conjunction() {
            let ids = self
                .repos
                .edges
                .get_source_nodes_connected_to_all_targets(&required)
                .await?;
            extend_unique(&mut candidates, ids);
        } else {
            for dimension_id in predicate.node_ids() {
                let ids = self
                    .repos
                    .edges
                    .get_source_nodes_connected_to_all_targets(std::slice::from_ref(&dimension_id))
                    .await?;
                extend_unique(&mut candidates, ids);
            }
            if predicate.matches_unlinked() {
                let all = self.repos.nodes.list_documents_under("", FOLDER_SCAN_CAP).await?;
                truncated = all.len() >= FOLDER_SCAN_CAP;
                extend_unique(&mut candidates, all.into_iter().map(|n| n.id));
            }
        }

        let links = self
            .repos
            .edges
            .get_by_from_nodes_and_types(&candidates, &[EdgeType::Tagged, EdgeType::Categorized])
            .await?;
        let mut linked: HashMap<String, HashSet<String>> = HashMap::new();
        for edge in links {
            linked
                .entry(edge.from_node_id)
                .or_default()
                .insert(edge.to_node_id);
        }
        let empty = HashSet::new();
        candidates.retain(|id| predicate.matches(linked.get(id).unwrap_or(&empty)));

        let mut nodes = self.repos.nodes.get_by_ids(&candidates).await?;
        let mut documents: Vec<GraphNode> = candidates
            .iter()
            .filter_map(|id| nodes.remove(id))
            .filter(GraphNode::is_document)
            .collect();
        documents.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        debug!(
            "Dimensional {:?}: {} matching documents",
            expression,
            documents.len()
        );
        self.node_list(documents, filter, truncated).await
    }

    async fn top_tags(&self, filter: &ItemFilter) -> Result<QueryResponse> {
        let limit = filter.effective_limit().unwrap_or(self.config.default_limit);
        let top = self.repos.edges.get_top_tagged_nodes(limit).await?;
        let ids: Vec<String> = top.iter().map(|e| e.node_id.clone()).collect();
        let nodes = self.repos.nodes.get_by_ids(&ids).await?;
        let tags = top
            .into_iter()
            .map(|e| TagUsage {
                label: nodes
                    .get(&e.node_id)
                    .map(|n| n.label.clone())
                    .unwrap_or_else(|| e.node_id.clone()),
                id: e.node_id,
                count: e.degree,
            })
            .collect();
        Ok(QueryResponse::TopTags { tags })
    }

    pub async fn folder(&self, path: &str, filter: &ItemFilter) -> Result<QueryResponse> {
        let prefix = path.trim_start_matches('/');
        let documents = self
            .repos
            .nodes
            .list_documents_under(prefix, FOLDER_SCAN_CAP)
            .await?;
        let truncated = documents.len() >= FOLDER_SCAN_CAP;
        self.node_list(documents, filter, truncated).await
    }

    /// `truncated` marks a candidate source that stopped at its cap.
    async fn node_list(
        &self,
        nodes: Vec<GraphNode>,
        filter: &ItemFilter,
        truncated: bool,
    ) -> Result<QueryResponse> {
        let total = nodes.len();
        let ids: Vec<String> = nodes.iter().map(|n| n.id.clone()).collect();
        let ctx = ItemContext::load(self.repos.nodes.as_ref(), self.repos.edges.as_ref(), &ids).await?;
        let accessor = NodeAccessor::new(&ctx, &nodes);
        let kept = filter::apply(nodes, &accessor, filter, &self.cache, now_ms())?;
        let items = kept
            .into_iter()
            .map(|node| ItemView::from_node(node, &ctx))
            .collect();
        Ok(QueryResponse::Items(ItemList {
            items,
            total,
            truncated,
        }))
    }

    async fn hit_list(
        &self,
        hits: Vec<notegraph_store::SearchResultItem>,
        filter: &ItemFilter,
    ) -> Result<QueryResponse> {
        let total = hits.len();
        let truncated = total >= CANDIDATE_POOL;
        let ids: Vec<String> = hits.iter().map(|h| h.id.clone()).collect();
        let ctx = ItemContext::load(self.repos.nodes.as_ref(), self.repos.edges.as_ref(), &ids).await?;
        let accessor = SearchResultAccessor::new(&ctx, &hits);
        let kept = filter::apply(hits, &accessor, filter, &self.cache, now_ms())?;
        let items = kept
            .into_iter()
            .map(|hit| ItemView::from_hit(hit, &ctx))
            .collect();
        Ok(QueryResponse::Items(ItemList {
            items,
            total,
            truncated,
        }))
    }
}

fn extend_unique(into: &mut Vec<String>, ids: impl IntoIterator<Item = String>) {
    for id in ids {
        if !into.contains(&id) {
            into.push(id);
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
