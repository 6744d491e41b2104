//! Semantic neighbors of a document via its averaged chunk embedding.

use std::collections::HashSet;

use notegraph_core::Result;
use notegraph_store::EmbeddingStore;
use serde::{Deserialize, Serialize};
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticNeighbor {
    pub doc_id: String,
    pub similarity: f64,
    /// e.g. `"87.3%"`
    pub similarity_label: String,
}

pub fn similarity_label(similarity: f64) -> String {
    format!("{:.1}%", similarity * 100.0)
}

/// Up to `n` documents most similar to `doc_id`, excluding `doc_id` itself
/// and every id in `exclude`. A document without an embedding has no
/// neighbors.
///
/// The index is asked for `2n` chunk hits, since several may belong to the
/// same document or to an excluded one.
pub async fn semantic_neighbors(
    embeddings: &dyn EmbeddingStore,
    doc_id: &str,
    n: usize,
    exclude: &HashSet<String>,
) -> Result<Vec<SemanticNeighbor>> {
    if n == 0 {
        return Ok(Vec::new());
    }
    let Some(vector) = embeddings.get_average_embedding_for_doc(doc_id).await? else {
        debug!("No embedding for {}; no semantic neighbors", doc_id);
        return Ok(Vec::new());
    };

    let hits = embeddings.search_similar(&vector, n.saturating_mul(2)).await?;
    let mut seen = HashSet::new();
    let mut neighbors = Vec::with_capacity(n.min(hits.len()));
    for hit in hits {
        if hit.doc_id == doc_id || exclude.contains(&hit.doc_id) {
            continue;
        }
        if !seen.insert(hit.doc_id.clone()) {
            continue;
        }
        neighbors.push(SemanticNeighbor {
            similarity_label: similarity_label(hit.similarity),
            doc_id: hit.doc_id,
            similarity: hit.similarity,
        });
        if neighbors.len() == n {
            break;
        }
    }
    Ok(neighbors)
}
