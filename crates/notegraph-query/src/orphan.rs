//! Hard-orphan detection and revival suggestions.

use std::collections::HashSet;

use notegraph_core::{QueryConfig, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::accessors::{OrphanAccessor, OrphanCandidate};
use crate::cache::QueryCache;
use crate::engine::Repositories;
use crate::filter::{self, ItemFilter};
use crate::semantic::{semantic_neighbors, similarity_label};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevivalSuggestion {
    pub target_id: String,
    pub target_title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_path: Option<String>,
    pub similarity: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrphanReport {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    pub modified: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub richness: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<RevivalSuggestion>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrphanListing {
    pub orphans: Vec<OrphanReport>,
    /// Hard orphans found before filtering.
    pub candidates: usize,
}

pub struct OrphanFinder<'a> {
    repos: &'a Repositories,
    config: &'a QueryConfig,
    cache: &'a QueryCache,
}

impl<'a> OrphanFinder<'a> {
    pub fn new(repos: &'a Repositories, config: &'a QueryConfig, cache: &'a QueryCache) -> Self {
        Self {
            repos,
            config,
            cache,
        }
    }

    pub async fn find(&self, filter: &ItemFilter, now_ms: i64) -> Result<OrphanListing> {
        let ids = self
            .repos
            .edges
            .get_hard_orphans(self.config.orphan_candidate_cap)
            .await?;
        if ids.is_empty() {
            return Ok(OrphanListing::default());
        }

        let (nodes, stats) = tokio::join!(
            self.repos.nodes.get_by_ids(&ids),
            self.repos.stats.get_by_doc_ids(&ids),
        );
        let mut nodes = nodes?;
        let mut stats = stats.unwrap_or_else(|e| {
            warn!("Failed to load statistics for orphans: {}", e);
            Default::default()
        });
        let candidates: Vec<OrphanCandidate> = ids
            .iter()
            .filter_map(|id| {
                Some(OrphanCandidate {
                    node: nodes.remove(id)?,
                    stats: stats.remove(id),
                })
            })
            .collect();
        let found = candidates.len();

        let accessor = OrphanAccessor::new(&candidates);
        let kept = filter::apply(candidates, &accessor, filter, self.cache, now_ms)?;

        let all_orphans: HashSet<String> = ids.into_iter().collect();
        let mut orphans = Vec::with_capacity(kept.len());
        for candidate in kept {
            let suggestion = self.suggest(&candidate.node.id, &all_orphans).await;
            orphans.push(OrphanReport {
                path: candidate.node.path().map(str::to_string),
                modified: candidate.node.updated_at,
                richness: candidate.stats.map(|s| s.richness_score),
                id: candidate.node.id,
                label: candidate.node.label,
                suggestion,
            });
        }

        info!(
            "Orphans: {} candidates, {} reported, {} with suggestions",
            found,
            orphans.len(),
            orphans.iter().filter(|o| o.suggestion.is_some()).count()
        );
        Ok(OrphanListing {
            orphans,
            candidates: found,
        })
    }

    /// Closest non-orphan document. Any failure just means no suggestion.
    async fn suggest(&self, id: &str, orphans: &HashSet<String>) -> Option<RevivalSuggestion> {
        let neighbors = match semantic_neighbors(
            self.repos.embeddings.as_ref(),
            id,
            self.config.revival_candidates,
            orphans,
        )
        .await
        {
            Ok(n) => n,
            Err(e) => {
                warn!("No revival suggestion for {}: {}", id, e);
                return None;
            }
        };
        let best = neighbors.into_iter().next()?;
        let target = match self.repos.nodes.get_by_id(&best.doc_id).await {
            Ok(Some(node)) => node,
            Ok(None) => return None,
            Err(e) => {
                warn!("No revival suggestion for {}: {}", id, e);
                return None;
            }
        };
        Some(RevivalSuggestion {
            reason: format!(
                "Semantically similar to \"{}\" ({})",
                target.label,
                similarity_label(best.similarity)
            ),
            target_path: target.path().map(str::to_string),
            target_title: target.label,
            target_id: target.id,
            similarity: best.similarity,
        })
    }
}
