//! Filter / sort / limit pipeline over any item kind.
//!
//! The pipeline only talks to items through [`ItemFieldAccessor`], so graph
//! nodes, search hits and orphan candidates share one implementation.

use std::cmp::Ordering;

use notegraph_core::{Error, Result};
use serde::{Deserialize, Serialize};

use crate::cache::QueryCache;
use crate::expr::EvalContext;

const HOUR_MS: i64 = 60 * 60 * 1000;
const DAY_MS: i64 = 24 * HOUR_MS;

/// Per-item field access for the pipeline. One implementation per item kind.
pub trait ItemFieldAccessor<T> {
    fn path(&self, item: &T) -> Option<String>;
    /// Epoch millis.
    fn modified(&self, item: &T) -> Option<i64>;
    /// Epoch millis.
    fn created(&self, item: &T) -> Option<i64>;
    fn tags(&self, item: &T) -> Vec<String>;
    fn category(&self, item: &T) -> Option<String>;
    /// 0-based position in the producing query's own ranking.
    fn result_rank(&self, item: &T) -> Option<usize>;
    fn total_links(&self, item: &T) -> Option<usize>;
    fn incoming_links(&self, item: &T) -> Option<usize>;
    fn outgoing_links(&self, item: &T) -> Option<usize>;
}

/// Item kind as inferred from its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Note,
    File,
    Folder,
    All,
}

impl ItemKind {
    /// `.md` is a note, any other extension a file; a trailing `/` or a
    /// last segment without an extension is a folder.
    pub fn classify(path: &str) -> Self {
        if path.ends_with('/') {
            return Self::Folder;
        }
        let name = path.rsplit('/').next().unwrap_or(path);
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() && !ext.is_empty() => {
                if ext.eq_ignore_ascii_case("md") {
                    Self::Note
                } else {
                    Self::File
                }
            }
            _ => Self::Folder,
        }
    }

    fn admits(&self, path: &str) -> bool {
        *self == Self::All || Self::classify(path) == *self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeRange {
    Today,
    Yesterday,
    ThisWeek,
    ThisMonth,
    Last3Months,
    ThisYear,
}

impl TimeRange {
    pub fn window_ms(&self) -> i64 {
        match self {
            Self::Today => DAY_MS,
            Self::Yesterday => 2 * DAY_MS,
            Self::ThisWeek => 7 * DAY_MS,
            Self::ThisMonth => 30 * DAY_MS,
            Self::Last3Months => 90 * DAY_MS,
            Self::ThisYear => 365 * DAY_MS,
        }
    }
}

/// Optional filters, combined with AND, plus sort and limit.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ItemFilter {
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<ItemKind>,
    /// Leading `/`: literal prefix. Otherwise a regex, or a prefix if the
    /// regex does not compile.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub modified_within: Option<TimeRange>,
    /// Ignored when `modified_within` is also set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_within: Option<TimeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tag_category_boolean_expression: Option<String>,
    /// `<key>_asc` or `<key>_desc`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    /// Zero, negative or absent means unlimited.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i64>,
}

impl ItemFilter {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(i64::try_from(limit).unwrap_or(i64::MAX)),
            ..Default::default()
        }
    }

    /// Effective limit, `None` when unlimited.
    pub fn effective_limit(&self) -> Option<usize> {
        self.limit.filter(|l| *l > 0).map(|l| l as usize)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    ResultRank,
    Modified,
    TotalLinks,
    Backlinks,
    Outlinks,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sorter {
    pub key: SortKey,
    pub descending: bool,
}

impl Sorter {
    pub fn parse(name: &str) -> Result<Self> {
        let (base, descending) = if let Some(base) = name.strip_suffix("_desc") {
            (base, true)
        } else if let Some(base) = name.strip_suffix("_asc") {
            (base, false)
        } else {
            return Err(Error::Config(format!(
                "sorter {:?} must end in _asc or _desc",
                name
            )));
        };
        let key = match base {
            "result_rank" => SortKey::ResultRank,
            "modified" => SortKey::Modified,
            "total_links_count" => SortKey::TotalLinks,
            "backlinks_count" => SortKey::Backlinks,
            "outlinks_count" => SortKey::Outlinks,
            other => return Err(Error::Config(format!("unknown sort key {:?}", other))),
        };
        Ok(Self { key, descending })
    }

    fn key_of<T, A: ItemFieldAccessor<T> + ?Sized>(&self, accessor: &A, item: &T) -> Option<i64> {
        match self.key {
            SortKey::ResultRank => accessor.result_rank(item).map(|v| v as i64),
            SortKey::Modified => accessor.modified(item),
            SortKey::TotalLinks => accessor.total_links(item).map(|v| v as i64),
            SortKey::Backlinks => accessor.incoming_links(item).map(|v| v as i64),
            SortKey::Outlinks => accessor.outgoing_links(item).map(|v| v as i64),
        }
    }

    /// Items lacking the key sort last in either direction.
    fn compare(&self, a: Option<i64>, b: Option<i64>) -> Ordering {
        match (a, b) {
            (Some(a), Some(b)) if self.descending => b.cmp(&a),
            (Some(a), Some(b)) => a.cmp(&b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        }
    }
}

/// Filter, then stable-sort, then truncate `items`.
///
/// The sorter and the boolean expression are validated before any item is
/// looked at, so a bad request fails even on an empty input.
pub fn apply<T, A>(
    items: Vec<T>,
    accessor: &A,
    filter: &ItemFilter,
    cache: &QueryCache,
    now_ms: i64,
) -> Result<Vec<T>>
where
    A: ItemFieldAccessor<T> + ?Sized,
{
    let sorter = filter.sort.as_deref().map(Sorter::parse).transpose()?;
    let expr = filter
        .tag_category_boolean_expression
        .as_deref()
        .filter(|s| !s.trim().is_empty())
        .map(|s| cache.expression(s))
        .transpose()?;

    let time_filter = match (filter.modified_within, filter.created_within) {
        (Some(range), _) => Some((true, now_ms - range.window_ms())),
        (None, Some(range)) => Some((false, now_ms - range.window_ms())),
        (None, None) => None,
    };

    let mut kept: Vec<T> = items
        .into_iter()
        .filter(|item| {
            if let Some(kind) = filter.kind {
                if kind != ItemKind::All
                    && !accessor.path(item).is_some_and(|p| kind.admits(&p))
                {
                    return false;
                }
            }
            if let Some(pattern) = filter.path.as_deref() {
                if !accessor
                    .path(item)
                    .is_some_and(|p| path_matches(&p, pattern, cache))
                {
                    return false;
                }
            }
            if let Some((by_modified, cutoff)) = time_filter {
                let ts = if by_modified {
                    accessor.modified(item)
                } else {
                    accessor.created(item)
                };
                if !ts.is_some_and(|ts| ts >= cutoff) {
                    return false;
                }
            }
            if let Some(expr) = &expr {
                let tags = accessor.tags(item);
                let category = accessor.category(item);
                let ctx = EvalContext {
                    tags: &tags,
                    category: category.as_deref(),
                };
                if !expr.evaluate(&ctx) {
                    return false;
                }
            }
            true
        })
        .collect();

    if let Some(sorter) = sorter {
        let mut keyed: Vec<(Option<i64>, T)> = kept
            .into_iter()
            .map(|item| (sorter.key_of(accessor, &item), item))
            .collect();
        keyed.sort_by(|a, b| sorter.compare(a.0, b.0));
        kept = keyed.into_iter().map(|(_, item)| item).collect();
    }

    if let Some(limit) = filter.effective_limit() {
        kept.truncate(limit);
    }
    Ok(kept)
}

fn path_matches(path: &str, pattern: &str, cache: &QueryCache) -> bool {
    if pattern.starts_with('/') {
        let prefix = pattern.trim_start_matches('/');
        return path.trim_start_matches('/').starts_with(prefix);
    }
    match cache.regex(pattern) {
        Some(re) => re.is_match(path),
        None => path.starts_with(pattern),
    }
}
