//! SQLite-backed graph store: nodes, edges, doc statistics, chunk vectors.
//!
//! Implements every collaborator trait in [`crate::repository`]. The write
//! methods are the indexer side and are never called by the query engine.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ndarray::{Array1, Array2};
use parking_lot::Mutex;
use rusqlite::types::ToSql;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info};

use crate::embedding::{dequantize_uint8, mean_vector, normalized, quantize_uint8};
use crate::repository::*;
use crate::schema::{FTS_SCHEMA_SQL, FTS_TRIGGERS_SQL, SCHEMA_SQL};
use crate::types::*;
use notegraph_core::{Error, Result};

pub struct SqliteGraphStore {
    conn: Mutex<Connection>,
    db_path: PathBuf,
    embedding_dim: usize,
    /// Normalized chunk vectors for similarity search: (N, dim) float32.
    embedding_matrix: Mutex<EmbeddingMatrix>,
}

struct EmbeddingMatrix {
    matrix: Array2<f32>,
    /// Owning document of each row.
    doc_ids: Vec<String>,
    dirty: bool,
}

fn db_err(e: rusqlite::Error) -> Error {
    Error::Database(e.to_string())
}

/// Caller-supplied counts can exceed `i64`; a wrapped negative LIMIT would
/// mean "no limit" to SQLite.
fn sql_limit(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

impl SqliteGraphStore {
    /// Open or create the store. The file will be `db_dir/notegraph.db`.
    pub fn open(db_dir: impl AsRef<Path>, embedding_dim: usize) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir).map_err(|e| Error::Storage(e.to_string()))?;
        let db_path = db_dir.join("notegraph.db");

        let conn = Self::create_connection(&db_path)?;
        Self::init_schema(&conn)?;

        let store = Self {
            conn: Mutex::new(conn),
            db_path,
            embedding_dim,
            embedding_matrix: Mutex::new(EmbeddingMatrix {
                matrix: Array2::zeros((0, embedding_dim)),
                doc_ids: Vec::new(),
                dirty: true,
            }),
        };

        let stats = store.get_stats()?;
        info!(
            "SqliteGraphStore initialized: {} nodes, {} edges, dim={}, path={}",
            stats.total_nodes,
            stats.total_edges,
            embedding_dim,
            store.db_path.display()
        );

        Ok(store)
    }

    fn create_connection(db_path: &Path) -> Result<Connection> {
        let conn = Connection::open(db_path).map_err(db_err)?;
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA cache_size = -65536;
             PRAGMA synchronous = NORMAL;",
        )
        .map_err(db_err)?;
        Ok(conn)
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        let full_schema = format!("{}\n{}\n{}", SCHEMA_SQL, FTS_SCHEMA_SQL, FTS_TRIGGERS_SQL);
        conn.execute_batch(&full_schema)
            .map_err(|e| Error::Database(format!("Schema init failed: {}", e)))?;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Indexer-side writes
    // ---------------------------------------------------------------

    pub fn upsert_node(&self, node: &GraphNode) -> Result<()> {
        let attrs = serde_json::to_string(&node.attributes)?;
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT INTO nodes (id, type, label, path, attributes_json, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7) \
             ON CONFLICT(id) DO UPDATE SET type = excluded.type, label = excluded.label, \
             path = excluded.path, attributes_json = excluded.attributes_json, \
             created_at = excluded.created_at, updated_at = excluded.updated_at",
        )
        .map_err(db_err)?
        .execute(params![
            node.id,
            node.node_type.as_str(),
            node.label,
            node.path(),
            attrs,
            node.created_at,
            node.updated_at,
        ])
        .map_err(db_err)?;
        Ok(())
    }

    pub fn add_edge(&self, edge: &GraphEdge) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT OR REPLACE INTO edges (from_node_id, to_node_id, type, weight) \
             VALUES (?1, ?2, ?3, ?4)",
        )
        .map_err(db_err)?
        .execute(params![
            edge.from_node_id,
            edge.to_node_id,
            edge.edge_type.as_str(),
            edge.weight,
        ])
        .map_err(db_err)?;
        Ok(())
    }

    pub fn upsert_doc_statistics(&self, stats: &DocStatistics) -> Result<()> {
        let conn = self.conn.lock();
        conn.prepare_cached(
            "INSERT OR REPLACE INTO doc_statistics \
             (doc_id, richness_score, open_count, last_open_ts, word_count, char_count, language) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        )
        .map_err(db_err)?
        .execute(params![
            stats.doc_id,
            stats.richness_score,
            stats.open_count,
            stats.last_open_ts,
            stats.word_count,
            stats.char_count,
            stats.language,
        ])
        .map_err(db_err)?;
        Ok(())
    }

    /// Store a quantized chunk vector owned by `doc_id`.
    pub fn add_chunk_embedding(
        &self,
        chunk_id: &str,
        doc_id: &str,
        embedding: &Array1<f32>,
    ) -> Result<()> {
        if embedding.len() != self.embedding_dim {
            return Err(Error::Storage(format!(
                "embedding has {} dims, store expects {}",
                embedding.len(),
                self.embedding_dim
            )));
        }
        let (q_bytes, scale, offset) = quantize_uint8(embedding);
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO chunk_embeddings (chunk_id, doc_id, embedding, scale, offset_val) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![chunk_id, doc_id, q_bytes, scale, offset],
        )
        .map_err(db_err)?;
        drop(conn);
        self.embedding_matrix.lock().dirty = true;
        Ok(())
    }

    // ---------------------------------------------------------------
    // Nodes
    // ---------------------------------------------------------------

    fn node(&self, id: &str) -> Result<Option<GraphNode>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM nodes WHERE id = ?1")
            .map_err(db_err)?
            .query_row(params![id], |row| Ok(Self::row_to_node(row)))
            .optional()
            .map_err(db_err)?;
        Ok(row)
    }

    fn nodes(&self, ids: &[String]) -> Result<HashMap<String, GraphNode>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let conn = self.conn.lock();
        let sql = format!("SELECT * FROM nodes WHERE id IN ({})", placeholders(ids.len()));
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |row| Ok(Self::row_to_node(row)))
            .map_err(db_err)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .map(|n| (n.id.clone(), n))
            .collect())
    }

    fn nodes_by_type_and_labels(&self, node_type: NodeType, labels: &[String]) -> Result<Vec<GraphNode>> {
        if labels.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT * FROM nodes WHERE type = ? AND label IN ({}) ORDER BY label",
            placeholders(labels.len())
        );
        let type_str = node_type.as_str();
        let mut args: Vec<&dyn ToSql> = vec![&type_str];
        args.extend(labels.iter().map(|l| l as &dyn ToSql));
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args.as_slice(), |row| Ok(Self::row_to_node(row)))
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn document_by_path(&self, path: &str) -> Result<Option<GraphNode>> {
        let conn = self.conn.lock();
        let row = conn
            .prepare_cached("SELECT * FROM nodes WHERE type = 'document' AND path = ?1 LIMIT 1")
            .map_err(db_err)?
            .query_row(params![path], |row| Ok(Self::row_to_node(row)))
            .optional()
            .map_err(db_err)?;
        Ok(row)
    }

    fn documents_under(&self, prefix: &str, limit: usize) -> Result<Vec<GraphNode>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM nodes WHERE type = 'document' \
                 AND substr(path, 1, length(?1)) = ?1 ORDER BY path LIMIT ?2",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![prefix, sql_limit(limit)], |row| Ok(Self::row_to_node(row)))
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---------------------------------------------------------------
    // Edges
    // ---------------------------------------------------------------

    fn edges_for_node(&self, id: &str, limit: usize) -> Result<Vec<GraphEdge>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM edges WHERE from_node_id = ?1 OR to_node_id = ?1 \
                 ORDER BY weight DESC, from_node_id, to_node_id LIMIT ?2",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![id, sql_limit(limit)], |row| Ok(Self::row_to_edge(row)))
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn edge_counts(&self, ids: &[String], type_filter: Option<&[EdgeType]>) -> Result<EdgeCounts> {
        if ids.is_empty() {
            return Ok(EdgeCounts::default());
        }
        let type_names: Vec<String> = type_filter
            .unwrap_or(&[])
            .iter()
            .map(|t| t.as_str().to_string())
            .collect();
        let type_clause = if type_names.is_empty() {
            String::new()
        } else {
            format!(" AND type IN ({})", placeholders(type_names.len()))
        };

        let conn = self.conn.lock();
        let count_side = |column: &str| -> Result<usize> {
            let sql = format!(
                "SELECT COUNT(*) FROM edges WHERE {} IN ({}){}",
                column,
                placeholders(ids.len()),
                type_clause
            );
            let args = ids.iter().chain(type_names.iter());
            let n: i64 = conn
                .query_row(&sql, params_from_iter(args), |row| row.get(0))
                .map_err(db_err)?;
            Ok(n as usize)
        };
        let incoming = count_side("to_node_id")?;
        let outgoing = count_side("from_node_id")?;
        Ok(EdgeCounts {
            incoming,
            outgoing,
            total: incoming + outgoing,
        })
    }

    fn edge_counts_by_node(&self, ids: &[String]) -> Result<HashMap<String, EdgeCounts>> {
        let mut out: HashMap<String, EdgeCounts> =
            ids.iter().map(|id| (id.clone(), EdgeCounts::default())).collect();
        if ids.is_empty() {
            return Ok(out);
        }

        let conn = self.conn.lock();
        for column in ["to_node_id", "from_node_id"] {
            let sql = format!(
                "SELECT {col}, COUNT(*) FROM edges WHERE {col} IN ({}) GROUP BY {col}",
                placeholders(ids.len()),
                col = column
            );
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(params_from_iter(ids.iter()), |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
                })
                .map_err(db_err)?;
            for (id, n) in rows.filter_map(|r| r.ok()) {
                let counts = out.entry(id).or_default();
                if column == "to_node_id" {
                    counts.incoming = n as usize;
                } else {
                    counts.outgoing = n as usize;
                }
                counts.total = counts.incoming + counts.outgoing;
            }
        }
        Ok(out)
    }

    fn hard_orphans(&self, limit: usize) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT n.id FROM nodes n WHERE n.type = 'document' \
                 AND NOT EXISTS (SELECT 1 FROM edges e WHERE e.from_node_id = n.id) \
                 AND NOT EXISTS (SELECT 1 FROM edges e WHERE e.to_node_id = n.id) \
                 ORDER BY n.updated_at DESC, n.id LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![sql_limit(limit)], |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Top document nodes by out- and in-degree over all edge types.
    fn top_by_degree(&self, limit: usize, restrict_to: Option<&[String]>) -> Result<DegreeRanking> {
        if matches!(restrict_to, Some(ids) if ids.is_empty()) {
            return Ok(DegreeRanking::default());
        }
        let conn = self.conn.lock();
        let side = |column: &str| -> Result<Vec<DegreeEntry>> {
            let restrict_clause = match restrict_to {
                Some(ids) => format!(" AND e.{} IN ({})", column, placeholders(ids.len())),
                None => String::new(),
            };
            let sql = format!(
                "SELECT e.{col}, COUNT(*) AS degree FROM edges e \
                 JOIN nodes n ON n.id = e.{col} \
                 WHERE n.type = 'document'{restrict} \
                 GROUP BY e.{col} ORDER BY degree DESC, e.{col} LIMIT ?",
                col = column,
                restrict = restrict_clause
            );
            let limit = sql_limit(limit);
            let mut args: Vec<&dyn ToSql> = restrict_to
                .unwrap_or(&[])
                .iter()
                .map(|id| id as &dyn ToSql)
                .collect();
            args.push(&limit);
            let mut stmt = conn.prepare(&sql).map_err(db_err)?;
            let rows = stmt
                .query_map(args.as_slice(), |row| {
                    Ok(DegreeEntry {
                        node_id: row.get(0)?,
                        degree: row.get::<_, i64>(1)? as usize,
                    })
                })
                .map_err(db_err)?;
            Ok(rows.filter_map(|r| r.ok()).collect())
        };
        let top_out = side("from_node_id")?;
        let top_in = side("to_node_id")?;
        Ok(DegreeRanking { top_out, top_in })
    }

    fn sources_connected_to_all(&self, target_ids: &[String]) -> Result<Vec<String>> {
        if target_ids.is_empty() {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let sql = format!(
            "SELECT from_node_id FROM edges WHERE to_node_id IN ({}) \
             GROUP BY from_node_id HAVING COUNT(DISTINCT to_node_id) = ? \
             ORDER BY from_node_id",
            placeholders(target_ids.len())
        );
        let wanted = sql_limit(target_ids.len());
        let mut args: Vec<&dyn ToSql> = target_ids.iter().map(|id| id as &dyn ToSql).collect();
        args.push(&wanted);
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args.as_slice(), |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn edges_from(&self, ids: &[String], types: &[EdgeType]) -> Result<Vec<GraphEdge>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let type_names: Vec<String> = types.iter().map(|t| t.as_str().to_string()).collect();
        let type_clause = if type_names.is_empty() {
            String::new()
        } else {
            format!(" AND type IN ({})", placeholders(type_names.len()))
        };
        let sql = format!(
            "SELECT * FROM edges WHERE from_node_id IN ({}){} ORDER BY from_node_id, weight DESC",
            placeholders(ids.len()),
            type_clause
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter().chain(type_names.iter())), |row| {
                Ok(Self::row_to_edge(row))
            })
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn top_tagged(&self, limit: usize) -> Result<Vec<DegreeEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT e.to_node_id, COUNT(*) AS uses FROM edges e \
                 JOIN nodes n ON n.id = e.to_node_id \
                 WHERE e.type = 'tagged' AND n.type = 'tag' \
                 GROUP BY e.to_node_id ORDER BY uses DESC, e.to_node_id LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![sql_limit(limit)], |row| {
                Ok(DegreeEntry {
                    node_id: row.get(0)?,
                    degree: row.get::<_, i64>(1)? as usize,
                })
            })
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---------------------------------------------------------------
    // Doc statistics
    // ---------------------------------------------------------------

    fn doc_statistics(&self, ids: &[String]) -> Result<HashMap<String, DocStatistics>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }
        let sql = format!(
            "SELECT * FROM doc_statistics WHERE doc_id IN ({})",
            placeholders(ids.len())
        );
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(params_from_iter(ids.iter()), |row| {
                Ok(DocStatistics {
                    doc_id: row.get("doc_id")?,
                    richness_score: row.get("richness_score")?,
                    open_count: row.get("open_count")?,
                    last_open_ts: row.get("last_open_ts")?,
                    word_count: row.get("word_count")?,
                    char_count: row.get("char_count")?,
                    language: row.get("language")?,
                })
            })
            .map_err(db_err)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .map(|s| (s.doc_id.clone(), s))
            .collect())
    }

    fn top_stat(&self, ids: &[String], metric: StatMetric, k: usize) -> Result<Vec<String>> {
        if ids.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let column = match metric {
            StatMetric::Richness => "richness_score",
            StatMetric::OpenCount => "open_count",
            StatMetric::LastOpen => "last_open_ts",
        };
        let sql = format!(
            "SELECT doc_id FROM doc_statistics WHERE doc_id IN ({ids}) AND {col} > 0 \
             ORDER BY {col} DESC, doc_id LIMIT ?",
            ids = placeholders(ids.len()),
            col = column
        );
        let k = sql_limit(k);
        let mut args: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();
        args.push(&k);
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args.as_slice(), |row| row.get::<_, String>(0))
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    // ---------------------------------------------------------------
    // Vector Search
    // ---------------------------------------------------------------

    fn chunk_vectors_for_doc(&self, doc_id: &str) -> Result<Vec<Array1<f32>>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT embedding, scale, offset_val FROM chunk_embeddings \
                 WHERE doc_id = ?1 ORDER BY chunk_id",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![doc_id], |row| {
                let blob: Vec<u8> = row.get(0)?;
                let scale: f64 = row.get(1)?;
                let offset: f64 = row.get(2)?;
                Ok(dequantize_uint8(&blob, scale as f32, offset as f32))
            })
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn average_embedding(&self, doc_id: &str) -> Result<Option<Vec<f32>>> {
        let vectors = self.chunk_vectors_for_doc(doc_id)?;
        Ok(mean_vector(&vectors).map(|v| v.to_vec()))
    }

    /// Load and normalize all chunk vectors into a matrix for fast search.
    fn load_embedding_matrix(&self) -> Result<()> {
        let mut doc_ids = Vec::new();
        let mut vectors: Vec<Array1<f32>> = Vec::new();

        {
            let conn = self.conn.lock();
            let mut stmt = conn
                .prepare(
                    "SELECT doc_id, embedding, scale, offset_val FROM chunk_embeddings \
                     ORDER BY doc_id, chunk_id",
                )
                .map_err(db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    let doc_id: String = row.get(0)?;
                    let blob: Vec<u8> = row.get(1)?;
                    let scale: f64 = row.get(2)?;
                    let offset: f64 = row.get(3)?;
                    Ok((doc_id, blob, scale as f32, offset as f32))
                })
                .map_err(db_err)?;
            for row in rows {
                let (doc_id, blob, scale, offset) = row.map_err(db_err)?;
                let Some(v) = normalized(&dequantize_uint8(&blob, scale, offset)) else {
                    continue;
                };
                doc_ids.push(doc_id);
                vectors.push(v);
            }
        }

        let mut matrix = Array2::zeros((vectors.len(), self.embedding_dim));
        for (i, v) in vectors.iter().enumerate() {
            matrix.row_mut(i).assign(v);
        }

        let mut mat = self.embedding_matrix.lock();
        mat.matrix = matrix;
        mat.doc_ids = doc_ids;
        mat.dirty = false;
        debug!("Loaded {} chunk vectors into matrix", mat.doc_ids.len());
        Ok(())
    }

    fn ensure_matrix_loaded(&self) -> Result<()> {
        if self.embedding_matrix.lock().dirty {
            self.load_embedding_matrix()?;
        }
        Ok(())
    }

    /// Cosine similarity of `query` against every stored chunk vector.
    fn similar_chunks(&self, query: &[f32], k: usize) -> Result<Vec<SimilarDoc>> {
        if query.len() != self.embedding_dim {
            return Err(Error::Storage(format!(
                "query vector has {} dims, store expects {}",
                query.len(),
                self.embedding_dim
            )));
        }
        self.ensure_matrix_loaded()?;

        let Some(q) = normalized(&Array1::from(query.to_vec())) else {
            return Ok(Vec::new());
        };
        let mat = self.embedding_matrix.lock();
        if mat.matrix.nrows() == 0 {
            return Ok(Vec::new());
        }

        let similarities = mat.matrix.dot(&q);
        let mut indexed: Vec<(usize, f32)> = similarities.iter().copied().enumerate().collect();
        indexed.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        indexed.truncate(k);

        Ok(indexed
            .into_iter()
            .map(|(i, s)| SimilarDoc {
                doc_id: mat.doc_ids[i].clone(),
                similarity: s as f64,
            })
            .collect())
    }

    // ---------------------------------------------------------------
    // Full-text search (FTS5)
    // ---------------------------------------------------------------

    fn bm25_search(&self, query: &str, top_k: usize, scope: &SearchScope) -> Result<Vec<SearchResultItem>> {
        let fts_query = Self::sanitize_fts_query(query);
        if fts_query.is_empty() {
            return Ok(Vec::new());
        }

        let top_k = sql_limit(top_k);
        let mut args: Vec<&dyn ToSql> = vec![&fts_query];
        let scope_clause = match scope {
            SearchScope::All => String::new(),
            SearchScope::Ids(ids) if ids.is_empty() => return Ok(Vec::new()),
            SearchScope::Ids(ids) => {
                args.extend(ids.iter().map(|id| id as &dyn ToSql));
                format!(" AND n.id IN ({})", placeholders(ids.len()))
            }
            SearchScope::Folder(prefix) => {
                args.push(prefix);
                " AND substr(n.path, 1, length(?2)) = ?2".to_string()
            }
        };
        args.push(&top_k);

        // Positional `?` after a numbered `?2` continues from 3.
        let sql = format!(
            "SELECT n.*, nodes_fts.rank AS bm25_score, \
             highlight(nodes_fts, 0, '**', '**') AS snippet \
             FROM nodes_fts JOIN nodes n ON n.rowid = nodes_fts.rowid \
             WHERE nodes_fts MATCH ?1 AND n.type = 'document'{} \
             ORDER BY nodes_fts.rank LIMIT ?",
            scope_clause
        );

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql).map_err(db_err)?;
        let rows = stmt
            .query_map(args.as_slice(), |row| {
                let bm25: f64 = row.get("bm25_score").unwrap_or(0.0);
                let node = Self::row_to_node(row);
                Ok(SearchResultItem {
                    path: node.path().unwrap_or_default().to_string(),
                    id: node.id,
                    // FTS5 rank is negative; negate for positive
                    score: -bm25,
                    final_score: -bm25,
                    last_modified: node.updated_at,
                    item_type: node.node_type.as_str().to_string(),
                    highlight: row.get("snippet").ok(),
                })
            })
            .map_err(db_err)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Wrap each token in double quotes and join with OR.
    fn sanitize_fts_query(query: &str) -> String {
        query
            .split_whitespace()
            .map(|t| t.replace('"', ""))
            .filter(|t| !t.is_empty())
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR ")
    }

    fn recent_documents(&self, limit: usize) -> Result<Vec<SearchResultItem>> {
        let conn = self.conn.lock();
        let mut stmt = conn
            .prepare_cached(
                "SELECT * FROM nodes WHERE type = 'document' \
                 ORDER BY updated_at DESC, id LIMIT ?1",
            )
            .map_err(db_err)?;
        let rows = stmt
            .query_map(params![sql_limit(limit)], |row| Ok(Self::row_to_node(row)))
            .map_err(db_err)?;
        Ok(rows
            .filter_map(|r| r.ok())
            .map(|node| SearchResultItem {
                path: node.path().unwrap_or_default().to_string(),
                id: node.id,
                score: 0.0,
                final_score: 0.0,
                last_modified: node.updated_at,
                item_type: node.node_type.as_str().to_string(),
                highlight: None,
            })
            .collect())
    }

    // ---------------------------------------------------------------
    // Stats
    // ---------------------------------------------------------------

    pub fn get_stats(&self) -> Result<StoreStats> {
        let conn = self.conn.lock();
        let count = |sql: &str| -> Result<i64> {
            conn.query_row(sql, [], |row| row.get(0)).map_err(db_err)
        };
        let total_nodes = count("SELECT COUNT(*) FROM nodes")?;
        let total_documents = count("SELECT COUNT(*) FROM nodes WHERE type = 'document'")?;
        let total_edges = count("SELECT COUNT(*) FROM edges")?;
        let embeddings_stored = count("SELECT COUNT(*) FROM chunk_embeddings")?;
        drop(conn);

        Ok(StoreStats {
            total_nodes,
            total_documents,
            total_edges,
            embeddings_stored,
            embedding_dimension: self.embedding_dim,
            db_path: self.db_path.to_string_lossy().to_string(),
            matrix_rows: self.embedding_matrix.lock().matrix.nrows(),
        })
    }

    // ---------------------------------------------------------------
    // Row Mapping Helpers
    // ---------------------------------------------------------------

    fn row_to_node(row: &rusqlite::Row<'_>) -> GraphNode {
        GraphNode {
            id: row.get("id").unwrap_or_default(),
            node_type: row
                .get::<_, String>("type")
                .ok()
                .and_then(|t| NodeType::parse(&t))
                .unwrap_or(NodeType::Document),
            label: row.get("label").unwrap_or_default(),
            attributes: row
                .get::<_, Option<String>>("attributes_json")
                .ok()
                .flatten()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null),
            created_at: row.get("created_at").unwrap_or(0),
            updated_at: row.get("updated_at").unwrap_or(0),
        }
    }

    fn row_to_edge(row: &rusqlite::Row<'_>) -> GraphEdge {
        GraphEdge {
            from_node_id: row.get("from_node_id").unwrap_or_default(),
            to_node_id: row.get("to_node_id").unwrap_or_default(),
            edge_type: EdgeType::from(row.get::<_, String>("type").unwrap_or_default()),
            weight: row.get("weight").unwrap_or(1.0),
        }
    }
}

// ---------------------------------------------------------------
// Collaborator trait implementations
// ---------------------------------------------------------------

#[async_trait]
impl NodeRepository for SqliteGraphStore {
    async fn get_by_id(&self, id: &str) -> Result<Option<GraphNode>> {
        self.node(id)
    }

    async fn get_by_ids(&self, ids: &[String]) -> Result<HashMap<String, GraphNode>> {
        self.nodes(ids)
    }

    async fn get_by_type_and_labels(
        &self,
        node_type: NodeType,
        labels: &[String],
    ) -> Result<Vec<GraphNode>> {
        self.nodes_by_type_and_labels(node_type, labels)
    }

    async fn get_document_by_path(&self, path: &str) -> Result<Option<GraphNode>> {
        self.document_by_path(path)
    }

    async fn list_documents_under(&self, prefix: &str, limit: usize) -> Result<Vec<GraphNode>> {
        self.documents_under(prefix, limit)
    }
}

#[async_trait]
impl EdgeRepository for SqliteGraphStore {
    async fn get_all_edges_for_node(
        &self,
        id: &str,
        per_node_limit: usize,
    ) -> Result<Vec<GraphEdge>> {
        self.edges_for_node(id, per_node_limit)
    }

    async fn count_edges(
        &self,
        ids: &[String],
        type_filter: Option<&[EdgeType]>,
    ) -> Result<EdgeCounts> {
        self.edge_counts(ids, type_filter)
    }

    async fn count_edges_by_node(&self, ids: &[String]) -> Result<HashMap<String, EdgeCounts>> {
        self.edge_counts_by_node(ids)
    }

    async fn get_hard_orphans(&self, limit: usize) -> Result<Vec<String>> {
        self.hard_orphans(limit)
    }

    async fn get_top_node_ids_by_degree(
        &self,
        limit: usize,
        restrict_to: Option<&[String]>,
    ) -> Result<DegreeRanking> {
        self.top_by_degree(limit, restrict_to)
    }

    async fn get_source_nodes_connected_to_all_targets(
        &self,
        target_ids: &[String],
    ) -> Result<Vec<String>> {
        self.sources_connected_to_all(target_ids)
    }

    async fn get_by_from_nodes_and_types(
        &self,
        ids: &[String],
        types: &[EdgeType],
    ) -> Result<Vec<GraphEdge>> {
        self.edges_from(ids, types)
    }

    async fn get_top_tagged_nodes(&self, limit: usize) -> Result<Vec<DegreeEntry>> {
        self.top_tagged(limit)
    }
}

#[async_trait]
impl DocStatisticsRepository for SqliteGraphStore {
    async fn get_by_doc_ids(&self, ids: &[String]) -> Result<HashMap<String, DocStatistics>> {
        self.doc_statistics(ids)
    }

    async fn top_by_doc_ids(
        &self,
        ids: &[String],
        metric: StatMetric,
        k: usize,
    ) -> Result<Vec<String>> {
        self.top_stat(ids, metric, k)
    }
}

#[async_trait]
impl EmbeddingStore for SqliteGraphStore {
    async fn get_average_embedding_for_doc(&self, id: &str) -> Result<Option<Vec<f32>>> {
        self.average_embedding(id)
    }

    async fn search_similar(&self, vector: &[f32], k: usize) -> Result<Vec<SimilarDoc>> {
        self.similar_chunks(vector, k)
    }
}

#[async_trait]
impl SearchClient for SqliteGraphStore {
    /// No text embedder lives in this store, so this scores with BM25.
    async fn vector_search(
        &self,
        query: &str,
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<SearchResultItem>> {
        debug!("vector_search has no embedder; using full-text ranking");
        self.bm25_search(query, top_k, scope)
    }

    async fn fulltext_search(
        &self,
        query: &str,
        top_k: usize,
        scope: &SearchScope,
    ) -> Result<Vec<SearchResultItem>> {
        self.bm25_search(query, top_k, scope)
    }

    async fn get_recent(&self, limit: usize) -> Result<Vec<SearchResultItem>> {
        self.recent_documents(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DIM: usize = 4;

    fn test_store() -> (SqliteGraphStore, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = SqliteGraphStore::open(dir.path(), DIM).unwrap();
        (store, dir)
    }

    fn doc(id: &str, path: &str, updated_at: i64) -> GraphNode {
        GraphNode {
            id: id.into(),
            node_type: NodeType::Document,
            label: id.into(),
            attributes: serde_json::json!({ "path": path }),
            created_at: updated_at,
            updated_at,
        }
    }

    fn tag(id: &str, label: &str) -> GraphNode {
        GraphNode {
            id: id.into(),
            node_type: NodeType::Tag,
            label: label.into(),
            attributes: serde_json::Value::Null,
            created_at: 0,
            updated_at: 0,
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

    #[tokio::test]
    async fn test_oversized_limits_stay_bounded() {
        assert_eq!(sql_limit(usize::MAX), i64::MAX);
        assert_eq!(sql_limit(7), 7);

        let (store, _dir) = test_store();
        store.upsert_node(&doc("a", "a.md", 1)).unwrap();
        store.upsert_node(&doc("b", "b.md", 2)).unwrap();
        store.add_edge(&edge("a", "b", EdgeType::Link)).unwrap();
        let edges = store.get_all_edges_for_node("a", usize::MAX).await.unwrap();
        assert_eq!(edges.len(), 1);
        assert_eq!(store.get_recent(usize::MAX).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_upsert_and_get_node() {
        let (store, _dir) = test_store();
        store.upsert_node(&doc("a", "notes/a.md", 10)).unwrap();

        let node = store.get_by_id("a").await.unwrap().unwrap();
        assert_eq!(node.path(), Some("notes/a.md"));
        assert!(store.get_by_id("missing").await.unwrap().is_none());

        let mut updated = doc("a", "notes/renamed.md", 20);
        updated.label = "Renamed".into();
        store.upsert_node(&updated).unwrap();
        let by_path = store.get_document_by_path("notes/renamed.md").await.unwrap().unwrap();
        assert_eq!(by_path.label, "Renamed");
        assert_eq!(store.get_stats().unwrap().total_nodes, 1);
    }

    #[tokio::test]
    async fn test_hard_orphans_exclude_any_edge() {
        let (store, _dir) = test_store();
        store.upsert_node(&doc("a", "a.md", 1)).unwrap();
        store.upsert_node(&doc("b", "b.md", 2)).unwrap();
        store.upsert_node(&doc("c", "c.md", 3)).unwrap();
        store.add_edge(&edge("b", "c", EdgeType::Link)).unwrap();

        let orphans = store.get_hard_orphans(10).await.unwrap();
        assert_eq!(orphans, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_hard_orphans_ignore_tags() {
        let (store, _dir) = test_store();
        store.upsert_node(&tag("t1", "rust")).unwrap();
        store.upsert_node(&doc("a", "a.md", 1)).unwrap();
        assert_eq!(store.get_hard_orphans(10).await.unwrap(), vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_edges_and_counts() {
        let (store, _dir) = test_store();
        for id in ["a", "b", "c"] {
            store.upsert_node(&doc(id, &format!("{}.md", id), 1)).unwrap();
        }
        store.add_edge(&edge("a", "b", EdgeType::Link)).unwrap();
        store.add_edge(&edge("c", "a", EdgeType::Link)).unwrap();
        store.add_edge(&edge("a", "c", EdgeType::Link)).unwrap();

        let edges = store.get_all_edges_for_node("a", 10).await.unwrap();
        assert_eq!(edges.len(), 3);
        assert_eq!(store.get_all_edges_for_node("a", 2).await.unwrap().len(), 2);

        let counts = store.count_edges(&["a".into()], None).await.unwrap();
        assert_eq!(counts, EdgeCounts { incoming: 1, outgoing: 2, total: 3 });

        let by_node = store
            .count_edges_by_node(&["a".into(), "b".into(), "zzz".into()])
            .await
            .unwrap();
        assert_eq!(by_node["b"].incoming, 1);
        assert_eq!(by_node["b"].outgoing, 0);
        assert_eq!(by_node["zzz"], EdgeCounts::default());
    }

    #[tokio::test]
    async fn test_count_edges_type_filter() {
        let (store, _dir) = test_store();
        store.upsert_node(&doc("a", "a.md", 1)).unwrap();
        store.upsert_node(&doc("b", "b.md", 1)).unwrap();
        store.upsert_node(&tag("t", "rust")).unwrap();
        store.add_edge(&edge("a", "b", EdgeType::Link)).unwrap();
        store.add_edge(&edge("a", "t", EdgeType::Tagged)).unwrap();

        let only_links = store
            .count_edges(&["a".into()], Some(&[EdgeType::Link]))
            .await
            .unwrap();
        assert_eq!(only_links.outgoing, 1);
    }

    #[tokio::test]
    async fn test_top_by_degree_documents_only() {
        let (store, _dir) = test_store();
        for id in ["a", "b", "c"] {
            store.upsert_node(&doc(id, &format!("{}.md", id), 1)).unwrap();
        }
        store.upsert_node(&tag("t", "rust")).unwrap();
        store.add_edge(&edge("a", "b", EdgeType::Link)).unwrap();
        store.add_edge(&edge("a", "c", EdgeType::Link)).unwrap();
        store.add_edge(&edge("b", "c", EdgeType::Link)).unwrap();
        store.add_edge(&edge("a", "t", EdgeType::Tagged)).unwrap();
        store.add_edge(&edge("b", "t", EdgeType::Tagged)).unwrap();

        let ranking = store.get_top_node_ids_by_degree(10, None).await.unwrap();
        assert_eq!(ranking.top_out[0].node_id, "a");
        assert_eq!(ranking.top_out[0].degree, 3);
        assert_eq!(ranking.top_in[0].node_id, "c");
        assert!(ranking.top_in.iter().all(|e| e.node_id != "t"));

        let restricted = store
            .get_top_node_ids_by_degree(10, Some(&["b".into()]))
            .await
            .unwrap();
        assert_eq!(restricted.top_out.len(), 1);
        assert_eq!(restricted.top_out[0].node_id, "b");
    }

    #[tokio::test]
    async fn test_sources_connected_to_all_targets() {
        let (store, _dir) = test_store();
        store.upsert_node(&doc("a", "a.md", 1)).unwrap();
        store.upsert_node(&doc("b", "b.md", 1)).unwrap();
        store.upsert_node(&tag("t1", "rust")).unwrap();
        store.upsert_node(&tag("t2", "async")).unwrap();
        store.add_edge(&edge("a", "t1", EdgeType::Tagged)).unwrap();
        store.add_edge(&edge("a", "t2", EdgeType::Tagged)).unwrap();
        store.add_edge(&edge("b", "t1", EdgeType::Tagged)).unwrap();

        let both = store
            .get_source_nodes_connected_to_all_targets(&["t1".into(), "t2".into()])
            .await
            .unwrap();
        assert_eq!(both, vec!["a".to_string()]);

        let top = store.get_top_tagged_nodes(5).await.unwrap();
        assert_eq!(top[0].node_id, "t1");
        assert_eq!(top[0].degree, 2);
    }

    #[tokio::test]
    async fn test_nodes_by_type_and_labels() {
        let (store, _dir) = test_store();
        store.upsert_node(&tag("t1", "rust")).unwrap();
        store.upsert_node(&tag("t2", "python")).unwrap();
        let found = store
            .get_by_type_and_labels(NodeType::Tag, &["rust".into(), "go".into()])
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "t1");
        let none = store
            .get_by_type_and_labels(NodeType::Category, &["rust".into()])
            .await
            .unwrap();
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_top_stat_omits_missing_signal() {
        let (store, _dir) = test_store();
        for id in ["a", "b", "c"] {
            store.upsert_node(&doc(id, &format!("{}.md", id), 1)).unwrap();
        }
        store
            .upsert_doc_statistics(&DocStatistics {
                doc_id: "a".into(),
                richness_score: 0.4,
                open_count: 0,
                ..Default::default()
            })
            .unwrap();
        store
            .upsert_doc_statistics(&DocStatistics {
                doc_id: "b".into(),
                richness_score: 0.9,
                open_count: 3,
                ..Default::default()
            })
            .unwrap();

        let ids: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        let rich = store.top_by_doc_ids(&ids, StatMetric::Richness, 10).await.unwrap();
        assert_eq!(rich, vec!["b".to_string(), "a".to_string()]);
        let opened = store.top_by_doc_ids(&ids, StatMetric::OpenCount, 10).await.unwrap();
        assert_eq!(opened, vec!["b".to_string()]);

        let stats = store.get_by_doc_ids(&ids).await.unwrap();
        assert_eq!(stats.len(), 2);
        assert_eq!(stats["b"].open_count, 3);
    }

    #[tokio::test]
    async fn test_average_embedding_and_similarity() {
        let (store, _dir) = test_store();
        store.upsert_node(&doc("a", "a.md", 1)).unwrap();
        store.upsert_node(&doc("b", "b.md", 1)).unwrap();
        store
            .add_chunk_embedding("a#0", "a", &Array1::from(vec![1.0, 0.0, 0.0, 0.0]))
            .unwrap();
        store
            .add_chunk_embedding("a#1", "a", &Array1::from(vec![0.0, 1.0, 0.0, 0.0]))
            .unwrap();
        store
            .add_chunk_embedding("b#0", "b", &Array1::from(vec![0.0, 0.0, 1.0, 0.0]))
            .unwrap();

        let avg = store.get_average_embedding_for_doc("a").await.unwrap().unwrap();
        assert!((avg[0] - 0.5).abs() < 0.01);
        assert!((avg[1] - 0.5).abs() < 0.01);
        assert!(store.get_average_embedding_for_doc("missing").await.unwrap().is_none());

        let hits = store.search_similar(&[1.0, 0.1, 0.0, 0.0], 3).await.unwrap();
        assert_eq!(hits.len(), 3);
        assert_eq!(hits[0].doc_id, "a");
        assert_eq!(hits[2].doc_id, "b");

        assert!(store.search_similar(&[1.0, 0.0], 3).await.is_err());
        assert!(store
            .add_chunk_embedding("x", "a", &Array1::from(vec![1.0]))
            .is_err());
    }

    #[tokio::test]
    async fn test_fulltext_search_and_scope() {
        let (store, _dir) = test_store();
        let mut a = doc("a", "projects/rust-notes.md", 1);
        a.label = "Rust ownership notes".into();
        let mut b = doc("b", "archive/rust-old.md", 2);
        b.label = "Old rust experiments".into();
        store.upsert_node(&a).unwrap();
        store.upsert_node(&b).unwrap();

        let all = store.fulltext_search("rust", 10, &SearchScope::All).await.unwrap();
        assert_eq!(all.len(), 2);

        let scoped = store
            .fulltext_search("rust", 10, &SearchScope::Folder("projects/".into()))
            .await
            .unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].id, "a");
        assert!(scoped[0].highlight.as_deref().unwrap_or("").contains("**"));

        let by_ids = store
            .vector_search("rust", 10, &SearchScope::Ids(vec!["b".into()]))
            .await
            .unwrap();
        assert_eq!(by_ids.len(), 1);
        assert_eq!(by_ids[0].id, "b");

        assert!(store.fulltext_search("   ", 10, &SearchScope::All).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recent_and_folder_listing() {
        let (store, _dir) = test_store();
        store.upsert_node(&doc("a", "daily/2024-01-01.md", 10)).unwrap();
        store.upsert_node(&doc("b", "daily/2024-01-02.md", 30)).unwrap();
        store.upsert_node(&doc("c", "projects/x.md", 20)).unwrap();

        let recent = store.get_recent(2).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, "b");
        assert_eq!(recent[1].id, "c");

        let daily = store.list_documents_under("daily/", 10).await.unwrap();
        assert_eq!(daily.len(), 2);
        assert_eq!(daily[0].id, "a");
    }
}
