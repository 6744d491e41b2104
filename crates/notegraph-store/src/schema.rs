//! Database schema SQL.

/// Core tables: nodes, edges, doc_statistics, chunk_embeddings.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS nodes (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    label TEXT NOT NULL,
    path TEXT,
    attributes_json TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_nodes_type_label ON nodes(type, label);
CREATE INDEX IF NOT EXISTS idx_nodes_path ON nodes(path);
CREATE INDEX IF NOT EXISTS idx_nodes_updated ON nodes(updated_at);

CREATE TABLE IF NOT EXISTS edges (
    from_node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    to_node_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    type TEXT NOT NULL,
    weight REAL NOT NULL DEFAULT 1.0,
    PRIMARY KEY (from_node_id, to_node_id, type)
);

CREATE INDEX IF NOT EXISTS idx_edges_from ON edges(from_node_id, type);
CREATE INDEX IF NOT EXISTS idx_edges_to ON edges(to_node_id, type);

CREATE TABLE IF NOT EXISTS doc_statistics (
    doc_id TEXT PRIMARY KEY REFERENCES nodes(id) ON DELETE CASCADE,
    richness_score REAL NOT NULL DEFAULT 0,
    open_count INTEGER NOT NULL DEFAULT 0,
    last_open_ts INTEGER NOT NULL DEFAULT 0,
    word_count INTEGER NOT NULL DEFAULT 0,
    char_count INTEGER NOT NULL DEFAULT 0,
    language TEXT
);

CREATE TABLE IF NOT EXISTS chunk_embeddings (
    chunk_id TEXT PRIMARY KEY,
    doc_id TEXT NOT NULL REFERENCES nodes(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    scale REAL NOT NULL,
    offset_val REAL NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_chunk_embeddings_doc ON chunk_embeddings(doc_id);
"#;

/// FTS5 virtual table over node labels and paths.
pub const FTS_SCHEMA_SQL: &str = r#"
CREATE VIRTUAL TABLE IF NOT EXISTS nodes_fts USING fts5(
    label, path,
    content='nodes', content_rowid='rowid',
    tokenize='porter unicode61'
);
"#;

/// Triggers to keep the FTS index in sync with the nodes table.
pub const FTS_TRIGGERS_SQL: &str = r#"
CREATE TRIGGER IF NOT EXISTS nodes_ai AFTER INSERT ON nodes BEGIN
    INSERT INTO nodes_fts(rowid, label, path)
    VALUES (new.rowid, new.label, COALESCE(new.path, ''));
END;

CREATE TRIGGER IF NOT EXISTS nodes_ad AFTER DELETE ON nodes BEGIN
    INSERT INTO nodes_fts(nodes_fts, rowid, label, path)
    VALUES ('delete', old.rowid, old.label, COALESCE(old.path, ''));
END;

CREATE TRIGGER IF NOT EXISTS nodes_au AFTER UPDATE ON nodes BEGIN
    INSERT INTO nodes_fts(nodes_fts, rowid, label, path)
    VALUES ('delete', old.rowid, old.label, COALESCE(old.path, ''));
    INSERT INTO nodes_fts(rowid, label, path)
    VALUES (new.rowid, new.label, COALESCE(new.path, ''));
END;
"#;
