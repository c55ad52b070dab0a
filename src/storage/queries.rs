//! Database queries for memory operations

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};
use sha2::{Digest, Sha256};

use crate::embedding::{cosine_similarity, embedding_from_bytes};
use crate::error::{map_sqlite, PhloemError, Result};
use crate::types::*;

/// Rows checked between cancellation probes during vector scans
const SCAN_CHECK_INTERVAL: usize = 256;

/// Input for inserting a memory
#[derive(Debug, Clone)]
pub struct InsertMemory {
    pub content: String,
    pub tags: Vec<String>,
    pub context: Option<String>,
    pub scope: String,
    pub embedding: Vec<f32>,
    pub model: String,
}

/// Result of an insert: the stored record, and whether it was newly created
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub memory: Memory,
    pub created: bool,
}

/// What a delete removed alongside the memory itself
#[derive(Debug, Clone, serde::Serialize)]
pub struct DeleteReport {
    pub edges_removed: i64,
    pub citations_removed: i64,
}

/// Render an instant in the fixed-width format the schema sorts on
pub fn format_instant(instant: DateTime<Utc>) -> String {
    instant.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse a stored instant, defaulting to now on corruption
pub fn parse_instant(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Parse a memory from a database row
pub fn memory_from_row(row: &Row) -> rusqlite::Result<Memory> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(Memory {
        id: row.get("id")?,
        content: row.get("content")?,
        tags: vec![], // Loaded separately
        context: row.get("context")?,
        scope: row.get("scope")?,
        created_at: parse_instant(&created_at),
        updated_at: parse_instant(&updated_at),
        content_hash: row.get("content_hash")?,
    })
}

const MEMORY_COLUMNS: &str =
    "id, content, context, content_hash, seq, created_at, updated_at, scope";

/// Load tags for a memory
pub fn load_tags(conn: &Connection, memory_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT t.name FROM tags t
             JOIN memory_tags mt ON t.id = mt.tag_id
             WHERE mt.memory_id = ?
             ORDER BY t.name",
        )
        .map_err(map_sqlite)?;

    let tags: Vec<String> = stmt
        .query_map([memory_id], |row| row.get(0))
        .map_err(map_sqlite)?
        .filter_map(|r| r.ok())
        .collect();

    Ok(tags)
}

/// Compute SHA256 hash of normalized content for deduplication
pub fn compute_content_hash(content: &str) -> String {
    // Normalize: collapse whitespace, trim
    let normalized = content.split_whitespace().collect::<Vec<_>>().join(" ");

    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("sha256:{}", hex::encode(hasher.finalize()))
}

/// Find a memory by content hash within a scope (exact duplicate detection)
pub fn find_by_content_hash(
    conn: &Connection,
    scope: &str,
    content_hash: &str,
) -> Result<Option<Memory>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories
             WHERE scope = ? AND content_hash = ?
             LIMIT 1"
        ))
        .map_err(map_sqlite)?;

    let result = stmt
        .query_row(params![scope, content_hash], memory_from_row)
        .optional()
        .map_err(map_sqlite)?;

    if let Some(mut memory) = result {
        memory.tags = load_tags(conn, &memory.id)?;
        Ok(Some(memory))
    } else {
        Ok(None)
    }
}

fn validate_insert(input: &InsertMemory) -> Result<()> {
    if input.content.trim().is_empty() {
        return Err(PhloemError::Validation("Content cannot be empty".into()));
    }
    if input.content.len() > MAX_CONTENT_BYTES {
        return Err(PhloemError::Validation(format!(
            "Content exceeds {} bytes",
            MAX_CONTENT_BYTES
        )));
    }
    if input.tags.len() > MAX_TAGS {
        return Err(PhloemError::Validation(format!(
            "Too many tags (max {})",
            MAX_TAGS
        )));
    }
    Ok(())
}

/// Insert a memory with its tags and embedding in one transaction scope.
///
/// Deduplicates on `(scope, content_hash)`: inserting content identical to an
/// existing memory in the same scope returns the existing record unchanged.
/// `created_at` is strictly increasing within a scope; a global `seq` counter
/// breaks clock ties.
pub fn insert_memory(conn: &Connection, input: &InsertMemory) -> Result<InsertOutcome> {
    validate_insert(input)?;
    let tags = normalize_tags(&input.tags).map_err(|e| PhloemError::Validation(e.to_string()))?;

    let content_hash = compute_content_hash(&input.content);
    if let Some(existing) = find_by_content_hash(conn, &input.scope, &content_hash)? {
        return Ok(InsertOutcome {
            memory: existing,
            created: false,
        });
    }

    let mut created_at = Utc::now();
    let last_in_scope: Option<String> = conn
        .query_row(
            "SELECT created_at FROM memories WHERE scope = ?
             ORDER BY created_at DESC, seq DESC LIMIT 1",
            [&input.scope],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sqlite)?;
    if let Some(last_raw) = last_in_scope {
        let last = parse_instant(&last_raw);
        if created_at <= last {
            created_at = last + chrono::Duration::microseconds(1);
        }
    }

    let seq: i64 = conn
        .query_row("SELECT COALESCE(MAX(seq), 0) + 1 FROM memories", [], |row| {
            row.get(0)
        })
        .map_err(map_sqlite)?;

    let id = new_id();
    let instant = format_instant(created_at);

    conn.execute(
        "INSERT INTO memories (id, content, context, content_hash, seq, created_at, updated_at, scope)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            id,
            input.content,
            input.context,
            content_hash,
            seq,
            instant,
            instant,
            input.scope
        ],
    )
    .map_err(map_sqlite)?;

    for tag in &tags {
        conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?)", [tag])
            .map_err(map_sqlite)?;
        conn.execute(
            "INSERT OR IGNORE INTO memory_tags (memory_id, tag_id)
             SELECT ?, id FROM tags WHERE name = ?",
            params![id, tag],
        )
        .map_err(map_sqlite)?;
    }

    if !input.embedding.is_empty() {
        conn.execute(
            "INSERT INTO embeddings (memory_id, embedding, model, dimensions)
             VALUES (?, ?, ?, ?)",
            params![
                id,
                crate::embedding::embedding_to_bytes(&input.embedding),
                input.model,
                input.embedding.len() as i64
            ],
        )
        .map_err(map_sqlite)?;
    }

    if !input.scope.is_empty() {
        conn.execute(
            "INSERT OR IGNORE INTO scopes (name, created_at) VALUES (?, ?)",
            params![input.scope, instant],
        )
        .map_err(map_sqlite)?;
    }

    let memory = Memory {
        id,
        content: input.content.clone(),
        tags,
        context: input.context.clone(),
        scope: input.scope.clone(),
        created_at,
        updated_at: created_at,
        content_hash,
    };

    Ok(InsertOutcome {
        memory,
        created: true,
    })
}

/// Lookup by id
pub fn get_memory(conn: &Connection, id: &str) -> Result<Memory> {
    validate_id(id)?;

    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {MEMORY_COLUMNS} FROM memories WHERE id = ?"
        ))
        .map_err(map_sqlite)?;

    let mut memory = stmt
        .query_row([id], memory_from_row)
        .optional()
        .map_err(map_sqlite)?
        .ok_or_else(|| PhloemError::NotFound(id.to_string()))?;

    memory.tags = load_tags(conn, id)?;
    Ok(memory)
}

/// Delete by id. Edges and citations cascade; the report says how many went.
pub fn delete_memory(conn: &Connection, id: &str) -> Result<DeleteReport> {
    validate_id(id)?;

    let edges: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM memory_edges WHERE source_id = ? OR target_id = ?",
            params![id, id],
            |row| row.get(0),
        )
        .map_err(map_sqlite)?;
    let citations: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM citations WHERE memory_id = ?",
            [id],
            |row| row.get(0),
        )
        .map_err(map_sqlite)?;

    let removed = conn
        .execute("DELETE FROM memories WHERE id = ?", [id])
        .map_err(map_sqlite)?;
    if removed == 0 {
        return Err(PhloemError::NotFound(id.to_string()));
    }

    Ok(DeleteReport {
        edges_removed: edges,
        citations_removed: citations,
    })
}

/// SQL fragment requiring a memory to carry ALL of the given tags
fn tag_filter_clause(tags: &[String]) -> (String, Vec<String>) {
    let placeholders = vec!["?"; tags.len()].join(", ");
    let clause = format!(
        "id IN (SELECT mt.memory_id FROM memory_tags mt
                JOIN tags t ON t.id = mt.tag_id
                WHERE t.name IN ({placeholders})
                GROUP BY mt.memory_id
                HAVING COUNT(DISTINCT t.name) = {})",
        tags.len()
    );
    (clause, tags.to_vec())
}

/// List memories with filters, newest first
pub fn list_memories(conn: &Connection, options: &ListOptions) -> Result<Vec<Memory>> {
    let mut conditions: Vec<String> = Vec::new();
    let mut bind: Vec<String> = Vec::new();

    if let Some(scope) = options.scope.as_deref().filter(|s| !s.is_empty()) {
        conditions.push("scope = ?".to_string());
        bind.push(scope.to_string());
    }
    if let Some(since) = options.since {
        conditions.push("created_at >= ?".to_string());
        bind.push(format_instant(since));
    }
    if !options.tags.is_empty() {
        let tags =
            normalize_tags(&options.tags).map_err(|e| PhloemError::Validation(e.to_string()))?;
        let (clause, params) = tag_filter_clause(&tags);
        conditions.push(clause);
        bind.extend(params);
    }

    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };
    let limit = options.limit.unwrap_or(50).max(0);
    let offset = options.offset.unwrap_or(0).max(0);

    let sql = format!(
        "SELECT {MEMORY_COLUMNS} FROM memories {where_clause}
         ORDER BY created_at DESC, seq DESC
         LIMIT {limit} OFFSET {offset}"
    );

    let mut stmt = conn.prepare(&sql).map_err(map_sqlite)?;
    let mut memories: Vec<Memory> = stmt
        .query_map(params_from_iter(bind.iter()), memory_from_row)
        .map_err(map_sqlite)?
        .filter_map(|r| r.ok())
        .collect();

    for memory in &mut memories {
        memory.tags = load_tags(conn, &memory.id)?;
    }
    Ok(memories)
}

/// Load the stored embedding for a memory
pub fn get_embedding(conn: &Connection, memory_id: &str) -> Result<Option<Vec<f32>>> {
    let blob: Option<Vec<u8>> = conn
        .query_row(
            "SELECT embedding FROM embeddings WHERE memory_id = ?",
            [memory_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sqlite)?;
    Ok(blob.map(|bytes| embedding_from_bytes(&bytes)))
}

/// Top-k memories by cosine similarity against a query vector.
///
/// Candidates are pre-filtered by scope equality and tag conjunction, then
/// scored in a single scan. Ties break toward the most recent memory.
pub fn vector_search(
    conn: &Connection,
    query_embedding: &[f32],
    filters: &MemoryFilters,
    k: usize,
    exclude_id: Option<&str>,
    cancel: &Cancellation,
) -> Result<Vec<RecallResult>> {
    let mut conditions: Vec<String> = Vec::new();
    let mut bind: Vec<String> = Vec::new();

    if let Some(scope) = filters.scope_filter() {
        conditions.push("m.scope = ?".to_string());
        bind.push(scope.to_string());
    }
    if !filters.tags.is_empty() {
        let tags =
            normalize_tags(&filters.tags).map_err(|e| PhloemError::Validation(e.to_string()))?;
        let (clause, params) = tag_filter_clause(&tags);
        conditions.push(format!("m.{}", clause));
        bind.extend(params);
    }
    if let Some(exclude) = exclude_id {
        conditions.push("m.id != ?".to_string());
        bind.push(exclude.to_string());
    }

    scan_ranked(conn, query_embedding, conditions, bind, k, cancel)
}

/// Like [`vector_search`], but the scope matches exactly even when it is the
/// empty (global) scope. Used by causal auto-linking, which must never cross
/// scope boundaries.
pub fn vector_search_scoped(
    conn: &Connection,
    query_embedding: &[f32],
    scope: &str,
    k: usize,
    exclude_id: Option<&str>,
    cancel: &Cancellation,
) -> Result<Vec<RecallResult>> {
    let mut conditions = vec!["m.scope = ?".to_string()];
    let mut bind = vec![scope.to_string()];
    if let Some(exclude) = exclude_id {
        conditions.push("m.id != ?".to_string());
        bind.push(exclude.to_string());
    }
    scan_ranked(conn, query_embedding, conditions, bind, k, cancel)
}

fn scan_ranked(
    conn: &Connection,
    query_embedding: &[f32],
    conditions: Vec<String>,
    bind: Vec<String>,
    k: usize,
    cancel: &Cancellation,
) -> Result<Vec<RecallResult>> {
    let where_clause = if conditions.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", conditions.join(" AND "))
    };

    let sql = format!(
        "SELECT m.id, m.content, m.context, m.content_hash, m.seq,
                m.created_at, m.updated_at, m.scope, e.embedding
         FROM memories m
         JOIN embeddings e ON e.memory_id = m.id
         {where_clause}"
    );

    let mut stmt = conn.prepare(&sql).map_err(map_sqlite)?;
    let mut rows = stmt
        .query(params_from_iter(bind.iter()))
        .map_err(map_sqlite)?;

    let mut scored: Vec<(f32, i64, Memory)> = Vec::new();
    let mut scanned = 0usize;
    while let Some(row) = rows.next().map_err(map_sqlite)? {
        scanned += 1;
        if scanned % SCAN_CHECK_INTERVAL == 0 {
            cancel.check()?;
        }

        let memory = memory_from_row(row).map_err(map_sqlite)?;
        let seq: i64 = row.get("seq").map_err(map_sqlite)?;
        let blob: Vec<u8> = row.get("embedding").map_err(map_sqlite)?;
        let embedding = embedding_from_bytes(&blob);
        let score = cosine_similarity(query_embedding, &embedding);
        scored.push((score, seq, memory));
    }

    scored.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.2.created_at.cmp(&a.2.created_at))
            .then_with(|| b.1.cmp(&a.1))
    });
    scored.truncate(k);

    let mut results = Vec::with_capacity(scored.len());
    for (score, _, mut memory) in scored {
        memory.tags = load_tags(conn, &memory.id)?;
        results.push(RecallResult { memory, score });
    }
    Ok(results)
}

/// Aggregate store statistics (db size and schema version filled by caller)
pub fn collect_stats(conn: &Connection) -> Result<StoreStats> {
    let total_memories: i64 = conn
        .query_row("SELECT COUNT(*) FROM memories", [], |row| row.get(0))
        .map_err(map_sqlite)?;
    let total_tags: i64 = conn
        .query_row("SELECT COUNT(*) FROM tags", [], |row| row.get(0))
        .map_err(map_sqlite)?;
    let total_edges: i64 = conn
        .query_row("SELECT COUNT(*) FROM memory_edges", [], |row| row.get(0))
        .map_err(map_sqlite)?;
    let total_citations: i64 = conn
        .query_row("SELECT COUNT(*) FROM citations", [], |row| row.get(0))
        .map_err(map_sqlite)?;

    let last_activity_at: Option<String> = conn
        .query_row("SELECT MAX(updated_at) FROM memories", [], |row| row.get(0))
        .map_err(map_sqlite)?;

    let mut stmt = conn
        .prepare(
            "SELECT scope, COUNT(*) FROM memories GROUP BY scope ORDER BY COUNT(*) DESC",
        )
        .map_err(map_sqlite)?;
    let scopes: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(map_sqlite)?
        .filter_map(|r| r.ok())
        .collect();

    let mut stmt = conn
        .prepare(
            "SELECT t.name, COUNT(*) FROM tags t
             JOIN memory_tags mt ON mt.tag_id = t.id
             GROUP BY t.name ORDER BY COUNT(*) DESC LIMIT 10",
        )
        .map_err(map_sqlite)?;
    let top_tags: Vec<(String, i64)> = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
        .map_err(map_sqlite)?
        .filter_map(|r| r.ok())
        .collect();

    Ok(StoreStats {
        total_memories,
        total_tags,
        total_edges,
        total_citations,
        db_size_bytes: 0,
        schema_version: super::migrations::SCHEMA_VERSION,
        last_activity_at: last_activity_at.as_deref().map(parse_instant),
        scopes,
        top_tags,
    })
}

/// The memory immediately preceding `memory` in its scope, if any
pub fn previous_in_scope(conn: &Connection, memory: &Memory) -> Result<Option<MemoryId>> {
    let instant = format_instant(memory.created_at);
    let id: Option<String> = conn
        .query_row(
            "SELECT id FROM memories
             WHERE scope = ? AND id != ? AND created_at < ?
             ORDER BY created_at DESC, seq DESC LIMIT 1",
            params![memory.scope, memory.id, instant],
            |row| row.get(0),
        )
        .optional()
        .map_err(map_sqlite)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{Embedder, LocalEmbedder};
    use crate::storage::Store;

    fn insert(store: &Store, content: &str, scope: &str, tags: &[&str]) -> InsertOutcome {
        let embedder = LocalEmbedder::default();
        let input = InsertMemory {
            content: content.to_string(),
            tags: tags.iter().map(|s| s.to_string()).collect(),
            context: None,
            scope: scope.to_string(),
            embedding: embedder.embed(content).unwrap(),
            model: embedder.model_name().to_string(),
        };
        store
            .with_transaction(|conn| insert_memory(conn, &input))
            .unwrap()
    }

    #[test]
    fn insert_and_get_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        let outcome = insert(&store, "the sky is blue", "", &["weather", "sky"]);
        assert!(outcome.created);

        let fetched = store
            .with_connection(|conn| get_memory(conn, &outcome.memory.id))
            .unwrap();
        assert_eq!(fetched.content, "the sky is blue");
        assert_eq!(fetched.tags, vec!["sky", "weather"]);
    }

    #[test]
    fn duplicate_content_same_scope_dedupes() {
        let store = Store::open_in_memory().unwrap();
        let first = insert(&store, "same thing", "repo", &[]);
        let second = insert(&store, "same thing", "repo", &[]);
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.memory.id, second.memory.id);
    }

    #[test]
    fn duplicate_content_different_scope_is_distinct() {
        let store = Store::open_in_memory().unwrap();
        let a = insert(&store, "same thing", "scope-a", &[]);
        let b = insert(&store, "same thing", "scope-b", &[]);
        assert_ne!(a.memory.id, b.memory.id);
    }

    #[test]
    fn created_at_strictly_increases_in_scope() {
        let store = Store::open_in_memory().unwrap();
        let mut previous: Option<DateTime<Utc>> = None;
        for i in 0..5 {
            let outcome = insert(&store, &format!("memory {}", i), "s", &[]);
            if let Some(prev) = previous {
                assert!(outcome.memory.created_at > prev);
            }
            previous = Some(outcome.memory.created_at);
        }
    }

    #[test]
    fn validation_rejects_bad_input() {
        let store = Store::open_in_memory().unwrap();
        let embedder = LocalEmbedder::default();

        let empty = InsertMemory {
            content: "   ".to_string(),
            tags: vec![],
            context: None,
            scope: String::new(),
            embedding: vec![],
            model: embedder.model_name().to_string(),
        };
        let result = store.with_transaction(|conn| insert_memory(conn, &empty));
        assert!(matches!(result, Err(PhloemError::Validation(_))));

        let too_many_tags = InsertMemory {
            content: "ok".to_string(),
            tags: (0..65).map(|i| format!("tag{}", i)).collect(),
            context: None,
            scope: String::new(),
            embedding: vec![],
            model: embedder.model_name().to_string(),
        };
        let result = store.with_transaction(|conn| insert_memory(conn, &too_many_tags));
        assert!(matches!(result, Err(PhloemError::Validation(_))));
    }

    #[test]
    fn delete_cascades_and_reports() {
        let store = Store::open_in_memory().unwrap();
        let a = insert(&store, "first", "s", &[]).memory;
        let b = insert(&store, "second", "s", &[]).memory;

        store
            .with_transaction(|conn| {
                super::super::edges::insert_edge(
                    conn,
                    &a.id,
                    &b.id,
                    EdgeKind::Temporal,
                    1.0,
                    None,
                )
            })
            .unwrap();

        let report = store
            .with_transaction(|conn| delete_memory(conn, &b.id))
            .unwrap();
        assert_eq!(report.edges_removed, 1);

        let edges: i64 = store
            .with_connection(|conn| {
                conn.query_row("SELECT COUNT(*) FROM memory_edges", [], |row| row.get(0))
                    .map_err(map_sqlite)
            })
            .unwrap();
        assert_eq!(edges, 0);

        let result = store.with_connection(|conn| get_memory(conn, &b.id));
        assert!(matches!(result, Err(PhloemError::NotFound(_))));
    }

    #[test]
    fn list_filters_by_scope_tags_and_since() {
        let store = Store::open_in_memory().unwrap();
        insert(&store, "tagged one", "s", &["alpha", "beta"]);
        insert(&store, "tagged two", "s", &["alpha"]);
        insert(&store, "other scope", "t", &["alpha", "beta"]);

        let both = store
            .with_connection(|conn| {
                list_memories(
                    conn,
                    &ListOptions {
                        tags: vec!["alpha".into(), "beta".into()],
                        scope: Some("s".into()),
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        assert_eq!(both.len(), 1);
        assert_eq!(both[0].content, "tagged one");

        let future = Utc::now() + chrono::Duration::days(1);
        let none = store
            .with_connection(|conn| {
                list_memories(
                    conn,
                    &ListOptions {
                        since: Some(future),
                        ..Default::default()
                    },
                )
            })
            .unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn vector_search_ranks_by_similarity() {
        let store = Store::open_in_memory().unwrap();
        let embedder = LocalEmbedder::default();
        insert(&store, "rust borrow checker lifetimes", "", &[]);
        insert(&store, "postgres connection pooling", "", &[]);

        let query = embedder.embed("rust lifetimes").unwrap();
        let results = store
            .with_connection(|conn| {
                vector_search(
                    conn,
                    &query,
                    &MemoryFilters::default(),
                    5,
                    None,
                    &Cancellation::none(),
                )
            })
            .unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].memory.content.contains("rust"));
        assert!(results[0].score > results[1].score);
    }

    #[test]
    fn stats_counts_everything() {
        let store = Store::open_in_memory().unwrap();
        insert(&store, "one", "repo", &["t1"]);
        insert(&store, "two", "repo", &["t1", "t2"]);

        let stats = store.with_connection(collect_stats).unwrap();
        assert_eq!(stats.total_memories, 2);
        assert_eq!(stats.total_tags, 2);
        assert_eq!(stats.scopes, vec![("repo".to_string(), 2)]);
        assert_eq!(stats.top_tags[0], ("t1".to_string(), 2));
        assert!(stats.last_activity_at.is_some());
    }
}
