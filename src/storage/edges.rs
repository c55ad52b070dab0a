//! Edge CRUD for the memory graph
//!
//! Edges are directed and labeled; `(source, target, kind)` is unique and a
//! later insert updates weight and reason in place.

use chrono::Utc;
use rusqlite::{params, Connection, Row};

use super::queries::{format_instant, parse_instant};
use crate::error::{map_sqlite, PhloemError, Result};
use crate::types::{Edge, EdgeKind};

fn edge_from_row(row: &Row) -> rusqlite::Result<Edge> {
    let kind_str: String = row.get("kind")?;
    let created_at: String = row.get("created_at")?;
    Ok(Edge {
        source_id: row.get("source_id")?,
        target_id: row.get("target_id")?,
        kind: kind_str.parse().unwrap_or(EdgeKind::Reference),
        weight: row.get("weight")?,
        reason: row.get("reason")?,
        created_at: parse_instant(&created_at),
    })
}

/// Insert or update an edge. Self-edges are rejected; weight is clamped to
/// [0, 1]. On conflict the existing row's weight and reason are replaced.
pub fn insert_edge(
    conn: &Connection,
    source_id: &str,
    target_id: &str,
    kind: EdgeKind,
    weight: f32,
    reason: Option<&str>,
) -> Result<Edge> {
    if source_id == target_id {
        return Err(PhloemError::Validation(
            "Self-edges are not allowed".to_string(),
        ));
    }
    let weight = weight.clamp(0.0, 1.0);
    let created_at = Utc::now();

    conn.execute(
        "INSERT INTO memory_edges (source_id, target_id, kind, weight, reason, created_at)
         VALUES (?, ?, ?, ?, ?, ?)
         ON CONFLICT(source_id, target_id, kind)
         DO UPDATE SET weight = excluded.weight, reason = excluded.reason",
        params![
            source_id,
            target_id,
            kind.as_str(),
            weight,
            reason,
            format_instant(created_at)
        ],
    )
    .map_err(map_sqlite)?;

    Ok(Edge {
        source_id: source_id.to_string(),
        target_id: target_id.to_string(),
        kind,
        weight,
        reason: reason.map(String::from),
        created_at,
    })
}

fn kind_clause(kind: Option<EdgeKind>) -> String {
    match kind {
        Some(k) => format!(" AND kind = '{}'", k.as_str()),
        None => String::new(),
    }
}

/// Edges leaving a memory, heaviest first
pub fn edges_from(conn: &Connection, source_id: &str, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
    let sql = format!(
        "SELECT source_id, target_id, kind, weight, reason, created_at
         FROM memory_edges WHERE source_id = ?{}
         ORDER BY weight DESC",
        kind_clause(kind)
    );
    let mut stmt = conn.prepare(&sql).map_err(map_sqlite)?;
    let edges = stmt
        .query_map([source_id], edge_from_row)
        .map_err(map_sqlite)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(edges)
}

/// Edges arriving at a memory, heaviest first
pub fn edges_to(conn: &Connection, target_id: &str, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
    let sql = format!(
        "SELECT source_id, target_id, kind, weight, reason, created_at
         FROM memory_edges WHERE target_id = ?{}
         ORDER BY weight DESC",
        kind_clause(kind)
    );
    let mut stmt = conn.prepare(&sql).map_err(map_sqlite)?;
    let edges = stmt
        .query_map([target_id], edge_from_row)
        .map_err(map_sqlite)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(edges)
}

/// All edges touching a memory in either direction
pub fn edges_for(conn: &Connection, memory_id: &str, kind: Option<EdgeKind>) -> Result<Vec<Edge>> {
    let sql = format!(
        "SELECT source_id, target_id, kind, weight, reason, created_at
         FROM memory_edges WHERE (source_id = ?1 OR target_id = ?1){}
         ORDER BY weight DESC",
        kind_clause(kind)
    );
    let mut stmt = conn.prepare(&sql).map_err(map_sqlite)?;
    let edges = stmt
        .query_map([memory_id], edge_from_row)
        .map_err(map_sqlite)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(edges)
}

/// Remove edges where an endpoint no longer exists
pub fn remove_orphaned_edges(conn: &Connection) -> Result<usize> {
    let count = conn
        .execute(
            "DELETE FROM memory_edges
             WHERE source_id NOT IN (SELECT id FROM memories)
                OR target_id NOT IN (SELECT id FROM memories)",
            [],
        )
        .map_err(map_sqlite)?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::{insert_memory, InsertMemory};
    use crate::storage::Store;

    fn seed(store: &Store, content: &str) -> String {
        let input = InsertMemory {
            content: content.to_string(),
            tags: vec![],
            context: None,
            scope: String::new(),
            embedding: vec![],
            model: "test".to_string(),
        };
        store
            .with_transaction(|conn| insert_memory(conn, &input))
            .unwrap()
            .memory
            .id
    }

    #[test]
    fn upsert_replaces_weight_and_reason() {
        let store = Store::open_in_memory().unwrap();
        let a = seed(&store, "a");
        let b = seed(&store, "b");

        store
            .with_transaction(|conn| {
                insert_edge(conn, &a, &b, EdgeKind::Causal, 0.4, Some("first"))
            })
            .unwrap();
        store
            .with_transaction(|conn| {
                insert_edge(conn, &a, &b, EdgeKind::Causal, 0.9, Some("second"))
            })
            .unwrap();

        let edges = store
            .with_connection(|conn| edges_from(conn, &a, Some(EdgeKind::Causal)))
            .unwrap();
        assert_eq!(edges.len(), 1);
        assert!((edges[0].weight - 0.9).abs() < f32::EPSILON);
        assert_eq!(edges[0].reason.as_deref(), Some("second"));
    }

    #[test]
    fn distinct_kinds_coexist() {
        let store = Store::open_in_memory().unwrap();
        let a = seed(&store, "a");
        let b = seed(&store, "b");

        store
            .with_transaction(|conn| insert_edge(conn, &a, &b, EdgeKind::Causal, 0.5, None))
            .unwrap();
        store
            .with_transaction(|conn| insert_edge(conn, &a, &b, EdgeKind::Temporal, 1.0, None))
            .unwrap();

        let edges = store.with_connection(|conn| edges_from(conn, &a, None)).unwrap();
        assert_eq!(edges.len(), 2);
    }

    #[test]
    fn self_edge_rejected() {
        let store = Store::open_in_memory().unwrap();
        let a = seed(&store, "a");
        let result = store
            .with_transaction(|conn| insert_edge(conn, &a, &a, EdgeKind::Semantic, 0.5, None));
        assert!(matches!(result, Err(PhloemError::Validation(_))));
    }

    #[test]
    fn weight_is_clamped() {
        let store = Store::open_in_memory().unwrap();
        let a = seed(&store, "a");
        let b = seed(&store, "b");
        let edge = store
            .with_transaction(|conn| insert_edge(conn, &a, &b, EdgeKind::Semantic, 1.7, None))
            .unwrap();
        assert!((edge.weight - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn edges_for_sees_both_directions() {
        let store = Store::open_in_memory().unwrap();
        let a = seed(&store, "a");
        let b = seed(&store, "b");
        let c = seed(&store, "c");

        store
            .with_transaction(|conn| insert_edge(conn, &a, &b, EdgeKind::Causal, 0.5, None))
            .unwrap();
        store
            .with_transaction(|conn| insert_edge(conn, &c, &a, EdgeKind::Temporal, 1.0, None))
            .unwrap();

        let edges = store.with_connection(|conn| edges_for(conn, &a, None)).unwrap();
        assert_eq!(edges.len(), 2);
    }
}
