//! Citation rows
//!
//! Pure persistence; file verification and decay live in `crate::citations`.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::queries::{format_instant, parse_instant};
use crate::error::{map_sqlite, PhloemError, Result};
use crate::types::{Citation, CitationStatus};

fn citation_from_row(row: &Row) -> rusqlite::Result<Citation> {
    let status_str: String = row.get("status")?;
    let last_verified_at: String = row.get("last_verified_at")?;
    let created_at: String = row.get("created_at")?;
    Ok(Citation {
        id: row.get("id")?,
        memory_id: row.get("memory_id")?,
        file_path: row.get("file_path")?,
        start_line: row.get("start_line")?,
        end_line: row.get("end_line")?,
        snippet: row.get("snippet")?,
        confidence: row.get("confidence")?,
        status: status_str.parse().unwrap_or(CitationStatus::Drifted),
        last_verified_at: parse_instant(&last_verified_at),
        created_at: parse_instant(&created_at),
    })
}

const CITATION_COLUMNS: &str = "id, memory_id, file_path, start_line, end_line, snippet,
    confidence, status, last_verified_at, created_at";

/// Persist a citation row
pub fn insert_citation(conn: &Connection, citation: &Citation) -> Result<()> {
    conn.execute(
        "INSERT INTO citations (id, memory_id, file_path, start_line, end_line, snippet,
                                confidence, status, last_verified_at, created_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        params![
            citation.id,
            citation.memory_id,
            citation.file_path,
            citation.start_line,
            citation.end_line,
            citation.snippet,
            citation.confidence,
            citation.status.as_str(),
            format_instant(citation.last_verified_at),
            format_instant(citation.created_at),
        ],
    )
    .map_err(map_sqlite)?;
    Ok(())
}

/// Lookup by id
pub fn get_citation(conn: &Connection, id: &str) -> Result<Citation> {
    crate::types::validate_id(id)?;

    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {CITATION_COLUMNS} FROM citations WHERE id = ?"
        ))
        .map_err(map_sqlite)?;

    stmt.query_row([id], citation_from_row)
        .optional()
        .map_err(map_sqlite)?
        .ok_or_else(|| PhloemError::CitationNotFound(id.to_string()))
}

/// All citations owned by a memory, newest first
pub fn citations_for_memory(conn: &Connection, memory_id: &str) -> Result<Vec<Citation>> {
    let mut stmt = conn
        .prepare_cached(&format!(
            "SELECT {CITATION_COLUMNS} FROM citations
             WHERE memory_id = ? ORDER BY created_at DESC"
        ))
        .map_err(map_sqlite)?;

    let citations = stmt
        .query_map([memory_id], citation_from_row)
        .map_err(map_sqlite)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(citations)
}

/// Every citation in the store (for the decay sweep)
pub fn all_citations(conn: &Connection) -> Result<Vec<Citation>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CITATION_COLUMNS} FROM citations ORDER BY created_at"
        ))
        .map_err(map_sqlite)?;

    let citations = stmt
        .query_map([], citation_from_row)
        .map_err(map_sqlite)?
        .filter_map(|r| r.ok())
        .collect();
    Ok(citations)
}

/// Write back the result of a verification pass
pub fn update_verification(
    conn: &Connection,
    id: &str,
    status: CitationStatus,
    confidence: f32,
    verified_at: chrono::DateTime<chrono::Utc>,
) -> Result<()> {
    let updated = conn
        .execute(
            "UPDATE citations SET status = ?, confidence = ?, last_verified_at = ? WHERE id = ?",
            params![
                status.as_str(),
                confidence.clamp(0.0, 1.0),
                format_instant(verified_at),
                id
            ],
        )
        .map_err(map_sqlite)?;
    if updated == 0 {
        return Err(PhloemError::CitationNotFound(id.to_string()));
    }
    Ok(())
}

/// Delete a citation row
pub fn delete_citation(conn: &Connection, id: &str) -> Result<()> {
    let deleted = conn
        .execute("DELETE FROM citations WHERE id = ?", [id])
        .map_err(map_sqlite)?;
    if deleted == 0 {
        return Err(PhloemError::CitationNotFound(id.to_string()));
    }
    Ok(())
}
