//! Causal extraction and graph traversal
//!
//! Every insert is scanned for causal phrasing ("because X", "so that X", ...)
//! and each captured clause is matched against existing memories in the same
//! scope; a strong enough match becomes a weighted `causal` edge. A `temporal`
//! edge always links the previous memory in the scope to the new one.

use std::collections::{HashSet, VecDeque};

use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::EngineConfig;
use crate::embedding::Embedder;
use crate::error::Result;
use crate::storage::queries::{get_memory, previous_in_scope, vector_search_scoped};
use crate::storage::{edges, Store};
use crate::types::{
    Cancellation, Edge, EdgeKind, Memory, TraversalKind, TraversalResult,
};

/// Maximum length of a captured clause
const MAX_PHRASE_CHARS: usize = 200;

/// Minimum length of a captured clause
const MIN_PHRASE_CHARS: usize = 3;

/// A causal clause extracted from memory content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CausalPhrase {
    /// The captured clause X, used as the recall query
    pub phrase: String,
    /// The full matched text including the marker, stored as the edge reason
    pub reason: String,
}

static CAUSAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    // Longest markers first so "in order to" never matches as a bare "to"
    Regex::new(
        r"(?i)\b(in order to|caused by|so that|led to|due to|because|after|since)\s+([^.!?;\n]+)",
    )
    .expect("causal pattern compiles")
});

/// Scan content for causal phrase patterns.
///
/// Captures are trimmed, truncated to 200 characters, required to be at least
/// 3 characters, and deduplicated case-insensitively. Extraction is pure and
/// idempotent.
pub fn extract_causal_phrases(content: &str) -> Vec<CausalPhrase> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut phrases = Vec::new();

    for captures in CAUSAL_PATTERN.captures_iter(content) {
        let marker = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
        let raw = captures.get(2).map(|m| m.as_str()).unwrap_or_default();

        let clause: String = raw.trim().chars().take(MAX_PHRASE_CHARS).collect();
        let clause = clause.trim_end().to_string();
        if clause.chars().count() < MIN_PHRASE_CHARS {
            continue;
        }
        if !seen.insert(clause.to_lowercase()) {
            continue;
        }

        phrases.push(CausalPhrase {
            reason: format!("{} {}", marker, clause),
            phrase: clause,
        });
    }

    phrases
}

/// Edges created while linking a freshly inserted memory
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct LinkReport {
    pub temporal: Option<Edge>,
    pub causal: Vec<Edge>,
}

/// Link a just-inserted memory into the graph.
///
/// Inserts a `temporal` edge from the previous memory in the same scope, then
/// one `causal` edge per extracted phrase whose best same-scope match clears
/// the similarity floor. Runs inside the caller's insert transaction so a
/// failed insert leaves no edges behind.
pub fn link_memory(
    conn: &rusqlite::Connection,
    embedder: &dyn Embedder,
    config: &EngineConfig,
    memory: &Memory,
    cancel: &Cancellation,
) -> Result<LinkReport> {
    let mut report = LinkReport::default();

    if let Some(previous_id) = previous_in_scope(conn, memory)? {
        let edge = edges::insert_edge(conn, &previous_id, &memory.id, EdgeKind::Temporal, 1.0, None)?;
        report.temporal = Some(edge);
    }

    for phrase in extract_causal_phrases(&memory.content) {
        cancel.check()?;

        let query_embedding = embedder.embed(&phrase.phrase)?;
        if query_embedding.iter().all(|&x| x == 0.0) {
            continue;
        }

        let matches = vector_search_scoped(
            conn,
            &query_embedding,
            &memory.scope,
            1,
            Some(&memory.id),
            cancel,
        )?;
        let Some(best) = matches.first() else {
            continue;
        };
        if best.score <= config.causal_floor {
            continue;
        }

        let edge = edges::insert_edge(
            conn,
            &memory.id,
            &best.memory.id,
            EdgeKind::Causal,
            best.score,
            Some(&phrase.reason),
        )?;
        tracing::debug!(
            source = %memory.id,
            target = %best.memory.id,
            score = best.score,
            "causal edge from phrase match"
        );
        report.causal.push(edge);
    }

    Ok(report)
}

/// Traverse the edge graph around a memory.
///
/// `Neighbors` returns everything one edge away in either direction.
/// `Ancestors` walks incoming edges breadth-first; `Descendants` walks
/// outgoing ones. Both BFS modes honour the depth and node budget and guard
/// against cycles with a visited set. Results are ordered by BFS depth, ties
/// by edge weight descending.
pub fn causal_query(
    store: &Store,
    memory_id: &str,
    kind: TraversalKind,
    config: &EngineConfig,
    cancel: &Cancellation,
) -> Result<Vec<TraversalResult>> {
    store.with_connection(|conn| {
        // Missing start nodes surface as not-found, not an empty result
        get_memory(conn, memory_id)?;

        match kind {
            TraversalKind::Neighbors => neighbors(conn, memory_id),
            TraversalKind::Ancestors => bfs(conn, memory_id, Direction::Incoming, config, cancel),
            TraversalKind::Descendants => bfs(conn, memory_id, Direction::Outgoing, config, cancel),
        }
    })
}

/// One entry per edge: a neighbor linked both temporally and causally shows
/// up once per kind.
fn neighbors(conn: &rusqlite::Connection, memory_id: &str) -> Result<Vec<TraversalResult>> {
    let mut results: Vec<TraversalResult> = Vec::new();

    for edge in edges::edges_for(conn, memory_id, None)? {
        let other = if edge.source_id == memory_id {
            &edge.target_id
        } else {
            &edge.source_id
        };
        let memory = get_memory(conn, other)?;
        results.push(TraversalResult {
            memory,
            depth: 1,
            edge_kind: edge.kind,
            edge_weight: edge.weight,
        });
    }

    results.sort_by(|a, b| {
        b.edge_weight
            .partial_cmp(&a.edge_weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    Ok(results)
}

enum Direction {
    Incoming,
    Outgoing,
}

fn bfs(
    conn: &rusqlite::Connection,
    start: &str,
    direction: Direction,
    config: &EngineConfig,
    cancel: &Cancellation,
) -> Result<Vec<TraversalResult>> {
    let mut visited: HashSet<String> = HashSet::new();
    visited.insert(start.to_string());

    let mut queue: VecDeque<(String, u32)> = VecDeque::new();
    queue.push_back((start.to_string(), 0));

    let mut results: Vec<TraversalResult> = Vec::new();

    while let Some((node, depth)) = queue.pop_front() {
        if depth >= config.traversal_depth {
            continue;
        }
        cancel.check()?;

        let edges = match direction {
            Direction::Incoming => edges::edges_to(conn, &node, None)?,
            Direction::Outgoing => edges::edges_from(conn, &node, None)?,
        };

        for edge in edges {
            if results.len() >= config.traversal_budget {
                return Ok(order_traversal(results));
            }
            let next = match direction {
                Direction::Incoming => edge.source_id.clone(),
                Direction::Outgoing => edge.target_id.clone(),
            };
            if !visited.insert(next.clone()) {
                continue;
            }
            let memory = get_memory(conn, &next)?;
            results.push(TraversalResult {
                memory,
                depth: depth + 1,
                edge_kind: edge.kind,
                edge_weight: edge.weight,
            });
            queue.push_back((next, depth + 1));
        }
    }

    Ok(order_traversal(results))
}

fn order_traversal(mut results: Vec<TraversalResult>) -> Vec<TraversalResult> {
    results.sort_by(|a, b| {
        a.depth.cmp(&b.depth).then_with(|| {
            b.edge_weight
                .partial_cmp(&a.edge_weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    results
}
