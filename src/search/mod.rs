//! Search and ranking over stored memories

use std::collections::HashMap;

use crate::embedding::Embedder;
use crate::error::Result;
use crate::storage::queries::{list_memories, vector_search};
use crate::storage::Store;
use crate::types::{Cancellation, ListOptions, MemoryFilters, MemoryId, RecallResult};

/// Rank memories by semantic similarity to a query.
///
/// Candidates must match the scope exactly (when one is supplied) and carry
/// every tag in the filter. An empty query returns an empty list; a query the
/// embedder maps to the zero vector falls back to recency order.
pub fn recall(
    store: &Store,
    embedder: &dyn Embedder,
    query: &str,
    k: usize,
    filters: &MemoryFilters,
    cancel: &Cancellation,
) -> Result<Vec<RecallResult>> {
    if query.trim().is_empty() || k == 0 {
        return Ok(vec![]);
    }
    cancel.check()?;

    let query_embedding = embedder.embed(query)?;
    if query_embedding.iter().all(|&x| x == 0.0) {
        // Nothing to rank on; newest memories are the best guess
        let memories = store.with_connection(|conn| {
            list_memories(
                conn,
                &ListOptions {
                    tags: filters.tags.clone(),
                    scope: filters.scope.clone(),
                    limit: Some(k as i64),
                    ..Default::default()
                },
            )
        })?;
        return Ok(memories
            .into_iter()
            .map(|memory| RecallResult { memory, score: 0.0 })
            .collect());
    }

    store.with_connection(|conn| vector_search(conn, &query_embedding, filters, k, None, cancel))
}

/// Two-query retrieval: run both recalls independently, merge by summed
/// similarity (a hit on only one side keeps its single score), re-rank, and
/// return the top `k`.
pub fn compose(
    store: &Store,
    embedder: &dyn Embedder,
    query_a: &str,
    query_b: &str,
    k: usize,
    filters: &MemoryFilters,
    cancel: &Cancellation,
) -> Result<Vec<RecallResult>> {
    let hits_a = recall(store, embedder, query_a, k, filters, cancel)?;
    let hits_b = recall(store, embedder, query_b, k, filters, cancel)?;

    let mut merged: HashMap<MemoryId, RecallResult> = HashMap::new();
    for hit in hits_a.into_iter().chain(hits_b) {
        merged
            .entry(hit.memory.id.clone())
            .and_modify(|existing| existing.score += hit.score)
            .or_insert(hit);
    }

    let mut results: Vec<RecallResult> = merged.into_values().collect();
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| b.memory.created_at.cmp(&a.memory.created_at))
    });
    results.truncate(k);
    Ok(results)
}
