//! Citation management: linking memories to file ranges and keeping the
//! links honest
//!
//! A citation stores the snippet it pointed at. Verification re-reads the
//! file and compares: byte-equal text nudges confidence back toward 1.0,
//! drift discounts it by token-set similarity, a missing file zeroes it.
//! The decay sweep additionally applies exponential age decay.

use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};

use chrono::Utc;

use crate::config::EngineConfig;
use crate::error::{PhloemError, Result};
use crate::storage::{citations as rows, queries, Store};
use crate::types::{Cancellation, Citation, CitationStatus};

/// Confidence gained per clean verification
const VERIFY_NUDGE: f32 = 0.1;

/// Confidence multiplier when the cited line range no longer exists
const RANGE_GONE_PENALTY: f32 = 0.5;

/// Snippet similarity below this marks the citation as drifted
const DRIFT_THRESHOLD: f32 = 0.8;

/// Aggregate result of verifying every citation of one memory
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct MemoryVerification {
    pub total: usize,
    pub valid: usize,
    pub drifted: usize,
    pub missing: usize,
    pub average_confidence: f32,
}

/// Result of a decay sweep over all citations
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct DecayReport {
    pub verified: usize,
    pub decayed: usize,
    pub pruned: usize,
}

/// Normalize a citation path and enforce traversal limits.
///
/// The path is tilde-expanded, made absolute against the working directory,
/// and lexically normalized. Inputs whose `..` segments climb out of the home
/// directory are rejected, and when a working root is configured the final
/// path must stay under it.
pub fn normalize_citation_path(raw: &str, config: &EngineConfig) -> Result<PathBuf> {
    if raw.trim().is_empty() {
        return Err(PhloemError::Validation("File path cannot be empty".into()));
    }

    let expanded = shellexpand::tilde(raw).to_string();
    let absolute = if Path::new(&expanded).is_absolute() {
        PathBuf::from(&expanded)
    } else {
        std::env::current_dir()
            .map_err(PhloemError::Io)?
            .join(&expanded)
    };

    let home = dirs::home_dir();
    let started_in_home = home
        .as_deref()
        .map(|h| absolute.starts_with(h))
        .unwrap_or(false);
    let normalized = lexical_normalize(&absolute)?;

    // A path rooted inside the home directory must not .. its way out of it
    if started_in_home && !normalized.starts_with(home.as_deref().unwrap_or(Path::new("/"))) {
        return Err(PhloemError::Validation(format!(
            "Path escapes the home directory: {}",
            raw
        )));
    }

    if let Some(root) = &config.working_root {
        if !normalized.starts_with(root) {
            return Err(PhloemError::Validation(format!(
                "Path is outside the working root: {}",
                raw
            )));
        }
    }

    Ok(normalized)
}

/// Resolve `.` and `..` without touching the filesystem
fn lexical_normalize(path: &Path) -> Result<PathBuf> {
    let mut parts: Vec<Component> = Vec::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(parts.last(), Some(Component::Normal(_))) {
                    parts.pop();
                } else {
                    return Err(PhloemError::Validation(format!(
                        "Path traversal above the filesystem root: {}",
                        path.display()
                    )));
                }
            }
            other => parts.push(other),
        }
    }
    Ok(parts.iter().collect())
}

/// What a file range read produced
enum RangeRead {
    Missing,
    OutOfRange,
    Text(String),
}

fn read_range(path: &Path, start_line: u32, end_line: u32) -> Result<RangeRead> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RangeRead::Missing),
        Err(e) => return Err(PhloemError::io_at(path.to_path_buf(), e)),
    };

    let lines: Vec<&str> = content.lines().collect();
    if (end_line as usize) > lines.len() {
        return Ok(RangeRead::OutOfRange);
    }
    let slice = &lines[(start_line as usize - 1)..(end_line as usize)];
    Ok(RangeRead::Text(slice.join("\n")))
}

/// Token-set Jaccard similarity between two snippets
pub fn snippet_similarity(a: &str, b: &str) -> f32 {
    let tokens = |text: &str| -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    };

    let set_a = tokens(a);
    let set_b = tokens(b);
    if set_a.is_empty() && set_b.is_empty() {
        return 1.0;
    }
    let intersection = set_a.intersection(&set_b).count() as f32;
    let union = set_a.union(&set_b).count() as f32;
    if union == 0.0 {
        0.0
    } else {
        intersection / union
    }
}

/// Create a citation on a memory.
///
/// When no snippet is supplied the cited range is read from disk and captured
/// as the baseline for future verification. Initial confidence is 1.0.
pub fn add_citation(
    store: &Store,
    memory_id: &str,
    file_path: &str,
    start_line: u32,
    end_line: u32,
    snippet: Option<String>,
) -> Result<Citation> {
    if start_line == 0 || end_line < start_line {
        return Err(PhloemError::Validation(format!(
            "Invalid line range {}-{} (lines are 1-based, start <= end)",
            start_line, end_line
        )));
    }

    let path = normalize_citation_path(file_path, store.config())?;

    let snippet = match snippet {
        Some(s) => Some(s),
        None => match read_range(&path, start_line, end_line)? {
            RangeRead::Text(text) => Some(text),
            RangeRead::Missing => {
                return Err(PhloemError::io_at(
                    path.clone(),
                    std::io::Error::new(std::io::ErrorKind::NotFound, "file not found"),
                ))
            }
            RangeRead::OutOfRange => {
                return Err(PhloemError::Validation(format!(
                    "{} has fewer than {} lines",
                    path.display(),
                    end_line
                )))
            }
        },
    };

    let now = Utc::now();
    let citation = Citation {
        id: crate::types::new_id(),
        memory_id: memory_id.to_string(),
        file_path: path.to_string_lossy().into_owned(),
        start_line,
        end_line,
        snippet,
        confidence: 1.0,
        status: CitationStatus::Valid,
        last_verified_at: now,
        created_at: now,
    };

    store.with_write(|conn| {
        // Owner must exist; FK alone would give an opaque constraint error
        queries::get_memory(conn, memory_id)?;
        rows::insert_citation(conn, &citation)?;
        Ok(())
    })?;

    Ok(citation)
}

/// Re-read the cited file and refresh status and confidence
pub fn verify_citation(store: &Store, citation_id: &str) -> Result<Citation> {
    let citation = store.with_connection(|conn| rows::get_citation(conn, citation_id))?;
    let updated = verify_against_disk(&citation)?;

    store.with_write(|conn| {
        rows::update_verification(
            conn,
            &updated.id,
            updated.status,
            updated.confidence,
            updated.last_verified_at,
        )
    })?;
    Ok(updated)
}

/// Pure verification step: compare a citation against the file on disk
fn verify_against_disk(citation: &Citation) -> Result<Citation> {
    let mut updated = citation.clone();
    updated.last_verified_at = Utc::now();

    match read_range(
        Path::new(&citation.file_path),
        citation.start_line,
        citation.end_line,
    )? {
        RangeRead::Missing => {
            updated.status = CitationStatus::Missing;
            updated.confidence = 0.0;
        }
        RangeRead::OutOfRange => {
            updated.status = CitationStatus::Drifted;
            updated.confidence = (citation.confidence * RANGE_GONE_PENALTY).clamp(0.0, 1.0);
        }
        RangeRead::Text(current) => match &citation.snippet {
            Some(stored) if stored == &current => {
                updated.status = CitationStatus::Valid;
                updated.confidence = (citation.confidence + VERIFY_NUDGE).min(1.0);
            }
            Some(stored) => {
                let similarity = snippet_similarity(stored, &current);
                updated.confidence =
                    (citation.confidence * (0.5 + 0.5 * similarity)).clamp(0.0, 1.0);
                updated.status = if similarity < DRIFT_THRESHOLD {
                    CitationStatus::Drifted
                } else {
                    CitationStatus::Valid
                };
            }
            None => {
                // No baseline; adopt the current text as one
                updated.snippet = Some(current);
                updated.status = CitationStatus::Valid;
                updated.confidence = (citation.confidence + VERIFY_NUDGE).min(1.0);
            }
        },
    }

    Ok(updated)
}

/// Verify every citation owned by a memory and aggregate the outcome
pub fn verify_memory(store: &Store, memory_id: &str) -> Result<MemoryVerification> {
    store.with_connection(|conn| queries::get_memory(conn, memory_id))?;
    let citations = store.with_connection(|conn| rows::citations_for_memory(conn, memory_id))?;

    let mut report = MemoryVerification {
        total: citations.len(),
        ..Default::default()
    };
    let mut confidence_sum = 0.0f32;

    for citation in &citations {
        let updated = verify_against_disk(citation)?;
        store.with_write(|conn| {
            rows::update_verification(
                conn,
                &updated.id,
                updated.status,
                updated.confidence,
                updated.last_verified_at,
            )
        })?;
        confidence_sum += updated.confidence;
        match updated.status {
            CitationStatus::Valid => report.valid += 1,
            CitationStatus::Drifted => report.drifted += 1,
            CitationStatus::Missing => report.missing += 1,
        }
    }

    if report.total > 0 {
        report.average_confidence = confidence_sum / report.total as f32;
    }
    Ok(report)
}

/// Background sweep: re-verify every citation and apply exponential age
/// decay (`exp(-lambda * days since last verification)`). Citations that fall
/// below the confidence floor are deleted when `prune` is set.
pub fn decay(store: &Store, prune: bool, cancel: &Cancellation) -> Result<DecayReport> {
    let citations = store.with_connection(rows::all_citations)?;
    let config = store.config().clone();
    let now = Utc::now();
    let mut report = DecayReport::default();

    for citation in citations {
        cancel.check()?;

        let mut updated = verify_against_disk(&citation)?;
        report.verified += 1;

        let age_days =
            (now - citation.last_verified_at).num_seconds().max(0) as f64 / 86_400.0;
        let factor = (-config.decay_lambda * age_days).exp() as f32;
        if factor < 1.0 {
            updated.confidence = (updated.confidence * factor).clamp(0.0, 1.0);
            report.decayed += 1;
        }

        if prune && updated.confidence < config.confidence_floor {
            store.with_write(|conn| rows::delete_citation(conn, &updated.id))?;
            report.pruned += 1;
            continue;
        }

        store.with_write(|conn| {
            rows::update_verification(
                conn,
                &updated.id,
                updated.status,
                updated.confidence,
                updated.last_verified_at,
            )
        })?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::queries::{insert_memory, InsertMemory};
    use std::io::Write;

    fn seed_memory(store: &Store) -> String {
        store
            .with_transaction(|conn| {
                insert_memory(
                    conn,
                    &InsertMemory {
                        content: "memory with a citation".to_string(),
                        tags: vec![],
                        context: None,
                        scope: String::new(),
                        embedding: vec![],
                        model: "test".to_string(),
                    },
                )
            })
            .unwrap()
            .memory
            .id
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn add_captures_snippet_from_disk() {
        let store = Store::open_in_memory().unwrap();
        let memory_id = seed_memory(&store);
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "f.go", "line one\nline two\nline three\n");

        let citation =
            add_citation(&store, &memory_id, path.to_str().unwrap(), 1, 2, None).unwrap();
        assert_eq!(citation.snippet.as_deref(), Some("line one\nline two"));
        assert_eq!(citation.status, CitationStatus::Valid);
        assert!((citation.confidence - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn invalid_line_ranges_rejected() {
        let store = Store::open_in_memory().unwrap();
        let memory_id = seed_memory(&store);

        let zero = add_citation(&store, &memory_id, "/tmp/x", 0, 1, Some("s".into()));
        assert!(matches!(zero, Err(PhloemError::Validation(_))));

        let backwards = add_citation(&store, &memory_id, "/tmp/x", 5, 2, Some("s".into()));
        assert!(matches!(backwards, Err(PhloemError::Validation(_))));
    }

    #[test]
    fn verify_detects_drift() {
        let store = Store::open_in_memory().unwrap();
        let memory_id = seed_memory(&store);
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "f.go", "hello\nhello\nhello\n");

        let citation =
            add_citation(&store, &memory_id, path.to_str().unwrap(), 1, 3, None).unwrap();

        std::fs::write(&path, "world\nworld\nworld\n").unwrap();
        let verified = verify_citation(&store, &citation.id).unwrap();
        assert_eq!(verified.status, CitationStatus::Drifted);
        assert!(verified.confidence < 1.0);
    }

    #[test]
    fn verify_rewards_unchanged_files() {
        let store = Store::open_in_memory().unwrap();
        let memory_id = seed_memory(&store);
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "f.rs", "fn main() {}\n");

        let mut citation =
            add_citation(&store, &memory_id, path.to_str().unwrap(), 1, 1, None).unwrap();
        // Knock the confidence down, then watch a clean verify restore some
        store
            .with_write(|conn| {
                rows::update_verification(
                    conn,
                    &citation.id,
                    CitationStatus::Drifted,
                    0.6,
                    Utc::now(),
                )
            })
            .unwrap();

        citation = verify_citation(&store, &citation.id).unwrap();
        assert_eq!(citation.status, CitationStatus::Valid);
        assert!((citation.confidence - 0.7).abs() < 0.001);
    }

    #[test]
    fn verify_zeroes_missing_files() {
        let store = Store::open_in_memory().unwrap();
        let memory_id = seed_memory(&store);
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "gone.rs", "x\n");

        let citation =
            add_citation(&store, &memory_id, path.to_str().unwrap(), 1, 1, None).unwrap();
        std::fs::remove_file(&path).unwrap();

        let verified = verify_citation(&store, &citation.id).unwrap();
        assert_eq!(verified.status, CitationStatus::Missing);
        assert_eq!(verified.confidence, 0.0);
    }

    #[test]
    fn verify_halves_on_vanished_range() {
        let store = Store::open_in_memory().unwrap();
        let memory_id = seed_memory(&store);
        let dir = tempfile::tempdir().unwrap();
        let path = write_file(&dir, "f.rs", "a\nb\nc\nd\n");

        let citation =
            add_citation(&store, &memory_id, path.to_str().unwrap(), 3, 4, None).unwrap();
        std::fs::write(&path, "a\n").unwrap();

        let verified = verify_citation(&store, &citation.id).unwrap();
        assert_eq!(verified.status, CitationStatus::Drifted);
        assert!((verified.confidence - 0.5).abs() < 0.001);
    }

    #[test]
    fn verify_memory_aggregates() {
        let store = Store::open_in_memory().unwrap();
        let memory_id = seed_memory(&store);
        let dir = tempfile::tempdir().unwrap();
        let kept = write_file(&dir, "kept.rs", "stable\n");
        let gone = write_file(&dir, "gone.rs", "volatile\n");

        add_citation(&store, &memory_id, kept.to_str().unwrap(), 1, 1, None).unwrap();
        add_citation(&store, &memory_id, gone.to_str().unwrap(), 1, 1, None).unwrap();
        std::fs::remove_file(&gone).unwrap();

        let report = verify_memory(&store, &memory_id).unwrap();
        assert_eq!(report.total, 2);
        assert_eq!(report.valid, 1);
        assert_eq!(report.missing, 1);
    }

    #[test]
    fn decay_sweep_prunes_below_floor() {
        let store = Store::open_in_memory().unwrap();
        let memory_id = seed_memory(&store);
        let dir = tempfile::tempdir().unwrap();
        let kept = write_file(&dir, "kept.rs", "stable\n");
        let gone = write_file(&dir, "gone.rs", "volatile\n");

        add_citation(&store, &memory_id, kept.to_str().unwrap(), 1, 1, None).unwrap();
        add_citation(&store, &memory_id, gone.to_str().unwrap(), 1, 1, None).unwrap();
        std::fs::remove_file(&gone).unwrap();

        // Missing file zeroes confidence, which is below the prune floor
        let report = decay(&store, true, &Cancellation::none()).unwrap();
        assert_eq!(report.verified, 2);
        assert_eq!(report.pruned, 1);

        let remaining = store.with_connection(rows::all_citations).unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].file_path.ends_with("kept.rs"));
    }

    #[test]
    fn jaccard_similarity_bounds() {
        assert!((snippet_similarity("a b c", "a b c") - 1.0).abs() < f32::EPSILON);
        assert_eq!(snippet_similarity("alpha", "omega"), 0.0);
        let partial = snippet_similarity("rate limit auth", "rate limit deploy");
        assert!(partial > 0.0 && partial < 1.0);
    }

    #[test]
    fn path_normalization_rules() {
        let config = EngineConfig::default();
        let normalized = normalize_citation_path("/tmp/./a/b/../f.go", &config).unwrap();
        assert_eq!(normalized, PathBuf::from("/tmp/a/f.go"));

        // .. climbing out of home is rejected
        let escape = normalize_citation_path("~/../../etc/passwd", &config);
        assert!(escape.is_err());

        // Working root confines citations
        let rooted = EngineConfig {
            working_root: Some(PathBuf::from("/srv/project")),
            ..Default::default()
        };
        assert!(normalize_citation_path("/srv/project/src/main.rs", &rooted).is_ok());
        assert!(normalize_citation_path("/etc/passwd", &rooted).is_err());
    }
}
