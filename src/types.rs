//! Core types for Phloem

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Unique identifier for a memory (UUID v4, rendered as a string)
pub type MemoryId = String;

/// Unique identifier for a citation
pub type CitationId = String;

/// Maximum memory content size in bytes
pub const MAX_CONTENT_BYTES: usize = 1024 * 1024;

/// Maximum number of tags per memory
pub const MAX_TAGS: usize = 64;

/// A memory entry in the database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    /// Unique identifier
    pub id: MemoryId,
    /// Main content of the memory
    pub content: String,
    /// Tags for categorization
    #[serde(default)]
    pub tags: Vec<String>,
    /// Optional free-form context string (where the memory came from)
    pub context: Option<String>,
    /// Scope for isolation; empty string means global
    #[serde(default)]
    pub scope: String,
    /// When the memory was created
    pub created_at: DateTime<Utc>,
    /// When the memory was last updated
    pub updated_at: DateTime<Utc>,
    /// Content hash for deduplication (SHA256 of normalized content)
    pub content_hash: String,
}

/// Types of edges between memories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    Temporal,
    Causal,
    Semantic,
    Reference,
}

impl EdgeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EdgeKind::Temporal => "temporal",
            EdgeKind::Causal => "causal",
            EdgeKind::Semantic => "semantic",
            EdgeKind::Reference => "reference",
        }
    }

    pub fn all() -> &'static [EdgeKind] {
        &[
            EdgeKind::Temporal,
            EdgeKind::Causal,
            EdgeKind::Semantic,
            EdgeKind::Reference,
        ]
    }
}

impl std::str::FromStr for EdgeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "temporal" => Ok(EdgeKind::Temporal),
            "causal" => Ok(EdgeKind::Causal),
            "semantic" => Ok(EdgeKind::Semantic),
            "reference" => Ok(EdgeKind::Reference),
            _ => Err(format!("Unknown edge kind: {}", s)),
        }
    }
}

impl std::fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A directed labeled link between two memories
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source memory ID
    pub source_id: MemoryId,
    /// Target memory ID
    pub target_id: MemoryId,
    /// Kind of relationship
    pub kind: EdgeKind,
    /// Edge weight (0.0 - 1.0)
    pub weight: f32,
    /// Human-readable reason the edge exists
    pub reason: Option<String>,
    /// When the edge was created
    pub created_at: DateTime<Utc>,
}

/// Verification status of a citation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CitationStatus {
    #[default]
    Valid,
    Drifted,
    Missing,
}

impl CitationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CitationStatus::Valid => "valid",
            CitationStatus::Drifted => "drifted",
            CitationStatus::Missing => "missing",
        }
    }
}

impl std::str::FromStr for CitationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "valid" => Ok(CitationStatus::Valid),
            "drifted" => Ok(CitationStatus::Drifted),
            "missing" => Ok(CitationStatus::Missing),
            _ => Err(format!("Unknown citation status: {}", s)),
        }
    }
}

/// A stored link from a memory to an inclusive line range in a file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    /// Unique identifier
    pub id: CitationId,
    /// Owning memory
    pub memory_id: MemoryId,
    /// Absolute, normalized file path
    pub file_path: String,
    /// 1-based inclusive start line
    pub start_line: u32,
    /// 1-based inclusive end line (>= start_line)
    pub end_line: u32,
    /// File text captured at creation time
    pub snippet: Option<String>,
    /// Confidence that the citation still points at what it meant (0.0 - 1.0)
    pub confidence: f32,
    /// Verification status
    pub status: CitationStatus,
    /// When the citation was last verified against the file
    pub last_verified_at: DateTime<Utc>,
    /// When the citation was created
    pub created_at: DateTime<Utc>,
}

/// Filters shared by recall and list operations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemoryFilters {
    /// Candidates must carry ALL of these tags
    #[serde(default)]
    pub tags: Vec<String>,
    /// Exact-match scope filter; None or empty means no scope filtering
    pub scope: Option<String>,
}

impl MemoryFilters {
    /// Scope filter, treating the empty string as "unfiltered"
    pub fn scope_filter(&self) -> Option<&str> {
        self.scope.as_deref().filter(|s| !s.is_empty())
    }
}

/// Options for listing memories
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListOptions {
    #[serde(default)]
    pub tags: Vec<String>,
    pub scope: Option<String>,
    /// Only memories created at or after this instant
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// A ranked recall hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecallResult {
    pub memory: Memory,
    /// Cosine similarity to the query (0 when the query embedded to zero)
    pub score: f32,
}

/// Statistics about the memory store
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct StoreStats {
    pub total_memories: i64,
    pub total_tags: i64,
    pub total_edges: i64,
    pub total_citations: i64,
    pub db_size_bytes: i64,
    pub schema_version: i32,
    pub last_activity_at: Option<DateTime<Utc>>,
    /// Memory counts per scope
    pub scopes: Vec<(String, i64)>,
    /// Most frequent tags with counts
    pub top_tags: Vec<(String, i64)>,
}

/// Kinds of causal graph traversal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraversalKind {
    /// Memories connected by any edge in either direction
    Neighbors,
    /// BFS over incoming edges (what led to this memory)
    Ancestors,
    /// BFS over outgoing edges (what this memory led to)
    Descendants,
}

impl std::str::FromStr for TraversalKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "neighbors" => Ok(TraversalKind::Neighbors),
            "ancestors" => Ok(TraversalKind::Ancestors),
            "descendants" => Ok(TraversalKind::Descendants),
            _ => Err(format!("Unknown traversal kind: {}", s)),
        }
    }
}

/// A traversal hit with the BFS depth it was found at
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraversalResult {
    pub memory: Memory,
    /// Hops from the starting memory (1 = directly connected)
    pub depth: u32,
    /// Kind of the edge this node was reached through
    pub edge_kind: EdgeKind,
    /// Weight of the edge this node was reached through
    pub edge_weight: f32,
}

/// Tag validation error
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagError {
    Empty,
    TooLong,
    InvalidChars,
}

impl std::fmt::Display for TagError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TagError::Empty => write!(f, "Tag cannot be empty"),
            TagError::TooLong => write!(f, "Tag exceeds {} characters", MAX_TAG_LENGTH),
            TagError::InvalidChars => write!(
                f,
                "Tag can only contain lowercase letters, numbers, and - _ . + #"
            ),
        }
    }
}

impl std::error::Error for TagError {}

/// Maximum tag length
pub const MAX_TAG_LENGTH: usize = 64;

/// Normalize and validate a tag token
///
/// Rules:
/// - Trim whitespace and convert to lowercase
/// - Only allow [a-z0-9] plus `-`, `_`, `.`, `+`, `#`
/// - Max 64 characters
pub fn normalize_tag(s: &str) -> Result<String, TagError> {
    let normalized = s.trim().to_lowercase();

    if normalized.is_empty() {
        return Err(TagError::Empty);
    }

    if normalized.len() > MAX_TAG_LENGTH {
        return Err(TagError::TooLong);
    }

    if !normalized.chars().all(|c| {
        c.is_ascii_lowercase()
            || c.is_ascii_digit()
            || matches!(c, '-' | '_' | '.' | '+' | '#')
    }) {
        return Err(TagError::InvalidChars);
    }

    Ok(normalized)
}

/// Normalize a tag list: validate each token, drop duplicates, preserve order.
pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>, TagError> {
    let mut out: Vec<String> = Vec::with_capacity(tags.len());
    for tag in tags {
        let normalized = normalize_tag(tag)?;
        if !out.contains(&normalized) {
            out.push(normalized);
        }
    }
    Ok(out)
}

/// Cooperative cancellation with an optional deadline.
///
/// Long operations call [`Cancellation::check`] between units of work; a
/// tripped flag or expired deadline surfaces as `PhloemError::Cancelled` and
/// rolls back any containing transaction.
#[derive(Debug, Clone, Default)]
pub struct Cancellation {
    flag: Option<Arc<AtomicBool>>,
    deadline: Option<Instant>,
}

impl Cancellation {
    /// A cancellation that never fires
    pub fn none() -> Self {
        Self::default()
    }

    /// Cancellation driven by a shared flag
    pub fn with_flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag: Some(flag),
            deadline: None,
        }
    }

    /// Cancellation that fires after the given duration
    pub fn with_timeout(timeout: std::time::Duration) -> Self {
        Self {
            flag: None,
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// Returns an error if the operation should stop
    pub fn check(&self) -> crate::error::Result<()> {
        if let Some(flag) = &self.flag {
            if flag.load(Ordering::Relaxed) {
                return Err(crate::error::PhloemError::Cancelled);
            }
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(crate::error::PhloemError::Cancelled);
            }
        }
        Ok(())
    }
}

/// Validate that a string is a well-formed memory/citation id
pub fn validate_id(id: &str) -> crate::error::Result<()> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| crate::error::PhloemError::Validation(format!("Invalid id format: {}", id)))
}

/// Mint a new opaque identifier
pub fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_normalization() {
        assert_eq!(normalize_tag("  Rust  ").unwrap(), "rust");
        assert_eq!(normalize_tag("c++").unwrap(), "c++");
        assert_eq!(normalize_tag("f#").unwrap(), "f#");
        assert_eq!(normalize_tag("dot.case_ok-1").unwrap(), "dot.case_ok-1");
        assert_eq!(normalize_tag(""), Err(TagError::Empty));
        assert_eq!(normalize_tag("has space"), Err(TagError::InvalidChars));
        assert_eq!(normalize_tag(&"x".repeat(65)), Err(TagError::TooLong));
    }

    #[test]
    fn tag_list_dedupes() {
        let tags = vec!["Rust".to_string(), "rust".to_string(), "db".to_string()];
        assert_eq!(normalize_tags(&tags).unwrap(), vec!["rust", "db"]);
    }

    #[test]
    fn edge_kind_roundtrip() {
        for kind in EdgeKind::all() {
            let parsed: EdgeKind = kind.as_str().parse().unwrap();
            assert_eq!(*kind, parsed);
        }
    }

    #[test]
    fn id_validation() {
        let id = new_id();
        assert!(validate_id(&id).is_ok());
        assert!(validate_id("not-a-uuid").is_err());
    }

    #[test]
    fn cancellation_deadline_fires() {
        let cancel = Cancellation::with_timeout(std::time::Duration::from_secs(0));
        assert!(cancel.check().is_err());
        assert!(Cancellation::none().check().is_ok());
    }
}
