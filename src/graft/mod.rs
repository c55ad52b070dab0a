//! Graft container codec
//!
//! A graft is a portable bundle of curated memories:
//!
//! ```text
//! offset  size     field
//! 0       4 bytes  magic "PHLO"
//! 4       1 byte   format version
//! 5       ...      gzip-compressed JSON payload
//! ```
//!
//! Grafts carry data only; the decoder rejects payloads with unknown
//! top-level keys, and imported memories go through the normal insert path so
//! deduplication applies.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::embedding::Embedder;
use crate::error::{PhloemError, Result};
use crate::storage::{citations as citation_rows, queries, Store};
use crate::types::{Citation, CitationStatus, Memory};

/// Container magic: "PHLO"
pub const GRAFT_MAGIC: [u8; 4] = [0x50, 0x48, 0x4C, 0x4F];

/// Current container format version
pub const GRAFT_VERSION: u8 = 0x01;

/// Graft manifest, readable without importing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraftManifest {
    pub id: String,
    pub name: String,
    pub description: String,
    pub author: String,
    pub version: String,
    pub created_at: DateTime<Utc>,
    pub memory_count: usize,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// A memory as exported into a graft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraftMemory {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    pub context: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Memory> for GraftMemory {
    fn from(memory: &Memory) -> Self {
        Self {
            id: memory.id.clone(),
            content: memory.content.clone(),
            tags: memory.tags.clone(),
            context: memory.context.clone(),
            created_at: memory.created_at,
            updated_at: memory.updated_at,
        }
    }
}

/// A citation as exported into a graft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraftCitation {
    pub memory_id: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub snippet: Option<String>,
}

impl From<&Citation> for GraftCitation {
    fn from(citation: &Citation) -> Self {
        Self {
            memory_id: citation.memory_id.clone(),
            file_path: citation.file_path.clone(),
            start_line: citation.start_line,
            end_line: citation.end_line,
            snippet: citation.snippet.clone(),
        }
    }
}

/// The decompressed payload of a graft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GraftPayload {
    pub manifest: GraftManifest,
    pub memories: Vec<GraftMemory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citations: Option<Vec<GraftCitation>>,
}

/// Result of importing a graft into a store
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub deduplicated: usize,
    pub citations_imported: usize,
}

/// Write a graft file: header plus gzip-compressed JSON payload.
///
/// The manifest's `memory_count` is forced to match the memory list.
pub fn package(
    mut manifest: GraftManifest,
    memories: Vec<GraftMemory>,
    citations: Option<Vec<GraftCitation>>,
    out_path: &Path,
) -> Result<GraftPayload> {
    manifest.memory_count = memories.len();
    let payload = GraftPayload {
        manifest,
        memories,
        citations,
    };

    let json = serde_json::to_vec(&payload)?;

    let mut bytes = Vec::with_capacity(json.len() / 2 + 5);
    bytes.extend_from_slice(&GRAFT_MAGIC);
    bytes.push(GRAFT_VERSION);

    let mut encoder = GzEncoder::new(&mut bytes, Compression::default());
    encoder
        .write_all(&json)
        .and_then(|_| encoder.finish().map(|_| ()))
        .map_err(|e| PhloemError::io_at(out_path.to_path_buf(), e))?;

    std::fs::write(out_path, &bytes).map_err(|e| PhloemError::io_at(out_path.to_path_buf(), e))?;
    tracing::info!(path = %out_path.display(), memories = payload.memories.len(), "packaged graft");
    Ok(payload)
}

/// Read only the manifest of a graft file
pub fn inspect(path: &Path) -> Result<GraftManifest> {
    Ok(unpack(path)?.manifest)
}

/// Read and validate a graft file.
///
/// Checks magic, version, gzip integrity, JSON shape (unknown top-level keys
/// rejected), and that the manifest count matches the memory list.
pub fn unpack(path: &Path) -> Result<GraftPayload> {
    let bytes = std::fs::read(path).map_err(|e| PhloemError::io_at(path.to_path_buf(), e))?;

    if bytes.len() < 5 {
        return Err(PhloemError::Graft(format!(
            "{} is too short to be a graft",
            path.display()
        )));
    }
    if bytes[0..4] != GRAFT_MAGIC {
        return Err(PhloemError::Graft(format!(
            "{} has no PHLO magic",
            path.display()
        )));
    }
    let version = bytes[4];
    if version == 0 || version > GRAFT_VERSION {
        return Err(PhloemError::Graft(format!(
            "Unsupported graft version {} (max {})",
            version, GRAFT_VERSION
        )));
    }

    let mut decoder = GzDecoder::new(&bytes[5..]);
    let mut json = Vec::new();
    decoder
        .read_to_end(&mut json)
        .map_err(|_| PhloemError::Graft(format!("{} payload is not valid gzip", path.display())))?;

    let payload: GraftPayload = serde_json::from_slice(&json)
        .map_err(|e| PhloemError::Graft(format!("Malformed graft payload: {}", e)))?;

    if payload.manifest.memory_count != payload.memories.len() {
        return Err(PhloemError::Graft(format!(
            "Manifest declares {} memories but payload has {}",
            payload.manifest.memory_count,
            payload.memories.len()
        )));
    }

    Ok(payload)
}

/// Import a graft payload into the store under a target scope.
///
/// Each memory goes through the normal insert path, so `(scope, content
/// hash)` deduplication applies; citations import only when their owning
/// memory does, re-keyed to the id the insert produced.
pub fn import(
    store: &Store,
    embedder: &dyn Embedder,
    payload: &GraftPayload,
    scope: &str,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let mut id_map: HashMap<String, String> = HashMap::new();

    for graft_memory in &payload.memories {
        let embedding = embedder.embed(&graft_memory.content)?;
        let outcome = store.with_write(|conn| {
            queries::insert_memory(
                conn,
                &queries::InsertMemory {
                    content: graft_memory.content.clone(),
                    tags: graft_memory.tags.clone(),
                    context: graft_memory.context.clone(),
                    scope: scope.to_string(),
                    embedding: embedding.clone(),
                    model: embedder.model_name().to_string(),
                },
            )
        })?;
        if outcome.created {
            report.imported += 1;
        } else {
            report.deduplicated += 1;
        }
        id_map.insert(graft_memory.id.clone(), outcome.memory.id);
    }

    if let Some(citations) = &payload.citations {
        let now = Utc::now();
        for graft_citation in citations {
            let Some(owner_id) = id_map.get(&graft_citation.memory_id) else {
                continue;
            };
            let citation = Citation {
                id: crate::types::new_id(),
                memory_id: owner_id.clone(),
                file_path: graft_citation.file_path.clone(),
                start_line: graft_citation.start_line,
                end_line: graft_citation.end_line,
                snippet: graft_citation.snippet.clone(),
                confidence: 1.0,
                status: CitationStatus::Valid,
                last_verified_at: now,
                created_at: now,
            };
            store.with_write(|conn| citation_rows::insert_citation(conn, &citation))?;
            report.citations_imported += 1;
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::LocalEmbedder;

    fn sample_payload(count: usize) -> (GraftManifest, Vec<GraftMemory>) {
        let now = Utc::now();
        let manifest = GraftManifest {
            id: crate::types::new_id(),
            name: "sample".to_string(),
            description: "sample graft".to_string(),
            author: "tester".to_string(),
            version: "1.0.0".to_string(),
            created_at: now,
            memory_count: count,
            tags: vec!["architecture".to_string()],
        };
        let memories = (0..count)
            .map(|i| GraftMemory {
                id: crate::types::new_id(),
                content: format!("exported memory number {}", i),
                tags: vec!["architecture".to_string()],
                context: None,
                created_at: now,
                updated_at: now,
            })
            .collect();
        (manifest, memories)
    }

    #[test]
    fn pack_unpack_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.graft");
        let (manifest, memories) = sample_payload(5);

        let packed = package(manifest, memories, None, &path).unwrap();
        let unpacked = unpack(&path).unwrap();
        assert_eq!(packed, unpacked);

        let inspected = inspect(&path).unwrap();
        assert_eq!(inspected.memory_count, 5);
        assert_eq!(inspected.name, "sample");
    }

    #[test]
    fn header_layout_is_fixed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.graft");
        let (manifest, memories) = sample_payload(1);
        package(manifest, memories, None, &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[0..4], b"PHLO");
        assert_eq!(bytes[4], 0x01);
    }

    #[test]
    fn rejects_bad_magic_and_future_versions() {
        let dir = tempfile::tempdir().unwrap();

        let bad_magic = dir.path().join("bad.graft");
        std::fs::write(&bad_magic, b"NOPE\x01rest").unwrap();
        assert!(matches!(unpack(&bad_magic), Err(PhloemError::Graft(_))));

        let path = dir.path().join("future.graft");
        let (manifest, memories) = sample_payload(1);
        package(manifest, memories, None, &path).unwrap();
        let mut bytes = std::fs::read(&path).unwrap();
        bytes[4] = 0x7F;
        std::fs::write(&path, &bytes).unwrap();
        assert!(matches!(unpack(&path), Err(PhloemError::Graft(_))));
    }

    #[test]
    fn rejects_count_mismatch_and_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.graft");

        let (mut manifest, memories) = sample_payload(2);
        manifest.memory_count = 99;
        // package() corrects the count; forge the container by hand
        let payload = serde_json::json!({
            "manifest": serde_json::to_value(&manifest).unwrap(),
            "memories": serde_json::to_value(&memories).unwrap(),
        });
        write_forged(&path, &payload);
        assert!(matches!(unpack(&path), Err(PhloemError::Graft(_))));

        let (manifest, memories) = sample_payload(1);
        let payload = serde_json::json!({
            "manifest": serde_json::to_value(&manifest).unwrap(),
            "memories": serde_json::to_value(&memories).unwrap(),
            "executable": "rm -rf /",
        });
        write_forged(&path, &payload);
        assert!(matches!(unpack(&path), Err(PhloemError::Graft(_))));
    }

    fn write_forged(path: &Path, payload: &serde_json::Value) {
        let json = serde_json::to_vec(payload).unwrap();
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&GRAFT_MAGIC);
        bytes.push(GRAFT_VERSION);
        let mut encoder = GzEncoder::new(&mut bytes, Compression::default());
        encoder.write_all(&json).unwrap();
        encoder.finish().unwrap();
        std::fs::write(path, &bytes).unwrap();
    }

    #[test]
    fn import_goes_through_dedup() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.graft");
        let store = crate::storage::Store::open_in_memory().unwrap();
        let embedder = LocalEmbedder::default();

        let (manifest, memories) = sample_payload(3);
        package(manifest, memories, None, &path).unwrap();
        let payload = unpack(&path).unwrap();

        let first = import(&store, &embedder, &payload, "").unwrap();
        assert_eq!(first.imported, 3);
        assert_eq!(first.deduplicated, 0);

        let second = import(&store, &embedder, &payload, "").unwrap();
        assert_eq!(second.imported, 0);
        assert_eq!(second.deduplicated, 3);
    }

    #[test]
    fn citations_follow_their_memory_on_import() {
        let store = crate::storage::Store::open_in_memory().unwrap();
        let embedder = LocalEmbedder::default();
        let (mut manifest, memories) = sample_payload(1);
        manifest.memory_count = 1;

        let citations = vec![GraftCitation {
            memory_id: memories[0].id.clone(),
            file_path: "/tmp/f.go".to_string(),
            start_line: 1,
            end_line: 3,
            snippet: Some("hello".to_string()),
        }];
        let payload = GraftPayload {
            manifest,
            memories,
            citations: Some(citations),
        };

        let report = import(&store, &embedder, &payload, "repo").unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.citations_imported, 1);

        let stats = store
            .with_connection(crate::storage::queries::collect_stats)
            .unwrap();
        assert_eq!(stats.total_citations, 1);
    }
}
