//! Embedding generation
//!
//! Supports multiple embedding backends:
//! - Local hashed bag-of-words (default; no network, deterministic)
//! - OpenAI API (text-embedding-3-small)
//! - Voyage AI API
//!
//! When the engine runs air-gapped, any remote selection is silently
//! overridden to the local backend.

mod local;

pub use local::LocalEmbedder;

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::{PhloemError, Result};

/// Timeout for remote embedding calls
#[cfg(any(feature = "openai", feature = "voyage"))]
const REMOTE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Trait for embedding generators
pub trait Embedder: Send + Sync {
    /// Generate a unit-length embedding for a single text.
    /// Empty input yields the zero vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Generate embeddings for multiple texts (batch)
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    /// Get embedding dimensions
    fn dimensions(&self) -> usize;

    /// Get model name
    fn model_name(&self) -> &str;
}

/// Create an embedder from engine configuration.
///
/// Air-gapped mode forces the local backend regardless of selection.
/// A missing credential is a construction-time error.
pub fn create_embedder(config: &EngineConfig) -> Result<Arc<dyn Embedder>> {
    let backend = if config.air_gapped {
        if config.embeddings != "local" {
            tracing::info!(
                requested = %config.embeddings,
                "air-gapped mode active, using local embedder"
            );
        }
        "local"
    } else {
        config.embeddings.as_str()
    };

    match backend {
        "local" => Ok(Arc::new(LocalEmbedder::default())),
        #[cfg(feature = "openai")]
        "openai" => {
            let api_key = std::env::var("OPENAI_API_KEY").map_err(|_| {
                PhloemError::Config(
                    "OPENAI_API_KEY is required for the openai embedding backend".to_string(),
                )
            })?;
            Ok(Arc::new(OpenAIEmbedder::new(api_key)?))
        }
        #[cfg(feature = "voyage")]
        "voyage" => {
            let api_key = std::env::var("VOYAGE_API_KEY").map_err(|_| {
                PhloemError::Config(
                    "VOYAGE_API_KEY is required for the voyage embedding backend".to_string(),
                )
            })?;
            Ok(Arc::new(VoyageEmbedder::new(api_key)?))
        }
        "ollama" => Err(PhloemError::NotImplemented(
            "ollama embedding backend is not implemented yet".to_string(),
        )),
        other => Err(PhloemError::Config(format!(
            "Unknown embedding backend: {}",
            other
        ))),
    }
}

/// Cosine similarity between two vectors.
/// Returns 0 for mismatched lengths or zero-norm inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a * norm_b)
}

/// Serialize an embedding as little-endian f32 bytes for BLOB storage
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    bytes
}

/// Deserialize an embedding BLOB back into f32 values
pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// OpenAI embedding client
#[cfg(feature = "openai")]
pub struct OpenAIEmbedder {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[cfg(feature = "openai")]
impl OpenAIEmbedder {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|e| PhloemError::Embedding(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            model: "text-embedding-3-small".to_string(),
            dimensions: 1536,
        })
    }

    fn request(&self, inputs: &[&str]) -> Result<Vec<Vec<f32>>> {
        let response = self
            .client
            .post("https://api.openai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": inputs,
                "model": self.model,
            }))
            .send()
            .map_err(|e| PhloemError::Embedding(format!("OpenAI request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(PhloemError::Embedding(format!(
                "OpenAI API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response
            .json()
            .map_err(|e| PhloemError::Embedding(e.to_string()))?;
        let embeddings = data["data"]
            .as_array()
            .ok_or_else(|| PhloemError::Embedding("Invalid response format".to_string()))?
            .iter()
            .map(|item| {
                item["embedding"]
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_f64().map(|f| f as f32))
                            .collect()
                    })
                    .unwrap_or_default()
            })
            .collect();

        Ok(embeddings)
    }
}

#[cfg(feature = "openai")]
impl Embedder for OpenAIEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimensions]);
        }
        let mut result = self.request(&[text])?;
        result
            .pop()
            .ok_or_else(|| PhloemError::Embedding("Empty response".to_string()))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let mut all = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(2048) {
            all.extend(self.request(chunk)?);
        }
        Ok(all)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Voyage AI embedding client
#[cfg(feature = "voyage")]
pub struct VoyageEmbedder {
    client: reqwest::blocking::Client,
    api_key: String,
    model: String,
    dimensions: usize,
}

#[cfg(feature = "voyage")]
impl VoyageEmbedder {
    pub fn new(api_key: String) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(REMOTE_TIMEOUT)
            .build()
            .map_err(|e| PhloemError::Embedding(e.to_string()))?;
        Ok(Self {
            client,
            api_key,
            model: "voyage-3-lite".to_string(),
            dimensions: 512,
        })
    }
}

#[cfg(feature = "voyage")]
impl Embedder for VoyageEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Ok(vec![0.0; self.dimensions]);
        }

        let response = self
            .client
            .post("https://api.voyageai.com/v1/embeddings")
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&serde_json::json!({
                "input": [text],
                "model": self.model,
            }))
            .send()
            .map_err(|e| PhloemError::Embedding(format!("Voyage request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_default();
            return Err(PhloemError::Embedding(format!(
                "Voyage API error {}: {}",
                status, body
            )));
        }

        let data: serde_json::Value = response
            .json()
            .map_err(|e| PhloemError::Embedding(e.to_string()))?;
        let embedding = data["data"][0]["embedding"]
            .as_array()
            .ok_or_else(|| PhloemError::Embedding("Invalid response format".to_string()))?
            .iter()
            .filter_map(|v| v.as_f64().map(|f| f as f32))
            .collect();

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
