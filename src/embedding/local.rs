//! Local hashed bag-of-features embedder
//!
//! Deterministic, fast, no network. Tokens and character trigrams are hashed
//! into a fixed number of buckets with a sign hash to soften collisions, then
//! L2-normalized. The air-gapped default.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use crate::embedding::Embedder;
use crate::error::Result;

/// Default embedding dimensionality
pub const LOCAL_DIMENSIONS: usize = 512;

/// Hashing-trick embedder over words and character trigrams
pub struct LocalEmbedder {
    dimensions: usize,
}

impl Default for LocalEmbedder {
    fn default() -> Self {
        Self::new(LOCAL_DIMENSIONS)
    }
}

impl LocalEmbedder {
    pub fn new(dimensions: usize) -> Self {
        Self { dimensions }
    }

    /// Tokenize text into lowercase words
    fn tokenize(text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect()
    }

    /// Hash a feature to a dimension index
    fn hash_feature(feature: &str, dimensions: usize) -> usize {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        feature.hash(&mut hasher);
        (hasher.finish() as usize) % dimensions
    }

    /// Get sign for feature hashing (reduces collision impact)
    fn hash_sign(feature: &str) -> f32 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        format!("{}_sign", feature).hash(&mut hasher);
        if hasher.finish() % 2 == 0 {
            1.0
        } else {
            -1.0
        }
    }
}

impl Embedder for LocalEmbedder {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = Self::tokenize(text);
        let mut embedding = vec![0.0_f32; self.dimensions];

        if tokens.is_empty() {
            return Ok(embedding);
        }

        // Term frequencies with a log dampening
        let mut tf: HashMap<&str, f32> = HashMap::new();
        for token in &tokens {
            *tf.entry(token.as_str()).or_insert(0.0) += 1.0;
        }

        let doc_len = tokens.len() as f32;
        for (token, count) in tf {
            let tf_score = (1.0 + count / doc_len).ln();
            // Longer tokens tend to be rarer; weight them up slightly
            let idf_score = 1.0 + (token.len() as f32 * 0.1);

            let weight = tf_score * idf_score;
            let idx = Self::hash_feature(token, self.dimensions);
            embedding[idx] += weight * Self::hash_sign(token);
        }

        // Word bigrams capture local phrase structure
        for window in tokens.windows(2) {
            let bigram = format!("{}_{}", window[0], window[1]);
            let idx = Self::hash_feature(&bigram, self.dimensions);
            embedding[idx] += 0.5 * Self::hash_sign(&bigram);
        }

        // Character trigrams make the embedder robust to morphology
        for token in &tokens {
            let chars: Vec<char> = token.chars().collect();
            if chars.len() < 3 {
                continue;
            }
            for window in chars.windows(3) {
                let trigram: String = window.iter().collect();
                let feature = format!("tri:{}", trigram);
                let idx = Self::hash_feature(&feature, self.dimensions);
                embedding[idx] += 0.25 * Self::hash_sign(&feature);
            }
        }

        // L2 normalize
        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut embedding {
                *x /= norm;
            }
        }

        Ok(embedding)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        "local-hash-v1"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::cosine_similarity;

    #[test]
    fn test_deterministic() {
        let embedder = LocalEmbedder::default();

        let e1 = embedder.embed("hello world").unwrap();
        let e2 = embedder.embed("hello world").unwrap();

        assert_eq!(e1, e2);
    }

    #[test]
    fn test_similarity_ordering() {
        let embedder = LocalEmbedder::default();

        let e1 = embedder
            .embed("the quick brown fox jumps over the lazy dog")
            .unwrap();
        let e2 = embedder
            .embed("a quick brown fox leaps over a sleepy dog")
            .unwrap();
        let e3 = embedder
            .embed("quantum physics and thermodynamics")
            .unwrap();

        let sim_similar = cosine_similarity(&e1, &e2);
        let sim_different = cosine_similarity(&e1, &e3);

        assert!(
            sim_similar > sim_different,
            "similar sentences should score higher: {} vs {}",
            sim_similar,
            sim_different
        );
    }

    #[test]
    fn test_empty_is_zero_vector() {
        let embedder = LocalEmbedder::default();
        let e = embedder.embed("").unwrap();
        assert_eq!(e.len(), LOCAL_DIMENSIONS);
        assert!(e.iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_unit_norm() {
        let embedder = LocalEmbedder::default();
        let e = embedder
            .embed("this is a test sentence with multiple words")
            .unwrap();

        let norm: f32 = e.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 0.01, "expected unit norm, got {}", norm);
    }

    #[test]
    fn test_batch_matches_single() {
        let embedder = LocalEmbedder::default();
        let batch = embedder.embed_batch(&["alpha", "beta"]).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0], embedder.embed("alpha").unwrap());
        assert_eq!(batch[1], embedder.embed("beta").unwrap());
    }
}
