// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Pluggable embedding capability.
//!
//! Memory content reaches this core as an opaque, already-encrypted blob, so
//! embeddings for merge detection are produced upstream and attached to
//! `MemoryCreated`. The provider trait is the seam the capture layer plugs
//! into; the hash-based implementation is the deterministic fallback used in
//! development and tests.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Capability: `embed(text) -> vector`.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Hash-based fallback (384-dim to match all-MiniLM-L6-v2). Deterministic,
/// not semantic.
pub struct HashEmbeddingProvider;

impl HashEmbeddingProvider {
    pub fn new() -> Self {
        Self
    }
}

impl Default for HashEmbeddingProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for HashEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut hasher = DefaultHasher::new();
        text.hash(&mut hasher);
        let hash = hasher.finish();

        let embedding: Vec<f32> = (0..384)
            .map(|i| {
                let bit = (hash >> (i % 64)) & 1;
                bit as f32
            })
            .collect();

        Ok(embedding)
    }
}

/// Cosine similarity in `[−1, 1]`; 0.0 for mismatched or zero-length inputs.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += (*x as f64) * (*y as f64);
        norm_a += (*x as f64).powi(2);
        norm_b += (*y as f64).powi(2);
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_embedding_is_deterministic() {
        let provider = HashEmbeddingProvider::new();
        let a = provider.embed("same text").await.unwrap();
        let b = provider.embed("same text").await.unwrap();
        assert_eq!(a.len(), 384);
        assert_eq!(a, b);
    }

    #[test]
    fn test_cosine_similarity_bounds() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert_eq!(cosine_similarity(&a, &a), 1.0);
        assert_eq!(cosine_similarity(&a, &b), 0.0);

        let neg = vec![-1.0, 0.0, 0.0];
        assert_eq!(cosine_similarity(&a, &neg), -1.0);

        assert_eq!(cosine_similarity(&a, &[]), 0.0);
    }
}
