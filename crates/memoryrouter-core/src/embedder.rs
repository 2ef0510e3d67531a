//! C1 — Embedder: text → unit-normalised float vector of fixed dimension.
//!
//! Stateless, deterministic for a given text + model version. May block for
//! tens of milliseconds (it's a network round-trip to an embedding endpoint).
//! Failures bubble up; callers degrade to "no memory" rather than failing
//! the request (spec §4.1, §7 `RetrievalUnavailable`).

use crate::error::{RouterError, RouterResult};
use serde_json::json;
use std::time::Duration;

#[async_trait::async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> RouterResult<Vec<f32>>;
    fn dims(&self) -> usize;
}

/// Calls an OpenAI-compatible `/embeddings`-style endpoint (Ollama's
/// `/api/embeddings` by default; any compatible endpoint works).
pub struct HttpEmbedder {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dims: usize,
}

impl HttpEmbedder {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dims: usize) -> Self {
        Self {
            client: reqwest::Client::builder()
                .connect_timeout(Duration::from_secs(10))
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            endpoint: endpoint.into(),
            model: model.into(),
            dims,
        }
    }
}

#[async_trait::async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(&self, text: &str) -> RouterResult<Vec<f32>> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "model": self.model, "prompt": text }))
            .send()
            .await
            .map_err(RouterError::Network)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(RouterError::ProviderError {
                provider: "embedder".into(),
                status,
                body,
            });
        }

        let value: serde_json::Value = resp.json().await.map_err(RouterError::Network)?;
        let raw = value
            .get("embedding")
            .or_else(|| value.get("data").and_then(|d| d.get(0)).and_then(|d| d.get("embedding")))
            .ok_or_else(|| RouterError::RetrievalUnavailable("embedder returned no vector".into()))?;

        let vec: Vec<f32> = raw
            .as_array()
            .ok_or_else(|| RouterError::RetrievalUnavailable("embedder vector not an array".into()))?
            .iter()
            .filter_map(|v| v.as_f64())
            .map(|v| v as f32)
            .collect();

        Ok(normalize(vec))
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

/// Unit-normalise a vector. Zero-length vectors are returned unchanged
/// (a degenerate embedding is still storable; search against it just scores
/// near zero for every query).
pub fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

/// Cosine similarity between two equal-length vectors. 0.0 if either is
/// empty or the lengths mismatch.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let x = *x as f64;
        let y = *y as f64;
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < 1e-12 {
        0.0
    } else {
        dot / denom
    }
}

/// Test double: deterministic hash-based "embedding" with no network call.
pub struct FakeEmbedder {
    pub dims: usize,
}

#[async_trait::async_trait]
impl Embedder for FakeEmbedder {
    async fn embed(&self, text: &str) -> RouterResult<Vec<f32>> {
        use sha2::{Digest, Sha256};
        let mut v = vec![0f32; self.dims];
        let digest = Sha256::digest(text.as_bytes());
        for (i, slot) in v.iter_mut().enumerate() {
            *slot = digest[i % digest.len()] as f32 - 128.0;
        }
        Ok(normalize(v))
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_is_one() {
        let v = normalize(vec![1.0, 2.0, 3.0]);
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        let a = normalize(vec![1.0, 0.0]);
        let b = normalize(vec![0.0, 1.0]);
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_len_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn fake_embedder_is_deterministic() {
        let e = FakeEmbedder { dims: 16 };
        let a = e.embed("hello world").await.unwrap();
        let b = e.embed("hello world").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }
}
