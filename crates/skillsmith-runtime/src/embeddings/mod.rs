//! Embedding provider abstraction (spec §6 "optional embedding function").
//!
//! A `Send + Sync` trait with a default `embed_query` built on
//! `embed_documents`, so a single implementation covers both call sites.
//! Spec §6 treats the embedder as an optional external collaborator rather
//! than a pluggable provider matrix, so only a local FastEmbed provider is
//! implemented; see DESIGN.md for the scoping note.

mod fastembed_provider;

pub use fastembed_provider::FastEmbedProvider;

use async_trait::async_trait;

/// Result alias local to this module: embedding failures never abort a
/// caller's larger operation (spec §6: "if absent, C9 still works"), so
/// callers match on `Option`/`Result` rather than propagating unconditionally.
pub type EmbedResult<T> = anyhow::Result<T>;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed_documents(&self, texts: Vec<String>) -> EmbedResult<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> EmbedResult<Vec<f32>> {
        let results = self.embed_documents(vec![text.to_string()]).await?;
        results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("embed_documents returned no vector for a single query"))
    }

    fn dimensions(&self) -> usize;

    fn model_name(&self) -> &str;
}

#[cfg(test)]
pub mod test_support {
    use super::*;

    /// Deterministic stand-in embedder for tests: hashes each text into a
    /// fixed-dimension vector via a simple rolling sum so equal inputs embed
    /// identically without pulling in an ONNX runtime.
    pub struct HashEmbedProvider {
        pub dims: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for HashEmbedProvider {
        async fn embed_documents(&self, texts: Vec<String>) -> EmbedResult<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| hash_embed(t, self.dims)).collect())
        }

        fn dimensions(&self) -> usize {
            self.dims
        }

        fn model_name(&self) -> &str {
            "test-hash-embed"
        }
    }

    pub fn hash_embed(text: &str, dims: usize) -> Vec<f32> {
        let mut seed = 1469598103934665603u64; // FNV offset basis
        let mut out = vec![0.0f32; dims];
        for (i, byte) in text.bytes().enumerate() {
            seed ^= byte as u64;
            seed = seed.wrapping_mul(1099511628211);
            out[i % dims] += ((seed % 2000) as f32 - 1000.0) / 1000.0;
        }
        let norm: f32 = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in out.iter_mut() {
                *v /= norm;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::HashEmbedProvider;
    use super::*;

    #[tokio::test]
    async fn embed_query_delegates_to_embed_documents() {
        let provider = HashEmbedProvider { dims: 8 };
        let v = provider.embed_query("hello world").await.unwrap();
        assert_eq!(v.len(), 8);
    }

    #[tokio::test]
    async fn equal_inputs_embed_identically() {
        let provider = HashEmbedProvider { dims: 16 };
        let a = provider.embed_query("react testing").await.unwrap();
        let b = provider.embed_query("react testing").await.unwrap();
        assert_eq!(a, b);
    }
}
