//! Local ONNX-based embeddings via `rig-fastembed`. No API key required;
//! models are downloaded and cached on first use.

use super::{EmbedResult, EmbeddingProvider};
use async_trait::async_trait;
use rig::embeddings::embedding::EmbeddingModel as RigEmbeddingModel;
use rig_fastembed::{Client as FastembedClient, FastembedModel as RigFastembedModel};
use std::sync::Arc;

pub const DEFAULT_DIM: usize = 384;

pub struct FastEmbedProvider {
    client: Arc<FastembedClient>,
    rig_model: RigFastembedModel,
    dims: usize,
    model_name: &'static str,
}

impl FastEmbedProvider {
    /// `all-MiniLM-L6-v2` (quantized), 384 dimensions — matches
    /// `DEFAULT_EMBEDDING_DIM` in `skillsmith_core::model`.
    pub fn new() -> Self {
        Self {
            client: Arc::new(FastembedClient::new()),
            rig_model: RigFastembedModel::AllMiniLML6V2Q,
            dims: DEFAULT_DIM,
            model_name: "all-minilm",
        }
    }
}

impl Default for FastEmbedProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EmbeddingProvider for FastEmbedProvider {
    async fn embed_documents(&self, texts: Vec<String>) -> EmbedResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.client.embedding_model(&self.rig_model);
        let embeddings = model
            .embed_texts(texts)
            .await
            .map_err(|e| anyhow::anyhow!("fastembed failed to generate embeddings: {e}"))?;
        Ok(embeddings
            .into_iter()
            .map(|emb| emb.vec.into_iter().map(|x| x as f32).collect())
            .collect())
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    fn model_name(&self) -> &str {
        self.model_name
    }
}
