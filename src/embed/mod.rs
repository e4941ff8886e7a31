//! Embedding generation
//!
//! This module provides an abstraction over embedding models with:
//! - A trait for embedding backends
//! - An Ollama HTTP backend
//!
//! Callers issue one call per text; there is no batching.

mod ollama;

pub use ollama::*;

use crate::cancel::CancellationToken;
use crate::error::Result;
use async_trait::async_trait;

/// Trait for embedding providers
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed one text into a dense vector of the model's fixed dimension
    async fn embed(&self, cancel: &CancellationToken, text: &str) -> Result<Vec<f32>>;

    /// Get the model name
    fn model_name(&self) -> &str;
}
