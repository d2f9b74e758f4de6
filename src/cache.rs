use ndarray::ArrayD;

use crate::transforms::ImageSize;

/// Encoder output for one image, with the sizes needed to prompt against it.
#[derive(Debug, Clone)]
pub struct CachedEmbedding {
    pub embedding: ArrayD<f32>,
    pub original_size: ImageSize,
    /// Encoder input size, padding included.
    pub input_size: ImageSize,
}

/// Holds the embedding of the most recently set image.
#[derive(Debug, Default)]
pub struct EmbeddingCache {
    slot: Option<CachedEmbedding>,
}

impl EmbeddingCache {
    pub const fn new() -> Self {
        Self { slot: None }
    }

    /// Replaces whatever was cached.
    pub fn store(&mut self, entry: CachedEmbedding) {
        self.slot = Some(entry);
    }

    pub fn get(&self) -> Option<&CachedEmbedding> {
        self.slot.as_ref()
    }

    pub fn invalidate(&mut self) {
        self.slot = None;
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}
