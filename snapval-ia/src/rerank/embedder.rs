//! Visual embedding
//!
//! Embeds images into a shared vector space for similarity ranking. The
//! embedding is a coarse color-layout signature: the image is resampled
//! onto a fixed grid and each cell contributes its RGB means. Cheap,
//! deterministic, and good enough to push visually unrelated listings
//! below lookalikes.

use image::imageops::FilterType;
use thiserror::Error;

/// Cells per embedding axis. 8x8 cells over three channels gives a
/// 192-dimension vector.
const GRID: u32 = 8;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum EmbedError {
    #[error("image could not be decoded: {0}")]
    Undecodable(String),
}

/// Fixed-length visual signature of one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding(Vec<f32>);

impl Embedding {
    /// Cosine similarity in [0,1]. Components are non-negative by
    /// construction, so the raw cosine never goes below zero.
    pub fn cosine_similarity(&self, other: &Embedding) -> f64 {
        let dot: f32 = self.0.iter().zip(&other.0).map(|(a, b)| a * b).sum();
        let norm_a: f32 = self.0.iter().map(|a| a * a).sum::<f32>().sqrt();
        let norm_b: f32 = other.0.iter().map(|b| b * b).sum::<f32>().sqrt();
        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }
        (dot / (norm_a * norm_b)).clamp(0.0, 1.0) as f64
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Embedding model. Constructed once at startup and shared across all
/// analyses for the life of the process.
pub struct VisualEmbedder {
    grid: u32,
}

impl VisualEmbedder {
    pub fn new() -> Self {
        Self { grid: GRID }
    }

    /// Embed raw image bytes. Fails only when the bytes cannot be
    /// decoded as an image.
    pub fn embed(&self, bytes: &[u8]) -> Result<Embedding, EmbedError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| EmbedError::Undecodable(e.to_string()))?;
        let resized = decoded
            .resize_exact(self.grid, self.grid, FilterType::Triangle)
            .to_rgb8();

        let mut features = Vec::with_capacity((self.grid * self.grid * 3) as usize);
        for pixel in resized.pixels() {
            features.push(pixel[0] as f32 / 255.0);
            features.push(pixel[1] as f32 / 255.0);
            features.push(pixel[2] as f32 / 255.0);
        }
        Ok(Embedding(features))
    }
}

impl Default for VisualEmbedder {
    fn default() -> Self {
        Self::new()
    }
}
