//! Visual re-ranking
//!
//! Orders candidate listings by visual similarity to the source photo,
//! independent of how well their titles matched the query. Ranking
//! never changes the candidate count: listings whose images cannot be
//! fetched or decoded keep the lowest score instead of being dropped.

pub mod embedder;
pub mod fetcher;

pub use embedder::{EmbedError, Embedding, VisualEmbedder};
pub use fetcher::{FetchError, HttpImageFetcher, ListingImageFetcher};

use crate::config::RerankConfig;
use crate::types::{CandidateListing, RankedComp, RawImage};
use futures::stream::{FuturesUnordered, StreamExt};
use std::cmp::Ordering;
use std::sync::Arc;

/// Ranks candidates against the source image.
///
/// The embedder is shared process-wide; the fetcher is a seam for
/// tests.
pub struct VisualReranker {
    embedder: Arc<VisualEmbedder>,
    fetcher: Arc<dyn ListingImageFetcher>,
    max_candidates: usize,
}

impl VisualReranker {
    pub fn new(
        embedder: Arc<VisualEmbedder>,
        fetcher: Arc<dyn ListingImageFetcher>,
        config: &RerankConfig,
    ) -> Self {
        Self {
            embedder,
            fetcher,
            max_candidates: config.max_candidates,
        }
    }

    /// Score and sort candidates, highest visual similarity first.
    ///
    /// Always returns exactly one comp per input candidate. The sort is
    /// stable, so equal scores keep the marketplace's own order.
    pub async fn rerank(
        &self,
        source: &RawImage,
        candidates: Vec<CandidateListing>,
    ) -> Vec<RankedComp> {
        if candidates.is_empty() {
            return Vec::new();
        }

        let mut comps: Vec<RankedComp> = candidates
            .into_iter()
            .map(|listing| RankedComp {
                listing,
                visual_similarity_score: 0.0,
            })
            .collect();

        let source_embedding = match self.embedder.embed(source.bytes()) {
            Ok(embedding) => embedding,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    "source image could not be embedded, comps keep marketplace order"
                );
                return comps;
            }
        };

        let mut embeds = FuturesUnordered::new();
        for (index, comp) in comps.iter().enumerate().take(self.max_candidates) {
            let url = comp.listing.image_url.clone();
            let fetcher = Arc::clone(&self.fetcher);
            let embedder = Arc::clone(&self.embedder);
            embeds.push(async move {
                let embedding = match fetcher.fetch(&url).await {
                    Ok(bytes) => match embedder.embed(&bytes) {
                        Ok(embedding) => Some(embedding),
                        Err(e) => {
                            tracing::debug!(url = %url, error = %e, "candidate image undecodable");
                            None
                        }
                    },
                    Err(e) => {
                        tracing::debug!(url = %url, error = %e, "candidate image unfetchable");
                        None
                    }
                };
                (index, embedding)
            });
        }

        while let Some((index, embedding)) = embeds.next().await {
            if let Some(embedding) = embedding {
                comps[index].visual_similarity_score =
                    source_embedding.cosine_similarity(&embedding);
            }
        }

        comps.sort_by(|a, b| {
            b.visual_similarity_score
                .partial_cmp(&a.visual_similarity_score)
                .unwrap_or(Ordering::Equal)
        });
        comps
    }
}
