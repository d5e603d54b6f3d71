//! Expert adapters and their dispatch registry
//!
//! Each adapter wraps one vision capability behind the uniform
//! [`ExpertAdapter`] trait. The registry owns the configured adapter set
//! and fans one image out to all of them concurrently, folding every
//! outcome (success or typed failure) into an identity-keyed
//! [`ExpertEvidence`].
//!
//! The registry is explicitly constructed and injected into the pipeline;
//! there are no global adapter handles.

pub mod colors;
pub mod labels;
pub mod objects;
pub mod text;
pub mod web_entities;

pub use colors::ColorsExpert;
pub use labels::LabelsExpert;
pub use objects::ObjectsExpert;
pub use text::TextExpert;
pub use web_entities::WebEntitiesExpert;

use crate::config::ExpertsConfig;
use crate::types::{ExpertAdapter, ExpertError, ExpertEvidence, RawImage};
use crate::vision::VisionClientCache;
use chrono::Utc;
use futures::stream::{FuturesUnordered, StreamExt};
use snapval_common::events::{AnalysisEvent, EventBus};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Dependency-injected set of expert adapters.
pub struct ExpertRegistry {
    experts: Vec<Arc<dyn ExpertAdapter>>,
    call_timeout: Duration,
}

impl ExpertRegistry {
    /// Standard five-expert registry sharing one lazy vision client.
    pub fn with_vision_cache(cache: Arc<VisionClientCache>, config: &ExpertsConfig) -> Self {
        let experts: Vec<Arc<dyn ExpertAdapter>> = vec![
            Arc::new(WebEntitiesExpert::new(Arc::clone(&cache))),
            Arc::new(LabelsExpert::new(Arc::clone(&cache))),
            Arc::new(ObjectsExpert::new(Arc::clone(&cache))),
            Arc::new(TextExpert::new(Arc::clone(&cache))),
            Arc::new(ColorsExpert::new(cache)),
        ];
        Self {
            experts,
            call_timeout: Duration::from_millis(config.call_timeout_ms),
        }
    }

    /// Registry over an arbitrary adapter set (tests inject stubs here).
    pub fn from_adapters(
        experts: Vec<Arc<dyn ExpertAdapter>>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            experts,
            call_timeout,
        }
    }

    pub fn len(&self) -> usize {
        self.experts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.experts.is_empty()
    }

    /// Invoke every adapter concurrently against the image.
    ///
    /// Each call is individually bounded by the configured timeout, so the
    /// total wait is bounded by the slowest budget, not the slowest
    /// expert. Failures are folded into the evidence as typed errors;
    /// nothing escapes this boundary.
    pub async fn dispatch_all(
        &self,
        image: &RawImage,
        event_bus: &EventBus,
        analysis_id: Uuid,
    ) -> ExpertEvidence {
        let mut evidence = ExpertEvidence::default();

        let mut settling: FuturesUnordered<_> = self
            .experts
            .iter()
            .map(|expert| {
                let expert = Arc::clone(expert);
                let timeout = self.call_timeout;
                async move {
                    let started = Instant::now();
                    let outcome = match tokio::time::timeout(timeout, expert.observe(image)).await
                    {
                        Ok(result) => result,
                        Err(_) => Err(ExpertError::Timeout {
                            waited_ms: timeout.as_millis() as u64,
                        }),
                    };
                    (expert.kind(), outcome, started.elapsed().as_millis() as u64)
                }
            })
            .collect();

        while let Some((kind, outcome, elapsed_ms)) = settling.next().await {
            match &outcome {
                Ok(_) => {
                    debug!(expert = %kind, elapsed_ms, "Expert settled with finding");
                }
                Err(e) => {
                    warn!(expert = %kind, elapsed_ms, error = %e, "Expert settled with failure");
                }
            }

            event_bus.emit_lossy(AnalysisEvent::ExpertSettled {
                analysis_id,
                expert: kind.as_str().to_string(),
                success: outcome.is_ok(),
                elapsed_ms,
                timestamp: Utc::now(),
            });

            evidence.record(kind, outcome);
        }

        evidence
    }
}
