//! Event system for SnapVal services
//!
//! Defines the `AnalysisEvent` enum covering every pipeline milestone and
//! the `EventBus` used to broadcast events to SSE clients and internal
//! subscribers.
//!
//! Events are serialized with a `type` tag so SSE consumers can dispatch
//! on the event name without inspecting the payload.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Pipeline milestone events emitted during one analysis request.
///
/// Every variant carries the `analysis_id` of the request that produced it
/// plus a UTC timestamp, so interleaved events from concurrent requests
/// can be attributed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AnalysisEvent {
    /// Analysis accepted; input validated.
    ///
    /// `image_fingerprint` is a short SHA-256 prefix of the input bytes,
    /// usable to correlate repeated submissions of the same photo.
    AnalysisStarted {
        analysis_id: Uuid,
        image_fingerprint: String,
        timestamp: DateTime<Utc>,
    },

    /// Crop stage finished (possibly with the original image passed through).
    ///
    /// `source` names the detector that produced the bounding box, or
    /// `"none"` when no subject was located.
    CropCompleted {
        analysis_id: Uuid,
        source: String,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// One expert adapter settled (success or typed failure).
    ExpertSettled {
        analysis_id: Uuid,
        expert: String,
        success: bool,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Attribute synthesis finished.
    ///
    /// `strategy` is `"generative"` or `"heuristic"` (the fallback).
    SynthesisCompleted {
        analysis_id: Uuid,
        strategy: String,
        confidence: f64,
        timestamp: DateTime<Utc>,
    },

    /// Marketplace search finished (or was skipped / unavailable).
    SearchCompleted {
        analysis_id: Uuid,
        query: String,
        listing_count: usize,
        success: bool,
        timestamp: DateTime<Utc>,
    },

    /// Visual re-ranking finished.
    RerankCompleted {
        analysis_id: Uuid,
        comp_count: usize,
        timestamp: DateTime<Utc>,
    },

    /// Full pipeline completed and a result was produced.
    AnalysisCompleted {
        analysis_id: Uuid,
        suggested_price: f64,
        confidence_label: String,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },

    /// Analysis aborted before producing a result (invalid input only).
    AnalysisFailed {
        analysis_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl AnalysisEvent {
    /// Returns the event type name used as the SSE event tag
    pub fn event_type(&self) -> &'static str {
        match self {
            AnalysisEvent::AnalysisStarted { .. } => "AnalysisStarted",
            AnalysisEvent::CropCompleted { .. } => "CropCompleted",
            AnalysisEvent::ExpertSettled { .. } => "ExpertSettled",
            AnalysisEvent::SynthesisCompleted { .. } => "SynthesisCompleted",
            AnalysisEvent::SearchCompleted { .. } => "SearchCompleted",
            AnalysisEvent::RerankCompleted { .. } => "RerankCompleted",
            AnalysisEvent::AnalysisCompleted { .. } => "AnalysisCompleted",
            AnalysisEvent::AnalysisFailed { .. } => "AnalysisFailed",
        }
    }

    /// Returns the analysis this event belongs to
    pub fn analysis_id(&self) -> Uuid {
        match self {
            AnalysisEvent::AnalysisStarted { analysis_id, .. }
            | AnalysisEvent::CropCompleted { analysis_id, .. }
            | AnalysisEvent::ExpertSettled { analysis_id, .. }
            | AnalysisEvent::SynthesisCompleted { analysis_id, .. }
            | AnalysisEvent::SearchCompleted { analysis_id, .. }
            | AnalysisEvent::RerankCompleted { analysis_id, .. }
            | AnalysisEvent::AnalysisCompleted { analysis_id, .. }
            | AnalysisEvent::AnalysisFailed { analysis_id, .. } => *analysis_id,
        }
    }
}

/// Broadcast bus for analysis events
///
/// Wraps `tokio::sync::broadcast` so the pipeline can emit without knowing
/// who (if anyone) is listening. Subscribers that fall behind lose the
/// oldest buffered events, never block the emitter.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<AnalysisEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus with the specified channel capacity
    ///
    /// # Arguments
    ///
    /// * `capacity` - Number of events buffered before old events drop
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    ///
    /// Events emitted before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalysisEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Ok(subscriber_count)` if at least one subscriber exists,
    /// `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: AnalysisEvent,
    ) -> Result<usize, broadcast::error::SendError<AnalysisEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    ///
    /// The pipeline uses this for all milestone events: an analysis must
    /// complete identically whether or not an SSE client is attached.
    pub fn emit_lossy(&self, event: AnalysisEvent) {
        let _ = self.tx.send(event);
    }

    /// Get the current number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Get the configured channel capacity
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started_event() -> AnalysisEvent {
        AnalysisEvent::AnalysisStarted {
            analysis_id: Uuid::new_v4(),
            image_fingerprint: "4bf5122f".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_eventbus_new() {
        let bus = EventBus::new(100);
        assert_eq!(bus.capacity(), 100);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_eventbus_subscribe() {
        let bus = EventBus::new(10);
        let _rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        let _rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);
    }

    #[test]
    fn test_eventbus_emit_delivers_to_subscriber() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        bus.emit(started_event()).expect("emit should succeed");

        let received = rx.try_recv().expect("Should receive event");
        assert_eq!(received.event_type(), "AnalysisStarted");
    }

    #[test]
    fn test_eventbus_emit_without_subscribers_errors() {
        let bus = EventBus::new(10);
        assert!(bus.emit(started_event()).is_err());
    }

    #[test]
    fn test_eventbus_emit_lossy_does_not_panic_when_full() {
        let bus = EventBus::new(2); // Small capacity
        let mut _rx = bus.subscribe(); // Subscribe but don't receive

        for _ in 0..10 {
            bus.emit_lossy(started_event());
        }

        assert_eq!(bus.capacity(), 2);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let id = Uuid::new_v4();
        let event = AnalysisEvent::SearchCompleted {
            analysis_id: id,
            query: "levis 501 jeans".to_string(),
            listing_count: 12,
            success: true,
            timestamp: Utc::now(),
        };

        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], "SearchCompleted");
        assert_eq!(json["listing_count"], 12);
        assert_eq!(json["analysis_id"], id.to_string());
    }

    #[test]
    fn test_event_type_matches_serialized_tag() {
        let event = AnalysisEvent::AnalysisFailed {
            analysis_id: Uuid::new_v4(),
            reason: "empty image".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["type"], event.event_type());
    }

    #[test]
    fn test_analysis_id_accessor_covers_all_variants() {
        let id = Uuid::new_v4();
        let events = vec![
            AnalysisEvent::AnalysisStarted {
                analysis_id: id,
                image_fingerprint: "ab".into(),
                timestamp: Utc::now(),
            },
            AnalysisEvent::CropCompleted {
                analysis_id: id,
                source: "none".into(),
                elapsed_ms: 3,
                timestamp: Utc::now(),
            },
            AnalysisEvent::ExpertSettled {
                analysis_id: id,
                expert: "labels".into(),
                success: false,
                elapsed_ms: 20,
                timestamp: Utc::now(),
            },
            AnalysisEvent::SynthesisCompleted {
                analysis_id: id,
                strategy: "heuristic".into(),
                confidence: 0.35,
                timestamp: Utc::now(),
            },
            AnalysisEvent::SearchCompleted {
                analysis_id: id,
                query: "q".into(),
                listing_count: 0,
                success: false,
                timestamp: Utc::now(),
            },
            AnalysisEvent::RerankCompleted {
                analysis_id: id,
                comp_count: 0,
                timestamp: Utc::now(),
            },
            AnalysisEvent::AnalysisCompleted {
                analysis_id: id,
                suggested_price: 0.0,
                confidence_label: "Low".into(),
                elapsed_ms: 90,
                timestamp: Utc::now(),
            },
            AnalysisEvent::AnalysisFailed {
                analysis_id: id,
                reason: "r".into(),
                timestamp: Utc::now(),
            },
        ];

        for event in events {
            assert_eq!(event.analysis_id(), id, "variant {}", event.event_type());
        }
    }
}
