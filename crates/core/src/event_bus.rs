//! Loyalty notification bus: a trait for emitting fire-and-forget signals
//! (points awarded, tier changed, configuration committed).
//!
//! Components accept an `Arc<dyn EventSink>`. Delivery is best effort: a
//! sink must never fail or block the mutation that produced the event.

use crate::loyalty::{AcquisitionMethod, Tier, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    PointsAwarded,
    PointsReset,
    TierChanged,
    ThresholdsCommitted,
    MilestonesCommitted,
    RecalculationCompleted,
    CardDeactivated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Points {
        user_id: UserId,
        card_number: String,
        delta: i64,
        balance: u64,
        reason: String,
    },
    Tier {
        user_id: UserId,
        card_number: String,
        from: Tier,
        to: Tier,
        method: AcquisitionMethod,
    },
    Config {
        version: u64,
        updated_by: Option<String>,
    },
    Recalculation {
        version: u64,
        processed: u64,
        updated: u64,
        failed: u64,
    },
    Card {
        user_id: UserId,
        card_number: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoyaltyEvent {
    pub event_id: Uuid,
    pub event_type: EventType,
    pub payload: EventPayload,
    pub timestamp: DateTime<Utc>,
}

/// Receives loyalty events. Implementations route them to an external
/// notifier; `emit` has no error path by contract.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: LoyaltyEvent);
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<LoyaltyEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<LoyaltyEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_default()
    }

    pub fn count(&self) -> usize {
        self.events.lock().map(|events| events.len()).unwrap_or(0)
    }

    pub fn count_type(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| e.event_type == event_type).count())
            .unwrap_or(0)
    }

    pub fn clear(&self) {
        if let Ok(mut events) = self.events.lock() {
            events.clear();
        }
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: LoyaltyEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

/// Convenience builder for creating a `LoyaltyEvent` stamped now.
pub fn make_event(event_type: EventType, payload: EventPayload) -> LoyaltyEvent {
    LoyaltyEvent {
        event_id: Uuid::new_v4(),
        event_type,
        payload,
        timestamp: Utc::now(),
    }
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
