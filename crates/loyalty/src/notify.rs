//! Channel-backed notification sink. Events are handed to a bounded
//! `mpsc` queue without blocking; a consumer task drains it.

use rewards_core::event_bus::{EventSink, LoyaltyEvent};
use tokio::sync::mpsc;
use tracing::warn;

pub struct ChannelSink {
    sender: mpsc::Sender<LoyaltyEvent>,
}

impl ChannelSink {
    /// Sink plus the receiving end for the consumer.
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<LoyaltyEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: LoyaltyEvent) {
        if let Err(e) = self.sender.try_send(event) {
            metrics::counter!("loyalty.events_dropped").increment(1);
            warn!("Loyalty event dropped: {}", e);
        }
    }
}
