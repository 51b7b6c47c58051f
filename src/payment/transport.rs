//! Remote Event Transport
//!
//! Adapter for SNS/SQS-style delivery: at-least-once, unordered across
//! topics. Envelopes carry a message id used for best-effort local
//! deduplication; the real correctness guarantee stays with the
//! idempotent handlers, so a dedup miss is harmless.

use std::sync::Arc;

use dashmap::DashSet;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::{PaymentError, PaymentResult};
use super::events::{EventBus, PaymentEvent};

/// Wire envelope for remotely delivered events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteEnvelope {
    pub message_id: String,
    #[serde(flatten)]
    pub event: PaymentEvent,
}

/// Feeds remotely delivered envelopes into the in-process bus.
pub struct RemoteEventTransport {
    bus: Arc<EventBus>,
    seen: DashSet<String>,
}

impl RemoteEventTransport {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            bus,
            seen: DashSet::new(),
        }
    }

    /// Deliver one raw message. Returns false for a duplicate message id.
    pub async fn deliver(&self, raw: &str) -> PaymentResult<bool> {
        let envelope: RemoteEnvelope = serde_json::from_str(raw)
            .map_err(|e| PaymentError::Store(format!("bad envelope: {e}")))?;

        if !self.seen.insert(envelope.message_id.clone()) {
            warn!(
                message_id = %envelope.message_id,
                event = envelope.event.kind(),
                "duplicate delivery skipped"
            );
            return Ok(false);
        }

        debug!(
            message_id = %envelope.message_id,
            event = envelope.event.kind(),
            "remote event delivered"
        );
        self.bus.publish(envelope.event).await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::types::{PaymentAccountProvider, TransferId};

    #[tokio::test]
    async fn test_duplicate_message_id_skipped() {
        let bus = Arc::new(EventBus::new());
        let transport = RemoteEventTransport::new(bus);

        let envelope = RemoteEnvelope {
            message_id: "m-1".into(),
            event: PaymentEvent::TransferCompleted {
                transfer_id: TransferId::new(),
                provider: PaymentAccountProvider::Tabapay,
            },
        };
        let raw = serde_json::to_string(&envelope).expect("serialize");

        assert!(transport.deliver(&raw).await.expect("first"));
        assert!(!transport.deliver(&raw).await.expect("second"));
    }

    #[tokio::test]
    async fn test_malformed_envelope_is_an_error() {
        let bus = Arc::new(EventBus::new());
        let transport = RemoteEventTransport::new(bus);
        assert!(transport.deliver("{not json").await.is_err());
    }
}
