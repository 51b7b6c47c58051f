//! Payment Events
//!
//! Event types flowing between the orchestration components, plus the
//! synchronous in-process bus. Publication is synchronous: every handler
//! completes before `publish` returns. Remote propagation (at-least-once,
//! unordered) enters through [`crate::payment::transport`] and feeds the
//! same handlers, which is why every handler must be idempotent.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::state::{LoanState, PaymentStepState};
use super::types::{LoanId, PaymentAccountProvider, PaymentId, StepId, TransferId};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PaymentEvent {
    /// Loan lifecycle moved; only table-listed transitions trigger work
    LoanStateChanged {
        loan_id: LoanId,
        old_state: LoanState,
        new_state: LoanState,
    },
    /// Provider accepted the transfer for execution
    TransferExecuted {
        transfer_id: TransferId,
        provider: PaymentAccountProvider,
    },
    TransferCompleted {
        transfer_id: TransferId,
        provider: PaymentAccountProvider,
    },
    TransferFailed {
        transfer_id: TransferId,
        provider: PaymentAccountProvider,
    },
    /// A step moved to Pending/Completed/Failed; drives payment aggregation
    PaymentStepStateChanged {
        step_id: StepId,
        payment_id: PaymentId,
        new_state: PaymentStepState,
    },
}

impl PaymentEvent {
    /// Short name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            PaymentEvent::LoanStateChanged { .. } => "loan_state_changed",
            PaymentEvent::TransferExecuted { .. } => "transfer_executed",
            PaymentEvent::TransferCompleted { .. } => "transfer_completed",
            PaymentEvent::TransferFailed { .. } => "transfer_failed",
            PaymentEvent::PaymentStepStateChanged { .. } => "payment_step_state_changed",
        }
    }
}

/// Handler contract. Handlers swallow their own faults: a hard error is
/// logged and reported as `None`, never propagated into the publisher.
#[async_trait]
pub trait PaymentEventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Tri-state: Some(true) applied, Some(false) no-op, None failed
    async fn handle(&self, event: &PaymentEvent) -> Option<bool>;
}

/// Synchronous in-process event bus.
///
/// Handlers are registered once during wiring; registration after the
/// first publish is allowed but not expected.
#[derive(Default)]
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn PaymentEventHandler>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handler: Arc<dyn PaymentEventHandler>) {
        let mut handlers = self
            .handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        handlers.push(handler);
    }

    /// Deliver the event to every registered handler, in registration
    /// order. Handler failures are logged and do not stop delivery.
    pub async fn publish(&self, event: PaymentEvent) {
        let handlers: Vec<Arc<dyn PaymentEventHandler>> = {
            let guard = self
                .handlers
                .read()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            guard.clone()
        };

        debug!(event = event.kind(), handlers = handlers.len(), "publishing event");
        for handler in handlers {
            match handler.handle(&event).await {
                Some(applied) => {
                    debug!(event = event.kind(), handler = handler.name(), applied, "handled");
                }
                None => {
                    warn!(event = event.kind(), handler = handler.name(), "handler failed");
                }
            }
        }
    }
}
