//! Event Handlers
//!
//! Idempotent reactions to payment events. Handlers never propagate
//! errors into the bus: hard faults are logged and reported as None so
//! one bad delivery cannot stall the others.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use tracing::{debug, error};

use super::error::PaymentResult;
use super::events::{PaymentEvent, PaymentEventHandler};
use super::payment_manager::LoanPaymentManagerFactory;
use super::service::ManagementDomainService;
use super::state::{LoanState, PaymentStepState};
use super::step_manager::{next_eligible_step, PaymentStepManager};
use super::store::PaymentStore;
use super::types::LoanPaymentType;

/// Which loan transitions start a payment, and of what type.
///
/// The table is immutable after construction; unlisted transitions are
/// deliberately ignored, they belong to the lending core alone.
pub struct LoanTransitionTable {
    transitions: HashMap<(LoanState, LoanState), LoanPaymentType>,
}

impl LoanTransitionTable {
    pub fn new(transitions: HashMap<(LoanState, LoanState), LoanPaymentType>) -> Self {
        Self { transitions }
    }

    pub fn payment_for(&self, old: LoanState, new: LoanState) -> Option<LoanPaymentType> {
        self.transitions.get(&(old, new)).copied()
    }
}

/// The production table: entering a movement stage (or resuming it from
/// a pause) starts that stage's payment.
static DEFAULT_TRANSITIONS: Lazy<HashMap<(LoanState, LoanState), LoanPaymentType>> =
    Lazy::new(|| {
        HashMap::from([
            (
                (LoanState::Accepted, LoanState::Funding),
                LoanPaymentType::Funding,
            ),
            (
                (LoanState::FundingPaused, LoanState::Funding),
                LoanPaymentType::Funding,
            ),
            (
                (LoanState::Funded, LoanState::Disbursing),
                LoanPaymentType::Disbursement,
            ),
            (
                (LoanState::DisbursingPaused, LoanState::Disbursing),
                LoanPaymentType::Disbursement,
            ),
            (
                (LoanState::Disbursed, LoanState::Repaying),
                LoanPaymentType::Repayment,
            ),
            (
                (LoanState::RepaymentPaused, LoanState::Repaying),
                LoanPaymentType::Repayment,
            ),
        ])
    });

impl Default for LoanTransitionTable {
    fn default() -> Self {
        Self::new(DEFAULT_TRANSITIONS.clone())
    }
}

/// Starts payments when the loan enters a movement stage
pub struct LoanStateChangedHandler {
    table: Arc<LoanTransitionTable>,
    service: Arc<ManagementDomainService>,
}

impl LoanStateChangedHandler {
    pub fn new(table: Arc<LoanTransitionTable>, service: Arc<ManagementDomainService>) -> Self {
        Self { table, service }
    }
}

#[async_trait]
impl PaymentEventHandler for LoanStateChangedHandler {
    fn name(&self) -> &'static str {
        "loan_state_changed"
    }

    async fn handle(&self, event: &PaymentEvent) -> Option<bool> {
        let PaymentEvent::LoanStateChanged {
            loan_id,
            old_state,
            new_state,
        } = event
        else {
            return Some(false);
        };

        // Redelivered transitions carry old == new after the first apply
        if old_state == new_state {
            return Some(false);
        }
        let Some(payment_type) = self.table.payment_for(*old_state, *new_state) else {
            debug!(loan_id = %loan_id, from = %old_state, to = %new_state, "transition not payment-relevant");
            return Some(false);
        };

        match self
            .service
            .initiate_loan_payment(*loan_id, payment_type)
            .await
        {
            Ok(result) => result,
            Err(e) => {
                error!(loan_id = %loan_id, payment_type = %payment_type, error = %e, "initiation failed");
                None
            }
        }
    }
}

/// Drives the owning step when a transfer reports lifecycle progress.
/// Failure reports take the same path: the step manager reads the
/// transfer's recorded state, so one decision table serves all three.
pub struct TransferLifecycleHandler {
    store: Arc<dyn PaymentStore>,
    step_manager: Arc<PaymentStepManager>,
}

impl TransferLifecycleHandler {
    pub fn new(store: Arc<dyn PaymentStore>, step_manager: Arc<PaymentStepManager>) -> Self {
        Self {
            store,
            step_manager,
        }
    }

    async fn advance_owning_step(&self, event: &PaymentEvent) -> PaymentResult<Option<bool>> {
        let (PaymentEvent::TransferExecuted { transfer_id, .. }
        | PaymentEvent::TransferCompleted { transfer_id, .. }
        | PaymentEvent::TransferFailed { transfer_id, .. }) = event
        else {
            return Ok(Some(false));
        };

        let Some(transfer) = self.store.get_transfer(*transfer_id).await? else {
            error!(transfer_id = %transfer_id, "transfer not found for lifecycle event");
            return Ok(None);
        };
        let Some(step_id) = transfer.loan_payment_step_id else {
            // Free-standing transfer: nothing here to drive, a no-op
            debug!(transfer_id = %transfer_id, "transfer has no owning step");
            return Ok(Some(false));
        };
        self.step_manager.advance(step_id).await
    }
}

#[async_trait]
impl PaymentEventHandler for TransferLifecycleHandler {
    fn name(&self) -> &'static str {
        "transfer_lifecycle"
    }

    async fn handle(&self, event: &PaymentEvent) -> Option<bool> {
        match self.advance_owning_step(event).await {
            Ok(result) => result,
            Err(e) => {
                error!(event = event.kind(), error = %e, "step advancement failed");
                None
            }
        }
    }
}

/// Aggregates step changes into the payment and starts the next step
/// once its predecessor completes.
pub struct PaymentStepStateChangedHandler {
    store: Arc<dyn PaymentStore>,
    managers: Arc<LoanPaymentManagerFactory>,
    step_manager: Arc<PaymentStepManager>,
}

impl PaymentStepStateChangedHandler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        managers: Arc<LoanPaymentManagerFactory>,
        step_manager: Arc<PaymentStepManager>,
    ) -> Self {
        Self {
            store,
            managers,
            step_manager,
        }
    }

    async fn apply(&self, event: &PaymentEvent) -> PaymentResult<Option<bool>> {
        let PaymentEvent::PaymentStepStateChanged {
            payment_id,
            new_state,
            ..
        } = event
        else {
            return Ok(Some(false));
        };

        let Some(payment) = self.store.get_payment(*payment_id).await? else {
            error!(payment_id = %payment_id, "payment not found for step change");
            return Ok(None);
        };
        let result = self
            .managers
            .manager(payment.payment_type)
            .advance(*payment_id)
            .await?;

        // A completed step may unblock its successor
        if *new_state == PaymentStepState::Completed {
            let steps = self.store.steps_for_payment(*payment_id).await?;
            if let Some(next) = next_eligible_step(&steps) {
                debug!(payment_id = %payment_id, step_id = %next.id, "starting next step");
                self.step_manager.advance(next.id).await?;
            }
        }
        Ok(result)
    }
}

#[async_trait]
impl PaymentEventHandler for PaymentStepStateChangedHandler {
    fn name(&self) -> &'static str {
        "payment_step_state_changed"
    }

    async fn handle(&self, event: &PaymentEvent) -> Option<bool> {
        match self.apply(event).await {
            Ok(result) => result,
            Err(e) => {
                error!(event = event.kind(), error = %e, "payment aggregation failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payment::events::EventBus;
    use crate::payment::state::TransferState;
    use crate::payment::store::MemoryStore;
    use crate::payment::types::{AccountId, PaymentAccountProvider, Transfer, TransferId};
    use chrono::Utc;
    use rust_decimal::Decimal;

    #[test]
    fn test_default_table_covers_movement_stages() {
        let table = LoanTransitionTable::default();
        assert_eq!(
            table.payment_for(LoanState::Accepted, LoanState::Funding),
            Some(LoanPaymentType::Funding)
        );
        assert_eq!(
            table.payment_for(LoanState::Funded, LoanState::Disbursing),
            Some(LoanPaymentType::Disbursement)
        );
        assert_eq!(
            table.payment_for(LoanState::Disbursed, LoanState::Repaying),
            Some(LoanPaymentType::Repayment)
        );
        // Resumptions re-trigger the same stage
        assert_eq!(
            table.payment_for(LoanState::FundingPaused, LoanState::Funding),
            Some(LoanPaymentType::Funding)
        );
    }

    #[test]
    fn test_unlisted_transitions_are_ignored() {
        let table = LoanTransitionTable::default();
        assert_eq!(table.payment_for(LoanState::Created, LoanState::Requested), None);
        assert_eq!(table.payment_for(LoanState::Repaid, LoanState::Closed), None);
        // Reverse direction never triggers anything
        assert_eq!(table.payment_for(LoanState::Funding, LoanState::Accepted), None);
    }

    #[tokio::test]
    async fn test_free_standing_transfer_lifecycle_is_a_noop() {
        let store = Arc::new(MemoryStore::new());
        let bus = Arc::new(EventBus::new());
        let handler = TransferLifecycleHandler::new(
            store.clone(),
            Arc::new(PaymentStepManager::new(store.clone(), bus)),
        );

        let now = Utc::now();
        let transfer = Transfer {
            id: TransferId::new(),
            loan_payment_step_id: None,
            order: 0,
            amount: Decimal::from(40),
            state: TransferState::Completed,
            source_account_id: AccountId::new(),
            destination_account_id: AccountId::new(),
            provider_ref: None,
            provider_status: None,
            created_at: now,
            updated_at: now,
        };
        store.create_transfer(&transfer).await.expect("seed");

        let result = handler
            .handle(&PaymentEvent::TransferCompleted {
                transfer_id: transfer.id,
                provider: PaymentAccountProvider::Checkbook,
            })
            .await;
        assert_eq!(result, Some(false));
    }
}
