//! Payment Step Manager
//!
//! Drives one step of a payment through its state machine. The step's
//! recorded state selects the handler; each handler then dispatches on
//! the state of the step's latest transfer attempt, which is
//! authoritative. Combinations outside the table are protocol
//! violations and raise an out-of-sync fault.

use std::sync::Arc;

use tracing::{debug, error};

use super::error::{PaymentError, PaymentResult};
use super::events::{EventBus, PaymentEvent};
use super::state::{PaymentStepState, TransferState};
use super::store::PaymentStore;
use super::types::{LoanPaymentStep, StepId, Transfer};

pub struct PaymentStepManager {
    store: Arc<dyn PaymentStore>,
    bus: Arc<EventBus>,
}

impl PaymentStepManager {
    pub fn new(store: Arc<dyn PaymentStore>, bus: Arc<EventBus>) -> Self {
        Self { store, bus }
    }

    /// Advance the step according to (step state, latest transfer state).
    ///
    /// Tri-state result: Some(true) state changed, Some(false) no-op,
    /// None soft failure. Impossible combinations return
    /// [`PaymentError::OutOfSync`].
    pub async fn advance(&self, step_id: StepId) -> PaymentResult<Option<bool>> {
        let step = self.get_step(step_id).await?;
        let transfer = self.store.latest_transfer_for_step(step_id).await?;

        debug!(
            step_id = %step_id,
            step_state = %step.state,
            transfer_state = ?transfer.as_ref().map(|t| t.state),
            "advancing step"
        );

        match step.state {
            PaymentStepState::Created => self.advance_created(&step, transfer).await,
            PaymentStepState::Pending => self.advance_pending(&step, transfer).await,
            PaymentStepState::Completed => Self::advance_completed(&step, transfer),
            PaymentStepState::Failed => Self::advance_failed(&step, transfer),
        }
    }

    /// Step Created: the step has not begun moving funds yet.
    async fn advance_created(
        &self,
        step: &LoanPaymentStep,
        transfer: Option<Transfer>,
    ) -> PaymentResult<Option<bool>> {
        match transfer.map(|t| t.state) {
            // First advancement: create the attempt, then mark the step
            // Pending so duplicate advances become no-ops.
            None => {
                let attempts = self.store.transfers_for_step(step.id).await?;
                let transfer = Transfer::for_step(step, attempts.len() as u32);
                self.store.create_transfer(&transfer).await?;
                debug!(step_id = %step.id, transfer_id = %transfer.id, "transfer created for step");
                self.change_step_state(step, PaymentStepState::Pending)
                    .await
            }
            Some(TransferState::Created) => {
                self.change_step_state(step, PaymentStepState::Pending)
                    .await
            }
            Some(TransferState::Pending) => Ok(Some(false)),
            Some(state @ (TransferState::Completed | TransferState::Failed)) => {
                Err(PaymentError::OutOfSync(format!(
                    "step {} is Created but its latest transfer is {state}",
                    step.id
                )))
            }
        }
    }

    /// Step Pending: a transfer attempt is in flight.
    async fn advance_pending(
        &self,
        step: &LoanPaymentStep,
        transfer: Option<Transfer>,
    ) -> PaymentResult<Option<bool>> {
        match transfer.map(|t| t.state) {
            Some(TransferState::Completed) => {
                self.change_step_state(step, PaymentStepState::Completed)
                    .await
            }
            Some(TransferState::Failed) => {
                self.change_step_state(step, PaymentStepState::Failed)
                    .await
            }
            Some(TransferState::Pending) => Ok(Some(false)),
            // A fresh attempt exists but execution has not been reported
            // yet; advancing here would race the provider call.
            Some(TransferState::Created) => Ok(Some(false)),
            None => Err(PaymentError::OutOfSync(format!(
                "step {} is Pending but has no transfer",
                step.id
            ))),
        }
    }

    /// Step Completed: only a redelivered completion is legal.
    fn advance_completed(
        step: &LoanPaymentStep,
        transfer: Option<Transfer>,
    ) -> PaymentResult<Option<bool>> {
        match transfer.map(|t| t.state) {
            // At-least-once delivery: a duplicate completion event lands
            // here and must converge to a no-op.
            Some(TransferState::Completed) => Ok(Some(false)),
            other => Err(PaymentError::OutOfSync(format!(
                "step {} is Completed but its latest transfer is {:?}",
                step.id, other
            ))),
        }
    }

    /// Step Failed: must not observe any further transfer activity.
    /// Retrying a failed step requires unlocking it first, which is not
    /// modeled here.
    fn advance_failed(
        step: &LoanPaymentStep,
        transfer: Option<Transfer>,
    ) -> PaymentResult<Option<bool>> {
        Err(PaymentError::OutOfSync(format!(
            "step {} is Failed but observed transfer activity ({:?})",
            step.id,
            transfer.map(|t| t.state)
        )))
    }

    /// Centralized state change: idempotent, and the only place a
    /// step-state-changed signal is emitted from.
    pub async fn change_step_state(
        &self,
        step: &LoanPaymentStep,
        new_state: PaymentStepState,
    ) -> PaymentResult<Option<bool>> {
        if step.state == new_state {
            debug!(step_id = %step.id, state = %new_state, "step already in state, no change");
            return Ok(Some(false));
        }

        // Created is an initial state only; there is no signal for it and
        // no legal transition back into it.
        if new_state == PaymentStepState::Created {
            error!(step_id = %step.id, "refusing step transition back to Created");
            return Ok(None);
        }

        debug!(
            step_id = %step.id,
            from = %step.state,
            to = %new_state,
            "changing step state"
        );
        self.store.update_step_state(step.id, new_state).await?;
        self.bus
            .publish(PaymentEvent::PaymentStepStateChanged {
                step_id: step.id,
                payment_id: step.loan_payment_id,
                new_state,
            })
            .await;
        Ok(Some(true))
    }

    async fn get_step(&self, step_id: StepId) -> PaymentResult<LoanPaymentStep> {
        self.store
            .get_step(step_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("LoanPaymentStep", step_id))
    }
}

/// Pick the next step eligible to start: the lowest-order Created step
/// whose awaited predecessor (explicit `await_step_id`, or the step at
/// order-1) has reached the required state.
pub fn next_eligible_step(steps: &[LoanPaymentStep]) -> Option<&LoanPaymentStep> {
    let mut candidates: Vec<&LoanPaymentStep> = steps
        .iter()
        .filter(|s| s.state == PaymentStepState::Created)
        .collect();
    candidates.sort_by_key(|s| s.order);

    candidates.into_iter().find(|candidate| {
        let Some(required) = candidate.await_step_state else {
            return true;
        };
        let awaited = match candidate.await_step_id {
            Some(await_id) => steps.iter().find(|s| s.id == await_id),
            None => steps.iter().find(|s| s.order + 1 == candidate.order),
        };
        awaited.map(|s| s.state == required).unwrap_or(false)
    })
}
