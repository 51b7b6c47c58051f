//! Management Domain Service
//!
//! Single entry point for payment orchestration. Event handlers and any
//! embedding application go through this facade; nothing outside the
//! module touches managers or execution services directly.

use std::sync::Arc;

use tracing::{error, warn};

use super::error::{PaymentError, PaymentResult};
use super::payment_manager::LoanPaymentManagerFactory;
use super::providers::TransferExecutionFactory;
use super::step_manager::PaymentStepManager;
use super::store::PaymentStore;
use super::types::{
    LoanId, LoanPaymentType, PaymentAccountProvider, PaymentId, StepId, TransferId,
    TransferUpdateDetails,
};

pub struct ManagementDomainService {
    store: Arc<dyn PaymentStore>,
    managers: Arc<LoanPaymentManagerFactory>,
    step_manager: Arc<PaymentStepManager>,
    executions: Arc<TransferExecutionFactory>,
}

impl ManagementDomainService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        managers: Arc<LoanPaymentManagerFactory>,
        step_manager: Arc<PaymentStepManager>,
        executions: Arc<TransferExecutionFactory>,
    ) -> Self {
        Self {
            store,
            managers,
            step_manager,
            executions,
        }
    }

    /// Create a payment for the loan and kick off its first step.
    ///
    /// Initiation refusals (missing accounts, duplicates, no route) have
    /// already been logged by the manager; they surface here as None.
    pub async fn initiate_loan_payment(
        &self,
        loan_id: LoanId,
        payment_type: LoanPaymentType,
    ) -> PaymentResult<Option<bool>> {
        let manager = self.managers.manager(payment_type);
        let Some(initiated) = manager.initiate(loan_id).await? else {
            error!(loan_id = %loan_id, payment_type = %payment_type, "payment initiation refused");
            return Ok(None);
        };

        let Some(first) = initiated.steps.first() else {
            // Zero-step payments were persisted Completed; nothing moves.
            warn!(
                loan_id = %loan_id,
                payment_id = %initiated.payment.id,
                "payment has no steps to run"
            );
            return manager.advance(initiated.payment.id).await;
        };

        let result = self.step_manager.advance(first.id).await?;
        manager.advance(initiated.payment.id).await?;
        Ok(result)
    }

    /// Recompute a payment's state from its steps
    pub async fn advance_payment(&self, payment_id: PaymentId) -> PaymentResult<Option<bool>> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("LoanPayment", payment_id))?;
        self.managers
            .manager(payment.payment_type)
            .advance(payment_id)
            .await
    }

    /// Advance one step against its latest transfer attempt
    pub async fn advance_payment_step(&self, step_id: StepId) -> PaymentResult<Option<bool>> {
        self.step_manager.advance(step_id).await
    }

    pub async fn initiate_transfer(
        &self,
        transfer_id: TransferId,
        provider: Option<PaymentAccountProvider>,
    ) -> PaymentResult<Option<bool>> {
        self.executions
            .service_for(transfer_id, provider)
            .await?
            .initiate_transfer(transfer_id)
            .await
    }

    pub async fn complete_transfer(
        &self,
        transfer_id: TransferId,
        provider: Option<PaymentAccountProvider>,
    ) -> PaymentResult<Option<bool>> {
        self.executions
            .service_for(transfer_id, provider)
            .await?
            .complete_transfer(transfer_id)
            .await
    }

    pub async fn fail_transfer(
        &self,
        transfer_id: TransferId,
        payload: &serde_json::Value,
        provider: Option<PaymentAccountProvider>,
    ) -> PaymentResult<Option<bool>> {
        self.executions
            .service_for(transfer_id, provider)
            .await?
            .fail_transfer(transfer_id, payload)
            .await
    }

    /// Translate a raw provider callback into canonical update details
    pub fn parse_transfer_update(
        &self,
        provider: PaymentAccountProvider,
        payload: &serde_json::Value,
    ) -> PaymentResult<TransferUpdateDetails> {
        self.executions
            .service(provider)?
            .parse_transfer_update(payload)
    }

    /// Parse and apply a provider callback against the transfer
    pub async fn apply_transfer_update(
        &self,
        transfer_id: TransferId,
        payload: &serde_json::Value,
        provider: Option<PaymentAccountProvider>,
    ) -> PaymentResult<Option<bool>> {
        self.executions
            .service_for(transfer_id, provider)
            .await?
            .apply_transfer_update(transfer_id, payload)
            .await
    }
}
