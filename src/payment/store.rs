//! Payment Store
//!
//! Persistence seam for the orchestration core. The storage technology is
//! an external collaborator, so the core only sees this trait; state
//! updates are expressed as compare-and-swap style operations so that
//! concurrent duplicate deliveries converge instead of clobbering.
//!
//! `MemoryStore` is the in-process implementation used by tests and the
//! demo runner.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;

use super::error::{PaymentError, PaymentResult};
use super::state::{LoanPaymentState, PaymentStepState, TransferState};
use super::types::{
    AccountId, Loan, LoanId, LoanPayment, LoanPaymentStep, PaymentAccount, PaymentId, StepId,
    Transfer, TransferErrorRecord, TransferId, TransferUpdates,
};

#[async_trait]
pub trait PaymentStore: Send + Sync {
    // Loans and accounts are owned elsewhere; read-only here.
    async fn get_loan(&self, loan_id: LoanId) -> PaymentResult<Option<Loan>>;
    async fn get_account(&self, account_id: AccountId) -> PaymentResult<Option<PaymentAccount>>;

    async fn get_payment(&self, payment_id: PaymentId) -> PaymentResult<Option<LoanPayment>>;
    async fn payments_for_loan(&self, loan_id: LoanId) -> PaymentResult<Vec<LoanPayment>>;
    async fn create_payment(&self, payment: &LoanPayment) -> PaymentResult<()>;
    /// Persist an aggregated payment state; `completed_at` is set only
    /// the first time the payment completes.
    async fn update_payment_state(
        &self,
        payment_id: PaymentId,
        new_state: LoanPaymentState,
        completed_at: Option<DateTime<Utc>>,
    ) -> PaymentResult<bool>;

    async fn get_step(&self, step_id: StepId) -> PaymentResult<Option<LoanPaymentStep>>;
    /// Steps ordered by their `order` field
    async fn steps_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> PaymentResult<Vec<LoanPaymentStep>>;
    async fn create_steps(&self, steps: &[LoanPaymentStep]) -> PaymentResult<()>;
    async fn update_step_state(
        &self,
        step_id: StepId,
        new_state: PaymentStepState,
    ) -> PaymentResult<bool>;

    async fn get_transfer(&self, transfer_id: TransferId) -> PaymentResult<Option<Transfer>>;
    /// Attempts ordered by attempt `order`
    async fn transfers_for_step(&self, step_id: StepId) -> PaymentResult<Vec<Transfer>>;
    /// The authoritative attempt: highest order for the step
    async fn latest_transfer_for_step(
        &self,
        step_id: StepId,
    ) -> PaymentResult<Option<Transfer>>;
    async fn create_transfer(&self, transfer: &Transfer) -> PaymentResult<()>;
    /// CAS update: only applies when the current state matches `expected`.
    /// Returns false when another writer got there first.
    async fn update_transfer_state_if(
        &self,
        transfer_id: TransferId,
        expected: TransferState,
        new_state: TransferState,
    ) -> PaymentResult<bool>;
    /// Idempotent completion: false when already Completed
    async fn complete_transfer(&self, transfer_id: TransferId) -> PaymentResult<bool>;
    /// Idempotent failure mark: false when already Failed
    async fn fail_transfer(&self, transfer_id: TransferId) -> PaymentResult<bool>;
    async fn apply_transfer_updates(
        &self,
        transfer_id: TransferId,
        updates: &TransferUpdates,
    ) -> PaymentResult<bool>;

    async fn get_transfer_error(
        &self,
        transfer_id: TransferId,
    ) -> PaymentResult<Option<TransferErrorRecord>>;
    /// Insert-once: false when a record already exists for the transfer
    async fn create_transfer_error(&self, record: &TransferErrorRecord) -> PaymentResult<bool>;
}

/// In-memory store backed by concurrent maps
#[derive(Default)]
pub struct MemoryStore {
    loans: DashMap<LoanId, Loan>,
    accounts: DashMap<AccountId, PaymentAccount>,
    payments: DashMap<PaymentId, LoanPayment>,
    steps: DashMap<StepId, LoanPaymentStep>,
    transfers: DashMap<TransferId, Transfer>,
    transfer_errors: DashMap<TransferId, TransferErrorRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a loan view (loans are read-only from the core's perspective)
    pub fn insert_loan(&self, loan: Loan) {
        self.loans.insert(loan.id, loan);
    }

    pub fn insert_account(&self, account: PaymentAccount) {
        self.accounts.insert(account.id, account);
    }
}

#[async_trait]
impl PaymentStore for MemoryStore {
    async fn get_loan(&self, loan_id: LoanId) -> PaymentResult<Option<Loan>> {
        Ok(self.loans.get(&loan_id).map(|l| l.clone()))
    }

    async fn get_account(&self, account_id: AccountId) -> PaymentResult<Option<PaymentAccount>> {
        Ok(self.accounts.get(&account_id).map(|a| a.clone()))
    }

    async fn get_payment(&self, payment_id: PaymentId) -> PaymentResult<Option<LoanPayment>> {
        Ok(self.payments.get(&payment_id).map(|p| p.clone()))
    }

    async fn payments_for_loan(&self, loan_id: LoanId) -> PaymentResult<Vec<LoanPayment>> {
        let mut payments: Vec<LoanPayment> = self
            .payments
            .iter()
            .filter(|p| p.loan_id == loan_id)
            .map(|p| p.clone())
            .collect();
        payments.sort_by_key(|p| p.created_at);
        Ok(payments)
    }

    async fn create_payment(&self, payment: &LoanPayment) -> PaymentResult<()> {
        self.payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn update_payment_state(
        &self,
        payment_id: PaymentId,
        new_state: LoanPaymentState,
        completed_at: Option<DateTime<Utc>>,
    ) -> PaymentResult<bool> {
        let mut payment = self
            .payments
            .get_mut(&payment_id)
            .ok_or_else(|| PaymentError::not_found("LoanPayment", payment_id))?;
        payment.state = new_state;
        if payment.completed_at.is_none() {
            payment.completed_at = completed_at;
        }
        Ok(true)
    }

    async fn get_step(&self, step_id: StepId) -> PaymentResult<Option<LoanPaymentStep>> {
        Ok(self.steps.get(&step_id).map(|s| s.clone()))
    }

    async fn steps_for_payment(
        &self,
        payment_id: PaymentId,
    ) -> PaymentResult<Vec<LoanPaymentStep>> {
        let mut steps: Vec<LoanPaymentStep> = self
            .steps
            .iter()
            .filter(|s| s.loan_payment_id == payment_id)
            .map(|s| s.clone())
            .collect();
        steps.sort_by_key(|s| s.order);
        Ok(steps)
    }

    async fn create_steps(&self, steps: &[LoanPaymentStep]) -> PaymentResult<()> {
        for step in steps {
            self.steps.insert(step.id, step.clone());
        }
        Ok(())
    }

    async fn update_step_state(
        &self,
        step_id: StepId,
        new_state: PaymentStepState,
    ) -> PaymentResult<bool> {
        let mut step = self
            .steps
            .get_mut(&step_id)
            .ok_or_else(|| PaymentError::not_found("LoanPaymentStep", step_id))?;
        if step.state == new_state {
            return Ok(false);
        }
        step.state = new_state;
        Ok(true)
    }

    async fn get_transfer(&self, transfer_id: TransferId) -> PaymentResult<Option<Transfer>> {
        Ok(self.transfers.get(&transfer_id).map(|t| t.clone()))
    }

    async fn transfers_for_step(&self, step_id: StepId) -> PaymentResult<Vec<Transfer>> {
        let mut transfers: Vec<Transfer> = self
            .transfers
            .iter()
            .filter(|t| t.loan_payment_step_id == Some(step_id))
            .map(|t| t.clone())
            .collect();
        transfers.sort_by_key(|t| t.order);
        Ok(transfers)
    }

    async fn latest_transfer_for_step(
        &self,
        step_id: StepId,
    ) -> PaymentResult<Option<Transfer>> {
        Ok(self
            .transfers_for_step(step_id)
            .await?
            .into_iter()
            .max_by_key(|t| t.order))
    }

    async fn create_transfer(&self, transfer: &Transfer) -> PaymentResult<()> {
        self.transfers.insert(transfer.id, transfer.clone());
        Ok(())
    }

    async fn update_transfer_state_if(
        &self,
        transfer_id: TransferId,
        expected: TransferState,
        new_state: TransferState,
    ) -> PaymentResult<bool> {
        let mut transfer = self
            .transfers
            .get_mut(&transfer_id)
            .ok_or_else(|| PaymentError::not_found("Transfer", transfer_id))?;
        if transfer.state != expected {
            return Ok(false);
        }
        transfer.state = new_state;
        transfer.updated_at = Utc::now();
        Ok(true)
    }

    async fn complete_transfer(&self, transfer_id: TransferId) -> PaymentResult<bool> {
        let mut transfer = self
            .transfers
            .get_mut(&transfer_id)
            .ok_or_else(|| PaymentError::not_found("Transfer", transfer_id))?;
        if transfer.state == TransferState::Completed {
            return Ok(false);
        }
        transfer.state = TransferState::Completed;
        transfer.updated_at = Utc::now();
        Ok(true)
    }

    async fn fail_transfer(&self, transfer_id: TransferId) -> PaymentResult<bool> {
        let mut transfer = self
            .transfers
            .get_mut(&transfer_id)
            .ok_or_else(|| PaymentError::not_found("Transfer", transfer_id))?;
        if transfer.state == TransferState::Failed {
            return Ok(false);
        }
        transfer.state = TransferState::Failed;
        transfer.updated_at = Utc::now();
        Ok(true)
    }

    async fn apply_transfer_updates(
        &self,
        transfer_id: TransferId,
        updates: &TransferUpdates,
    ) -> PaymentResult<bool> {
        let mut transfer = self
            .transfers
            .get_mut(&transfer_id)
            .ok_or_else(|| PaymentError::not_found("Transfer", transfer_id))?;
        let mut changed = false;
        if let Some(provider_ref) = &updates.provider_ref {
            transfer.provider_ref = Some(provider_ref.clone());
            changed = true;
        }
        if let Some(provider_status) = &updates.provider_status {
            transfer.provider_status = Some(provider_status.clone());
            changed = true;
        }
        if changed {
            transfer.updated_at = Utc::now();
        }
        Ok(changed)
    }

    async fn get_transfer_error(
        &self,
        transfer_id: TransferId,
    ) -> PaymentResult<Option<TransferErrorRecord>> {
        Ok(self.transfer_errors.get(&transfer_id).map(|e| e.clone()))
    }

    async fn create_transfer_error(&self, record: &TransferErrorRecord) -> PaymentResult<bool> {
        match self.transfer_errors.entry(record.transfer_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => Ok(false),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(record.clone());
                Ok(true)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn transfer() -> Transfer {
        let now = Utc::now();
        Transfer {
            id: TransferId::new(),
            loan_payment_step_id: None,
            order: 0,
            amount: Decimal::from(100),
            state: TransferState::Created,
            source_account_id: AccountId::new(),
            destination_account_id: AccountId::new(),
            provider_ref: None,
            provider_status: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_transfer_cas_update() {
        let store = MemoryStore::new();
        let t = transfer();
        store.create_transfer(&t).await.expect("create");

        let moved = store
            .update_transfer_state_if(t.id, TransferState::Created, TransferState::Pending)
            .await
            .expect("cas");
        assert!(moved);

        // Second CAS against the old state loses
        let moved_again = store
            .update_transfer_state_if(t.id, TransferState::Created, TransferState::Pending)
            .await
            .expect("cas");
        assert!(!moved_again);
    }

    #[tokio::test]
    async fn test_complete_transfer_idempotent() {
        let store = MemoryStore::new();
        let t = transfer();
        store.create_transfer(&t).await.expect("create");

        assert!(store.complete_transfer(t.id).await.expect("first"));
        assert!(!store.complete_transfer(t.id).await.expect("second"));
    }

    #[tokio::test]
    async fn test_transfer_error_written_once() {
        let store = MemoryStore::new();
        let t = transfer();
        store.create_transfer(&t).await.expect("create");

        let record = TransferErrorRecord {
            transfer_id: t.id,
            loan_id: None,
            code: "declined".into(),
            display_message: "Transfer declined".into(),
            raw: serde_json::json!({"reason": "declined"}),
            created_at: Utc::now(),
        };
        assert!(store.create_transfer_error(&record).await.expect("first"));
        assert!(!store.create_transfer_error(&record).await.expect("second"));
    }

    #[tokio::test]
    async fn test_latest_transfer_is_highest_order() {
        let store = MemoryStore::new();
        let step_id = StepId::new();
        for order in 0..3u32 {
            let mut t = transfer();
            t.loan_payment_step_id = Some(step_id);
            t.order = order;
            store.create_transfer(&t).await.expect("create");
        }

        let latest = store
            .latest_transfer_for_step(step_id)
            .await
            .expect("query")
            .expect("some");
        assert_eq!(latest.order, 2);
    }

    #[tokio::test]
    async fn test_missing_transfer_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .complete_transfer(TransferId::new())
            .await
            .expect_err("missing");
        assert_eq!(err.code(), "ENTITY_NOT_FOUND");
    }
}
