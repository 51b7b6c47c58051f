//! Transfer Execution Providers
//!
//! Pluggable money-movement integrations. Each provider backend knows how
//! to submit a transfer and how to translate its native callback payloads
//! into the canonical update/error shapes; everything else (state
//! transitions, failure records, event emission) lives in the shared
//! [`TransferExecutionService`] so providers cannot diverge on lifecycle
//! behavior.

mod checkbook;
mod fiserv;
mod mock;
mod tabapay;

pub use checkbook::CheckbookBackend;
pub use fiserv::FiservBackend;
pub use mock::MockBackend;
pub use tabapay::TabapayBackend;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, error, warn};

use super::error::{PaymentError, PaymentResult};
use super::events::{EventBus, PaymentEvent};
use super::state::TransferState;
use super::store::PaymentStore;
use super::types::{
    LoanId, PaymentAccountProvider, Transfer, TransferErrorDetails, TransferErrorRecord,
    TransferId, TransferUpdateDetails,
};

/// A provider-native submission built by a backend. Wire delivery is the
/// embedding application's job: backends enqueue requests, the app drains
/// the queue and talks to the provider.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub provider: PaymentAccountProvider,
    pub transfer_id: TransferId,
    pub body: serde_json::Value,
}

/// Provider integration seam.
///
/// `execute_transfer` is tri-state like the rest of the core: Some(true)
/// submitted, Some(false) no-op, None submission failed. Parsing is
/// synchronous; callbacks arrive as opaque JSON and only the owning
/// backend knows the vocabulary.
#[async_trait]
pub trait ProviderBackend: Send + Sync {
    fn provider(&self) -> PaymentAccountProvider;

    async fn execute_transfer(&self, transfer: &Transfer) -> PaymentResult<Option<bool>>;

    /// Translate a provider callback into canonical update details
    fn parse_transfer_update(
        &self,
        payload: &serde_json::Value,
    ) -> PaymentResult<TransferUpdateDetails>;

    /// Translate a provider error payload. Must always produce details;
    /// unrecognized payloads map to a generic code with the raw payload
    /// preserved.
    fn parse_transfer_error(&self, payload: &serde_json::Value) -> TransferErrorDetails;
}

/// Provider-agnostic transfer lifecycle driver bound to one backend.
pub struct TransferExecutionService {
    store: Arc<dyn PaymentStore>,
    bus: Arc<EventBus>,
    backend: Arc<dyn ProviderBackend>,
}

impl TransferExecutionService {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        bus: Arc<EventBus>,
        backend: Arc<dyn ProviderBackend>,
    ) -> Self {
        Self { store, bus, backend }
    }

    pub fn provider(&self) -> PaymentAccountProvider {
        self.backend.provider()
    }

    /// Submit a Created transfer to the provider and move it to Pending.
    ///
    /// A transfer already in flight is a no-op; a terminal transfer is an
    /// out-of-sync fault.
    pub async fn initiate_transfer(&self, transfer_id: TransferId) -> PaymentResult<Option<bool>> {
        let transfer = self.get_transfer(transfer_id).await?;

        match transfer.state {
            TransferState::Created => {}
            TransferState::Pending => {
                debug!(transfer_id = %transfer_id, "transfer already in flight");
                return Ok(Some(false));
            }
            state @ (TransferState::Completed | TransferState::Failed) => {
                return Err(PaymentError::OutOfSync(format!(
                    "transfer {transfer_id} cannot be initiated from {state}"
                )));
            }
        }

        match self.backend.execute_transfer(&transfer).await? {
            Some(true) => {}
            Some(false) => return Ok(Some(false)),
            None => {
                error!(
                    transfer_id = %transfer_id,
                    provider = %self.provider(),
                    "provider rejected transfer submission"
                );
                return Ok(None);
            }
        }

        // CAS: a concurrent initiation that won the race leaves nothing
        // to do here.
        let moved = self
            .store
            .update_transfer_state_if(transfer_id, TransferState::Created, TransferState::Pending)
            .await?;
        if !moved {
            debug!(transfer_id = %transfer_id, "lost initiation race, converging");
            return Ok(Some(false));
        }

        self.bus
            .publish(PaymentEvent::TransferExecuted {
                transfer_id,
                provider: self.provider(),
            })
            .await;
        Ok(Some(true))
    }

    /// Mark the transfer Completed. Idempotent: a repeated completion is
    /// a no-op and emits nothing.
    pub async fn complete_transfer(&self, transfer_id: TransferId) -> PaymentResult<Option<bool>> {
        if !self.store.complete_transfer(transfer_id).await? {
            debug!(transfer_id = %transfer_id, "transfer already completed");
            return Ok(Some(false));
        }

        self.bus
            .publish(PaymentEvent::TransferCompleted {
                transfer_id,
                provider: self.provider(),
            })
            .await;
        Ok(Some(true))
    }

    /// Record a provider-reported failure and mark the transfer Failed.
    ///
    /// The double-failure guard keeps the first error record immutable: a
    /// second failure report for the same transfer is refused.
    pub async fn fail_transfer(
        &self,
        transfer_id: TransferId,
        payload: &serde_json::Value,
    ) -> PaymentResult<Option<bool>> {
        let transfer = self.get_transfer(transfer_id).await?;

        if self.store.get_transfer_error(transfer_id).await?.is_some() {
            warn!(
                transfer_id = %transfer_id,
                provider = %self.provider(),
                "transfer already has a failure record, refusing second failure"
            );
            return Ok(None);
        }

        let details = self.backend.parse_transfer_error(payload);
        let record = TransferErrorRecord {
            transfer_id,
            loan_id: self.loan_id_for(&transfer).await?,
            code: details.code,
            display_message: details.display_message,
            raw: details.raw,
            created_at: Utc::now(),
        };
        if !self.store.create_transfer_error(&record).await? {
            warn!(transfer_id = %transfer_id, "failure record raced into place");
            return Ok(None);
        }

        let failed = self.store.fail_transfer(transfer_id).await?;
        if failed {
            self.bus
                .publish(PaymentEvent::TransferFailed {
                    transfer_id,
                    provider: self.provider(),
                })
                .await;
        }
        Ok(Some(failed))
    }

    /// Parse a raw provider callback without applying it
    pub fn parse_transfer_update(
        &self,
        payload: &serde_json::Value,
    ) -> PaymentResult<TransferUpdateDetails> {
        self.backend.parse_transfer_update(payload)
    }

    /// Parse a provider callback and apply it: an error payload fails the
    /// transfer, field updates are merged, an empty callback is a no-op.
    pub async fn apply_transfer_update(
        &self,
        transfer_id: TransferId,
        payload: &serde_json::Value,
    ) -> PaymentResult<Option<bool>> {
        let details = self.backend.parse_transfer_update(payload)?;

        if let Some(error) = &details.error {
            return self.fail_transfer(transfer_id, error).await;
        }

        if let Some(updates) = &details.updates {
            let changed = self
                .store
                .apply_transfer_updates(transfer_id, updates)
                .await?;
            return Ok(Some(changed));
        }

        debug!(transfer_id = %transfer_id, "callback carried nothing to apply");
        Ok(Some(false))
    }

    /// Denormalize the loan id for the failure record via the owning step
    /// and payment. Free-standing transfers have no loan.
    async fn loan_id_for(&self, transfer: &Transfer) -> PaymentResult<Option<LoanId>> {
        let Some(step_id) = transfer.loan_payment_step_id else {
            return Ok(None);
        };
        let Some(step) = self.store.get_step(step_id).await? else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_payment(step.loan_payment_id)
            .await?
            .map(|p| p.loan_id))
    }

    async fn get_transfer(&self, transfer_id: TransferId) -> PaymentResult<Transfer> {
        self.store
            .get_transfer(transfer_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("Transfer", transfer_id))
    }
}

/// Routes a transfer to the execution service of its provider.
///
/// Construction validates that every known provider has a backend, so an
/// unmapped provider fails the process at wiring time instead of on the
/// first live transfer.
pub struct TransferExecutionFactory {
    store: Arc<dyn PaymentStore>,
    services: HashMap<PaymentAccountProvider, Arc<TransferExecutionService>>,
}

impl TransferExecutionFactory {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        bus: Arc<EventBus>,
        backends: Vec<Arc<dyn ProviderBackend>>,
    ) -> PaymentResult<Self> {
        let mut services = HashMap::new();
        for backend in backends {
            let provider = backend.provider();
            services.insert(
                provider,
                Arc::new(TransferExecutionService::new(
                    store.clone(),
                    bus.clone(),
                    backend,
                )),
            );
        }

        for provider in PaymentAccountProvider::ALL {
            if !services.contains_key(&provider) {
                return Err(PaymentError::Unmapped {
                    kind: "PaymentAccountProvider",
                    value: provider.to_string(),
                });
            }
        }

        Ok(Self { store, services })
    }

    pub fn service(
        &self,
        provider: PaymentAccountProvider,
    ) -> PaymentResult<&Arc<TransferExecutionService>> {
        self.services
            .get(&provider)
            .ok_or_else(|| PaymentError::Unmapped {
                kind: "PaymentAccountProvider",
                value: provider.to_string(),
            })
    }

    /// Resolve the service for a transfer: an explicit provider override
    /// wins, otherwise the destination account's provider decides.
    pub async fn service_for(
        &self,
        transfer_id: TransferId,
        provider: Option<PaymentAccountProvider>,
    ) -> PaymentResult<&Arc<TransferExecutionService>> {
        let provider = match provider {
            Some(provider) => provider,
            None => {
                let transfer = self
                    .store
                    .get_transfer(transfer_id)
                    .await?
                    .ok_or_else(|| PaymentError::not_found("Transfer", transfer_id))?;
                let account = self
                    .store
                    .get_account(transfer.destination_account_id)
                    .await?
                    .ok_or_else(|| {
                        PaymentError::not_found("PaymentAccount", transfer.destination_account_id)
                    })?;
                account.provider
            }
        };
        self.service(provider)
    }
}
