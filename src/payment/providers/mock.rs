//! Scriptable in-process backend for tests and the demo runner.

use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::payment::error::{PaymentError, PaymentResult};
use crate::payment::types::{
    PaymentAccountProvider, Transfer, TransferErrorDetails, TransferId, TransferUpdateDetails,
    TransferUpdates,
};

use super::ProviderBackend;

/// Accepts every submission (unless scripted to refuse) and records what
/// it saw. Callback vocabulary mirrors the canonical shape directly:
/// `{"status": "failed", ...}` is an error, anything else is an update.
pub struct MockBackend {
    provider: PaymentAccountProvider,
    refuse_submissions: AtomicBool,
    executed: Mutex<Vec<TransferId>>,
}

impl MockBackend {
    pub fn new(provider: PaymentAccountProvider) -> Self {
        Self {
            provider,
            refuse_submissions: AtomicBool::new(false),
            executed: Mutex::new(Vec::new()),
        }
    }

    /// Script the backend to refuse all further submissions
    pub fn refuse_submissions(&self) {
        self.refuse_submissions.store(true, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<TransferId> {
        self.executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProviderBackend for MockBackend {
    fn provider(&self) -> PaymentAccountProvider {
        self.provider
    }

    async fn execute_transfer(&self, transfer: &Transfer) -> PaymentResult<Option<bool>> {
        if self.refuse_submissions.load(Ordering::SeqCst) {
            debug!(transfer_id = %transfer.id, "scripted submission refusal");
            return Ok(None);
        }
        self.executed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(transfer.id);
        Ok(Some(true))
    }

    fn parse_transfer_update(
        &self,
        payload: &serde_json::Value,
    ) -> PaymentResult<TransferUpdateDetails> {
        let status = payload
            .get("status")
            .and_then(|s| s.as_str())
            .ok_or(PaymentError::MissingInput("mock status"))?;

        if status == "failed" {
            return Ok(TransferUpdateDetails {
                error: Some(payload.clone()),
                updates: None,
            });
        }

        Ok(TransferUpdateDetails {
            error: None,
            updates: Some(TransferUpdates {
                provider_ref: payload
                    .get("ref")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned),
                provider_status: Some(status.to_owned()),
            }),
        })
    }

    fn parse_transfer_error(&self, payload: &serde_json::Value) -> TransferErrorDetails {
        TransferErrorDetails {
            code: payload
                .get("code")
                .and_then(|v| v.as_str())
                .unwrap_or("MOCK_FAILURE")
                .to_owned(),
            display_message: payload
                .get("message")
                .and_then(|v| v.as_str())
                .unwrap_or("Transfer failed")
                .to_owned(),
            raw: payload.clone(),
        }
    }
}
