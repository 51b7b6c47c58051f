//! Checkbook backend: digital checks between bank accounts.
//!
//! Callback vocabulary: `status` of `PAID` completes, `IN_PROCESS` /
//! `UNPAID` are progress updates, `FAILED` / `VOID` / `RETURNED` report
//! failure. The check `id` becomes the provider reference.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::payment::error::{PaymentError, PaymentResult};
use crate::payment::types::{
    PaymentAccountProvider, Transfer, TransferErrorDetails, TransferUpdateDetails,
    TransferUpdates,
};

use super::{ProviderBackend, ProviderRequest};

const FAILURE_STATUSES: [&str; 3] = ["FAILED", "VOID", "RETURNED"];

pub struct CheckbookBackend {
    outbound: mpsc::UnboundedSender<ProviderRequest>,
}

impl CheckbookBackend {
    pub fn new(outbound: mpsc::UnboundedSender<ProviderRequest>) -> Arc<Self> {
        Arc::new(Self { outbound })
    }
}

#[async_trait]
impl ProviderBackend for CheckbookBackend {
    fn provider(&self) -> PaymentAccountProvider {
        PaymentAccountProvider::Checkbook
    }

    async fn execute_transfer(&self, transfer: &Transfer) -> PaymentResult<Option<bool>> {
        if transfer.amount.is_sign_negative() || transfer.amount.is_zero() {
            warn!(transfer_id = %transfer.id, amount = %transfer.amount, "refusing non-positive check");
            return Ok(None);
        }

        let request = ProviderRequest {
            provider: self.provider(),
            transfer_id: transfer.id,
            body: serde_json::json!({
                "recipient": transfer.destination_account_id,
                "amount": transfer.amount,
                "description": format!("transfer {}", transfer.id),
            }),
        };
        if self.outbound.send(request).is_err() {
            error!(transfer_id = %transfer.id, "checkbook outbound queue closed");
            return Ok(None);
        }
        debug!(transfer_id = %transfer.id, "check submitted");
        Ok(Some(true))
    }

    fn parse_transfer_update(
        &self,
        payload: &serde_json::Value,
    ) -> PaymentResult<TransferUpdateDetails> {
        let status = payload
            .get("status")
            .and_then(|s| s.as_str())
            .ok_or(PaymentError::MissingInput("checkbook status"))?;

        if FAILURE_STATUSES.contains(&status) {
            return Ok(TransferUpdateDetails {
                error: Some(payload.clone()),
                updates: None,
            });
        }

        Ok(TransferUpdateDetails {
            error: None,
            updates: Some(TransferUpdates {
                provider_ref: payload
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned),
                provider_status: Some(status.to_owned()),
            }),
        })
    }

    fn parse_transfer_error(&self, payload: &serde_json::Value) -> TransferErrorDetails {
        let code = payload
            .get("error_code")
            .or_else(|| payload.get("status"))
            .and_then(|v| v.as_str())
            .unwrap_or("CHECKBOOK_UNKNOWN");
        let display_message = payload
            .get("error")
            .and_then(|v| v.as_str())
            .unwrap_or("Check could not be delivered");
        TransferErrorDetails {
            code: code.to_owned(),
            display_message: display_message.to_owned(),
            raw: payload.clone(),
        }
    }
}
