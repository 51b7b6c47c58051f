//! Fiserv backend: card-network transfers.
//!
//! Callback vocabulary: `transactionStatus` of `APPROVED` progresses or
//! completes, `DECLINED` / `FAILED` reports failure. `ipgTransactionId`
//! becomes the provider reference.

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

pub struct FiservBackend {
    outbound: mpsc::UnboundedSender<ProviderRequest>,
}

impl FiservBackend {
    pub fn new(outbound: mpsc::UnboundedSender<ProviderRequest>) -> Arc<Self> {
        Arc::new(Self { outbound })
    }
}

#[async_trait]
impl ProviderBackend for FiservBackend {
    fn provider(&self) -> PaymentAccountProvider {
        PaymentAccountProvider::Fiserv
    }

    async fn execute_transfer(&self, transfer: &Transfer) -> PaymentResult<Option<bool>> {
        if transfer.amount.is_sign_negative() || transfer.amount.is_zero() {
            warn!(transfer_id = %transfer.id, amount = %transfer.amount, "refusing non-positive sale");
            return Ok(None);
        }

        let request = ProviderRequest {
            provider: self.provider(),
            transfer_id: transfer.id,
            body: serde_json::json!({
                "requestType": "PaymentCardSaleTransaction",
                "transactionAmount": { "total": transfer.amount, "currency": "USD" },
                "merchantTransactionId": transfer.id,
            }),
        };
        if self.outbound.send(request).is_err() {
            error!(transfer_id = %transfer.id, "fiserv outbound queue closed");
            return Ok(None);
        }
        debug!(transfer_id = %transfer.id, "sale submitted");
        Ok(Some(true))
    }

    fn parse_transfer_update(
        &self,
        payload: &serde_json::Value,
    ) -> PaymentResult<TransferUpdateDetails> {
        let status = payload
            .get("transactionStatus")
            .and_then(|s| s.as_str())
            .ok_or(PaymentError::MissingInput("fiserv transactionStatus"))?;

        if matches!(status, "DECLINED" | "FAILED") {
            return Ok(TransferUpdateDetails {
                error: Some(payload.clone()),
                updates: None,
            });
        }

        Ok(TransferUpdateDetails {
            error: None,
            updates: Some(TransferUpdates {
                provider_ref: payload
                    .get("ipgTransactionId")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned),
                provider_status: Some(status.to_owned()),
            }),
        })
    }

    fn parse_transfer_error(&self, payload: &serde_json::Value) -> TransferErrorDetails {
        let code = payload
            .get("errorCode")
            .or_else(|| payload.get("transactionStatus"))
            .and_then(|v| v.as_str())
            .unwrap_or("FISERV_UNKNOWN");
        let display_message = payload
            .get("errorMessage")
            .and_then(|v| v.as_str())
            .unwrap_or("Card transaction was declined");
        TransferErrorDetails {
            code: code.to_owned(),
            display_message: display_message.to_owned(),
            raw: payload.clone(),
        }
    }
}
