//! Tabapay backend: debit-card push/pull transfers.
//!
//! Callback vocabulary: `SC` (HTTP-style status code) and `EC` (error
//! code) gate success; `status` of `COMPLETED` completes, `ERROR` fails,
//! anything else is progress. `transactionID` becomes the provider
//! reference.

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

const EC_OK: &str = "0";

pub struct TabapayBackend {
    outbound: mpsc::UnboundedSender<ProviderRequest>,
}

impl TabapayBackend {
    pub fn new(outbound: mpsc::UnboundedSender<ProviderRequest>) -> Arc<Self> {
        Arc::new(Self { outbound })
    }

    fn is_failure(payload: &serde_json::Value) -> bool {
        let bad_sc = payload
            .get("SC")
            .and_then(|v| v.as_u64())
            .map(|sc| !(200..300).contains(&sc))
            .unwrap_or(false);
        let bad_ec = payload
            .get("EC")
            .and_then(|v| v.as_str())
            .map(|ec| ec != EC_OK)
            .unwrap_or(false);
        let errored = payload
            .get("status")
            .and_then(|v| v.as_str())
            .map(|s| s == "ERROR")
            .unwrap_or(false);
        bad_sc || bad_ec || errored
    }
}

#[async_trait]
impl ProviderBackend for TabapayBackend {
    fn provider(&self) -> PaymentAccountProvider {
        PaymentAccountProvider::Tabapay
    }

    async fn execute_transfer(&self, transfer: &Transfer) -> PaymentResult<Option<bool>> {
        if transfer.amount.is_sign_negative() || transfer.amount.is_zero() {
            warn!(transfer_id = %transfer.id, amount = %transfer.amount, "refusing non-positive transaction");
            return Ok(None);
        }

        let request = ProviderRequest {
            provider: self.provider(),
            transfer_id: transfer.id,
            body: serde_json::json!({
                "referenceID": transfer.id,
                "accounts": {
                    "sourceAccountID": transfer.source_account_id,
                    "destinationAccountID": transfer.destination_account_id,
                },
                "amount": transfer.amount.to_string(),
            }),
        };
        if self.outbound.send(request).is_err() {
            error!(transfer_id = %transfer.id, "tabapay outbound queue closed");
            return Ok(None);
        }
        debug!(transfer_id = %transfer.id, "transaction submitted");
        Ok(Some(true))
    }

    fn parse_transfer_update(
        &self,
        payload: &serde_json::Value,
    ) -> PaymentResult<TransferUpdateDetails> {
        if payload.get("SC").is_none() && payload.get("status").is_none() {
            return Err(PaymentError::MissingInput("tabapay SC or status"));
        }

        if Self::is_failure(payload) {
            return Ok(TransferUpdateDetails {
                error: Some(payload.clone()),
                updates: None,
            });
        }

        Ok(TransferUpdateDetails {
            error: None,
            updates: Some(TransferUpdates {
                provider_ref: payload
                    .get("transactionID")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned),
                provider_status: payload
                    .get("status")
                    .and_then(|v| v.as_str())
                    .map(str::to_owned),
            }),
        })
    }

    fn parse_transfer_error(&self, payload: &serde_json::Value) -> TransferErrorDetails {
        let code = payload
            .get("EC")
            .and_then(|v| v.as_str())
            .filter(|ec| *ec != EC_OK)
            .unwrap_or("TABAPAY_UNKNOWN");
        let display_message = payload
            .get("EM")
            .and_then(|v| v.as_str())
            .unwrap_or("Card transfer failed");
        TransferErrorDetails {
            code: code.to_owned(),
            display_message: display_message.to_owned(),
            raw: payload.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn backend() -> Arc<TabapayBackend> {
        let (tx, _rx) = mpsc::unbounded_channel();
        TabapayBackend::new(tx)
    }

    #[test]
    fn test_completed_is_an_update() {
        let details = backend()
            .parse_transfer_update(&serde_json::json!({
                "SC": 200,
                "EC": "0",
                "transactionID": "T9x",
                "status": "COMPLETED",
            }))
            .expect("parse");
        let updates = details.updates.expect("updates");
        assert_eq!(updates.provider_ref.as_deref(), Some("T9x"));
        assert_eq!(updates.provider_status.as_deref(), Some("COMPLETED"));
    }

    #[test]
    fn test_nonzero_ec_is_an_error() {
        let payload = serde_json::json!({
            "SC": 200,
            "EC": "3C171016",
            "EM": "Card declined by network",
        });
        let details = backend().parse_transfer_update(&payload).expect("parse");
        let error = details.error.expect("error payload");
        let parsed = backend().parse_transfer_error(&error);
        assert_eq!(parsed.code, "3C171016");
        assert_eq!(parsed.display_message, "Card declined by network");
    }

    #[test]
    fn test_bad_status_code_is_an_error() {
        let details = backend()
            .parse_transfer_update(&serde_json::json!({"SC": 500, "EC": "0"}))
            .expect("parse");
        assert!(details.error.is_some());
    }
}
