//! End-to-end scenarios over the fully wired system: in-memory store,
//! mock provider backends, real bus and handlers.

use std::sync::Arc;

use rust_decimal::Decimal;

use super::events::PaymentEvent;
use super::handlers::LoanTransitionTable;
use super::providers::{MockBackend, ProviderBackend};
use super::routes::{PaymentsRoute, PaymentsRouteStep, RouteKey, RoutingTable};
use super::state::{LoanPaymentState, LoanState, PaymentStepState, TransferState};
use super::store::{MemoryStore, PaymentStore};
use super::system::PaymentSystem;
use super::transport::RemoteEnvelope;
use super::types::{
    AccountId, AccountOwnership, AccountType, Loan, LoanId, LoanPayment, LoanPaymentStep,
    LoanPaymentType, LoanType, PaymentAccount, PaymentAccountProvider, PaymentId, Transfer,
};

struct Fixture {
    store: Arc<MemoryStore>,
    system: PaymentSystem,
    loan: Loan,
}

/// Wire a system around one loan. `route_shapes` lists (stage, hop count)
/// pairs; the account pair per stage follows the stage's direction.
fn fixture(route_shapes: &[(LoanPaymentType, usize)]) -> Fixture {
    let store = Arc::new(MemoryStore::new());

    let lender = PaymentAccount {
        id: AccountId::new(),
        account_type: AccountType::BankAccount,
        ownership: AccountOwnership::Personal,
        provider: PaymentAccountProvider::Checkbook,
    };
    let borrower = PaymentAccount {
        id: AccountId::new(),
        account_type: AccountType::DebitCard,
        ownership: AccountOwnership::Personal,
        provider: PaymentAccountProvider::Tabapay,
    };
    let biller = PaymentAccount {
        id: AccountId::new(),
        account_type: AccountType::BankAccount,
        ownership: AccountOwnership::Internal,
        provider: PaymentAccountProvider::Checkbook,
    };
    store.insert_account(lender.clone());
    store.insert_account(borrower.clone());
    store.insert_account(biller.clone());

    let loan = Loan {
        id: LoanId::new(),
        loan_type: LoanType::BillPay,
        state: LoanState::Accepted,
        amount: Decimal::from(100),
        fee_amount: Decimal::from(5),
        payments_count: 2,
        lender_account_id: Some(lender.id),
        borrower_account_id: Some(borrower.id),
        biller_payment_account_id: Some(biller.id),
    };
    store.insert_loan(loan.clone());

    let routes = route_shapes
        .iter()
        .map(|&(stage, hops)| {
            let (from, to) = match stage {
                LoanPaymentType::Repayment => (&borrower, &lender),
                _ => (&lender, &biller),
            };
            PaymentsRoute {
                key: RouteKey::for_accounts(from, to, stage, loan.loan_type),
                steps: (0..hops).map(|_| PaymentsRouteStep::default()).collect(),
            }
        })
        .collect();

    let backends: Vec<Arc<dyn ProviderBackend>> = PaymentAccountProvider::ALL
        .into_iter()
        .map(|p| Arc::new(MockBackend::new(p)) as Arc<dyn ProviderBackend>)
        .collect();

    let system = PaymentSystem::new(
        store.clone(),
        Arc::new(RoutingTable::new(routes)),
        backends,
        Arc::new(LoanTransitionTable::default()),
    )
    .expect("wiring");

    Fixture { store, system, loan }
}

async fn only_payment(store: &MemoryStore, loan_id: LoanId) -> LoanPayment {
    let payments = store.payments_for_loan(loan_id).await.expect("payments");
    assert_eq!(payments.len(), 1, "expected exactly one payment");
    payments.into_iter().next().expect("payment")
}

async fn steps(store: &MemoryStore, payment_id: PaymentId) -> Vec<LoanPaymentStep> {
    store.steps_for_payment(payment_id).await.expect("steps")
}

async fn latest_transfer(store: &MemoryStore, step: &LoanPaymentStep) -> Transfer {
    store
        .latest_transfer_for_step(step.id)
        .await
        .expect("query")
        .expect("transfer")
}

#[tokio::test]
async fn test_funding_runs_first_hop_to_completion() {
    let f = fixture(&[(LoanPaymentType::Funding, 2)]);

    f.system
        .bus()
        .publish(PaymentEvent::LoanStateChanged {
            loan_id: f.loan.id,
            old_state: LoanState::Accepted,
            new_state: LoanState::Funding,
        })
        .await;

    // Funding owns only the first hop of the two-hop route
    let payment = only_payment(&f.store, f.loan.id).await;
    assert_eq!(payment.payment_type, LoanPaymentType::Funding);
    // Lender covers principal plus fee upfront
    assert_eq!(payment.amount, Decimal::from(105));
    assert_eq!(payment.state, LoanPaymentState::Pending);

    let payment_steps = steps(&f.store, payment.id).await;
    assert_eq!(payment_steps.len(), 1);
    assert_eq!(payment_steps[0].state, PaymentStepState::Pending);

    let transfer = latest_transfer(&f.store, &payment_steps[0]).await;
    assert_eq!(transfer.state, TransferState::Created);

    // Provider accepts, then reports completion
    f.system
        .service()
        .initiate_transfer(transfer.id, None)
        .await
        .expect("initiate");
    f.system
        .service()
        .complete_transfer(transfer.id, None)
        .await
        .expect("complete");

    let payment = only_payment(&f.store, f.loan.id).await;
    assert_eq!(payment.state, LoanPaymentState::Completed);
    assert!(payment.completed_at.is_some());
    let payment_steps = steps(&f.store, payment.id).await;
    assert_eq!(payment_steps[0].state, PaymentStepState::Completed);
}

#[tokio::test]
async fn test_completed_step_starts_its_successor() {
    let f = fixture(&[(LoanPaymentType::Repayment, 2)]);

    f.system
        .bus()
        .publish(PaymentEvent::LoanStateChanged {
            loan_id: f.loan.id,
            old_state: LoanState::Disbursed,
            new_state: LoanState::Repaying,
        })
        .await;

    let payment = only_payment(&f.store, f.loan.id).await;
    assert_eq!(payment.payment_number, Some(1));
    // Even split across the plan's two installments
    assert_eq!(payment.amount, Decimal::from(50));

    let payment_steps = steps(&f.store, payment.id).await;
    assert_eq!(payment_steps.len(), 2);
    assert_eq!(payment_steps[0].state, PaymentStepState::Pending);
    // Second step waits for the first
    assert_eq!(payment_steps[1].state, PaymentStepState::Created);

    let first = latest_transfer(&f.store, &payment_steps[0]).await;
    f.system
        .service()
        .initiate_transfer(first.id, None)
        .await
        .expect("initiate");
    f.system
        .service()
        .complete_transfer(first.id, None)
        .await
        .expect("complete");

    // Completing hop 0 must have started hop 1
    let payment_steps = steps(&f.store, payment.id).await;
    assert_eq!(payment_steps[0].state, PaymentStepState::Completed);
    assert_eq!(payment_steps[1].state, PaymentStepState::Pending);
    let second = latest_transfer(&f.store, &payment_steps[1]).await;
    assert_eq!(second.state, TransferState::Created);

    f.system
        .service()
        .initiate_transfer(second.id, None)
        .await
        .expect("initiate");
    f.system
        .service()
        .complete_transfer(second.id, None)
        .await
        .expect("complete");

    let payment = only_payment(&f.store, f.loan.id).await;
    assert_eq!(payment.state, LoanPaymentState::Completed);
}

#[tokio::test]
async fn test_zero_fee_completes_without_moving_money() {
    let f = fixture(&[(LoanPaymentType::Fee, 1)]);
    let mut loan = f.loan.clone();
    loan.fee_amount = Decimal::ZERO;
    f.store.insert_loan(loan.clone());

    let result = f
        .system
        .service()
        .initiate_loan_payment(loan.id, LoanPaymentType::Fee)
        .await
        .expect("initiate");
    // Already Completed at creation, so the advance is a no-op
    assert_eq!(result, Some(false));

    let payment = only_payment(&f.store, loan.id).await;
    assert_eq!(payment.state, LoanPaymentState::Completed);
    assert!(payment.completed_at.is_some());
    assert!(steps(&f.store, payment.id).await.is_empty());
}

#[tokio::test]
async fn test_failure_report_fails_step_and_payment_once() {
    let f = fixture(&[(LoanPaymentType::Funding, 2)]);

    f.system
        .bus()
        .publish(PaymentEvent::LoanStateChanged {
            loan_id: f.loan.id,
            old_state: LoanState::Accepted,
            new_state: LoanState::Funding,
        })
        .await;

    let payment = only_payment(&f.store, f.loan.id).await;
    let payment_steps = steps(&f.store, payment.id).await;
    let transfer = latest_transfer(&f.store, &payment_steps[0]).await;

    f.system
        .service()
        .initiate_transfer(transfer.id, None)
        .await
        .expect("initiate");

    let payload = serde_json::json!({"code": "R01", "message": "insufficient funds"});
    let first = f
        .system
        .service()
        .fail_transfer(transfer.id, &payload, None)
        .await
        .expect("fail");
    assert_eq!(first, Some(true));

    let payment = only_payment(&f.store, f.loan.id).await;
    assert_eq!(payment.state, LoanPaymentState::Failed);
    let payment_steps = steps(&f.store, payment.id).await;
    assert_eq!(payment_steps[0].state, PaymentStepState::Failed);

    // A second failure report must not touch the first record
    let second = f
        .system
        .service()
        .fail_transfer(transfer.id, &payload, None)
        .await
        .expect("fail again");
    assert_eq!(second, None);

    let record = f
        .store
        .get_transfer_error(transfer.id)
        .await
        .expect("query")
        .expect("record");
    assert_eq!(record.code, "R01");
    assert_eq!(record.loan_id, Some(f.loan.id));
}

#[tokio::test]
async fn test_duplicate_remote_delivery_is_one_payment() {
    let f = fixture(&[(LoanPaymentType::Funding, 2)]);

    let envelope = RemoteEnvelope {
        message_id: "msg-77".into(),
        event: PaymentEvent::LoanStateChanged {
            loan_id: f.loan.id,
            old_state: LoanState::Accepted,
            new_state: LoanState::Funding,
        },
    };
    let raw = serde_json::to_string(&envelope).expect("serialize");

    assert!(f.system.transport().deliver(&raw).await.expect("first"));
    assert!(!f.system.transport().deliver(&raw).await.expect("second"));

    // Even a fresh message id converges: the duplicate-payment guard holds
    let envelope = RemoteEnvelope {
        message_id: "msg-78".into(),
        event: envelope.event.clone(),
    };
    let raw = serde_json::to_string(&envelope).expect("serialize");
    assert!(f.system.transport().deliver(&raw).await.expect("redelivery"));

    only_payment(&f.store, f.loan.id).await;
}

#[tokio::test]
async fn test_step_advancement_is_idempotent() {
    let f = fixture(&[(LoanPaymentType::Funding, 2)]);

    f.system
        .service()
        .initiate_loan_payment(f.loan.id, LoanPaymentType::Funding)
        .await
        .expect("initiate");

    let payment = only_payment(&f.store, f.loan.id).await;
    let payment_steps = steps(&f.store, payment.id).await;
    let step = &payment_steps[0];
    assert_eq!(step.state, PaymentStepState::Pending);

    // Step Pending with a Created transfer: advancing again must not
    // spawn another attempt.
    let result = f
        .system
        .service()
        .advance_payment_step(step.id)
        .await
        .expect("advance");
    assert_eq!(result, Some(false));
    let attempts = f.store.transfers_for_step(step.id).await.expect("attempts");
    assert_eq!(attempts.len(), 1);
}

#[tokio::test]
async fn test_repayment_numbering_stops_at_plan_length() {
    let f = fixture(&[(LoanPaymentType::Repayment, 1)]);

    for expected in 1..=2u32 {
        f.system
            .service()
            .initiate_loan_payment(f.loan.id, LoanPaymentType::Repayment)
            .await
            .expect("initiate");
        let payments = f
            .store
            .payments_for_loan(f.loan.id)
            .await
            .expect("payments");
        assert_eq!(payments.len(), expected as usize);
        assert_eq!(payments.last().expect("last").payment_number, Some(expected));
    }

    // The plan has two installments; a third initiation is refused
    let third = f
        .system
        .service()
        .initiate_loan_payment(f.loan.id, LoanPaymentType::Repayment)
        .await
        .expect("initiate");
    assert_eq!(third, None);
    let payments = f
        .store
        .payments_for_loan(f.loan.id)
        .await
        .expect("payments");
    assert_eq!(payments.len(), 2);
}

#[tokio::test]
async fn test_single_occurrence_payment_cannot_duplicate() {
    let f = fixture(&[(LoanPaymentType::Funding, 2)]);

    f.system
        .service()
        .initiate_loan_payment(f.loan.id, LoanPaymentType::Funding)
        .await
        .expect("first");
    let second = f
        .system
        .service()
        .initiate_loan_payment(f.loan.id, LoanPaymentType::Funding)
        .await
        .expect("second");
    assert_eq!(second, None);

    only_payment(&f.store, f.loan.id).await;
}

#[tokio::test]
async fn test_callback_update_merges_provider_fields() {
    let f = fixture(&[(LoanPaymentType::Funding, 2)]);

    f.system
        .service()
        .initiate_loan_payment(f.loan.id, LoanPaymentType::Funding)
        .await
        .expect("initiate");
    let payment = only_payment(&f.store, f.loan.id).await;
    let payment_steps = steps(&f.store, payment.id).await;
    let transfer = latest_transfer(&f.store, &payment_steps[0]).await;

    // Mock vocabulary: anything but "failed" is a field update
    let payload = serde_json::json!({"status": "processing", "ref": "prov-123"});
    let applied = f
        .system
        .service()
        .apply_transfer_update(transfer.id, &payload, None)
        .await
        .expect("apply");
    assert_eq!(applied, Some(true));

    let stored = f
        .store
        .get_transfer(transfer.id)
        .await
        .expect("query")
        .expect("transfer");
    assert_eq!(stored.provider_ref.as_deref(), Some("prov-123"));
    assert_eq!(stored.provider_status.as_deref(), Some("processing"));
    // An update alone never changes the transfer state
    assert_eq!(stored.state, TransferState::Created);
}
