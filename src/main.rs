//! Demo runner: drives one bill-pay loan through funding, disbursement
//! and the first repayment against an in-memory store, with provider
//! submissions drained from the outbound queue and completions fed back
//! as if the providers had called back.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tracing::info;

use lendrail::config::{load_routes, AppConfig};
use lendrail::logging::init_logging;
use lendrail::payment::providers::{
    CheckbookBackend, FiservBackend, ProviderBackend, ProviderRequest, TabapayBackend,
};
use lendrail::payment::routes::{PaymentsRoute, PaymentsRouteStep, RouteKey};
use lendrail::payment::state::TransferState;
use lendrail::payment::types::{
    AccountId, AccountOwnership, AccountType, Loan, LoanId, LoanType,
};
use lendrail::{
    LoanPaymentType, LoanState, LoanTransitionTable, MemoryStore, PaymentAccount,
    PaymentAccountProvider, PaymentEvent, PaymentStore, PaymentSystem, RoutingTable,
};

fn default_config() -> AppConfig {
    AppConfig {
        log_level: "info".to_string(),
        log_dir: "./logs".to_string(),
        log_file: "lendrail.log".to_string(),
        use_json: false,
        rotation: "daily".to_string(),
        enable_tracing: true,
        routes_file: None,
    }
}

struct DemoWorld {
    store: Arc<MemoryStore>,
    loan: Loan,
    routes: RoutingTable,
}

/// Seed accounts, one loan, and the lender -> internal -> biller route
/// family the stages run over.
fn demo_world() -> DemoWorld {
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
    let internal = PaymentAccount {
        id: AccountId::new(),
        account_type: AccountType::BankAccount,
        ownership: AccountOwnership::Internal,
        provider: PaymentAccountProvider::Fiserv,
    };
    let biller = PaymentAccount {
        id: AccountId::new(),
        account_type: AccountType::BankAccount,
        ownership: AccountOwnership::Internal,
        provider: PaymentAccountProvider::Checkbook,
    };
    for account in [&lender, &borrower, &internal, &biller] {
        store.insert_account(account.clone());
    }

    let loan = Loan {
        id: LoanId::new(),
        loan_type: LoanType::BillPay,
        state: LoanState::Accepted,
        amount: Decimal::from(600),
        fee_amount: Decimal::from(18),
        payments_count: 6,
        lender_account_id: Some(lender.id),
        borrower_account_id: Some(borrower.id),
        biller_payment_account_id: Some(biller.id),
    };
    store.insert_loan(loan.clone());

    // Funding and disbursement share the physical two-hop route; each
    // stage owns its slice of it.
    let two_hop = |stage| PaymentsRoute {
        key: RouteKey::for_accounts(&lender, &biller, stage, loan.loan_type),
        steps: vec![
            PaymentsRouteStep {
                from_id: None,
                to_id: Some(internal.id),
            },
            PaymentsRouteStep {
                from_id: Some(internal.id),
                to_id: None,
            },
        ],
    };
    let routes = RoutingTable::new(vec![
        two_hop(LoanPaymentType::Funding),
        two_hop(LoanPaymentType::Disbursement),
        PaymentsRoute {
            key: RouteKey::for_accounts(
                &borrower,
                &lender,
                LoanPaymentType::Repayment,
                loan.loan_type,
            ),
            steps: vec![PaymentsRouteStep::default()],
        },
    ]);

    DemoWorld { store, loan, routes }
}

/// Initiate every fresh transfer attempt and feed back a completion, as
/// the providers would, until the loan has nothing left in flight.
async fn settle_open_transfers(
    system: &PaymentSystem,
    store: &MemoryStore,
    loan_id: LoanId,
) -> anyhow::Result<()> {
    loop {
        let mut progressed = false;
        for payment in store.payments_for_loan(loan_id).await? {
            for step in store.steps_for_payment(payment.id).await? {
                let Some(transfer) = store.latest_transfer_for_step(step.id).await? else {
                    continue;
                };
                if transfer.state == TransferState::Created {
                    system.service().initiate_transfer(transfer.id, None).await?;
                    system.service().complete_transfer(transfer.id, None).await?;
                    progressed = true;
                }
            }
        }
        if !progressed {
            return Ok(());
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(env) => AppConfig::load(&env),
        None => default_config(),
    };
    let _guard = init_logging(&config);

    let world = demo_world();
    let routes = match &config.routes_file {
        Some(path) => Arc::new(load_routes(path)?),
        None => Arc::new(world.routes),
    };

    let (outbound, mut requests) = mpsc::unbounded_channel::<ProviderRequest>();
    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            info!(
                provider = %request.provider,
                transfer_id = %request.transfer_id,
                "provider request dispatched"
            );
        }
    });
    let backends: Vec<Arc<dyn ProviderBackend>> = vec![
        CheckbookBackend::new(outbound.clone()),
        FiservBackend::new(outbound.clone()),
        TabapayBackend::new(outbound),
    ];

    let system = PaymentSystem::new(
        world.store.clone(),
        routes,
        backends,
        Arc::new(LoanTransitionTable::default()),
    )?;

    let loan = &world.loan;
    info!(loan_id = %loan.id, amount = %loan.amount, fee = %loan.fee_amount, "demo loan seeded");

    let stages = [
        (LoanState::Accepted, LoanState::Funding),
        (LoanState::Funded, LoanState::Disbursing),
        (LoanState::Disbursed, LoanState::Repaying),
    ];
    for (old_state, new_state) in stages {
        system
            .bus()
            .publish(PaymentEvent::LoanStateChanged {
                loan_id: loan.id,
                old_state,
                new_state,
            })
            .await;
        settle_open_transfers(&system, &world.store, loan.id).await?;
    }

    for payment in world.store.payments_for_loan(loan.id).await? {
        info!(
            payment_id = %payment.id,
            payment_type = %payment.payment_type,
            amount = %payment.amount,
            state = %payment.state,
            "final payment state"
        );
    }
    Ok(())
}
