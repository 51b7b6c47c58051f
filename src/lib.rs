//! Lendrail - Loan Payment Orchestration Engine
//!
//! Moves money for loans: funding, disbursement, fees, repayments and
//! refunds, each driven through routed, idempotent transfer steps.
//!
//! # Modules
//!
//! - [`payment::types`] - Core entities (Loan, LoanPayment, Transfer, ids)
//! - [`payment::state`] - State machines for payments, steps and transfers
//! - [`payment::routes`] - Route lookup for account/stage combinations
//! - [`payment::store`] - Persistence seam and the in-memory store
//! - [`payment::payment_manager`] - Per-type payment creation and aggregation
//! - [`payment::step_manager`] - Step advancement decision tables
//! - [`payment::providers`] - Checkbook/Fiserv/Tabapay execution backends
//! - [`payment::events`] - Event types and the in-process bus
//! - [`payment::handlers`] - Idempotent event reactions
//! - [`payment::service`] - The orchestration facade
//! - [`payment::system`] - Full-system wiring

pub mod config;
pub mod logging;
pub mod payment;

// Convenient re-exports at crate root
pub use config::AppConfig;
pub use payment::{
    EventBus, Loan, LoanPayment, LoanPaymentStep, LoanPaymentType, LoanState, LoanTransitionTable,
    ManagementDomainService, MemoryStore, PaymentAccount, PaymentAccountProvider, PaymentError,
    PaymentEvent, PaymentResult, PaymentStore, PaymentSystem, RoutingTable, Transfer,
};
