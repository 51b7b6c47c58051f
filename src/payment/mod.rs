//! Loan payment orchestration core.
//!
//! Advances loans through their money-movement stages. Each stage is a
//! [`types::LoanPayment`] whose route is cut into ordered
//! [`types::LoanPaymentStep`]s; each step runs as a sequence of
//! [`types::Transfer`] attempts executed by a pluggable provider backend.
//! Progress is event-driven and idempotent end to end: the same delivery
//! applied twice converges to a no-op, and state combinations outside the
//! decision tables surface as out-of-sync faults instead of corrupting
//! records.

pub mod error;
pub mod events;
pub mod handlers;
pub mod payment_manager;
pub mod providers;
pub mod routes;
pub mod service;
pub mod state;
pub mod step_manager;
pub mod store;
pub mod system;
pub mod transport;
pub mod types;

#[cfg(test)]
mod integration_tests;

pub use error::{PaymentError, PaymentResult};
pub use events::{EventBus, PaymentEvent, PaymentEventHandler};
pub use handlers::LoanTransitionTable;
pub use providers::{
    CheckbookBackend, FiservBackend, MockBackend, ProviderBackend, ProviderRequest,
    TabapayBackend, TransferExecutionFactory, TransferExecutionService,
};
pub use routes::{PaymentsRoute, PaymentsRouteStep, RouteKey, RoutingTable};
pub use service::ManagementDomainService;
pub use state::{LoanPaymentState, LoanState, PaymentStepState, TransferState};
pub use store::{MemoryStore, PaymentStore};
pub use system::PaymentSystem;
pub use transport::{RemoteEnvelope, RemoteEventTransport};
pub use types::{
    AccountId, Loan, LoanId, LoanPayment, LoanPaymentStep, LoanPaymentType, LoanType,
    PaymentAccount, PaymentAccountProvider, PaymentId, StepId, Transfer, TransferId,
};
