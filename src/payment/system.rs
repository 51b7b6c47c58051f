//! System Wiring
//!
//! Builds the full orchestration graph: store, managers, step manager,
//! execution services, facade, bus and handlers. Construction fails fast
//! when a provider has no backend.

use std::sync::Arc;

use tracing::info;

use super::error::PaymentResult;
use super::events::EventBus;
use super::handlers::{
    LoanStateChangedHandler, LoanTransitionTable, PaymentStepStateChangedHandler,
    TransferLifecycleHandler,
};
use super::payment_manager::LoanPaymentManagerFactory;
use super::providers::{ProviderBackend, TransferExecutionFactory};
use super::routes::RoutingTable;
use super::service::ManagementDomainService;
use super::step_manager::PaymentStepManager;
use super::store::PaymentStore;
use super::transport::RemoteEventTransport;

pub struct PaymentSystem {
    bus: Arc<EventBus>,
    service: Arc<ManagementDomainService>,
    transport: RemoteEventTransport,
}

impl PaymentSystem {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        routes: Arc<RoutingTable>,
        backends: Vec<Arc<dyn ProviderBackend>>,
        table: Arc<LoanTransitionTable>,
    ) -> PaymentResult<Self> {
        let bus = Arc::new(EventBus::new());

        let managers = Arc::new(LoanPaymentManagerFactory::new(store.clone(), routes.clone()));
        let step_manager = Arc::new(PaymentStepManager::new(store.clone(), bus.clone()));
        let executions = Arc::new(TransferExecutionFactory::new(
            store.clone(),
            bus.clone(),
            backends,
        )?);
        let service = Arc::new(ManagementDomainService::new(
            store.clone(),
            managers.clone(),
            step_manager.clone(),
            executions,
        ));

        bus.register(Arc::new(LoanStateChangedHandler::new(
            table,
            service.clone(),
        )));
        bus.register(Arc::new(TransferLifecycleHandler::new(
            store.clone(),
            step_manager.clone(),
        )));
        bus.register(Arc::new(PaymentStepStateChangedHandler::new(
            store,
            managers,
            step_manager,
        )));

        info!(routes = routes.len(), "payment system wired");
        Ok(Self {
            transport: RemoteEventTransport::new(bus.clone()),
            bus,
            service,
        })
    }

    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    pub fn service(&self) -> &Arc<ManagementDomainService> {
        &self.service
    }

    /// Entry point for at-least-once remote deliveries
    pub fn transport(&self) -> &RemoteEventTransport {
        &self.transport
    }
}
