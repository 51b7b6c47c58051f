//! Payments Routing Table
//!
//! Read-only configuration describing, for a given account/provider/stage
//! combination, the ordered hops funds must take. Consumed by the payment
//! managers, never mutated here.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::types::{
    AccountId, AccountOwnership, AccountType, LoanPaymentType, LoanType, PaymentAccount,
    PaymentAccountProvider,
};

/// Full routing key: both account shapes plus the lifecycle stage and
/// loan type the route supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RouteKey {
    pub from_account: AccountType,
    pub from_ownership: AccountOwnership,
    pub from_provider: PaymentAccountProvider,
    pub to_account: AccountType,
    pub to_ownership: AccountOwnership,
    pub to_provider: PaymentAccountProvider,
    pub loan_stage: LoanPaymentType,
    pub loan_type: LoanType,
}

impl RouteKey {
    /// Build the key from resolved endpoint accounts
    pub fn for_accounts(
        from: &PaymentAccount,
        to: &PaymentAccount,
        loan_stage: LoanPaymentType,
        loan_type: LoanType,
    ) -> Self {
        Self {
            from_account: from.account_type,
            from_ownership: from.ownership,
            from_provider: from.provider,
            to_account: to.account_type,
            to_ownership: to.ownership,
            to_provider: to.provider,
            loan_stage,
            loan_type,
        }
    }
}

/// One hop of a route. Absent ids fall back to the payment's endpoint
/// accounts; present ids name intermediate (typically internal) accounts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PaymentsRouteStep {
    pub from_id: Option<AccountId>,
    pub to_id: Option<AccountId>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentsRoute {
    pub key: RouteKey,
    pub steps: Vec<PaymentsRouteStep>,
}

/// Immutable route lookup, built once at startup
#[derive(Debug, Default)]
pub struct RoutingTable {
    routes: HashMap<RouteKey, PaymentsRoute>,
}

impl RoutingTable {
    pub fn new(routes: Vec<PaymentsRoute>) -> Self {
        let routes = routes.into_iter().map(|r| (r.key, r)).collect();
        Self { routes }
    }

    pub fn find(&self, key: &RouteKey) -> Option<&PaymentsRoute> {
        self.routes.get(key)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
