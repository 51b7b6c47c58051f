//! Loan Payment Managers
//!
//! One manager per payment type creates the payment for a loan, allocates
//! route steps to it and aggregates step states back into the payment
//! state. The per-type differences (amount, account pair, route-step
//! slice) are dispatched on the manager's payment type.

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{debug, error, warn};

use super::error::{PaymentError, PaymentResult};
use super::routes::{PaymentsRouteStep, RouteKey, RoutingTable};
use super::state::{LoanPaymentState, PaymentStepState};
use super::store::PaymentStore;
use super::types::{
    AccountId, Loan, LoanId, LoanPayment, LoanPaymentStep, LoanPaymentType, PaymentId, StepId,
};

/// A freshly created payment together with its steps
#[derive(Debug, Clone)]
pub struct InitiatedPayment {
    pub payment: LoanPayment,
    pub steps: Vec<LoanPaymentStep>,
}

pub struct LoanPaymentManager {
    payment_type: LoanPaymentType,
    store: Arc<dyn PaymentStore>,
    routes: Arc<RoutingTable>,
}

impl LoanPaymentManager {
    pub fn new(
        payment_type: LoanPaymentType,
        store: Arc<dyn PaymentStore>,
        routes: Arc<RoutingTable>,
    ) -> Self {
        Self {
            payment_type,
            store,
            routes,
        }
    }

    pub fn payment_type(&self) -> LoanPaymentType {
        self.payment_type
    }

    /// Create a payment of this manager's type for the loan.
    ///
    /// Unmet preconditions (missing accounts, duplicate payment, no
    /// route) are soft failures: they log and return Ok(None).
    pub async fn initiate(&self, loan_id: LoanId) -> PaymentResult<Option<InitiatedPayment>> {
        debug!(loan_id = %loan_id, payment_type = %self.payment_type, "initiating payment");

        let loan = self
            .store
            .get_loan(loan_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("Loan", loan_id))?;

        let Some((from_account_id, to_account_id)) = self.account_pair(&loan) else {
            return Ok(None);
        };

        let existing = self.store.payments_for_loan(loan_id).await?;
        let Some(payment_number) = self.next_payment_number(&loan, &existing) else {
            return Ok(None);
        };

        // Resolve endpoint accounts to build the routing key
        let Some(from_account) = self.store.get_account(from_account_id).await? else {
            warn!(loan_id = %loan_id, account_id = %from_account_id, "source account not found");
            return Ok(None);
        };
        let Some(to_account) = self.store.get_account(to_account_id).await? else {
            warn!(loan_id = %loan_id, account_id = %to_account_id, "target account not found");
            return Ok(None);
        };

        let key =
            RouteKey::for_accounts(&from_account, &to_account, self.payment_type, loan.loan_type);
        let Some(route) = self.routes.find(&key) else {
            warn!(
                loan_id = %loan_id,
                payment_type = %self.payment_type,
                "no payments route for account pair"
            );
            return Ok(None);
        };

        let amount = self.payment_amount(&loan);
        let allocated = allocate_route_steps(self.payment_type, &route.steps);

        // A zero fee needs no money movement at all; zero allocated steps
        // means another manager owns every hop of this route.
        let zero_fee = self.payment_type == LoanPaymentType::Fee && amount.is_zero();
        let completed = zero_fee || allocated.is_empty();

        let now = Utc::now();
        let payment = LoanPayment {
            id: PaymentId::new(),
            loan_id,
            payment_type: self.payment_type,
            amount,
            payment_number,
            state: if completed {
                LoanPaymentState::Completed
            } else {
                LoanPaymentState::Created
            },
            created_at: now,
            initiated_at: completed.then_some(now),
            scheduled_at: completed.then_some(now),
            completed_at: completed.then_some(now),
        };

        let steps: Vec<LoanPaymentStep> = if completed {
            Vec::new()
        } else {
            allocated
                .iter()
                .enumerate()
                .map(|(index, route_step)| LoanPaymentStep {
                    // Ids are pre-generated client-side so all steps land in
                    // one write without id round-trips.
                    id: StepId::new(),
                    loan_payment_id: payment.id,
                    order: index as u32,
                    amount,
                    source_payment_account_id: route_step.from_id.unwrap_or(from_account_id),
                    target_payment_account_id: route_step.to_id.unwrap_or(to_account_id),
                    state: PaymentStepState::Created,
                    await_step_state: (index > 0).then_some(PaymentStepState::Completed),
                    await_step_id: None,
                })
                .collect()
        };

        if let Err(e) = self.persist(&payment, &steps).await {
            error!(
                loan_id = %loan_id,
                payment_id = %payment.id,
                error = %e,
                "failed to persist payment"
            );
            return Ok(None);
        }

        debug!(
            loan_id = %loan_id,
            payment_id = %payment.id,
            steps = steps.len(),
            state = %payment.state,
            "payment initiated"
        );
        Ok(Some(InitiatedPayment { payment, steps }))
    }

    async fn persist(
        &self,
        payment: &LoanPayment,
        steps: &[LoanPaymentStep],
    ) -> PaymentResult<()> {
        self.store.create_payment(payment).await?;
        if !steps.is_empty() {
            self.store.create_steps(steps).await?;
        }
        Ok(())
    }

    /// Recompute the payment state from its steps.
    ///
    /// Some(false) when nothing changed, Some(true) when persisted,
    /// None when the store write failed.
    pub async fn advance(&self, payment_id: PaymentId) -> PaymentResult<Option<bool>> {
        let payment = self
            .store
            .get_payment(payment_id)
            .await?
            .ok_or_else(|| PaymentError::not_found("LoanPayment", payment_id))?;
        let steps = self.store.steps_for_payment(payment_id).await?;

        let new_state = calculate_new_state(&steps);
        if new_state == payment.state {
            debug!(payment_id = %payment_id, state = %new_state, "no payment state change");
            return Ok(Some(false));
        }

        let completed_at = (new_state == LoanPaymentState::Completed
            && payment.completed_at.is_none())
        .then(Utc::now);

        match self
            .store
            .update_payment_state(payment_id, new_state, completed_at)
            .await
        {
            Ok(_) => {
                debug!(
                    payment_id = %payment_id,
                    from = %payment.state,
                    to = %new_state,
                    "payment advanced"
                );
                Ok(Some(true))
            }
            Err(e) => {
                error!(payment_id = %payment_id, error = %e, "failed to advance payment");
                Ok(None)
            }
        }
    }

    /// Endpoint accounts for this payment type. Missing required
    /// accounts log a warning and yield None (soft failure).
    fn account_pair(&self, loan: &Loan) -> Option<(AccountId, AccountId)> {
        match self.payment_type {
            LoanPaymentType::Repayment => {
                let Some(borrower) = loan.borrower_account_id else {
                    warn!(loan_id = %loan.id, "borrower account missing");
                    return None;
                };
                let Some(lender) = loan.lender_account_id else {
                    warn!(loan_id = %loan.id, "lender account missing");
                    return None;
                };
                Some((borrower, lender))
            }
            _ => {
                let Some(lender) = loan.lender_account_id else {
                    warn!(loan_id = %loan.id, "lender account missing");
                    return None;
                };
                let Some(biller) = loan.biller_payment_account_id else {
                    warn!(loan_id = %loan.id, "biller payment account missing");
                    return None;
                };
                Some((lender, biller))
            }
        }
    }

    fn payment_amount(&self, loan: &Loan) -> Decimal {
        match self.payment_type {
            // Lenders fund the principal plus all fees upfront
            LoanPaymentType::Funding => loan.amount + loan.fee_amount,
            LoanPaymentType::Fee => loan.fee_amount,
            LoanPaymentType::Repayment => {
                let count = Decimal::from(loan.payments_count.max(1));
                (loan.amount / count).round_dp(2)
            }
            _ => loan.amount,
        }
    }

    /// Duplicate guard. For Repayment this also produces the next
    /// installment number; every other type may exist at most once per
    /// loan. None means initiation must be rejected (already logged).
    fn next_payment_number(
        &self,
        loan: &Loan,
        existing: &[LoanPayment],
    ) -> Option<Option<u32>> {
        if self.payment_type != LoanPaymentType::Repayment {
            if existing.iter().any(|p| p.payment_type == self.payment_type) {
                error!(
                    loan_id = %loan.id,
                    payment_type = %self.payment_type,
                    "payment already exists for loan"
                );
                return None;
            }
            return Some(None);
        }

        let highest = existing
            .iter()
            .filter(|p| p.payment_type == LoanPaymentType::Repayment)
            .filter_map(|p| p.payment_number)
            .max()
            .unwrap_or(0);
        let next = highest + 1;
        if next > loan.payments_count {
            error!(
                loan_id = %loan.id,
                payments_count = loan.payments_count,
                "all repayments already initiated"
            );
            return None;
        }
        Some(Some(next))
    }
}

/// Route-step allocation.
///
/// A route may collapse Funding+Disbursement into one hop when lender
/// and biller share an account shape. Exactly one manager must own any
/// given hop, never two, so the same transfer is never executed twice:
/// Funding takes the first hop of a multi-hop route (and nothing on a
/// single-hop route), Disbursement takes the rest, every other type
/// takes the whole route.
pub fn allocate_route_steps(
    payment_type: LoanPaymentType,
    route_steps: &[PaymentsRouteStep],
) -> &[PaymentsRouteStep] {
    match payment_type {
        LoanPaymentType::Funding => {
            if route_steps.len() > 1 {
                &route_steps[..1]
            } else {
                &[]
            }
        }
        LoanPaymentType::Disbursement => {
            if route_steps.len() > 1 {
                &route_steps[1..]
            } else {
                route_steps
            }
        }
        _ => route_steps,
    }
}

/// Aggregate step states into the payment state.
///
/// Empty or all-Completed steps mean Completed; otherwise the active
/// step with the highest order decides (Failed beats Pending). Anything
/// else, including a completed step whose successor has not started,
/// resolves to Created; the successor's own start re-aggregates moments
/// later.
pub fn calculate_new_state(steps: &[LoanPaymentStep]) -> LoanPaymentState {
    if steps
        .iter()
        .all(|s| s.state == PaymentStepState::Completed)
    {
        return LoanPaymentState::Completed;
    }

    let latest_active = steps
        .iter()
        .filter(|s| s.state != PaymentStepState::Created)
        .max_by_key(|s| s.order);

    match latest_active.map(|s| s.state) {
        Some(PaymentStepState::Failed) => LoanPaymentState::Failed,
        Some(PaymentStepState::Pending) => LoanPaymentState::Pending,
        _ => LoanPaymentState::Created,
    }
}

/// Type-indexed manager lookup, exhaustive by construction: one manager
/// per payment type is built at startup, so there is no unmapped-variant
/// path at call time.
pub struct LoanPaymentManagerFactory {
    funding: Arc<LoanPaymentManager>,
    disbursement: Arc<LoanPaymentManager>,
    fee: Arc<LoanPaymentManager>,
    repayment: Arc<LoanPaymentManager>,
    refund: Arc<LoanPaymentManager>,
}

impl LoanPaymentManagerFactory {
    pub fn new(store: Arc<dyn PaymentStore>, routes: Arc<RoutingTable>) -> Self {
        let build = |payment_type| {
            Arc::new(LoanPaymentManager::new(
                payment_type,
                store.clone(),
                routes.clone(),
            ))
        };
        Self {
            funding: build(LoanPaymentType::Funding),
            disbursement: build(LoanPaymentType::Disbursement),
            fee: build(LoanPaymentType::Fee),
            repayment: build(LoanPaymentType::Repayment),
            refund: build(LoanPaymentType::Refund),
        }
    }

    pub fn manager(&self, payment_type: LoanPaymentType) -> &Arc<LoanPaymentManager> {
        match payment_type {
            LoanPaymentType::Funding => &self.funding,
            LoanPaymentType::Disbursement => &self.disbursement,
            LoanPaymentType::Fee => &self.fee,
            LoanPaymentType::Repayment => &self.repayment,
            LoanPaymentType::Refund => &self.refund,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn route_steps(count: usize) -> Vec<PaymentsRouteStep> {
        (0..count).map(|_| PaymentsRouteStep::default()).collect()
    }

    fn step(order: u32, state: PaymentStepState) -> LoanPaymentStep {
        LoanPaymentStep {
            id: StepId::new(),
            loan_payment_id: PaymentId::new(),
            order,
            amount: Decimal::from(100),
            source_payment_account_id: AccountId::new(),
            target_payment_account_id: AccountId::new(),
            state,
            await_step_state: (order > 0).then_some(PaymentStepState::Completed),
            await_step_id: None,
        }
    }

    #[test]
    fn test_allocation_single_hop_route() {
        let steps = route_steps(1);
        assert!(allocate_route_steps(LoanPaymentType::Funding, &steps).is_empty());
        assert_eq!(
            allocate_route_steps(LoanPaymentType::Disbursement, &steps).len(),
            1
        );
    }

    #[test]
    fn test_allocation_two_hop_route() {
        let steps = route_steps(2);
        assert_eq!(allocate_route_steps(LoanPaymentType::Funding, &steps).len(), 1);
        assert_eq!(
            allocate_route_steps(LoanPaymentType::Disbursement, &steps).len(),
            1
        );
        assert_eq!(allocate_route_steps(LoanPaymentType::Fee, &steps).len(), 2);
        assert_eq!(
            allocate_route_steps(LoanPaymentType::Repayment, &steps).len(),
            2
        );
        assert_eq!(allocate_route_steps(LoanPaymentType::Refund, &steps).len(), 2);
    }

    #[test]
    fn test_allocation_never_overlaps() {
        for count in 1..=4usize {
            let steps = route_steps(count);
            let funding = allocate_route_steps(LoanPaymentType::Funding, &steps).len();
            let disbursement =
                allocate_route_steps(LoanPaymentType::Disbursement, &steps).len();
            assert_eq!(funding + disbursement, count);
        }
    }

    #[test]
    fn test_aggregation_latest_active_decides() {
        let steps = vec![
            step(0, PaymentStepState::Completed),
            step(1, PaymentStepState::Pending),
        ];
        assert_eq!(calculate_new_state(&steps), LoanPaymentState::Pending);

        let steps = vec![
            step(0, PaymentStepState::Completed),
            step(1, PaymentStepState::Failed),
        ];
        assert_eq!(calculate_new_state(&steps), LoanPaymentState::Failed);
    }

    #[test]
    fn test_aggregation_between_steps_resolves_to_created() {
        // First hop done, second not started: transiently Created until
        // the successor begins and re-aggregates.
        let steps = vec![
            step(0, PaymentStepState::Completed),
            step(1, PaymentStepState::Created),
        ];
        assert_eq!(calculate_new_state(&steps), LoanPaymentState::Created);
    }

    #[test]
    fn test_aggregation_all_completed_or_empty() {
        let steps = vec![
            step(0, PaymentStepState::Completed),
            step(1, PaymentStepState::Completed),
        ];
        assert_eq!(calculate_new_state(&steps), LoanPaymentState::Completed);
        assert_eq!(calculate_new_state(&[]), LoanPaymentState::Completed);
    }

    #[test]
    fn test_aggregation_untouched_steps_stay_created() {
        let steps = vec![step(0, PaymentStepState::Created)];
        assert_eq!(calculate_new_state(&steps), LoanPaymentState::Created);
    }
}
