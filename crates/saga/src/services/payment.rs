//! Payment service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::OrderId;
use domain::{Currency, Money, UpstreamError};

use super::{CallLog, Faults, delay, lock};

const SERVICE: &str = "payment";

/// Result of a successful payment authorization.
#[derive(Debug, Clone)]
pub struct PaymentResult {
    /// The transaction ID assigned by the payment service.
    pub transaction_id: String,
}

/// Trait for payment processing operations.
#[async_trait]
pub trait PaymentService: Send + Sync {
    /// Authorizes a charge of `amount` for an order.
    async fn authorize(
        &self,
        order_id: OrderId,
        amount: Money,
        currency: &Currency,
    ) -> Result<PaymentResult, UpstreamError>;

    /// Refunds a previously authorized transaction.
    async fn refund(&self, transaction_id: &str) -> Result<(), UpstreamError>;
}

#[async_trait]
impl<T: PaymentService + ?Sized> PaymentService for Arc<T> {
    async fn authorize(
        &self,
        order_id: OrderId,
        amount: Money,
        currency: &Currency,
    ) -> Result<PaymentResult, UpstreamError> {
        (**self).authorize(order_id, amount, currency).await
    }

    async fn refund(&self, transaction_id: &str) -> Result<(), UpstreamError> {
        (**self).refund(transaction_id).await
    }
}

#[derive(Debug, Default)]
struct InMemoryPaymentState {
    payments: HashMap<String, (OrderId, Money, Currency)>,
    charged: Vec<Money>,
    next_id: u32,
    authorize_calls: usize,
    refund_calls: usize,
    authorize_faults: Faults,
    refund_faults: Faults,
}

/// In-memory payment service for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentService {
    state: Arc<Mutex<InMemoryPaymentState>>,
    log: CallLog,
}

impl InMemoryPaymentService {
    /// Creates a new in-memory payment service.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a service that records its calls into a shared log.
    pub fn with_log(log: CallLog) -> Self {
        Self {
            log,
            ..Self::default()
        }
    }

    /// Configures every authorization to be declined.
    pub fn set_fail_on_charge(&self, fail: bool) {
        lock(&self.state).authorize_faults.reject = fail;
    }

    /// Configures every authorization to fail as unavailable.
    pub fn set_unavailable(&self, unavailable: bool) {
        lock(&self.state).authorize_faults.unavailable = unavailable;
    }

    /// Fails the next `n` authorizations with a transient error.
    pub fn fail_next_authorizations(&self, n: u32) {
        lock(&self.state).authorize_faults.transient = n;
    }

    /// Configures every refund call to fail as unavailable.
    pub fn set_fail_on_refund(&self, fail: bool) {
        lock(&self.state).refund_faults.unavailable = fail;
    }

    /// Delays every authorization.
    pub fn set_authorize_delay(&self, delay: Option<std::time::Duration>) {
        lock(&self.state).authorize_faults.delay = delay;
    }

    /// Returns the number of active (unrefunded) payments.
    pub fn payment_count(&self) -> usize {
        lock(&self.state).payments.len()
    }

    /// Amounts of every successful authorization, in call order.
    pub fn charged_amounts(&self) -> Vec<Money> {
        lock(&self.state).charged.clone()
    }

    pub fn authorize_calls(&self) -> usize {
        lock(&self.state).authorize_calls
    }

    pub fn refund_calls(&self) -> usize {
        lock(&self.state).refund_calls
    }
}

#[async_trait]
impl PaymentService for InMemoryPaymentService {
    async fn authorize(
        &self,
        order_id: OrderId,
        amount: Money,
        currency: &Currency,
    ) -> Result<PaymentResult, UpstreamError> {
        let wait = {
            let mut state = lock(&self.state);
            state.authorize_calls += 1;
            state.authorize_faults.delay
        };
        self.log.record(format!("{SERVICE}.authorize:{order_id}"));
        delay(wait).await;

        let mut state = lock(&self.state);
        if state.authorize_faults.reject {
            return Err(UpstreamError::rejected(
                SERVICE,
                Some(402),
                "Payment declined",
            ));
        }
        state.authorize_faults.check(SERVICE, "authorize")?;

        state.next_id += 1;
        let transaction_id = format!("PAY-{:04}", state.next_id);
        state
            .payments
            .insert(transaction_id.clone(), (order_id, amount, currency.clone()));
        state.charged.push(amount);

        Ok(PaymentResult { transaction_id })
    }

    async fn refund(&self, transaction_id: &str) -> Result<(), UpstreamError> {
        let mut state = lock(&self.state);
        state.refund_calls += 1;
        self.log.record(format!("{SERVICE}.refund:{transaction_id}"));
        state.refund_faults.check(SERVICE, "refund")?;
        state.payments.remove(transaction_id);
        Ok(())
    }
}
