//! Integration tests for the order fulfillment saga.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use common::OrderId;
use domain::{
    Address, CompensationStatus, CreateOrderRequest, Currency, LineItem, Money, NewOrder, Order,
    OrderOutcome, OrderStatus, SagaStep, UpstreamErrorKind, ValidationError,
};
use order_store::{
    Claim, IdempotencyStore, InMemoryIdempotencyStore, InMemoryOrderStore, OrderStore,
    OrderStoreExt, StoreError, Version,
};
use saga::{
    CallLog, CallPolicy, InMemoryInventoryService, InMemoryPaymentService,
    InMemoryShippingService, SagaCoordinator, SagaError,
};

type TestCoordinator = SagaCoordinator<
    InMemoryOrderStore,
    InMemoryIdempotencyStore,
    InMemoryInventoryService,
    InMemoryPaymentService,
    InMemoryShippingService,
>;

struct TestHarness {
    coordinator: Arc<TestCoordinator>,
    store: InMemoryOrderStore,
    keys: InMemoryIdempotencyStore,
    inventory: InMemoryInventoryService,
    payment: InMemoryPaymentService,
    shipping: InMemoryShippingService,
    log: CallLog,
}

impl TestHarness {
    fn new() -> Self {
        Self::with_policy(fast_policy())
    }

    fn with_policy(forward: CallPolicy) -> Self {
        let log = CallLog::new();
        let store = InMemoryOrderStore::new();
        let keys = InMemoryIdempotencyStore::new();
        let inventory = InMemoryInventoryService::with_log(log.clone());
        let payment = InMemoryPaymentService::with_log(log.clone());
        let shipping = InMemoryShippingService::with_log(log.clone());

        let coordinator = SagaCoordinator::new(
            store.clone(),
            keys.clone(),
            inventory.clone(),
            payment.clone(),
            shipping.clone(),
        )
        .with_policies(forward, fast_policy().with_max_attempts(3));

        Self {
            coordinator: Arc::new(coordinator),
            store,
            keys,
            inventory,
            payment,
            shipping,
            log,
        }
    }

    fn downstream_calls(&self) -> usize {
        self.log.entries().len()
    }
}

fn fast_policy() -> CallPolicy {
    CallPolicy::forward()
        .with_delays(Duration::from_millis(1), Duration::from_millis(5))
        .with_timeout(Duration::from_millis(200))
}

fn a1_order() -> NewOrder {
    let request: CreateOrderRequest = serde_json::from_value(serde_json::json!({
        "userId": "user-42",
        "address": {
            "line1": "1 MG Road",
            "city": "Bengaluru",
            "country": "IN",
            "postalCode": "560001"
        },
        "items": [{ "sku": "A1", "qty": 2, "price": 10.0 }]
    }))
    .unwrap();
    request.validate().unwrap()
}

fn multi_item_order() -> NewOrder {
    NewOrder {
        user_id: None,
        address: Address::new("221B Baker Street", "London", "GB", "NW1 6XE"),
        currency: Currency::parse("GBP").unwrap(),
        items: vec![
            LineItem::new("SKU-001", 3, Money::from_major(4.99)),
            LineItem::new("SKU-002", 1, Money::from_major(12.5)),
        ],
    }
}

async fn paid_order(store: &InMemoryOrderStore, key: Option<&str>) -> Order {
    let mut order = Order::create(OrderId::new(), a1_order())
        .with_idempotency_key(key.map(str::to_string));
    store.save(&mut order).await.unwrap();
    order.mark_reserved("RES-9001").unwrap();
    store.save(&mut order).await.unwrap();
    order.mark_paid("PAY-9001").unwrap();
    store.save(&mut order).await.unwrap();
    order
}

#[tokio::test]
async fn request_without_key_creates_one_terminal_order() {
    let h = TestHarness::new();

    let order = h
        .coordinator
        .create_order(multi_item_order(), None)
        .await
        .unwrap();

    assert_eq!(order.status(), OrderStatus::Completed);
    assert!(order.is_terminal());
    assert_eq!(h.store.order_count().await, 1);
    assert_eq!(order.total(), Money::from_minor(2747));
    assert_eq!(h.payment.charged_amounts(), vec![Money::from_minor(2747)]);

    let shipment = h.shipping.shipment(order.shipment_id().unwrap()).unwrap();
    assert_eq!(Some(shipment.reservation_id.as_str()), order.reservation_id());
    assert_eq!(shipment.address.city, "London");
}

#[tokio::test]
async fn a1_example_charges_twenty() {
    let h = TestHarness::new();

    let order = h.coordinator.create_order(a1_order(), None).await.unwrap();

    assert_eq!(order.currency().code(), "INR");
    assert_eq!(h.payment.charged_amounts(), vec![Money::from_major(20.0)]);
    assert_eq!(order.total().as_major(), 20.0);
}

#[tokio::test]
async fn a1_example_declined_is_compensated() {
    let h = TestHarness::new();
    h.payment.set_fail_on_charge(true);

    let err = h.coordinator.create_order(a1_order(), None).await.unwrap_err();
    let failure = err.failure().unwrap();
    assert_eq!(failure.order_status, OrderStatus::Compensated);
    assert_eq!(failure.compensation.status, CompensationStatus::Completed);

    let order = h.coordinator.get_order(failure.order_id).await.unwrap();
    assert_eq!(order.status(), OrderStatus::Compensated);
    assert!(order.reservation_id().is_some());
    assert!(order.payment_id().is_none());
    assert_eq!(
        order.failure().unwrap().failed_step,
        SagaStep::AuthorizePayment
    );
}

#[tokio::test]
async fn replay_returns_first_success_without_calls() {
    let h = TestHarness::new();
    let key = Some("order-key-1".to_string());

    let first = h
        .coordinator
        .create_order(a1_order(), key.clone())
        .await
        .unwrap();
    let calls = h.downstream_calls();

    let second = h.coordinator.create_order(a1_order(), key).await.unwrap();

    assert_eq!(second, first);
    assert_eq!(h.downstream_calls(), calls);
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test]
async fn replay_returns_first_failure_without_calls() {
    let h = TestHarness::new();
    h.inventory.set_fail_on_reserve(true);
    let key = Some("order-key-2".to_string());

    let first = h
        .coordinator
        .create_order(a1_order(), key.clone())
        .await
        .unwrap_err();
    let calls = h.downstream_calls();

    // The downstream recovered, but the recorded outcome still wins.
    h.inventory.set_fail_on_reserve(false);
    let second = h.coordinator.create_order(a1_order(), key).await.unwrap_err();

    assert_eq!(second.failure(), first.failure());
    assert_eq!(h.downstream_calls(), calls);
}

#[tokio::test]
async fn concurrent_duplicates_run_one_saga() {
    let h = TestHarness::new();
    h.inventory
        .set_reserve_delay(Some(Duration::from_millis(50)));

    let handles: Vec<_> = (0..5)
        .map(|_| {
            let coordinator = h.coordinator.clone();
            tokio::spawn(async move {
                coordinator
                    .create_order(a1_order(), Some("shared-key".to_string()))
                    .await
            })
        })
        .collect();

    let mut completed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => completed += 1,
            Err(SagaError::IdempotencyInProgress { .. }) => {}
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert!(completed >= 1);
    assert_eq!(h.inventory.reserve_calls(), 1);
    assert_eq!(h.store.order_count().await, 1);
}

#[tokio::test]
async fn inventory_failure_makes_no_payment_or_shipping_calls() {
    let h = TestHarness::new();
    h.inventory.set_fail_on_reserve(true);

    let err = h.coordinator.create_order(a1_order(), None).await.unwrap_err();
    let failure = err.failure().unwrap();

    assert_eq!(failure.failed_step, SagaStep::ReserveInventory);
    assert_eq!(failure.order_status, OrderStatus::Failed);
    assert_eq!(h.payment.authorize_calls(), 0);
    assert_eq!(h.shipping.create_calls(), 0);
    assert_eq!(h.inventory.release_calls(), 0);
}

#[tokio::test]
async fn payment_failure_releases_the_reservation_once() {
    let h = TestHarness::new();
    h.payment.set_fail_on_charge(true);

    let err = h.coordinator.create_order(a1_order(), None).await.unwrap_err();
    let order = h
        .coordinator
        .get_order(err.failure().unwrap().order_id)
        .await
        .unwrap();

    let reservation_id = order.reservation_id().unwrap();
    assert_eq!(
        h.log.matching("inventory.release"),
        vec![format!("inventory.release:{reservation_id}")]
    );
    assert_eq!(h.shipping.create_calls(), 0);
}

#[tokio::test]
async fn payment_failure_with_failing_release_ends_failed() {
    let h = TestHarness::new();
    h.payment.set_fail_on_charge(true);
    h.inventory.set_fail_on_release(true);

    let err = h.coordinator.create_order(a1_order(), None).await.unwrap_err();
    let failure = err.failure().unwrap();

    assert_eq!(failure.order_status, OrderStatus::Failed);
    assert_eq!(failure.compensation.status, CompensationStatus::Failed);
    assert_eq!(
        failure.compensation.unresolved_steps,
        vec![SagaStep::ReserveInventory]
    );
    // Compensation policy allows three attempts.
    assert_eq!(h.inventory.release_calls(), 3);
}

#[tokio::test]
async fn shipment_failure_refunds_then_releases() {
    let h = TestHarness::new();
    h.shipping.set_fail_on_create(true);

    let err = h.coordinator.create_order(a1_order(), None).await.unwrap_err();
    let order = h
        .coordinator
        .get_order(err.failure().unwrap().order_id)
        .await
        .unwrap();

    let undo: Vec<_> = h
        .log
        .entries()
        .into_iter()
        .filter(|e| e.contains(".refund:") || e.contains(".release:"))
        .collect();
    assert_eq!(
        undo,
        vec![
            format!("payment.refund:{}", order.payment_id().unwrap()),
            format!("inventory.release:{}", order.reservation_id().unwrap()),
        ]
    );
    assert_eq!(order.status(), OrderStatus::Compensated);
}

#[tokio::test]
async fn exhausted_retries_report_unavailable() {
    let h = TestHarness::new();
    h.payment.set_unavailable(true);

    let err = h.coordinator.create_order(a1_order(), None).await.unwrap_err();
    let failure = err.failure().unwrap();

    assert_eq!(failure.upstream.kind, UpstreamErrorKind::Unavailable);
    assert_eq!(h.payment.authorize_calls(), 3);
    assert_eq!(failure.order_status, OrderStatus::Compensated);
}

#[tokio::test]
async fn slow_shipping_times_out_and_compensates() {
    let h = TestHarness::with_policy(
        fast_policy()
            .with_timeout(Duration::from_millis(20))
            .with_max_attempts(2),
    );
    h.shipping
        .set_create_delay(Some(Duration::from_millis(500)));

    let err = h.coordinator.create_order(a1_order(), None).await.unwrap_err();
    let failure = err.failure().unwrap();

    assert_eq!(failure.failed_step, SagaStep::CreateShipment);
    assert_eq!(failure.upstream.kind, UpstreamErrorKind::Timeout);
    assert_eq!(h.shipping.create_calls(), 2);
    assert_eq!(h.shipping.shipment_count(), 0);
    assert_eq!(h.payment.payment_count(), 0);
    assert_eq!(h.inventory.reservation_count(), 0);
}

#[tokio::test]
async fn disabled_retries_make_a_single_attempt() {
    let h = TestHarness::with_policy(fast_policy().without_retries());
    h.inventory.fail_next_reserves(1);

    let err = h.coordinator.create_order(a1_order(), None).await.unwrap_err();

    assert_eq!(err.failure().unwrap().upstream.kind, UpstreamErrorKind::Unavailable);
    assert_eq!(h.inventory.reserve_calls(), 1);
}

#[tokio::test]
async fn recompensating_a_compensated_order_makes_no_calls() {
    let h = TestHarness::new();
    h.payment.set_fail_on_charge(true);

    let err = h.coordinator.create_order(a1_order(), None).await.unwrap_err();
    let order_id = err.failure().unwrap().order_id;
    let calls = h.downstream_calls();

    let order = h.coordinator.recover_order(order_id).await.unwrap();

    assert_eq!(order.status(), OrderStatus::Compensated);
    assert_eq!(h.downstream_calls(), calls);
}

#[tokio::test]
async fn recovery_compensates_interrupted_paid_order() {
    let h = TestHarness::new();
    let order = paid_order(&h.store, Some("crashed-key")).await;
    h.keys.claim("crashed-key", order.id()).await.unwrap();

    let recovered = h.coordinator.recover_incomplete().await.unwrap();

    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].status(), OrderStatus::Compensated);
    assert_eq!(
        h.log.entries(),
        vec!["payment.refund:PAY-9001", "inventory.release:RES-9001"]
    );

    // The client retrying with its key now sees the recorded failure.
    match h.keys.claim("crashed-key", OrderId::new()).await.unwrap() {
        Claim::Completed(outcome) => match *outcome {
            OrderOutcome::Failed(failure) => {
                assert_eq!(failure.failed_step, SagaStep::CreateShipment);
                assert_eq!(failure.order_status, OrderStatus::Compensated);
            }
            other => panic!("expected failure outcome, got {other:?}"),
        },
        other => panic!("expected completed claim, got {other:?}"),
    }
}

#[tokio::test]
async fn recovery_completes_shipped_and_fails_pending() {
    let h = TestHarness::new();

    let mut shipped = paid_order(&h.store, None).await;
    shipped.mark_shipped("SHP-9001").unwrap();
    h.store.save(&mut shipped).await.unwrap();

    let mut pending = Order::create(OrderId::new(), a1_order());
    h.store.save(&mut pending).await.unwrap();

    h.coordinator.recover_incomplete().await.unwrap();

    let shipped = h.coordinator.get_order(shipped.id()).await.unwrap();
    let pending = h.coordinator.get_order(pending.id()).await.unwrap();
    assert_eq!(shipped.status(), OrderStatus::Completed);
    assert_eq!(pending.status(), OrderStatus::Failed);
    assert_eq!(h.downstream_calls(), 0);

    // Nothing left to recover.
    assert!(h.coordinator.recover_incomplete().await.unwrap().is_empty());
}

// -- Store failures --

/// Order store whose `update` fails on scripted calls, the way a database
/// does under connection pool exhaustion.
#[derive(Clone, Default)]
struct FlakyOrderStore {
    inner: InMemoryOrderStore,
    updates: Arc<AtomicUsize>,
    failing: Arc<Mutex<HashSet<usize>>>,
    failing_from: Arc<Mutex<Option<usize>>>,
}

impl FlakyOrderStore {
    /// Fails the `n`th update (1-based).
    fn fail_update(&self, n: usize) {
        self.failing.lock().unwrap().insert(n);
    }

    /// Fails every update from the `n`th on.
    fn fail_updates_from(&self, n: usize) {
        *self.failing_from.lock().unwrap() = Some(n);
    }

    fn heal(&self) {
        self.failing.lock().unwrap().clear();
        *self.failing_from.lock().unwrap() = None;
    }
}

#[async_trait]
impl OrderStore for FlakyOrderStore {
    async fn insert(&self, order: &Order) -> order_store::Result<Version> {
        self.inner.insert(order).await
    }

    async fn update(&self, order: &Order) -> order_store::Result<Version> {
        let n = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
        let from = *self.failing_from.lock().unwrap();
        if self.failing.lock().unwrap().contains(&n) || from.is_some_and(|from| n >= from) {
            return Err(StoreError::Database(sqlx::Error::PoolTimedOut));
        }
        self.inner.update(order).await
    }

    async fn get(&self, order_id: OrderId) -> order_store::Result<Option<Order>> {
        self.inner.get(order_id).await
    }

    async fn list_by_status(&self, statuses: &[OrderStatus]) -> order_store::Result<Vec<Order>> {
        self.inner.list_by_status(statuses).await
    }
}

struct FlakyHarness {
    coordinator: SagaCoordinator<
        FlakyOrderStore,
        InMemoryIdempotencyStore,
        InMemoryInventoryService,
        InMemoryPaymentService,
        InMemoryShippingService,
    >,
    store: FlakyOrderStore,
    keys: InMemoryIdempotencyStore,
    inventory: InMemoryInventoryService,
    payment: InMemoryPaymentService,
}

impl FlakyHarness {
    fn new() -> Self {
        let store = FlakyOrderStore::default();
        let keys = InMemoryIdempotencyStore::new();
        let inventory = InMemoryInventoryService::new();
        let payment = InMemoryPaymentService::new();
        let coordinator = SagaCoordinator::new(
            store.clone(),
            keys.clone(),
            inventory.clone(),
            payment.clone(),
            InMemoryShippingService::new(),
        )
        .with_policies(fast_policy(), fast_policy());

        Self {
            coordinator,
            store,
            keys,
            inventory,
            payment,
        }
    }

    async fn in_flight(&self) -> Vec<Order> {
        self.store
            .list_by_status(&OrderStatus::in_flight())
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn failed_checkpoint_write_is_retried() {
    let h = FlakyHarness::new();
    h.store.fail_update(1);

    let order = h.coordinator.create_order(a1_order(), None).await.unwrap();

    assert_eq!(order.status(), OrderStatus::Completed);
    let stored = h.store.require(order.id()).await.unwrap();
    assert_eq!(stored.status(), OrderStatus::Completed);
    assert_eq!(h.inventory.reserve_calls(), 1);
}

#[tokio::test]
async fn lost_checkpoint_compensates_and_frees_the_key() {
    let h = FlakyHarness::new();
    // Both attempts to checkpoint the reservation fail.
    h.store.fail_update(1);
    h.store.fail_update(2);

    let err = h
        .coordinator
        .create_order(a1_order(), Some("k1".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::Store(StoreError::Database(_))));
    assert_eq!(h.inventory.reserve_calls(), 1);
    assert_eq!(h.inventory.release_calls(), 1);
    assert_eq!(h.inventory.reservation_count(), 0);
    assert_eq!(h.payment.authorize_calls(), 0);
    assert!(h.in_flight().await.is_empty());
    assert!(h.keys.lookup("k1").await.unwrap().is_none());

    let retried = h
        .coordinator
        .create_order(a1_order(), Some("k1".to_string()))
        .await
        .unwrap();
    assert_eq!(retried.status(), OrderStatus::Completed);
}

#[tokio::test]
async fn store_outage_during_compensation_still_runs_inverses() {
    let h = FlakyHarness::new();
    h.payment.set_fail_on_charge(true);
    // The reservation checkpoint lands; every later write fails.
    h.store.fail_updates_from(2);

    let err = h
        .coordinator
        .create_order(a1_order(), Some("k2".to_string()))
        .await
        .unwrap_err();

    assert!(matches!(err, SagaError::Store(_)));
    assert_eq!(h.inventory.release_calls(), 1);
    assert_eq!(h.inventory.reservation_count(), 0);
    assert!(h.keys.lookup("k2").await.unwrap().is_none());

    // The stored order is stale until the store is back; recovery settles it.
    let stale = h.in_flight().await;
    assert_eq!(stale.len(), 1);
    assert_eq!(stale[0].status(), OrderStatus::Reserved);

    h.store.heal();
    let recovered = h.coordinator.recover_incomplete().await.unwrap();
    assert_eq!(recovered.len(), 1);
    assert_eq!(recovered[0].status(), OrderStatus::Compensated);
    assert!(h.in_flight().await.is_empty());
}

#[test]
fn unrepresentable_amounts_never_reach_the_saga() {
    let request: CreateOrderRequest = serde_json::from_value(serde_json::json!({
        "address": {
            "line1": "1 MG Road",
            "city": "Bengaluru",
            "country": "IN",
            "postalCode": "560001"
        },
        "items": [{ "sku": "A1", "qty": 1000, "price": 1e17 }]
    }))
    .unwrap();
    assert!(matches!(
        request.validate().unwrap_err(),
        ValidationError::InvalidPrice { .. }
    ));

    let request: CreateOrderRequest = serde_json::from_value(serde_json::json!({
        "address": {
            "line1": "1 MG Road",
            "city": "Bengaluru",
            "country": "IN",
            "postalCode": "560001"
        },
        "items": [{ "sku": "A1", "qty": 1000, "price": 1e15 }]
    }))
    .unwrap();
    assert_eq!(
        request.validate().unwrap_err(),
        ValidationError::TotalTooLarge
    );
}

#[tokio::test]
async fn large_valid_total_is_charged_exactly() {
    let h = TestHarness::new();
    let mut order = a1_order();
    order.items = vec![LineItem::new("A1", 3, Money::from_major(1e16))];

    let order = h.coordinator.create_order(order, None).await.unwrap();

    assert_eq!(order.status(), OrderStatus::Completed);
    assert_eq!(
        h.payment.charged_amounts(),
        vec![Money::from_minor(3_000_000_000_000_000_000)]
    );
}
