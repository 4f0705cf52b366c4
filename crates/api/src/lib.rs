//! HTTP API server for the order orchestration service.
//!
//! Provides the order endpoints in front of the fulfillment saga, with
//! structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::{
    IdempotencyStore, InMemoryIdempotencyStore, InMemoryOrderStore, OrderStore,
    PostgresIdempotencyStore, PostgresOrderStore, StoreError,
};
use saga::{
    HttpInventoryService, HttpPaymentService, HttpShippingService, InMemoryInventoryService,
    InMemoryPaymentService, InMemoryShippingService, InventoryService, PaymentService,
    SagaCoordinator, ShippingService,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::{AppState, OrderCoordinator};

/// Creates the Axum application router with all routes and shared state.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create))
        .route("/orders/{id}", get(routes::orders::get))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Order and idempotency persistence.
#[derive(Clone)]
pub struct Stores {
    pub orders: Arc<dyn OrderStore>,
    pub idempotency: Arc<dyn IdempotencyStore>,
}

impl Stores {
    /// Process-local stores. State is lost on restart.
    pub fn in_memory() -> Self {
        Self {
            orders: Arc::new(InMemoryOrderStore::new()),
            idempotency: Arc::new(InMemoryIdempotencyStore::new()),
        }
    }

    /// Connects to PostgreSQL and applies pending migrations.
    pub async fn postgres(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        let orders = PostgresOrderStore::new(pool.clone());
        orders.run_migrations().await?;
        Ok(Self {
            orders: Arc::new(orders),
            idempotency: Arc::new(PostgresIdempotencyStore::new(pool)),
        })
    }
}

/// Clients for the inventory, payment and shipping services.
#[derive(Clone)]
pub struct Services {
    pub inventory: Arc<dyn InventoryService>,
    pub payment: Arc<dyn PaymentService>,
    pub shipping: Arc<dyn ShippingService>,
}

impl Services {
    /// HTTP clients pointed at the configured base URLs.
    pub fn http(config: &Config) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .timeout(config.downstream_timeout)
            .build()?;
        Ok(Self {
            inventory: Arc::new(HttpInventoryService::new(
                client.clone(),
                &config.inventory_url,
            )),
            payment: Arc::new(HttpPaymentService::new(client.clone(), &config.payment_url)),
            shipping: Arc::new(HttpShippingService::new(client, &config.shipping_url)),
        })
    }

    /// In-memory fakes that always succeed unless told otherwise.
    pub fn in_memory(
        inventory: InMemoryInventoryService,
        payment: InMemoryPaymentService,
        shipping: InMemoryShippingService,
    ) -> Self {
        Self {
            inventory: Arc::new(inventory),
            payment: Arc::new(payment),
            shipping: Arc::new(shipping),
        }
    }
}

/// Wires the coordinator from stores, services and the configured call
/// policies.
pub fn create_state(stores: Stores, services: Services, config: &Config) -> Arc<AppState> {
    let coordinator: OrderCoordinator = SagaCoordinator::new(
        stores.orders,
        stores.idempotency,
        services.inventory,
        services.payment,
        services.shipping,
    )
    .with_policies(config.forward_policy(), config.compensation_policy());

    Arc::new(AppState {
        coordinator: Arc::new(coordinator),
    })
}

/// Creates the default application state with in-memory stores and
/// in-memory downstream services.
pub fn create_default_state() -> Arc<AppState> {
    let services = Services::in_memory(
        InMemoryInventoryService::new(),
        InMemoryPaymentService::new(),
        InMemoryShippingService::new(),
    );
    create_state(Stores::in_memory(), services, &Config::default())
}
