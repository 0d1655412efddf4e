//! HTTP adapter and wiring for the order saga service.
//!
//! Builds the saga controller, outbox, inbound dispatcher and payment
//! status prober over one event store, and exposes them through an axum
//! router with structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::routing::{get, post};
use event_store::EventStore;
use metrics_exporter_prometheus::PrometheusHandle;
use outbox::{
    InMemoryDeadLetterQueue, InMemoryMessageBus, ORDER_CREATED, OutboxError, OutboxPublisher,
    OutboxRelay,
};
use saga::{
    InMemoryPaymentStatusClient, InboundDispatcher, PaymentStatusProber, SagaController,
    SimulatedPaymentProcessor,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;

pub const SERVICE_NAME: &str = "order-service";

const INBOUND_CAPACITY: usize = 1024;

pub type Controller<S> = SagaController<S, InMemoryMessageBus, InMemoryDeadLetterQueue>;
pub type Dispatcher<S> = InboundDispatcher<S, InMemoryMessageBus, InMemoryDeadLetterQueue>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: EventStore> {
    pub store: S,
    pub controller: Controller<S>,
    pub dispatcher: Dispatcher<S>,
    pub prober: PaymentStatusProber<InMemoryPaymentStatusClient>,
    pub bus: InMemoryMessageBus,
    pub payments: InMemoryPaymentStatusClient,
}

impl<S: EventStore + Clone + 'static> AppState<S> {
    pub fn publisher(&self) -> &OutboxPublisher<InMemoryMessageBus, InMemoryDeadLetterQueue> {
        self.controller.publisher()
    }

    /// Re-queues every stored event that has an outbound message.
    pub async fn run_outbox_catch_up(&self) -> Result<usize, OutboxError> {
        OutboxRelay::new(self.store.clone(), self.publisher().clone())
            .run_catch_up()
            .await
    }

    /// Starts the inbound dispatcher and the simulated payment service
    /// consuming `order.created`.
    pub fn spawn_payment_simulation(&self, processing_delay: Duration) -> Vec<JoinHandle<()>> {
        let (deliveries, inbound) = mpsc::channel(INBOUND_CAPACITY);
        let processor = SimulatedPaymentProcessor::new(self.payments.clone(), deliveries)
            .with_processing_delay(processing_delay);

        vec![
            tokio::spawn(self.dispatcher.clone().run(inbound)),
            tokio::spawn(processor.run(self.bus.subscribe(ORDER_CREATED))),
        ]
    }

    /// Stops accepting commands, then drains the outbox.
    pub async fn shutdown(&self) {
        self.controller.shutdown().await;
        self.publisher().shutdown().await;
    }
}

/// Creates the application state over the given store.
pub fn create_default_state<S: EventStore + Clone + 'static>(
    store: S,
    config: &Config,
) -> Arc<AppState<S>> {
    let bus = InMemoryMessageBus::new();
    let payments = InMemoryPaymentStatusClient::new();

    let publisher = OutboxPublisher::new(
        bus.clone(),
        InMemoryDeadLetterQueue::new(),
        config.retry.clone(),
    );
    let controller = SagaController::new(store.clone(), publisher);
    let dispatcher = InboundDispatcher::new(controller.clone());
    let prober = PaymentStatusProber::new(payments.clone(), config.breaker.clone());

    Arc::new(AppState {
        store,
        controller,
        dispatcher,
        prober,
        bus,
        payments,
    })
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: EventStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check::<S>))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .route("/orders/{id}/events", get(routes::orders::events::<S>))
        .route(
            "/orders/{id}/payment-status",
            get(routes::payments::status::<S>),
        )
        .route("/users/{id}/orders", get(routes::users::orders::<S>))
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
