//! Waypoint - a routing gateway for local LLM inference backends
//!
//! Clients send one request to the gateway; it estimates what the prompt needs, picks a model
//! alias and backend endpoint from a configured inventory, forwards the request there and
//! returns the backend's answer with the routing decision attached.

use axum::Router;
use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum_prometheus::{
    GenericMetricLayer, Handle, PrometheusMetricLayerBuilder,
    metrics_exporter_prometheus::PrometheusHandle,
};
use std::borrow::Cow;
use std::sync::Arc;
use tracing::{info, instrument};

pub mod client;
pub mod decision_log;
pub mod errors;
pub mod forwarder;
pub mod handlers;
pub mod inventory;
pub mod models;
pub mod routing;

use client::{HttpClient, HyperClient};
use decision_log::DecisionLogger;
use inventory::RouterConfig;

/// The main application state: the backend client, the configuration snapshot and the decision log
#[derive(Clone, Debug)]
pub struct AppState<T: HttpClient> {
    pub http_client: T,
    pub config: Arc<RouterConfig>,
    pub decision_log: DecisionLogger,
}

impl AppState<HyperClient> {
    /// Create a new AppState with the default Hyper client
    pub fn new(config: RouterConfig, decision_log: DecisionLogger) -> Self {
        let http_client = client::create_hyper_client(config.server().connect_timeout);
        Self {
            http_client,
            config: Arc::new(config),
            decision_log,
        }
    }
}

impl<T: HttpClient> AppState<T> {
    /// Create a new AppState with a custom HTTP client (useful for testing). Decisions aren't
    /// logged until [`AppState::with_decision_log`] is called.
    pub fn with_client(config: RouterConfig, http_client: T) -> Self {
        Self {
            http_client,
            config: Arc::new(config),
            decision_log: DecisionLogger::disabled(),
        }
    }

    pub fn with_decision_log(mut self, decision_log: DecisionLogger) -> Self {
        self.decision_log = decision_log;
        self
    }
}

/// Build the main router for the gateway
/// This creates routes for:
/// - `GET /api/tags` - Lists the inventory aliases
/// - `POST /evaluate` - Returns the routing decision without forwarding
/// - `POST /generate` - Forwards using the model map and prompt keywords
/// - `POST /route_and_generate` - Decides, then forwards to the chosen endpoint
/// - `POST /api/generate` - Forwards per the configured mode and returns the bare backend body
///
/// Anything else answers 404 with a hint listing the routes. Request bodies aren't size limited:
/// oversized prompts are for the routing engine to handle.
#[instrument(skip(state))]
pub fn build_router<T: HttpClient + Clone + Send + Sync + 'static>(state: AppState<T>) -> Router {
    info!("Building router");
    Router::new()
        .route("/api/tags", get(handlers::tags))
        .route("/evaluate", post(handlers::evaluate))
        .route("/generate", post(handlers::generate))
        .route("/route_and_generate", post(handlers::route_and_generate))
        .route("/api/generate", post(handlers::backend_generate))
        .fallback(handlers::not_found)
        .layer(DefaultBodyLimit::disable())
        .with_state(state)
}

/// Builds a router for the metrics endpoint.
#[instrument(skip(handle))]
pub fn build_metrics_router(handle: PrometheusHandle) -> Router {
    info!("Building metrics router");
    Router::new().route(
        "/metrics",
        axum::routing::get(move || async move { handle.render() }),
    )
}

type MetricsLayerAndHandle = (
    GenericMetricLayer<'static, PrometheusHandle, Handle>,
    PrometheusHandle,
);

/// Builds a layer and handle for prometheus metrics collection.
///
/// `prefix` names every metric, e.g. `waypoint_http_requests_total`.
pub fn build_metrics_layer_and_handle(
    prefix: impl Into<Cow<'static, str>>,
) -> MetricsLayerAndHandle {
    info!("Building metrics layer");
    PrometheusMetricLayerBuilder::new()
        .with_prefix(prefix)
        .enable_response_body_size(true)
        .with_endpoint_label_type(axum_prometheus::EndpointLabel::Exact)
        .with_default_metrics()
        .build_pair()
}
