//! HTTP client abstraction for calling inference backends
//!
//! The forwarder only needs "send this request, give me the response", so it talks to backends
//! through [`HttpClient`]. The real implementation is a pooled hyper client; tests swap in a
//! mock that records requests.
use async_trait::async_trait;
use axum::response::IntoResponse;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::{client::legacy::Client, rt::TokioExecutor};
use std::time::Duration;

pub type HyperClient = Client<hyper_tls::HttpsConnector<HttpConnector>, axum::body::Body>;

#[async_trait]
pub trait HttpClient: std::fmt::Debug {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait]
impl HttpClient for HyperClient {
    async fn request(
        &self,
        req: axum::extract::Request,
    ) -> Result<axum::response::Response, Box<dyn std::error::Error + Send + Sync>> {
        self.request(req)
            .await
            .map(|res| res.into_response())
            .map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
    }
}

/// Builds the pooled backend client. Connecting is bounded by `connect_timeout`; the overall
/// response budget is enforced by the caller.
pub fn create_hyper_client(connect_timeout: Duration) -> HyperClient {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(Some(connect_timeout));
    let https = hyper_tls::HttpsConnector::new_with_connector(http);

    // Connection pool configuration via environment variables
    let pool_idle_timeout_secs = std::env::var("WAYPOINT_POOL_IDLE_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(90);

    let pool_max_idle_per_host = std::env::var("WAYPOINT_POOL_MAX_IDLE_PER_HOST")
        .ok()
        .and_then(|v| v.parse::<usize>().ok())
        .unwrap_or(16);

    tracing::debug!(
        "HTTP client config: connect_timeout={:?}, idle_timeout={}s, max_idle_per_host={}",
        connect_timeout,
        pool_idle_timeout_secs,
        pool_max_idle_per_host
    );

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(Duration::from_secs(pool_idle_timeout_secs))
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_timer(hyper_util::rt::TokioTimer::new())
        .build(https)
}
