mod config;

use anyhow::Context as _;
use clap::Parser as _;
use config::Config;
use tokio::net::TcpListener;
use tracing::{info, instrument};
use waypoint::{
    AppState, build_metrics_layer_and_handle, build_metrics_router, build_router,
    decision_log::DecisionLogger, inventory::RouterConfig,
};

#[tokio::main]
#[instrument]
pub async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::parse().validate()?;
    info!("Starting waypoint with config: {:?}", config);

    let router_config = RouterConfig::from_config_file(&config.config)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load routing config: {}", e))?;

    let decision_log = match &router_config.server().log_path {
        Some(path) => DecisionLogger::open(path)
            .await
            .with_context(|| format!("Failed to open decision log {}", path.display()))?,
        None => DecisionLogger::disabled(),
    };

    let host = config
        .host
        .clone()
        .unwrap_or_else(|| router_config.server().bind_host.clone());
    let port = config.port.unwrap_or(router_config.server().bind_port);

    let app_state = AppState::new(router_config, decision_log);
    let mut router = build_router(app_state);

    if config.metrics {
        let (prometheus_layer, handle) = build_metrics_layer_and_handle(config.metrics_prefix);
        router = router.layer(prometheus_layer);

        let metrics_router = build_metrics_router(handle);
        let metrics_addr = format!("0.0.0.0:{}", config.metrics_port);
        let metrics_listener = TcpListener::bind(&metrics_addr)
            .await
            .with_context(|| format!("Failed to bind metrics server to {metrics_addr}"))?;
        info!("Metrics server listening on {}", metrics_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(metrics_listener, metrics_router).await {
                tracing::error!("Metrics server stopped: {}", e);
            }
        });
    }

    let bind_addr = format!("{host}:{port}");
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {bind_addr}"))?;
    info!("Waypoint listening on {}", bind_addr);

    axum::serve(listener, router).await?;

    Ok(())
}
