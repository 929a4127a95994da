//! Axum handlers for the gateway
use crate::AppState;
use crate::client::HttpClient;
use crate::decision_log::{LogRecord, ROUTE_EVENT, UPSTREAM_ERROR_EVENT};
use crate::errors::GatewayError;
use crate::forwarder::{ForwardRequest, Forwarder};
use crate::models::{
    EvaluateResponse, GenerateResponse, RequestEnvelope, RouteAndGenerateResponse, RouterMeta,
    RoutingMode, TagsResponse,
};
use crate::routing::{self, Decision, selector};
use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use std::time::Instant;
use tracing::{debug, error, info, instrument};

const PROMPT_SNIPPET_CHARS: usize = 80;

#[instrument(skip(state))]
pub async fn tags<T: HttpClient>(State(state): State<AppState<T>>) -> Json<TagsResponse> {
    Json(TagsResponse::from_inventory(state.config.inventory()))
}

/// Decision only: no backend is called.
#[instrument(skip(state, body))]
pub async fn evaluate<T: HttpClient>(
    State(state): State<AppState<T>>,
    body: Bytes,
) -> Json<EvaluateResponse> {
    let envelope = RequestEnvelope::from_body(&body);
    let prompt = envelope.prompt_text();
    let decision = routing::evaluate(&state.config, &prompt, envelope.model());
    log_decision(&decision, &prompt);
    Json(EvaluateResponse {
        evaluator: decision,
    })
}

/// Heuristic forward: the model map or prompt keywords pick the endpoint, bypassing the
/// inventory scoring.
#[instrument(skip(state, body))]
pub async fn generate<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    body: Bytes,
) -> Result<Json<GenerateResponse>, GatewayError> {
    let envelope = RequestEnvelope::from_body(&body);
    let (router, upstream_response) = forward_heuristic(&state, &envelope).await?;
    Ok(Json(GenerateResponse {
        router,
        upstream_response,
    }))
}

/// Full pipeline: decide, then forward the decision's alias to its endpoint.
#[instrument(skip(state, body))]
pub async fn route_and_generate<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    body: Bytes,
) -> Result<Json<RouteAndGenerateResponse>, GatewayError> {
    let envelope = RequestEnvelope::from_body(&body);
    let (evaluator, router, upstream_response) = forward_scored(&state, &envelope).await?;
    Ok(Json(RouteAndGenerateResponse {
        evaluator,
        router,
        upstream_response,
    }))
}

/// Backend-compatible generate: routes according to the configured mode and answers with the
/// backend's own response body, so existing backend clients can point at the gateway.
#[instrument(skip(state, body))]
pub async fn backend_generate<T: HttpClient + Clone + Send + Sync + 'static>(
    State(state): State<AppState<T>>,
    body: Bytes,
) -> Result<Json<Value>, GatewayError> {
    let envelope = RequestEnvelope::from_body(&body);
    let upstream_response = match state.config.server().mode {
        RoutingMode::Heuristic => forward_heuristic(&state, &envelope).await?.1,
        RoutingMode::Scored => forward_scored(&state, &envelope).await?.2,
    };
    Ok(Json(upstream_response))
}

pub async fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({"error": "Use POST /evaluate | /route_and_generate | /generate"})),
    )
        .into_response()
}

async fn forward_heuristic<T: HttpClient + Clone + Send + Sync + 'static>(
    state: &AppState<T>,
    envelope: &RequestEnvelope,
) -> Result<(RouterMeta, Value), GatewayError> {
    let prompt = envelope.prompt_text();
    let target = selector::resolve_target(&state.config, envelope.model(), &prompt);
    info!("Heuristic route for model {:?}: {}", envelope.model(), target);

    let request = ForwardRequest {
        prompt: &prompt,
        upstream_model: None,
        model: envelope.model(),
    };
    dispatch(state, RoutingMode::Heuristic, target, request).await
}

async fn forward_scored<T: HttpClient + Clone + Send + Sync + 'static>(
    state: &AppState<T>,
    envelope: &RequestEnvelope,
) -> Result<(Decision, RouterMeta, Value), GatewayError> {
    let prompt = envelope.prompt_text();
    let decision = routing::evaluate(&state.config, &prompt, envelope.model());
    log_decision(&decision, &prompt);

    if decision.choice.model.is_empty() || !state.config.has_endpoint(&decision.choice.endpoint) {
        error!(
            "Decision targets unusable endpoint '{}' (model '{}')",
            decision.choice.endpoint, decision.choice.model
        );
        return Err(GatewayError::InvalidDecision(Box::new(decision)));
    }

    let request = ForwardRequest {
        prompt: &prompt,
        upstream_model: Some(decision.choice.model.as_str()),
        model: envelope.model(),
    };
    let (router, upstream) = dispatch(
        state,
        RoutingMode::Scored,
        &decision.choice.endpoint,
        request,
    )
    .await?;
    Ok((decision, router, upstream))
}

/// Forwards to `target` on a task of its own, so a client hanging up doesn't abort the backend
/// call or its log record.
async fn dispatch<T: HttpClient + Clone + Send + Sync + 'static>(
    state: &AppState<T>,
    mode: RoutingMode,
    target: &str,
    request: ForwardRequest<'_>,
) -> Result<(RouterMeta, Value), GatewayError> {
    let state = state.clone();
    let target = target.to_string();
    let prompt = request.prompt.to_string();
    let upstream_model = request.upstream_model.map(str::to_string);
    let model = request.model.map(str::to_string);

    let task = tokio::spawn(async move {
        let request = ForwardRequest {
            prompt: &prompt,
            upstream_model: upstream_model.as_deref(),
            model: model.as_deref(),
        };
        forward_and_log(&state, mode, &target, &request).await
    });
    task.await.map_err(|e| GatewayError::Internal(e.to_string()))?
}

/// Times the forward and appends a decision log record whatever the outcome.
async fn forward_and_log<T: HttpClient>(
    state: &AppState<T>,
    mode: RoutingMode,
    target: &str,
    request: &ForwardRequest<'_>,
) -> Result<(RouterMeta, Value), GatewayError> {
    let endpoint_url = state.config.endpoint_url(target).unwrap_or_default().to_string();
    let forwarder = Forwarder::new(&state.http_client, &state.config);

    let started = Instant::now();
    let result = forwarder.forward(target, request).await;
    let elapsed_s = (started.elapsed().as_secs_f64() * 1000.0).round() / 1000.0;

    let event = if result.is_ok() {
        ROUTE_EVENT
    } else {
        UPSTREAM_ERROR_EVENT
    };
    state
        .decision_log
        .append(&LogRecord::new(
            event,
            target,
            endpoint_url.as_str(),
            request.prompt.chars().count(),
            elapsed_s,
        ))
        .await;

    match result {
        Ok(upstream) => {
            debug!("{} answered in {}s", target, elapsed_s);
            Ok((
                RouterMeta {
                    mode,
                    target: target.to_string(),
                    endpoint: endpoint_url,
                    elapsed_s,
                },
                upstream,
            ))
        }
        Err(source) => {
            error!("Error forwarding request to {} ({}): {}", target, endpoint_url, source);
            Err(GatewayError::Upstream {
                endpoint: target.to_string(),
                source,
            })
        }
    }
}

fn log_decision(decision: &Decision, prompt: &str) {
    let snippet: String = prompt
        .chars()
        .take(PROMPT_SNIPPET_CHARS)
        .map(|c| if c == '\n' { ' ' } else { c })
        .collect();
    info!(
        model = %decision.choice.model,
        real_model = %decision.choice.real_model,
        endpoint = %decision.choice.endpoint,
        reason = decision.reason.message(),
        est_latency_s = decision.est_latency_s,
        prompt = %snippet,
        "Routing decision"
    );
}
