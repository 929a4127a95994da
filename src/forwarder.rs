//! Forwarding a prompt to a backend.
//!
//! Backends are called single-shot (`stream: false`). The primary call goes to
//! `/api/generate`; a backend that answers 404 there is retried once on the chat-style
//! `/api/chat` path with the prompt wrapped as a single user message. Nothing else is retried.
use crate::client::HttpClient;
use crate::inventory::RouterConfig;
use crate::models::ChatMessage;
use axum::http::{Method, StatusCode, header};
use serde::Serialize;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, instrument};

const GENERATE_PATH: &str = "/api/generate";
const CHAT_PATH: &str = "/api/chat";
const ERROR_BODY_LIMIT: usize = 512;

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("endpoint '{0}' is not configured")]
    UnknownEndpoint(String),
    #[error("failed to build request to {url}: {reason}")]
    InvalidRequest { url: String, reason: String },
    #[error("{endpoint} ({url}) returned {status}: {body}")]
    Status {
        endpoint: String,
        url: String,
        status: StatusCode,
        body: String,
    },
    #[error("{endpoint} ({url}) is unreachable: {reason}")]
    Transport {
        endpoint: String,
        url: String,
        reason: String,
    },
    #[error("{endpoint} ({url}) timed out after {}s", .timeout.as_secs())]
    Timeout {
        endpoint: String,
        url: String,
        timeout: Duration,
    },
    #[error("{endpoint} ({url}) returned a malformed body: {reason}")]
    InvalidBody {
        endpoint: String,
        url: String,
        reason: String,
    },
}

/// What to send: the prompt and the model names, in order of preference.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForwardRequest<'a> {
    pub prompt: &'a str,
    /// A model chosen by the router, which wins over whatever the client asked for.
    pub upstream_model: Option<&'a str>,
    /// The model named in the client's request.
    pub model: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct GenerateBody<'a> {
    prompt: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct ChatBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    model: Option<&'a str>,
    messages: Vec<ChatMessage>,
    stream: bool,
}

/// Sends requests to backends on behalf of one gateway request.
#[derive(Debug)]
pub struct Forwarder<'a, T: HttpClient> {
    client: &'a T,
    config: &'a RouterConfig,
}

impl<'a, T: HttpClient> Forwarder<'a, T> {
    pub fn new(client: &'a T, config: &'a RouterConfig) -> Self {
        Self { client, config }
    }

    /// The backend model name to send: the router's choice, else the client's, else the
    /// endpoint's default model, else nothing. Inventory aliases become their real model.
    pub fn resolve_model(&self, endpoint: &str, request: &ForwardRequest<'_>) -> String {
        let chosen = request
            .upstream_model
            .filter(|m| !m.is_empty())
            .or(request.model.filter(|m| !m.is_empty()))
            .or(self.config.default_model(endpoint))
            .unwrap_or_default();

        if chosen.is_empty() {
            String::new()
        } else {
            self.config.real_model_for(chosen)
        }
    }

    /// Forwards to `endpoint`, falling back to the chat path when the generate path is missing.
    #[instrument(skip(self, request), fields(prompt_len = request.prompt.len()))]
    pub async fn forward(
        &self,
        endpoint: &str,
        request: &ForwardRequest<'_>,
    ) -> Result<Value, ForwardError> {
        let base = self
            .config
            .endpoint_url(endpoint)
            .ok_or_else(|| ForwardError::UnknownEndpoint(endpoint.to_string()))?;

        let real_model = self.resolve_model(endpoint, request);
        let model = Some(real_model.as_str()).filter(|m| !m.is_empty());

        let generate = GenerateBody {
            prompt: request.prompt,
            stream: false,
            model,
        };
        match self
            .post_json(endpoint, &format!("{base}{GENERATE_PATH}"), &generate)
            .await
        {
            Err(ForwardError::Status { status, .. }) if status == StatusCode::NOT_FOUND => {
                info!("{} has no {}, retrying on {}", endpoint, GENERATE_PATH, CHAT_PATH);
            }
            other => return other,
        }

        let chat = ChatBody {
            model,
            messages: vec![ChatMessage::user(request.prompt)],
            stream: false,
        };
        self.post_json(endpoint, &format!("{base}{CHAT_PATH}"), &chat)
            .await
    }

    async fn post_json<B: Serialize>(
        &self,
        endpoint: &str,
        url: &str,
        body: &B,
    ) -> Result<Value, ForwardError> {
        let invalid_request = |reason: String| ForwardError::InvalidRequest {
            url: url.to_string(),
            reason,
        };
        let bytes = serde_json::to_vec(body).map_err(|e| invalid_request(e.to_string()))?;
        let req = axum::http::Request::builder()
            .method(Method::POST)
            .uri(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(bytes))
            .map_err(|e| invalid_request(e.to_string()))?;

        debug!("POST {}", url);
        let timeout = self.config.server().request_timeout;
        let transport = |reason: String| ForwardError::Transport {
            endpoint: endpoint.to_string(),
            url: url.to_string(),
            reason,
        };

        let exchange = async {
            let response = self
                .client
                .request(req)
                .await
                .map_err(|e| transport(e.to_string()))?;
            let status = response.status();
            let body = axum::body::to_bytes(response.into_body(), usize::MAX)
                .await
                .map_err(|e| transport(e.to_string()))?;
            Ok::<_, ForwardError>((status, body))
        };

        let (status, body) = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| ForwardError::Timeout {
                endpoint: endpoint.to_string(),
                url: url.to_string(),
                timeout,
            })??;

        let text = String::from_utf8_lossy(&body);
        if !status.is_success() {
            return Err(ForwardError::Status {
                endpoint: endpoint.to_string(),
                url: url.to_string(),
                status,
                body: text.chars().take(ERROR_BODY_LIMIT).collect(),
            });
        }

        serde_json::from_str(&text).map_err(|e| ForwardError::InvalidBody {
            endpoint: endpoint.to_string(),
            url: url.to_string(),
            reason: e.to_string(),
        })
    }
}
