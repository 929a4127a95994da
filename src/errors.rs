//! Errors surfaced at the HTTP boundary.
use crate::forwarder::ForwardError;
use crate::routing::Decision;
use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The decision has no usable alias, or targets an endpoint that isn't configured.
    #[error(
        "invalid decision from evaluator: model '{}' on endpoint '{}'",
        .0.choice.model,
        .0.choice.endpoint
    )]
    InvalidDecision(Box<Decision>),

    #[error("upstream generate failed on {endpoint}: {source}")]
    Upstream {
        endpoint: String,
        source: ForwardError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::InvalidDecision(_) | GatewayError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            GatewayError::Upstream { source, .. } => match source {
                ForwardError::UnknownEndpoint(_) | ForwardError::InvalidRequest { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                ForwardError::Status { .. }
                | ForwardError::Transport { .. }
                | ForwardError::Timeout { .. }
                | ForwardError::InvalidBody { .. } => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            GatewayError::InvalidDecision(decision) => json!({
                "error": self.to_string(),
                "decision": decision,
            }),
            GatewayError::Upstream { .. } | GatewayError::Internal(_) => {
                json!({ "error": self.to_string() })
            }
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routing::{Choice, Constraints, Reason};
    use std::time::Duration;

    fn decision() -> Decision {
        Decision {
            choice: Choice {
                model: "router:latest".into(),
                endpoint: "cpu".into(),
                real_model: "router:latest".into(),
            },
            reason: Reason::NoCandidates,
            est_latency_s: 15.0,
            constraints: Constraints {
                prompt_tokens: 1,
                ctx_margin: 0.2,
            },
        }
    }

    #[tokio::test]
    async fn test_invalid_decision_echoes_decision() {
        let response = GatewayError::InvalidDecision(Box::new(decision())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().unwrap().contains("endpoint 'cpu'"));
        assert_eq!(body["decision"]["decision"]["endpoint"], "cpu");
        assert_eq!(body["decision"]["reason"], "No candidates at all; defaulting to CPU.");
    }

    #[test]
    fn test_upstream_status_codes() {
        let upstream = |source| GatewayError::Upstream {
            endpoint: "gpu0".into(),
            source,
        };

        let timeout = upstream(ForwardError::Timeout {
            endpoint: "gpu0".into(),
            url: "http://gpu0/api/generate".into(),
            timeout: Duration::from_secs(300),
        });
        assert_eq!(timeout.status(), StatusCode::BAD_GATEWAY);
        assert!(timeout.to_string().contains("gpu0"));
        assert!(timeout.to_string().contains("300s"));

        let missing = upstream(ForwardError::UnknownEndpoint("gpu0".into()));
        assert_eq!(missing.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let status = upstream(ForwardError::Status {
            endpoint: "gpu0".into(),
            url: "http://gpu0/api/generate".into(),
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".into(),
        });
        assert_eq!(status.status(), StatusCode::BAD_GATEWAY);
    }
}
