//! Request and response bodies of the gateway's HTTP surface.
use crate::inventory::InventoryEntry;
use crate::routing::Decision;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::borrow::Cow;
use tracing::warn;

/// A chat-style message, as accepted from clients and sent to chat backends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// The body accepted by every POST route.
///
/// Parsing is lenient: a body that isn't valid JSON (or is empty) is treated as an empty request
/// and processed with defaults rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RequestEnvelope {
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub messages: Option<Vec<ChatMessage>>,
    /// Accepted for compatibility; backends are always called non-streaming.
    #[serde(default)]
    pub stream: Option<bool>,
}

impl RequestEnvelope {
    pub fn from_body(body: &[u8]) -> Self {
        if body.is_empty() {
            return Self::default();
        }
        match serde_json::from_slice(body) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!("Unparseable request body ({}), treating it as empty", e);
                Self::default()
            }
        }
    }

    /// The prompt text, or the messages' contents joined by newlines when no prompt was given.
    pub fn prompt_text(&self) -> Cow<'_, str> {
        match (&self.prompt, &self.messages) {
            (Some(prompt), _) => Cow::Borrowed(prompt.as_str()),
            (None, Some(messages)) => Cow::Owned(
                messages
                    .iter()
                    .map(|m| m.content.as_str())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
            (None, None) => Cow::Borrowed(""),
        }
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }
}

/// Which path chose the endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Model map and prompt keywords pick an endpoint directly.
    #[default]
    Heuristic,
    /// The decision engine scores the inventory.
    Scored,
}

/// Routing metadata attached to forwarded responses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RouterMeta {
    pub mode: RoutingMode,
    pub target: String,
    pub endpoint: String,
    pub elapsed_s: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateResponse {
    pub evaluator: Decision,
}

#[derive(Debug, Clone, Serialize)]
pub struct GenerateResponse {
    pub router: RouterMeta,
    pub upstream_response: Value,
}

#[derive(Debug, Clone, Serialize)]
pub struct RouteAndGenerateResponse {
    pub evaluator: Decision,
    pub router: RouterMeta,
    pub upstream_response: Value,
}

/// The `/api/tags` catalogue, listing inventory aliases the way backends list their models.
#[derive(Debug, Clone, Serialize)]
pub struct TagsResponse {
    pub models: Vec<TagModel>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagModel {
    pub name: String,
    pub model: String,
    pub modified_at: String,
    pub size: u64,
    pub digest: String,
    pub details: TagDetails,
}

#[derive(Debug, Clone, Serialize)]
pub struct TagDetails {
    pub tiers: Vec<Option<String>>,
    pub strengths: Vec<String>,
    pub ctx_tokens: u64,
}

impl TagModel {
    pub fn from_entry(entry: &InventoryEntry, modified_at: &str) -> Self {
        let tiers = if entry.tiers.is_empty() {
            vec![Some("default".to_string())]
        } else {
            entry.tiers.iter().map(|t| t.tier.clone()).collect()
        };
        TagModel {
            name: entry.alias.clone(),
            model: entry.alias.clone(),
            modified_at: modified_at.to_string(),
            size: 0,
            digest: "alias".into(),
            details: TagDetails {
                tiers,
                strengths: entry.strengths.clone(),
                ctx_tokens: entry.ctx_tokens,
            },
        }
    }
}

impl TagsResponse {
    pub fn from_inventory(inventory: &[InventoryEntry]) -> Self {
        let modified_at = chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Micros, true);
        TagsResponse {
            models: inventory
                .iter()
                .map(|entry| TagModel::from_entry(entry, &modified_at))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Tier;

    #[test]
    fn test_envelope_parses_fields() {
        let envelope = RequestEnvelope::from_body(
            br#"{"prompt": "hi", "model": "gar-chat:latest", "stream": true, "temperature": 0.3}"#,
        );
        assert_eq!(envelope.prompt_text(), "hi");
        assert_eq!(envelope.model(), Some("gar-chat:latest"));
        assert_eq!(envelope.stream, Some(true));
    }

    #[test]
    fn test_malformed_body_is_an_empty_request() {
        assert_eq!(RequestEnvelope::from_body(b"{not json"), RequestEnvelope::default());
        assert_eq!(RequestEnvelope::from_body(b""), RequestEnvelope::default());
        assert_eq!(RequestEnvelope::from_body(br#"{"prompt": 42}"#), RequestEnvelope::default());
        assert_eq!(RequestEnvelope::default().prompt_text(), "");
    }

    #[test]
    fn test_null_prompt_is_empty() {
        let envelope = RequestEnvelope::from_body(br#"{"prompt": null, "model": null}"#);
        assert_eq!(envelope.prompt_text(), "");
        assert_eq!(envelope.model(), None);
    }

    #[test]
    fn test_messages_become_the_prompt() {
        let envelope = RequestEnvelope::from_body(
            br#"{"messages": [{"role": "system", "content": "be brief"}, {"role": "user", "content": "integral of x"}]}"#,
        );
        assert_eq!(envelope.prompt_text(), "be brief\nintegral of x");

        let envelope = RequestEnvelope::from_body(
            br#"{"prompt": "wins", "messages": [{"role": "user", "content": "ignored"}]}"#,
        );
        assert_eq!(envelope.prompt_text(), "wins");
    }

    #[test]
    fn test_tag_model_tiers() {
        let plain = InventoryEntry::builder()
            .alias("gar-chat")
            .endpoint("gpu0")
            .real_model("llama3")
            .strengths(vec!["chat".into()])
            .build();
        let tag = TagModel::from_entry(&plain, "2026-01-01T00:00:00Z");
        assert_eq!(tag.details.tiers, vec![Some("default".to_string())]);
        assert_eq!(tag.details.ctx_tokens, 4096);
        assert_eq!(tag.digest, "alias");

        let tiered = InventoryEntry::builder()
            .alias("gar-reason")
            .endpoint("gpu0")
            .real_model("qwen")
            .tiers(vec![
                Tier {
                    tier: Some("fast".into()),
                },
                Tier { tier: None },
            ])
            .build();
        let tag = TagModel::from_entry(&tiered, "2026-01-01T00:00:00Z");
        assert_eq!(tag.details.tiers, vec![Some("fast".to_string()), None]);
    }

    #[test]
    fn test_routing_mode_serialization() {
        assert_eq!(serde_json::to_value(RoutingMode::Scored).unwrap(), "scored");
        let mode: RoutingMode = serde_json::from_str(r#""heuristic""#).unwrap();
        assert_eq!(mode, RoutingMode::Heuristic);
    }
}
