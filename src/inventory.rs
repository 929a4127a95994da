//! The routing configuration: endpoints, hardware profiles, the model inventory and the routing
//! policy.
//!
//! The configuration file is YAML. It is read once at startup into the loosely shaped
//! [`ConfigFile`], then validated into an immutable [`RouterConfig`] which is shared by reference
//! for the lifetime of the process. Any cross-reference that doesn't resolve (an inventory entry
//! pointing at an undefined endpoint, for example) is a [`ConfigError`] and stops the process
//! before it starts serving.
//!
//! Map order in the file is kept. Inventory order is the candidate order used to break latency
//! ties, so the first entry listed wins among equals.
use crate::models::RoutingMode;
use crate::routing::alias::normalize;
use bon::Builder;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Key of the endpoint used by the CPU rungs of the fallback ladder.
pub const CPU_ENDPOINT: &str = "cpu";

pub const DEFAULT_CTX_TOKENS: u64 = 4096;
pub const DEFAULT_TOKENS_PER_SECOND: f64 = 10.0;

const PREFER_PREFIX: &str = "prefer_";
const PREFER_SUFFIX: &str = "_for";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no endpoints configured")]
    NoEndpoints,
    #[error("duplicate {kind} '{key}'")]
    Duplicate { kind: &'static str, key: String },
    #[error("endpoint '{key}' has an invalid URL '{url}': {reason}")]
    InvalidUrl {
        key: String,
        url: String,
        reason: String,
    },
    #[error("{context} references undefined endpoint '{endpoint}'")]
    UnknownEndpoint { context: String, endpoint: String },
    #[error("invalid policy: {0}")]
    InvalidPolicy(String),
    #[error("invalid router settings: {0}")]
    InvalidSettings(String),
}

/// The configuration file as written on disk.
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    #[serde(default)]
    pub router: RouterSection,
    #[serde(deserialize_with = "ordered_map")]
    pub endpoints: Vec<(String, String)>,
    #[serde(default)]
    pub hardware: HashMap<String, HardwareProfile>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub inventory: Vec<(String, RawInventoryEntry)>,
    #[serde(default)]
    pub model_map: HashMap<String, String>,
    #[serde(default, deserialize_with = "ordered_map")]
    pub keywords: Vec<(String, Vec<String>)>,
    #[serde(default)]
    pub default_models: HashMap<String, String>,
    #[serde(default)]
    pub policy: RawPolicy,
}

/// The `router:` block: binding, timeouts and the decision log location.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterSection {
    /// Which path the backend-compatible `/api/generate` route takes.
    pub mode: RoutingMode,
    pub bind_host: String,
    pub bind_port: u16,
    pub request_timeout_s: u64,
    pub connect_timeout_s: u64,
    pub log_path: Option<PathBuf>,
    pub default_endpoint: String,
}

impl Default for RouterSection {
    fn default() -> Self {
        Self {
            mode: RoutingMode::Heuristic,
            bind_host: "127.0.0.1".into(),
            bind_port: 28100,
            request_timeout_s: 300,
            connect_timeout_s: 10,
            log_path: None,
            default_endpoint: "gpu0".into(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RawInventoryEntry {
    pub endpoint: String,
    #[serde(default)]
    pub params: RawParams,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawParams {
    pub real_model: Option<String>,
    pub ctx_tokens: Option<u64>,
    pub vram_req_gb: Option<f64>,
    #[serde(default)]
    pub strengths: Vec<String>,
    #[serde(default)]
    pub tiers: Vec<Tier>,
}

/// The `policy:` block. Besides the named fields, every `prefer_<tag>_for: [..]` list becomes a
/// keyword group biasing selection toward inventory entries with strength `<tag>`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RawPolicy {
    pub min_ctx_margin: f64,
    pub allow_cpu: bool,
    pub cpu_fallback_model: String,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for RawPolicy {
    fn default() -> Self {
        Self {
            min_ctx_margin: 0.2,
            allow_cpu: true,
            cpu_fallback_model: "router:latest".into(),
            extra: BTreeMap::new(),
        }
    }
}

/// Capacity and throughput of the machine behind an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    #[serde(default)]
    pub vram_gb: f64,
    #[serde(default = "default_tokens_per_second")]
    pub est_tok_s: f64,
}

fn default_tokens_per_second() -> f64 {
    DEFAULT_TOKENS_PER_SECOND
}

impl Default for HardwareProfile {
    fn default() -> Self {
        Self {
            vram_gb: 0.0,
            est_tok_s: DEFAULT_TOKENS_PER_SECOND,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tier {
    #[serde(default)]
    pub tier: Option<String>,
}

/// A backend inference service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Endpoint {
    pub key: String,
    /// Base URL without a trailing slash.
    pub url: String,
}

/// An alias bound to an endpoint, with the resources it needs and what it is good at.
#[derive(Debug, Clone, PartialEq, Serialize, Builder)]
pub struct InventoryEntry {
    #[builder(into)]
    pub alias: String,
    #[builder(into)]
    pub endpoint: String,
    #[builder(into)]
    pub real_model: String,
    #[builder(default = DEFAULT_CTX_TOKENS)]
    pub ctx_tokens: u64,
    #[builder(default)]
    pub vram_req_gb: f64,
    #[builder(default)]
    pub strengths: Vec<String>,
    #[builder(default)]
    pub tiers: Vec<Tier>,
}

impl InventoryEntry {
    pub fn has_any_strength(&self, tags: &[&str]) -> bool {
        self.strengths.iter().any(|s| tags.contains(&s.as_str()))
    }
}

/// Prompt keywords that bias selection toward a strength tag. Keywords are stored lowercased.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeywordGroup {
    pub strength: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RoutingPolicy {
    pub min_ctx_margin: f64,
    pub allow_cpu: bool,
    pub cpu_fallback_model: String,
    pub prefer: Vec<KeywordGroup>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServerSettings {
    pub mode: RoutingMode,
    pub bind_host: String,
    pub bind_port: u16,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
    pub log_path: Option<PathBuf>,
    pub default_endpoint: String,
}

/// The validated, read-only configuration snapshot.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    endpoints: Vec<Endpoint>,
    hardware: HashMap<String, HardwareProfile>,
    inventory: Vec<InventoryEntry>,
    model_map: HashMap<String, String>,
    keywords: Vec<(String, Vec<String>)>,
    default_models: HashMap<String, String>,
    policy: RoutingPolicy,
    server: ServerSettings,
}

impl RouterConfig {
    pub async fn from_config_file(path: &Path) -> Result<Self, ConfigError> {
        let contents =
            tokio::fs::read_to_string(path)
                .await
                .map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;

        let config = Self::from_yaml_str(&contents)?;
        info!(
            "Loaded {} endpoints and {} inventory entries from {}",
            config.endpoints.len(),
            config.inventory.len(),
            path.display()
        );
        Ok(config)
    }

    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let file: ConfigFile = serde_yaml::from_str(contents)?;
        Self::from_config(file)
    }

    /// Validates a parsed file, resolving defaults and checking every endpoint reference.
    pub fn from_config(file: ConfigFile) -> Result<Self, ConfigError> {
        if file.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints);
        }

        let mut endpoints = Vec::with_capacity(file.endpoints.len());
        let mut seen = HashSet::new();
        for (key, raw_url) in file.endpoints {
            if !seen.insert(key.clone()) {
                return Err(ConfigError::Duplicate {
                    kind: "endpoint",
                    key,
                });
            }
            let parsed = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidUrl {
                key: key.clone(),
                url: raw_url.clone(),
                reason: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidUrl {
                    key,
                    url: raw_url,
                    reason: "scheme must be http or https".into(),
                });
            }
            let url = raw_url.trim_end_matches('/').to_string();
            endpoints.push(Endpoint { key, url });
        }

        let known = |key: &str| endpoints.iter().any(|e| e.key == key);
        let require = |context: String, endpoint: &str| {
            if known(endpoint) {
                Ok(())
            } else {
                Err(ConfigError::UnknownEndpoint {
                    context,
                    endpoint: endpoint.to_string(),
                })
            }
        };

        for key in file.hardware.keys() {
            require("hardware profile".into(), key)?;
        }
        for (alias, target) in &file.model_map {
            require(format!("model_map entry '{alias}'"), target)?;
        }
        for (key, _) in &file.keywords {
            require("keywords".into(), key)?;
        }
        for key in file.default_models.keys() {
            require("default_models".into(), key)?;
        }
        require(
            "router.default_endpoint".into(),
            &file.router.default_endpoint,
        )?;

        let mut inventory = Vec::with_capacity(file.inventory.len());
        let mut aliases = HashSet::new();
        for (alias, raw) in file.inventory {
            require(format!("inventory entry '{alias}'"), &raw.endpoint)?;
            if !aliases.insert(alias.clone()) {
                return Err(ConfigError::Duplicate {
                    kind: "inventory alias",
                    key: alias,
                });
            }
            let params = raw.params;
            inventory.push(InventoryEntry {
                real_model: params.real_model.unwrap_or_else(|| alias.clone()),
                alias,
                endpoint: raw.endpoint,
                ctx_tokens: params.ctx_tokens.unwrap_or(DEFAULT_CTX_TOKENS),
                vram_req_gb: params.vram_req_gb.unwrap_or(0.0),
                strengths: params.strengths,
                tiers: params.tiers,
            });
        }

        let policy = validate_policy(file.policy)?;
        let server = validate_server(file.router)?;

        let keywords = file
            .keywords
            .into_iter()
            .map(|(key, kws)| (key, kws.into_iter().map(|k| k.to_lowercase()).collect()))
            .collect();

        debug!(
            "{} keyword groups configured for strength preference",
            policy.prefer.len()
        );

        Ok(Self {
            endpoints,
            hardware: file.hardware,
            inventory,
            model_map: file.model_map,
            keywords,
            default_models: file.default_models,
            policy,
            server,
        })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn has_endpoint(&self, key: &str) -> bool {
        self.endpoint_url(key).is_some()
    }

    pub fn endpoint_url(&self, key: &str) -> Option<&str> {
        self.endpoints
            .iter()
            .find(|e| e.key == key)
            .map(|e| e.url.as_str())
    }

    /// The hardware profile for an endpoint; endpoints without one have no VRAM and the default
    /// throughput.
    pub fn hardware(&self, endpoint: &str) -> HardwareProfile {
        self.hardware.get(endpoint).copied().unwrap_or_default()
    }

    /// Inventory entries in configured order.
    pub fn inventory(&self) -> &[InventoryEntry] {
        &self.inventory
    }

    pub fn inventory_entry(&self, alias: &str) -> Option<&InventoryEntry> {
        self.inventory.iter().find(|e| e.alias == alias)
    }

    /// The backend model name for `name`: the inventory's real model when `name` is an alias,
    /// as given or once normalised, and `name` itself otherwise.
    pub fn real_model_for(&self, name: &str) -> String {
        self.inventory_entry(name)
            .or_else(|| normalize(Some(name)).and_then(|alias| self.inventory_entry(&alias)))
            .map(|entry| entry.real_model.clone())
            .unwrap_or_else(|| name.to_string())
    }

    pub fn model_map_target(&self, alias: &str) -> Option<&str> {
        self.model_map.get(alias).map(String::as_str)
    }

    /// Per-endpoint keyword lists for the heuristic path, in configured order.
    pub fn keywords(&self) -> &[(String, Vec<String>)] {
        &self.keywords
    }

    pub fn default_model(&self, endpoint: &str) -> Option<&str> {
        self.default_models.get(endpoint).map(String::as_str)
    }

    pub fn policy(&self) -> &RoutingPolicy {
        &self.policy
    }

    pub fn server(&self) -> &ServerSettings {
        &self.server
    }
}

fn validate_policy(raw: RawPolicy) -> Result<RoutingPolicy, ConfigError> {
    if !raw.min_ctx_margin.is_finite() || raw.min_ctx_margin < 0.0 {
        return Err(ConfigError::InvalidPolicy(format!(
            "min_ctx_margin must be a non-negative number, got {}",
            raw.min_ctx_margin
        )));
    }

    let mut prefer = Vec::new();
    for (name, value) in raw.extra {
        let Some(strength) = name
            .strip_prefix(PREFER_PREFIX)
            .and_then(|rest| rest.strip_suffix(PREFER_SUFFIX))
            .filter(|s| !s.is_empty())
        else {
            debug!("Ignoring unknown policy key {}", name);
            continue;
        };
        let keywords: Vec<String> = serde_yaml::from_value(value).map_err(|e| {
            ConfigError::InvalidPolicy(format!("{name} must be a list of strings: {e}"))
        })?;
        prefer.push(KeywordGroup {
            strength: strength.to_string(),
            keywords: keywords.into_iter().map(|k| k.to_lowercase()).collect(),
        });
    }

    Ok(RoutingPolicy {
        min_ctx_margin: raw.min_ctx_margin,
        allow_cpu: raw.allow_cpu,
        cpu_fallback_model: raw.cpu_fallback_model,
        prefer,
    })
}

fn validate_server(raw: RouterSection) -> Result<ServerSettings, ConfigError> {
    if raw.request_timeout_s == 0 {
        return Err(ConfigError::InvalidSettings(
            "request_timeout_s must be greater than zero".into(),
        ));
    }
    if raw.connect_timeout_s == 0 {
        return Err(ConfigError::InvalidSettings(
            "connect_timeout_s must be greater than zero".into(),
        ));
    }
    Ok(ServerSettings {
        mode: raw.mode,
        bind_host: raw.bind_host,
        bind_port: raw.bind_port,
        request_timeout: Duration::from_secs(raw.request_timeout_s),
        connect_timeout: Duration::from_secs(raw.connect_timeout_s),
        log_path: raw.log_path,
        default_endpoint: raw.default_endpoint,
    })
}

/// Deserializes a map into a list of entries, keeping the order they were written in.
fn ordered_map<'de, D, V>(deserializer: D) -> Result<Vec<(String, V)>, D::Error>
where
    D: Deserializer<'de>,
    V: Deserialize<'de>,
{
    struct OrderedVisitor<V>(PhantomData<V>);

    impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedVisitor<V> {
        type Value = Vec<(String, V)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a map")
        }

        fn visit_unit<E: serde::de::Error>(self) -> Result<Self::Value, E> {
            Ok(Vec::new())
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some(entry) = map.next_entry::<String, V>()? {
                entries.push(entry);
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedVisitor(PhantomData))
}
