//! Latency ranking and the fallback ladder used when no candidate survives filtering.
use super::constraints::Constraints;
use crate::inventory::{CPU_ENDPOINT, HardwareProfile, InventoryEntry, RouterConfig};
use serde::{Serialize, Serializer};

/// Nominal response length used to compare endpoints. It is a ranking signal, not a forecast of
/// the real response size.
pub const NOMINAL_OUTPUT_TOKENS: f64 = 150.0;

/// Why a decision was reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reason {
    LowestLatency,
    CpuFallback,
    FirstAvailable,
    NoCandidates,
}

impl Reason {
    pub fn message(self) -> &'static str {
        match self {
            Reason::LowestLatency => "Chosen by strengths/context and lowest est. latency.",
            Reason::CpuFallback => "No GPU candidate fits; fallback to CPU.",
            Reason::FirstAvailable => "No perfect fit; choosing first available.",
            Reason::NoCandidates => "No candidates at all; defaulting to CPU.",
        }
    }
}

impl Serialize for Reason {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.message())
    }
}

/// The alias, endpoint and backend model a decision points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Choice {
    pub model: String,
    pub endpoint: String,
    pub real_model: String,
}

/// The routing engine's answer for one request. One is always produced, even when nothing fits.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    #[serde(rename = "decision")]
    pub choice: Choice,
    pub reason: Reason,
    pub est_latency_s: f64,
    pub constraints: Constraints,
}

/// Seconds to produce [`NOMINAL_OUTPUT_TOKENS`] on the given hardware, rounded to hundredths.
///
/// Ties round to even on the exact binary value, so `3.125` becomes `3.12`.
pub fn estimate_latency(hardware: &HardwareProfile) -> f64 {
    let seconds = NOMINAL_OUTPUT_TOKENS / hardware.est_tok_s.max(1.0);
    round_hundredths(seconds)
}

// Float formatting works on the exact decimal expansion and breaks ties to even.
fn round_hundredths(value: f64) -> f64 {
    format!("{value:.2}").parse().unwrap_or(value)
}

/// Picks the fitting candidate with the lowest latency estimate, the first one in candidate
/// order among equals. With nothing fitting, falls down the ladder:
///
/// 1. the CPU endpoint, when the policy allows it and one is configured;
/// 2. the first candidate from before filtering;
/// 3. the CPU endpoint regardless, even if it isn't configured.
pub fn rank(
    config: &RouterConfig,
    candidates: &[&InventoryEntry],
    fitting: &[&InventoryEntry],
    constraints: Constraints,
) -> Decision {
    let latency = |endpoint: &str| estimate_latency(&config.hardware(endpoint));

    let best = fitting
        .iter()
        .map(|entry| (*entry, latency(&entry.endpoint)))
        .min_by(|(_, a), (_, b)| a.total_cmp(b));

    if let Some((entry, est_latency_s)) = best {
        return Decision {
            choice: choice_for(entry),
            reason: Reason::LowestLatency,
            est_latency_s,
            constraints,
        };
    }

    let policy = config.policy();
    let cpu_decision = |reason| Decision {
        choice: Choice {
            model: policy.cpu_fallback_model.clone(),
            endpoint: CPU_ENDPOINT.to_string(),
            real_model: config.real_model_for(&policy.cpu_fallback_model),
        },
        reason,
        est_latency_s: latency(CPU_ENDPOINT),
        constraints,
    };

    if policy.allow_cpu && config.has_endpoint(CPU_ENDPOINT) {
        return cpu_decision(Reason::CpuFallback);
    }

    if let Some(first) = candidates.first() {
        return Decision {
            choice: choice_for(first),
            reason: Reason::FirstAvailable,
            est_latency_s: latency(&first.endpoint),
            constraints,
        };
    }

    cpu_decision(Reason::NoCandidates)
}

fn choice_for(entry: &InventoryEntry) -> Choice {
    Choice {
        model: entry.alias.clone(),
        endpoint: entry.endpoint.clone(),
        real_model: entry.real_model.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constraints() -> Constraints {
        Constraints {
            prompt_tokens: 10,
            ctx_margin: 0.2,
        }
    }

    #[test]
    fn test_estimate_latency() {
        let hw = |est_tok_s| HardwareProfile {
            vram_gb: 0.0,
            est_tok_s,
        };
        assert_eq!(estimate_latency(&hw(10.0)), 15.0);
        assert_eq!(estimate_latency(&hw(45.0)), 3.33);
        // 150/48 is exactly 3.125
        assert_eq!(estimate_latency(&hw(48.0)), 3.12);
        // 150/40 is exactly 3.75, already two places
        assert_eq!(estimate_latency(&hw(40.0)), 3.75);
        assert_eq!(estimate_latency(&hw(0.0)), 150.0);
        assert_eq!(estimate_latency(&hw(0.5)), 150.0);
    }

    #[test]
    fn test_reason_serializes_as_message() {
        let json = serde_json::to_value(Reason::CpuFallback).unwrap();
        assert_eq!(json, "No GPU candidate fits; fallback to CPU.");
    }

    #[test]
    fn test_lowest_latency_wins() {
        let config = RouterConfig::from_yaml_str(
            r#"
endpoints:
  gpu0: http://127.0.0.1:11434
  gpu1: http://127.0.0.1:11435
hardware:
  gpu0: { est_tok_s: 20 }
  gpu1: { est_tok_s: 60 }
inventory:
  slow: { endpoint: gpu0 }
  fast: { endpoint: gpu1, params: { real_model: "fast:7b" } }
"#,
        )
        .unwrap();
        let all: Vec<&InventoryEntry> = config.inventory().iter().collect();

        let decision = rank(&config, &all, &all, constraints());
        assert_eq!(decision.choice.model, "fast");
        assert_eq!(decision.choice.endpoint, "gpu1");
        assert_eq!(decision.choice.real_model, "fast:7b");
        assert_eq!(decision.reason, Reason::LowestLatency);
        assert_eq!(decision.est_latency_s, 2.5);
        assert_eq!(decision.constraints, constraints());
    }

    #[test]
    fn test_equal_latency_picks_first_candidate() {
        let config = RouterConfig::from_yaml_str(
            r#"
endpoints:
  gpu0: http://127.0.0.1:11434
  gpu1: http://127.0.0.1:11435
hardware:
  gpu0: { est_tok_s: 30 }
  gpu1: { est_tok_s: 30 }
inventory:
  second-name: { endpoint: gpu1 }
  first-name: { endpoint: gpu0 }
"#,
        )
        .unwrap();
        let all: Vec<&InventoryEntry> = config.inventory().iter().collect();

        for _ in 0..20 {
            let decision = rank(&config, &all, &all, constraints());
            assert_eq!(decision.choice.model, "second-name");
        }

        let reversed: Vec<&InventoryEntry> = all.iter().rev().copied().collect();
        let decision = rank(&config, &reversed, &reversed, constraints());
        assert_eq!(decision.choice.model, "first-name");
    }

    const LADDER: &str = r#"
endpoints:
  gpu0: http://127.0.0.1:11434
  cpu: http://127.0.0.1:11436
hardware:
  cpu: { est_tok_s: 5 }
inventory:
  big:
    endpoint: gpu0
    params: { vram_req_gb: 40 }
  bigger:
    endpoint: gpu0
    params: { vram_req_gb: 80 }
policy:
  cpu_fallback_model: "tiny:latest"
"#;

    #[test]
    fn test_ladder_cpu_fallback() {
        let config = RouterConfig::from_yaml_str(LADDER).unwrap();
        let all: Vec<&InventoryEntry> = config.inventory().iter().collect();

        let decision = rank(&config, &all, &[], constraints());
        assert_eq!(decision.choice.endpoint, "cpu");
        assert_eq!(decision.choice.model, "tiny:latest");
        assert_eq!(decision.reason, Reason::CpuFallback);
        assert!(decision.reason.message().contains("fallback to CPU"));
        assert_eq!(decision.est_latency_s, 30.0);
    }

    #[test]
    fn test_ladder_first_available_when_cpu_disallowed() {
        let yaml = format!("{LADDER}  allow_cpu: false\n");
        let config = RouterConfig::from_yaml_str(&yaml).unwrap();
        let all: Vec<&InventoryEntry> = config.inventory().iter().collect();

        let decision = rank(&config, &all, &[], constraints());
        assert_eq!(decision.choice.model, "big");
        assert_eq!(decision.choice.endpoint, "gpu0");
        assert_eq!(decision.reason, Reason::FirstAvailable);
        assert_eq!(decision.est_latency_s, 15.0);
    }

    #[test]
    fn test_ladder_first_available_without_cpu_endpoint() {
        let config = RouterConfig::from_yaml_str(
            r#"
endpoints:
  gpu0: http://127.0.0.1:11434
inventory:
  big: { endpoint: gpu0, params: { vram_req_gb: 40 } }
"#,
        )
        .unwrap();
        let all: Vec<&InventoryEntry> = config.inventory().iter().collect();

        let decision = rank(&config, &all, &[], constraints());
        assert_eq!(decision.choice.endpoint, "gpu0");
        assert_eq!(decision.reason, Reason::FirstAvailable);
    }

    #[test]
    fn test_ladder_no_candidates_targets_cpu_even_if_unconfigured() {
        let config = RouterConfig::from_yaml_str(
            r#"
endpoints:
  gpu0: http://127.0.0.1:11434
"#,
        )
        .unwrap();

        let decision = rank(&config, &[], &[], constraints());
        assert_eq!(decision.choice.endpoint, "cpu");
        assert_eq!(decision.choice.model, "router:latest");
        assert_eq!(decision.reason, Reason::NoCandidates);
        assert!(!config.has_endpoint(&decision.choice.endpoint));
    }

    #[test]
    fn test_decision_json_shape() {
        let config = RouterConfig::from_yaml_str(LADDER).unwrap();
        let decision = rank(&config, &[], &[], constraints());
        let json = serde_json::to_value(&decision).unwrap();

        assert_eq!(json["decision"]["endpoint"], "cpu");
        assert_eq!(json["decision"]["model"], "tiny:latest");
        assert_eq!(json["reason"], "No GPU candidate fits; fallback to CPU.");
        assert_eq!(json["est_latency_s"], 30.0);
        assert_eq!(json["constraints"]["prompt_tokens"], 10);
        assert_eq!(json["constraints"]["ctx_margin"], 0.2);
    }
}
