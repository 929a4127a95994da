//! Context-window and VRAM checks applied to candidates before ranking.
use crate::inventory::{HardwareProfile, InventoryEntry, RouterConfig};
use serde::Serialize;
use tracing::debug;

const CHARS_PER_TOKEN: usize = 4;

/// The inputs every decision is reached with, echoed back in the decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Constraints {
    pub prompt_tokens: u64,
    pub ctx_margin: f64,
}

impl Constraints {
    pub fn for_prompt(prompt: &str, ctx_margin: f64) -> Self {
        Self {
            prompt_tokens: estimate_tokens(prompt),
            ctx_margin,
        }
    }
}

/// Rough token count: one token per four characters, never less than one.
pub fn estimate_tokens(text: &str) -> u64 {
    (text.chars().count() / CHARS_PER_TOKEN).max(1) as u64
}

pub fn fits_context(prompt_tokens: u64, ctx_tokens: u64, margin: f64) -> bool {
    (prompt_tokens as f64) * (1.0 + margin) < ctx_tokens as f64
}

pub fn fits_vram(entry: &InventoryEntry, hardware: &HardwareProfile) -> bool {
    entry.vram_req_gb <= hardware.vram_gb
}

/// Drops candidates that don't fit, keeping the input order of the rest.
pub fn filter<'a>(
    config: &RouterConfig,
    candidates: &[&'a InventoryEntry],
    constraints: &Constraints,
) -> Vec<&'a InventoryEntry> {
    candidates
        .iter()
        .copied()
        .filter(|entry| {
            let ctx_ok = fits_context(
                constraints.prompt_tokens,
                entry.ctx_tokens,
                constraints.ctx_margin,
            );
            let vram_ok = fits_vram(entry, &config.hardware(&entry.endpoint));
            if !(ctx_ok && vram_ok) {
                debug!(
                    "Dropping {} on {} (context fits: {}, vram fits: {})",
                    entry.alias, entry.endpoint, ctx_ok, vram_ok
                );
            }
            ctx_ok && vram_ok
        })
        .collect()
}
