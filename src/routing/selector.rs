//! Candidate selection: which inventory entries are eligible for ranking, and the coarser
//! keyword heuristic that picks an endpoint directly.
use super::alias;
use crate::inventory::{InventoryEntry, KeywordGroup, RouterConfig};
use tracing::debug;

/// Returns the inventory entries eligible for ranking, in inventory order.
///
/// A hint that normalises to a known alias always wins and yields exactly that entry. Otherwise
/// the prompt is scanned for the policy's keyword groups; if any trigger, entries sharing at least
/// one of the triggered strengths are kept. When nothing triggers, or nothing matches, every entry
/// is a candidate.
pub fn select_candidates<'a>(
    config: &'a RouterConfig,
    prompt: &str,
    hint: Option<&str>,
) -> Vec<&'a InventoryEntry> {
    if let Some(alias) = alias::normalize(hint)
        && let Some(entry) = config.inventory_entry(&alias)
    {
        debug!("Hint {} resolved to inventory entry {}", alias, entry.alias);
        return vec![entry];
    }

    let all: Vec<&InventoryEntry> = config.inventory().iter().collect();
    let preferred = triggered_strengths(&config.policy().prefer, prompt);
    if preferred.is_empty() {
        return all;
    }

    let matching: Vec<&InventoryEntry> = all
        .iter()
        .copied()
        .filter(|entry| entry.has_any_strength(&preferred))
        .collect();
    debug!(
        "Prompt prefers strengths {:?}: {} of {} entries match",
        preferred,
        matching.len(),
        all.len()
    );

    if matching.is_empty() { all } else { matching }
}

/// Strength tags whose keyword group occurs in the prompt (case-insensitive).
pub fn triggered_strengths<'a>(groups: &'a [KeywordGroup], prompt: &str) -> Vec<&'a str> {
    let prompt = prompt.to_lowercase();
    groups
        .iter()
        .filter(|group| group.keywords.iter().any(|kw| prompt.contains(kw.as_str())))
        .map(|group| group.strength.as_str())
        .collect()
}

/// Picks an endpoint by counting, per endpoint, how many of its keywords occur in the prompt.
///
/// A single endpoint with the highest non-zero score wins. No hits at all, or a shared top
/// score, resolves to the configured default endpoint.
pub fn pick_by_keywords<'a>(config: &'a RouterConfig, prompt: &str) -> &'a str {
    let prompt = prompt.to_lowercase();
    let default = config.server().default_endpoint.as_str();

    let mut best: Option<(&str, usize)> = None;
    let mut tied = false;
    for (endpoint, keywords) in config.keywords() {
        let score = keywords
            .iter()
            .filter(|kw| prompt.contains(kw.as_str()))
            .count();
        match best {
            Some((_, top)) if score == top => tied = true,
            Some((_, top)) if score < top => {}
            _ => {
                best = Some((endpoint.as_str(), score));
                tied = false;
            }
        }
    }

    match best {
        Some((endpoint, score)) if score > 0 && !tied => endpoint,
        _ => default,
    }
}

/// Endpoint for the heuristic path: an alias listed in `model_map` goes where it says, anything
/// else is decided by [`pick_by_keywords`].
pub fn resolve_target<'a>(config: &'a RouterConfig, model: Option<&str>, prompt: &str) -> &'a str {
    if let Some(alias) = alias::normalize(model)
        && let Some(endpoint) = config.model_map_target(&alias)
    {
        return endpoint;
    }
    pick_by_keywords(config, prompt)
}
