//! The decision engine: alias normalisation, candidate selection, constraint filtering and
//! latency ranking.
//!
//! Everything here is a pure function of the prompt, the optional alias hint and the
//! [`RouterConfig`](crate::inventory::RouterConfig) snapshot, so decisions for the same input are
//! always the same.
pub mod alias;
pub mod constraints;
pub mod ranker;
pub mod selector;

use crate::inventory::RouterConfig;
use tracing::debug;

pub use constraints::Constraints;
pub use ranker::{Choice, Decision, Reason};

/// Runs selection, filtering and ranking for one prompt. Always yields a decision.
pub fn evaluate(config: &RouterConfig, prompt: &str, hint: Option<&str>) -> Decision {
    let constraints = Constraints::for_prompt(prompt, config.policy().min_ctx_margin);
    let candidates = selector::select_candidates(config, prompt, hint);
    let fitting = constraints::filter(config, &candidates, &constraints);
    debug!(
        "{} candidates, {} fit (prompt tokens {}, margin {})",
        candidates.len(),
        fitting.len(),
        constraints.prompt_tokens,
        constraints.ctx_margin
    );
    ranker::rank(config, &candidates, &fitting, constraints)
}
