//! Model alias canonicalisation.
//!
//! Clients refer to models the way backend tooling prints them (`Gar-Chat:latest`), while the
//! inventory is keyed by bare lowercase aliases (`gar-chat`).
const LATEST_SUFFIX: &str = ":latest";

/// Lowercases `name` and strips a trailing `:latest`. Missing or empty names have no canonical
/// form.
pub fn normalize(name: Option<&str>) -> Option<String> {
    let name = name.filter(|n| !n.is_empty())?;
    let lowered = name.to_lowercase();
    match lowered.strip_suffix(LATEST_SUFFIX) {
        Some(stripped) => Some(stripped.to_string()),
        None => Some(lowered),
    }
}
