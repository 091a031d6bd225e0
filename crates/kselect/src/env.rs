use std::env;
use std::sync::OnceLock;

pub const CACHE_FILE_VAR: &str = "KSELECT_CACHE_FILE";
pub const FORCE_KERNELS_VAR: &str = "KSELECT_FORCE_KERNELS";
pub const DENY_KERNELS_VAR: &str = "KSELECT_DENY_KERNELS";
pub const MEANINGFUL_NAMES_VAR: &str = "KSELECT_MEANINGFUL_NAMES";
pub const PARALLEL_VALIDATE_VAR: &str = "KSELECT_PARALLEL_VALIDATE";
pub const TUNING_FILE_VAR: &str = "KSELECT_TUNING_FILE";
pub const COMPILER_VAR: &str = "KSELECT_COMPILER";

static KSELECT_MEANINGFUL_NAMES: OnceLock<bool> = OnceLock::new();

pub fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

/// Trimmed, non-empty value of `name`.
pub fn var(name: &str) -> Option<String> {
    match env::var(name) {
        Ok(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        _ => None,
    }
}

pub fn flag(name: &str) -> bool {
    var(name).map(|value| parse_bool(&value)).unwrap_or(false)
}

/// Comma separated names; blanks are dropped.
pub fn parse_name_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

pub fn name_list(name: &str) -> Vec<String> {
    var(name)
        .map(|value| parse_name_list(&value))
        .unwrap_or_default()
}

pub(crate) fn meaningful_names_default() -> bool {
    *KSELECT_MEANINGFUL_NAMES
        .get_or_init(|| flag(MEANINGFUL_NAMES_VAR))
}
