//! Process-wide event counters. Recording is compiled in only with the `profiler` feature.

#[cfg(feature = "profiler")]
use std::collections::HashMap;
#[cfg(feature = "profiler")]
use std::sync::Mutex;

#[cfg(feature = "profiler")]
use once_cell::sync::Lazy;

pub const BINARY_HIT: &str = "kselect_cache.binary_hit";
pub const BINARY_MISS: &str = "kselect_cache.binary_miss";
pub const SELECTOR_CANDIDATE: &str = "kselect.selector.candidate";
pub const SELECTOR_NO_ELIGIBLE: &str = "kselect.selector.no_eligible";

#[cfg(feature = "profiler")]
static COUNTERS: Lazy<Mutex<HashMap<&'static str, u64>>> = Lazy::new(|| Mutex::new(HashMap::new()));

pub fn cache_event(name: &'static str) {
    #[cfg(feature = "profiler")]
    {
        let mut counters = COUNTERS.lock().expect("profiler mutex poisoned");
        let entry = counters.entry(name).or_insert(0);
        *entry = entry.saturating_add(1);
    }
    #[cfg(not(feature = "profiler"))]
    {
        let _ = name;
    }
}

/// Counters sorted by event name. Always empty without the `profiler` feature.
pub fn snapshot() -> Vec<(&'static str, u64)> {
    #[cfg(feature = "profiler")]
    {
        let counters = COUNTERS.lock().expect("profiler mutex poisoned");
        let mut rows: Vec<(&'static str, u64)> = counters
            .iter()
            .map(|(name, count)| (*name, *count))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(b.0));
        rows
    }
    #[cfg(not(feature = "profiler"))]
    {
        Vec::new()
    }
}

pub fn count(name: &str) -> u64 {
    snapshot()
        .into_iter()
        .find(|(event, _)| *event == name)
        .map(|(_, count)| count)
        .unwrap_or(0)
}

pub fn reset() {
    #[cfg(feature = "profiler")]
    {
        COUNTERS.lock().expect("profiler mutex poisoned").clear();
    }
}
