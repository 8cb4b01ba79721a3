//! The shared state document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Counters kept by the `bz-stats` command, keyed by scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BzStats {
    #[serde(default)]
    pub scope_counts: BTreeMap<String, u64>,
}

impl BzStats {
    pub fn record_request(&mut self, scope: &str) -> u64 {
        let count = self.scope_counts.entry(scope.to_string()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    pub fn count_for(&self, scope: &str) -> u64 {
        self.scope_counts.get(scope).copied().unwrap_or(0)
    }
}

/// The single logical document persisted by the state store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BotState {
    #[serde(default)]
    pub bz_stats: Option<BzStats>,
}
