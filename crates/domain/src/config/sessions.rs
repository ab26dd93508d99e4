use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions & key routing
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Session routing configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SessionsConfig {
    /// Extra or overriding channel → key prefix entries, merged over the
    /// built-in table (keys: `"matrix"`, `"mattermost"`, …).
    #[serde(default)]
    pub channel_prefixes: HashMap<String, String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound dedup
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bounds for the inbound message-id dedup cache.  Whichever limit is hit
/// first evicts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DedupConfig {
    /// How long a message id is remembered.
    #[serde(default = "d_300")]
    pub ttl_secs: u64,
    /// Maximum remembered ids across all channels.
    #[serde(default = "d_10000")]
    pub max_entries: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 300,
            max_entries: 10_000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Idle reaper
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaperConfig {
    #[serde(default = "d_true")]
    pub enabled: bool,
    /// Seconds between sweeps.
    #[serde(default = "d_60")]
    pub interval_secs: u64,
    /// Sessions idle longer than this are evicted.
    #[serde(default = "d_3600")]
    pub max_idle_secs: u64,
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 60,
            max_idle_secs: 3_600,
        }
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_300() -> u64 {
    300
}
fn d_10000() -> usize {
    10_000
}
fn d_true() -> bool {
    true
}
fn d_60() -> u64 {
    60
}
fn d_3600() -> u64 {
    3_600
}

/// Channel name (and key prefix) reserved for the web UI's own session ids.
pub const WEB_UI_CHANNEL: &str = "web";

impl SessionsConfig {
    /// A configured prefix is usable when it is non-empty and made of ASCII
    /// alphanumerics, `-` or `_`.  `:` separates the prefix from the user id
    /// and `~` is reserved for prefixes derived from unknown channel names.
    pub fn is_valid_prefix(prefix: &str) -> bool {
        !prefix.is_empty()
            && prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
    }
}
