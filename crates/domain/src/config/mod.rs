mod observability;
mod runtime;
mod sessions;

pub use observability::*;
pub use runtime::*;
pub use sessions::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub reaper: ReaperConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    #[serde(default)]
    pub cross_loop: CrossLoopConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let mut push = |severity, field: String, message: &str| {
            errors.push(ConfigError {
                severity,
                field,
                message: message.into(),
            })
        };

        for (channel, prefix) in &self.sessions.channel_prefixes {
            let field = format!("sessions.channel_prefixes.{channel}");
            if !SessionsConfig::is_valid_prefix(prefix) {
                push(
                    ConfigSeverity::Error,
                    field,
                    "prefix must be non-empty and use only [A-Za-z0-9_-]",
                );
            } else if prefix == WEB_UI_CHANNEL && channel != WEB_UI_CHANNEL {
                push(
                    ConfigSeverity::Error,
                    field,
                    "prefix \"web\" is reserved for the web UI",
                );
            }
        }

        if self.dedup.ttl_secs == 0 {
            push(
                ConfigSeverity::Warning,
                "dedup.ttl_secs".into(),
                "ttl of 0 disables duplicate suppression",
            );
        }
        if self.dedup.max_entries == 0 {
            push(
                ConfigSeverity::Error,
                "dedup.max_entries".into(),
                "max_entries must be greater than 0",
            );
        }

        if self.reaper.enabled {
            if self.reaper.interval_secs == 0 {
                push(
                    ConfigSeverity::Error,
                    "reaper.interval_secs".into(),
                    "interval must be greater than 0",
                );
            }
            if self.reaper.max_idle_secs < self.reaper.interval_secs {
                push(
                    ConfigSeverity::Warning,
                    "reaper.max_idle_secs".into(),
                    "max_idle is shorter than the sweep interval; eviction will lag",
                );
            }
        }

        if self.relay.dispatch_timeout_secs == 0 {
            push(
                ConfigSeverity::Error,
                "relay.dispatch_timeout_secs".into(),
                "dispatch timeout must be greater than 0",
            );
        }

        if self.cross_loop.call_timeout_ms == 0 {
            push(
                ConfigSeverity::Error,
                "cross_loop.call_timeout_ms".into(),
                "call timeout must be greater than 0",
            );
        }
        if self.cross_loop.shutdown_grace_ms >= self.cross_loop.shutdown_timeout_ms {
            push(
                ConfigSeverity::Warning,
                "cross_loop.shutdown_grace_ms".into(),
                "grace period is not shorter than the shutdown timeout; \
                 shutdown may report a timeout while tasks are still draining",
            );
        }

        errors
    }
}
