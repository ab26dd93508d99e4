use serde::{Deserialize, Serialize};
use std::time::Duration;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Stream relay
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Upper bound for a non-streaming `dispatch`.  The turn is stopped when
    /// it expires.
    #[serde(default = "d_300")]
    pub dispatch_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            dispatch_timeout_secs: 300,
        }
    }
}

impl RelayConfig {
    pub fn dispatch_timeout(&self) -> Duration {
        Duration::from_secs(self.dispatch_timeout_secs)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cross-loop execution
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrossLoopConfig {
    /// Default timeout for a call from a foreign loop onto the owner loop.
    #[serde(default = "d_30000")]
    pub call_timeout_ms: u64,
    /// How long `ForeignLoop::shutdown` waits for the thread to exit.
    #[serde(default = "d_5000")]
    pub shutdown_timeout_ms: u64,
    /// Grace period given to tasks on a closing foreign loop before they
    /// are dropped.
    #[serde(default = "d_1000")]
    pub shutdown_grace_ms: u64,
}

impl Default for CrossLoopConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 30_000,
            shutdown_timeout_ms: 5_000,
            shutdown_grace_ms: 1_000,
        }
    }
}

impl CrossLoopConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

fn d_300() -> u64 {
    300
}
fn d_30000() -> u64 {
    30_000
}
fn d_5000() -> u64 {
    5_000
}
fn d_1000() -> u64 {
    1_000
}
