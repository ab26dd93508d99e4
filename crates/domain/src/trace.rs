use serde::Serialize;

/// Structured trace events emitted across all session-bridge crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    SessionCreated {
        session_key: String,
        context: String,
        channel: String,
    },
    SessionRemoved {
        session_key: String,
        reason: String,
    },
    DuplicateSuppressed {
        channel: String,
        message_id: String,
    },
    TurnStarted {
        session_key: String,
        streaming: bool,
    },
    TurnFinished {
        session_key: String,
        streaming: bool,
        outcome: String,
        chunks: usize,
        duration_ms: u64,
    },
    ReaperSweep {
        scanned: usize,
        evicted: usize,
        failed: usize,
        skipped_busy: usize,
    },
    CrossLoopTimeout {
        operation: String,
        timeout_ms: u64,
    },
    ForeignLoopStopped {
        name: String,
        clean: bool,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "sb_event");
    }
}
