//! The agent-core contract consumed by the bridge.
//!
//! The agent core owns all conversational state.  The bridge only ever holds
//! an opaque [`ContextRef`] per session and defers every mutation to the
//! methods below.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque reference to agent-core-owned conversation state.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContextRef(String);

impl ContextRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl fmt::Display for ContextRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message received by a transport, normalized for the agent core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub text: String,
    /// Transport-native message id, when the transport provides one.
    #[serde(default)]
    pub message_id: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            message_id: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }
}

/// Per-turn chunk callback.  The agent core calls it once per text chunk,
/// from whatever thread the turn runs on.
pub type ChunkSink = Arc<dyn Fn(String) + Send + Sync>;

/// The agent core: executes one conversational turn per context.
///
/// `create_context` and `remove_context` are called while the session
/// registry holds its lock, so they must return promptly and must not block
/// on I/O.
#[async_trait::async_trait]
pub trait AgentCore: Send + Sync + 'static {
    /// Create the underlying conversation state for a session key.
    fn create_context(&self, session_key: &str) -> Result<ContextRef>;

    /// Tear down the conversation state behind `context`.
    fn remove_context(&self, session_key: &str, context: &ContextRef) -> Result<()>;

    /// Run (or join) the turn for `context` and return the final text.
    ///
    /// At most one turn is in flight per context.  A message arriving while
    /// a turn is running is handled by the core (as an intervention or a
    /// follow-up); the bridge never queues it.
    async fn communicate(
        &self,
        context: &ContextRef,
        message: InboundMessage,
        on_chunk: Option<ChunkSink>,
    ) -> Result<String>;
}
