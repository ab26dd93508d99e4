//! A local agent core that echoes each message back word by word.
//!
//! Used by `session-bridge chat` so the bridge can be exercised end to end
//! without a model behind it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use sb_domain::agent::{AgentCore, ChunkSink, ContextRef, InboundMessage};
use sb_domain::error::{Error, Result};

#[derive(Default)]
struct EchoContext {
    turns: u64,
}

pub struct EchoAgent {
    contexts: Mutex<HashMap<ContextRef, Arc<tokio::sync::Mutex<EchoContext>>>>,
    chunk_delay: Duration,
}

impl EchoAgent {
    pub fn new(chunk_delay: Duration) -> Self {
        Self {
            contexts: Mutex::new(HashMap::new()),
            chunk_delay,
        }
    }

    pub fn context_count(&self) -> usize {
        self.contexts.lock().len()
    }
}

#[async_trait::async_trait]
impl AgentCore for EchoAgent {
    fn create_context(&self, session_key: &str) -> Result<ContextRef> {
        let context = ContextRef::new(uuid::Uuid::new_v4().to_string());
        self.contexts.lock().insert(context.clone(), Arc::default());
        tracing::debug!(session_key, context = %context, "echo context created");
        Ok(context)
    }

    fn remove_context(&self, session_key: &str, context: &ContextRef) -> Result<()> {
        match self.contexts.lock().remove(context) {
            Some(_) => Ok(()),
            None => Err(Error::Other(format!(
                "no echo context {context} for {session_key}"
            ))),
        }
    }

    async fn communicate(
        &self,
        context: &ContextRef,
        message: InboundMessage,
        on_chunk: Option<ChunkSink>,
    ) -> Result<String> {
        let state = self
            .contexts
            .lock()
            .get(context)
            .cloned()
            .ok_or_else(|| Error::Turn(format!("unknown context {context}")))?;

        // One turn at a time per context; a concurrent message waits its turn.
        let mut state = state.lock().await;
        state.turns += 1;
        let reply = format!("[{}] {}", state.turns, message.text.trim());

        if let Some(sink) = on_chunk {
            for piece in reply.split_inclusive(' ') {
                sink(piece.to_string());
                if !self.chunk_delay.is_zero() {
                    tokio::time::sleep(self.chunk_delay).await;
                }
            }
        }
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn counts_turns_per_context() {
        let agent = EchoAgent::new(Duration::ZERO);
        let a = agent.create_context("cli:a").unwrap();
        let b = agent.create_context("cli:b").unwrap();

        agent.communicate(&a, InboundMessage::new("one"), None).await.unwrap();
        let second = agent.communicate(&a, InboundMessage::new("two"), None).await.unwrap();
        let other = agent.communicate(&b, InboundMessage::new("hi"), None).await.unwrap();

        assert_eq!(second, "[2] two");
        assert_eq!(other, "[1] hi");
    }

    #[tokio::test]
    async fn chunks_concatenate_to_reply() {
        let agent = EchoAgent::new(Duration::ZERO);
        let ctx = agent.create_context("cli:a").unwrap();
        let pieces = Arc::new(Mutex::new(Vec::new()));
        let sink_pieces = pieces.clone();
        let sink: ChunkSink = Arc::new(move |text| sink_pieces.lock().push(text));

        let reply = agent
            .communicate(&ctx, InboundMessage::new("hello big world"), Some(sink))
            .await
            .unwrap();

        assert_eq!(pieces.lock().concat(), reply);
        assert_eq!(pieces.lock().len(), 4);
    }

    #[tokio::test]
    async fn removed_context_rejects_turns() {
        let agent = EchoAgent::new(Duration::ZERO);
        let ctx = agent.create_context("cli:a").unwrap();
        agent.remove_context("cli:a", &ctx).unwrap();
        assert_eq!(agent.context_count(), 0);
        assert!(agent.remove_context("cli:a", &ctx).is_err());
        assert!(agent
            .communicate(&ctx, InboundMessage::new("x"), None)
            .await
            .is_err());
    }
}
