#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sb_domain::agent::{AgentCore, ChunkSink, ContextRef, InboundMessage};
use sb_domain::error::{Error, Result};
use sb_gateway::runtime::CrossLoopExecutor;
use sb_gateway::SessionBridge;
use sb_sessions::{DedupCache, SessionKeyDeriver, SessionRegistry};

// ── Scripted agent core ─────────────────────────────────────────────────
//
// The reply depends on the message text:
//   "Hello World"       chunks "Hello ", "World"; returns "Hello World"
//   "fail"              chunk "partial "; returns an error
//   "hang"              chunk "first "; never completes
//   "slow"              sleeps 150ms; returns "slow done"
//   anything else       returns the text unchanged, no chunks

#[derive(Default)]
pub struct ScriptedCore {
    pub created: AtomicUsize,
    pub removed: AtomicUsize,
    /// `communicate` calls currently running (not yet returned or dropped).
    pub active: Arc<AtomicUsize>,
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter.clone())
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl AgentCore for ScriptedCore {
    fn create_context(&self, session_key: &str) -> Result<ContextRef> {
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        Ok(ContextRef::new(format!("{session_key}#{n}")))
    }

    fn remove_context(&self, _session_key: &str, _context: &ContextRef) -> Result<()> {
        self.removed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn communicate(
        &self,
        _context: &ContextRef,
        message: InboundMessage,
        on_chunk: Option<ChunkSink>,
    ) -> Result<String> {
        let _active = ActiveGuard::enter(&self.active);
        let emit = |text: &str| {
            if let Some(sink) = &on_chunk {
                sink(text.to_string());
            }
        };

        match message.text.as_str() {
            "Hello World" => {
                emit("Hello ");
                emit("World");
                Ok("Hello World".into())
            }
            "fail" => {
                emit("partial ");
                Err(Error::Turn("model unavailable".into()))
            }
            "hang" => {
                emit("first ");
                std::future::pending::<()>().await;
                unreachable!()
            }
            "slow" => {
                tokio::time::sleep(Duration::from_millis(150)).await;
                Ok("slow done".into())
            }
            other => Ok(other.to_string()),
        }
    }
}

/// Build a bridge bound to the current runtime.
pub fn bridge(core: Arc<ScriptedCore>, dispatch_timeout: Duration) -> Arc<SessionBridge> {
    bridge_with_timeouts(core, dispatch_timeout, Duration::from_secs(5))
}

/// Like [`bridge`], with an explicit timeout for calls routed from foreign
/// loops.
pub fn bridge_with_timeouts(
    core: Arc<ScriptedCore>,
    dispatch_timeout: Duration,
    call_timeout: Duration,
) -> Arc<SessionBridge> {
    let executor = CrossLoopExecutor::current(call_timeout).unwrap();
    bridge_on(core, executor, dispatch_timeout)
}

/// Build a bridge whose turns run wherever `executor` points.
pub fn bridge_on(
    core: Arc<ScriptedCore>,
    executor: CrossLoopExecutor,
    dispatch_timeout: Duration,
) -> Arc<SessionBridge> {
    let registry = Arc::new(SessionRegistry::new(
        core.clone(),
        SessionKeyDeriver::default(),
    ));
    Arc::new(SessionBridge::new(
        core,
        registry,
        DedupCache::new(Duration::from_secs(60), 1_000),
        executor,
        dispatch_timeout,
    ))
}

/// Poll `cond` every 5ms for up to one second.
pub async fn eventually(mut cond: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if cond() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    cond()
}
