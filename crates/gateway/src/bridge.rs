//! The adapter-facing session bridge.
//!
//! Transports call into [`SessionBridge`] (from the owner runtime) or
//! [`BridgeClient`] (from a [`ForeignLoop`](crate::runtime::ForeignLoop)).
//! Agent turns always run on the owner runtime.

use std::sync::Arc;
use std::time::Duration;

use sb_domain::agent::{AgentCore, InboundMessage};
use sb_domain::error::Result;
use sb_sessions::{DedupCache, SessionHandle, SessionRegistry, SessionSummary};

use crate::runtime::relay::{self, TurnContext};
use crate::runtime::{CrossLoopExecutor, TurnStream};

pub struct SessionBridge {
    core: Arc<dyn AgentCore>,
    registry: Arc<SessionRegistry>,
    dedup: DedupCache,
    executor: CrossLoopExecutor,
    dispatch_timeout: Duration,
}

impl SessionBridge {
    pub fn new(
        core: Arc<dyn AgentCore>,
        registry: Arc<SessionRegistry>,
        dedup: DedupCache,
        executor: CrossLoopExecutor,
        dispatch_timeout: Duration,
    ) -> Self {
        Self {
            core,
            registry,
            dedup,
            executor,
            dispatch_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn executor(&self) -> &CrossLoopExecutor {
        &self.executor
    }

    /// Return the session for this identity, creating it (and its agent-core
    /// context) on first contact.
    pub fn get_or_create_session(
        &self,
        channel: &str,
        external_user_id: &str,
        external_chat_id: &str,
        display_name: Option<&str>,
    ) -> Result<Arc<SessionHandle>> {
        self.registry
            .get_or_create(channel, external_user_id, external_chat_id, display_name)
    }

    fn turn_context(&self, session: &Arc<SessionHandle>) -> TurnContext {
        TurnContext {
            core: self.core.clone(),
            registry: self.registry.clone(),
            session: session.clone(),
        }
    }

    /// Run one turn on the owner runtime and return the final reply.
    ///
    /// Fails with `CrossLoopTimeout` if the turn exceeds the dispatch
    /// timeout; the turn is stopped in that case.
    pub async fn dispatch(
        &self,
        session: &Arc<SessionHandle>,
        message: InboundMessage,
    ) -> Result<String> {
        let ctx = self.turn_context(session);
        let turn = session.begin_turn();
        self.executor
            .call(
                "dispatch",
                relay::run_turn(ctx, message, turn),
                self.dispatch_timeout,
            )
            .await?
    }

    /// Run one turn on the owner runtime and stream its output.
    ///
    /// A turn that exceeds the dispatch timeout is stopped and the stream
    /// ends with a `TimedOut` error.
    pub fn dispatch_streaming(
        &self,
        session: &Arc<SessionHandle>,
        message: InboundMessage,
    ) -> TurnStream {
        relay::spawn_turn(
            self.executor.owner(),
            self.turn_context(session),
            message,
            self.dispatch_timeout,
        )
    }

    /// Remove the session for this identity.  Returns `false` if there was
    /// none.
    pub fn remove_session(&self, channel: &str, external_user_id: &str) -> Result<bool> {
        self.registry.remove(channel, external_user_id)
    }

    /// Snapshot of the live sessions.
    pub fn list_sessions(&self) -> Vec<Arc<SessionHandle>> {
        self.registry.list()
    }

    pub fn session_summaries(&self) -> Vec<SessionSummary> {
        self.registry.list().iter().map(|s| s.summary()).collect()
    }

    /// `true` if this message was already seen recently on `channel`.
    pub fn is_duplicate(&self, message_id: &str, channel: &str) -> bool {
        self.dedup.is_duplicate(message_id, channel)
    }
}

/// Bridge access for transports running on a foreign loop.
///
/// Session creation and removal call into the agent core, so they are
/// routed to the owner runtime and bounded by the executor's default
/// timeout.  Everything else delegates to [`SessionBridge`].
#[derive(Clone)]
pub struct BridgeClient {
    bridge: Arc<SessionBridge>,
    call_timeout: Duration,
}

impl BridgeClient {
    pub fn new(bridge: Arc<SessionBridge>) -> Self {
        let call_timeout = bridge.executor.default_timeout();
        Self {
            bridge,
            call_timeout,
        }
    }

    pub async fn get_or_create_session(
        &self,
        channel: &str,
        external_user_id: &str,
        external_chat_id: &str,
        display_name: Option<&str>,
    ) -> Result<Arc<SessionHandle>> {
        let bridge = self.bridge.clone();
        let channel = channel.to_owned();
        let user = external_user_id.to_owned();
        let chat = external_chat_id.to_owned();
        let display_name = display_name.map(str::to_owned);
        self.bridge
            .executor
            .call(
                "get_or_create_session",
                async move {
                    bridge.get_or_create_session(&channel, &user, &chat, display_name.as_deref())
                },
                self.call_timeout,
            )
            .await?
    }

    pub async fn dispatch(
        &self,
        session: &Arc<SessionHandle>,
        message: InboundMessage,
    ) -> Result<String> {
        self.bridge.dispatch(session, message).await
    }

    pub fn dispatch_streaming(
        &self,
        session: &Arc<SessionHandle>,
        message: InboundMessage,
    ) -> TurnStream {
        self.bridge.dispatch_streaming(session, message)
    }

    pub async fn remove_session(&self, channel: &str, external_user_id: &str) -> Result<bool> {
        let bridge = self.bridge.clone();
        let channel = channel.to_owned();
        let user = external_user_id.to_owned();
        self.bridge
            .executor
            .call(
                "remove_session",
                async move { bridge.remove_session(&channel, &user) },
                self.call_timeout,
            )
            .await?
    }

    pub fn session_summaries(&self) -> Vec<SessionSummary> {
        self.bridge.session_summaries()
    }

    pub fn is_duplicate(&self, message_id: &str, channel: &str) -> bool {
        self.bridge.is_duplicate(message_id, channel)
    }
}
