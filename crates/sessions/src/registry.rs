//! In-memory session registry.
//!
//! Maps a session key to the [`SessionHandle`] for one external identity.
//! Every read and read-modify-write happens under a single `parking_lot`
//! mutex whose critical sections never await, so the lock can be taken from
//! any thread or runtime.  Get-or-create holds the lock across the
//! check-then-create sequence: at most one agent-core context is ever
//! created per key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use sb_domain::agent::{AgentCore, ContextRef};
use sb_domain::error::{Error, Result};
use sb_domain::trace::TraceEvent;

use crate::session_key::SessionKeyDeriver;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session handle
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The bridge's record of one external identity's conversation.
///
/// Handles are shared: every caller asking for the same key gets the same
/// `Arc`.  `context` points at agent-core-owned state and is never mutated
/// by the bridge.
#[derive(Debug)]
pub struct SessionHandle {
    pub key: String,
    pub context: ContextRef,
    pub channel: String,
    pub external_user_id: String,
    pub external_chat_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Unix millis; only ever moves forward.
    last_activity_ms: AtomicI64,
    in_flight: AtomicUsize,
}

impl SessionHandle {
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        let ms = self.last_activity_ms.load(Ordering::Acquire);
        Utc.timestamp_millis_opt(ms)
            .single()
            .unwrap_or(self.created_at)
    }

    /// Number of turns currently running against this session.
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::Acquire)
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight() > 0
    }

    /// Mark a turn as running until the returned guard is dropped.
    pub fn begin_turn(self: &Arc<Self>) -> TurnGuard {
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        TurnGuard {
            handle: Arc::clone(self),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            key: self.key.clone(),
            context: self.context.to_string(),
            channel: self.channel.clone(),
            external_user_id: self.external_user_id.clone(),
            external_chat_id: self.external_chat_id.clone(),
            display_name: self.display_name.clone(),
            created_at: self.created_at,
            last_activity_at: self.last_activity_at(),
            in_flight: self.in_flight(),
        }
    }

    fn touch_at(&self, now: DateTime<Utc>) {
        self.last_activity_ms
            .fetch_max(now.timestamp_millis(), Ordering::AcqRel);
    }
}

/// RAII marker for a running turn; see [`SessionHandle::begin_turn`].
#[derive(Debug)]
pub struct TurnGuard {
    handle: Arc<SessionHandle>,
}

impl Drop for TurnGuard {
    fn drop(&mut self) {
        self.handle.in_flight.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Serializable point-in-time view of a session, for status dumps.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSummary {
    pub key: String,
    pub context: String,
    pub channel: String,
    pub external_user_id: String,
    pub external_chat_id: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    pub in_flight: usize,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Registry
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct SessionRegistry {
    core: Arc<dyn AgentCore>,
    keys: SessionKeyDeriver,
    sessions: Mutex<HashMap<String, Arc<SessionHandle>>>,
}

impl SessionRegistry {
    pub fn new(core: Arc<dyn AgentCore>, keys: SessionKeyDeriver) -> Self {
        Self {
            core,
            keys,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The key an identity on `channel` maps to.
    pub fn key_for(&self, channel: &str, external_user_id: &str) -> String {
        self.keys.derive(channel, external_user_id)
    }

    /// Return the session for an identity, creating its agent-core context
    /// on first use.
    ///
    /// An existing handle has its activity timestamp refreshed.  If context
    /// creation fails nothing is stored and the error is returned.
    pub fn get_or_create(
        &self,
        channel: &str,
        external_user_id: &str,
        external_chat_id: &str,
        display_name: Option<&str>,
    ) -> Result<Arc<SessionHandle>> {
        let key = self.key_for(channel, external_user_id);
        let now = Utc::now();

        let mut sessions = self.sessions.lock();
        if let Some(handle) = sessions.get(&key) {
            handle.touch_at(now);
            return Ok(Arc::clone(handle));
        }

        let context = self
            .core
            .create_context(&key)
            .map_err(|e| match e {
                Error::SessionCreation { .. } => e,
                other => Error::SessionCreation {
                    key: key.clone(),
                    message: other.to_string(),
                },
            })?;

        let handle = Arc::new(SessionHandle {
            key: key.clone(),
            context,
            channel: channel.to_owned(),
            external_user_id: external_user_id.to_owned(),
            external_chat_id: external_chat_id.to_owned(),
            display_name: display_name.map(str::to_owned),
            created_at: now,
            last_activity_ms: AtomicI64::new(now.timestamp_millis()),
            in_flight: AtomicUsize::new(0),
        });
        sessions.insert(key.clone(), Arc::clone(&handle));
        drop(sessions);

        tracing::info!(
            session_key = %key,
            context = %handle.context,
            channel = %channel,
            "session created"
        );
        TraceEvent::SessionCreated {
            session_key: key,
            context: handle.context.to_string(),
            channel: channel.to_owned(),
        }
        .emit();

        Ok(handle)
    }

    pub fn get(&self, channel: &str, external_user_id: &str) -> Option<Arc<SessionHandle>> {
        self.get_by_key(&self.key_for(channel, external_user_id))
    }

    pub fn get_by_key(&self, key: &str) -> Option<Arc<SessionHandle>> {
        self.sessions.lock().get(key).cloned()
    }

    /// Refresh a session's activity timestamp.  Returns false when the key
    /// is not registered (e.g. it was reaped mid-turn).
    pub fn touch(&self, key: &str) -> bool {
        self.touch_at(key, Utc::now())
    }

    pub fn touch_at(&self, key: &str, now: DateTime<Utc>) -> bool {
        match self.sessions.lock().get(key) {
            Some(handle) => {
                handle.touch_at(now);
                true
            }
            None => false,
        }
    }

    /// Refresh `handle` only while it is still the live entry for its key.
    ///
    /// A turn finishing after its session was removed and re-created must
    /// not count as activity on the new session.
    pub fn touch_handle(&self, handle: &Arc<SessionHandle>) -> bool {
        match self.sessions.lock().get(&handle.key) {
            Some(live) if Arc::ptr_eq(live, handle) => {
                handle.touch_at(Utc::now());
                true
            }
            _ => false,
        }
    }

    /// Remove an identity's session and tear down its context.  Returns
    /// whether a session existed.
    pub fn remove(&self, channel: &str, external_user_id: &str) -> Result<bool> {
        self.remove_key(&self.key_for(channel, external_user_id), "removed")
    }

    /// Remove a session by key.
    ///
    /// The teardown request runs inside the critical section so a racing
    /// `get_or_create` for the same key cannot create a context that the
    /// teardown would then destroy.  On teardown failure the entry is still
    /// gone and [`Error::ContextTeardown`] is returned.
    pub fn remove_key(&self, key: &str, reason: &str) -> Result<bool> {
        self.remove_key_if(key, reason, |_| true)
    }

    /// Remove a session only if `should_remove` accepts the live handle.  The
    /// check and the removal happen in one critical section, so a session
    /// touched after the caller's snapshot is seen with its fresh state.
    pub fn remove_key_if(
        &self,
        key: &str,
        reason: &str,
        should_remove: impl FnOnce(&SessionHandle) -> bool,
    ) -> Result<bool> {
        let teardown = {
            let mut sessions = self.sessions.lock();
            if !sessions.get(key).is_some_and(|h| should_remove(h)) {
                return Ok(false);
            }
            let Some(handle) = sessions.remove(key) else {
                return Ok(false);
            };
            self.core.remove_context(key, &handle.context)
        };

        tracing::info!(session_key = %key, reason = %reason, "session removed");
        TraceEvent::SessionRemoved {
            session_key: key.to_owned(),
            reason: reason.to_owned(),
        }
        .emit();

        teardown.map_err(|e| Error::ContextTeardown {
            key: key.to_owned(),
            message: e.to_string(),
        })?;
        Ok(true)
    }

    /// Snapshot of all handles.  The live map is never exposed.
    pub fn list(&self) -> Vec<Arc<SessionHandle>> {
        self.sessions.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
