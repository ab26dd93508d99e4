//! Inbound message dedup.
//!
//! Transports redeliver (webhook retries, reconnect replays).  The cache
//! remembers `channel + message_id` pairs in insertion order and forgets
//! them after a TTL or once the cache is over capacity, whichever comes
//! first.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sb_domain::config::DedupConfig;
use sb_domain::trace::TraceEvent;

struct Inner {
    order: VecDeque<(String, Instant)>,
    seen: HashSet<String>,
}

pub struct DedupCache {
    ttl: Duration,
    max_entries: usize,
    inner: Mutex<Inner>,
}

impl DedupCache {
    pub fn new(ttl: Duration, max_entries: usize) -> Self {
        Self {
            ttl,
            max_entries: max_entries.max(1),
            inner: Mutex::new(Inner {
                order: VecDeque::new(),
                seen: HashSet::new(),
            }),
        }
    }

    pub fn from_config(config: &DedupConfig) -> Self {
        Self::new(Duration::from_secs(config.ttl_secs), config.max_entries)
    }

    /// Returns `true` if this message was already seen within the TTL.
    /// A `false` return records the id.
    pub fn is_duplicate(&self, message_id: &str, channel: &str) -> bool {
        self.check_at(message_id, channel, Instant::now())
    }

    pub(crate) fn check_at(&self, message_id: &str, channel: &str, now: Instant) -> bool {
        let compound = format!("{channel}\u{1f}{message_id}");
        let mut inner = self.inner.lock();

        while let Some((_, inserted_at)) = inner.order.front() {
            if now.saturating_duration_since(*inserted_at) < self.ttl {
                break;
            }
            if let Some((expired, _)) = inner.order.pop_front() {
                inner.seen.remove(&expired);
            }
        }

        if inner.seen.contains(&compound) {
            drop(inner);
            tracing::debug!(channel = %channel, message_id = %message_id, "duplicate message suppressed");
            TraceEvent::DuplicateSuppressed {
                channel: channel.to_owned(),
                message_id: message_id.to_owned(),
            }
            .emit();
            return true;
        }

        inner.seen.insert(compound.clone());
        inner.order.push_back((compound, now));
        while inner.order.len() > self.max_entries {
            if let Some((oldest, _)) = inner.order.pop_front() {
                inner.seen.remove(&oldest);
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.inner.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().order.is_empty()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.order.clear();
        inner.seen.clear();
    }
}
