//! Session management for the bridge.
//!
//! Stable session keys per channel identity, the in-memory session registry
//! that owns get-or-create/remove, inbound message dedup, and the idle
//! reaper.

pub mod dedup;
pub mod reaper;
pub mod registry;
pub mod session_key;

pub use dedup::DedupCache;
pub use reaper::{ReapReport, ReaperHandle, SessionReaper};
pub use registry::{SessionHandle, SessionRegistry, SessionSummary, TurnGuard};
pub use session_key::{derive_session_key, SessionKeyDeriver};
