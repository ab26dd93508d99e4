//! Bridge construction and background-task spawning shared by the CLI
//! commands.

use std::sync::Arc;

use anyhow::Context;

use sb_domain::agent::AgentCore;
use sb_domain::config::{Config, ConfigSeverity};
use sb_sessions::{DedupCache, ReaperHandle, SessionKeyDeriver, SessionReaper, SessionRegistry};

use crate::bridge::SessionBridge;
use crate::runtime::CrossLoopExecutor;

/// Validate config and wire a [`SessionBridge`] around `core`.
///
/// Must be called on the owner runtime: the bridge binds its executor to
/// the runtime it is built on.
pub fn build_bridge(config: &Config, core: Arc<dyn AgentCore>) -> anyhow::Result<Arc<SessionBridge>> {
    // ── Config validation ────────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    // ── Session registry ─────────────────────────────────────────────
    let keys = SessionKeyDeriver::from_config(&config.sessions)
        .context("building session key prefixes")?;
    let registry = Arc::new(SessionRegistry::new(core.clone(), keys));
    tracing::info!(
        prefix_overrides = config.sessions.channel_prefixes.len(),
        "session registry ready"
    );

    // ── Dedup cache ──────────────────────────────────────────────────
    let dedup = DedupCache::from_config(&config.dedup);
    tracing::info!(
        ttl_secs = config.dedup.ttl_secs,
        max_entries = config.dedup.max_entries,
        "dedup cache ready"
    );

    // ── Cross-loop executor ──────────────────────────────────────────
    let executor = CrossLoopExecutor::current(config.cross_loop.call_timeout())
        .context("binding owner runtime")?;
    tracing::info!(
        call_timeout_ms = config.cross_loop.call_timeout_ms,
        dispatch_timeout_secs = config.relay.dispatch_timeout_secs,
        "cross-loop executor ready"
    );

    Ok(Arc::new(SessionBridge::new(
        core,
        registry,
        dedup,
        executor,
        config.relay.dispatch_timeout(),
    )))
}

/// Spawn the long-running loops.  Returns the reaper handle when the reaper
/// is enabled so the caller can stop it on shutdown.
pub fn spawn_background_tasks(config: &Config, bridge: &SessionBridge) -> Option<ReaperHandle> {
    if !config.reaper.enabled {
        tracing::info!("session reaper disabled");
        return None;
    }
    let reaper = SessionReaper::from_config(bridge.registry().clone(), &config.reaper);
    let handle = reaper.start();
    tracing::info!("background tasks spawned");
    Some(handle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::echo::EchoAgent;
    use std::time::Duration;

    #[tokio::test]
    async fn rejects_invalid_config() {
        let mut config = Config::default();
        config.dedup.max_entries = 0;
        let core = Arc::new(EchoAgent::new(Duration::ZERO));
        assert!(build_bridge(&config, core).is_err());
    }

    #[tokio::test]
    async fn rejects_colliding_prefixes() {
        let mut config = Config::default();
        config
            .sessions
            .channel_prefixes
            .insert("signal".into(), "dc".into());
        let core = Arc::new(EchoAgent::new(Duration::ZERO));
        assert!(build_bridge(&config, core).is_err());
    }

    #[tokio::test]
    async fn reaper_follows_config() {
        let core = Arc::new(EchoAgent::new(Duration::ZERO));
        let mut config = Config::default();
        let bridge = build_bridge(&config, core).unwrap();

        let handle = spawn_background_tasks(&config, &bridge).unwrap();
        assert!(handle.is_running());
        handle.stop().await;

        config.reaper.enabled = false;
        assert!(spawn_background_tasks(&config, &bridge).is_none());
    }
}
