//! Session key derivation.
//!
//! Keys have the form `{prefix}:{externalUserId}` and show up verbatim in
//! logs and status dumps.  The prefix comes from a fixed table for known
//! channels:
//!
//! | channel    | prefix  |
//! |------------|---------|
//! | `web`      | `web`   |
//! | `telegram` | `tg`    |
//! | `discord`  | `dc`    |
//! | `slack`    | `slack` |
//! | `whatsapp` | `wa`    |
//! | `matrix`   | `mx`    |
//! | `feishu`   | `fs`    |
//! | `dingtalk` | `dt`    |
//! | `wecom`    | `wc`    |
//! | `email`    | `mail`  |
//! | `cli`      | `cli`   |
//!
//! Unknown channels get a derived prefix `{slug}~{hash}`: up to eight
//! lowercase alphanumerics of the channel name plus the first six hex
//! digits of its SHA-256.  Table prefixes never contain `~` and no prefix
//! contains `:`, so keys from different channels cannot collide.

use std::borrow::Cow;
use std::collections::HashMap;

use sha2::{Digest, Sha256};

use sb_domain::config::{SessionsConfig, WEB_UI_CHANNEL};
use sb_domain::error::{Error, Result};

const KNOWN_PREFIXES: &[(&str, &str)] = &[
    (WEB_UI_CHANNEL, "web"),
    ("telegram", "tg"),
    ("discord", "dc"),
    ("slack", "slack"),
    ("whatsapp", "wa"),
    ("matrix", "mx"),
    ("feishu", "fs"),
    ("dingtalk", "dt"),
    ("wecom", "wc"),
    ("email", "mail"),
    ("cli", "cli"),
];

const SLUG_MAX: usize = 8;

/// Derive the session key for an identity on a channel using the built-in
/// prefix table.
pub fn derive_session_key(channel: &str, external_user_id: &str) -> String {
    let channel = normalize_channel(channel);
    format!("{}:{external_user_id}", builtin_prefix(&channel))
}

fn normalize_channel(channel: &str) -> String {
    channel.trim().to_ascii_lowercase()
}

fn builtin_prefix(channel: &str) -> Cow<'static, str> {
    KNOWN_PREFIXES
        .iter()
        .find(|(name, _)| *name == channel)
        .map(|(_, prefix)| Cow::Borrowed(*prefix))
        .unwrap_or_else(|| Cow::Owned(derived_prefix(channel)))
}

fn derived_prefix(channel: &str) -> String {
    let slug: String = channel
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .take(SLUG_MAX)
        .collect();
    let slug = if slug.is_empty() { "ch".to_string() } else { slug };
    let digest = Sha256::digest(channel.as_bytes());
    let hash = hex::encode(&digest[..3]);
    format!("{slug}~{hash}")
}

/// Key derivation with configured prefix overrides merged over the
/// built-in table.
#[derive(Debug, Clone, Default)]
pub struct SessionKeyDeriver {
    overrides: HashMap<String, String>,
}

impl SessionKeyDeriver {
    /// Build a deriver from config.  Fails when an override is malformed or
    /// would make two channels share a prefix.
    pub fn from_config(config: &SessionsConfig) -> Result<Self> {
        let mut overrides = HashMap::new();
        for (channel, prefix) in &config.channel_prefixes {
            if !SessionsConfig::is_valid_prefix(prefix) {
                return Err(Error::Config(format!(
                    "invalid prefix {prefix:?} for channel {channel:?}"
                )));
            }
            overrides.insert(normalize_channel(channel), prefix.clone());
        }

        let deriver = Self { overrides };
        deriver.check_unique()?;
        Ok(deriver)
    }

    fn check_unique(&self) -> Result<()> {
        let mut seen: HashMap<String, String> = HashMap::new();
        let channels = KNOWN_PREFIXES
            .iter()
            .map(|(name, _)| name.to_string())
            .chain(self.overrides.keys().cloned());
        for channel in channels {
            let prefix = self.prefix_for(&channel).into_owned();
            if let Some(other) = seen.get(&prefix) {
                if *other != channel {
                    return Err(Error::Config(format!(
                        "channels {other:?} and {channel:?} both map to prefix {prefix:?}"
                    )));
                }
            }
            seen.insert(prefix, channel);
        }
        Ok(())
    }

    /// The key prefix used for `channel`.
    pub fn prefix_for(&self, channel: &str) -> Cow<'_, str> {
        let channel = normalize_channel(channel);
        match self.overrides.get(&channel) {
            Some(prefix) => Cow::Borrowed(prefix.as_str()),
            None => builtin_prefix(&channel),
        }
    }

    pub fn derive(&self, channel: &str, external_user_id: &str) -> String {
        format!("{}:{external_user_id}", self.prefix_for(channel))
    }
}
