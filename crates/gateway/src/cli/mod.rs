pub mod chat;
pub mod config;

use clap::{Parser, Subcommand};

/// session-bridge: connects chat transports to a single agent core.
#[derive(Debug, Parser)]
#[command(name = "session-bridge", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Chat with the local echo agent through the console transport
    /// (default when no subcommand is given).
    Chat {
        /// External user id for the console session.
        #[arg(long, default_value = "local")]
        user: String,
        /// Delay between streamed chunks, in milliseconds.
        #[arg(long, default_value_t = 40)]
        chunk_delay_ms: u64,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `SB_CONFIG` (or `config.toml`
/// by default).  A missing file yields the defaults.  Returns the parsed
/// [`Config`](sb_domain::config::Config) and the path that was used.
pub fn load_config() -> anyhow::Result<(sb_domain::config::Config, String)> {
    let config_path = std::env::var("SB_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        sb_domain::config::Config::default()
    };

    Ok((config, config_path))
}
