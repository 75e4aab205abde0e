pub mod ask;
pub mod chat;
pub mod config;
pub mod history;

use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use cs_domain::config::Config;
use cs_sessions::{HistoryStore, JsonFileStore, MemoryStore};
use cs_stream::HttpTransport;

use crate::gate::Conversation;

/// casestream: terminal client for the case study assistant.
#[derive(Debug, Parser)]
#[command(name = "casestream", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Interactive chat (default when no subcommand is given).
    Chat,
    /// Ask a single question and print the answer.
    Ask {
        /// The question to send.
        query: String,
        /// Output the turn report as JSON instead of plain text.
        #[arg(long)]
        json: bool,
    },
    /// Print the stored conversation history.
    History {
        /// Output the entries as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any problems.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path in `CS_CONFIG` (or
/// `casestream.toml` by default), then apply environment overrides.
/// Returns the parsed [`Config`] and the path that was used.
pub fn load_config() -> anyhow::Result<(Config, String)> {
    let config_path = std::env::var("CS_CONFIG").unwrap_or_else(|_| "casestream.toml".into());

    let mut config: Config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .with_context(|| format!("reading {config_path}"))?;
        toml::from_str(&raw).with_context(|| format!("parsing {config_path}"))?
    } else {
        Config::default()
    };
    config.apply_env();

    Ok((config, config_path))
}

/// The history store selected by `conversation.persist`.
pub fn open_store(config: &Config) -> anyhow::Result<Arc<dyn HistoryStore>> {
    if config.conversation.persist {
        let store = JsonFileStore::new(&config.conversation.history_dir).with_context(|| {
            format!(
                "opening history dir {}",
                config.conversation.history_dir.display()
            )
        })?;
        Ok(Arc::new(store))
    } else {
        Ok(Arc::new(MemoryStore::new()))
    }
}

/// Wire a conversation to the configured backend and store.
pub fn open_conversation(
    config: &Config,
    store: Arc<dyn HistoryStore>,
) -> anyhow::Result<Arc<Conversation>> {
    let transport = HttpTransport::from_config(&config.backend)
        .context("building HTTP client")?;
    tracing::debug!(url = transport.url(), "backend configured");
    let conversation = Conversation::open(config, Arc::new(transport), store)
        .with_context(|| format!("loading conversation {:?}", config.conversation.id))?;
    Ok(Arc::new(conversation))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_means_chat() {
        let cli = Cli::try_parse_from(["casestream"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn ask_takes_query_and_json_flag() {
        let cli = Cli::try_parse_from(["casestream", "ask", "who filed?", "--json"]).unwrap();
        match cli.command {
            Some(Command::Ask { query, json }) => {
                assert_eq!(query, "who filed?");
                assert!(json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn config_requires_a_subcommand() {
        assert!(Cli::try_parse_from(["casestream", "config"]).is_err());
        let cli = Cli::try_parse_from(["casestream", "config", "validate"]).unwrap();
        assert!(matches!(
            cli.command,
            Some(Command::Config(ConfigCommand::Validate))
        ));
    }

    #[test]
    fn memory_store_when_persistence_is_off() {
        let mut config = Config::default();
        config.conversation.persist = false;
        let store = open_store(&config).unwrap();
        assert!(store.load("default").unwrap().is_empty());
    }
}
