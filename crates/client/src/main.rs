use clap::Parser;
use tracing_subscriber::EnvFilter;

use cs_client::cli::{Cli, Command, ConfigCommand};
use cs_domain::config::{LogFormat, ObservabilityConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        // Default to chat when no subcommand is given.
        None | Some(Command::Chat) => {
            let (config, _) = cs_client::cli::load_config()?;
            init_cli_tracing(&config.observability);
            cs_client::cli::chat::chat(config).await
        }
        Some(Command::Ask { query, json }) => {
            let (config, _) = cs_client::cli::load_config()?;
            init_cli_tracing(&config.observability);
            let answered = cs_client::cli::ask::run(config, query, json).await?;
            if !answered {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::History { json }) => {
            let (config, _) = cs_client::cli::load_config()?;
            init_cli_tracing(&config.observability);
            cs_client::cli::history::run(&config, json)
        }
        Some(Command::Config(ConfigCommand::Validate)) => {
            let (config, config_path) = cs_client::cli::load_config()?;
            if !cs_client::cli::config::validate(&config, &config_path) {
                std::process::exit(1);
            }
            Ok(())
        }
        Some(Command::Config(ConfigCommand::Show)) => {
            let (config, _) = cs_client::cli::load_config()?;
            cs_client::cli::config::show(&config)
        }
        Some(Command::Version) => {
            println!("casestream {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Log to stderr so stdout carries only answers.  `RUST_LOG` wins over the
/// configured default filter.
fn init_cli_tracing(obs: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&obs.default_filter));

    match obs.log_format {
        LogFormat::Compact => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init(),
    }
}
