use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{eyre, Context, Result};
use env_logger::Env;
use log::info;
use tokio_util::sync::CancellationToken;

use tunnelscope::config::Config;
use tunnelscope::config_loader;
use tunnelscope::history::{self, HistoryReport, InstanceSetHistoryBuilder};
use tunnelscope::net::{RelayListener, WebSocketConnector};

/// Relay tunnels and sole-tenant placement analysis
#[derive(Parser, Debug)]
#[command(name = "tunnelscope")]
#[command(version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to the configuration YAML file
    #[arg(short, long, default_value = "tunnelscope.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Forward local TCP clients through the relay until interrupted
    Tunnel {
        /// Local port to listen on; overrides the config file
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Reconstruct instance and node placement history from audit events
    History {
        /// Output directory for reports
        #[arg(short, long, default_value = "history_output")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = config_loader::load_config(&cli.config)?;

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.log_level().to_string());
    env_logger::Builder::from_env(Env::default().default_filter_or(log_level)).init();

    info!("Configuration file: {:?}", cli.config);

    match cli.command {
        Commands::Tunnel { port } => run_tunnel(&config, port).await,
        Commands::History { output } => run_history(&config, &output),
    }
}

async fn run_tunnel(config: &Config, port: Option<u16>) -> Result<()> {
    let tunnel = config
        .tunnel
        .as_ref()
        .ok_or_else(|| eyre!("Configuration has no tunnel section"))?;

    let endpoint = tunnel.endpoint();
    info!(
        "Tunneling to {}:{} via {}",
        endpoint.destination.host, endpoint.destination.port, endpoint.relay_url
    );

    let listener = RelayListener::bind(port.or(tunnel.local_port), WebSocketConnector { endpoint })
        .await
        .context("Failed to start local listener")?;
    println!("Listening on {}", listener.local_addr()?);

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupted, shutting down");
        }
        shutdown.cancel();
    });

    listener.run(cancel).await
}

fn run_history(config: &Config, output: &Path) -> Result<()> {
    let analysis = config
        .analysis
        .as_ref()
        .ok_or_else(|| eyre!("Configuration has no analysis section"))?;

    let mut builder = InstanceSetHistoryBuilder::new(analysis.window_start, analysis.window_end);

    if let Some(path) = &analysis.inventory {
        let inventory = history::load_inventory(path)?;
        info!("Loaded {} existing instances from {}", inventory.len(), path.display());
        builder.add_inventory(&inventory)?;
    }

    let events = history::load_events(&analysis.events)?;
    builder
        .process_all(&events)
        .context("Failed to replay audit events")?;

    let report = HistoryReport::new(builder.build());

    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create output directory: {}", output.display()))?;

    report.instances.save(&output.join("instances.json"))?;
    history::generate_json_report(&report, &output.join("history_report.json"))?;
    history::generate_text_report(&report, &output.join("history_report.txt"))?;
    history::print_summary(&report);

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_subcommands() {
        let cli = Cli::parse_from(["tunnelscope", "--log-level", "debug", "tunnel", "--port", "2222"]);
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Commands::Tunnel { port: Some(2222) }));

        let cli = Cli::parse_from(["tunnelscope", "-c", "other.yaml", "history", "-o", "out"]);
        assert_eq!(cli.config, PathBuf::from("other.yaml"));
        assert!(matches!(cli.command, Commands::History { ref output } if *output == PathBuf::from("out")));
    }
}
