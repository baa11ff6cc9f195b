//! Skyhook agent entry point.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use skyhook_agent::Agent;
use skyhook_config::AgentConfig;

/// Skyhook agent - execute tunneled requests from inside the private network
#[derive(Parser, Debug)]
#[command(name = "skyhook-agent")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short = 'c', long = "config", env = "SKYHOOK_AGENT_CONFIG")]
    config: Option<PathBuf>,

    /// Validate configuration and exit
    #[arg(short = 't', long = "test")]
    test: bool,

    /// Enable verbose logging (debug level)
    #[arg(long = "verbose")]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "skyhook=debug,info" } else { "info" };
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config =
        AgentConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    if cli.test {
        println!("configuration OK");
        return Ok(());
    }

    info!(
        server = %config.server_url,
        client_id = %config.client_id,
        "starting agent"
    );

    let agent = std::sync::Arc::new(Agent::new(config).context("failed to initialize agent")?);
    let runner = {
        let agent = agent.clone();
        tokio::spawn(async move { agent.run().await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("interrupt received");
    agent.shutdown();
    let _ = runner.await;

    Ok(())
}
