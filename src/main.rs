use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use toolbroker::broker::{Arguments, Broker, BrokerConfig, InvocationRequest, ToolSet};

/// Register tool providers from a config file and inspect or invoke their tools
#[derive(Debug, Parser)]
#[command(name = "toolbroker", version, about)]
struct Cli {
    /// Broker config file (defaults to ~/.toolbroker/config.json)
    #[arg(short, long, env = "TOOLBROKER_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print function definitions for discovered tools as JSON
    Tools {
        /// Only tools whose name matches this regex
        #[arg(short, long)]
        pattern: Option<String>,
    },

    /// Invoke one capability on one provider
    Invoke {
        provider: String,
        capability: String,

        /// Arguments as a JSON object
        #[arg(short, long, default_value = "{}")]
        args: String,

        /// Override the policy timeout
        #[arg(long)]
        timeout_ms: Option<u64>,
    },

    /// Print provider connection state
    Providers,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Loaded first so RUST_LOG and provider secrets may come from .env
    let env_loaded = dotenvy::dotenv().is_ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    if !env_loaded {
        tracing::debug!(".env file not found - using process environment only");
    }

    let cli = Cli::parse();

    let path = cli
        .config
        .or_else(BrokerConfig::default_path)
        .context("No config file given and no home directory for the default")?;
    let config = BrokerConfig::load_from_file(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    let (broker, outcomes) = Broker::from_config(config).await?;
    for (name, outcome) in &outcomes {
        match outcome {
            Ok(registered) => tracing::info!(
                "✓ {} ({}): {} tools",
                name,
                registered.transport,
                registered.capabilities.len()
            ),
            Err(e) => tracing::warn!("✗ {}: {}", name, e),
        }
    }

    let result = run(&broker, cli.command).await;
    broker.disconnect_all().await;
    result
}

async fn run(broker: &Broker, command: Command) -> Result<()> {
    match command {
        Command::Tools { pattern } => {
            let tools = match pattern {
                Some(pattern) => ToolSet::matching(broker, &pattern).await?,
                None => ToolSet::all(broker).await,
            };
            println!("{}", serde_json::to_string_pretty(&tools.definitions())?);
        }

        Command::Invoke {
            provider,
            capability,
            args,
            timeout_ms,
        } => {
            let arguments: Arguments =
                serde_json::from_str(&args).context("--args must be a JSON object")?;
            let mut request = InvocationRequest::new(provider, capability).with_arguments(arguments);
            if let Some(ms) = timeout_ms {
                request = request.with_timeout(Duration::from_millis(ms));
            }

            let result = broker.invoke(request).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                anyhow::bail!("Tool failed: {}", result.error_message());
            }
        }

        Command::Providers => {
            println!("{}", serde_json::to_string_pretty(&broker.providers().await)?);
        }
    }
    Ok(())
}
