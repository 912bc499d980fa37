// Webhook Relay - Main Entry Point
//
// CLI front end for the delivery core:
// - Trigger an event against the webhooks declared in the config
// - Sign and verify payloads the way receivers do
// - Inspect the resolved configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use webhook_relay::config::Config;
use webhook_relay::metrics;
use webhook_relay::webhooks::signature;
use webhook_relay::webhooks::{HttpTransport, WebhookEvent, WebhookManager};

/// Webhook Relay: signed webhook delivery with retries
#[derive(Parser, Debug)]
#[command(name = "webhook-relay")]
#[command(author = "Webhook Relay Contributors")]
#[command(version)]
#[command(about = "Deliver events to webhooks with HMAC signatures and retries", long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (defaults to ~/.config/webhook-relay/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Trigger an event against the configured webhooks
    Trigger {
        /// Event type, e.g. "deal.won"
        #[arg(long)]
        event_type: String,

        /// JSON payload delivered as the request body
        #[arg(long)]
        payload: String,

        /// Print Prometheus metrics after delivery
        #[arg(long)]
        print_metrics: bool,
    },
    /// Print the X-Signature value for a payload
    Sign {
        #[arg(long)]
        secret: String,

        #[arg(long)]
        payload: String,
    },
    /// Check an X-Signature value; exits non-zero when it does not match
    Verify {
        #[arg(long)]
        secret: String,

        #[arg(long)]
        payload: String,

        #[arg(long)]
        signature: String,
    },
    /// Load and validate the configuration, then print it
    CheckConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    init_tracing(&config, args.verbose)?;

    match args.command {
        Some(Commands::Trigger {
            event_type,
            payload,
            print_metrics,
        }) => {
            trigger(&config, event_type, &payload, print_metrics).await?;
        }
        Some(Commands::Sign { secret, payload }) => {
            let payload = parse_payload(&payload)?;
            println!("{}", signature::sign(&secret, &payload));
        }
        Some(Commands::Verify {
            secret,
            payload,
            signature: expected,
        }) => {
            let payload = parse_payload(&payload)?;
            if !signature::verify(&secret, &payload, expected.trim()) {
                anyhow::bail!("Signature does not match payload");
            }
            println!("Signature valid");
        }
        Some(Commands::CheckConfig) => {
            let rendered = toml::to_string_pretty(&config.redacted())
                .context("Failed to render configuration")?;
            println!("{}", rendered);
        }
        None => {
            info!("No command specified. Use \"webhook-relay --help\" for usage.");
        }
    }

    Ok(())
}

fn init_tracing(config: &Config, verbose: bool) -> Result<()> {
    let level = if verbose {
        Level::DEBUG
    } else {
        config.log_level()?
    };
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    // stdout carries command output; logs go to stderr
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match config.logging.format.to_lowercase().as_str() {
        "json" => builder.json().init(),
        "pretty" => builder.pretty().init(),
        _ => builder.compact().init(),
    }
    Ok(())
}

fn parse_payload(raw: &str) -> Result<serde_json::Value> {
    serde_json::from_str(raw).context("--payload must be valid JSON")
}

/// Register the configured webhooks in memory and deliver one event
async fn trigger(
    config: &Config,
    event_type: String,
    payload: &str,
    print_metrics: bool,
) -> Result<()> {
    let payload = parse_payload(payload)?;
    metrics::init().context("Failed to register metrics")?;

    let transport = HttpTransport::new()?;
    let manager = WebhookManager::in_memory(
        Arc::new(transport),
        config.delivery_settings(),
        config.delivery.max_in_flight,
    );

    for seed in &config.webhooks {
        let webhook = manager
            .register(seed.clone())
            .await
            .with_context(|| format!("Failed to register webhook '{}'", seed.name))?;
        info!(webhook_id = %webhook.id, name = %webhook.name, "Webhook loaded from config");
    }
    if config.webhooks.is_empty() {
        warn!("No webhooks configured; nothing will be delivered");
    }

    let deliveries = manager
        .trigger(WebhookEvent::new(event_type, payload))
        .await?;

    let failed = deliveries.iter().filter(|d| !d.is_success).count();
    info!(
        delivered = deliveries.len() - failed,
        failed,
        "Trigger complete"
    );

    println!("{}", serde_json::to_string_pretty(&deliveries)?);

    if print_metrics {
        println!("{}", metrics::gather_metrics()?);
    }

    Ok(())
}
