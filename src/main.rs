//! SMS Relay Daemon
//!
//! CLI for running the poll -> send -> acknowledge loop against a remote queue.

use anyhow::Context;
use clap::{Parser, Subcommand};
use sms_relay::config::Config;
use sms_relay::queue::{Queue, QueueClient};
use sms_relay::relay::PollLoop;
use sms_relay::status::StatusReporter;
use sms_relay::transmitter::{self, Transmitter};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// SMS Relay - send queued messages as texts
#[derive(Parser)]
#[command(name = "sms-relay")]
#[command(about = "Poll a remote message queue and deliver pending messages over SMS")]
struct Cli {
    /// Config file (JSON). Defaults to ~/.config/sms-relay/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Queue server address, e.g. http://10.0.0.2:5000
    #[arg(long, global = true)]
    server: Option<String>,

    /// Shared token sent as X-Token (prefer SMS_RELAY_TOKEN)
    #[arg(long, global = true)]
    token: Option<String>,

    /// Poll interval in milliseconds
    #[arg(long = "interval-ms", global = true)]
    interval_ms: Option<u64>,

    /// Program invoked as `<program> <to> <text>` for each segment
    #[arg(long = "send-command", global = true)]
    send_command: Option<PathBuf>,

    /// Log messages instead of sending them
    #[arg(long = "dry-run", global = true)]
    dry_run: bool,

    /// Debug logging when RUST_LOG is unset
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the relay until Ctrl-C
    Run,

    /// Run a single cycle and print its summary
    Once,

    /// Validate config, check the transmitter and fetch once without sending
    Check,

    /// Print the effective configuration (token redacted)
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let fallback = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(fallback));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Commands::Run => cmd_run(config).await,
        Commands::Once => cmd_once(config).await,
        Commands::Check => cmd_check(config).await,
        Commands::Config => cmd_config(config),
    }
}

/// Defaults, then file, then environment, then flags
fn load_config(cli: &Cli) -> anyhow::Result<Config> {
    load_config_from(cli, |key| std::env::var(key).ok())
}

fn load_config_from<F>(cli: &Cli, env: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let mut config = Config::load(cli.config.as_deref())?;
    config.apply_env_from(env)?;

    if let Some(server) = &cli.server {
        config.server_address = server.clone();
    }
    if let Some(token) = &cli.token {
        config.auth_token = token.clone();
    }
    if let Some(ms) = cli.interval_ms {
        config.poll_interval_ms = ms;
    }
    if let Some(program) = &cli.send_command {
        config.send_command = Some(program.clone());
    }
    if cli.dry_run {
        config.dry_run = true;
    }
    Ok(config)
}

// ============================================================================
// CLI Commands
// ============================================================================

fn cmd_config(config: Config) -> anyhow::Result<()> {
    println!("{}", config.to_redacted_json()?);
    match config.validate() {
        Ok(_) => println!("Config OK"),
        Err(e) => println!("Config invalid: {}", e),
    }
    Ok(())
}

async fn cmd_check(config: Config) -> anyhow::Result<()> {
    let config = config.validate()?;

    let tx = transmitter::from_config(&config)?;
    tx.ready().await.context("transmitter not ready")?;
    println!("Transmitter ready");

    let queue = QueueClient::new(&config)?;
    let pending = queue
        .fetch()
        .await
        .with_context(|| format!("polling {}", config.server_address))?;
    println!(
        "Queue reachable at {}: {} pending",
        config.server_address,
        pending.len()
    );
    Ok(())
}

async fn cmd_once(config: Config) -> anyhow::Result<()> {
    let mut relay = build_relay(&config)?;
    relay.ready().await?;

    let summary = relay.run_cycle().await;
    println!("{}", summary);
    println!("{}", relay.reporter().snapshot().status_line());
    Ok(())
}

// ============================================================================
// Daemon Loop
// ============================================================================

async fn cmd_run(config: Config) -> anyhow::Result<()> {
    info!("SMS relay starting");

    let relay = build_relay(&config)?;
    relay.ready().await.context("cannot start relay")?;

    let handle = relay.spawn();

    tokio::signal::ctrl_c()
        .await
        .context("waiting for Ctrl-C")?;
    info!("Ctrl-C received, finishing current cycle");

    let counters = handle.shutdown().await;
    println!("{}", counters.status_line());
    Ok(())
}

fn build_relay(
    config: &Config,
) -> anyhow::Result<PollLoop<QueueClient, impl Transmitter + 'static>> {
    let config = config.clone().validate()?;
    let queue = QueueClient::new(&config)?;
    let tx = transmitter::from_config(&config)?;
    let reporter = Arc::new(StatusReporter::new());
    Ok(PollLoop::new(&config, queue, tx, reporter))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_flags_override_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("relay.json");
        std::fs::write(
            &path,
            r#"{"server_address": "http://192.168.1.50:5000", "auth_token": "file-token", "poll_interval_ms": 9000}"#,
        )
        .unwrap();

        let env = |key: &str| match key {
            "SMS_RELAY_TOKEN" => Some("env-token".to_string()),
            "SMS_RELAY_POLL_MS" => Some("2000".to_string()),
            _ => None,
        };

        let cli = Cli::parse_from([
            "sms-relay",
            "--config",
            path.to_str().unwrap(),
            "--token",
            "flag-token",
            "once",
        ]);
        let config = load_config_from(&cli, env).unwrap();

        // file value survives, env beats file, flag beats env
        assert_eq!(config.server_address, "http://192.168.1.50:5000");
        assert_eq!(config.poll_interval_ms, 2000);
        assert_eq!(config.auth_token, "flag-token");

        let cli = Cli::parse_from([
            "sms-relay",
            "--config",
            path.to_str().unwrap(),
            "--interval-ms",
            "750",
            "check",
        ]);
        let config = load_config_from(&cli, env).unwrap();
        assert_eq!(config.poll_interval_ms, 750);
        assert_eq!(config.auth_token, "env-token");
    }

    #[test]
    fn test_cli_parse_global_flags() {
        let cli = Cli::parse_from([
            "sms-relay",
            "--config",
            "/nonexistent/config.json",
            "once",
        ]);
        assert!(load_config(&cli).is_err());

        let cli = Cli::parse_from([
            "sms-relay",
            "--server",
            "http://10.0.0.9:5000",
            "--token",
            "abc",
            "--interval-ms",
            "750",
            "--dry-run",
            "check",
        ]);
        assert!(matches!(cli.command, Commands::Check));
        assert_eq!(cli.server.as_deref(), Some("http://10.0.0.9:5000"));
        assert_eq!(cli.interval_ms, Some(750));
        assert!(cli.dry_run);
    }

    #[test]
    fn test_cli_verify() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
