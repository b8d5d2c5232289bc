//! alerterd - alert forwarding daemon
//!
//! Listens on a local Unix socket and forwards each message to a chat
//! webhook, queueing what cannot be delivered yet.

use std::path::{Path, PathBuf};

use alerterd::{shutdown, systemd, Daemon, DaemonConfig};
use clap::{Parser, Subcommand};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DEFAULT_CONFIG: &str = "/etc/alerter/config.json";

#[derive(Parser)]
#[command(name = "alerterd")]
#[command(about = "Forward local alerts to a chat webhook")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the daemon
    Run {
        /// Path to config file
        #[arg(short, long, default_value = DEFAULT_CONFIG, env = "ALERTERD_CONFIG")]
        config: PathBuf,

        /// Increase log verbosity (-v debug, -vv trace)
        #[arg(short, long, action = clap::ArgAction::Count)]
        verbose: u8,
    },

    /// Generate a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = DEFAULT_CONFIG)]
        output: PathBuf,

        /// Webhook URL
        #[arg(long)]
        webhook: String,
    },

    /// Validate a config file and exit
    CheckConfig {
        /// Path to config file
        #[arg(short, long, default_value = DEFAULT_CONFIG, env = "ALERTERD_CONFIG")]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, verbose } => {
            init_tracing(verbose)?;
            run_daemon(config).await?;
        }

        Commands::InitConfig { output, webhook } => {
            init_config(output, webhook)?;
        }

        Commands::CheckConfig { config } => {
            check_config(&config)?;
        }
    }

    Ok(())
}

fn init_tracing(verbose: u8) -> anyhow::Result<()> {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new(level)
            .add_directive("hyper=info".parse()?)
            .add_directive("reqwest=info".parse()?),
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    Ok(())
}

async fn run_daemon(config_path: PathBuf) -> anyhow::Result<()> {
    info!(
        config = %config_path.display(),
        version = alerterd::DAEMON_VERSION,
        "starting alerterd"
    );

    let config = DaemonConfig::load(&config_path)?;
    let daemon = Daemon::new(config)?;

    let (shutdown_tx, _shutdown_rx) = shutdown::channel();
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = shutdown::wait_for_signal().await {
            error!(error = %e, "failed to install signal handlers");
        }
        systemd::notify_stopping();
        let _ = signal_tx.send(());
    });

    // Socket is bound and the queue loaded, so producers can connect.
    systemd::notify_ready();
    if let Some(interval) = systemd::watchdog_interval() {
        info!(interval_ms = interval.as_millis() as u64, "systemd watchdog enabled");
        tokio::spawn(systemd::run_watchdog(interval, shutdown_tx.subscribe()));
    }

    daemon.run(&shutdown_tx).await;
    Ok(())
}

fn init_config(output: PathBuf, webhook: String) -> anyhow::Result<()> {
    let config = DaemonConfig::new(
        "/run/alerter/alerter.sock",
        webhook,
        "/var/lib/alerter/queue",
    );
    config.validate()?;
    config.save(&output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Start the daemon with:");
    println!("  alerterd run --config {}", output.display());

    Ok(())
}

fn check_config(path: &Path) -> anyhow::Result<()> {
    let config = DaemonConfig::load(path)?;

    println!("{} is valid", path.display());
    println!("  socket:  {}", config.socket_path.display());
    println!("  webhook: {}", config.webhook_url);
    println!("  queue:   {}", config.queue_path.display());
    println!(
        "  retry:   {} attempts, {} ms apart",
        config.retry.max_attempts, config.retry.delay_ms
    );

    Ok(())
}
