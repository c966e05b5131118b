//! ledger-relay - Telegram expense bot that records each message as a sheet row
//!
//! Module structure:
//! - `domain/` - Expense events, money, currencies, errors
//! - `io/` - External interfaces (Telegram, OpenAI, Google Sheets, Prometheus)
//! - `services/` - Classification, coordinator, delivery log, bot loop
//! - `infra/` - Infrastructure (Config, Secrets, Metrics)

use anyhow::Context;
use clap::Parser;
use ledger_relay::infra::{Config, CredentialBundle, Metrics};
use ledger_relay::io::{OpenAiClassifier, SheetsLedger, TelegramClient};
use ledger_relay::services::{Bot, Coordinator};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::info;
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Capacity of the poller -> bot loop channel
const INBOUND_CHANNEL_CAPACITY: usize = 100;

/// ledger-relay - expense messages to a Google Sheets ledger
#[derive(Parser, Debug)]
#[command(name = "ledger-relay", version, about)]
struct Args {
    /// Path to TOML configuration file (defaults to $CONFIG_FILE, then config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Default: INFO, use RUST_LOG=debug to see classifier replies
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!(git_hash = %env!("GIT_HASH"), "ledger-relay starting");

    let args = Args::parse();
    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    let credentials = CredentialBundle::from_env().context("missing credentials")?;

    info!(
        config_file = %config.config_file(),
        model = %config.model(),
        sheet_name = %config.sheet_name(),
        base_currency = %config.base_currency(),
        utc_offset = %config.utc_offset(),
        poll_timeout_secs = %config.poll_timeout_secs(),
        prometheus_port = %config.prometheus_port(),
        service_account = %credentials.service_account.client_email,
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let metrics = Arc::new(Metrics::new());

    let telegram = Arc::new(TelegramClient::new(&config, &credentials.telegram_token)?);
    let classifier = Arc::new(
        OpenAiClassifier::new(&config, credentials.openai_api_key.clone())?.with_metrics(metrics.clone()),
    );
    let ledger = Arc::new(SheetsLedger::new(&config, &credentials)?);

    ledger.ensure_headers().await.context("ledger is not reachable")?;
    let spreadsheet_url = ledger.spreadsheet_url();
    info!(url = %spreadsheet_url, "ledger_connected");

    // Start Prometheus metrics HTTP server (if port > 0)
    let prometheus_port = config.prometheus_port();
    if prometheus_port > 0 {
        let prom_metrics = metrics.clone();
        let prom_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) =
                ledger_relay::io::prometheus::start_metrics_server(prometheus_port, prom_metrics, prom_shutdown)
                    .await
            {
                tracing::error!(error = %e, "Prometheus metrics server error");
            }
        });
    }

    // Periodic metrics summary in the log
    let metrics_clone = metrics.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(metrics_interval));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            metrics_clone.report().log();
        }
    });

    // Inbound channel (bounded for backpressure against the poller)
    let (message_tx, message_rx) = mpsc::channel(INBOUND_CHANNEL_CAPACITY);

    let poller = {
        let telegram = telegram.clone();
        let metrics = metrics.clone();
        let poll_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            telegram.poll(message_tx, poll_shutdown, metrics).await;
        })
    };

    let coordinator = Coordinator::new(
        classifier,
        ledger,
        telegram.clone(),
        config.rates().clone(),
        config.utc_offset(),
        config.dedup_capacity(),
        metrics.clone(),
    );
    let bot = Bot::new(coordinator, telegram, spreadsheet_url, metrics.clone());

    // Handle shutdown on Ctrl+C
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    // Runs until the poller stops and the channel is drained
    bot.run(message_rx).await;
    let _ = poller.await;

    metrics.report().log();
    info!("ledger-relay shutdown complete");
    Ok(())
}
