use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use mail_relay::config::RelayConfig;
use mail_relay::pipeline::relay::Relay;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    dotenv::dotenv().ok();

    let config = RelayConfig::from_env().context("Invalid configuration")?;

    // Initialize tracing; the guard flushes the file writer on exit.
    let (file_layer, _log_guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(fmt::layer().with_writer(writer).with_ansi(false).with_target(false)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    eprintln!("📬 Mail Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!(
        "   Mailbox: {} (IMAP: {}, SMTP: {})",
        config.email.username, config.email.imap_host, config.email.smtp_host
    );
    eprintln!("   Model: {} @ {}", config.llm.model, config.llm.api_base);
    eprintln!("   Store: {}", config.store_path.display());
    eprintln!(
        "   Allowed senders: {}",
        if config.pipeline.allowed_senders.is_empty() {
            "none (deny all)".to_string()
        } else {
            config.pipeline.allowed_senders.join(", ")
        }
    );
    eprintln!("   Polling every {}s. Ctrl-C to stop.\n", config.poll_interval.as_secs());

    let relay = Relay::from_config(&config)?;

    let mut tick = tokio::time::interval(config.poll_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = tick.tick() => {
                match relay.run_cycle().await {
                    Ok(summary) if summary.total() > 0 => info!(
                        replied = summary.replied,
                        rejected = summary.rejected,
                        empty = summary.empty,
                        failed = summary.failed,
                        "Cycle complete"
                    ),
                    Ok(_) => {}
                    Err(e) => error!(error = %e, "Mail fetch failed"),
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    Ok(())
}
