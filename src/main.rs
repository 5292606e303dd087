use std::sync::Arc;

use anyhow::Context;

use listing_bot::app::build_router;
use listing_bot::channels::{LogSender, MessageSender, OutboundResponder, TwilioSender};
use listing_bot::config::{BotConfig, GatewayConfig, TwilioConfig};
use listing_bot::generation::{GenerationGateway, HttpGenerationGateway};
use listing_bot::publisher::{PropertyPublisher, StorePublisher};
use listing_bot::sessions::sweep::spawn_expiry_task;
use listing_bot::sessions::{Dispatcher, Workflow};
use listing_bot::store::{Database, LibSqlBackend};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = BotConfig::from_env().context("invalid LISTING_BOT_* configuration")?;

    eprintln!("🏠 Listing Bot v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Webhook: http://0.0.0.0:{}/webhook/twilio", config.port);
    eprintln!("   Session API: http://0.0.0.0:{}/api/sessions/{{id}}", config.port);

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(
        LibSqlBackend::new_local(&config.db_path)
            .await
            .with_context(|| format!("failed to open database at {}", config.db_path.display()))?,
    );
    eprintln!("   Database: {}", config.db_path.display());

    // ── Outbound channel ─────────────────────────────────────────────────
    let sender: Arc<dyn MessageSender> = match TwilioConfig::from_env() {
        Some(twilio) => {
            eprintln!("   Twilio: enabled (from {})", twilio.from_number);
            Arc::new(TwilioSender::new(twilio))
        }
        None => {
            eprintln!("   Twilio: disabled (replies are logged only)");
            Arc::new(LogSender)
        }
    };

    // ── Generation + publishing ──────────────────────────────────────────
    let gateway_config = GatewayConfig::from_env().context("generation services not configured")?;
    eprintln!("   Drafter: {}", gateway_config.drafter_url);
    eprintln!("   Scorer: {}", gateway_config.scorer_url);
    let gateway: Arc<dyn GenerationGateway> = Arc::new(HttpGenerationGateway::new(gateway_config)?);
    let publisher: Arc<dyn PropertyPublisher> = Arc::new(StorePublisher::new(Arc::clone(&db)));

    if let Some(interval) = config.sweep_interval {
        let _sweep_handle = spawn_expiry_task(Arc::clone(&db), interval);
        eprintln!("   Expiry sweep: every {}s", interval.as_secs());
    }

    let port = config.port;
    let dispatcher = Dispatcher::new(Workflow {
        db,
        gateway,
        publisher,
        responder: OutboundResponder::new(sender, config.send_delay),
        config,
    });

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("failed to bind port {port}"))?;
    tracing::info!(port, "Listing bot server started");
    axum::serve(listener, build_router(dispatcher)).await?;

    Ok(())
}
