use anyhow::Context;
use dotenvy::dotenv;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use deskbot::api_router::configure_api_routes;
use deskbot::core::bot::channels::telegram::TelegramAdapter;
use deskbot::core::config::{AppConfig, TransportMode};
use deskbot::core::shared::state::AppState;
use deskbot::core::shared::utils::{create_conn, run_migrations};
use deskbot::telegram::run_polling;
use deskbot::tickets::report::CsvReportRenderer;
use deskbot::tickets::DieselTicketStore;

const DRAFT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);

fn config_path(args: &[String]) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == "--config")
        .and_then(|idx| args.get(idx + 1))
        .map(PathBuf::from)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .write_style(env_logger::WriteStyle::Always)
        .init();

    let args: Vec<String> = std::env::args().collect();
    let config = AppConfig::load(config_path(&args).as_deref()).context("loading configuration")?;
    info!(
        "Starting deskbot {} ({:?} transport, admin chat {})",
        env!("CARGO_PKG_VERSION"),
        config.telegram.mode,
        config.telegram.admin_chat_id
    );

    let pool = create_conn(&config.database)
        .with_context(|| format!("opening database {}", config.database.url))?;
    run_migrations(&pool)
        .map_err(|e| anyhow::anyhow!(e))
        .context("running migrations")?;

    let adapter = Arc::new(TelegramAdapter::new(&config.telegram));
    let store = Arc::new(DieselTicketStore::new(pool));
    let state = Arc::new(AppState::new(
        config,
        store,
        adapter.clone(),
        Arc::new(CsvReportRenderer),
    ));

    {
        let state = state.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(DRAFT_PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                let pruned = state.conversations.prune_expired();
                if pruned > 0 {
                    debug!("Pruned {} finished or expired draft slots", pruned);
                }
            }
        });
    }

    let polling = match state.config.telegram.mode {
        TransportMode::Polling => Some(tokio::spawn(run_polling(state.clone(), adapter.clone()))),
        TransportMode::Webhook => {
            let url = state
                .config
                .telegram
                .webhook_url
                .as_deref()
                .context("telegram.webhook_url is required in webhook mode")?;
            adapter
                .set_webhook(url, state.config.telegram.webhook_secret.as_deref())
                .await
                .context("registering Telegram webhook")?;
            None
        }
    };

    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!("HTTP server listening on {}", addr);

    let app = configure_api_routes(state.clone());
    let served = axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await;

    if let Some(polling) = polling {
        polling.abort();
    }
    if let Err(e) = served {
        warn!("HTTP server stopped with error: {}", e);
        return Err(e.into());
    }
    info!("deskbot stopped");
    Ok(())
}
