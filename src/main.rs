use anyhow::Result;
use std::sync::Arc;
use teloxide::prelude::*;
use teloxide::update_listeners::webhooks;
use tracing::{error, info, warn};

use fleetbot::bot;
use fleetbot::config::BotConfig;
use fleetbot::gateway::SheetGateway;
use fleetbot::poller;
use fleetbot::session::SessionStore;
use fleetbot::sheets::GoogleSheetsApi;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    info!("Starting Fleetbot");

    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let cfg = Arc::new(BotConfig::from_env()?);

    info!(spreadsheet_id = %cfg.spreadsheet_id, "connecting to spreadsheet");
    let api = GoogleSheetsApi::connect(&cfg.credentials_path, &cfg.spreadsheet_id).await?;
    let gateway = Arc::new(SheetGateway::new(api, cfg.retry.clone()));

    // Locate the tasks and roster sheets by header inspection. Absence is
    // tolerated (the pollers keep re-trying) unless the strict flag is set.
    if let Err(e) = gateway.discover_functional_sheets().await {
        warn!(error = %e, "initial sheet discovery failed");
    }
    if cfg.strict_sheets && !gateway.is_ready() {
        anyhow::bail!("tasks sheet not discoverable and STRICT_SHEETS is set");
    }

    let store = SessionStore::new();
    let bot = Bot::new(cfg.token.clone());

    poller::spawn_pollers(
        bot.clone(),
        store.clone(),
        Arc::clone(&gateway),
        Arc::clone(&cfg),
    );

    info!("Bot initialized, starting dispatcher");

    let handler = dptree::entry()
        .branch(Update::filter_message().endpoint({
            let store = store.clone();
            let gateway = Arc::clone(&gateway);
            let cfg = Arc::clone(&cfg);
            move |bot: Bot, msg: Message| {
                let store = store.clone();
                let gateway = Arc::clone(&gateway);
                let cfg = Arc::clone(&cfg);
                async move { bot::message_handler(bot, msg, store, gateway, cfg).await }
            }
        }))
        .branch(Update::filter_callback_query().endpoint({
            let store = store.clone();
            let gateway = Arc::clone(&gateway);
            let cfg = Arc::clone(&cfg);
            move |bot: Bot, q: CallbackQuery| {
                let store = store.clone();
                let gateway = Arc::clone(&gateway);
                let cfg = Arc::clone(&cfg);
                async move { bot::callback_handler(bot, q, store, gateway, cfg).await }
            }
        }));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .enable_ctrlc_handler()
        .build();

    match cfg.webhook_url.as_deref() {
        Some(base) => {
            // Telegram posts updates to a bot-specific path
            let addr = std::net::SocketAddr::from(([0, 0, 0, 0], cfg.port));
            let url = format!("{}/{}", base.trim_end_matches('/'), cfg.token).parse()?;
            let (listener, stop_flag, router) =
                webhooks::axum_to_router(bot, webhooks::Options::new(addr, url)).await?;
            let router =
                router.route("/", axum::routing::get(|| async { "Bot is running!" }));

            tokio::spawn(async move {
                let tcp = match tokio::net::TcpListener::bind(addr).await {
                    Ok(tcp) => tcp,
                    Err(e) => {
                        error!(error = %e, "failed to bind webhook listener");
                        return;
                    }
                };
                if let Err(e) = axum::serve(tcp, router)
                    .with_graceful_shutdown(stop_flag)
                    .await
                {
                    error!(error = %e, "webhook server stopped");
                }
            });

            info!(%addr, "webhook listener started");
            dispatcher
                .dispatch_with_listener(
                    listener,
                    LoggingErrorHandler::with_custom_text("An error from the update listener"),
                )
                .await;
        }
        None => {
            dispatcher.dispatch().await;
        }
    }

    Ok(())
}
