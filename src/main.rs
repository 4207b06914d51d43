mod bot;
mod bulk;
mod config;
mod engine;
mod extract;
mod ledger;
mod selection;
mod types;
mod upstream;

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use bot::{Dispatcher, telegram::TelegramApi};
use config::Config;
use engine::AllocationEngine;
use ledger::SqliteLedger;
use selection::SelectionStore;
use upstream::PortalClient;

const ENV_LOG: &str = "RANGEBOT_LOG";

fn init_tracing() {
    let filter = EnvFilter::try_from_env(ENV_LOG).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env is fine; real deployments export variables directly.
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = Config::load().context("failed to load configuration")?;
    tracing::info!(
        portal = %config.portal.base_url,
        db = %config.db_path.display(),
        admin = config.admin_chat.is_some(),
        "starting rangebot"
    );

    let ledger = Arc::new(
        SqliteLedger::open(&config.db_path)
            .with_context(|| format!("failed to open ledger at {}", config.db_path.display()))?,
    );
    let upstream = Arc::new(PortalClient::new(config.portal.clone()));
    let engine =
        AllocationEngine::new(upstream.clone(), ledger.clone()).with_delay(config.submit_delay);
    let dispatcher = Dispatcher::new(
        upstream,
        engine,
        ledger,
        Arc::new(SelectionStore::new()),
        config.admin_chat.is_some(),
    );

    let api = TelegramApi::new(&config.bot_token).context("failed to build Telegram client")?;
    bot::telegram::run(Arc::new(api), Arc::new(dispatcher), config.admin_chat).await
}
