use std::sync::Arc;

use anyhow::{Error, Result};
use automation_dispatch::{
    api::run_api_server,
    clients::{
        Channel, ConsentStore, DeliveryLog,
        database::DatabaseClient,
        memory::{MemoryConsentStore, MemoryDeliveryLog},
        webhook::WebhookChannel,
    },
    config::Config,
    services::dispatcher::Dispatcher,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Error> {
    let config = Config::load()?;
    init_tracing(&config);

    let (consent_store, delivery_log): (Arc<dyn ConsentStore>, Arc<dyn DeliveryLog>) =
        match config.database_url.as_deref() {
            Some(url) => {
                let database = Arc::new(DatabaseClient::connect(url).await?);
                let consent_store: Arc<dyn ConsentStore> = database.clone();
                let delivery_log: Arc<dyn DeliveryLog> = database;
                (consent_store, delivery_log)
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory consent store and delivery log");
                let consent_store: Arc<dyn ConsentStore> = Arc::new(MemoryConsentStore::new());
                let delivery_log: Arc<dyn DeliveryLog> = Arc::new(MemoryDeliveryLog::new());
                (consent_store, delivery_log)
            }
        };

    let channel: Option<Arc<dyn Channel>> = match config.webhook_settings() {
        Some(settings) => {
            let webhook: Arc<dyn Channel> = Arc::new(WebhookChannel::new(&settings)?);
            Some(webhook)
        }
        None => None,
    };

    let dispatcher = Arc::new(Dispatcher::new(
        channel,
        consent_store,
        delivery_log,
        config.retry_config(),
        config.dispatcher_settings(),
    ));

    dispatcher.start().await;

    let addr = format!("0.0.0.0:{}", config.server_port);
    let listener = TcpListener::bind(&addr).await?;

    run_api_server(listener, Arc::clone(&dispatcher), async {
        let _ = tokio::signal::ctrl_c().await;
        info!("Shutdown signal received");
    })
    .await?;

    dispatcher.shutdown().await;

    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if config.log_format.eq_ignore_ascii_case("pretty") {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    }
}
