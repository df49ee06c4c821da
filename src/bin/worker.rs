use imagegen_relay::{
    config::AppConfig,
    services::{
        dispatcher::QueueDispatcher, job_store::RedisJobStore, provider::NextLegClient,
        queue::RedisJobQueue,
    },
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

const POLL_INTERVAL_MS: u64 = 1000; // 1 second

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    tracing::info!("Starting image generation dispatch worker");

    // Load configuration
    let config = AppConfig::from_env().expect("Failed to load configuration");

    if config.webhook_public_url.is_none() {
        tracing::warn!(
            "WEBHOOK_PUBLIC_URL is not set, callbacks go to the provider account default"
        );
    }

    // Initialize services
    tracing::info!("Initializing services");
    let store = Arc::new(
        RedisJobStore::new(&config.redis_url, config.job_ttl())
            .expect("Failed to initialize job store"),
    );
    let queue =
        Arc::new(RedisJobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));
    let provider = Arc::new(
        NextLegClient::new(&config.provider_api_url, &config.provider_api_key)
            .expect("Failed to initialize provider client"),
    );

    let dispatcher =
        QueueDispatcher::new(store, queue, provider, config.webhook_public_url.clone());

    tracing::info!("Worker ready, starting dispatch loop");

    // Main dispatch loop
    loop {
        match dispatcher.process_next().await {
            Ok(true) => {
                // Job dispatched, continue immediately
                tracing::debug!("Job dispatched, checking for next job");
            }
            Ok(false) => {
                // No job available, sleep before next poll
                tracing::trace!("No jobs available, sleeping");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Error dispatching job, will retry");
                sleep(Duration::from_millis(POLL_INTERVAL_MS)).await;
            }
        }
    }
}
