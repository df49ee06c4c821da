use axum::routing::get;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use imagegen_relay::{
    app_state::AppState,
    config::AppConfig,
    db,
    routes::{self, metrics::MetricsState},
    services::{
        accounts::PgAccountService,
        dispatcher::QueueDispatcher,
        enhancer::OpenAiEnhancer,
        job_store::RedisJobStore,
        notify::{HttpEventTracker, SlackNotifier},
        orchestrator::GenerationOrchestrator,
        provider::NextLegClient,
        queue::RedisJobQueue,
        webhook::WebhookRelay,
    },
};

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing imagegen-relay server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("imagegen_jobs_total", "Image generation jobs submitted");
    metrics::describe_counter!("imagegen_jobs_completed", "Image generation jobs completed");
    metrics::describe_counter!("imagegen_jobs_failed", "Image generation jobs that failed");
    metrics::describe_histogram!(
        "imagegen_generation_seconds",
        "Time from submission to completed images"
    );
    metrics::describe_counter!("imagegen_webhooks_total", "Provider callbacks received");
    metrics::describe_gauge!("imagegen_queue_depth", "Jobs waiting in the dispatch queue");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Initialize Redis job store and dispatch queue
    tracing::info!("Connecting to Redis job store");
    let store = Arc::new(
        RedisJobStore::new(&config.redis_url, config.job_ttl())
            .expect("Failed to initialize job store"),
    );
    let queue =
        Arc::new(RedisJobQueue::new(&config.redis_url).expect("Failed to initialize job queue"));

    // Initialize external clients
    tracing::info!("Initializing provider and enhancer clients");
    let provider = Arc::new(
        NextLegClient::new(&config.provider_api_url, &config.provider_api_key)
            .expect("Failed to initialize provider client"),
    );
    let enhancer = Arc::new(
        OpenAiEnhancer::new(
            &config.enhancer_api_url,
            &config.enhancer_api_key,
            &config.enhancer_model,
        )
        .expect("Failed to initialize prompt enhancer"),
    );
    let accounts = Arc::new(PgAccountService::new(db_pool, &config.jwt_secret));
    let tracker = Arc::new(
        HttpEventTracker::new(config.analytics_url.clone(), config.analytics_token.clone())
            .expect("Failed to initialize analytics tracker"),
    );
    let alerts = Arc::new(
        SlackNotifier::new(config.slack_webhook_url.clone())
            .expect("Failed to initialize Slack notifier"),
    );

    let orchestrator = GenerationOrchestrator::new(
        store.clone(),
        provider.clone(),
        enhancer,
        accounts.clone(),
        config.generation_settings(),
    );
    let relay = WebhookRelay::new(store.clone(), tracker, alerts, accounts.clone());
    let dispatcher = QueueDispatcher::new(
        store.clone(),
        queue,
        provider,
        config.webhook_public_url.clone(),
    );

    // Create shared application state
    let state = AppState::new(store, accounts, orchestrator, relay, dispatcher);
    let metrics_state = MetricsState {
        handle: prometheus_handle,
        dispatcher: state.dispatcher.clone(),
    };

    let app = routes::router(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(metrics_state),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(1024 * 1024)); // 1 MB limit

    tracing::info!("Starting imagegen-relay on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .await
        .expect("Server error");
}
