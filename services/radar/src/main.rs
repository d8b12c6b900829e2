use anyhow::{Context, Result};
use radar_service::api::{start_api_server, AppState};
use radar_service::config::Config;
use radar_service::credentials::{CredentialStore, ElasticsearchUserStore};
use radar_service::ingest::PostIngestor;
use radar_service::media::HttpImageScorer;
use radar_service::post_index::{self, ElasticsearchPostIndex};
use radar_service::search::SearchService;
use radar_service::token::TokenService;
use radar_service::{ledger, S3BlobStore};
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting Radar Service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Search engine; both indices must exist before any traffic is served
    let es_client =
        post_index::connect(&config.elasticsearch).context("Failed to build Elasticsearch client")?;
    let post_index = Arc::new(ElasticsearchPostIndex::new(
        es_client.clone(),
        &config.elasticsearch,
    ));
    post_index
        .bootstrap()
        .await
        .context("Failed to bootstrap Elasticsearch indices")?;

    let user_store = Arc::new(ElasticsearchUserStore::new(
        es_client,
        config.elasticsearch.user_index.clone(),
    ));

    let blob_store = Arc::new(S3BlobStore::new(&config.s3).await);

    let scorer = Arc::new(
        HttpImageScorer::new(&config.scoring).context("Failed to initialize image scorer")?,
    );

    let ledger = ledger::from_config(&config.ledger).context("Failed to initialize ledger")?;

    let tokens = Arc::new(TokenService::new(
        config.auth.signing_secret.as_bytes(),
        config.token_ttl(),
    ));

    let state = AppState {
        tokens,
        credentials: Arc::new(CredentialStore::new(user_store)),
        ingestor: Arc::new(PostIngestor::new(
            scorer,
            blob_store,
            post_index.clone(),
            ledger,
        )),
        search: Arc::new(SearchService::new(post_index.clone())),
        index: post_index,
    };

    info!("Radar service started successfully");

    start_api_server(state, &config.api, shutdown_signal()).await?;

    info!("Radar service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
