use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use kingz_cloud::scoring::HttpScoringOracle;
use kingz_cloud::signing::LinkSigner;
use kingz_cloud::storage::{BlobStore, LocalBlobStore, S3BlobStore};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use kingz_api::background::{
    analysis::AnalysisDispatcher, challenge_expiry, presence_sweep, upload_reclaim,
};
use kingz_api::auth::jwt::SessionKeys;
use kingz_api::config::{ServerConfig, StorageConfig};
use kingz_api::router::build_app_router;
use kingz_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kingz_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = kingz_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    kingz_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    kingz_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Token keys ---
    let session_keys = Arc::new(SessionKeys::new(&config.jwt));
    let link_signer = Arc::new(LinkSigner::new(config.jwt.secret.as_bytes()));

    // --- Blob storage ---
    let blob_store: Arc<dyn BlobStore> = match &config.storage {
        StorageConfig::Local { root, public_url } => {
            tracing::info!(root = %root.display(), %public_url, "Using local blob storage");
            Arc::new(LocalBlobStore::new(
                root.clone(),
                public_url,
                Arc::clone(&link_signer),
            ))
        }
        StorageConfig::S3 { bucket } => {
            tracing::info!(%bucket, "Using S3 blob storage");
            Arc::new(S3BlobStore::from_env(bucket.clone()).await)
        }
    };

    // --- Scoring oracle ---
    let oracle = HttpScoringOracle::new(
        config.analysis.api_url.clone(),
        config.analysis.api_key.clone(),
    )
    .expect("Failed to build scoring API client");

    // --- Background tasks ---
    let cancel = CancellationToken::new();
    let analysis_wakeup = Arc::new(Notify::new());

    let dispatcher = AnalysisDispatcher::new(
        pool.clone(),
        Arc::clone(&blob_store),
        Arc::new(oracle),
        Arc::clone(&analysis_wakeup),
        &config.analysis,
    );
    let dispatcher_cancel = cancel.clone();
    let dispatcher_handle = tokio::spawn(async move {
        dispatcher.run(dispatcher_cancel).await;
    });

    let sweep_handle = tokio::spawn(presence_sweep::run(
        pool.clone(),
        Duration::from_secs(config.presence_sweep_interval_secs),
        cancel.clone(),
    ));
    let expiry_handle = tokio::spawn(challenge_expiry::run(
        pool.clone(),
        Duration::from_secs(config.challenge_sweep_interval_secs),
        cancel.clone(),
    ));
    let reclaim_handle = tokio::spawn(upload_reclaim::run(
        pool.clone(),
        Duration::from_secs(config.upload_sweep_interval_secs),
        Duration::from_secs(config.upload_reservation_timeout_secs),
        cancel.clone(),
    ));
    tracing::info!(
        "Background tasks started (analysis, presence sweep, challenge expiry, upload reclaim)"
    );

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        session_keys,
        blob_store,
        link_signer,
        analysis_wakeup,
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    cancel.cancel();
    for handle in [dispatcher_handle, sweep_handle, expiry_handle, reclaim_handle] {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }
    tracing::info!("Background tasks stopped");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager.
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
