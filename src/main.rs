//! fediwiki binary entry point

use fediwiki::{AppState, config};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application entry point
///
/// # Setup
/// 1. Initialize tracing/logging
/// 2. Load configuration from file and environment
/// 3. Initialize AppState
/// 4. Build Axum router
/// 5. Replay unfinished inbox work in the background
/// 6. Start HTTP server
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize tracing/logging
    let log_format =
        std::env::var("FEDIWIKI__LOGGING__FORMAT").unwrap_or_else(|_| "pretty".to_string());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "fediwiki=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| "fediwiki=info,tower_http=debug".into()),
            )
            .with(tracing_subscriber::fmt::layer().pretty())
            .init();
    }

    tracing::info!("Starting fediwiki...");

    // 2. Initialize metrics
    fediwiki::metrics::init_metrics();
    let started = std::time::Instant::now();

    // 3. Load configuration
    let config = config::AppConfig::load()?;
    tracing::info!(
        domain = %config.server.domain,
        storage = %config.storage.root.display(),
        pages = config.pages.bootstrap.len(),
        "Configuration loaded"
    );

    // 4. Initialize application state
    let state = AppState::new(config.clone()).await?;

    // 5. Build Axum router
    let app = fediwiki::build_router(state.clone());

    // 6. Start background tasks
    spawn_replay_task(state.clone());
    spawn_uptime_task(started);

    // 7. Start HTTP server
    let addr = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);
    tracing::info!("Public URL: {}", config.server.base_url());

    axum::serve(listener, app).await?;

    Ok(())
}

/// Replay stored Follow/Undo objects left unprocessed by a previous run
fn spawn_replay_task(state: AppState) {
    tokio::spawn(async move {
        let summary = state.replay_unprocessed().await;
        if summary.failed > 0 {
            tracing::warn!(
                replayed = summary.replayed,
                failed = summary.failed,
                "Some unprocessed objects could not be replayed"
            );
        }
    });

    tracing::info!("Replay task spawned");
}

fn spawn_uptime_task(started: std::time::Instant) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(15));
        loop {
            interval.tick().await;
            fediwiki::metrics::APP_UPTIME_SECONDS.set(started.elapsed().as_secs_f64());
        }
    });
}
