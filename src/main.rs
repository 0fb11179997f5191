use std::net::SocketAddr;
use std::sync::Arc;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use gitscribe::config::Config;
use gitscribe::processor::BatchProcessor;
use gitscribe::sink::LoggingSink;
use gitscribe::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let config = Config::from_env().expect("Failed to load configuration");

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    tracing::info!("Starting gitscribe");

    let pool = gitscribe::db::connect(&config.database_url)
        .await
        .expect("Failed to open database");

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("Failed to run migrations");

    tracing::info!("Migrations applied");

    // The Git-backed sink is deployment wiring; the daemon defaults to the
    // logging sink so it can run without remote credentials.
    let processor = Arc::new(BatchProcessor::new(
        pool.clone(),
        config.queue.clone(),
        Arc::new(LoggingSink),
    ));
    processor.initialize().await?;
    processor.start().await;

    let addr = SocketAddr::new(config.host, config.port);
    let state = Arc::new(AppState {
        pool,
        config,
        processor: processor.clone(),
    });
    let app = gitscribe::build_app(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    processor.stop(true).await;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
