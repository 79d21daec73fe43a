use std::sync::atomic::Ordering;

use anyhow::Context;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use tracing::info;
use tracing_subscriber::EnvFilter;

use news_monitor::config::Config;
use news_monitor::handlers;
use news_monitor::services::start_housekeeping_task;
use news_monitor::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::load().context("Failed to load configuration")?;
    init_tracing(&config);

    info!("Starting news-monitor");

    // store: connect, create on first start, migrate
    let connect_options: SqliteConnectOptions = config
        .database
        .url
        .parse::<SqliteConnectOptions>()
        .context("Invalid database URL")?
        .create_if_missing(true);
    let pool = SqlitePoolOptions::new()
        .max_connections(8)
        .connect_with(connect_options)
        .await
        .context("Failed to open database")?;
    sqlx::migrate!().run(&pool).await.context("Failed to run migrations")?;

    let (state, workers) = AppState::build(config.clone(), pool);

    // the in-memory vector indexes rebuild from the store
    state.paraphrase_index.load().await?;
    state.retrieval_index.load().await?;

    // long-lived workers
    tokio::spawn(workers.classifier.run(workers.classifier_rx));
    tokio::spawn(workers.llm.run(workers.fresh_rx));

    let housekeeping_shutdown = start_housekeeping_task(
        state.housekeeping.clone(),
        config.housekeeping.hour,
    );

    if config.scheduler.enabled {
        state.scheduler.start();
    } else {
        info!("Fetch scheduler disabled by configuration");
    }

    // REST surface
    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("Listening on {}", addr);

    let scheduler = state.scheduler.clone();
    axum::serve(listener, handlers::router(state))
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            info!("Shutdown signal received");
            scheduler.stop();
            housekeeping_shutdown.store(true, Ordering::Relaxed);
        })
        .await
        .context("Server error")?;

    info!("news-monitor stopped");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.clone()));

    match &config.logging.file {
        Some(path) => {
            let path = std::path::Path::new(path);
            let directory = path.parent().unwrap_or_else(|| std::path::Path::new("."));
            let file_name =
                path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| {
                    "news-monitor.log".to_string()
                });
            let appender = tracing_appender::rolling::daily(directory, file_name);
            tracing_subscriber::fmt().with_env_filter(filter).with_writer(appender).init();
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
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
}
