use std::sync::Arc;
use std::time::Duration;

use axum::http::Method;
use clap::Parser;
use hilite::capture::Exporter;
use hilite::config::{Cli, Config, default_config_dir, default_config_path};
use hilite::db::Database;
use hilite::handler::AppState;
use hilite::session::{SessionContext, SessionSettings};
use hilite::unpack_error;
use tokio::signal;
use tower_http::cors::{Any, CorsLayer};
use tracing_subscriber::EnvFilter;

/// Time given to autosave tasks to flush after shutdown is requested.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(250);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let args = Cli::parse();

    // With --config the data lives next to the config file, otherwise in ~/.hilite/
    let (config_path, data_dir) = match args.config_path {
        Some(path) => {
            let path = std::path::PathBuf::from(path);
            let dir = path
                .parent()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| std::path::PathBuf::from("."));
            (path, dir)
        }
        None => (default_config_path(), default_config_dir()),
    };

    if let Err(e) = std::fs::create_dir_all(&data_dir) {
        eprintln!("failed to create data directory {:?}: {}", data_dir, e);
        std::process::exit(1);
    }

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    tracing::info!("hilite.svc starting");

    let cfg = if config_path.exists() {
        Config::new(&config_path.to_string_lossy()).unwrap_or_else(|e| {
            tracing::error!(error = %e, path = ?config_path, "failed to load config file");
            std::process::exit(1);
        })
    } else {
        tracing::info!(path = ?config_path, "no config file, using defaults");
        Config::default()
    };
    let db = Arc::new(Database::new(&cfg, &data_dir).await.unwrap_or_else(|e| {
        tracing::error!(error = %unpack_error(&*e), "failed to setup database");
        std::process::exit(1);
    }));

    let ctx = SessionContext::new(
        db,
        Exporter::from_config(&cfg.export),
        SessionSettings::from(&cfg.highlighter),
    );
    let cancellation_token = ctx.cancel.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers(Any);

    let app = hilite::app(AppState::new(ctx)).layer(cors);

    let address = format!("0.0.0.0:{}", cfg.app.get_port());
    let listener = tokio::net::TcpListener::bind(&address).await.unwrap_or_else(|e| {
        tracing::error!(error = %e, "failed to setup tcp listener");
        std::process::exit(1);
    });

    tracing::info!("hilite.svc running on {}", &address);
    tokio::select! {
        result = axum::serve(listener, app) => {
            if let Err(err) = result {
                tracing::error!(error = %err, "server stopped");
                std::process::exit(1);
            }
        }
        _ = signal::ctrl_c() => {
            tracing::info!("ctrl+c signal received, preparing to shutdown");
            cancellation_token.cancel();
        }
    }

    tokio::time::sleep(SHUTDOWN_GRACE).await;
    tracing::info!("hilite.svc going off, graceful shutdown complete");
}
