/*****************************************************************************************
 *
 *  pairkv – Key–Value Microservice with read-write / read-only key pairs
 *  ----------------------------------------------------------------------
 *
 *  SQLite record table, lazy eviction (startup + request triggered, debounced)
 *
 *****************************************************************************************/

mod app;
mod config;
mod errors;
mod routes;
mod services;
mod state;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use axum::serve;
use tokio::net::TcpListener;

use tracing::level_filters::LevelFilter;
use tracing_subscriber::FmtSubscriber;

use crate::config::AppConfig;
use crate::services::rate_limit::RateLimits;
use crate::services::sweeper::Sweeper;
use crate::state::app::AppState;
use crate::state::store::RecordStore;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("pairkv: {e}");
        tracing::error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    //
    // ────────────────────────────────────────────────────────
    //  Locate config.json (EXE folder, its parent, or CWD)
    //  Missing file is fine: defaults + environment apply.
    // ────────────────────────────────────────────────────────
    //
    let config_path = locate_config();

    //
    // ────────────────────────────────────────────────────────
    //  Load configuration
    // ────────────────────────────────────────────────────────
    //
    let cfg = AppConfig::load(config_path.as_deref())?;

    //
    // ────────────────────────────────────────────────────────
    //  Configure logging
    // ────────────────────────────────────────────────────────
    //
    let level = match cfg.log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::TRACE,
        "debug" => LevelFilter::DEBUG,
        "info"  => LevelFilter::INFO,
        "warn"  => LevelFilter::WARN,
        "error" => LevelFilter::ERROR,
        _ => LevelFilter::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    tracing::info!("Starting pairkv…");
    match &config_path {
        Some(path) => tracing::info!("Loaded config.json from {}", path.display()),
        None => tracing::info!("No config.json found, using defaults and environment"),
    }
    tracing::debug!("Configuration: {:?}", cfg);

    //
    // ────────────────────────────────────────────────────────
    //  Open the record store
    // ────────────────────────────────────────────────────────
    //
    let store = RecordStore::open(Path::new(&cfg.database_path), cfg.dangerous_delete_table)?;
    let keys = store.unit_of_work(|uow| uow.count()).await?;
    tracing::info!("Record store ready at {} ({} keys)", cfg.database_path, keys);

    let sweeper = Sweeper::from_config(store.clone(), &cfg)?;
    let limits = RateLimits::from_config(&cfg)?;
    let port = cfg.port;
    let state = AppState::new(store, sweeper, limits, cfg);

    //
    // ────────────────────────────────────────────────────────
    //  Build Axum app (key + system routes)
    // ────────────────────────────────────────────────────────
    //
    let app = app::build_app(state.clone());

    //
    // ────────────────────────────────────────────────────────
    //  Bind server and start listening
    // ────────────────────────────────────────────────────────
    //
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    tracing::info!("Listening on http://{}", addr);

    //
    // ────────────────────────────────────────────────────────
    //  Delete unaccessed keys once at startup
    // ────────────────────────────────────────────────────────
    //
    {
        let sweeper = state.sweeper.clone();
        tokio::spawn(async move {
            sweeper.startup().await;
        });
    }

    // Peer addresses feed the per-client rate limits.
    serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown())
        .await?;

    tracing::info!("Goodbye.");
    Ok(())
}

fn locate_config() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.push(exe_dir.join("config.json"));
            candidates.push(exe_dir.join("..").join("config.json"));
        }
    }
    candidates.push(PathBuf::from("config.json"));

    candidates.into_iter().find(|p| p.exists())
}

//
// ─────────────────────────────────────────────────────────────
//  Graceful shutdown handler
// ─────────────────────────────────────────────────────────────
//
async fn shutdown() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {e}");
        std::future::pending::<()>().await;
    }

    tracing::warn!("CTRL+C received — shutting down…");
}
