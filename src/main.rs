// SPDX-FileCopyrightText: 2025 Hyperpolymath
// SPDX-License-Identifier: PMPL-1.0-or-later

//! Proxy Log Monitor Service
//!
//! Pulls access logs from the proxy admin API on a fixed interval and serves
//! the aggregated view to the bundled front end.
//!
//! ## Configuration
//!
//! State lives in the data directory (`MONITOR_DATA_DIR`, default `data`).
//! `config.json` in that directory is generated on first start; every key
//! can be overridden from the environment:
//!
//! - `MONITOR_LUCKY_URL`: admin API base URL
//! - `MONITOR_OPEN_TOKEN`: admin API token
//! - `MONITOR_SYNC_INTERVAL_MINUTES` / `MONITOR_SYNC_INTERVAL_SECONDS`: sync period
//! - `MONITOR_MAX_LOG_COUNT`: retained history size (default: 2000)
//! - `MONITOR_BIND_ADDR`: server bind address (default: 0.0.0.0:8001)

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use proxy_log_monitor::{
    config::Config,
    handlers::{router, AppState},
    pipeline::Pipeline,
    scheduler::Scheduler,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let data_dir = std::env::var("MONITOR_DATA_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("data"));
    let config = Config::load(&data_dir)?;
    let period = config.sync_period()?;
    info!(
        bind_addr = %config.bind_addr,
        data_dir = %config.data_dir.display(),
        period_secs = period.as_secs(),
        max_log_count = config.max_log_count,
        upstream_ready = config.upstream_ready(),
        "Starting proxy log monitor"
    );

    let pipeline = Arc::new(Pipeline::from_config(&config)?);

    let state = Arc::new(AppState {
        snapshot: pipeline.snapshot(),
        index_file: config.index_file.clone(),
        icon_file: config.icon_path(),
    });

    // Cold fetch runs on the scheduler's first tick
    let scheduler = Scheduler::new(pipeline, period).spawn();

    let app = router(state);

    // Start server
    let addr: SocketAddr = config.bind_addr.parse()?;
    let listener = TcpListener::bind(addr).await?;
    info!(addr = %addr, "Server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.abort();
    info!("Shut down");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
