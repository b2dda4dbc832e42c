use std::path::PathBuf;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use pitchbook::auth::TokenRegistry;
use pitchbook::engine::SlotGrid;
use pitchbook::http::{self, AppState};
use pitchbook::model::TimeOfDay;
use pitchbook::tenant::TenantManager;

fn env_time(var: &str, default: TimeOfDay) -> TimeOfDay {
    std::env::var(var)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let metrics_port: Option<u16> = std::env::var("PITCHBOOK_METRICS_PORT")
        .ok()
        .and_then(|s| s.parse().ok());
    pitchbook::observability::init(metrics_port);

    let port = std::env::var("PITCHBOOK_PORT").unwrap_or_else(|_| "8080".into());
    let bind = std::env::var("PITCHBOOK_BIND").unwrap_or_else(|_| "0.0.0.0".into());
    let data_dir = std::env::var("PITCHBOOK_DATA_DIR").unwrap_or_else(|_| "./data".into());
    let tokens = std::env::var("PITCHBOOK_TOKENS").unwrap_or_else(|_| "pitchbook:admin:admin".into());
    let compact_threshold: u64 = std::env::var("PITCHBOOK_COMPACT_THRESHOLD")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(1000);

    let defaults = SlotGrid::default();
    let grid = SlotGrid {
        open: env_time("PITCHBOOK_OPEN_TIME", defaults.open),
        close: env_time("PITCHBOOK_CLOSE_TIME", defaults.close),
        slot_minutes: std::env::var("PITCHBOOK_SLOT_MINUTES")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.slot_minutes),
        stride_minutes: std::env::var("PITCHBOOK_SLOT_STRIDE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.stride_minutes),
    };

    let tokens = TokenRegistry::parse(&tokens).map_err(std::io::Error::other)?;

    // Ensure data directory exists
    std::fs::create_dir_all(&data_dir)?;

    let state = AppState {
        tenants: Arc::new(TenantManager::new(
            PathBuf::from(&data_dir),
            compact_threshold,
            grid,
        )),
        tokens: Arc::new(tokens),
    };

    let addr = format!("{bind}:{port}");
    let listener = TcpListener::bind(&addr).await?;
    info!("pitchbook listening on {addr}");
    info!("  data_dir: {data_dir}");
    info!("  operating hours: {}-{}", grid.open, grid.close);
    info!(
        "  metrics: {}",
        metrics_port.map_or("disabled".to_string(), |p| format!(
            "http://0.0.0.0:{p}/metrics"
        ))
    );

    // Graceful shutdown: stop accepting on SIGTERM/ctrl-c, drain in-flight requests
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("failed to register SIGTERM handler");
            tokio::select! {
                _ = ctrl_c => {}
                _ = sigterm.recv() => {}
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
        }
        info!("shutdown signal received");
    };

    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("pitchbook stopped");
    Ok(())
}
