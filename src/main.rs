//! Signal ingest service: binary entrypoint.
//! Opens the rolling store, starts the scheduler and serves the operator API.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use signal_ingest::api::{create_router, AppState};
use signal_ingest::ingest::scheduler::spawn_scheduler;
use signal_ingest::metrics::Metrics;
use signal_ingest::{PipelineRunner, Settings, SqliteStore};

/// `RUST_LOG` filter (default `info`); `LOG_FORMAT=json` for JSON lines.
/// The deployment runtime may already own the global subscriber, so this is best effort.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        info!("tracing subscriber already installed");
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let settings = Settings::load_default();
    let store = SqliteStore::connect(&settings.storage.db_path)
        .await
        .with_context(|| format!("opening {}", settings.storage.db_path.display()))?;

    let scheduler_enabled = settings.scheduler.enabled;
    let runner = Arc::new(PipelineRunner::new(settings, store)?);
    if scheduler_enabled {
        spawn_scheduler(Arc::clone(&runner));
    } else {
        info!("scheduler disabled; runs only via POST /run");
    }

    let mut router = create_router(AppState::new(runner));
    match Metrics::init() {
        Ok(m) => router = router.merge(m.router()),
        Err(e) => warn!(error = %e, "prometheus recorder not installed; /metrics disabled"),
    }

    Ok(router.into())
}
