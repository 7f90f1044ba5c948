//! Daily Brief service entrypoint.
//! Boots the scheduler loop and serves the admin/read API plus `/metrics` through Shuttle.

use shuttle_axum::ShuttleAxum;

use daily_brief::metrics::Metrics;
use daily_brief::{build_scheduler_from_env, init_tracing, router, AppState};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let metrics = Metrics::init().map_err(shuttle_runtime::Error::Custom)?;
    let scheduler = build_scheduler_from_env().map_err(shuttle_runtime::Error::Custom)?;

    let _loop = scheduler.clone().spawn();
    tracing::info!("scheduler started");

    let app = router(AppState::new(scheduler)).merge(metrics.router());
    Ok(app.into())
}
