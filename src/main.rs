//! Application entry point for the `linewatch` backend service.
//!
//! `linewatch` runs the long-lived service:
//! - Loading configuration from environment variables or `.env`
//! - Initializing structured logging/tracing
//! - Establishing a PostgreSQL connection pool
//! - Creating the readings and audit tables if they do not exist
//! - Starting the background temperature simulator
//! - Serving the read-only API and the manual forecast trigger
//!
//! `linewatch forecast` regenerates every line's forecast table once and
//! exits.
//!
//! # Environment Variables
//! - `DATABASE_URL` (**required**) – PostgreSQL connection string
//! - `LINEWATCH_LOG_LEVEL` (optional) – log verbosity (default: `debug`)
//! - `LINEWATCH_SPAN_EVENTS` (optional) – span event mode for tracing
//!
//! See `config.rs` for the full list.
use std::{env, io::IsTerminal, net::SocketAddr, sync::Arc};

use axum::Router;
use dotenvy::dotenv;
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

use anyhow::{anyhow, Result};

mod config;
mod error;
mod forecast;
mod generator;
mod models;
mod routes;
mod schema;
mod sensors;
mod simulator;
mod store;

use forecast::{CommandModelLoader, ForecastBatchJob, ForecastModelStore, LineOutcome};
use simulator::TemperatureSimulator;
use store::PgStore;

// ---

#[tokio::main]
async fn main() -> Result<()> {
    // ---
    init_tracing();
    dotenv().ok();

    let cfg = config::load_from_env()?;
    cfg.log_config();

    tracing::info!("Attempting to connect to database");

    let pool = PgPoolOptions::new()
        .max_connections(cfg.db_pool_max)
        .connect(&cfg.db_url)
        .await
        .map_err(|e| anyhow!("Failed to connect to database: {}", e))?;

    tracing::info!("Successfully connected to database");

    let ranges = Arc::new(cfg.ranges.clone());
    schema::create_schema(&pool, &ranges).await?;

    let store = PgStore::new(pool.clone(), ranges.clone());
    let loader = CommandModelLoader::from_command_line(&cfg.forecast_predictor)
        .ok_or_else(|| anyhow!("FORECAST_PREDICTOR must not be empty"))?;
    let job = Arc::new(ForecastBatchJob::new(
        store.clone(),
        ForecastModelStore::new(cfg.model_storage_path.clone(), Arc::new(loader)),
        cfg.forecast_horizon,
        ranges.clone(),
    ));

    if env::args().nth(1).as_deref() == Some("forecast") {
        return run_forecast_once(&job).await;
    }

    let cancel = CancellationToken::new();
    let simulator = cfg.simulator_enabled.then(|| {
        let sim = Arc::new(TemperatureSimulator::new(
            ranges.clone(),
            cfg.simulator,
            Arc::new(store.clone()),
            cancel.clone(),
        ));
        sim.start();
        sim
    });

    let app: Router = routes::router(routes::AppState {
        store,
        job,
        simulator,
    });

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;

    Ok(())
}

/// One-shot batch run; fails the process only if every processed line failed.
async fn run_forecast_once(job: &ForecastBatchJob<PgStore>) -> Result<()> {
    // ---
    let report = job.generate_and_store_forecasts().await;
    for line in &report.lines {
        tracing::info!("{}: {:?}", line.line, line.outcome);
    }

    let failed = report
        .lines
        .iter()
        .filter(|l| matches!(l.outcome, LineOutcome::Failed { .. }))
        .count();
    let attempted = report
        .lines
        .iter()
        .filter(|l| l.outcome != LineOutcome::Skipped)
        .count();
    if attempted > 0 && failed == attempted {
        return Err(anyhow!("Forecast generation failed for every line"));
    }
    Ok(())
}

/// Resolve on Ctrl-C, cancelling the simulator first.
async fn shutdown_signal(cancel: CancellationToken) {
    // ---
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        // keep serving; the simulator keeps running too
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown requested");
    cancel.cancel();
}

/// Install the fmt subscriber.
///
/// `RUST_LOG` wins over `LINEWATCH_LOG_LEVEL` (default `info`). Per-query
/// sqlx logging is held at `warn` since the simulator inserts every tick.
/// `LINEWATCH_SPAN_EVENTS=full` also prints span enter/exit, which shows
/// per-line forecast timing; `FORCE_COLOR` overrides TTY detection.
fn init_tracing() {
    // ---
    let span_events = match env::var("LINEWATCH_SPAN_EVENTS").as_deref() {
        Ok("full") => FmtSpan::FULL,
        _ => FmtSpan::CLOSE,
    };

    let use_color = match env::var("FORCE_COLOR").as_deref() {
        Ok("1") | Ok("true") => true,
        Ok("0") | Ok("false") => false,
        _ => std::io::stdout().is_terminal(),
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = env::var("LINEWATCH_LOG_LEVEL").unwrap_or_else(|_| "info".into());
        EnvFilter::try_new(format!("{level},sqlx::query=warn"))
            .unwrap_or_else(|_| EnvFilter::new("info,sqlx::query=warn"))
    });

    tracing_subscriber::fmt()
        .with_target(true)
        .with_line_number(true)
        .with_span_events(span_events)
        .with_env_filter(env_filter)
        .with_ansi(use_color)
        .compact()
        .init();
}
