mod app;
mod block_font;

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    sync::{Arc, Mutex},
};

use busboard_core::{
    bootstrap,
    calendar::{CalendarSource, IcsCalendar},
    config::{self, AppConfig},
    reconcile::ReconcileEngine,
    scheduler::RefreshScheduler,
    storage::FileStorage,
    store::StopStore,
    transit::{DataGoKrClient, TransitSource},
    weather::WeatherClient,
};
use chrono::Local;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    init_logging()?;

    let config_path = config::ensure_default_config()?;
    let config = AppConfig::load()?;
    info!(config = %config_path.display(), data = %config.data_dir.display(), "configuration loaded");

    let storage = FileStorage::new(config.data_dir.clone());
    let store = StopStore::load(&storage)?;

    let source: Arc<dyn TransitSource> = Arc::new(DataGoKrClient::new(&config)?);
    let engine = ReconcileEngine::new(Arc::clone(&source));

    let weather = WeatherClient::new(&config)?;
    let calendar = config.calendar_path.clone().map(IcsCalendar::new);
    let surroundings = bootstrap::gather(
        &config,
        source.as_ref(),
        &weather,
        calendar.as_ref().map(|calendar| calendar as &dyn CalendarSource),
        Local::now().naive_local(),
    )
    .await;

    let triggers = RefreshScheduler::new(config.refresh_interval()).spawn();

    let mut app = app::BusboardApp::new(config, store, storage, engine, surroundings);
    app.attach_scheduler(triggers);
    app.run().await
}

fn init_logging() -> Result<()> {
    let log_dir = std::env::current_dir()?.join("logs");
    fs::create_dir_all(&log_dir)?;
    let log_path = log_dir.join("busboard.log");
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open {}", log_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    // The terminal belongs to the dashboard, so logs only go to the file.
    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(Mutex::new(log_file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    Ok(())
}
