use anyhow::{Context, Result};
use rollcall_core::{Gallery, GalleryHandle};
use rollcall_store::{FailoverStore, MemoryStore, SqliteStore, StoreBackend};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod abuse;
mod config;
mod dbus_interface;
mod engine;
mod extractor;
mod ledger;
mod outcome;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");
    let config = config::Config::load();

    // Store opens first; an unavailable store degrades to non-persistent
    // mode rather than aborting startup.
    let backend = match SqliteStore::open(&config.db_path).await {
        Ok(store) => StoreBackend::Sqlite(store),
        Err(err) => {
            tracing::warn!(
                path = %config.db_path.display(),
                %err,
                "store unavailable; running in non-persistent mode"
            );
            StoreBackend::Memory(MemoryStore::new())
        }
    };
    let store = Arc::new(FailoverStore::new(backend));

    // Gallery load is fail-fast: a daemon without identities cannot serve.
    let gallery = Gallery::load(&config.gallery_path).with_context(|| {
        format!("failed to load gallery from {}", config.gallery_path.display())
    })?;
    let gallery = GalleryHandle::new(gallery);

    // No landmark locator capability is wired in this build, so the chain
    // resolves from {movement, combined} unless configured otherwise.
    let detector = rollcall_core::select_detector(&config.chain_config(), None);

    let connection = zbus::connection::Builder::session()?
        .name("org.rollcall.Attendance1")?
        .build()
        .await
        .context("failed to connect to the session bus")?;

    let extractor = extractor::DbusExtractor::connect(&connection)
        .await
        .context("failed to set up extractor client")?;

    let engine = Arc::new(engine::ScanEngine::new(
        gallery,
        detector,
        ledger::AttendanceLedger::new(store.clone(), config.store_timeout()),
        abuse::AbuseGuard::new(config.abuse_config()),
        extractor,
        config.match_threshold,
        config.extract_timeout(),
    ));

    tracing::info!(
        gallery_entries = engine.gallery().snapshot().len(),
        detector = engine.detector_name(),
        store_mode = store.mode(),
        match_threshold = config.match_threshold,
        "engine ready"
    );

    let service =
        dbus_interface::AttendanceService::new(engine, config.gallery_path.clone());
    connection
        .object_server()
        .at("/org/rollcall/Attendance1", service)
        .await
        .context("failed to register D-Bus object")?;

    tracing::info!("rollcalld ready");

    tokio::signal::ctrl_c().await?;
    tracing::info!("rollcalld shutting down");

    Ok(())
}
