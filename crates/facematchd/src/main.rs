use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod dbus_interface;
mod engine;

use dbus_interface::{FaceMatchService, BUS_NAME, OBJECT_PATH};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("facematchd starting");

    let config = config::Config::load()?;
    let engine = engine::spawn_engine(&config)?;

    let _connection = zbus::connection::Builder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, FaceMatchService::new(engine))?
        .build()
        .await?;

    tracing::info!(bus = BUS_NAME, path = OBJECT_PATH, "facematchd ready");

    // Keep running until signaled
    tokio::signal::ctrl_c().await?;
    tracing::info!("facematchd shutting down");

    Ok(())
}
