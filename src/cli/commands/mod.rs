pub mod bootstrap;
pub mod serve;

use std::sync::Arc;

use anyhow::bail;

use crate::config::{AppConfig, Environment};
use crate::database::{MemoryStore, PgStore, Store};

/// Postgres when `DATABASE_URL` is set; the in-memory store otherwise, and
/// only in development.
pub async fn open_store(config: &AppConfig) -> anyhow::Result<Arc<dyn Store>> {
    if config.database.url.is_some() {
        let store = PgStore::connect(&config.database).await?;
        store.migrate().await?;
        return Ok(Arc::new(store));
    }

    if config.environment != Environment::Development {
        bail!("DATABASE_URL must be set outside development");
    }
    tracing::warn!("DATABASE_URL not set, using the in-memory store; data is lost on exit");
    Ok(Arc::new(MemoryStore::new()))
}
