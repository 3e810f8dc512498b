//! Storage backends.

pub mod memory;
pub mod pg;

use std::sync::Arc;

use anyhow::Result;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use tracing::info;

use crate::{
    app::{
        config::{Config, StorageBackend},
        db,
    },
    auth::UserStore,
    carts::CartStore,
    catalog::Catalog,
    orders::OrderStore,
    sessions::SessionStore,
};

/// Migrations embedded into the binary which helps with streamlining image building process
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Everything the storefront persists.
pub trait Store: CartStore + SessionStore + Catalog + UserStore + OrderStore {}

impl<T> Store for T where T: CartStore + SessionStore + Catalog + UserStore + OrderStore {}

/// Opens the configured backend, migrating Postgres first.
pub async fn open(config: &Config) -> Result<Arc<dyn Store>> {
    match config.storage {
        StorageBackend::Postgres => {
            info!("Running migrations...");
            let migrations_count =
                db::run_migrations_blocking(MIGRATIONS, &config.database.url).await?;
            info!("Run {} new migrations successfully", migrations_count);

            let pool = db::create_pool(&config.database).await?;
            Ok(Arc::new(pg::PgStore::new(pool)))
        }
        StorageBackend::Memory => {
            info!("Using the in-memory store with a demo catalog");
            Ok(Arc::new(memory::MemoryStore::with_demo_catalog()))
        }
    }
}
