pub mod catalog;
pub mod config;
pub mod errors;
pub mod models;
pub mod records;
pub mod stores;

use crate::catalog::Catalog;
use crate::config::StoreConfig;
use crate::errors::Result;
use crate::records::SqliteRecordStore;
use std::sync::Arc;

/// Persistence layer of the sync engine.
///
/// `SyncStore` bundles the stores a sync run touches:
/// - A `Catalog` holding integration definitions, run rows and the error log.
/// - A `SqliteRecordStore` holding the normalized target collections.
///
/// # Example
///
/// ```rust,no_run
/// use syncstore::{SyncStore, config::StoreConfig};
/// use tempfile::tempdir;
///
/// #[tokio::main]
/// async fn main() {
///     let dir = tempdir().unwrap();
///     let store = SyncStore::new(StoreConfig::new(dir.path())).await.unwrap();
///     assert!(store.catalog.list_integrations().unwrap().is_empty());
/// }
/// ```
pub struct SyncStore {
    pub config: StoreConfig,
    pub catalog: Arc<Catalog>,
    pub records: Arc<SqliteRecordStore>,
}

impl SyncStore {
    /// Opens both databases under the configured paths, creating parent
    /// directories and schemas when missing.
    pub async fn new(config: StoreConfig) -> Result<Self> {
        for path in [&config.catalog_path, &config.records_path] {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let catalog = Arc::new(Catalog::new(&config)?);
        catalog.initialize_schema()?;

        let records = Arc::new(SqliteRecordStore::new(&config)?);
        records.initialize_schema()?;

        log::debug!(
            "Opened sync store (catalog: {}, records: {})",
            config.catalog_path.display(),
            config.records_path.display()
        );

        Ok(Self {
            config,
            catalog,
            records,
        })
    }
}
