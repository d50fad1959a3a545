use std::sync::Arc;

use syncstore::{config::StoreConfig, SyncStore};
use tempfile::TempDir;

#[allow(dead_code)]
pub struct TestContext {
    pub temp_dir: TempDir,
    pub store: Arc<SyncStore>,
}

pub async fn init_test_context() -> anyhow::Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let store = SyncStore::new(StoreConfig::new(temp_dir.path())).await?;
    Ok(TestContext {
        temp_dir,
        store: Arc::new(store),
    })
}
