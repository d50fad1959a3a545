#![allow(dead_code)]

use std::sync::Arc;

use serde_json::Value;
use syncengine::{EngineConfig, SyncOrchestrator};
use syncstore::{config::StoreConfig, models::IntegrationConfig, SyncStore};
use tempfile::TempDir;
use wiremock::MockServer;

/// A temporary store plus a mock upstream API.
pub struct TestEnv {
    pub store: Arc<SyncStore>,
    pub server: MockServer,
    _dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let store = SyncStore::new(StoreConfig::new(dir.path())).await?;
        let server = MockServer::start().await;
        Ok(Self {
            store: Arc::new(store),
            server,
            _dir: dir,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.server.uri(), path)
    }

    /// Registers an integration pointing at `path` on the mock server.
    pub fn register(&self, id: &str, path: &str, mappings: Value) -> anyhow::Result<IntegrationConfig> {
        let mut integration = IntegrationConfig::new(id, self.endpoint(path));
        integration.field_mappings = serde_json::from_value(mappings)?;
        self.store.catalog.upsert_integration(&integration)?;
        Ok(integration)
    }

    pub fn save(&self, integration: &IntegrationConfig) -> anyhow::Result<()> {
        self.store.catalog.upsert_integration(integration)?;
        Ok(())
    }

    pub fn orchestrator(&self, config: EngineConfig) -> SyncOrchestrator {
        SyncOrchestrator::from_store(&self.store, config)
    }
}
