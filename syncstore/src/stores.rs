//! Storage seams used by the sync engine.
//!
//! The SQLite-backed [`Catalog`](crate::catalog::Catalog) and
//! [`SqliteRecordStore`](crate::records::SqliteRecordStore) implement these;
//! tests substitute their own to inject failures.

use crate::errors::Result;
use crate::models::{IntegrationConfig, NewSyncError, NewSyncRun, NormalizedRecord, RunPatch};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait IntegrationStore: Send + Sync {
    async fn get_integration(&self, id: &str) -> Result<Option<IntegrationConfig>>;

    /// Stamps `last_sync_at` after a run that was not a total failure.
    async fn record_successful_sync(&self, id: &str, at: DateTime<Utc>) -> Result<()>;
}

#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Inserts or replaces `record` in `collection`, keyed on the value of `conflict_key`.
    ///
    /// Returns [`StoreError::Validation`](crate::errors::StoreError::Validation)
    /// when the record itself cannot be stored.
    async fn upsert(
        &self,
        collection: &str,
        record: &NormalizedRecord,
        conflict_key: &str,
    ) -> Result<()>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn create_run(&self, run: NewSyncRun) -> Result<Uuid>;

    async fn update_run(&self, run_id: Uuid, patch: RunPatch) -> Result<()>;

    async fn append_error(&self, run_id: Uuid, error: NewSyncError) -> Result<()>;
}
