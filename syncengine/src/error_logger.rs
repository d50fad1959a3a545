use serde_json::Value;
use std::sync::Arc;
use syncstore::models::{ErrorCategory, NewSyncError};
use syncstore::stores::AuditLog;
use tracing::warn;
use uuid::Uuid;

/// Writes one audit entry per failed record of a run.
#[derive(Clone)]
pub struct ErrorLogger {
    audit: Arc<dyn AuditLog>,
    run_id: Uuid,
    integration_id: String,
}

impl ErrorLogger {
    pub fn new(audit: Arc<dyn AuditLog>, run_id: Uuid, integration_id: impl Into<String>) -> Self {
        Self {
            audit,
            run_id,
            integration_id: integration_id.into(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Persists the failure. A failing audit write is logged and swallowed so
    /// it cannot abort the batch.
    pub async fn log(
        &self,
        category: ErrorCategory,
        message: String,
        entity_type: Option<&str>,
        raw_record: &Value,
    ) {
        let entry = NewSyncError {
            integration_id: self.integration_id.clone(),
            category,
            message,
            entity_type: entity_type.map(str::to_string),
            raw_record: raw_record.clone(),
        };

        if let Err(err) = self.audit.append_error(self.run_id, entry).await {
            warn!(
                run_id = %self.run_id,
                integration_id = %self.integration_id,
                error = %err,
                "failed to persist sync error"
            );
        }
    }
}
