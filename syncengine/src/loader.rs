use crate::error_logger::ErrorLogger;
use crate::mapper::FieldMapper;
use crate::router::Target;
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use syncstore::models::{ErrorCategory, FieldMappings};
use syncstore::stores::RecordStore;
use tracing::debug;

/// What to load and where.
#[derive(Debug, Clone, Copy)]
pub struct LoadPlan<'a> {
    pub entity_type: Option<&'a str>,
    /// `None` when the entity type has no route; every record is skipped.
    pub target: Option<&'a Target>,
    pub mappings: &'a FieldMappings,
    pub batch_size: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub success: u64,
    pub failed: u64,
    pub skipped: u64,
    pub batches: u64,
}

impl LoadSummary {
    pub fn processed(&self) -> u64 {
        self.success + self.failed + self.skipped
    }
}

#[derive(Default)]
struct Counters {
    success: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl Counters {
    fn summary(&self, batches: u64) -> LoadSummary {
        LoadSummary {
            success: self.success.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            batches,
        }
    }
}

/// Maps and upserts fetched records batch by batch. A failing record is
/// counted and logged, never propagated.
#[derive(Clone)]
pub struct BatchLoader {
    store: Arc<dyn RecordStore>,
    max_concurrency: usize,
}

impl BatchLoader {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            max_concurrency: 1,
        }
    }

    /// Upserts within one batch run concurrently, at most `limit` at a time.
    pub fn with_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = limit.max(1);
        self
    }

    pub async fn load(&self, records: &[Value], plan: &LoadPlan<'_>, errors: &ErrorLogger) -> LoadSummary {
        let counters = Counters::default();
        let mut batches = 0u64;

        for (index, batch) in records.chunks(plan.batch_size.max(1)).enumerate() {
            if index > 0 {
                tokio::task::yield_now().await;
            }
            batches += 1;

            if self.max_concurrency > 1 {
                self.load_concurrent(batch, plan, errors, &counters).await;
            } else {
                for raw in batch {
                    self.load_one(raw, plan, errors, &counters).await;
                }
            }

            debug!(
                run_id = %errors.run_id(),
                batch = index + 1,
                size = batch.len(),
                "batch loaded"
            );
        }

        counters.summary(batches)
    }

    /// Keeps at most `max_concurrency` upserts of `batch` in flight. A failing
    /// upsert does not cancel its siblings.
    async fn load_concurrent(&self, batch: &[Value], plan: &LoadPlan<'_>, errors: &ErrorLogger, counters: &Counters) {
        let mut pending = batch.iter();
        let mut in_flight: FuturesUnordered<BoxFuture<'_, ()>> = FuturesUnordered::new();
        loop {
            while in_flight.len() < self.max_concurrency {
                match pending.next() {
                    Some(raw) => in_flight.push(self.load_one(raw, plan, errors, counters).boxed()),
                    None => break,
                }
            }
            if in_flight.next().await.is_none() {
                break;
            }
        }
    }

    async fn load_one(&self, raw: &Value, plan: &LoadPlan<'_>, errors: &ErrorLogger, counters: &Counters) {
        let Some(target) = plan.target else {
            counters.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        };

        let record = FieldMapper::map(raw, plan.mappings);
        match self
            .store
            .upsert(&target.collection, &record, &target.conflict_key)
            .await
        {
            Ok(()) => {
                counters.success.fetch_add(1, Ordering::Relaxed);
            }
            Err(err) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                let category = if err.is_validation() {
                    ErrorCategory::ProcessingError
                } else {
                    ErrorCategory::UpsertFailed
                };
                errors
                    .log(category, err.to_string(), plan.entity_type, raw)
                    .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use syncstore::errors::{Result as StoreResult, StoreError};
    use syncstore::models::{NewSyncError, NewSyncRun, NormalizedRecord, RunPatch};
    use syncstore::stores::AuditLog;
    use uuid::Uuid;

    /// Records every upsert and fails those whose key is listed in `reject`.
    #[derive(Default)]
    struct MockRecordStore {
        upserts: Mutex<Vec<(String, Value)>>,
        reject: Vec<Value>,
    }

    #[async_trait]
    impl RecordStore for MockRecordStore {
        async fn upsert(&self, collection: &str, record: &NormalizedRecord, conflict_key: &str) -> StoreResult<()> {
            if !record.is_valid() {
                return Err(StoreError::Validation("invalid record".into()));
            }
            if let Some(key) = record.get(conflict_key) {
                if self.reject.contains(key) {
                    return Err(StoreError::Other(anyhow::anyhow!("constraint violation")));
                }
            }
            self.upserts
                .lock()
                .unwrap()
                .push((collection.to_string(), record.to_value()));
            Ok(())
        }
    }

    #[derive(Default)]
    struct MockAuditLog {
        errors: Mutex<Vec<NewSyncError>>,
    }

    #[async_trait]
    impl AuditLog for MockAuditLog {
        async fn create_run(&self, _run: NewSyncRun) -> StoreResult<Uuid> {
            Ok(Uuid::new_v4())
        }

        async fn update_run(&self, _run_id: Uuid, _patch: RunPatch) -> StoreResult<()> {
            Ok(())
        }

        async fn append_error(&self, _run_id: Uuid, error: NewSyncError) -> StoreResult<()> {
            self.errors.lock().unwrap().push(error);
            Ok(())
        }
    }

    fn numbered(count: usize) -> Vec<Value> {
        (0..count).map(|i| json!({"inventory_number": format!("INV-{i}")})).collect()
    }

    fn setup(store: MockRecordStore) -> (BatchLoader, Arc<MockRecordStore>, Arc<MockAuditLog>, ErrorLogger) {
        let store = Arc::new(store);
        let audit = Arc::new(MockAuditLog::default());
        let logger = ErrorLogger::new(audit.clone(), Uuid::new_v4(), "ext-1");
        (BatchLoader::new(store.clone()), store, audit, logger)
    }

    #[tokio::test]
    async fn test_batches_cover_every_record_once() {
        let (loader, store, _audit, logger) = setup(MockRecordStore::default());
        let target = Target::new("manuscripts", "inventory_number");
        let mappings = FieldMappings::new();
        let plan = LoadPlan {
            entity_type: Some("manuscripts"),
            target: Some(&target),
            mappings: &mappings,
            batch_size: 2,
        };

        let summary = loader.load(&numbered(5), &plan, &logger).await;
        assert_eq!(
            summary,
            LoadSummary {
                success: 5,
                failed: 0,
                skipped: 0,
                batches: 3
            }
        );

        let upserts = store.upserts.lock().unwrap();
        let keys: Vec<&Value> = upserts.iter().map(|(_, body)| &body["inventory_number"]).collect();
        assert_eq!(keys, vec!["INV-0", "INV-1", "INV-2", "INV-3", "INV-4"]);
    }

    #[tokio::test]
    async fn test_failures_are_isolated_and_categorized() {
        let (loader, store, audit, logger) = setup(MockRecordStore {
            reject: vec![json!("INV-1")],
            ..Default::default()
        });
        let target = Target::new("manuscripts", "inventory_number");
        let mappings: FieldMappings = serde_json::from_value(json!({
            "inventory_number": "inv",
            "pages": {"source": "pages", "transform": "parseInt", "default": 1}
        }))
        .unwrap();
        let strict: FieldMappings = serde_json::from_value(json!({
            "inventory_number": "inv",
            "pages": {"source": "pages", "transform": "parseInt"}
        }))
        .unwrap();
        let records = vec![
            json!({"inv": "INV-0", "pages": "10"}),
            json!({"inv": "INV-1", "pages": "11"}),
            json!({"inv": "INV-2", "pages": "bad"}),
        ];

        let plan = LoadPlan {
            entity_type: Some("manuscripts"),
            target: Some(&target),
            mappings: &mappings,
            batch_size: 100,
        };
        let summary = loader.load(&records, &plan, &logger).await;
        assert_eq!((summary.success, summary.failed), (2, 1));

        let plan = LoadPlan {
            mappings: &strict,
            ..plan
        };
        let summary = loader.load(&records[2..], &plan, &logger).await;
        assert_eq!((summary.success, summary.failed), (0, 1));

        let errors = audit.errors.lock().unwrap();
        assert_eq!(errors.len(), 2);
        assert_eq!(errors[0].category, ErrorCategory::UpsertFailed);
        assert_eq!(errors[0].raw_record, records[1]);
        assert_eq!(errors[1].category, ErrorCategory::ProcessingError);
        assert_eq!(errors[1].entity_type.as_deref(), Some("manuscripts"));
        assert_eq!(store.upserts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unrouted_records_are_skipped_silently() {
        let (loader, store, audit, logger) = setup(MockRecordStore::default());
        let mappings = FieldMappings::new();
        let plan = LoadPlan {
            entity_type: Some("unknown"),
            target: None,
            mappings: &mappings,
            batch_size: 100,
        };

        let summary = loader.load(&numbered(3), &plan, &logger).await;
        assert_eq!(summary.skipped, 3);
        assert_eq!(summary.processed(), 3);
        assert!(audit.errors.lock().unwrap().is_empty());
        assert!(store.upserts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_upserts_keep_counts() {
        let (loader, store, audit, logger) = setup(MockRecordStore {
            reject: vec![json!("INV-3"), json!("INV-7")],
            ..Default::default()
        });
        let loader = loader.with_concurrency(4);
        let target = Target::new("manuscripts", "inventory_number");
        let mappings = FieldMappings::new();
        let plan = LoadPlan {
            entity_type: Some("manuscripts"),
            target: Some(&target),
            mappings: &mappings,
            batch_size: 5,
        };

        let summary = loader.load(&numbered(10), &plan, &logger).await;
        assert_eq!(summary.success, 8);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.batches, 2);
        assert_eq!(audit.errors.lock().unwrap().len(), 2);
        assert_eq!(store.upserts.lock().unwrap().len(), 8);
    }
}
