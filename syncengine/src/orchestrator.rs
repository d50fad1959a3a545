use crate::config::EngineConfig;
use crate::error_logger::ErrorLogger;
use crate::errors::EngineError;
use crate::lease::{RunLease, RunLeases};
use crate::loader::{BatchLoader, LoadPlan};
use crate::router::TargetRouter;
use chrono::Utc;
use httpfetcher::{build_headers, query_from_filters, try_build_headers, FetchClient, FetchRequest};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use syncstore::models::{IntegrationConfig, NewSyncRun, RunPatch, SyncRunStatus, SyncType};
use syncstore::stores::{AuditLog, IntegrationStore, RecordStore};
use syncstore::SyncStore;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Invocation request, as accepted over HTTP and from the CLI.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub integration_id: Option<String>,
    #[serde(default)]
    pub sync_type: SyncType,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub filters: Option<Map<String, Value>>,
}

impl SyncRequest {
    pub fn manual(integration_id: impl Into<String>) -> Self {
        Self {
            integration_id: Some(integration_id.into()),
            ..Self::default()
        }
    }

    pub fn with_entity_type(mut self, entity_type: impl Into<String>) -> Self {
        self.entity_type = Some(entity_type.into());
        self
    }

    pub fn with_filters(mut self, filters: Map<String, Value>) -> Self {
        self.filters = Some(filters);
        self
    }
}

/// Result of a run whose records were loaded. `status` is derived from the
/// record counts and is `failed` when no record succeeded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncOutcome {
    pub sync_log_id: Uuid,
    pub status: SyncRunStatus,
    pub records_total: u64,
    pub records_success: u64,
    pub records_failed: u64,
    pub records_skipped: u64,
    pub duration_ms: u64,
}

/// A top-level failure. `sync_log_id` is set when a run row was created.
#[derive(Debug)]
pub struct SyncFailure {
    pub error: EngineError,
    pub sync_log_id: Option<Uuid>,
}

impl SyncFailure {
    fn before_run(error: EngineError) -> Self {
        Self {
            error,
            sync_log_id: None,
        }
    }
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.sync_log_id {
            Some(id) => write!(f, "sync run {id} failed: {}", self.error),
            None => write!(f, "sync rejected: {}", self.error),
        }
    }
}

impl std::error::Error for SyncFailure {}

/// Drives one sync run from configuration lookup to the final audit update.
pub struct SyncOrchestrator {
    integrations: Arc<dyn IntegrationStore>,
    audit: Arc<dyn AuditLog>,
    loader: BatchLoader,
    fetcher: FetchClient,
    router: TargetRouter,
    leases: RunLeases,
    config: EngineConfig,
}

impl SyncOrchestrator {
    pub fn new(
        integrations: Arc<dyn IntegrationStore>,
        records: Arc<dyn RecordStore>,
        audit: Arc<dyn AuditLog>,
        config: EngineConfig,
    ) -> Self {
        let loader = BatchLoader::new(records).with_concurrency(config.max_concurrent_upserts);
        Self {
            integrations,
            audit,
            loader,
            fetcher: FetchClient::new(),
            router: TargetRouter::with_routes(&config.extra_routes),
            leases: RunLeases::new(),
            config,
        }
    }

    pub fn from_store(store: &SyncStore, config: EngineConfig) -> Self {
        Self::new(
            store.catalog.clone(),
            store.records.clone(),
            store.catalog.clone(),
            config,
        )
    }

    pub fn with_fetch_client(mut self, fetcher: FetchClient) -> Self {
        self.fetcher = fetcher;
        self
    }

    pub fn with_router(mut self, router: TargetRouter) -> Self {
        self.router = router;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn router(&self) -> &TargetRouter {
        &self.router
    }

    pub fn leases(&self) -> &RunLeases {
        &self.leases
    }

    pub async fn run(&self, request: SyncRequest) -> Result<SyncOutcome, SyncFailure> {
        let integration_id = request
            .integration_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                SyncFailure::before_run(EngineError::Validation(
                    "integrationId is required".to_string(),
                ))
            })?
            .to_string();

        let _lease: Option<RunLease> = if self.config.exclusive_runs {
            Some(
                self.leases
                    .acquire(&integration_id)
                    .map_err(SyncFailure::before_run)?,
            )
        } else {
            None
        };

        let started = Instant::now();
        let integration = self
            .integrations
            .get_integration(&integration_id)
            .await
            .map_err(|err| SyncFailure::before_run(err.into()))?;

        let entity_type = request.entity_type.clone().or_else(|| {
            integration
                .as_ref()
                .and_then(|config| config.sync_entities.first().cloned())
        });

        let run_id = self
            .audit
            .create_run(NewSyncRun {
                integration_id: integration_id.clone(),
                sync_type: request.sync_type,
                entity_type: entity_type.clone(),
            })
            .await
            .map_err(|err| SyncFailure::before_run(err.into()))?;

        info!(
            run_id = %run_id,
            integration_id = %integration_id,
            sync_type = request.sync_type.as_str(),
            entity_type = entity_type.as_deref().unwrap_or("-"),
            "sync run started"
        );

        let integration = match integration {
            Some(config) if config.is_active => config,
            Some(_) => {
                let err = EngineError::Configuration(format!(
                    "integration '{integration_id}' is inactive"
                ));
                return Err(self.fail_run(run_id, started, err).await);
            }
            None => {
                let err = EngineError::Configuration(format!(
                    "integration '{integration_id}' not found"
                ));
                return Err(self.fail_run(run_id, started, err).await);
            }
        };

        self.execute(run_id, started, &integration, entity_type.as_deref(), &request)
            .await
    }

    async fn execute(
        &self,
        run_id: Uuid,
        started: Instant,
        integration: &IntegrationConfig,
        entity_type: Option<&str>,
        request: &SyncRequest,
    ) -> Result<SyncOutcome, SyncFailure> {
        let headers = if self.config.strict_auth {
            match try_build_headers(&integration.auth) {
                Ok(headers) => headers,
                Err(err) => {
                    let err = EngineError::Configuration(err.to_string());
                    return Err(self.fail_run(run_id, started, err).await);
                }
            }
        } else {
            build_headers(&integration.auth)
        };

        if let Err(err) = self
            .audit
            .update_run(run_id, RunPatch::status(SyncRunStatus::InProgress))
            .await
        {
            return Err(self.fail_run(run_id, started, err.into()).await);
        }

        let query = request
            .filters
            .as_ref()
            .map(query_from_filters)
            .unwrap_or_default();
        let timeout = Duration::from_secs(self.config.timeout_secs_for(integration.timeout_secs));
        let fetch = FetchRequest::new(&integration.endpoint, headers, timeout)
            .with_query(query)
            .with_response_root(integration.response_root.as_ref());

        let records = match self.fetcher.fetch(&fetch).await {
            Ok(records) => records,
            Err(err) => return Err(self.fail_run(run_id, started, err.into()).await),
        };
        let records_total = records.len() as u64;

        let target = match entity_type {
            Some(entity) => {
                let target = self.router.resolve(entity);
                if target.is_none() {
                    warn!(run_id = %run_id, entity_type = entity, "no target for entity type, skipping records");
                }
                target
            }
            None => {
                warn!(run_id = %run_id, "no entity type for run, skipping records");
                None
            }
        };

        let plan = LoadPlan {
            entity_type,
            target,
            mappings: &integration.field_mappings,
            batch_size: self.config.batch_size_for(integration.batch_size),
        };
        let errors = ErrorLogger::new(self.audit.clone(), run_id, integration.id.as_str());
        let summary = self.loader.load(&records, &plan, &errors).await;

        let status = SyncRunStatus::from_counts(summary.success, summary.failed);
        let duration_ms = elapsed_ms(started);
        let patch = RunPatch {
            status: Some(status),
            records_total: Some(records_total),
            records_processed: Some(summary.processed()),
            records_success: Some(summary.success),
            records_failed: Some(summary.failed),
            records_skipped: Some(summary.skipped),
            completed_at: Some(Utc::now()),
            duration_ms: Some(duration_ms),
            error_message: None,
        };
        if let Err(err) = self.audit.update_run(run_id, patch).await {
            error!(run_id = %run_id, error = %err, "failed to finalize sync run");
            return Err(self.fail_run(run_id, started, err.into()).await);
        }

        if status != SyncRunStatus::Failed {
            if let Err(err) = self
                .integrations
                .record_successful_sync(&integration.id, Utc::now())
                .await
            {
                warn!(integration_id = %integration.id, error = %err, "failed to record last sync time");
            }
        }

        info!(
            run_id = %run_id,
            integration_id = %integration.id,
            status = status.as_str(),
            total = records_total,
            success = summary.success,
            failed = summary.failed,
            skipped = summary.skipped,
            batches = summary.batches,
            duration_ms,
            "sync run finished"
        );

        Ok(SyncOutcome {
            sync_log_id: run_id,
            status,
            records_total,
            records_success: summary.success,
            records_failed: summary.failed,
            records_skipped: summary.skipped,
            duration_ms,
        })
    }

    /// Moves the run to `failed` with the error message and returns the failure.
    async fn fail_run(&self, run_id: Uuid, started: Instant, error: EngineError) -> SyncFailure {
        warn!(run_id = %run_id, error = %error, "sync run failed");

        let patch = RunPatch {
            status: Some(SyncRunStatus::Failed),
            completed_at: Some(Utc::now()),
            duration_ms: Some(elapsed_ms(started)),
            error_message: Some(error.to_string()),
            ..RunPatch::default()
        };
        if let Err(err) = self.audit.update_run(run_id, patch).await {
            error!(run_id = %run_id, error = %err, "failed to mark sync run as failed");
        }

        SyncFailure {
            error,
            sync_log_id: Some(run_id),
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
