mod common;

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use common::TestEnv;
use serde_json::{json, Value};
use syncengine::errors::EngineError;
use syncengine::{EngineConfig, SyncOrchestrator, SyncRequest};
use syncstore::errors::{Result as StoreResult, StoreError};
use syncstore::models::{AuthMethod, Credentials, NewSyncError, NewSyncRun, RunPatch, SyncRunStatus};
use syncstore::stores::AuditLog;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, Request, Respond, ResponseTemplate};

type Events = Arc<Mutex<Vec<String>>>;

/// Forwards to the catalog while recording every status patch. With
/// `fail_finalize` set, the patch carrying the record counts is rejected.
struct RecordingAuditLog {
    inner: Arc<dyn AuditLog>,
    events: Events,
    fail_finalize: bool,
}

#[async_trait]
impl AuditLog for RecordingAuditLog {
    async fn create_run(&self, run: NewSyncRun) -> StoreResult<Uuid> {
        self.events.lock().unwrap().push("create".to_string());
        self.inner.create_run(run).await
    }

    async fn update_run(&self, run_id: Uuid, patch: RunPatch) -> StoreResult<()> {
        let status = patch.status.map(|s| s.as_str()).unwrap_or("-");
        self.events.lock().unwrap().push(format!("patch:{status}"));
        if self.fail_finalize && patch.records_total.is_some() {
            return Err(StoreError::Other(anyhow::anyhow!("audit table unavailable")));
        }
        self.inner.update_run(run_id, patch).await
    }

    async fn append_error(&self, run_id: Uuid, error: NewSyncError) -> StoreResult<()> {
        self.inner.append_error(run_id, error).await
    }
}

/// Serves a fixed body and notes when the upstream was reached.
struct RecordingResponder {
    events: Events,
    body: Value,
}

impl Respond for RecordingResponder {
    fn respond(&self, _request: &Request) -> ResponseTemplate {
        self.events.lock().unwrap().push("fetch".to_string());
        ResponseTemplate::new(200).set_body_json(self.body.clone())
    }
}

async fn serve_recorded(env: &TestEnv, events: &Events, body: Value) {
    Mock::given(method("GET"))
        .and(path("/items"))
        .respond_with(RecordingResponder {
            events: events.clone(),
            body,
        })
        .mount(&env.server)
        .await;
}

fn orchestrator(env: &TestEnv, events: &Events, fail_finalize: bool, config: EngineConfig) -> SyncOrchestrator {
    let audit = Arc::new(RecordingAuditLog {
        inner: env.store.catalog.clone(),
        events: events.clone(),
        fail_finalize,
    });
    SyncOrchestrator::new(env.store.catalog.clone(), env.store.records.clone(), audit, config)
}

fn recorded(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

#[tokio::test]
async fn in_progress_is_written_before_fetch() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.register("ext-1", "/items", json!({}))?;
    let events = Events::default();
    serve_recorded(&env, &events, json!([{"inventory_number": "INV-1"}])).await;

    let outcome = orchestrator(&env, &events, false, EngineConfig::default())
        .run(SyncRequest::manual("ext-1").with_entity_type("manuscripts"))
        .await?;

    assert_eq!(outcome.status, SyncRunStatus::Completed);
    assert_eq!(
        recorded(&events),
        vec!["create", "patch:in_progress", "fetch", "patch:completed"]
    );
    Ok(())
}

#[tokio::test]
async fn fail_fast_paths_skip_in_progress() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    let mut integration = env.register("ext-1", "/items", json!({}))?;
    integration.auth.method = AuthMethod::ApiKey;
    integration.auth.credentials = Credentials::default();
    env.save(&integration)?;
    env.register("ext-off", "/items", json!({}))?;
    env.store.catalog.set_integration_active("ext-off", false)?;
    let events = Events::default();
    serve_recorded(&env, &events, json!([])).await;

    let config = EngineConfig {
        strict_auth: true,
        ..EngineConfig::default()
    };
    for id in ["ext-1", "ext-off", "ghost"] {
        events.lock().unwrap().clear();
        let failure = orchestrator(&env, &events, false, config.clone())
            .run(SyncRequest::manual(id))
            .await
            .unwrap_err();

        assert!(matches!(failure.error, EngineError::Configuration(_)), "{id}: {failure}");
        assert_eq!(recorded(&events), vec!["create", "patch:failed"], "{id}");
        let run = env.store.catalog.get_run(failure.sync_log_id.unwrap())?.unwrap();
        assert_eq!(run.status, SyncRunStatus::Failed);
    }
    Ok(())
}

#[tokio::test]
async fn rejected_final_update_still_fails_run() -> anyhow::Result<()> {
    let env = TestEnv::new().await?;
    env.register("ext-1", "/items", json!({}))?;
    let events = Events::default();
    serve_recorded(&env, &events, json!([{"inventory_number": "INV-1"}])).await;

    let failure = orchestrator(&env, &events, true, EngineConfig::default())
        .run(SyncRequest::manual("ext-1").with_entity_type("manuscripts"))
        .await
        .unwrap_err();

    assert!(matches!(failure.error, EngineError::Store(_)));
    assert_eq!(
        recorded(&events),
        vec!["create", "patch:in_progress", "fetch", "patch:completed", "patch:failed"]
    );
    let run = env.store.catalog.get_run(failure.sync_log_id.unwrap())?.unwrap();
    assert_eq!(run.status, SyncRunStatus::Failed);
    assert!(run.completed_at.is_some());
    assert!(run
        .error_message
        .unwrap_or_default()
        .contains("audit table unavailable"));
    Ok(())
}
