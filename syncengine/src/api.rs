use crate::errors::EngineError;
use crate::orchestrator::{SyncFailure, SyncOrchestrator, SyncOutcome, SyncRequest};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;
use syncstore::errors::StoreError;
use syncstore::models::{SyncErrorRecord, SyncRun};
use syncstore::SyncStore;
use uuid::Uuid;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<SyncStore>,
    pub orchestrator: Arc<SyncOrchestrator>,
}

impl AppState {
    pub fn new(store: Arc<SyncStore>, orchestrator: Arc<SyncOrchestrator>) -> Self {
        Self {
            store,
            orchestrator,
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::InvalidArg(msg) => ApiError::BadRequest(msg),
            StoreError::NotFound(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct SyncSuccessBody {
    success: bool,
    #[serde(flatten)]
    outcome: SyncOutcome,
}

#[derive(Serialize)]
struct SyncFailureBody {
    #[serde(skip_serializing_if = "Option::is_none")]
    success: Option<bool>,
    error: &'static str,
    details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sync_log_id: Option<Uuid>,
}

/// Response for one invocation. Rejected requests are 400s; runs that failed
/// after being accepted still answer 200 with `success: false`.
fn sync_response(result: Result<SyncOutcome, SyncFailure>) -> Response {
    match result {
        Ok(outcome) => (
            StatusCode::OK,
            Json(SyncSuccessBody {
                success: true,
                outcome,
            }),
        )
            .into_response(),
        Err(SyncFailure {
            error,
            sync_log_id,
        }) => {
            let rejected = matches!(
                error,
                EngineError::Validation(_) | EngineError::Configuration(_)
            );
            let body = SyncFailureBody {
                success: (!rejected).then_some(false),
                error: error.kind(),
                details: error.to_string(),
                sync_log_id,
            };
            let status = if rejected {
                StatusCode::BAD_REQUEST
            } else {
                StatusCode::OK
            };
            (status, Json(body)).into_response()
        }
    }
}

#[derive(Serialize)]
struct RunDetail {
    run: SyncRun,
    errors: Vec<SyncErrorRecord>,
}

#[derive(Serialize)]
struct StatusResponse {
    integrations: Vec<String>,
    entity_types: Vec<String>,
    active_runs: Vec<String>,
}

/// Builds the HTTP router used by the sync service.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/sync", post(trigger_sync))
        .route("/api/runs/:id", get(get_run))
        .route("/api/status", get(get_status))
        .with_state(state)
}

async fn trigger_sync(State(state): State<AppState>, Json(body): Json<JsonValue>) -> Response {
    let request = match serde_json::from_value::<SyncRequest>(body) {
        Ok(request) => request,
        Err(err) => {
            return sync_response(Err(SyncFailure {
                error: EngineError::Validation(err.to_string()),
                sync_log_id: None,
            }))
        }
    };

    // Detached so a dropped connection cannot cancel a run mid-batch.
    let orchestrator = state.orchestrator.clone();
    let run = tokio::spawn(async move { orchestrator.run(request).await });
    match run.await {
        Ok(result) => sync_response(result),
        Err(err) => ApiError::Internal(format!("sync task aborted: {err}")).into_response(),
    }
}

async fn get_run(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult<Json<JsonValue>> {
    let run_id = Uuid::parse_str(&id).map_err(|_| ApiError::BadRequest(format!("invalid run id '{id}'")))?;
    let run = state
        .store
        .catalog
        .get_run(run_id)?
        .ok_or_else(|| ApiError::NotFound(format!("sync run {run_id}")))?;
    let errors = state.store.catalog.list_errors(run_id)?;

    let detail = serde_json::to_value(RunDetail { run, errors })
        .map_err(|err| ApiError::Internal(err.to_string()))?;
    Ok(Json(detail))
}

async fn get_status(State(state): State<AppState>) -> ApiResult<Json<StatusResponse>> {
    let integrations = state.store.catalog.list_integrations()?;
    let router = state.orchestrator.router();
    let entity_types = router
        .entity_types()
        .into_iter()
        .map(str::to_string)
        .collect();
    let active_runs = integrations
        .iter()
        .filter(|id| state.orchestrator.leases().is_held(id))
        .cloned()
        .collect();

    Ok(Json(StatusResponse {
        integrations,
        entity_types,
        active_runs,
    }))
}
