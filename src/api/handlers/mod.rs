use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::TrackerError;
use crate::models::*;
use crate::tracker::Tracker;

type ApiResult<T> = Result<T, (StatusCode, String)>;

// ============================================================
// Error Handling
// ============================================================

/// Map a tracker error to a response.
///
/// Lookup, state and validation errors are the caller's fault and are
/// returned as-is. Storage errors are logged server-side and the client
/// only sees a generic message.
fn api_error(e: TrackerError) -> (StatusCode, String) {
    let status = match &e {
        TrackerError::ProjectNotFound(_)
        | TrackerError::ItemNotFound(_)
        | TrackerError::TemplateNotFound(_)
        | TrackerError::ArtifactNotFound(_) => StatusCode::NOT_FOUND,
        TrackerError::InvalidCommand { .. } | TrackerError::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        TrackerError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        TrackerError::Storage(_) => {
            tracing::error!("Internal error: {:#}", e);
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            );
        }
    };

    tracing::warn!("Rejected request: {}", e);
    (status, e.to_string())
}

// ============================================================
// Health
// ============================================================

pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ============================================================
// Projects
// ============================================================

pub async fn list_projects(State(tracker): State<Tracker>) -> ApiResult<Json<Vec<Project>>> {
    tracker.projects().map(Json).map_err(api_error)
}

pub async fn ingest_checklist(
    State(tracker): State<Tracker>,
    Json(input): Json<IngestChecklistInput>,
) -> ApiResult<(StatusCode, Json<ProjectWithItems>)> {
    tracker
        .ingest_checklist(input)
        .map(|(project, items)| (StatusCode::CREATED, Json(ProjectWithItems { project, items })))
        .map_err(api_error)
}

pub async fn get_project(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ProjectWithItems>> {
    let project = tracker.project(id).map_err(api_error)?;
    let items = tracker.items(id).map_err(api_error)?;
    Ok(Json(ProjectWithItems { project, items }))
}

pub async fn delete_project(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    tracker
        .delete_project(id)
        .map(|_| StatusCode::NO_CONTENT)
        .map_err(api_error)
}

pub async fn get_project_status(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ProjectStatus>> {
    tracker.project_status(id).map(Json).map_err(api_error)
}

pub async fn get_dashboard(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ProjectDashboard>> {
    tracker.dashboard(id).map(Json).map_err(api_error)
}

pub async fn list_items(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ChecklistItem>>> {
    tracker.items(id).map(Json).map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct RunParams {
    /// Block until the run finishes instead of running in the background.
    #[serde(default)]
    pub wait: bool,
}

pub async fn run_project(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
    Query(params): Query<RunParams>,
) -> ApiResult<(StatusCode, Json<ProjectStatus>)> {
    if params.wait {
        let status = tracker.run_project(id).await.map_err(api_error)?;
        return Ok((StatusCode::OK, Json(status)));
    }

    let status = tracker.project_status(id).map_err(api_error)?;
    tokio::spawn(async move {
        if let Err(e) = tracker.run_project(id).await {
            tracing::error!(project_id = %id, error = %e, "Background pipeline run failed");
        }
    });
    Ok((StatusCode::ACCEPTED, Json(status)))
}

pub async fn cancel_project(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ChecklistItem>>> {
    tracker.cancel_project(id).map(Json).map_err(api_error)
}

// ============================================================
// Templates & Context
// ============================================================

pub async fn list_templates(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Template>>> {
    tracker.templates(id).map(Json).map_err(api_error)
}

pub async fn register_template(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
    Json(input): Json<RegisterTemplateInput>,
) -> ApiResult<(StatusCode, Json<Template>)> {
    tracker
        .register_template(id, input)
        .map(|t| (StatusCode::CREATED, Json(t)))
        .map_err(api_error)
}

pub async fn list_context(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ContextBlob>>> {
    tracker.context_blobs(id).map(Json).map_err(api_error)
}

pub async fn ingest_context(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
    Json(input): Json<IngestContextInput>,
) -> ApiResult<(StatusCode, Json<ContextBlob>)> {
    tracker
        .ingest_context_blob(id, input)
        .map(|b| (StatusCode::CREATED, Json(b)))
        .map_err(api_error)
}

// ============================================================
// Items
// ============================================================

pub async fn get_item(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ChecklistItem>> {
    tracker.item(id).map(Json).map_err(api_error)
}

pub async fn list_transitions(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<ItemTransition>>> {
    tracker.transitions(id).map(Json).map_err(api_error)
}

pub async fn list_artifacts(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Vec<Artifact>>> {
    tracker.artifacts(id).map(Json).map_err(api_error)
}

pub async fn retry_item(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<ChecklistItem>> {
    tracker.retry(id).await.map(Json).map_err(api_error)
}

pub async fn override_template(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
    Json(input): Json<OverrideTemplateInput>,
) -> ApiResult<Json<ChecklistItem>> {
    tracker
        .override_template(id, input.template_id)
        .await
        .map(Json)
        .map_err(api_error)
}

#[derive(Debug, Deserialize)]
pub struct RegenerateParams {
    #[serde(default)]
    pub overwrite: bool,
}

pub async fn regenerate_item(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
    Query(params): Query<RegenerateParams>,
) -> ApiResult<Json<ChecklistItem>> {
    tracker
        .regenerate(id, params.overwrite)
        .await
        .map(Json)
        .map_err(api_error)
}

pub async fn supply_field(
    State(tracker): State<Tracker>,
    Path((id, field)): Path<(Uuid, String)>,
    Json(input): Json<SupplyFieldInput>,
) -> ApiResult<Json<ChecklistItem>> {
    tracker
        .supply_field(id, &field, &input.value)
        .await
        .map(Json)
        .map_err(api_error)
}

// ============================================================
// Artifacts
// ============================================================

pub async fn get_artifact(
    State(tracker): State<Tracker>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Artifact>> {
    tracker.artifact(id).map(Json).map_err(api_error)
}
