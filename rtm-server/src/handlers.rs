use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use rtm_core::{
    list_sprints, render_workbook_csv, resolve_sprint, Connection, ConnectionRegistry,
    ConnectionSummary, ConnectionUpdate, CoverageStatistics, Diagnostic, Iteration, Kpi,
    NewConnection, ProjectInfo, RegistryError, ReportDocument, RtmEngine,
};

use crate::error::ApiError;
use crate::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConnectionRequest {
    #[serde(flatten)]
    pub connection: NewConnection,
    #[serde(default)]
    pub make_default: bool,
}

/// Selects the requirements of a report: explicit ids or a sprint
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    /// Connection name; the default connection when absent
    pub connection: Option<String>,
    pub ids: Option<Vec<u64>>,
    pub sprint: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct KpiResponse {
    pub statistics: CoverageStatistics,
    pub kpis: Vec<Kpi>,
    pub diagnostics: Vec<Diagnostic>,
}

#[derive(Debug, Serialize)]
pub struct TestConnectionResponse {
    pub ok: bool,
    pub project: ProjectInfo,
}

pub async fn healthz() -> &'static str {
    "ok"
}

/// Runs a registry operation on the blocking pool
///
/// The registry holds a SQLite connection behind a mutex; disk I/O must not
/// stall the runtime workers.
async fn with_registry<T, F>(state: &AppState, op: F) -> Result<T, ApiError>
where
    F: FnOnce(&ConnectionRegistry) -> Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    let registry = Arc::clone(&state.registry);
    tokio::task::spawn_blocking(move || op(&registry))
        .await
        .map_err(|err| ApiError::Internal(format!("registry task failed: {}", err)))?
}

fn summary_of(registry: &ConnectionRegistry, name: &str) -> Result<ConnectionSummary, ApiError> {
    let connection = registry.get(name)?;
    let is_default = registry
        .default_connection()?
        .is_some_and(|c| c.name == connection.name);
    Ok(connection.summary(is_default))
}

pub async fn list_connections(
    State(state): State<AppState>,
) -> Result<Json<Vec<ConnectionSummary>>, ApiError> {
    let summaries = with_registry(&state, |registry| Ok(registry.summaries()?)).await?;
    Ok(Json(summaries))
}

pub async fn create_connection(
    State(state): State<AppState>,
    Json(request): Json<CreateConnectionRequest>,
) -> Result<(StatusCode, Json<ConnectionSummary>), ApiError> {
    let summary = with_registry(&state, move |registry| {
        let connection = registry.add(request.connection)?;
        if request.make_default {
            registry.set_default(&connection.name)?;
        }
        summary_of(registry, &connection.name)
    })
    .await?;
    Ok((StatusCode::CREATED, Json(summary)))
}

pub async fn get_connection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ConnectionSummary>, ApiError> {
    let summary = with_registry(&state, move |registry| summary_of(registry, &name)).await?;
    Ok(Json(summary))
}

pub async fn update_connection(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(update): Json<ConnectionUpdate>,
) -> Result<Json<ConnectionSummary>, ApiError> {
    let summary = with_registry(&state, move |registry| {
        registry.update(&name, update)?;
        summary_of(registry, &name)
    })
    .await?;
    Ok(Json(summary))
}

pub async fn delete_connection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<StatusCode, ApiError> {
    with_registry(&state, move |registry| Ok(registry.delete(&name)?)).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn set_default_connection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<ConnectionSummary>, ApiError> {
    let summary = with_registry(&state, move |registry| {
        registry.set_default(&name)?;
        summary_of(registry, &name)
    })
    .await?;
    Ok(Json(summary))
}

async fn load_connection(state: &AppState, name: String) -> Result<Connection, ApiError> {
    with_registry(state, move |registry| Ok(registry.get(&name)?)).await
}

pub async fn test_connection(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<TestConnectionResponse>, ApiError> {
    let connection = load_connection(&state, name.clone()).await?;
    let source = state.factory.connect(&connection)?;
    let project = source.test_connection().await?;
    tracing::info!(connection = %name, project = %project.name, "Connection test succeeded");
    Ok(Json(TestConnectionResponse { ok: true, project }))
}

pub async fn connection_sprints(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<Vec<Iteration>>, ApiError> {
    let connection = load_connection(&state, name).await?;
    let source = state.factory.connect(&connection)?;
    Ok(Json(list_sprints(source.as_ref()).await?))
}

/// Resolves the request to requirement ids and generates the matrix
async fn build_report(state: &AppState, request: ReportRequest) -> Result<ReportDocument, ApiError> {
    let requested = request.connection.clone();
    let connection = with_registry(state, move |registry| {
        registry
            .resolve(requested.as_deref())
            .map_err(|err| match (&requested, err) {
                (None, RegistryError::NotFound(_)) => ApiError::BadRequest(
                    "No connection given and no default connection is set".to_string(),
                ),
                (_, err) => ApiError::from(err),
            })
    })
    .await?;
    let source = state.factory.connect(&connection)?;

    let ids = match (request.ids, request.sprint) {
        (Some(ids), None) => ids,
        (None, Some(sprint)) => {
            resolve_sprint(source.as_ref(), &sprint, &state.engine_config).await?
        }
        (Some(_), Some(_)) => {
            return Err(ApiError::BadRequest(
                "Give either ids or sprint, not both".to_string(),
            ))
        }
        (None, None) => return Err(ApiError::BadRequest("ids or sprint is required".to_string())),
    };

    let engine = RtmEngine::new(source, state.engine_config.as_ref().clone());
    let report = tokio::time::timeout(state.request_timeout, engine.generate_matrix(&ids))
        .await
        .map_err(|_| ApiError::Timeout(state.request_timeout.as_secs()))??;

    Ok(ReportDocument::new(report))
}

pub async fn rtm_report(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> Result<Json<ReportDocument>, ApiError> {
    Ok(Json(build_report(&state, request).await?))
}

pub async fn rtm_kpi(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> Result<Json<KpiResponse>, ApiError> {
    let document = build_report(&state, request).await?;
    Ok(Json(KpiResponse {
        kpis: document.statistics.kpis(),
        statistics: document.statistics,
        diagnostics: document.diagnostics,
    }))
}

pub async fn rtm_export(
    State(state): State<AppState>,
    Json(request): Json<ReportRequest>,
) -> Result<Response, ApiError> {
    let document = build_report(&state, request).await?;
    let csv = render_workbook_csv(&document.matrix, &document.statistics);
    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (
                header::CONTENT_DISPOSITION,
                "attachment; filename=\"rtm-report.csv\"",
            ),
        ],
        csv,
    )
        .into_response())
}
