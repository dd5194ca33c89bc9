use axum::extract::{Multipart, Path, Query, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use super::error::ApiError;
use super::templates;
use crate::llm::{DescribeImageInput, ImageDescription};
use crate::report::schema::ReportField;
use crate::report::{
    ControllerError, FieldPatch, IntakeSource, ReportController, ReportView, ReportedPosition,
    Upload,
};
use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub sessions: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub session_id: Uuid,
    #[serde(flatten)]
    pub view: ReportView,
}

#[derive(Debug, Default, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub source: IntakeSource,
}

fn session_response(controller: &ReportController, view: ReportView) -> Json<SessionResponse> {
    Json(SessionResponse {
        session_id: controller.id(),
        view,
    })
}

fn find_session(state: &AppState, id: Uuid) -> Result<Arc<ReportController>, ApiError> {
    state.session(&id).ok_or(ApiError::SessionNotFound(id))
}

pub async fn index() -> Html<String> {
    Html(templates::index_page(Utc::now().year()))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        service: "citylens",
        sessions: state.sessions.lock().len(),
    })
}

pub async fn describe_image(
    State(state): State<AppState>,
    Json(input): Json<DescribeImageInput>,
) -> Result<Json<ImageDescription>, ApiError> {
    let description = state.describer.describe(&input).await?;
    Ok(Json(description))
}

pub async fn create_session(State(state): State<AppState>) -> impl IntoResponse {
    let controller = state.create_session();
    let view = controller.snapshot();
    (StatusCode::CREATED, session_response(&controller, view))
}

pub async fn get_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let controller = find_session(&state, id)?;
    let view = controller.snapshot();
    Ok(session_response(&controller, view))
}

pub async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, ApiError> {
    if state.close_session(&id) {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::SessionNotFound(id))
    }
}

pub async fn upload_image(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<UploadQuery>,
    mut multipart: Multipart,
) -> Result<Json<SessionResponse>, ApiError> {
    let controller = find_session(&state, id)?;

    let mut upload = None;
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let name = field.file_name().unwrap_or("upload").to_string();
        let declared_type = field.content_type().map(str::to_string);
        let bytes = field.bytes().await?;
        upload = Some(Upload {
            name,
            declared_type,
            bytes: bytes.to_vec(),
            source: query.source,
        });
        break;
    }

    let upload =
        upload.ok_or_else(|| ApiError::BadRequest("Missing multipart field 'file'".to_string()))?;
    let view = controller.select_file(upload).await?;
    Ok(session_response(&controller, view))
}

pub async fn edit_fields(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(patch): Json<FieldPatch>,
) -> Result<Json<SessionResponse>, ApiError> {
    let controller = find_session(&state, id)?;
    let view = controller.edit(patch)?;
    Ok(session_response(&controller, view))
}

pub async fn analyze(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let controller = find_session(&state, id)?;
    let view = controller.analyze().await?;
    Ok(session_response(&controller, view))
}

pub async fn locate(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(report): Json<ReportedPosition>,
) -> Result<Json<SessionResponse>, ApiError> {
    let controller = find_session(&state, id)?;
    let view = controller.locate(&report).await?;
    Ok(session_response(&controller, view))
}

pub async fn submit(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let controller = find_session(&state, id)?;
    match controller.submit().await {
        Ok(view) => Ok(session_response(&controller, view).into_response()),
        Err(ControllerError::Invalid(errors)) => {
            let fields: Vec<&str> = errors.fields().map(ReportField::as_str).collect();
            info!("Session {} submit blocked by field errors: {:?}", id, fields);
            let view = controller.snapshot();
            Ok((
                StatusCode::UNPROCESSABLE_ENTITY,
                session_response(&controller, view),
            )
                .into_response())
        }
        Err(err) => Err(err.into()),
    }
}

pub async fn reset(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionResponse>, ApiError> {
    let controller = find_session(&state, id)?;
    let view = controller.reset()?;
    Ok(session_response(&controller, view))
}
