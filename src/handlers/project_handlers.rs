//! Project endpoints. Writes live under `/admin`; reads are public.

use crate::{
    errors::AppError,
    models::project::{NewProject, ProjectUpdate, ProjectWithImages},
    services::project_service::ProjectWrite,
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct ProjectListQuery {
    #[serde(default)]
    pub featured: bool,
    pub limit: Option<usize>,
}

/// GET `/projects[?featured=true&limit=3]`
pub async fn list_projects(
    State(state): State<AppState>,
    Query(query): Query<ProjectListQuery>,
) -> Result<Json<Vec<ProjectWithImages>>, AppError> {
    let projects = if query.featured {
        state.projects.featured(query.limit.unwrap_or(3)).await?
    } else {
        state.projects.list_public().await?
    };
    Ok(Json(projects))
}

/// GET `/projects/{slug}`
pub async fn get_project_by_slug(
    State(state): State<AppState>,
    Path(slug): Path<String>,
) -> Result<Json<ProjectWithImages>, AppError> {
    Ok(Json(state.projects.by_slug(&slug).await?))
}

/// GET `/admin/projects/{id}`
pub async fn get_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ProjectWithImages>, AppError> {
    Ok(Json(state.projects.get(id).await?))
}

/// POST `/admin/projects`
pub async fn create_project(
    State(state): State<AppState>,
    Json(new): Json<NewProject>,
) -> Result<impl IntoResponse, AppError> {
    let written: ProjectWrite = state.projects.create(new).await?;
    Ok((StatusCode::CREATED, Json(written)))
}

/// PATCH `/admin/projects/{id}`
pub async fn update_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<ProjectUpdate>,
) -> Result<Json<ProjectWrite>, AppError> {
    Ok(Json(state.projects.update(id, update).await?))
}

#[derive(Debug, Deserialize)]
pub struct DeleteProjectQuery {
    #[serde(default)]
    pub permanent: bool,
}

/// DELETE `/admin/projects/{id}[?permanent=true]`
///
/// Soft delete by default; `permanent` removes the row as well.
pub async fn delete_project(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteProjectQuery>,
) -> Result<StatusCode, AppError> {
    if query.permanent {
        state.projects.permanent_delete(id).await?;
    } else {
        state.projects.soft_delete(id).await?;
    }
    Ok(StatusCode::NO_CONTENT)
}
