//! Admin media endpoints: batch ingestion, single upload, library listing,
//! detail edits, delete, association and orphan reconciliation.

use crate::{
    errors::AppError,
    models::{
        candidate::RawFile,
        image::{MediaImage, StoredImage},
    },
    services::{
        image_repository::ImageMetadataStore,
        media_service::{AssociationOutcome, OperationOutcome, PipelineError, ReconcileReport},
        pipeline::{BatchResult, BatchStatus, TracingSink},
        validation::derive_mime,
    },
    state::AppState,
};
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use base64::{Engine as _, engine::general_purpose};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

/// Most files accepted in one batch request.
pub const MAX_BATCH_FILES: usize = 20;

#[derive(Debug, Deserialize)]
pub struct MediaQuery {
    pub limit: Option<usize>,
    pub cursor: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct MediaListResponse {
    pub images: Vec<MediaImage>,
    pub is_truncated: bool,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UploadQuery {
    #[serde(default)]
    pub compress: bool,
}

#[derive(Debug, Deserialize)]
pub struct DeleteQuery {
    #[serde(default)]
    pub confirm: bool,
}

#[derive(Debug, Deserialize)]
pub struct ReconcileQuery {
    #[serde(default)]
    pub apply: bool,
}

#[derive(Debug, Deserialize)]
pub struct ImageDetails {
    pub alt_text: Option<String>,
    pub sort_order: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct AssociateRequest {
    pub image_ids: Vec<Uuid>,
    /// Target project; `null` detaches the images.
    pub project_id: Option<Uuid>,
}

/// POST `/admin/media/batch`: compress, validate and upload every file part.
pub async fn upload_batch(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let files = read_files(multipart).await?;
    if files.len() > MAX_BATCH_FILES {
        return Err(AppError::bad_request(format!(
            "At most {} files per batch (received {})",
            MAX_BATCH_FILES,
            files.len()
        )));
    }

    let mut batch = state.upload_batch();
    batch.process_files(files, &TracingSink).await;
    let result: BatchResult = batch.upload_files(&TracingSink).await;

    let status = match result.status {
        BatchStatus::Success => StatusCode::CREATED,
        BatchStatus::PartialSuccess | BatchStatus::Cancelled => StatusCode::MULTI_STATUS,
        BatchStatus::Failed => StatusCode::UNPROCESSABLE_ENTITY,
        BatchStatus::NothingToUpload => StatusCode::BAD_REQUEST,
    };
    Ok((status, Json(result)))
}

/// POST `/admin/media`: store one file part. The binary is expected to be
/// compressed already unless `?compress=true`.
pub async fn upload_single(
    State(state): State<AppState>,
    Query(query): Query<UploadQuery>,
    multipart: Multipart,
) -> Result<impl IntoResponse, AppError> {
    let mut files = read_files(multipart).await?;
    if files.len() != 1 {
        return Err(AppError::bad_request(
            "Send exactly one file part".to_string(),
        ));
    }
    let file = files.remove(0);

    let mime = derive_mime(&file.name, file.content_type.as_deref(), &file.bytes)
        .filter(|mime| mime.starts_with("image/"))
        .ok_or_else(|| {
            AppError::new(StatusCode::UNSUPPORTED_MEDIA_TYPE, "File must be an image")
        })?;

    let image = if query.compress {
        let asset = state
            .compressor
            .compress(file.bytes.clone())
            .await
            .map_err(|err| PipelineError::CompressionFailure(err.to_string()))?;
        state
            .media
            .upload_compressed(&file.name, &asset.mime, asset.bytes)
            .await?
    } else {
        state
            .media
            .upload_compressed(&file.name, &mime, file.bytes)
            .await?
    };
    info!(image_id = %image.id, "media library changed");
    Ok((StatusCode::CREATED, Json(image)))
}

/// GET `/admin/media`: the library, newest first, with project summaries.
pub async fn list_media(
    State(state): State<AppState>,
    Query(query): Query<MediaQuery>,
) -> Result<Json<MediaListResponse>, AppError> {
    let after = query.cursor.as_deref().map(decode_cursor).transpose()?;
    let page = state
        .images
        .list_media(query.limit.unwrap_or(100), after)
        .await?;

    Ok(Json(MediaListResponse {
        images: page.images,
        is_truncated: page.is_truncated,
        next_cursor: page
            .next_cursor
            .map(|(created_at, id)| encode_cursor(created_at, id)),
    }))
}

pub async fn get_media(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<MediaImage>, AppError> {
    state
        .images
        .media_by_ids(&[id])
        .await?
        .into_iter()
        .next()
        .map(Json)
        .ok_or_else(|| AppError::not_found(format!("image `{}` not found", id)))
}

/// PATCH `/admin/media/{id}`: descriptive text and ordering hint.
pub async fn update_media(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(details): Json<ImageDetails>,
) -> Result<Json<StoredImage>, AppError> {
    let image = state
        .images
        .update_details(id, details.alt_text, details.sort_order)
        .await?;
    Ok(Json(image))
}

/// DELETE `/admin/media/{id}?confirm=true`: binary first, then the row.
pub async fn delete_media(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<DeleteQuery>,
) -> Result<impl IntoResponse, AppError> {
    if !query.confirm {
        return Err(AppError::bad_request(
            "Deletion must be confirmed with ?confirm=true",
        ));
    }
    let image = state.images.find(id).await?;
    let outcome: OperationOutcome = state.media.delete_image(id, &image.url).await;
    let status = if outcome.success {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok((status, Json(outcome)))
}

/// POST `/admin/media/associate`
pub async fn associate_media(
    State(state): State<AppState>,
    Json(request): Json<AssociateRequest>,
) -> Result<impl IntoResponse, AppError> {
    if request.image_ids.is_empty() {
        return Err(AppError::bad_request("image_ids must not be empty"));
    }
    let outcome: AssociationOutcome = state
        .media
        .toggle_image_association(&request.image_ids, request.project_id)
        .await;
    let status = if outcome.success {
        StatusCode::OK
    } else if outcome.updated.is_empty() {
        StatusCode::UNPROCESSABLE_ENTITY
    } else {
        StatusCode::MULTI_STATUS
    };
    Ok((status, Json(outcome)))
}

/// POST `/admin/media/reconcile[?apply=true]`
pub async fn reconcile_media(
    State(state): State<AppState>,
    Query(query): Query<ReconcileQuery>,
) -> Result<Json<ReconcileReport>, AppError> {
    Ok(Json(state.media.reconcile_orphans(query.apply).await?))
}

/// Collect every file part of the form.
async fn read_files(mut multipart: Multipart) -> Result<Vec<RawFile>, AppError> {
    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::bad_request(format!("Failed to read multipart: {}", e)))?
    {
        let Some(name) = field.file_name().map(str::to_string) else {
            continue;
        };
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| AppError::bad_request(format!("Failed to read file data: {}", e)))?;
        files.push(RawFile::new(name, content_type, bytes));
    }
    Ok(files)
}

fn encode_cursor(created_at: DateTime<Utc>, id: Uuid) -> String {
    let raw = format!(
        "{}|{}",
        created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
        id
    );
    general_purpose::URL_SAFE_NO_PAD.encode(raw)
}

fn decode_cursor(token: &str) -> Result<(DateTime<Utc>, Uuid), AppError> {
    let invalid = || AppError::bad_request("Invalid cursor");
    let raw = general_purpose::URL_SAFE_NO_PAD
        .decode(token)
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .ok_or_else(invalid)?;
    let (created_at, id) = raw.split_once('|').ok_or_else(invalid)?;
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|_| invalid())?
        .with_timezone(&Utc);
    let id = Uuid::parse_str(id).map_err(|_| invalid())?;
    Ok((created_at, id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cursor_survives_encoding() {
        let created_at = Utc::now();
        let id = Uuid::new_v4();
        let token = encode_cursor(created_at, id);
        assert_eq!(decode_cursor(&token).unwrap(), (created_at, id));
    }

    #[test]
    fn garbage_cursor_is_a_bad_request() {
        let err = decode_cursor("%%%").unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
        let token = general_purpose::URL_SAFE_NO_PAD.encode("no-separator");
        assert!(decode_cursor(&token).is_err());
    }
}
