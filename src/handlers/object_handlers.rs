//! Public read side of the object store. Stored image references resolve
//! here; bodies are streamed from disk without buffering.

use crate::{errors::AppError, services::object_store::content_type_for_key, state::AppState};
use axum::{
    body::Body,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::Response,
};
use tokio_util::io::ReaderStream;

/// GET `/storage/{bucket}/{*key}`
pub async fn get_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    ensure_public_bucket(&state, &bucket)?;
    let object = state.store.open(&bucket, &key).await?;
    let body = Body::from_stream(ReaderStream::new(object.reader));

    let mut response = Response::new(body);
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &key, object.size_bytes);
    Ok(response)
}

/// HEAD `/storage/{bucket}/{*key}`: same headers as GET but no body.
pub async fn head_object(
    State(state): State<AppState>,
    Path((bucket, key)): Path<(String, String)>,
) -> Result<Response, AppError> {
    ensure_public_bucket(&state, &bucket)?;
    let object = state.store.open(&bucket, &key).await?;

    let mut response = Response::new(Body::empty());
    *response.status_mut() = StatusCode::OK;
    set_object_headers(response.headers_mut(), &key, object.size_bytes);
    Ok(response)
}

fn ensure_public_bucket(state: &AppState, bucket: &str) -> Result<(), AppError> {
    if bucket != state.config.bucket {
        return Err(AppError::not_found(format!("bucket `{}` not found", bucket)));
    }
    Ok(())
}

fn set_object_headers(headers: &mut HeaderMap, key: &str, size_bytes: u64) {
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static(content_type_for_key(key)),
    );
    headers.insert(header::CONTENT_LENGTH, HeaderValue::from(size_bytes));
    // Names are never reused, so a stored binary never changes.
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=31536000, immutable"),
    );
}
