//! Contact form submission (public) and the admin message inbox.

use crate::{
    errors::AppError,
    models::contact::{ContactMessage, MessageFilter, MessageStats, NewContactMessage},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

/// POST `/contact`
pub async fn submit_contact(
    State(state): State<AppState>,
    Json(new): Json<NewContactMessage>,
) -> Result<impl IntoResponse, AppError> {
    let message = state.contacts.submit(new).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "success": true,
            "message": "Message sent successfully! I'll get back to you soon.",
            "id": message.id,
        })),
    ))
}

#[derive(Debug, Deserialize)]
pub struct MessageListQuery {
    #[serde(default)]
    pub filter: MessageFilter,
}

/// GET `/admin/messages[?filter=all|unread|replied]`
pub async fn list_messages(
    State(state): State<AppState>,
    Query(query): Query<MessageListQuery>,
) -> Result<Json<Vec<ContactMessage>>, AppError> {
    Ok(Json(state.contacts.list(query.filter).await?))
}

/// GET `/admin/messages/stats`
pub async fn message_stats(State(state): State<AppState>) -> Result<Json<MessageStats>, AppError> {
    Ok(Json(state.contacts.stats().await?))
}

/// GET `/admin/messages/{id}`
pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<ContactMessage>, AppError> {
    Ok(Json(state.contacts.get(id).await?))
}

#[derive(Debug, Deserialize)]
pub struct MessageUpdate {
    pub is_read: Option<bool>,
    #[serde(default)]
    pub replied: bool,
}

/// PATCH `/admin/messages/{id}` with `{"is_read": bool}` or `{"replied": true}`.
pub async fn update_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(update): Json<MessageUpdate>,
) -> Result<Json<ContactMessage>, AppError> {
    let message = match (update.replied, update.is_read) {
        (true, _) => state.contacts.mark_replied(id).await?,
        (false, Some(is_read)) => state.contacts.set_read(id, is_read).await?,
        (false, None) => return Err(AppError::bad_request("Nothing to update")),
    };
    Ok(Json(message))
}

/// DELETE `/admin/messages/{id}`
pub async fn delete_message(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.contacts.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
