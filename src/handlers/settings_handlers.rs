use crate::{errors::AppError, models::settings::SiteSetting, state::AppState};
use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
pub struct SettingsQuery {
    /// Comma separated keys; all settings when absent.
    pub keys: Option<String>,
}

/// GET `/settings[?keys=general,social_links]` and GET `/admin/settings`
pub async fn list_settings(
    State(state): State<AppState>,
    Query(query): Query<SettingsQuery>,
) -> Result<Json<Vec<SiteSetting>>, AppError> {
    let settings = match query.keys {
        Some(keys) => {
            let keys: Vec<String> = keys
                .split(',')
                .map(str::trim)
                .filter(|k| !k.is_empty())
                .map(str::to_string)
                .collect();
            state.settings.get_many(&keys).await?
        }
        None => state.settings.list().await?,
    };
    Ok(Json(settings))
}

/// GET `/settings/{key}`
pub async fn get_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<SiteSetting>, AppError> {
    Ok(Json(state.settings.get(&key).await?))
}

/// PUT `/admin/settings/{key}`: the body is the JSON value to store.
pub async fn put_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(value): Json<Value>,
) -> Result<Json<SiteSetting>, AppError> {
    Ok(Json(state.settings.upsert(&key, &value).await?))
}

/// DELETE `/admin/settings/{key}`
pub async fn delete_setting(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<StatusCode, AppError> {
    state.settings.delete(&key).await?;
    Ok(StatusCode::NO_CONTENT)
}
