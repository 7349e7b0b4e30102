//! Defines every route of the service.
//!
//! ## Structure
//! - **Probes**: `GET /healthz`, `GET /readyz`
//! - **Public reads**
//!   - `GET  /projects`, `GET /projects/{slug}`
//!   - `GET  /settings`, `GET /settings/{key}`
//!   - `POST /contact`: contact form submission
//!   - `GET|HEAD /storage/{bucket}/{*key}`: stored image binaries
//! - **Admin** (bearer token, see [`require_admin`])
//!   - `GET|POST /admin/media`, `POST /admin/media/batch`
//!   - `POST /admin/media/associate`, `POST /admin/media/reconcile`
//!   - `GET|PATCH|DELETE /admin/media/{id}`
//!   - `GET|POST /admin/projects`, `GET|PATCH|DELETE /admin/projects/{id}`
//!   - `GET /admin/messages`, `GET /admin/messages/stats`
//!   - `GET|PATCH|DELETE /admin/messages/{id}`
//!   - `GET /admin/settings`, `PUT|DELETE /admin/settings/{key}`

use crate::{
    handlers::{
        auth::require_admin,
        contact_handlers::{
            delete_message, get_message, list_messages, message_stats, submit_contact,
            update_message,
        },
        health_handlers::{healthz, readyz},
        media_handlers::{
            MAX_BATCH_FILES, associate_media, delete_media, get_media, list_media,
            reconcile_media, update_media, upload_batch, upload_single,
        },
        object_handlers::{get_object, head_object},
        project_handlers::{
            create_project, delete_project, get_project, get_project_by_slug, list_projects,
            update_project,
        },
        settings_handlers::{delete_setting, get_setting, list_settings, put_setting},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
};

/// Multipart framing allowance on top of the file payloads.
const FORM_OVERHEAD_BYTES: usize = 1024 * 1024;

/// Build the application router over `state`.
pub fn routes(state: AppState) -> Router {
    let body_limit = (state.config.max_raw_bytes as usize)
        .saturating_mul(MAX_BATCH_FILES)
        .saturating_add(FORM_OVERHEAD_BYTES);

    let admin = Router::new()
        .route("/media", get(list_media).post(upload_single))
        .route("/media/batch", post(upload_batch))
        .route("/media/associate", post(associate_media))
        .route("/media/reconcile", post(reconcile_media))
        .route(
            "/media/{id}",
            get(get_media).patch(update_media).delete(delete_media),
        )
        .route("/projects", get(list_projects).post(create_project))
        .route(
            "/projects/{id}",
            get(get_project).patch(update_project).delete(delete_project),
        )
        .route("/settings", get(list_settings))
        .route("/settings/{key}", put(put_setting).delete(delete_setting))
        .route("/messages", get(list_messages))
        .route("/messages/stats", get(message_stats))
        .route(
            "/messages/{id}",
            get(get_message).patch(update_message).delete(delete_message),
        )
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .layer(DefaultBodyLimit::max(body_limit));

    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/projects", get(list_projects))
        .route("/projects/{slug}", get(get_project_by_slug))
        .route("/settings", get(list_settings))
        .route("/settings/{key}", get(get_setting))
        .route("/contact", post(submit_contact))
        .route("/storage/{bucket}/{*key}", get(get_object).head(head_object))
        .nest("/admin", admin)
        .with_state(state)
}
