//! Bearer token gate for the `/admin` routes.

use crate::{errors::AppError, state::AppState};
use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::{IntoResponse, Response},
};
use subtle::ConstantTimeEq;

fn secure_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Rejects the request with 401 unless it carries the configured admin token.
/// Without a configured token every admin request is rejected.
pub async fn require_admin(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(expected) = state.config.admin_token.as_deref() else {
        tracing::warn!("admin request refused: no admin token configured");
        return AppError::unauthorized().into_response();
    };

    let authorized = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .is_some_and(|token| secure_compare(token.trim(), expected));

    if !authorized {
        tracing::warn!(path = %request.uri().path(), "admin request with missing or invalid token");
        return AppError::unauthorized().into_response();
    }
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compare_requires_exact_match() {
        assert!(secure_compare("s3cret", "s3cret"));
        assert!(!secure_compare("s3cret", "s3cre"));
        assert!(!secure_compare("s3creT", "s3cret"));
    }
}
