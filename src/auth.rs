use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};

pub const API_KEY_ENV: &str = "BLOCKGRADE_API_KEY";

/// Shared secret for the protected routes; `None` when unconfigured.
#[derive(Debug, Clone, Default)]
pub struct ApiKey(pub Option<String>);

impl ApiKey {
    pub fn from_env() -> Self {
        Self(
            std::env::var(API_KEY_ENV)
                .ok()
                .filter(|k| !k.trim().is_empty()),
        )
    }
}

pub async fn api_key_auth(State(key): State<ApiKey>, req: Request<Body>, next: Next) -> Response {
    let Some(expected) = key.0 else {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({
                "ok": false,
                "error": "API key not configured"
            })),
        )
            .into_response();
    };

    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    match auth_header {
        Some(value) if value == format!("Bearer {}", expected) => next.run(req).await,
        _ => {
            tracing::debug!(path = %req.uri().path(), "rejected unauthenticated request");
            (
                StatusCode::UNAUTHORIZED,
                Json(serde_json::json!({
                    "ok": false,
                    "error": "Unauthorized"
                })),
            )
                .into_response()
        }
    }
}
