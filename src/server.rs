use crate::auth::{api_key_auth, ApiKey};
use crate::config::Config;
use crate::engine::{GradeResult, Grader};
use crate::feedback::Catalog;
use crate::rules::{normalize, ValidationRules};
use crate::sandbox::Sandbox;
use crate::submission::{Language, SubmissionPayload};
use crate::util::from_json_str;

use axum::debug_handler;
use axum::{
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::Value;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::Span;

/// Shared by every request: one sandbox (so readiness checks are cached)
/// and the configured feedback catalog.
pub struct AppState {
    pub grader: Grader<Sandbox>,
    pub catalog: Catalog,
}

impl AppState {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            grader: Grader::new(cfg.sandbox()),
            catalog: cfg.catalog(),
        }
    }
}

/* ---------------- server ---------------- */

pub async fn serve(cfg: Config, addr: &str) -> anyhow::Result<()> {
    let api_key = ApiKey::from_env();
    if api_key.0.is_none() {
        tracing::warn!("BLOCKGRADE_API_KEY is not set; /grade and /normalize will refuse requests");
    }

    let app = router(Arc::new(AppState::from_config(&cfg)), api_key);

    let socket: SocketAddr = addr.parse()?;
    let listener = TcpListener::bind(socket).await?;

    tracing::info!("blockgrade listening on http://{}", socket);

    axum::serve(listener, app).await?;
    Ok(())
}

pub fn router(state: Arc<AppState>, api_key: ApiKey) -> Router {
    let protected = Router::new()
        .route("/grade", post(grade))
        .route("/normalize", post(normalize_rules))
        .layer(middleware::from_fn_with_state(api_key, api_key_auth));

    Router::new()
        .route("/health", get(health))
        .route("/ready", get(ready))
        .merge(protected)
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<Body>| {
                    tracing::info_span!(
                        "http_request",
                        method = %req.method(),
                        path = %req.uri().path(),
                    )
                })
                .on_response(|res: &Response, latency: Duration, _span: &Span| {
                    tracing::info!(
                        status = res.status().as_u16(),
                        latency_ms = latency.as_millis(),
                        "request completed"
                    );
                }),
        )
}

/* ---------------- request models ---------------- */

#[derive(Debug, Deserialize)]
struct GradeRequest {
    #[serde(default)]
    rules: Value,
    submission: SubmissionPayload,
}

#[derive(Debug, Deserialize)]
struct NormalizeRequest {
    #[serde(default)]
    rules: Value,
}

/* ---------------- endpoints ---------------- */

async fn health() -> &'static str {
    "ok"
}

#[debug_handler]
async fn ready(State(state): State<Arc<AppState>>) -> Response {
    let sandbox = state.grader.executor();
    let (node, python) = tokio::join!(
        sandbox.check_runtime(Language::Javascript),
        sandbox.check_runtime(Language::Python)
    );

    match (node, python) {
        (Ok(node), Ok(python)) => (
            StatusCode::OK,
            Json(serde_json::json!({
                "ready": true,
                "runtimes": { "javascript": node, "python": python },
            })),
        )
            .into_response(),

        (node, python) => {
            let pending: Vec<String> = [node.err(), python.err()]
                .into_iter()
                .flatten()
                .map(|e| e.to_string())
                .collect();

            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(serde_json::json!({
                    "ready": false,
                    "error": "not ready yet",
                    "pending": pending,
                })),
            )
                .into_response()
        }
    }
}

/// Parsed by hand rather than with `Json<_>`: submitted block markup can
/// nest deeper than the extractor allows.
#[debug_handler]
async fn grade(State(state): State<Arc<AppState>>, body: String) -> Response {
    let req: GradeRequest = match from_json_str(&body) {
        Ok(req) => req,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "ok": false, "error": format!("{e:#}") })),
            )
                .into_response()
        }
    };

    let rules = normalize(&req.rules);
    let result: GradeResult = state.grader.grade(&rules, &req.submission).await;

    Json(result.localized(&state.catalog)).into_response()
}

async fn normalize_rules(Json(req): Json<NormalizeRequest>) -> Json<ValidationRules> {
    Json(normalize(&req.rules))
}
