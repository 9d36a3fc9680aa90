// HTTP surface: router, shared state and handlers

pub mod error;
pub mod form;

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::core::config::Config;
use crate::core::errors::ApiError;
use crate::core::types::ResponseBundle;
use crate::middleware::localhost_cors;
use crate::orchestration::ConversionOrchestrator;
use crate::utils::Metrics;

pub use form::ConvertForm;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub orchestrator: Arc<ConversionOrchestrator>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let metrics = Metrics::new();
        let orchestrator = Arc::new(ConversionOrchestrator::new(&config, metrics.clone()));
        Self {
            config: Arc::new(config),
            orchestrator,
            metrics,
        }
    }
}

/// Router with every endpoint and layer
pub fn app(state: AppState) -> Router {
    let body_limit = state.config.max_upload_bytes();

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics_endpoint))
        .route("/stats", get(stats_endpoint))
        .route("/convert", post(convert))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(localhost_cors())
        .layer(TraceLayer::new_for_http())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

/// Prometheus metrics endpoint
async fn metrics_endpoint(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.to_prometheus(),
    )
}

/// Detailed statistics endpoint (JSON)
async fn stats_endpoint(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    serde_json::to_value(state.metrics.snapshot())
        .map(Json)
        .map_err(|e| ApiError::Internal(format!("Failed to serialize metrics: {e}")))
}

/// Convert uploaded images
///
/// # Request Format:
/// - multipart/form-data
/// - Field "files": one or more uploads
/// - Field "to": target format (jpg, jpeg, png, webp, tiff, gif, bmp, pdf)
/// - Optional: quality, lossless, progressive, keep_metadata, to_srgb, fit,
///   width, height, rotate_deg, crop_x/crop_y/crop_w/crop_h, bg
///
/// # Response:
/// The converted file, a ZIP bundle or a PDF, as an attachment
async fn convert(State(state): State<AppState>, multipart: Multipart) -> Result<Response, ApiError> {
    let start_time = Instant::now();
    state.metrics.record_endpoint_request("/convert");

    let result = run_conversion(&state, multipart).await;
    state.metrics.record_request(result.is_ok());

    let bundle = result?;
    info!(
        "Request completed in {:.2}s: {}",
        start_time.elapsed().as_secs_f64(),
        bundle.filename()
    );
    Ok(attachment(bundle))
}

async fn run_conversion(state: &AppState, multipart: Multipart) -> Result<ResponseBundle, ApiError> {
    let form = ConvertForm::from_multipart(multipart).await?;
    let (files, request) = form.into_request()?;
    info!("Received convert request: {} files -> {}", files.len(), request.format);

    Ok(state.orchestrator.process_batch(files, &request).await?)
}

fn attachment(bundle: ResponseBundle) -> Response {
    let content_type = bundle.content_type();
    let disposition = content_disposition(bundle.filename());
    let output = bundle.into_output();

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_DISPOSITION, disposition),
        ],
        output.data,
    )
        .into_response()
}

/// `attachment; filename="…"`, plus an RFC 5987 `filename*` for names an
/// ASCII header cannot carry verbatim
pub fn content_disposition(filename: &str) -> String {
    let fallback: String = filename
        .chars()
        .map(|c| {
            if c.is_ascii() && !c.is_ascii_control() && c != '"' && c != '\\' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if fallback == filename {
        format!("attachment; filename=\"{filename}\"")
    } else {
        format!(
            "attachment; filename=\"{fallback}\"; filename*=UTF-8''{}",
            urlencoding::encode(filename)
        )
    }
}
