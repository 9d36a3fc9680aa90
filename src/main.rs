// Main entry point for the image conversion service

use image_tool_server::{api, core::Config};

use anyhow::{Context, Result};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::new().context("Failed to load configuration")?;

    // Initialize logging
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::new(format!(
        "image_tool_server={level},tower_http={level}",
        level = match config.log_level() {
            tracing::Level::TRACE => "trace",
            tracing::Level::DEBUG => "debug",
            tracing::Level::INFO => "info",
            tracing::Level::WARN => "warn",
            tracing::Level::ERROR => "error",
        }
    ));

    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("=== IMAGE TOOL SERVER ===");
    info!(
        "Config: upload limit={} MB, pixel limit={}, PDF quality={} @ {} dpi",
        config.server.max_upload_mb,
        config.max_image_pixels(),
        config.pdf_jpeg_quality(),
        config.pdf_resolution()
    );

    let addr = format!("{}:{}", config.server_host(), config.server_port());

    info!("Initializing conversion pipeline...");
    let state = api::AppState::new(config);
    let app = api::app(state);

    info!("{}", "=".repeat(70));
    info!("Server starting on http://{}", addr);
    info!("{}", "-".repeat(70));
    info!("Endpoints:");
    info!("  GET  /health   - Health check");
    info!("  GET  /metrics  - Prometheus metrics");
    info!("  GET  /stats    - Detailed statistics");
    info!("  POST /convert  - Convert images (multipart/form-data)");
    info!("{}", "=".repeat(70));

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app).await?;

    Ok(())
}
