use crate::core::errors::ConfigError;
use std::env;
use tracing::Level;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_MAX_UPLOAD_MB: usize = 200;
/// 2^30 / 6 pixels, about 512 MiB of 8-bit RGB
pub const DEFAULT_MAX_IMAGE_PIXELS: u64 = 178_956_970;
pub const DEFAULT_PDF_JPEG_QUALITY: u8 = 75;
pub const DEFAULT_PDF_RESOLUTION: f32 = 72.0;

/// Server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
    pub log_level: Level,
    pub max_upload_mb: usize,
}

/// Decode limits
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    pub max_image_pixels: u64,
}

/// PDF page settings
#[derive(Debug, Clone)]
pub struct PdfConfig {
    pub jpeg_quality: u8,
    /// Pixels per inch used to size the MediaBox
    pub resolution: f32,
}

/// Main application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub limits: LimitsConfig,
    pub pdf: PdfConfig,
}

impl Config {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if it exists
        let _ = dotenvy::dotenv();

        let config = Self::load_from_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Built-in defaults without touching the environment
    pub fn with_defaults() -> Self {
        Self {
            server: ServerConfig {
                port: DEFAULT_PORT,
                host: "0.0.0.0".to_string(),
                log_level: Level::INFO,
                max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
            },
            limits: LimitsConfig {
                max_image_pixels: DEFAULT_MAX_IMAGE_PIXELS,
            },
            pdf: PdfConfig {
                jpeg_quality: DEFAULT_PDF_JPEG_QUALITY,
                resolution: DEFAULT_PDF_RESOLUTION,
            },
        }
    }

    fn load_from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("LOG_LEVEL")
            .ok()
            .and_then(|s| parse_level(&s))
            .unwrap_or(Level::INFO);

        let port = match env::var("SERVER_PORT") {
            Ok(raw) => raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::EnvVarError(format!("SERVER_PORT={raw}")))?,
            Err(_) => DEFAULT_PORT,
        };

        Ok(Self {
            server: ServerConfig {
                port,
                host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                log_level,
                max_upload_mb: env::var("MAX_UPLOAD_MB")
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_MAX_UPLOAD_MB),
            },
            limits: LimitsConfig {
                max_image_pixels: env::var("MAX_IMAGE_PIXELS")
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_MAX_IMAGE_PIXELS),
            },
            pdf: PdfConfig {
                jpeg_quality: env::var("PDF_JPEG_QUALITY")
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_PDF_JPEG_QUALITY),
                resolution: env::var("PDF_RESOLUTION")
                    .ok()
                    .and_then(|s| s.trim().parse().ok())
                    .unwrap_or(DEFAULT_PDF_RESOLUTION),
            },
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort);
        }

        if !(1..=4096).contains(&self.server.max_upload_mb) {
            return Err(ConfigError::InvalidUploadLimit(self.server.max_upload_mb));
        }

        if self.limits.max_image_pixels == 0 {
            return Err(ConfigError::InvalidPixelLimit);
        }

        if !(1..=100).contains(&self.pdf.jpeg_quality) {
            return Err(ConfigError::InvalidPdfQuality(self.pdf.jpeg_quality));
        }

        if !self.pdf.resolution.is_finite() || self.pdf.resolution <= 0.0 {
            return Err(ConfigError::InvalidPdfResolution(self.pdf.resolution));
        }

        Ok(())
    }

    pub fn server_port(&self) -> u16 {
        self.server.port
    }

    pub fn server_host(&self) -> &str {
        &self.server.host
    }

    pub fn log_level(&self) -> Level {
        self.server.log_level
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.server.max_upload_mb * 1024 * 1024
    }

    pub fn max_image_pixels(&self) -> u64 {
        self.limits.max_image_pixels
    }

    pub fn pdf_jpeg_quality(&self) -> u8 {
        self.pdf.jpeg_quality
    }

    pub fn pdf_resolution(&self) -> f32 {
        self.pdf.resolution
    }
}

fn parse_level(raw: &str) -> Option<Level> {
    match raw.trim().to_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}
