// Library exports for the image conversion service

// Core modules
pub mod api;
pub mod core;
pub mod middleware;
pub mod orchestration;
pub mod services;
pub mod utils;

// Re-export commonly used types and functions
pub use core::{
    config::Config,
    errors::{ApiError, BatchError, ConfigError, ConversionError, EncodeError},
    types::{OutputFormat, ResponseBundle, TransformRequest, UploadedFile},
};

pub use api::{app, AppState};

pub use middleware::localhost_cors;

pub use orchestration::ConversionOrchestrator;

pub use services::{ImageCodec, PdfAssembler, TieredEncoder};

pub use utils::Metrics;
