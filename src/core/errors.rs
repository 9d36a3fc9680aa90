// Error types for the conversion service
//
// thiserror enums per concern. Per-file failures (`ConversionError`) never
// escape a batch; they are folded into `FileFailure` entries. Request-level
// failures (`ApiError`) become JSON responses in the api module.

use thiserror::Error;

use crate::core::types::{FileFailure, OutputFormat};

/// Failures of a single encode attempt
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),

    #[error("JPEG encoding failed: {0}")]
    Jpeg(#[from] jpeg_encoder::EncodingError),

    #[error("WebP encoding failed: {0}")]
    WebP(String),

    #[error("TIFF encoding failed: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("metadata embedding failed: {0}")]
    Metadata(String),

    #[error("I/O error while encoding: {0}")]
    Io(#[from] std::io::Error),

    #[error("{format} cannot hold a {width}x{height} image")]
    InvalidDimensions {
        format: OutputFormat,
        width: u32,
        height: u32,
    },

    #[error("{0} is not encoded through the image encoder")]
    UnsupportedTarget(OutputFormat),
}

/// PDF assembly errors
#[derive(Debug, Error)]
pub enum PdfError {
    #[error("page encoding failed: {0}")]
    PageEncode(#[from] EncodeError),

    #[error("document serialization failed: {0}")]
    Document(#[from] lopdf::Error),

    #[error("I/O error while writing PDF: {0}")]
    Io(#[from] std::io::Error),

    #[error("no pages to assemble")]
    Empty,
}

/// ZIP bundle errors
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("zip write failed: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("I/O error while writing archive: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-file pipeline errors
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("{0}")]
    Decode(String),

    #[error("{0}")]
    UnsupportedFormat(String),

    #[error("image is {pixels} pixels, exceeding the limit of {limit}")]
    DecompressionBomb { pixels: u64, limit: u64 },

    #[error("requested output of {width}x{height} exceeds the limit of {limit} pixels")]
    OutputTooLarge { width: u32, height: u32, limit: u64 },

    #[error("{format} encode failed after {attempts} attempts: {source}")]
    Encode {
        format: OutputFormat,
        attempts: usize,
        #[source]
        source: EncodeError,
    },

    #[error("{0}")]
    Pdf(#[from] PdfError),

    #[error("{0}")]
    TaskJoin(String),
}

impl ConversionError {
    /// Error kind label used in `errors.txt` lines and failure details
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "DecodeError",
            Self::UnsupportedFormat(_) => "UnsupportedFormatError",
            Self::DecompressionBomb { .. } => "DecompressionBombError",
            Self::OutputTooLarge { .. } => "OutputSizeError",
            Self::Encode { .. } => "EncodeError",
            Self::Pdf(_) => "PdfError",
            Self::TaskJoin(_) => "TaskJoinError",
        }
    }

    pub fn into_failure(self, filename: &str) -> FileFailure {
        FileFailure {
            filename: filename.to_string(),
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<image::ImageError> for ConversionError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => Self::UnsupportedFormat(e.to_string()),
            other => Self::Decode(other.to_string()),
        }
    }
}

/// Batch-level outcome that prevents any response body from being built
#[derive(Debug, Error)]
pub enum BatchError {
    #[error("All files failed")]
    AllFailed(Vec<FileFailure>),

    #[error("Archive creation failed: {0}")]
    Archive(#[from] ArchiveError),

    #[error("PDF assembly failed: {0}")]
    Pdf(#[from] PdfError),
}

/// Request-level errors, rendered as JSON by the api module
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("Unsupported output format: {0}")]
    UnsupportedFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Malformed multipart body: {0}")]
    Multipart(String),

    #[error("Upload too large: {0}")]
    PayloadTooLarge(String),

    #[error("All files failed")]
    AllFailed(Vec<String>),

    #[error("{0}")]
    Internal(String),
}

impl From<BatchError> for ApiError {
    fn from(err: BatchError) -> Self {
        match err {
            BatchError::AllFailed(failures) => {
                Self::AllFailed(failures.iter().map(ToString::to_string).collect())
            }
            other => Self::Internal(other.to_string()),
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Server port must be > 0")]
    InvalidPort,

    #[error("Upload limit must be between 1 and 4096 MB, got {0}")]
    InvalidUploadLimit(usize),

    #[error("Pixel limit must be > 0")]
    InvalidPixelLimit,

    #[error("PDF JPEG quality must be in [1, 100], got {0}")]
    InvalidPdfQuality(u8),

    #[error("PDF resolution must be a positive number, got {0}")]
    InvalidPdfResolution(f32),

    #[error("Environment variable parsing failed: {0}")]
    EnvVarError(String),
}

pub type EncodeResult<T> = Result<T, EncodeError>;
pub type ConversionResult<T> = Result<T, ConversionError>;
