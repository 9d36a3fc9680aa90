pub mod config;
pub mod errors;
pub mod types;

// Re-export commonly used items for convenience
pub use config::Config;
pub use errors::{
    ApiError, ArchiveError, BatchError, ConfigError, ConversionError, EncodeError, PdfError,
};
pub use types::{
    ColorMode, CropRect, EncodedOutput, FileFailure, ImageMetadata, Orientation, OutputFormat,
    ResponseBundle, SourceImage, TransformRequest, UploadedFile,
};
