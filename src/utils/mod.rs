pub mod color;
pub mod exif;
pub mod image_ops;
pub mod metrics;

// Re-export commonly used items
pub use color::{background_rgb, convert_to_srgb, normalize_background};
pub use image_ops::{apply_geometry, apply_orientation, has_alpha, GeometryOps};
pub use metrics::Metrics;
