pub mod archive;
pub mod codec;
pub mod encoder;
#[cfg(feature = "heif")]
pub mod heif;
pub mod pdf;

// Re-export commonly used services
pub use archive::build_archive;
pub use codec::{DecoderPlugin, ImageCodec};
pub use encoder::{EncodeTier, EncoderFactory, FormatEncoder, TieredEncoder};
pub use pdf::{PdfAssembler, PdfPage};
