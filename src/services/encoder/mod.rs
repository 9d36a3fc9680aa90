//! Format-specific encoding with tiered fallback
//!
//! Every output format has a [`FormatEncoder`] built by [`EncoderFactory`].
//! [`TieredEncoder`] prepares the pixels for the target, then walks an ordered
//! list of attempts:
//! 1. full parameters with the retained metadata
//! 2. full parameters, no metadata
//! 3. a minimal safe save (quality only)
//!
//! Only when all three fail does the file fail with an encode error.

mod formats;

pub use formats::{BmpEncoder, GifEncoder, JpegEncoder, PngEncoder, TiffEncoder, WebPEncoder};

use image::{DynamicImage, Rgb};
use tracing::{debug, error, warn};

use crate::core::errors::{ConversionError, EncodeError, EncodeResult};
use crate::core::types::{ImageMetadata, OutputFormat, SourceImage, TransformRequest};
use crate::utils::color::background_rgb;

/// Quality used by the minimal tier when the request gave none
pub const MINIMAL_TIER_QUALITY: u8 = 85;

/// Clamp a requested quality into the encoder range
pub fn clamp_quality(quality: i64) -> u8 {
    quality.clamp(1, 100) as u8
}

/// Encoder parameters for a single attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodeOptions {
    pub quality: Option<u8>,
    pub progressive: bool,
    pub lossless: bool,
    /// Format tunables (Huffman optimization, subsampling, effort, compression).
    /// Off for the minimal tier.
    pub tuned: bool,
}

impl EncodeOptions {
    pub fn full(request: &TransformRequest) -> Self {
        Self {
            quality: request.quality.map(clamp_quality),
            progressive: request.progressive,
            lossless: request.lossless,
            tuned: true,
        }
    }

    pub fn minimal(quality: Option<u8>) -> Self {
        Self {
            quality: Some(quality.unwrap_or(MINIMAL_TIER_QUALITY)),
            progressive: false,
            lossless: false,
            tuned: false,
        }
    }
}

/// One per output format
pub trait FormatEncoder: Send + Sync {
    fn format(&self) -> OutputFormat;

    fn supports_icc(&self) -> bool {
        false
    }

    fn supports_exif(&self) -> bool {
        false
    }

    /// Coerce the color mode into something the container accepts
    fn prepare(&self, source: SourceImage, _background: Rgb<u8>) -> SourceImage {
        source
    }

    fn encode(
        &self,
        image: &DynamicImage,
        options: &EncodeOptions,
        metadata: &ImageMetadata,
    ) -> EncodeResult<Vec<u8>>;

    /// Keep the metadata parts this container can hold
    fn retain_metadata(&self, metadata: &ImageMetadata) -> ImageMetadata {
        let icc_profile = if self.supports_icc() {
            metadata.icc_profile.clone()
        } else {
            if metadata.icc_profile.is_some() {
                debug!("{} cannot carry an ICC profile, dropping it", self.format());
            }
            None
        };
        let exif = if self.supports_exif() {
            metadata.exif.clone()
        } else {
            if metadata.exif.is_some() {
                debug!("{} cannot carry EXIF, dropping it", self.format());
            }
            None
        };
        ImageMetadata { icc_profile, exif }
    }
}

pub struct EncoderFactory;

impl EncoderFactory {
    /// Create an encoder for the specified output format. PDF pages are
    /// assembled elsewhere and have no single-image encoder.
    pub fn create(format: OutputFormat) -> EncodeResult<Box<dyn FormatEncoder>> {
        match format {
            OutputFormat::Jpeg => Ok(Box::new(JpegEncoder)),
            OutputFormat::Png => Ok(Box::new(PngEncoder)),
            OutputFormat::WebP => Ok(Box::new(WebPEncoder)),
            OutputFormat::Tiff => Ok(Box::new(TiffEncoder)),
            OutputFormat::Gif => Ok(Box::new(GifEncoder)),
            OutputFormat::Bmp => Ok(Box::new(BmpEncoder)),
            OutputFormat::Pdf => Err(EncodeError::UnsupportedTarget(format)),
        }
    }
}

/// Fallback attempt that produced (or failed to produce) the bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeTier {
    WithMetadata,
    WithoutMetadata,
    Minimal,
}

impl EncodeTier {
    pub fn index(&self) -> usize {
        match self {
            Self::WithMetadata => 0,
            Self::WithoutMetadata => 1,
            Self::Minimal => 2,
        }
    }
}

/// Encoded bytes plus the tier that produced them
#[derive(Debug)]
pub struct EncodedImage {
    pub data: Vec<u8>,
    pub tier: EncodeTier,
}

type Attempt<'a> = &'a dyn Fn() -> EncodeResult<Vec<u8>>;

/// Runs preparation and the three-tier save for one image
#[derive(Debug, Default, Clone, Copy)]
pub struct TieredEncoder;

impl TieredEncoder {
    pub fn encode(
        &self,
        source: SourceImage,
        request: &TransformRequest,
    ) -> Result<EncodedImage, ConversionError> {
        let format = request.format;
        let encoder = EncoderFactory::create(format).map_err(|source| ConversionError::Encode {
            format,
            attempts: 0,
            source,
        })?;
        self.encode_with(encoder.as_ref(), source, request)
    }

    /// Same as [`TieredEncoder::encode`] with an explicit format encoder
    pub fn encode_with(
        &self,
        encoder: &dyn FormatEncoder,
        source: SourceImage,
        request: &TransformRequest,
    ) -> Result<EncodedImage, ConversionError> {
        let format = encoder.format();
        let background = background_rgb(request.background.as_deref());
        let prepared = encoder.prepare(source, background);
        let image = &prepared.pixels;

        let full = EncodeOptions::full(request);
        let minimal = EncodeOptions::minimal(full.quality);
        let metadata = if request.keep_metadata {
            encoder.retain_metadata(&prepared.metadata)
        } else {
            ImageMetadata::default()
        };
        let no_metadata = ImageMetadata::default();

        let with_metadata = || encoder.encode(image, &full, &metadata);
        let without_metadata = || encoder.encode(image, &full, &no_metadata);
        let minimal_save = || encoder.encode(image, &minimal, &no_metadata);

        let attempts: [(EncodeTier, Attempt<'_>); 3] = [
            (EncodeTier::WithMetadata, &with_metadata),
            (EncodeTier::WithoutMetadata, &without_metadata),
            (EncodeTier::Minimal, &minimal_save),
        ];

        let mut tried = 0;
        let mut last_error = None;
        for (tier, attempt) in attempts {
            // Nothing to embed: the first tier would repeat the second
            if tier == EncodeTier::WithMetadata && metadata.is_empty() {
                continue;
            }

            tried += 1;
            match attempt() {
                Ok(data) => return Ok(EncodedImage { data, tier }),
                Err(e) => {
                    match tier {
                        EncodeTier::WithMetadata => {
                            warn!("Save with metadata failed: {}. Retrying without metadata...", e)
                        }
                        EncodeTier::WithoutMetadata => {
                            error!("Save without metadata failed: {}. Applying final fallback...", e)
                        }
                        EncodeTier::Minimal => error!("Minimal {} save failed: {}", format, e),
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(ConversionError::Encode {
            format,
            attempts: tried,
            source: last_error.unwrap_or(EncodeError::UnsupportedTarget(format)),
        })
    }
}

/// Reject sizes a 16-bit dimension field cannot hold
pub(crate) fn check_u16_dimensions(format: OutputFormat, image: &DynamicImage) -> EncodeResult<(u16, u16)> {
    let (width, height) = (image.width(), image.height());
    match (u16::try_from(width), u16::try_from(height)) {
        (Ok(w), Ok(h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(EncodeError::InvalidDimensions {
            format,
            width,
            height,
        }),
    }
}
