// Upload decoding with metadata extraction and an optional plugin registry
//
// Built-in formats go through the `image` crate. Formats it cannot read
// (HEIF/HEIC) are handled by plugins registered at startup.

use image::{DynamicImage, ExtendedColorType, ImageDecoder, ImageFormat, ImageReader};
use std::io::Cursor;
use tracing::{debug, info};

use crate::core::errors::{ConversionError, ConversionResult};
use crate::core::types::{ColorMode, ImageMetadata, Orientation, SourceImage};
use crate::utils::exif::{read_orientation, strip_exif_marker};

/// Decoder for a container the built-in path does not understand
pub trait DecoderPlugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Cheap signature sniff on the raw upload
    fn can_decode(&self, data: &[u8]) -> bool;

    fn decode(&self, data: &[u8], max_pixels: u64) -> ConversionResult<SourceImage>;
}

/// Decoding front door shared by every request
pub struct ImageCodec {
    plugins: Vec<Box<dyn DecoderPlugin>>,
    max_pixels: u64,
}

impl ImageCodec {
    /// Codec with no plugins
    pub fn new(max_pixels: u64) -> Self {
        Self {
            plugins: Vec::new(),
            max_pixels,
        }
    }

    /// Codec with every plugin compiled into this build
    pub fn with_default_plugins(max_pixels: u64) -> Self {
        #[allow(unused_mut)]
        let mut codec = Self::new(max_pixels);

        #[cfg(feature = "heif")]
        codec.register(Box::new(crate::services::heif::HeifDecoder::new()));

        info!(
            "Image codec ready (plugins: [{}], pixel limit: {})",
            codec.plugin_names().join(", "),
            max_pixels
        );
        codec
    }

    pub fn register(&mut self, plugin: Box<dyn DecoderPlugin>) {
        debug!("Registering decoder plugin: {}", plugin.name());
        self.plugins.push(plugin);
    }

    pub fn plugin_names(&self) -> Vec<&'static str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn max_pixels(&self) -> u64 {
        self.max_pixels
    }

    /// Decode an upload into pixels plus ICC, EXIF and orientation
    pub fn decode(&self, data: &[u8]) -> ConversionResult<SourceImage> {
        if let Some(plugin) = self.plugins.iter().find(|p| p.can_decode(data)) {
            debug!("Decoding with plugin {}", plugin.name());
            return plugin.decode(data, self.max_pixels);
        }

        if is_heif(data) {
            return Err(ConversionError::UnsupportedFormat(
                "HEIF/HEIC decoding is not available in this build".to_string(),
            ));
        }

        self.decode_builtin(data)
    }

    fn decode_builtin(&self, data: &[u8]) -> ConversionResult<SourceImage> {
        let mut reader = ImageReader::new(Cursor::new(data))
            .with_guessed_format()
            .map_err(|e| ConversionError::Decode(e.to_string()))?;

        let Some(format) = reader.format() else {
            return Err(ConversionError::Decode(
                "cannot identify image file".to_string(),
            ));
        };

        // The pixel guard below replaces the reader's allocation limits
        reader.no_limits();
        let mut decoder = reader.into_decoder()?;

        let (width, height) = decoder.dimensions();
        check_pixel_limit(width, height, self.max_pixels)?;

        let icc_profile = decoder.icc_profile().ok().flatten();
        let exif = decoder
            .exif_metadata()
            .ok()
            .flatten()
            .map(|raw| strip_exif_marker(&raw).to_vec());
        let original = decoder.original_color_type();

        let pixels = DynamicImage::from_decoder(decoder)?;
        let mode = detect_mode(format, data, original, &pixels);
        let orientation = exif
            .as_deref()
            .map(read_orientation)
            .unwrap_or(Orientation::Normal);

        debug!(
            "Decoded {:?} {}x{} mode={:?} icc={} exif={} orientation={:?}",
            format,
            width,
            height,
            mode,
            icc_profile.is_some(),
            exif.is_some(),
            orientation
        );

        Ok(SourceImage {
            pixels,
            mode,
            metadata: ImageMetadata { icc_profile, exif },
            orientation,
        })
    }
}

/// Reject images whose pixel count exceeds `max_pixels`
pub fn check_pixel_limit(width: u32, height: u32, max_pixels: u64) -> ConversionResult<()> {
    let pixels = u64::from(width) * u64::from(height);
    if pixels > max_pixels {
        return Err(ConversionError::DecompressionBomb {
            pixels,
            limit: max_pixels,
        });
    }
    Ok(())
}

/// ISO-BMFF `ftyp` box with a HEIF brand
pub fn is_heif(data: &[u8]) -> bool {
    const BRANDS: [&[u8; 4]; 10] = [
        b"heic", b"heix", b"hevc", b"hevx", b"heim", b"heis", b"hevm", b"hevs", b"mif1", b"msf1",
    ];
    if data.len() < 12 || &data[4..8] != b"ftyp" {
        return false;
    }
    BRANDS.iter().any(|brand| &data[8..12] == brand.as_slice())
}

fn detect_mode(
    format: ImageFormat,
    data: &[u8],
    original: ExtendedColorType,
    pixels: &DynamicImage,
) -> ColorMode {
    // IHDR colour type 3 sits at byte 25 of every PNG
    const PNG_COLOR_TYPE_OFFSET: usize = 25;

    match (format, original) {
        (ImageFormat::Png, _) if data.get(PNG_COLOR_TYPE_OFFSET) == Some(&3) => ColorMode::Palette,
        (ImageFormat::Gif, _) => ColorMode::Palette,
        (_, ExtendedColorType::L1) => ColorMode::Monochrome,
        (_, ExtendedColorType::Cmyk8) => ColorMode::Other,
        _ => ColorMode::of(pixels),
    }
}
