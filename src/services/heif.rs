// HEIF/HEIC decoding through libheif

use image::{DynamicImage, RgbImage, RgbaImage};
use libheif_rs::{ColorSpace, HeifContext, LibHeif, RgbChroma};

use crate::core::errors::{ConversionError, ConversionResult};
use crate::core::types::{ColorMode, ImageMetadata, Orientation, SourceImage};
use crate::services::codec::{check_pixel_limit, is_heif, DecoderPlugin};
use crate::utils::exif;

/// Decodes the primary image of a HEIF container.
///
/// libheif applies the container's rotation and mirror boxes while decoding,
/// so the result is already upright and the EXIF orientation is reset.
pub struct HeifDecoder {
    lib: LibHeif,
}

impl HeifDecoder {
    pub fn new() -> Self {
        Self {
            lib: LibHeif::new(),
        }
    }
}

impl Default for HeifDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl DecoderPlugin for HeifDecoder {
    fn name(&self) -> &'static str {
        "heif"
    }

    fn can_decode(&self, data: &[u8]) -> bool {
        is_heif(data)
    }

    fn decode(&self, data: &[u8], max_pixels: u64) -> ConversionResult<SourceImage> {
        let ctx = HeifContext::read_from_bytes(data)
            .map_err(|e| ConversionError::Decode(format!("invalid HEIF container: {e}")))?;
        let handle = ctx
            .primary_image_handle()
            .map_err(|e| ConversionError::Decode(format!("no primary HEIF image: {e}")))?;

        let (width, height) = (handle.width(), handle.height());
        check_pixel_limit(width, height, max_pixels)?;

        let alpha = handle.has_alpha_channel();
        let chroma = if alpha { RgbChroma::Rgba } else { RgbChroma::Rgb };
        let decoded = self
            .lib
            .decode(&handle, ColorSpace::Rgb(chroma), None)
            .map_err(|e| ConversionError::Decode(format!("HEIF decode failed: {e}")))?;

        let planes = decoded.planes();
        let plane = planes
            .interleaved
            .ok_or_else(|| ConversionError::Decode("HEIF image has no interleaved plane".into()))?;

        let channels = if alpha { 4 } else { 3 };
        let row_len = plane.width as usize * channels;
        let mut packed = Vec::with_capacity(row_len * plane.height as usize);
        for row in plane.data.chunks(plane.stride).take(plane.height as usize) {
            packed.extend_from_slice(&row[..row_len]);
        }

        let pixels = if alpha {
            RgbaImage::from_raw(plane.width, plane.height, packed).map(DynamicImage::ImageRgba8)
        } else {
            RgbImage::from_raw(plane.width, plane.height, packed).map(DynamicImage::ImageRgb8)
        }
        .ok_or_else(|| ConversionError::Decode("HEIF plane size mismatch".into()))?;

        let icc_profile = handle.color_profile_raw().map(|profile| profile.data);

        let mut exif_block = handle
            .metadata_block_ids(b"Exif")
            .first()
            .and_then(|id| handle.metadata(*id).ok())
            .and_then(|raw| {
                // 4-byte big-endian offset to the TIFF header precedes the payload
                let offset = u32::from_be_bytes(raw.get(0..4)?.try_into().ok()?) as usize;
                raw.get(4 + offset..).map(<[u8]>::to_vec)
            });
        if let Some(block) = exif_block.as_mut() {
            exif::reset_orientation(block);
        }

        Ok(SourceImage {
            mode: ColorMode::of(&pixels),
            pixels,
            metadata: ImageMetadata {
                icc_profile,
                exif: exif_block,
            },
            orientation: Orientation::Normal,
        })
    }
}
