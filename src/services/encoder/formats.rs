use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use img_parts::{png::Png, Bytes, ImageICC};
use std::borrow::Cow;
use std::io::Cursor;
use tiff::encoder::{colortype, Compression, TiffEncoder as TiffWriter, TiffValue};
use tiff::tags::Tag;

use super::{check_u16_dimensions, EncodeOptions, FormatEncoder};
use crate::core::errors::{EncodeError, EncodeResult};
use crate::core::types::{ImageMetadata, OutputFormat, SourceImage};
use crate::utils::image_ops::{expand_palette, flatten_to_opaque, force_rgb};

pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_WEBP_QUALITY: u8 = 80;

const WEBP_MAX_DIMENSION: u32 = 16383;
const WEBP_METHOD_MAX_EFFORT: i32 = 6;
const EXIF_MARKER: &[u8] = b"Exif\0\0";

fn write_with_image_crate(image: &DynamicImage, format: ImageFormat) -> EncodeResult<Vec<u8>> {
    let mut buf = Vec::new();
    image.write_to(&mut Cursor::new(&mut buf), format)?;
    Ok(buf)
}

/// JPEG through jpeg-encoder: optional progressive scan, 4:2:0 chroma
/// subsampling. Carries ICC (APP2) and EXIF (APP1).
///
/// Optimized Huffman tables stay off: the image crate's decoder reads
/// jpeg-encoder 0.6 output with optimized tables as solid black.
pub struct JpegEncoder;

impl FormatEncoder for JpegEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Jpeg
    }

    fn supports_icc(&self) -> bool {
        true
    }

    fn supports_exif(&self) -> bool {
        true
    }

    fn prepare(&self, source: SourceImage, background: Rgb<u8>) -> SourceImage {
        force_rgb(source, background)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        options: &EncodeOptions,
        metadata: &ImageMetadata,
    ) -> EncodeResult<Vec<u8>> {
        let (width, height) = check_u16_dimensions(self.format(), image)?;
        let rgb: Cow<'_, RgbImage> = match image {
            DynamicImage::ImageRgb8(rgb) => Cow::Borrowed(rgb),
            other => Cow::Owned(other.to_rgb8()),
        };

        let quality = options.quality.unwrap_or(DEFAULT_JPEG_QUALITY);
        let mut buf = Vec::new();
        let mut encoder = jpeg_encoder::Encoder::new(&mut buf, quality);

        if options.tuned {
            encoder.set_progressive(options.progressive);
            encoder.set_sampling_factor(jpeg_encoder::SamplingFactor::R_4_2_0);
        }

        if let Some(icc) = &metadata.icc_profile {
            encoder.add_icc_profile(icc)?;
        }
        if let Some(exif) = &metadata.exif {
            let mut segment = Vec::with_capacity(EXIF_MARKER.len() + exif.len());
            segment.extend_from_slice(EXIF_MARKER);
            segment.extend_from_slice(exif);
            encoder.add_app_segment(1, &segment)?;
        }

        encoder.encode(rgb.as_raw(), width, height, jpeg_encoder::ColorType::Rgb)?;
        Ok(buf)
    }
}

/// PNG through the image crate. ICC goes into an iCCP chunk.
pub struct PngEncoder;

impl FormatEncoder for PngEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Png
    }

    fn supports_icc(&self) -> bool {
        true
    }

    fn prepare(&self, source: SourceImage, _background: Rgb<u8>) -> SourceImage {
        expand_palette(source)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        _options: &EncodeOptions,
        metadata: &ImageMetadata,
    ) -> EncodeResult<Vec<u8>> {
        // PNG has no float samples; keep the precision in 16 bits
        let image: Cow<'_, DynamicImage> = match image {
            DynamicImage::ImageRgb32F(_) => Cow::Owned(DynamicImage::ImageRgb16(image.to_rgb16())),
            DynamicImage::ImageRgba32F(_) => Cow::Owned(DynamicImage::ImageRgba16(image.to_rgba16())),
            other => Cow::Borrowed(other),
        };

        let encoded = write_with_image_crate(&image, ImageFormat::Png)?;
        match &metadata.icc_profile {
            Some(icc) => embed_icc_png(encoded, icc),
            None => Ok(encoded),
        }
    }
}

/// Insert an iCCP chunk; img-parts handles the name and zlib payload
fn embed_icc_png(png_data: Vec<u8>, icc: &[u8]) -> EncodeResult<Vec<u8>> {
    let mut png = Png::from_bytes(Bytes::from(png_data))
        .map_err(|e| EncodeError::Metadata(format!("failed to parse PNG for ICC: {e}")))?;
    png.set_icc_profile(Some(Bytes::copy_from_slice(icc)));

    let mut output = Vec::new();
    png.encoder().write_to(&mut output)?;
    Ok(output)
}

/// WebP through libwebp: method 6, lossless on request, alpha kept
pub struct WebPEncoder;

impl FormatEncoder for WebPEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::WebP
    }

    fn encode(
        &self,
        image: &DynamicImage,
        options: &EncodeOptions,
        _metadata: &ImageMetadata,
    ) -> EncodeResult<Vec<u8>> {
        let (width, height) = (image.width(), image.height());
        if width == 0 || height == 0 || width > WEBP_MAX_DIMENSION || height > WEBP_MAX_DIMENSION {
            return Err(EncodeError::InvalidDimensions {
                format: self.format(),
                width,
                height,
            });
        }

        let alpha = image.color().has_alpha();
        let buffer = if alpha {
            image.to_rgba8().into_raw()
        } else {
            image.to_rgb8().into_raw()
        };
        let encoder = if alpha {
            webp::Encoder::from_rgba(&buffer, width, height)
        } else {
            webp::Encoder::from_rgb(&buffer, width, height)
        };

        let mut config = webp::WebPConfig::new()
            .map_err(|_| EncodeError::WebP("failed to create WebPConfig".to_string()))?;
        config.quality = f32::from(options.quality.unwrap_or(DEFAULT_WEBP_QUALITY));
        if options.tuned {
            config.method = WEBP_METHOD_MAX_EFFORT;
            config.lossless = i32::from(options.lossless);
        }

        let memory = encoder
            .encode_advanced(&config)
            .map_err(|e| EncodeError::WebP(format!("{e:?}")))?;
        Ok(memory.to_vec())
    }
}

/// TIFF through the tiff crate: LZW strips, ICC in the IccProfile tag
pub struct TiffEncoder;

impl FormatEncoder for TiffEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Tiff
    }

    fn supports_icc(&self) -> bool {
        true
    }

    fn prepare(&self, source: SourceImage, background: Rgb<u8>) -> SourceImage {
        flatten_to_opaque(source, background)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        options: &EncodeOptions,
        metadata: &ImageMetadata,
    ) -> EncodeResult<Vec<u8>> {
        let (width, height) = (image.width(), image.height());
        let icc = metadata.icc_profile.as_deref();
        let lzw = options.tuned;

        match image {
            DynamicImage::ImageLuma8(gray) => {
                write_tiff::<colortype::Gray8>(gray.as_raw(), width, height, icc, lzw)
            }
            DynamicImage::ImageLuma16(gray) => {
                write_tiff::<colortype::Gray16>(gray.as_raw(), width, height, icc, lzw)
            }
            DynamicImage::ImageRgb16(rgb) => {
                write_tiff::<colortype::RGB16>(rgb.as_raw(), width, height, icc, lzw)
            }
            DynamicImage::ImageRgb8(rgb) => {
                write_tiff::<colortype::RGB8>(rgb.as_raw(), width, height, icc, lzw)
            }
            other => {
                let rgb = other.to_rgb8();
                write_tiff::<colortype::RGB8>(rgb.as_raw(), width, height, icc, lzw)
            }
        }
    }
}

fn write_tiff<C>(
    data: &[C::Inner],
    width: u32,
    height: u32,
    icc: Option<&[u8]>,
    lzw: bool,
) -> EncodeResult<Vec<u8>>
where
    C: colortype::ColorType,
    [C::Inner]: TiffValue,
{
    let compression = if lzw { Compression::Lzw } else { Compression::Uncompressed };
    let mut cursor = Cursor::new(Vec::new());
    {
        let mut tiff = TiffWriter::new(&mut cursor)?.with_compression(compression);
        let mut image = tiff.new_image::<C>(width, height)?;
        if let Some(icc) = icc {
            image.encoder().write_tag(Tag::IccProfile, icc)?;
        }
        image.write_data(data)?;
    }
    Ok(cursor.into_inner())
}

/// GIF through the image crate (quantized to a 256-color palette)
pub struct GifEncoder;

impl FormatEncoder for GifEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Gif
    }

    fn encode(
        &self,
        image: &DynamicImage,
        _options: &EncodeOptions,
        _metadata: &ImageMetadata,
    ) -> EncodeResult<Vec<u8>> {
        check_u16_dimensions(self.format(), image)?;
        let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
        write_with_image_crate(&rgba, ImageFormat::Gif)
    }
}

/// BMP through the image crate, 8 bits per channel
pub struct BmpEncoder;

impl FormatEncoder for BmpEncoder {
    fn format(&self) -> OutputFormat {
        OutputFormat::Bmp
    }

    fn prepare(&self, source: SourceImage, background: Rgb<u8>) -> SourceImage {
        flatten_to_opaque(source, background)
    }

    fn encode(
        &self,
        image: &DynamicImage,
        _options: &EncodeOptions,
        _metadata: &ImageMetadata,
    ) -> EncodeResult<Vec<u8>> {
        let image: Cow<'_, DynamicImage> = match image {
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageRgb8(_) => Cow::Borrowed(image),
            DynamicImage::ImageLuma16(_) => Cow::Owned(DynamicImage::ImageLuma8(image.to_luma8())),
            other => Cow::Owned(DynamicImage::ImageRgb8(other.to_rgb8())),
        };
        write_with_image_crate(&image, ImageFormat::Bmp)
    }
}
