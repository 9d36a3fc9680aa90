// Domain types shared by the conversion pipeline

use image::{ColorType, DynamicImage};
use serde::Serialize;
use std::fmt;

/// Output container requested through the `to` form field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
    Tiff,
    Gif,
    Bmp,
    Pdf,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 7] = [
        OutputFormat::Jpeg,
        OutputFormat::Png,
        OutputFormat::WebP,
        OutputFormat::Tiff,
        OutputFormat::Gif,
        OutputFormat::Bmp,
        OutputFormat::Pdf,
    ];

    /// Case-insensitive lookup; `jpg` and `jpeg` both map to JPEG
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "tiff" => Some(Self::Tiff),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Tiff => "tiff",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Pdf => "pdf",
        }
    }

    /// Canonical file extension including the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Jpeg => ".jpg",
            Self::Png => ".png",
            Self::WebP => ".webp",
            Self::Tiff => ".tiff",
            Self::Gif => ".gif",
            Self::Bmp => ".bmp",
            Self::Pdf => ".pdf",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Channel layout of a raster, tracked separately from the pixel buffer
/// because decoding expands palette and 1-bit sources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ColorMode {
    Monochrome,
    Grayscale,
    GrayscaleAlpha,
    Rgb,
    Rgba,
    Palette,
    Other,
}

impl ColorMode {
    /// Mode implied by the buffer layout alone
    pub fn from_color_type(color: ColorType) -> Self {
        match color {
            ColorType::L8 | ColorType::L16 => Self::Grayscale,
            ColorType::La8 | ColorType::La16 => Self::GrayscaleAlpha,
            ColorType::Rgb8 | ColorType::Rgb16 | ColorType::Rgb32F => Self::Rgb,
            ColorType::Rgba8 | ColorType::Rgba16 | ColorType::Rgba32F => Self::Rgba,
            _ => Self::Other,
        }
    }

    pub fn of(image: &DynamicImage) -> Self {
        Self::from_color_type(image.color())
    }

    /// True for the plain modes an opaque encoder accepts without flattening
    pub fn is_plain_opaque(&self) -> bool {
        matches!(self, Self::Rgb | Self::Grayscale)
    }
}

/// EXIF orientation tag values 1 through 8
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Normal = 1,
    FlipHorizontal = 2,
    Rotate180 = 3,
    FlipVertical = 4,
    Transpose = 5,
    Rotate90 = 6,
    Transverse = 7,
    Rotate270 = 8,
}

impl From<u32> for Orientation {
    fn from(value: u32) -> Self {
        match value {
            2 => Self::FlipHorizontal,
            3 => Self::Rotate180,
            4 => Self::FlipVertical,
            5 => Self::Transpose,
            6 => Self::Rotate90,
            7 => Self::Transverse,
            8 => Self::Rotate270,
            _ => Self::Normal,
        }
    }
}

/// Embedded metadata carried alongside the pixels
#[derive(Debug, Clone, Default)]
pub struct ImageMetadata {
    pub icc_profile: Option<Vec<u8>>,
    /// Raw TIFF-structured EXIF block, without the `Exif\0\0` marker
    pub exif: Option<Vec<u8>>,
}

impl ImageMetadata {
    pub fn is_empty(&self) -> bool {
        self.icc_profile.is_none() && self.exif.is_none()
    }
}

/// A decoded upload, owned by a single per-file pipeline run
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub pixels: DynamicImage,
    pub mode: ColorMode,
    pub metadata: ImageMetadata,
    pub orientation: Orientation,
}

impl SourceImage {
    pub fn new(pixels: DynamicImage) -> Self {
        let mode = ColorMode::of(&pixels);
        Self {
            pixels,
            mode,
            metadata: ImageMetadata::default(),
            orientation: Orientation::Normal,
        }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Transform the pixel buffer, keeping the mode hint when the layout is unchanged
    pub fn map_pixels(self, f: impl FnOnce(DynamicImage) -> DynamicImage) -> Self {
        match self.try_map_pixels(|pixels| Ok::<_, std::convert::Infallible>(f(pixels))) {
            Ok(source) => source,
            Err(never) => match never {},
        }
    }

    /// Fallible [`map_pixels`](Self::map_pixels)
    pub fn try_map_pixels<E>(
        self,
        f: impl FnOnce(DynamicImage) -> Result<DynamicImage, E>,
    ) -> Result<Self, E> {
        let old = ColorMode::of(&self.pixels);
        let pixels = f(self.pixels)?;
        let new = ColorMode::of(&pixels);
        Ok(Self {
            mode: if old == new { self.mode } else { new },
            pixels,
            metadata: self.metadata,
            orientation: self.orientation,
        })
    }

    /// Swap the pixel buffer. Palette and 1-bit hints survive only while the
    /// buffer layout stays the same.
    pub fn replace_pixels(&mut self, pixels: DynamicImage) {
        let old = ColorMode::of(&self.pixels);
        let new = ColorMode::of(&pixels);
        if old != new {
            self.mode = new;
        }
        self.pixels = pixels;
    }
}

/// Crop rectangle as submitted, before clamping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Validated parameters for one conversion call
#[derive(Debug, Clone)]
pub struct TransformRequest {
    pub format: OutputFormat,
    pub quality: Option<i64>,
    pub lossless: bool,
    pub progressive: bool,
    pub keep_metadata: bool,
    pub to_srgb: bool,
    pub fit: bool,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub rotate_deg: i64,
    pub crop: Option<CropRect>,
    pub background: Option<String>,
}

impl TransformRequest {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            quality: None,
            lossless: false,
            progressive: false,
            keep_metadata: false,
            to_srgb: false,
            fit: true,
            width: None,
            height: None,
            rotate_deg: 0,
            crop: None,
            background: None,
        }
    }
}

/// Raw upload as read from the multipart body
#[derive(Debug, Clone)]
pub struct UploadedFile {
    pub filename: String,
    pub data: Vec<u8>,
}

impl UploadedFile {
    pub fn new(filename: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            filename: filename.into(),
            data,
        }
    }

    /// Filename with its last extension removed
    pub fn stem(&self) -> &str {
        file_stem(&self.filename)
    }
}

/// Strip everything after the last dot, keeping dotless names intact
pub fn file_stem(filename: &str) -> &str {
    match filename.rfind('.') {
        Some(idx) => &filename[..idx],
        None => filename,
    }
}

/// One successfully converted file
#[derive(Debug, Clone)]
pub struct EncodedOutput {
    pub filename: String,
    pub data: Vec<u8>,
}

/// Per-file failure collected instead of aborting the batch
#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub filename: String,
    pub kind: &'static str,
    pub message: String,
}

impl fmt::Display for FileFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}: {}", self.filename, self.kind, self.message)
    }
}

/// What a `/convert` call hands back
#[derive(Debug, Clone)]
pub enum ResponseBundle {
    Single(EncodedOutput),
    Archive(EncodedOutput),
    Pdf(EncodedOutput),
}

impl ResponseBundle {
    pub fn filename(&self) -> &str {
        &self.output().filename
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Single(_) => "application/octet-stream",
            Self::Archive(_) => "application/zip",
            Self::Pdf(_) => "application/pdf",
        }
    }

    pub fn output(&self) -> &EncodedOutput {
        match self {
            Self::Single(out) | Self::Archive(out) | Self::Pdf(out) => out,
        }
    }

    pub fn into_output(self) -> EncodedOutput {
        match self {
            Self::Single(out) | Self::Archive(out) | Self::Pdf(out) => out,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, RgbaImage};

    #[test]
    fn test_parse_formats_case_insensitive() {
        assert_eq!(OutputFormat::parse("JPG"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::parse("jpeg"), Some(OutputFormat::Jpeg));
        assert_eq!(OutputFormat::parse("WebP"), Some(OutputFormat::WebP));
        assert_eq!(OutputFormat::parse("Pdf"), Some(OutputFormat::Pdf));
        assert_eq!(OutputFormat::parse("heic"), None);
        assert_eq!(OutputFormat::parse(""), None);
    }

    #[test]
    fn test_canonical_extensions() {
        assert_eq!(OutputFormat::Jpeg.extension(), ".jpg");
        assert_eq!(OutputFormat::Tiff.extension(), ".tiff");
        for format in OutputFormat::ALL {
            assert!(format.extension().starts_with('.'));
        }
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("photo.final.png"), "photo.final");
        assert_eq!(file_stem("noext"), "noext");
        assert_eq!(file_stem(".hidden"), "");
    }

    #[test]
    fn test_orientation_from_u32() {
        assert_eq!(Orientation::from(6), Orientation::Rotate90);
        assert_eq!(Orientation::from(0), Orientation::Normal);
        assert_eq!(Orientation::from(42), Orientation::Normal);
    }

    #[test]
    fn test_replace_pixels_keeps_palette_hint_for_same_layout() {
        let mut source = SourceImage::new(DynamicImage::ImageRgba8(RgbaImage::new(2, 2)));
        source.mode = ColorMode::Palette;

        source.replace_pixels(DynamicImage::ImageRgba8(RgbaImage::new(4, 4)));
        assert_eq!(source.mode, ColorMode::Palette);

        source.replace_pixels(DynamicImage::ImageLuma8(GrayImage::new(4, 4)));
        assert_eq!(source.mode, ColorMode::Grayscale);
    }

    #[test]
    fn test_failure_display() {
        let failure = FileFailure {
            filename: "a.png".to_string(),
            kind: "DecodeError",
            message: "bad header".to_string(),
        };
        assert_eq!(failure.to_string(), "a.png: DecodeError: bad header");
    }
}
