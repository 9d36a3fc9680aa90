// Background color parsing and ICC to sRGB normalization

use image::{DynamicImage, GenericImageView, Rgb, RgbImage, RgbaImage};
use moxcms::{ColorProfile, DataColorSpace, Layout, TransformOptions};
use tracing::{debug, warn};

use crate::core::types::SourceImage;

pub const DEFAULT_BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);

/// Validate a CSS-like color string.
///
/// Accepts named colors, `#rgb`, `#rgba`, `#rrggbb`, `#rrggbbaa` and the
/// functional `rgb()`/`hsl()` forms. Returns the trimmed input when it
/// parses, `None` otherwise.
pub fn normalize_background(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Bare hex digits are not a color without the leading '#'
    if trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return None;
    }
    csscolorparser::parse(trimmed).ok()?;
    Some(trimmed.to_string())
}

/// Resolve an optional background string to an opaque RGB triple.
///
/// Invalid input falls back to white. Any alpha component is ignored since
/// the background canvas is always opaque.
pub fn background_rgb(bg: Option<&str>) -> Rgb<u8> {
    let Some(raw) = bg else {
        return DEFAULT_BACKGROUND;
    };
    match normalize_background(Some(raw)).and_then(|s| csscolorparser::parse(&s).ok()) {
        Some(color) => {
            let [r, g, b, _] = color.to_rgba8();
            Rgb([r, g, b])
        }
        None => {
            debug!("Background '{}' is not a valid color, using white", raw);
            DEFAULT_BACKGROUND
        }
    }
}

/// Convert pixels from the embedded ICC profile into sRGB.
///
/// No-op when disabled or when no profile is embedded. On success the
/// profile is dropped since the pixels are now sRGB. Failures are logged and
/// the untouched image is returned.
pub fn convert_to_srgb(mut source: SourceImage, enabled: bool) -> SourceImage {
    if !enabled {
        return source;
    }
    let Some(icc) = source.metadata.icc_profile.as_deref() else {
        return source;
    };

    match transform_to_srgb(&source.pixels, icc) {
        Ok(pixels) => {
            source.replace_pixels(pixels);
            source.metadata.icc_profile = None;
            source
        }
        Err(e) => {
            warn!("sRGB conversion skipped: {}", e);
            source
        }
    }
}

fn transform_to_srgb(pixels: &DynamicImage, icc: &[u8]) -> Result<DynamicImage, String> {
    let profile = ColorProfile::new_from_slice(icc)
        .map_err(|e| format!("invalid ICC profile: {e:?}"))?;
    let srgb = ColorProfile::new_srgb();

    let alpha = pixels.color().has_alpha();
    let gray_profile = profile.color_space == DataColorSpace::Gray;

    let (src_layout, src) = match (gray_profile, alpha) {
        (true, false) => (Layout::Gray, pixels.to_luma8().into_raw()),
        (true, true) => (Layout::GrayAlpha, pixels.to_luma_alpha8().into_raw()),
        (false, false) => (Layout::Rgb, pixels.to_rgb8().into_raw()),
        (false, true) => (Layout::Rgba, pixels.to_rgba8().into_raw()),
    };
    let (dst_layout, channels) = if alpha {
        (Layout::Rgba, 4)
    } else {
        (Layout::Rgb, 3)
    };

    let transform = profile
        .create_transform_8bit(src_layout, &srgb, dst_layout, TransformOptions::default())
        .map_err(|e| format!("unsupported profile transform: {e:?}"))?;

    let (width, height) = pixels.dimensions();
    let mut dst = vec![0u8; width as usize * height as usize * channels];
    transform
        .transform(&src, &mut dst)
        .map_err(|e| format!("transform failed: {e:?}"))?;

    let converted = if alpha {
        RgbaImage::from_raw(width, height, dst).map(DynamicImage::ImageRgba8)
    } else {
        RgbImage::from_raw(width, height, dst).map(DynamicImage::ImageRgb8)
    };
    converted.ok_or_else(|| "transform produced a short buffer".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_normalize_background_accepts_css_colors() {
        assert_eq!(normalize_background(Some("red")), Some("red".to_string()));
        assert_eq!(normalize_background(Some(" #fff ")), Some("#fff".to_string()));
        assert_eq!(normalize_background(Some("#ff000080")), Some("#ff000080".to_string()));
        assert!(normalize_background(Some("rgb(0, 128, 255)")).is_some());
    }

    #[test]
    fn test_normalize_background_rejects_garbage() {
        assert_eq!(normalize_background(None), None);
        assert_eq!(normalize_background(Some("")), None);
        assert_eq!(normalize_background(Some("   ")), None);
        assert_eq!(normalize_background(Some("notacolor")), None);
        assert_eq!(normalize_background(Some("fff")), None);
        assert_eq!(normalize_background(Some("#ggg")), None);
    }

    #[test]
    fn test_background_rgb_fallback() {
        assert_eq!(background_rgb(None), DEFAULT_BACKGROUND);
        assert_eq!(background_rgb(Some("bogus")), DEFAULT_BACKGROUND);
        assert_eq!(background_rgb(Some("#000")), Rgb([0, 0, 0]));
        assert_eq!(background_rgb(Some("#ff000080")), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_srgb_disabled_or_without_profile_is_noop() {
        let pixels = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 2, Rgba([10, 20, 30, 40])));
        let source = SourceImage::new(pixels.clone());

        let out = convert_to_srgb(source.clone(), true);
        assert_eq!(out.pixels, pixels);

        let mut with_profile = source;
        with_profile.metadata.icc_profile = Some(vec![1, 2, 3]);
        let out = convert_to_srgb(with_profile, false);
        assert_eq!(out.metadata.icc_profile, Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_srgb_malformed_profile_returns_original() {
        let pixels = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([1, 2, 3])));
        let mut source = SourceImage::new(pixels.clone());
        source.metadata.icc_profile = Some(b"definitely not an icc profile".to_vec());

        let out = convert_to_srgb(source, true);
        assert_eq!(out.pixels, pixels);
        assert!(out.metadata.icc_profile.is_some());
    }

    #[test]
    fn test_srgb_converts_display_p3_and_keeps_alpha() {
        let p3 = ColorProfile::new_display_p3().encode().unwrap();
        let pixels = DynamicImage::ImageRgba8(RgbaImage::from_pixel(3, 2, Rgba([200, 100, 50, 100])));
        let mut source = SourceImage::new(pixels);
        source.metadata.icc_profile = Some(p3);

        let out = convert_to_srgb(source, true);
        assert!(matches!(out.pixels, DynamicImage::ImageRgba8(_)));
        assert_eq!(out.metadata.icc_profile, None);

        let px = out.pixels.to_rgba8().get_pixel(2, 1).0;
        assert_eq!(px[3], 100);
        assert_ne!(&px[..3], &[200, 100, 50]);
    }

    #[test]
    fn test_srgb_converts_opaque_rgb() {
        let p3 = ColorProfile::new_display_p3().encode().unwrap();
        let pixels = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([0, 180, 0])));
        let mut source = SourceImage::new(pixels);
        source.metadata.icc_profile = Some(p3);

        let out = convert_to_srgb(source, true);
        assert!(matches!(out.pixels, DynamicImage::ImageRgb8(_)));
        assert_eq!(out.metadata.icc_profile, None);
    }
}
