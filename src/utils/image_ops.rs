// Pixel-level operations on decoded uploads
//
// Everything here is synchronous and CPU-bound. The orchestrator runs it on
// tokio's blocking pool.

use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, Rgb, RgbImage, Rgba, RgbaImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};

use crate::core::errors::{ConversionError, ConversionResult};
use crate::core::types::{ColorMode, CropRect, Orientation, SourceImage};
use crate::utils::exif;

/// True iff the pixel layout carries an alpha channel
pub fn has_alpha(image: &DynamicImage) -> bool {
    image.color().has_alpha()
}

/// Physically apply the EXIF orientation and mark the retained EXIF block upright
pub fn apply_orientation(mut source: SourceImage) -> SourceImage {
    if source.orientation == Orientation::Normal {
        return source;
    }

    let orientation = source.orientation;
    source = source.map_pixels(|pixels| match orientation {
        Orientation::Normal => pixels,
        Orientation::FlipHorizontal => pixels.fliph(),
        Orientation::Rotate180 => pixels.rotate180(),
        Orientation::FlipVertical => pixels.flipv(),
        Orientation::Transpose => pixels.rotate90().fliph(),
        Orientation::Rotate90 => pixels.rotate90(),
        Orientation::Transverse => pixels.rotate270().fliph(),
        Orientation::Rotate270 => pixels.rotate270(),
    });
    source.orientation = Orientation::Normal;

    if let Some(block) = source.metadata.exif.as_mut() {
        if !exif::reset_orientation(block) {
            tracing::debug!("EXIF block has no writable orientation entry");
        }
    }
    source
}

/// Geometry parameters, applied crop → rotate → resize
#[derive(Debug, Clone, Copy, Default)]
pub struct GeometryOps {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: bool,
    pub rotate_deg: i64,
    pub crop: Option<CropRect>,
}

pub fn apply_geometry(
    source: SourceImage,
    ops: &GeometryOps,
    max_pixels: u64,
) -> ConversionResult<SourceImage> {
    source.try_map_pixels(|mut pixels| {
        if let Some(rect) = ops.crop.filter(|r| r.width > 0 && r.height > 0) {
            pixels = crop_clamped(&pixels, rect);
        }

        if ops.rotate_deg.rem_euclid(360) != 0 {
            let (w, h) = rotated_size(pixels.dimensions(), ops.rotate_deg);
            check_output_size(w, h, max_pixels)?;
            pixels = rotate_clockwise(&pixels, ops.rotate_deg);
        }

        if let Some((w, h)) = target_size(pixels.dimensions(), ops.width, ops.height, ops.fit) {
            if (w, h) != pixels.dimensions() {
                check_output_size(w, h, max_pixels)?;
                pixels = pixels.resize_exact(w, h, FilterType::Lanczos3);
            }
        }

        Ok(pixels)
    })
}

/// Refuse to allocate a canvas larger than the decode limit
fn check_output_size(width: u32, height: u32, max_pixels: u64) -> ConversionResult<()> {
    if u64::from(width) * u64::from(height) > max_pixels {
        return Err(ConversionError::OutputTooLarge {
            width,
            height,
            limit: max_pixels,
        });
    }
    Ok(())
}

/// Crop with the rectangle clamped to the image bounds. A degenerate
/// rectangle degrades to a 1x1 region.
pub fn crop_clamped(image: &DynamicImage, rect: CropRect) -> DynamicImage {
    let (width, height) = image.dimensions();
    let (width, height) = (i64::from(width), i64::from(height));

    let x = rect.x.clamp(0, (width - 1).max(0));
    let y = rect.y.clamp(0, (height - 1).max(0));
    let w = (width - x).min(rect.width).max(1);
    let h = (height - y).min(rect.height).max(1);

    image.crop_imm(x as u32, y as u32, w as u32, h as u32)
}

/// Rotate clockwise by `degrees`, expanding the canvas to fit.
///
/// Right angles are exact transposes. Other angles are resampled bicubically
/// with transparent corners for images with alpha and black otherwise.
pub fn rotate_clockwise(image: &DynamicImage, degrees: i64) -> DynamicImage {
    match degrees.rem_euclid(360) {
        0 => image.clone(),
        90 => image.rotate90(),
        180 => image.rotate180(),
        270 => image.rotate270(),
        angle => rotate_expanded(image, angle as f32),
    }
}

/// Canvas size after a clockwise rotation by `degrees`
pub fn rotated_size((w, h): (u32, u32), degrees: i64) -> (u32, u32) {
    match degrees.rem_euclid(360) {
        0 | 180 => (w, h),
        90 | 270 => (h, w),
        angle => expanded_size((w, h), (angle as f32).to_radians()),
    }
}

fn expanded_size((w, h): (u32, u32), theta: f32) -> (u32, u32) {
    let (sin, cos) = theta.sin_cos();
    (
        expanded_extent(w as f32 * cos.abs() + h as f32 * sin.abs()),
        expanded_extent(w as f32 * sin.abs() + h as f32 * cos.abs()),
    )
}

fn rotate_expanded(image: &DynamicImage, degrees: f32) -> DynamicImage {
    let (w, h) = image.dimensions();
    let theta = degrees.to_radians();
    let (out_w, out_h) = expanded_size((w, h), theta);

    let projection = Projection::translate(out_w as f32 / 2.0, out_h as f32 / 2.0)
        * Projection::rotate(theta)
        * Projection::translate(-(w as f32) / 2.0, -(h as f32) / 2.0);

    let alpha = has_alpha(image);
    let fill = if alpha {
        Rgba([0, 0, 0, 0])
    } else {
        Rgba([0, 0, 0, 255])
    };

    let src = image.to_rgba8();
    let mut out = RgbaImage::new(out_w, out_h);
    warp_into(&src, &projection, Interpolation::Bicubic, fill, &mut out);

    let rotated = DynamicImage::ImageRgba8(out);
    match (ColorMode::of(image), alpha) {
        (ColorMode::Grayscale, _) => DynamicImage::ImageLuma8(rotated.to_luma8()),
        (ColorMode::GrayscaleAlpha, _) => DynamicImage::ImageLumaA8(rotated.to_luma_alpha8()),
        (_, true) => rotated,
        (_, false) => DynamicImage::ImageRgb8(rotated.to_rgb8()),
    }
}

fn expanded_extent(span: f32) -> u32 {
    // Shave float noise so e.g. 100.00001 does not become 101
    ((span - 1e-3).ceil() as u32).max(1)
}

/// Output dimensions for the requested width/height, `None` when no resize applies
pub fn target_size(
    (w, h): (u32, u32),
    width: Option<u32>,
    height: Option<u32>,
    fit: bool,
) -> Option<(u32, u32)> {
    let width = width.filter(|&v| v > 0);
    let height = height.filter(|&v| v > 0);

    match (width, height) {
        (Some(bw), Some(bh)) if fit => Some(contain_size((w, h), (bw, bh))),
        (Some(bw), Some(bh)) => Some((bw, bh)),
        (Some(bw), None) => {
            let scaled = u64::from(h) * u64::from(bw) / u64::from(w.max(1));
            Some((bw, saturate_u32(scaled).max(1)))
        }
        (None, Some(bh)) => {
            let scaled = u64::from(w) * u64::from(bh) / u64::from(h.max(1));
            Some((saturate_u32(scaled).max(1), bh))
        }
        (None, None) => None,
    }
}

fn saturate_u32(value: u64) -> u32 {
    u32::try_from(value).unwrap_or(u32::MAX)
}

/// Largest aspect-preserving size that fits in `bounds`
pub fn contain_size((w, h): (u32, u32), (bw, bh): (u32, u32)) -> (u32, u32) {
    let (w, h) = (w.max(1) as f64, h.max(1) as f64);
    let image_ratio = w / h;
    let box_ratio = bw as f64 / bh as f64;

    if image_ratio > box_ratio {
        let new_h = (h / w * bw as f64).round() as u32;
        (bw, new_h.clamp(1, bh))
    } else if image_ratio < box_ratio {
        let new_w = (w / h * bh as f64).round() as u32;
        (new_w.clamp(1, bw), bh)
    } else {
        (bw, bh)
    }
}

/// Composite onto an opaque background when the layout is not plain RGB or
/// grayscale. The result is RGB.
pub fn flatten_to_opaque(mut source: SourceImage, background: Rgb<u8>) -> SourceImage {
    if !has_alpha(&source.pixels) && source.mode.is_plain_opaque() {
        return source;
    }

    let rgba = source.pixels.to_rgba8();
    let flattened = composite_over(&rgba, background);
    source.pixels = DynamicImage::ImageRgb8(flattened);
    source.mode = ColorMode::Rgb;
    source
}

/// Alpha-blend each pixel over `background`
pub fn composite_over(rgba: &RgbaImage, background: Rgb<u8>) -> RgbImage {
    let (w, h) = rgba.dimensions();
    let mut out = RgbImage::from_pixel(w, h, background);
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let a = u32::from(src[3]);
        for c in 0..3 {
            let s = u32::from(src[c]);
            let b = u32::from(background[c]);
            dst[c] = ((s * a + b * (255 - a) + 127) / 255) as u8;
        }
    }
    out
}

/// Coerce to 8-bit RGB, flattening first if needed
pub fn force_rgb(source: SourceImage, background: Rgb<u8>) -> SourceImage {
    let mut source = flatten_to_opaque(source, background);
    if !matches!(source.pixels, DynamicImage::ImageRgb8(_)) {
        source.pixels = DynamicImage::ImageRgb8(source.pixels.to_rgb8());
        source.mode = ColorMode::Rgb;
    }
    source
}

/// Expand palette-indexed sources to RGBA; other modes pass through
pub fn expand_palette(mut source: SourceImage) -> SourceImage {
    if source.mode == ColorMode::Palette {
        source.pixels = DynamicImage::ImageRgba8(source.pixels.to_rgba8());
        source.mode = ColorMode::Rgba;
    }
    source
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    const LIMIT: u64 = 1 << 24;

    fn rgb(w: u32, h: u32) -> SourceImage {
        SourceImage::new(DynamicImage::ImageRgb8(RgbImage::from_fn(w, h, |x, y| {
            Rgb([x as u8, y as u8, 7])
        })))
    }

    fn ops() -> GeometryOps {
        GeometryOps {
            fit: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_has_alpha() {
        assert!(has_alpha(&DynamicImage::ImageRgba8(RgbaImage::new(1, 1))));
        assert!(!has_alpha(&DynamicImage::ImageRgb8(RgbImage::new(1, 1))));
        assert!(!has_alpha(&DynamicImage::ImageLuma8(GrayImage::new(1, 1))));
    }

    #[test]
    fn test_orientation_rotate90() {
        let mut source = rgb(4, 2);
        source.orientation = Orientation::Rotate90;
        source.metadata.exif = Some(crate::utils::exif::tests::exif_with_orientation(6));

        let out = apply_orientation(source);
        assert_eq!(out.pixels.dimensions(), (2, 4));
        assert_eq!(out.orientation, Orientation::Normal);
        let exif_block = out.metadata.exif.as_deref().unwrap();
        assert_eq!(crate::utils::exif::read_orientation(exif_block), Orientation::Normal);
        // Top-left of the upright image was the bottom-left of the stored one
        assert_eq!(out.pixels.to_rgb8().get_pixel(0, 0).0, [0, 1, 7]);
    }

    #[test]
    fn test_orientation_transpose_swaps_axes() {
        let mut source = rgb(3, 2);
        source.orientation = Orientation::Transpose;
        let out = apply_orientation(source);
        let px = out.pixels.to_rgb8();
        assert_eq!(px.dimensions(), (2, 3));
        assert_eq!(px.get_pixel(1, 2).0, [2, 1, 7]);
    }

    #[test]
    fn test_crop_clamps_to_bounds() {
        let image = rgb(10, 8).pixels;
        let cropped = crop_clamped(&image, CropRect { x: -5, y: 2, width: 100, height: 3 });
        assert_eq!(cropped.dimensions(), (10, 3));
        assert_eq!(cropped.to_rgb8().get_pixel(0, 0).0, [0, 2, 7]);
    }

    #[test]
    fn test_crop_degenerate_is_one_pixel() {
        let image = rgb(10, 8).pixels;
        let cropped = crop_clamped(&image, CropRect { x: 50, y: 50, width: 4, height: 4 });
        assert_eq!(cropped.dimensions(), (1, 1));
    }

    #[test]
    fn test_crop_ignored_when_non_positive() {
        let op = GeometryOps {
            crop: Some(CropRect { x: 0, y: 0, width: 0, height: 5 }),
            ..ops()
        };
        let out = apply_geometry(rgb(10, 8), &op, LIMIT).unwrap();
        assert_eq!(out.pixels.dimensions(), (10, 8));
    }

    #[test]
    fn test_rotation_by_full_turns_is_noop() {
        let source = rgb(5, 3);
        for deg in [0, 360, -360, 720] {
            let op = GeometryOps { rotate_deg: deg, ..ops() };
            let out = apply_geometry(source.clone(), &op, LIMIT).unwrap();
            assert_eq!(out.pixels, source.pixels);
        }
    }

    #[test]
    fn test_right_angle_rotation_is_clockwise() {
        let image = rgb(4, 2).pixels;
        let rotated = rotate_clockwise(&image, 90);
        assert_eq!(rotated.dimensions(), (2, 4));
        // Clockwise: old bottom-left lands at top-left
        assert_eq!(rotated.to_rgb8().get_pixel(0, 0).0, [0, 1, 7]);
        assert_eq!(rotate_clockwise(&image, -270), rotated);
    }

    #[test]
    fn test_arbitrary_rotation_expands_canvas() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(100, 50, Rgb([200, 0, 0])));
        let rotated = rotate_clockwise(&image, 45);
        let (w, h) = rotated.dimensions();
        assert_eq!((w, h), (107, 107));
        // Corners are outside the source and filled black
        assert_eq!(rotated.to_rgb8().get_pixel(0, 0).0, [0, 0, 0]);
        assert!(rotated.to_rgb8().get_pixel(w / 2, h / 2)[0] >= 195);
    }

    #[test]
    fn test_arbitrary_rotation_keeps_alpha_transparent() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(40, 40, Rgba([0, 0, 255, 255])));
        let rotated = rotate_clockwise(&image, 30);
        assert!(has_alpha(&rotated));
        assert_eq!(rotated.to_rgba8().get_pixel(0, 0)[3], 0);
    }

    #[test]
    fn test_arbitrary_rotation_turns_clockwise() {
        // 8x8 marker centred above the image centre
        let image = DynamicImage::ImageLuma8(GrayImage::from_fn(40, 40, |x, y| {
            if (16..24).contains(&x) && (1..9).contains(&y) {
                Luma([255])
            } else {
                Luma([0])
            }
        }));
        let rotated = rotate_clockwise(&image, 30).to_luma8();
        assert_eq!(rotated.dimensions(), (55, 55));
        // Clockwise carries the marker to the right of centre
        assert!(rotated.get_pixel(35, 14)[0] > 200);
        assert!(rotated.get_pixel(20, 14)[0] < 50);
    }

    #[test]
    fn test_rotated_size_matches_rotation() {
        assert_eq!(rotated_size((100, 50), 90), (50, 100));
        assert_eq!(rotated_size((100, 50), -180), (100, 50));
        let image = DynamicImage::ImageRgb8(RgbImage::new(100, 50));
        assert_eq!(rotated_size((100, 50), 45), rotate_clockwise(&image, 45).dimensions());
    }

    #[test]
    fn test_target_size_saturates_instead_of_wrapping() {
        assert_eq!(
            target_size((1, 60_000), Some(100_000), None, true),
            Some((100_000, u32::MAX))
        );
        assert_eq!(
            target_size((60_000, 1), None, Some(100_000), true),
            Some((u32::MAX, 100_000))
        );
    }

    #[test]
    fn test_oversized_resize_is_rejected() {
        let op = GeometryOps {
            width: Some(100_000),
            ..ops()
        };
        let err = apply_geometry(rgb(1, 600), &op, LIMIT).unwrap_err();
        assert!(matches!(err, ConversionError::OutputTooLarge { width: 100_000, .. }));
        assert_eq!(err.kind(), "OutputSizeError");
    }

    #[test]
    fn test_oversized_rotation_canvas_is_rejected() {
        let op = GeometryOps { rotate_deg: 45, ..ops() };
        // 100x100 fits, its 142x142 rotated canvas does not
        let err = apply_geometry(rgb(100, 100), &op, 10_000).unwrap_err();
        assert!(matches!(err, ConversionError::OutputTooLarge { width: 142, height: 142, .. }));
    }

    #[test]
    fn test_arbitrary_rotation_keeps_grayscale() {
        let image = DynamicImage::ImageLuma8(GrayImage::from_pixel(20, 10, Luma([90])));
        let rotated = rotate_clockwise(&image, 15);
        assert!(matches!(rotated, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn test_target_size_variants() {
        assert_eq!(target_size((400, 200), Some(100), Some(100), true), Some((100, 50)));
        assert_eq!(target_size((200, 400), Some(100), Some(100), true), Some((50, 100)));
        assert_eq!(target_size((400, 200), Some(100), Some(100), false), Some((100, 100)));
        assert_eq!(target_size((400, 200), Some(100), None, true), Some((100, 50)));
        assert_eq!(target_size((400, 200), None, Some(50), true), Some((100, 50)));
        assert_eq!(target_size((1000, 1), Some(10), None, true), Some((10, 1)));
        assert_eq!(target_size((400, 200), None, None, true), None);
    }

    #[test]
    fn test_contain_never_exceeds_box() {
        for (w, h) in [(333, 777), (1920, 1080), (1, 5000), (5000, 1)] {
            let (nw, nh) = contain_size((w, h), (640, 480));
            assert!(nw <= 640 && nh <= 480);
            assert!(nw >= 1 && nh >= 1);
        }
    }

    #[test]
    fn test_contain_upscales_to_box() {
        assert_eq!(contain_size((10, 5), (100, 100)), (100, 50));
    }

    #[test]
    fn test_crop_then_resize_is_dimension_stable() {
        let op = GeometryOps {
            width: Some(64),
            height: Some(32),
            fit: false,
            crop: Some(CropRect { x: 3, y: 4, width: 200, height: 200 }),
            ..Default::default()
        };
        let once = apply_geometry(rgb(120, 90), &op, LIMIT).unwrap();
        let twice = apply_geometry(once.clone(), &op, LIMIT).unwrap();
        assert_eq!(once.pixels.dimensions(), (64, 32));
        assert_eq!(twice.pixels.dimensions(), once.pixels.dimensions());
    }

    #[test]
    fn test_flatten_blends_alpha_over_background() {
        let mut rgba = RgbaImage::new(2, 1);
        rgba.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        rgba.put_pixel(1, 0, Rgba([255, 0, 0, 0]));
        let source = SourceImage::new(DynamicImage::ImageRgba8(rgba));

        let out = flatten_to_opaque(source, Rgb([255, 255, 255]));
        let px = out.pixels.to_rgb8();
        assert_eq!(out.mode, ColorMode::Rgb);
        assert_eq!(px.get_pixel(0, 0).0, [255, 0, 0]);
        assert_eq!(px.get_pixel(1, 0).0, [255, 255, 255]);
    }

    #[test]
    fn test_flatten_leaves_plain_modes_alone() {
        let gray = SourceImage::new(DynamicImage::ImageLuma8(GrayImage::new(3, 3)));
        let out = flatten_to_opaque(gray, Rgb([255, 255, 255]));
        assert_eq!(out.mode, ColorMode::Grayscale);

        let mut palette = rgb(2, 2);
        palette.mode = ColorMode::Palette;
        let out = flatten_to_opaque(palette, Rgb([0, 0, 0]));
        assert_eq!(out.mode, ColorMode::Rgb);
    }

    #[test]
    fn test_force_rgb_converts_grayscale() {
        let gray = SourceImage::new(DynamicImage::ImageLuma8(GrayImage::from_pixel(2, 2, Luma([9]))));
        let out = force_rgb(gray, Rgb([255, 255, 255]));
        assert!(matches!(out.pixels, DynamicImage::ImageRgb8(_)));
        assert_eq!(out.pixels.to_rgb8().get_pixel(0, 0).0, [9, 9, 9]);
    }

    #[test]
    fn test_expand_palette_only_touches_palette() {
        let mut palette = rgb(2, 2);
        palette.mode = ColorMode::Palette;
        assert_eq!(expand_palette(palette).mode, ColorMode::Rgba);

        let plain = rgb(2, 2);
        let out = expand_palette(plain.clone());
        assert_eq!(out.mode, ColorMode::Rgb);
        assert_eq!(out.pixels, plain.pixels);
    }
}
