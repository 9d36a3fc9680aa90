// Batch orchestrator: per-file conversion pipeline and response bundling

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

use crate::core::config::Config;
use crate::core::errors::{BatchError, ConversionError, ConversionResult};
use crate::core::types::{
    EncodedOutput, FileFailure, OutputFormat, ResponseBundle, SourceImage, TransformRequest,
    UploadedFile,
};
use crate::services::archive::{build_archive, ARCHIVE_NAME};
use crate::services::codec::ImageCodec;
use crate::services::encoder::{EncodeTier, TieredEncoder};
use crate::services::pdf::{PdfAssembler, PdfPage};
use crate::utils::color::{background_rgb, convert_to_srgb};
use crate::utils::image_ops::{apply_geometry, apply_orientation, GeometryOps};
use crate::utils::Metrics;

/// Name of the PDF when the first upload has no usable name
pub const DEFAULT_PDF_STEM: &str = "images";

/// One file through every stage, before bundling
struct Converted<T> {
    value: T,
    tier: Option<EncodeTier>,
    bytes_in: usize,
    elapsed: Duration,
}

/// Runs uploads through decode → orient → sRGB → geometry → encode and
/// bundles the results
pub struct ConversionOrchestrator {
    codec: Arc<ImageCodec>,
    encoder: TieredEncoder,
    pdf: PdfAssembler,
    metrics: Metrics,
}

impl ConversionOrchestrator {
    /// Orchestrator with every decoder plugin compiled into this build
    #[instrument(skip(config, metrics))]
    pub fn new(config: &Config, metrics: Metrics) -> Self {
        let codec = ImageCodec::with_default_plugins(config.max_image_pixels());
        let pdf = PdfAssembler::from_config(config);
        info!(
            "✓ Orchestrator ready (PDF quality {}, {} dpi)",
            config.pdf_jpeg_quality(),
            config.pdf_resolution()
        );
        Self::with_parts(codec, pdf, metrics)
    }

    pub fn with_parts(codec: ImageCodec, pdf: PdfAssembler, metrics: Metrics) -> Self {
        Self {
            codec: Arc::new(codec),
            encoder: TieredEncoder,
            pdf,
            metrics,
        }
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Convert every upload and bundle the results.
    ///
    /// Files are processed sequentially in upload order. A failing file is
    /// recorded and skipped; only a batch with no success at all is an error.
    #[instrument(skip(self, files, request), fields(total_files = files.len(), format = %request.format))]
    pub async fn process_batch(
        &self,
        files: Vec<UploadedFile>,
        request: &TransformRequest,
    ) -> Result<ResponseBundle, BatchError> {
        let start_time = Instant::now();
        info!("Processing {} files -> {}", files.len(), request.format);

        let bundle = if request.format == OutputFormat::Pdf {
            self.process_pdf(files, request).await
        } else {
            self.process_images(files, request).await
        };

        match &bundle {
            Ok(bundle) => info!(
                "Batch completed in {:.2}s: {} ({} bytes)",
                start_time.elapsed().as_secs_f64(),
                bundle.filename(),
                bundle.output().data.len()
            ),
            Err(e) => error!(
                "Batch failed after {:.2}s: {}",
                start_time.elapsed().as_secs_f64(),
                e
            ),
        }
        bundle
    }

    async fn process_images(
        &self,
        files: Vec<UploadedFile>,
        request: &TransformRequest,
    ) -> Result<ResponseBundle, BatchError> {
        let mut results: Vec<Result<EncodedOutput, FileFailure>> = Vec::with_capacity(files.len());

        for file in files {
            let filename = file.filename.clone();
            let codec = Arc::clone(&self.codec);
            let encoder = self.encoder;
            let job_request = request.clone();

            let outcome = run_blocking(move || convert_file(&codec, encoder, file, &job_request)).await;
            results.push(self.settle(&filename, request.format, outcome));
        }

        let (mut outputs, failures) = partition(results);
        if outputs.is_empty() {
            return Err(BatchError::AllFailed(failures));
        }

        if outputs.len() == 1 && failures.is_empty() {
            if let Some(output) = outputs.pop() {
                return Ok(ResponseBundle::Single(output));
            }
        }

        info!(
            "Bundling {} outputs ({} failures) into {}",
            outputs.len(),
            failures.len(),
            ARCHIVE_NAME
        );
        let data = build_archive(&outputs, &failures)?;
        Ok(ResponseBundle::Archive(EncodedOutput {
            filename: ARCHIVE_NAME.to_string(),
            data,
        }))
    }

    async fn process_pdf(
        &self,
        files: Vec<UploadedFile>,
        request: &TransformRequest,
    ) -> Result<ResponseBundle, BatchError> {
        let filename = pdf_filename(&files);
        let mut results: Vec<Result<PdfPage, FileFailure>> = Vec::with_capacity(files.len());

        for file in files {
            let name = file.filename.clone();
            let codec = Arc::clone(&self.codec);
            let pdf = self.pdf;
            let job_request = request.clone();

            let outcome = run_blocking(move || render_page(&codec, pdf, file, &job_request)).await;
            results.push(self.settle(&name, OutputFormat::Pdf, outcome));
        }

        let (pages, failures) = partition(results);
        if pages.is_empty() {
            return Err(BatchError::AllFailed(failures));
        }
        if !failures.is_empty() {
            info!("PDF skips {} failed files", failures.len());
        }

        let data = self.pdf.assemble(&pages)?;
        Ok(ResponseBundle::Pdf(EncodedOutput { filename, data }))
    }

    /// Record metrics and logs for one finished file
    fn settle<T: HasLen>(
        &self,
        filename: &str,
        format: OutputFormat,
        outcome: ConversionResult<Converted<T>>,
    ) -> Result<T, FileFailure> {
        match outcome {
            Ok(converted) => {
                if let Some(tier) = converted.tier {
                    self.metrics.record_encode_tier(tier);
                }
                self.metrics.record_file_converted(
                    format.name(),
                    converted.bytes_in,
                    converted.value.byte_len(),
                    converted.elapsed,
                );
                debug!(
                    "{} converted in {}ms",
                    filename,
                    converted.elapsed.as_millis()
                );
                Ok(converted.value)
            }
            Err(e) => {
                error!("Failed to convert {}: {}: {}", filename, e.kind(), e);
                self.metrics.record_file_failed(e.kind());
                Err(e.into_failure(filename))
            }
        }
    }
}

/// Size of a finished per-file result
trait HasLen {
    fn byte_len(&self) -> usize;
}

impl HasLen for EncodedOutput {
    fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl HasLen for PdfPage {
    fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Run CPU-bound work on the blocking pool
async fn run_blocking<T, F>(job: F) -> ConversionResult<T>
where
    F: FnOnce() -> ConversionResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(job)
        .await
        .map_err(|e| ConversionError::TaskJoin(format!("conversion task failed: {e}")))?
}

fn partition<T>(results: Vec<Result<T, FileFailure>>) -> (Vec<T>, Vec<FileFailure>) {
    let mut successes = Vec::new();
    let mut failures = Vec::new();
    for result in results {
        match result {
            Ok(value) => successes.push(value),
            Err(failure) => failures.push(failure),
        }
    }
    (successes, failures)
}

/// `<first upload's stem>.pdf`, or `images.pdf` without a usable name
pub fn pdf_filename(files: &[UploadedFile]) -> String {
    let stem = files
        .first()
        .map(UploadedFile::stem)
        .filter(|stem| !stem.is_empty())
        .unwrap_or(DEFAULT_PDF_STEM);
    format!("{}{}", stem, OutputFormat::Pdf.extension())
}

/// Decoded → Oriented → ColorNormalized → GeometryApplied
fn transform(codec: &ImageCodec, file: &UploadedFile, request: &TransformRequest) -> ConversionResult<SourceImage> {
    let source = codec.decode(&file.data)?;
    debug!(
        "{}: decoded {}x{} {:?}",
        file.filename,
        source.width(),
        source.height(),
        source.mode
    );

    let source = apply_orientation(source);
    debug!("{}: oriented", file.filename);

    let source = convert_to_srgb(source, request.to_srgb);
    debug!("{}: color normalized", file.filename);

    let ops = GeometryOps {
        width: request.width,
        height: request.height,
        fit: request.fit,
        rotate_deg: request.rotate_deg,
        crop: request.crop,
    };
    let source = apply_geometry(source, &ops, codec.max_pixels())?;
    debug!(
        "{}: geometry applied, now {}x{}",
        file.filename,
        source.width(),
        source.height()
    );
    Ok(source)
}

fn convert_file(
    codec: &ImageCodec,
    encoder: TieredEncoder,
    file: UploadedFile,
    request: &TransformRequest,
) -> ConversionResult<Converted<EncodedOutput>> {
    let start = Instant::now();
    let source = transform(codec, &file, request)?;
    let encoded = encoder.encode(source, request)?;
    debug!("{}: encoded ({:?})", file.filename, encoded.tier);

    Ok(Converted {
        value: EncodedOutput {
            filename: format!("{}{}", file.stem(), request.format.extension()),
            data: encoded.data,
        },
        tier: Some(encoded.tier),
        bytes_in: file.data.len(),
        elapsed: start.elapsed(),
    })
}

fn render_page(
    codec: &ImageCodec,
    pdf: PdfAssembler,
    file: UploadedFile,
    request: &TransformRequest,
) -> ConversionResult<Converted<PdfPage>> {
    let start = Instant::now();
    let source = transform(codec, &file, request)?;
    let page = pdf.encode_page(source, background_rgb(request.background.as_deref()))?;
    debug!("{}: PDF page ready", file.filename);

    Ok(Converted {
        value: page,
        tier: None,
        bytes_in: file.data.len(),
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CropRect;
    use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
    use std::io::{Cursor, Read};

    fn orchestrator() -> ConversionOrchestrator {
        ConversionOrchestrator::with_parts(
            ImageCodec::new(10_000_000),
            PdfAssembler::new(75, 72.0),
            Metrics::new(),
        )
    }

    fn png(name: &str, w: u32, h: u32) -> UploadedFile {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(w, h, Rgba([40, 80, 120, 255])));
        let mut data = Vec::new();
        image.write_to(&mut Cursor::new(&mut data), ImageFormat::Png).unwrap();
        UploadedFile::new(name, data)
    }

    fn garbage(name: &str) -> UploadedFile {
        UploadedFile::new(name, b"definitely not an image".to_vec())
    }

    #[tokio::test]
    async fn test_single_success_returns_raw_file() {
        let orchestrator = orchestrator();
        let request = TransformRequest::new(OutputFormat::parse("jpeg").unwrap());

        let bundle = orchestrator
            .process_batch(vec![png("holiday.photo.png", 8, 6)], &request)
            .await
            .unwrap();
        match bundle {
            ResponseBundle::Single(output) => {
                assert_eq!(output.filename, "holiday.photo.jpg");
                assert_eq!(image::guess_format(&output.data).unwrap(), ImageFormat::Jpeg);
            }
            other => panic!("expected a single file, got {}", other.filename()),
        }

        let snapshot = orchestrator.metrics().snapshot();
        assert_eq!(snapshot.files_converted, 1);
        assert_eq!(snapshot.encodes_without_metadata, 1);
        assert_eq!(snapshot.conversions_by_format.get("jpeg"), Some(&1));
    }

    #[tokio::test]
    async fn test_all_failed_reports_every_file() {
        let orchestrator = orchestrator();
        let request = TransformRequest::new(OutputFormat::Png);

        let err = orchestrator
            .process_batch(vec![garbage("a.png"), garbage("b.png"), garbage("c.png")], &request)
            .await
            .unwrap_err();
        match err {
            BatchError::AllFailed(failures) => {
                assert_eq!(failures.len(), 3);
                assert_eq!(failures[0].filename, "a.png");
                assert_eq!(failures[0].kind, "DecodeError");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(orchestrator.metrics().snapshot().files_failed, 3);
    }

    #[tokio::test]
    async fn test_mixed_batch_builds_archive_with_report() {
        let orchestrator = orchestrator();
        let request = TransformRequest::new(OutputFormat::WebP);
        let files = vec![png("one.png", 4, 4), garbage("two.png"), png("three.png", 5, 5)];

        let bundle = orchestrator.process_batch(files, &request).await.unwrap();
        assert_eq!(bundle.filename(), ARCHIVE_NAME);
        assert_eq!(bundle.content_type(), "application/zip");

        let mut archive = zip::ZipArchive::new(Cursor::new(bundle.into_output().data)).unwrap();
        let names: Vec<String> = archive.file_names().map(str::to_string).collect();
        assert_eq!(names.len(), 3);
        assert!(names.contains(&"one.webp".to_string()));
        assert!(names.contains(&"three.webp".to_string()));

        let mut report = String::new();
        archive.by_name("errors.txt").unwrap().read_to_string(&mut report).unwrap();
        assert_eq!(report.lines().count(), 1);
        assert!(report.starts_with("two.png: DecodeError: "));
    }

    #[tokio::test]
    async fn test_oversized_resize_fails_only_that_file() {
        let orchestrator = orchestrator();
        let mut request = TransformRequest::new(OutputFormat::Png);
        request.width = Some(u32::MAX);

        let err = orchestrator
            .process_batch(vec![png("tall.png", 1, 600)], &request)
            .await
            .unwrap_err();
        match err {
            BatchError::AllFailed(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].kind, "OutputSizeError");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(orchestrator.metrics().snapshot().files_failed, 1);
    }

    #[tokio::test]
    async fn test_two_successes_zip_without_report() {
        let orchestrator = orchestrator();
        let request = TransformRequest::new(OutputFormat::Bmp);

        let bundle = orchestrator
            .process_batch(vec![png("a.png", 3, 3), png("b.png", 3, 3)], &request)
            .await
            .unwrap();
        let archive = zip::ZipArchive::new(Cursor::new(bundle.into_output().data)).unwrap();
        assert_eq!(archive.len(), 2);
        assert!(archive.file_names().all(|n| n != "errors.txt"));
    }

    #[tokio::test]
    async fn test_pdf_has_page_per_success_named_after_first_upload() {
        let orchestrator = orchestrator();
        let request = TransformRequest::new(OutputFormat::Pdf);
        let files = vec![
            png("scan-01.png", 20, 30),
            garbage("broken.png"),
            png("scan-02.png", 40, 10),
        ];

        let bundle = orchestrator.process_batch(files, &request).await.unwrap();
        assert!(matches!(bundle, ResponseBundle::Pdf(_)));
        assert_eq!(bundle.filename(), "scan-01.pdf");

        let doc = lopdf::Document::load_mem(&bundle.output().data).unwrap();
        assert_eq!(doc.get_pages().len(), 2);
    }

    #[tokio::test]
    async fn test_pdf_named_after_first_upload_even_when_it_failed() {
        let orchestrator = orchestrator();
        let request = TransformRequest::new(OutputFormat::Pdf);

        let bundle = orchestrator
            .process_batch(vec![garbage("cover.png"), png("page.png", 4, 4)], &request)
            .await
            .unwrap();
        assert_eq!(bundle.filename(), "cover.pdf");
    }

    #[tokio::test]
    async fn test_pdf_all_failed() {
        let orchestrator = orchestrator();
        let request = TransformRequest::new(OutputFormat::Pdf);

        let err = orchestrator
            .process_batch(vec![garbage("a.png"), garbage("b.png")], &request)
            .await
            .unwrap_err();
        assert!(matches!(err, BatchError::AllFailed(ref f) if f.len() == 2));
    }

    #[test]
    fn test_pdf_filename_defaults() {
        assert_eq!(pdf_filename(&[]), "images.pdf");
        assert_eq!(pdf_filename(&[UploadedFile::new("", vec![])]), "images.pdf");
        assert_eq!(pdf_filename(&[UploadedFile::new("album.tar.gz", vec![])]), "album.tar.pdf");
    }

    #[tokio::test]
    async fn test_geometry_applies_crop_rotate_resize() {
        let orchestrator = orchestrator();
        let mut request = TransformRequest::new(OutputFormat::Png);
        request.crop = Some(CropRect {
            x: 0,
            y: 0,
            width: 40,
            height: 20,
        });
        request.rotate_deg = 90;
        request.width = Some(10);
        request.height = Some(10);

        let bundle = orchestrator
            .process_batch(vec![png("wide.png", 100, 50)], &request)
            .await
            .unwrap();
        let decoded = image::load_from_memory(&bundle.output().data).unwrap();
        // 40x20 crop, rotated to 20x40, contained in 10x10
        assert_eq!(decoded.dimensions(), (5, 10));
    }

    #[tokio::test]
    async fn test_exif_orientation_is_applied() {
        let pixels = RgbImage::from_pixel(8, 4, Rgb([30, 60, 90]));
        let mut app1 = b"Exif\0\0".to_vec();
        app1.extend(crate::utils::exif::tests::exif_with_orientation(6));
        let mut jpeg = Vec::new();
        let mut encoder = jpeg_encoder::Encoder::new(&mut jpeg, 90);
        encoder.add_app_segment(1, &app1).unwrap();
        encoder
            .encode(pixels.as_raw(), 8, 4, jpeg_encoder::ColorType::Rgb)
            .unwrap();

        let bundle = orchestrator()
            .process_batch(
                vec![UploadedFile::new("phone.jpg", jpeg)],
                &TransformRequest::new(OutputFormat::Png),
            )
            .await
            .unwrap();
        let decoded = image::load_from_memory(&bundle.output().data).unwrap();
        assert_eq!(decoded.dimensions(), (4, 8));
    }
}
