// Multi-page PDF assembly
//
// Every page is a single DCT (JPEG) image XObject drawn over the whole
// MediaBox. Pages keep upload order.

use image::{DynamicImage, Rgb};
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use tracing::debug;

use crate::core::config::Config;
use crate::core::errors::{EncodeError, PdfError};
use crate::core::types::{OutputFormat, SourceImage};
use crate::services::encoder::check_u16_dimensions;
use crate::utils::image_ops::flatten_to_opaque;

const PDF_VERSION: &str = "1.5";
const POINTS_PER_INCH: f32 = 72.0;
const IMAGE_RESOURCE_NAME: &str = "Im0";

/// One JPEG-encoded page, ready to be placed in a document
#[derive(Debug, Clone)]
pub struct PdfPage {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub grayscale: bool,
}

/// Builds PDF pages and assembles them into one document
#[derive(Debug, Clone, Copy)]
pub struct PdfAssembler {
    jpeg_quality: u8,
    resolution: f32,
}

impl PdfAssembler {
    pub fn new(jpeg_quality: u8, resolution: f32) -> Self {
        Self {
            jpeg_quality,
            resolution,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.pdf_jpeg_quality(), config.pdf_resolution())
    }

    /// Flatten onto `background`, coerce to RGB or grayscale and JPEG-encode
    pub fn encode_page(&self, source: SourceImage, background: Rgb<u8>) -> Result<PdfPage, PdfError> {
        let flattened = flatten_to_opaque(source, background);
        let (width, height) = check_u16_dimensions(OutputFormat::Pdf, &flattened.pixels)?;

        let grayscale = matches!(
            flattened.pixels,
            DynamicImage::ImageLuma8(_) | DynamicImage::ImageLuma16(_)
        );
        let (raw, color) = if grayscale {
            (flattened.pixels.to_luma8().into_raw(), jpeg_encoder::ColorType::Luma)
        } else {
            (flattened.pixels.to_rgb8().into_raw(), jpeg_encoder::ColorType::Rgb)
        };

        let mut data = Vec::new();
        let encoder = jpeg_encoder::Encoder::new(&mut data, self.jpeg_quality);
        encoder
            .encode(&raw, width, height, color)
            .map_err(EncodeError::from)?;

        debug!(
            "PDF page encoded: {}x{} {} ({} bytes)",
            width,
            height,
            if grayscale { "gray" } else { "rgb" },
            data.len()
        );

        Ok(PdfPage {
            data,
            width: u32::from(width),
            height: u32::from(height),
            grayscale,
        })
    }

    /// Page size in points for a pixel extent
    pub fn page_size(&self, width: u32, height: u32) -> (f32, f32) {
        let scale = POINTS_PER_INCH / self.resolution;
        (width as f32 * scale, height as f32 * scale)
    }

    /// Serialize the pages into a single compressed document
    pub fn assemble(&self, pages: &[PdfPage]) -> Result<Vec<u8>, PdfError> {
        if pages.is_empty() {
            return Err(PdfError::Empty);
        }

        let mut doc = Document::with_version(PDF_VERSION);
        let pages_id = doc.new_object_id();

        let mut kids = Vec::with_capacity(pages.len());
        for page in pages {
            let page_id = self.add_page(&mut doc, pages_id, page)?;
            kids.push(Object::Reference(page_id));
        }

        let mut pages_dict = Dictionary::new();
        pages_dict.set("Type", Object::Name(b"Pages".to_vec()));
        pages_dict.set("Count", Object::Integer(kids.len() as i64));
        pages_dict.set("Kids", Object::Array(kids));
        doc.objects.insert(pages_id, Object::Dictionary(pages_dict));

        let mut catalog = Dictionary::new();
        catalog.set("Type", Object::Name(b"Catalog".to_vec()));
        catalog.set("Pages", Object::Reference(pages_id));
        let catalog_id = doc.add_object(Object::Dictionary(catalog));
        doc.trailer.set("Root", Object::Reference(catalog_id));

        doc.compress();

        let mut output = Vec::new();
        doc.save_to(&mut output)?;
        debug!("PDF assembled: {} pages, {} bytes", pages.len(), output.len());
        Ok(output)
    }

    fn add_page(&self, doc: &mut Document, parent: ObjectId, page: &PdfPage) -> Result<ObjectId, PdfError> {
        let mut image = Dictionary::new();
        image.set("Type", Object::Name(b"XObject".to_vec()));
        image.set("Subtype", Object::Name(b"Image".to_vec()));
        image.set("Width", Object::Integer(i64::from(page.width)));
        image.set("Height", Object::Integer(i64::from(page.height)));
        let color_space: &[u8] = if page.grayscale { b"DeviceGray" } else { b"DeviceRGB" };
        image.set("ColorSpace", Object::Name(color_space.to_vec()));
        image.set("BitsPerComponent", Object::Integer(8));
        image.set("Filter", Object::Name(b"DCTDecode".to_vec()));
        // Already DCT; keep it out of the Flate pass
        let image_id = doc.add_object(Object::Stream(
            Stream::new(image, page.data.clone()).with_compression(false),
        ));

        let (page_w, page_h) = self.page_size(page.width, page.height);
        let content = Content {
            operations: vec![
                Operation::new("q", vec![]),
                Operation::new(
                    "cm",
                    vec![
                        Object::Real(page_w),
                        Object::Integer(0),
                        Object::Integer(0),
                        Object::Real(page_h),
                        Object::Integer(0),
                        Object::Integer(0),
                    ],
                ),
                Operation::new("Do", vec![Object::Name(IMAGE_RESOURCE_NAME.as_bytes().to_vec())]),
                Operation::new("Q", vec![]),
            ],
        };
        let content_id = doc.add_object(Object::Stream(Stream::new(Dictionary::new(), content.encode()?)));

        let mut xobjects = Dictionary::new();
        xobjects.set(IMAGE_RESOURCE_NAME, Object::Reference(image_id));
        let mut resources = Dictionary::new();
        resources.set("XObject", Object::Dictionary(xobjects));

        let mut page_dict = Dictionary::new();
        page_dict.set("Type", Object::Name(b"Page".to_vec()));
        page_dict.set("Parent", Object::Reference(parent));
        page_dict.set(
            "MediaBox",
            Object::Array(vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Real(page_w),
                Object::Real(page_h),
            ]),
        );
        page_dict.set("Resources", Object::Dictionary(resources));
        page_dict.set("Contents", Object::Reference(content_id));

        Ok(doc.add_object(Object::Dictionary(page_dict)))
    }
}
