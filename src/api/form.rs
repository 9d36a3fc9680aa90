// Multipart form parsing for `POST /convert`
//
// Optional fields are lenient: an unparsable value counts as absent (or its
// default) instead of rejecting the request. Only `files` and `to` are
// required, and `to` must name a supported format.

use axum::extract::multipart::{Multipart, MultipartError};
use axum::http::StatusCode;
use std::collections::HashMap;
use tracing::debug;

use crate::core::errors::ApiError;
use crate::core::types::{CropRect, OutputFormat, TransformRequest, UploadedFile};

pub const FILES_FIELD: &str = "files";
pub const FORMAT_FIELD: &str = "to";

/// Raw form contents before validation
#[derive(Debug, Default)]
pub struct ConvertForm {
    pub files: Vec<UploadedFile>,
    pub fields: HashMap<String, String>,
}

impl ConvertForm {
    /// Drain the multipart stream. Upload parts keep their order.
    pub async fn from_multipart(mut multipart: Multipart) -> Result<Self, ApiError> {
        let mut form = Self::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();

            if name == FILES_FIELD {
                let filename = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                debug!("Received upload {} ({} bytes)", filename, data.len());
                form.files.push(UploadedFile::new(filename, data.to_vec()));
            } else {
                let value = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    /// Validate into uploads plus a transform request.
    ///
    /// Missing `files`/`to` is reported before an unsupported `to`.
    pub fn into_request(self) -> Result<(Vec<UploadedFile>, TransformRequest), ApiError> {
        let Some(to) = self.field(FORMAT_FIELD).map(str::to_string) else {
            return Err(ApiError::MissingField(FORMAT_FIELD));
        };
        if self.files.is_empty() {
            return Err(ApiError::MissingField(FILES_FIELD));
        }
        let format = OutputFormat::parse(&to).ok_or(ApiError::UnsupportedFormat(to))?;

        let defaults = TransformRequest::new(format);
        let crop = match (
            parse_int(self.field("crop_x")),
            parse_int(self.field("crop_y")),
            parse_int(self.field("crop_w")),
            parse_int(self.field("crop_h")),
        ) {
            (Some(x), Some(y), Some(width), Some(height)) => Some(CropRect { x, y, width, height }),
            _ => None,
        };

        let request = TransformRequest {
            format,
            quality: parse_int(self.field("quality")),
            lossless: parse_bool(self.field("lossless"), defaults.lossless),
            progressive: parse_bool(self.field("progressive"), defaults.progressive),
            keep_metadata: parse_bool(self.field("keep_metadata"), defaults.keep_metadata),
            to_srgb: parse_bool(self.field("to_srgb"), defaults.to_srgb),
            fit: parse_bool(self.field("fit"), defaults.fit),
            width: parse_dimension(self.field("width")),
            height: parse_dimension(self.field("height")),
            rotate_deg: parse_int(self.field("rotate_deg")).unwrap_or(defaults.rotate_deg),
            crop,
            background: self
                .field("bg")
                .map(str::trim)
                .filter(|bg| !bg.is_empty())
                .map(str::to_string),
        };

        Ok((self.files, request))
    }
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(err.body_text())
    } else {
        ApiError::Multipart(err.body_text())
    }
}

/// true/1/yes/on (and t/y), false/0/no/off (and f/n); anything else is `default`
pub fn parse_bool(raw: Option<&str>, default: bool) -> bool {
    let Some(raw) = raw else {
        return default;
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "t" | "y" => true,
        "false" | "0" | "no" | "off" | "f" | "n" => false,
        _ => default,
    }
}

pub fn parse_int(raw: Option<&str>) -> Option<i64> {
    raw?.trim().parse().ok()
}

/// Positive integer, saturated to `u32`
pub fn parse_dimension(raw: Option<&str>) -> Option<u32> {
    parse_int(raw)
        .filter(|v| *v > 0)
        .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(fields: &[(&str, &str)]) -> ConvertForm {
        ConvertForm {
            files: vec![UploadedFile::new("a.png", vec![1, 2, 3])],
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_parse_bool_spellings() {
        for raw in ["true", "TRUE", "1", "yes", "On", " y "] {
            assert!(parse_bool(Some(raw), false), "{raw}");
        }
        for raw in ["false", "0", "NO", "off", "f"] {
            assert!(!parse_bool(Some(raw), true), "{raw}");
        }
        assert!(parse_bool(Some("maybe"), true));
        assert!(!parse_bool(Some(""), false));
        assert!(parse_bool(None, true));
    }

    #[test]
    fn test_parse_dimension() {
        assert_eq!(parse_dimension(Some("640")), Some(640));
        assert_eq!(parse_dimension(Some("0")), None);
        assert_eq!(parse_dimension(Some("-5")), None);
        assert_eq!(parse_dimension(Some("wide")), None);
        assert_eq!(parse_dimension(Some("99999999999")), Some(u32::MAX));
        assert_eq!(parse_dimension(None), None);
    }

    #[test]
    fn test_defaults() {
        let (files, request) = form(&[("to", "PNG")]).into_request().unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(request.format, OutputFormat::Png);
        assert!(request.fit);
        assert!(!request.keep_metadata);
        assert_eq!(request.rotate_deg, 0);
        assert_eq!(request.quality, None);
        assert!(request.crop.is_none());
        assert!(request.background.is_none());
    }

    #[test]
    fn test_all_fields() {
        let (_, request) = form(&[
            ("to", "jpg"),
            ("quality", "70"),
            ("lossless", "1"),
            ("progressive", "yes"),
            ("keep_metadata", "on"),
            ("to_srgb", "true"),
            ("fit", "false"),
            ("width", "300"),
            ("height", "-1"),
            ("rotate_deg", "-90"),
            ("crop_x", "1"),
            ("crop_y", "2"),
            ("crop_w", "30"),
            ("crop_h", "40"),
            ("bg", " #00ff00 "),
        ])
        .into_request()
        .unwrap();

        assert_eq!(request.format, OutputFormat::Jpeg);
        assert_eq!(request.quality, Some(70));
        assert!(request.lossless && request.progressive && request.keep_metadata && request.to_srgb);
        assert!(!request.fit);
        assert_eq!(request.width, Some(300));
        assert_eq!(request.height, None);
        assert_eq!(request.rotate_deg, -90);
        assert_eq!(
            request.crop,
            Some(CropRect {
                x: 1,
                y: 2,
                width: 30,
                height: 40
            })
        );
        assert_eq!(request.background.as_deref(), Some("#00ff00"));
    }

    #[test]
    fn test_invalid_optionals_become_absent() {
        let (_, request) = form(&[("to", "webp"), ("quality", "high"), ("rotate_deg", "quarter")])
            .into_request()
            .unwrap();
        assert_eq!(request.quality, None);
        assert_eq!(request.rotate_deg, 0);
    }

    #[test]
    fn test_partial_crop_is_ignored() {
        let (_, request) = form(&[("to", "png"), ("crop_x", "0"), ("crop_y", "0"), ("crop_w", "10")])
            .into_request()
            .unwrap();
        assert!(request.crop.is_none());
    }

    #[test]
    fn test_required_fields() {
        let err = form(&[]).into_request().unwrap_err();
        assert!(matches!(err, ApiError::MissingField("to")));

        let mut no_files = form(&[("to", "png")]);
        no_files.files.clear();
        assert!(matches!(no_files.into_request().unwrap_err(), ApiError::MissingField("files")));
    }

    #[test]
    fn test_unsupported_format() {
        let err = form(&[("to", "svg")]).into_request().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported output format: svg");
    }
}
