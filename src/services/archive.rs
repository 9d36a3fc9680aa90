// ZIP bundle for multi-file responses

use std::collections::HashSet;
use std::io::{Cursor, Write};
use tracing::debug;
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::core::errors::ArchiveError;
use crate::core::types::{file_stem, EncodedOutput, FileFailure};

pub const ARCHIVE_NAME: &str = "converted_images.zip";
pub const ERRORS_ENTRY: &str = "errors.txt";

/// Deflate every output into one archive, plus `errors.txt` when any file
/// failed. Duplicate entry names get a ` (n)` suffix before the extension.
pub fn build_archive(outputs: &[EncodedOutput], failures: &[FileFailure]) -> Result<Vec<u8>, ArchiveError> {
    let mut buffer = Vec::new();
    {
        let mut zip = ZipWriter::new(Cursor::new(&mut buffer));
        let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

        let mut used = HashSet::new();
        if !failures.is_empty() {
            used.insert(ERRORS_ENTRY.to_string());
        }

        for output in outputs {
            let name = unique_name(&output.filename, &mut used);
            debug!("Adding {} ({} bytes) to archive", name, output.data.len());
            zip.start_file(name, options)?;
            zip.write_all(&output.data)?;
        }

        if !failures.is_empty() {
            let report = failures
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n");
            zip.start_file(ERRORS_ENTRY, options)?;
            zip.write_all(report.as_bytes())?;
        }

        zip.finish()?;
    }
    Ok(buffer)
}

fn unique_name(filename: &str, used: &mut HashSet<String>) -> String {
    if used.insert(filename.to_string()) {
        return filename.to_string();
    }

    let stem = file_stem(filename);
    let extension = &filename[stem.len()..];
    let mut n = 1;
    loop {
        let candidate = format!("{stem} ({n}){extension}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}
