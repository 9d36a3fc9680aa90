// EXIF block helpers: orientation lookup and in-place tag rewrite

use crate::core::types::Orientation;

const EXIF_MARKER: &[u8] = b"Exif\0\0";
const TAG_ORIENTATION: u16 = 0x0112;
const TYPE_SHORT: u16 = 3;

/// Drop the APP1 `Exif\0\0` marker some containers leave in front of the TIFF header
pub fn strip_exif_marker(data: &[u8]) -> &[u8] {
    data.strip_prefix(EXIF_MARKER).unwrap_or(data)
}

/// Orientation stored in IFD0, `Normal` when absent or unreadable
pub fn read_orientation(exif: &[u8]) -> Orientation {
    let parsed = match exif::Reader::new().read_raw(strip_exif_marker(exif).to_vec()) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!("Unreadable EXIF block, assuming upright: {}", e);
            return Orientation::Normal;
        }
    };

    parsed
        .get_field(exif::Tag::Orientation, exif::In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
        .map(Orientation::from)
        .unwrap_or_default()
}

/// Rewrite the IFD0 orientation entry to 1 (upright).
///
/// Returns false when the block has no orientation entry or is malformed, in
/// which case the bytes are left untouched.
pub fn reset_orientation(exif: &mut [u8]) -> bool {
    let little_endian = match exif.get(0..2) {
        Some(b"II") => true,
        Some(b"MM") => false,
        _ => return false,
    };

    let read_u16 = |buf: &[u8], at: usize| -> Option<u16> {
        let bytes: [u8; 2] = buf.get(at..at + 2)?.try_into().ok()?;
        Some(if little_endian {
            u16::from_le_bytes(bytes)
        } else {
            u16::from_be_bytes(bytes)
        })
    };
    let read_u32 = |buf: &[u8], at: usize| -> Option<u32> {
        let bytes: [u8; 4] = buf.get(at..at + 4)?.try_into().ok()?;
        Some(if little_endian {
            u32::from_le_bytes(bytes)
        } else {
            u32::from_be_bytes(bytes)
        })
    };

    let Some(ifd0) = read_u32(exif, 4).map(|v| v as usize) else {
        return false;
    };
    let Some(count) = read_u16(exif, ifd0) else {
        return false;
    };

    for i in 0..count as usize {
        let entry = ifd0 + 2 + i * 12;
        if read_u16(exif, entry) != Some(TAG_ORIENTATION) {
            continue;
        }
        if read_u16(exif, entry + 2) != Some(TYPE_SHORT) {
            return false;
        }
        let value = if little_endian {
            1u16.to_le_bytes()
        } else {
            1u16.to_be_bytes()
        };
        return match exif.get_mut(entry + 8..entry + 10) {
            Some(slot) => {
                slot.copy_from_slice(&value);
                true
            }
            None => false,
        };
    }

    false
}
