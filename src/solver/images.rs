//! Grid image decoding and limits
//!
//! Images arrive base64 encoded, optionally as `data:` URLs. Only the
//! header is parsed: enough to identify the format and read dimensions.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ImageError {
    #[error("image is not valid base64: {0}")]
    Encoding(String),

    #[error("unsupported image format (expected PNG, JPEG or GIF)")]
    UnknownFormat,

    #[error("image header is truncated")]
    Truncated,

    #[error("image is {size} bytes, limit is {limit}")]
    TooLarge { size: usize, limit: u64 },

    #[error("image is {width}x{height}px, limit is {limit}px per side")]
    TooWide { width: u32, height: u32, limit: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
}

impl ImageFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
            ImageFormat::Gif => "image/gif",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ImageLimits {
    pub max_bytes: u64,
    pub max_dimension: u32,
}

/// A validated grid image, ready to embed in a provider request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedImage {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    /// Decoded size in bytes
    pub size: usize,
    /// Canonical base64 without any `data:` prefix
    pub data: String,
}

impl PreparedImage {
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.format.mime(), self.data)
    }
}

/// Decode, identify and bounds-check one image
pub fn prepare(raw: &str, limits: ImageLimits) -> Result<PreparedImage, ImageError> {
    let encoded = strip_data_url(raw);
    let compact: String = encoded.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact.as_bytes())
        .map_err(|e| ImageError::Encoding(e.to_string()))?;

    if bytes.len() as u64 > limits.max_bytes {
        return Err(ImageError::TooLarge {
            size: bytes.len(),
            limit: limits.max_bytes,
        });
    }

    let (format, width, height) = inspect(&bytes)?;
    if width > limits.max_dimension || height > limits.max_dimension {
        return Err(ImageError::TooWide {
            width,
            height,
            limit: limits.max_dimension,
        });
    }

    Ok(PreparedImage {
        format,
        width,
        height,
        size: bytes.len(),
        data: compact,
    })
}

fn strip_data_url(raw: &str) -> &str {
    let raw = raw.trim();
    if raw.starts_with("data:") {
        if let Some((_, payload)) = raw.split_once(',') {
            return payload;
        }
    }
    raw
}

/// Identify the format and read `(width, height)` from the header
pub fn inspect(bytes: &[u8]) -> Result<(ImageFormat, u32, u32), ImageError> {
    const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

    if bytes.starts_with(PNG_SIGNATURE) {
        // Signature, then the IHDR chunk: length, type, width, height
        if bytes.len() < 24 || &bytes[12..16] != b"IHDR" {
            return Err(ImageError::Truncated);
        }
        return Ok((ImageFormat::Png, be_u32(&bytes[16..20]), be_u32(&bytes[20..24])));
    }

    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        if bytes.len() < 10 {
            return Err(ImageError::Truncated);
        }
        let width = u16::from_le_bytes([bytes[6], bytes[7]]) as u32;
        let height = u16::from_le_bytes([bytes[8], bytes[9]]) as u32;
        return Ok((ImageFormat::Gif, width, height));
    }

    if bytes.starts_with(&[0xFF, 0xD8]) {
        let (width, height) = jpeg_dimensions(bytes)?;
        return Ok((ImageFormat::Jpeg, width, height));
    }

    Err(ImageError::UnknownFormat)
}

/// Walk JPEG segments until a start-of-frame marker
fn jpeg_dimensions(bytes: &[u8]) -> Result<(u32, u32), ImageError> {
    let mut pos = 2;

    loop {
        // Markers may be padded with any number of 0xFF fill bytes
        while bytes.get(pos) == Some(&0xFF) {
            pos += 1;
        }
        let marker = *bytes.get(pos).ok_or(ImageError::Truncated)?;
        pos += 1;

        match marker {
            // Standalone markers carry no length
            0x01 | 0xD0..=0xD7 => continue,
            0xD9 | 0xDA => return Err(ImageError::Truncated),
            _ => {}
        }

        let length = bytes
            .get(pos..pos + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]) as usize)
            .ok_or(ImageError::Truncated)?;

        let is_frame = matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC);
        if is_frame {
            // length(2) precision(1) height(2) width(2)
            let frame = bytes.get(pos + 3..pos + 7).ok_or(ImageError::Truncated)?;
            let height = u16::from_be_bytes([frame[0], frame[1]]) as u32;
            let width = u16::from_be_bytes([frame[2], frame[3]]) as u32;
            return Ok((width, height));
        }

        if length < 2 {
            return Err(ImageError::Truncated);
        }
        pos += length;
    }
}

fn be_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

#[cfg(test)]
pub(crate) mod fixtures {
    use super::*;

    /// Smallest header `inspect` accepts for a PNG of the given size
    pub fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = b"\x89PNG\r\n\x1a\n".to_vec();
        bytes.extend_from_slice(&13u32.to_be_bytes());
        bytes.extend_from_slice(b"IHDR");
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&[8, 6, 0, 0, 0]);
        bytes
    }

    pub fn png_base64(width: u32, height: u32) -> String {
        STANDARD.encode(png(width, height))
    }

    pub fn jpeg(width: u16, height: u16) -> Vec<u8> {
        let mut bytes = vec![0xFF, 0xD8];
        // APP0 segment to skip over
        bytes.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x06, b'J', b'F', b'I', b'F']);
        // SOF0
        bytes.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        bytes.extend_from_slice(&height.to_be_bytes());
        bytes.extend_from_slice(&width.to_be_bytes());
        bytes.extend_from_slice(&[0x03; 10]);
        bytes
    }
}
