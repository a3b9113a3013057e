//! Image persistence.
//!
//! Keys are derived from the content hash, so uploading the same image
//! twice lands on the same object.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use lantern_core::metrics::events::ImageUploaded;
use lantern_core::{StorageError, StorageProvider, emit};
use object_store::path::Path;
use sha2::{Digest, Sha256};

use crate::message::UploadedImage;

use super::traits::ImageStore;

struct DetectedImage {
    content_type: &'static str,
    extension: &'static str,
    dimensions: Option<(u32, u32)>,
}

/// [`ImageStore`] backed by an object store.
pub struct ObjectImageStore {
    storage: Arc<StorageProvider>,
}

impl ObjectImageStore {
    pub fn new(storage: Arc<StorageProvider>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ImageStore for ObjectImageStore {
    async fn upload(&self, source_url: &str, bytes: Bytes) -> Result<UploadedImage, StorageError> {
        let checksum = format!("{:x}", Sha256::digest(&bytes));
        let detected = detect_image(&bytes);
        let key = format!("images/{}/{checksum}{}", &checksum[..2], detected.extension);

        let size = bytes.len() as u64;
        self.storage.put(key.as_str(), bytes).await?;
        emit!(ImageUploaded { bytes: size });

        let (width, height) = match detected.dimensions {
            Some((width, height)) => (Some(width), Some(height)),
            None => (None, None),
        };

        Ok(UploadedImage {
            source_url: source_url.to_string(),
            key,
            checksum,
            content_type: detected.content_type.to_string(),
            width,
            height,
        })
    }

    fn public_url(&self, key: &str) -> String {
        self.storage.public_url(&Path::from(key))
    }
}

/// Classify image bytes by magic number. Unrecognized payloads are
/// stored as opaque octet streams without dimensions.
fn detect_image(bytes: &[u8]) -> DetectedImage {
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return DetectedImage {
            content_type: "image/jpeg",
            extension: ".jpg",
            dimensions: jpeg_dimensions(bytes),
        };
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]) {
        return DetectedImage {
            content_type: "image/png",
            extension: ".png",
            dimensions: png_dimensions(bytes),
        };
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return DetectedImage {
            content_type: "image/gif",
            extension: ".gif",
            dimensions: gif_dimensions(bytes),
        };
    }
    if bytes.starts_with(b"BM") {
        return DetectedImage {
            content_type: "image/bmp",
            extension: ".bmp",
            dimensions: bmp_dimensions(bytes),
        };
    }
    if bytes.len() >= 12 && bytes.starts_with(b"RIFF") && &bytes[8..12] == b"WEBP" {
        return DetectedImage {
            content_type: "image/webp",
            extension: ".webp",
            dimensions: webp_dimensions(bytes),
        };
    }
    DetectedImage {
        content_type: "application/octet-stream",
        extension: "",
        dimensions: None,
    }
}

fn png_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    // IHDR is always the first chunk.
    Some((be_u32(bytes, 16)?, be_u32(bytes, 20)?))
}

fn gif_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    Some((u32::from(le_u16(bytes, 6)?), u32::from(le_u16(bytes, 8)?)))
}

fn bmp_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    // Height is negative for top-down bitmaps.
    let width = le_i32(bytes, 18)?;
    let height = le_i32(bytes, 22)?;
    Some((width.unsigned_abs(), height.unsigned_abs()))
}

/// Walk JPEG segments until a start-of-frame marker carries the
/// dimensions.
fn jpeg_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    let mut i = 2;
    while i + 9 <= bytes.len() {
        if bytes[i] != 0xFF {
            i += 1;
            continue;
        }
        let marker = bytes[i + 1];
        // Fill bytes before a marker.
        if marker == 0xFF {
            i += 1;
            continue;
        }
        // Standalone markers carry no length field.
        if matches!(marker, 0x01 | 0xD0..=0xD9) {
            i += 2;
            continue;
        }
        if matches!(marker, 0xC0..=0xCF) && !matches!(marker, 0xC4 | 0xC8 | 0xCC) {
            let height = be_u16(bytes, i + 5)?;
            let width = be_u16(bytes, i + 7)?;
            return Some((u32::from(width), u32::from(height)));
        }
        let length = usize::from(be_u16(bytes, i + 2)?);
        i += 2 + length;
    }
    None
}

fn webp_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    match bytes.get(12..16)? {
        b"VP8X" => {
            let width = le_u24(bytes, 24)? + 1;
            let height = le_u24(bytes, 27)? + 1;
            Some((width, height))
        }
        b"VP8 " => {
            // Lossy bitstream: 14-bit dimensions follow the sync code.
            if bytes.get(23..26)? != [0x9D, 0x01, 0x2A] {
                return None;
            }
            let width = u32::from(le_u16(bytes, 26)?) & 0x3FFF;
            let height = u32::from(le_u16(bytes, 28)?) & 0x3FFF;
            Some((width, height))
        }
        _ => None,
    }
}

fn be_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let slice = bytes.get(offset..offset + 2)?;
    Some(u16::from_be_bytes([slice[0], slice[1]]))
}

fn be_u32(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(u32::from_be_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn le_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let slice = bytes.get(offset..offset + 2)?;
    Some(u16::from_le_bytes([slice[0], slice[1]]))
}

fn le_u24(bytes: &[u8], offset: usize) -> Option<u32> {
    let slice = bytes.get(offset..offset + 3)?;
    Some(u32::from(slice[0]) | u32::from(slice[1]) << 8 | u32::from(slice[2]) << 16)
}

fn le_i32(bytes: &[u8], offset: usize) -> Option<i32> {
    let slice = bytes.get(offset..offset + 4)?;
    Some(i32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}
