//! Image encoding: `DynamicImage` → base64 JPEG wrapped in `ImageData`.
//!
//! VLM APIs accept images as base64 data-URIs embedded in the JSON request
//! body and reject anything above 20 MB. Photographs and scans dominate the
//! case images, so JPEG keeps payloads small; when an image is still too
//! large it is shrunk geometrically until it fits or the attempt cap runs out.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::DynamicImage;
use std::path::Path;
use thiserror::Error;
use tracing::{debug, warn};

use crate::error::CaseDxError;
use crate::layout::list_case_images;

/// Upload ceiling for a single encoded image.
pub const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Shrink attempts before an image is given up on.
pub const MAX_SHRINK_ATTEMPTS: u32 = 5;

/// Scale factor used for the first encode of every case image.
pub const DEFAULT_SHRINK_FACTOR: f32 = 0.9;

/// Case images must exceed this many pixels on both sides to be uploaded.
pub const MIN_UPLOAD_SIDE: u32 = 150;

/// JPEG quality for uploads (the usual encoder default).
const UPLOAD_JPEG_QUALITY: u8 = 75;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("image still {last_size} bytes after {attempts} shrink attempts")]
    TooLarge { attempts: u32, last_size: usize },

    #[error("image codec error: {0}")]
    Image(#[from] image::ImageError),

    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
}

/// A JPEG payload ready for upload.
#[derive(Debug, Clone)]
pub struct EncodedImage {
    pub base64: String,
    pub width: u32,
    pub height: u32,
    /// Size of the raw JPEG before base64.
    pub byte_len: usize,
}

impl EncodedImage {
    pub fn to_image_data(&self) -> ImageData {
        ImageData::new(self.base64.clone(), "image/jpeg").with_detail("high")
    }

    /// Decode the payload back into pixels.
    pub fn decode(&self) -> Result<DynamicImage, EncodeError> {
        let bytes = STANDARD.decode(&self.base64)?;
        Ok(image::load_from_memory_with_format(
            &bytes,
            image::ImageFormat::Jpeg,
        )?)
    }
}

/// Size-bounded JPEG encoder.
#[derive(Debug, Clone, Copy)]
pub struct UploadEncoder {
    pub max_bytes: usize,
    pub max_attempts: u32,
}

impl Default for UploadEncoder {
    fn default() -> Self {
        Self {
            max_bytes: MAX_UPLOAD_BYTES,
            max_attempts: MAX_SHRINK_ATTEMPTS,
        }
    }
}

impl UploadEncoder {
    /// Encode `img`, shrinking by `factor^i` on attempt `i` until the JPEG is
    /// strictly below `max_bytes`.
    ///
    /// The first attempt encodes at the original size.
    pub fn encode(&self, img: &DynamicImage, factor: f32) -> Result<EncodedImage, EncodeError> {
        let (width, height) = (img.width(), img.height());
        let mut last_size = 0;

        for attempt in 0..self.max_attempts {
            let scale = factor.powi(attempt as i32);
            let bytes = if attempt == 0 {
                encode_jpeg(img, UPLOAD_JPEG_QUALITY)?
            } else {
                let resized = resize_by(img, scale);
                encode_jpeg(&resized, UPLOAD_JPEG_QUALITY)?
            };

            if bytes.len() < self.max_bytes {
                let (w, h) = scaled_dims(width, height, scale);
                debug!("Encoded {}x{} image → {} bytes JPEG", w, h, bytes.len());
                return Ok(EncodedImage {
                    base64: STANDARD.encode(&bytes),
                    width: w,
                    height: h,
                    byte_len: bytes.len(),
                });
            }

            warn!(
                "Attempt {}: image is {} bytes, too large; resizing",
                attempt + 1,
                bytes.len()
            );
            last_size = bytes.len();
        }

        Err(EncodeError::TooLarge {
            attempts: self.max_attempts,
            last_size,
        })
    }

    /// Re-encode an already encoded image one `factor` step smaller.
    pub fn shrink(&self, encoded: &EncodedImage, factor: f32) -> Result<EncodedImage, EncodeError> {
        let img = encoded.decode()?;
        self.encode(&resize_by(&img, factor), factor)
    }
}

/// JPEG-encode at the given quality. Alpha is dropped.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, image::ImageError> {
    let rgb = img.to_rgb8();
    let mut buf = Vec::new();
    JpegEncoder::new_with_quality(&mut buf, quality).encode_image(&rgb)?;
    Ok(buf)
}

fn scaled_dims(width: u32, height: u32, scale: f32) -> (u32, u32) {
    (
        ((width as f32 * scale).round() as u32).max(1),
        ((height as f32 * scale).round() as u32).max(1),
    )
}

fn resize_by(img: &DynamicImage, scale: f32) -> DynamicImage {
    let (w, h) = scaled_dims(img.width(), img.height(), scale);
    img.resize_exact(w, h, FilterType::Lanczos3)
}

/// Load and encode every uploadable image in a case folder.
///
/// Images with either side at or below `min_side` pixels are skipped. Any
/// image that cannot be decoded or shrunk under the ceiling fails the call.
pub fn load_case_images(
    dir: &Path,
    min_side: u32,
    encoder: &UploadEncoder,
) -> Result<Vec<EncodedImage>, CaseDxError> {
    let paths = list_case_images(dir).map_err(|source| CaseDxError::ReadFailed {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut encoded = Vec::with_capacity(paths.len());
    for path in paths {
        let (w, h) = image::image_dimensions(&path).map_err(|e| CaseDxError::Encode {
            path: path.clone(),
            source: e.into(),
        })?;
        if w <= min_side || h <= min_side {
            debug!("Skipping {} ({}x{})", path.display(), w, h);
            continue;
        }

        let img = image::open(&path).map_err(|e| CaseDxError::Encode {
            path: path.clone(),
            source: e.into(),
        })?;
        let data = encoder
            .encode(&img, DEFAULT_SHRINK_FACTOR)
            .map_err(|source| CaseDxError::Encode {
                path: path.clone(),
                source,
            })?;
        encoded.push(data);
    }

    Ok(encoded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn noisy(width: u32, height: u32) -> DynamicImage {
        let mut state: u32 = 0x1234_5678;
        DynamicImage::ImageRgb8(RgbImage::from_fn(width, height, |_, _| {
            state = state.wrapping_mul(1_664_525).wrapping_add(1_013_904_223);
            let b = state.to_be_bytes();
            Rgb([b[0], b[1], b[2]])
        }))
    }

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 0, 0])));
        let data = UploadEncoder::default().encode(&img, 0.9).expect("encode should succeed");
        assert_eq!((data.width, data.height), (10, 10));

        let raw = STANDARD.decode(&data.base64).unwrap();
        assert_eq!(raw.len(), data.byte_len);
        assert!(raw.len() < MAX_UPLOAD_BYTES);
        assert_eq!(&raw[..2], &[0xFF, 0xD8], "JPEG SOI marker");

        let image_data = data.to_image_data();
        assert_eq!(image_data.mime_type, "image/jpeg");
    }

    #[test]
    fn fails_after_exactly_five_attempts() {
        let encoder = UploadEncoder {
            max_bytes: 16,
            ..UploadEncoder::default()
        };
        let err = encoder.encode(&noisy(64, 64), 0.9).unwrap_err();
        match err {
            EncodeError::TooLarge {
                attempts,
                last_size,
            } => {
                assert_eq!(attempts, 5);
                assert!(last_size >= 16);
            }
            other => panic!("expected TooLarge, got {other:?}"),
        }
    }

    #[test]
    fn shrinks_geometrically_until_it_fits() {
        let img = noisy(400, 400);
        let full = encode_jpeg(&img, UPLOAD_JPEG_QUALITY).unwrap().len();

        // Ceiling equal to the full-size payload forces at least one shrink.
        let encoder = UploadEncoder {
            max_bytes: full,
            ..UploadEncoder::default()
        };
        let data = encoder.encode(&img, 0.9).expect("smaller render should fit");
        assert!(data.width < 400 && data.height < 400);
        assert!(data.byte_len < full);
    }

    #[test]
    fn shrink_reduces_dimensions() {
        let encoder = UploadEncoder::default();
        let first = encoder.encode(&noisy(200, 100), 0.9).unwrap();
        let second = encoder.shrink(&first, 0.7).unwrap();
        assert_eq!((second.width, second.height), (140, 70));
    }

    #[test]
    fn load_case_images_skips_small_images() {
        let dir = tempfile::tempdir().unwrap();
        noisy(200, 200).save(dir.path().join("page_1.png")).unwrap();
        noisy(120, 300).save(dir.path().join("page_1_image_3.png")).unwrap();
        noisy(150, 150).save(dir.path().join("page_2.png")).unwrap();
        std::fs::write(dir.path().join("history_texts.txt"), "History").unwrap();

        let images = load_case_images(dir.path(), MIN_UPLOAD_SIDE, &UploadEncoder::default()).unwrap();
        assert_eq!(images.len(), 1);
        assert_eq!((images[0].width, images[0].height), (200, 200));
    }

    #[test]
    fn load_case_images_propagates_decode_failure() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("page_1.jpeg"), b"not a jpeg").unwrap();
        let err = load_case_images(dir.path(), MIN_UPLOAD_SIDE, &UploadEncoder::default()).unwrap_err();
        assert!(matches!(err, CaseDxError::Encode { .. }), "got {err:?}");
    }
}
