use crate::error::AppError;
use base64::Engine;
use image::codecs::jpeg::JpegEncoder;
use image::{Rgb, RgbImage};

const SAMPLE_SIZE: u32 = 256;
const JPEG_QUALITY: u8 = 85;

/// Encode a generated gradient picture as JPEG
///
/// Stands in for the system image picker: every save on the demo screen
/// stores these bytes.
pub fn sample_jpeg() -> Result<Vec<u8>, AppError> {
    let img = RgbImage::from_fn(SAMPLE_SIZE, SAMPLE_SIZE, |x, y| {
        let r = (x * 255 / SAMPLE_SIZE) as u8;
        let g = (y * 255 / SAMPLE_SIZE) as u8;
        Rgb([r, g, 160])
    });

    let mut bytes = Vec::new();
    JpegEncoder::new_with_quality(&mut bytes, JPEG_QUALITY)
        .encode_image(&img)
        .map_err(|e| AppError::ImageProcessing(format!("JPEG encoding failed: {}", e)))?;
    Ok(bytes)
}

/// Data URL (Base64) for showing image bytes in the webview
pub fn to_data_url(bytes: &[u8]) -> String {
    let b64 = base64::engine::general_purpose::STANDARD.encode(bytes);
    format!("data:image/jpeg;base64,{}", b64)
}
