//! Codec adapter over the `image` crate
//!
//! Decoding accepts any encoding the `image` crate recognizes; encoding
//! always produces PNG. Payload helpers convert between base64 / data URI
//! text and raw bytes.

use crate::error::{ProcessingError, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{
    codecs::png::{CompressionType, FilterType, PngEncoder},
    DynamicImage, GenericImageView,
};

/// Prefix of the data URIs produced for PNG results
pub const PNG_DATA_URI_PREFIX: &str = "data:image/png;base64,";

/// Service for in-memory image decode/encode
pub struct ImageCodec;

impl ImageCodec {
    /// Decode image bytes into a pixel buffer
    ///
    /// The result is normalized to 8-bit RGBA when the source carries an
    /// alpha channel and to 8-bit RGB otherwise.
    ///
    /// # Errors
    /// Returns `ProcessingError::Decode` when the bytes are empty or not a
    /// recognized image encoding.
    pub fn decode(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(ProcessingError::decode("empty image payload"));
        }
        let image = image::load_from_memory(bytes).map_err(|e| {
            ProcessingError::decode(format!("Failed to decode image from bytes: {e}"))
        })?;
        Ok(Self::normalize_color(image))
    }

    /// Convert to RGBA8 if the image has alpha, RGB8 otherwise
    #[must_use]
    pub fn normalize_color(image: DynamicImage) -> DynamicImage {
        match image {
            DynamicImage::ImageRgba8(_) | DynamicImage::ImageRgb8(_) => image,
            other if other.color().has_alpha() => DynamicImage::ImageRgba8(other.to_rgba8()),
            other => DynamicImage::ImageRgb8(other.to_rgb8()),
        }
    }

    /// Encode a pixel buffer as PNG
    ///
    /// Levels 0-3 map to fast compression, 4-6 to the default and 7-9 to
    /// best compression. Output is deterministic for identical pixels and
    /// level.
    ///
    /// # Errors
    /// Returns `ProcessingError::Encode` if the encoder rejects the buffer.
    pub fn encode_png(image: &DynamicImage, compression_level: u8) -> Result<Vec<u8>> {
        let compression = match compression_level {
            0..=3 => CompressionType::Fast,
            4..=6 => CompressionType::Default,
            _ => CompressionType::Best,
        };

        let mut buffer = Vec::new();
        let encoder = PngEncoder::new_with_quality(&mut buffer, compression, FilterType::Adaptive);
        image
            .write_with_encoder(encoder)
            .map_err(|e| ProcessingError::encode(format!("Failed to encode PNG: {e}")))?;
        Ok(buffer)
    }

    /// Width and height of a pixel buffer
    #[must_use]
    pub fn dimensions(image: &DynamicImage) -> (u32, u32) {
        image.dimensions()
    }

    /// Read width and height from the image header without decoding pixels
    ///
    /// # Errors
    /// Returns `ProcessingError::Decode` if the format is not recognized or
    /// the header is unreadable.
    pub fn probe_dimensions(bytes: &[u8]) -> Result<(u32, u32)> {
        image::ImageReader::new(std::io::Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| ProcessingError::decode(format!("Failed to read image header: {e}")))?
            .into_dimensions()
            .map_err(|e| ProcessingError::decode(format!("Failed to read image header: {e}")))
    }

    /// Decode base64 text, optionally wrapped in a `data:` URI
    ///
    /// Whitespace inside the payload is ignored.
    ///
    /// # Errors
    /// Returns `ProcessingError::Decode` for invalid base64.
    pub fn decode_base64(payload: &str) -> Result<Vec<u8>> {
        let body = match payload.strip_prefix("data:") {
            Some(rest) => rest.split_once(',').map_or(rest, |(_, data)| data),
            None => payload,
        };
        let compact: String = body.chars().filter(|c| !c.is_ascii_whitespace()).collect();
        STANDARD
            .decode(compact.as_bytes())
            .map_err(|e| ProcessingError::decode(format!("Invalid base64 payload: {e}")))
    }

    /// Encode PNG bytes as a `data:image/png;base64,` URI
    #[must_use]
    pub fn to_png_data_uri(png: &[u8]) -> String {
        let mut uri = String::with_capacity(PNG_DATA_URI_PREFIX.len() + png.len() * 4 / 3 + 4);
        uri.push_str(PNG_DATA_URI_PREFIX);
        STANDARD.encode_string(png, &mut uri);
        uri
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, ImageFormat, LumaA, Rgb, Rgba, RgbaImage};
    use std::io::Cursor;

    fn encode_with(image: &DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buffer = Vec::new();
        image.write_to(&mut Cursor::new(&mut buffer), format).unwrap();
        buffer
    }

    fn gradient(width: u32, height: u32) -> RgbaImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgba([(x * 7) as u8, (y * 11) as u8, ((x + y) * 3) as u8, 200])
        })
    }

    #[test]
    fn test_decode_valid_png() {
        let source = DynamicImage::ImageRgba8(gradient(12, 8));
        let bytes = encode_with(&source, ImageFormat::Png);

        let decoded = ImageCodec::decode(&bytes).unwrap();
        assert_eq!(ImageCodec::dimensions(&decoded), (12, 8));
        assert!(matches!(decoded, DynamicImage::ImageRgba8(_)));
    }

    #[test]
    fn test_decode_invalid_bytes() {
        let err = ImageCodec::decode(b"definitely not an image").unwrap_err();
        assert!(matches!(err, ProcessingError::Decode(_)));
    }

    #[test]
    fn test_probe_dimensions() {
        let bytes = encode_with(&DynamicImage::ImageRgba8(gradient(30, 17)), ImageFormat::Png);
        assert_eq!(ImageCodec::probe_dimensions(&bytes).unwrap(), (30, 17));
        assert!(ImageCodec::probe_dimensions(b"nope").is_err());
    }

    #[test]
    fn test_decode_empty() {
        assert!(matches!(
            ImageCodec::decode(&[]),
            Err(ProcessingError::Decode(_))
        ));
    }

    #[test]
    fn test_normalize_color_modes() {
        let gray_alpha = DynamicImage::ImageLumaA8(ImageBuffer::from_pixel(2, 2, LumaA([10, 20])));
        assert!(matches!(
            ImageCodec::normalize_color(gray_alpha),
            DynamicImage::ImageRgba8(_)
        ));

        let gray = DynamicImage::new_luma8(2, 2);
        assert!(matches!(
            ImageCodec::normalize_color(gray),
            DynamicImage::ImageRgb8(_)
        ));
    }

    #[test]
    fn test_decode_jpeg_to_rgb() {
        let source =
            DynamicImage::ImageRgb8(ImageBuffer::from_pixel(16, 16, Rgb([200, 100, 50])));
        let bytes = encode_with(&source, ImageFormat::Jpeg);
        let decoded = ImageCodec::decode(&bytes).unwrap();
        assert!(matches!(decoded, DynamicImage::ImageRgb8(_)));
    }

    #[test]
    fn test_png_round_trip_is_lossless() {
        let source = DynamicImage::ImageRgba8(gradient(31, 17));
        let original = ImageCodec::decode(&encode_with(&source, ImageFormat::Png)).unwrap();

        let reencoded = ImageCodec::encode_png(&original, 6).unwrap();
        let round_trip = ImageCodec::decode(&reencoded).unwrap();

        assert_eq!(original.to_rgba8().as_raw(), round_trip.to_rgba8().as_raw());
    }

    #[test]
    fn test_encode_png_is_deterministic() {
        let image = DynamicImage::ImageRgba8(gradient(20, 20));
        let first = ImageCodec::encode_png(&image, 6).unwrap();
        let second = ImageCodec::encode_png(&image, 6).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.get(1..4), Some(&b"PNG"[..]));
    }

    #[test]
    fn test_encode_png_all_levels() {
        let image = DynamicImage::ImageRgba8(gradient(8, 8));
        for level in 0..=9 {
            let png = ImageCodec::encode_png(&image, level).unwrap();
            let back = ImageCodec::decode(&png).unwrap();
            assert_eq!(back.to_rgba8().as_raw(), image.to_rgba8().as_raw());
        }
    }

    #[test]
    fn test_decode_base64_plain_and_data_uri() {
        assert_eq!(ImageCodec::decode_base64("aGVsbG8=").unwrap(), b"hello");
        assert_eq!(
            ImageCodec::decode_base64("data:image/jpeg;base64,aGVsbG8=").unwrap(),
            b"hello"
        );
        assert_eq!(ImageCodec::decode_base64("aGVs\nbG8=").unwrap(), b"hello");
    }

    #[test]
    fn test_decode_base64_invalid() {
        assert!(matches!(
            ImageCodec::decode_base64("***not base64***"),
            Err(ProcessingError::Decode(_))
        ));
    }

    #[test]
    fn test_png_data_uri_round_trip() {
        let uri = ImageCodec::to_png_data_uri(b"\x89PNG");
        assert!(uri.starts_with(PNG_DATA_URI_PREFIX));
        assert_eq!(ImageCodec::decode_base64(&uri).unwrap(), b"\x89PNG");
    }
}
