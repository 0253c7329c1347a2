//! Raster images as PDF image XObjects

use std::io::{Read, Write};

use base64::Engine;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView, ImageFormat};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};

/// An image XObject added to a document.
#[derive(Debug, Clone, Copy)]
pub struct EmbeddedImage {
    pub id: ObjectId,
    pub width: u32,
    pub height: u32,
}

impl EmbeddedImage {
    /// Height of the image when drawn `width` points wide.
    pub fn height_for_width(&self, width: f32) -> f32 {
        if self.width == 0 {
            return 0.0;
        }
        width * self.height as f32 / self.width as f32
    }
}

pub fn flate(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
    encoder
        .write_all(data)
        .map_err(|e| format!("Failed to compress data: {}", e))?;
    encoder
        .finish()
        .map_err(|e| format!("Failed to finish compression: {}", e))
}

/// Inverse of [`flate`]. lopdf refuses to decode image streams itself.
pub fn inflate(data: &[u8]) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    ZlibDecoder::new(data)
        .read_to_end(&mut out)
        .map_err(|e| format!("Failed to decompress data: {}", e))?;
    Ok(out)
}

/// Payload of a `data:image/...;base64,` URL.
pub fn decode_data_url(url: &str) -> Result<Vec<u8>, String> {
    let rest = url
        .strip_prefix("data:image")
        .ok_or_else(|| "not an image data URL".to_string())?;
    let (_, payload) = rest
        .split_once(";base64,")
        .ok_or_else(|| "data URL is not base64 encoded".to_string())?;
    base64::engine::general_purpose::STANDARD
        .decode(payload.trim())
        .map_err(|e| format!("invalid base64 payload: {}", e))
}

/// `data:<mime>;base64,` URL carrying `bytes`.
pub fn encode_data_url(mime: &str, bytes: &[u8]) -> String {
    format!(
        "data:{};base64,{}",
        mime,
        base64::engine::general_purpose::STANDARD.encode(bytes)
    )
}

/// Add a PNG or JPEG to `doc`. JPEG data is embedded as-is; anything else is
/// decoded and stored Flate-compressed, with a soft mask when it carries alpha.
pub fn embed_image(doc: &mut Document, bytes: &[u8]) -> Result<EmbeddedImage, String> {
    let format = image::guess_format(bytes).map_err(|e| format!("unknown image format: {}", e))?;
    let img = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| format!("Failed to decode image: {}", e))?;
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return Err("image has no pixels".to_string());
    }

    let stream = if format == ImageFormat::Jpeg {
        image_stream(width, height, gray_or_rgb(&img), "DCTDecode", bytes.to_vec())
    } else {
        let rgb = img.to_rgb8();
        let mut stream = image_stream(width, height, "DeviceRGB", "FlateDecode", flate(rgb.as_raw())?);
        if img.color().has_alpha() {
            let alpha: Vec<u8> = img.to_rgba8().pixels().map(|p| p.0[3]).collect();
            let smask = image_stream(width, height, "DeviceGray", "FlateDecode", flate(&alpha)?);
            let smask_id = doc.add_object(smask);
            stream.dict.set("SMask", Object::Reference(smask_id));
        }
        stream
    };

    let id = doc.add_object(stream);
    Ok(EmbeddedImage { id, width, height })
}

/// Baseline JPEG at `quality` (1-100).
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, String> {
    let mut out = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut out, quality.clamp(1, 100));
    match img {
        DynamicImage::ImageLuma8(gray) => gray.write_with_encoder(encoder),
        other => other.to_rgb8().write_with_encoder(encoder),
    }
    .map_err(|e| format!("Failed to encode JPEG: {}", e))?;
    Ok(out)
}

pub(crate) fn image_stream(
    width: u32,
    height: u32,
    color_space: &str,
    filter: &str,
    content: Vec<u8>,
) -> Stream {
    let mut dict = Dictionary::new();
    dict.set("Type", Object::Name(b"XObject".to_vec()));
    dict.set("Subtype", Object::Name(b"Image".to_vec()));
    dict.set("Width", Object::Integer(width as i64));
    dict.set("Height", Object::Integer(height as i64));
    dict.set("ColorSpace", Object::Name(color_space.as_bytes().to_vec()));
    dict.set("BitsPerComponent", Object::Integer(8));
    dict.set("Filter", Object::Name(filter.as_bytes().to_vec()));
    let mut stream = Stream::new(dict, content);
    // Already encoded; the serializer must not filter it again.
    stream.allows_compression = false;
    stream
}

fn gray_or_rgb(img: &DynamicImage) -> &'static str {
    match img {
        DynamicImage::ImageLuma8(_) => "DeviceGray",
        _ => "DeviceRGB",
    }
}
