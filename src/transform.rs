//! Reference IIIF Image API 2 processor built on the `image` crate.

pub mod params;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ExtendedColorType, GenericImageView, ImageEncoder};
use std::io::Cursor;
use std::path::Path;

use crate::fetch::fetch_source;
use crate::processor::{ImageProcessor, ProcessingResult, ProcessorError, Resolver};
use params::{Format, IiifRequest, ParamError, Quality, Region, Rotation, Size};

/// JPEG and WebP encoder quality.
pub const DEFAULT_QUALITY: u8 = 85;

impl From<ParamError> for ProcessorError {
    fn from(err: ParamError) -> Self {
        ProcessorError::Validation(err.0)
    }
}

/// Decodes raw image bytes, detecting the format from magic bytes.
///
/// # Errors
/// `Validation` if the format is unknown or the data is corrupt.
pub fn decode_image(bytes: &[u8]) -> Result<DynamicImage, ProcessorError> {
    let guessed = image::guess_format(bytes)
        .map_err(|e| ProcessorError::Validation(format!("Unsupported source image: {}", e)))?;
    image::load_from_memory_with_format(bytes, guessed)
        .map_err(|e| ProcessorError::Validation(format!("Decode error: {}", e)))
}

/// Applies region, size, rotation and quality, in that order.
///
/// # Errors
/// `Validation` if the region misses the image or the requested size exceeds
/// `max_pixels`.
pub fn render(
    img: DynamicImage,
    region: Region,
    size: Size,
    rotation: Rotation,
    quality: Quality,
    max_pixels: u64,
) -> Result<DynamicImage, ProcessorError> {
    let (width, height) = img.dimensions();
    let (x, y, w, h) = region.resolve(width, height)?;

    let (target_w, target_h) = size.resolve(w, h);
    if u64::from(target_w) * u64::from(target_h) > max_pixels {
        return Err(ProcessorError::Validation(format!(
            "Requested size {}x{} exceeds the limit of {} pixels",
            target_w, target_h, max_pixels
        )));
    }

    let cropped = if (x, y, w, h) == (0, 0, width, height) { img } else { img.crop_imm(x, y, w, h) };
    // Lanczos3 provides best quality for downsampling
    let sized = if (target_w, target_h) == (w, h) {
        cropped
    } else {
        cropped.resize_exact(target_w, target_h, image::imageops::FilterType::Lanczos3)
    };

    let mirrored = if rotation.mirror { sized.fliph() } else { sized };
    let rotated = match rotation.degrees {
        90 => mirrored.rotate90(),
        180 => mirrored.rotate180(),
        270 => mirrored.rotate270(),
        _ => mirrored,
    };

    Ok(match quality {
        Quality::Default | Quality::Color => rotated,
        Quality::Gray => DynamicImage::ImageLuma8(rotated.to_luma8()),
        Quality::Bitonal => {
            let mut luma = rotated.to_luma8();
            for pixel in luma.pixels_mut() {
                pixel.0[0] = if pixel.0[0] < 128 { 0 } else { 255 };
            }
            DynamicImage::ImageLuma8(luma)
        }
    })
}

/// Encodes an image into the requested output format.
///
/// JPEG and WebP are lossy at [`DEFAULT_QUALITY`]; WebP goes through libwebp
/// since the `image` encoder is lossless-only.
pub fn encode_image(img: &DynamicImage, format: Format) -> Result<Vec<u8>, ProcessorError> {
    let encode_err = |e: image::ImageError| ProcessorError::Internal(format!("Encode error: {}", e));
    let mut out = Vec::new();

    match format {
        Format::Jpg => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            JpegEncoder::new_with_quality(&mut out, DEFAULT_QUALITY)
                .write_image(rgb.as_raw(), w, h, ExtendedColorType::Rgb8)
                .map_err(encode_err)?;
        }
        Format::Webp => {
            let rgb = img.to_rgb8();
            let (w, h) = rgb.dimensions();
            let encoded = webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode(DEFAULT_QUALITY as f32);
            out.extend_from_slice(&encoded);
        }
        Format::Png | Format::Gif | Format::Tif => {
            let target = match format {
                Format::Png => image::ImageFormat::Png,
                Format::Gif => image::ImageFormat::Gif,
                _ => image::ImageFormat::Tiff,
            };
            let mut cursor = Cursor::new(&mut out);
            let written = if format == Format::Gif {
                // GIF only takes RGBA input
                DynamicImage::ImageRgba8(img.to_rgba8()).write_to(&mut cursor, target)
            } else {
                img.write_to(&mut cursor, target)
            };
            written.map_err(encode_err)?;
        }
    }

    Ok(out)
}

/// IIIF Image API 2.1 `info.json` for an image of the given dimensions.
pub fn info_document(base_uri: &str, width: u32, height: u32) -> serde_json::Value {
    let formats: Vec<String> = Format::ALL.iter().map(|f| f.to_string()).collect();
    serde_json::json!({
        "@context": "http://iiif.io/api/image/2/context.json",
        "@id": base_uri,
        "protocol": "http://iiif.io/api/image",
        "width": width,
        "height": height,
        "profile": [
            "http://iiif.io/api/image/2/level2.json",
            {
                "formats": formats,
                "qualities": ["default", "color", "gray", "bitonal"],
                "supports": ["mirroring", "regionByPct", "regionSquare", "sizeByConfinedWh", "sizeByWh"]
            }
        ]
    })
}

/// Processor that reads sources through the resolver and renders them in
/// process. CPU-bound work runs on the blocking pool.
#[derive(Debug, Clone)]
pub struct IiifProcessor {
    max_source_size: usize,
    max_output_pixels: u64,
}

impl IiifProcessor {
    pub fn new(max_source_size: usize, max_output_pixels: u64) -> Self {
        Self {
            max_source_size,
            max_output_pixels,
        }
    }
}

#[async_trait::async_trait]
impl ImageProcessor for IiifProcessor {
    async fn execute(
        &self,
        uri: &str,
        resolver: &dyn Resolver,
        _scratch: &Path,
    ) -> Result<ProcessingResult, ProcessorError> {
        let request: IiifRequest = uri.parse()?;
        tracing::debug!(uri, ?request, "executing IIIF request");

        match request {
            IiifRequest::Info { identifier, base_uri } => {
                let source = fetch_source(resolver, &identifier, self.max_source_size).await?;
                let (width, height) = tokio::task::spawn_blocking(move || {
                    image::ImageReader::new(Cursor::new(&source[..]))
                        .with_guessed_format()
                        .map_err(|e| ProcessorError::Internal(e.to_string()))?
                        .into_dimensions()
                        .map_err(|e| ProcessorError::Validation(format!("Decode error: {}", e)))
                })
                .await
                .map_err(|e| ProcessorError::Internal(e.to_string()))??;

                Ok(ProcessingResult {
                    content_type: "application/json".into(),
                    body: Bytes::from(info_document(&base_uri, width, height).to_string()),
                })
            }
            IiifRequest::Image { identifier, region, size, rotation, quality, format } => {
                let source = fetch_source(resolver, &identifier, self.max_source_size).await?;
                let max_pixels = self.max_output_pixels;
                let body = tokio::task::spawn_blocking(move || {
                    let img = decode_image(&source)?;
                    let rendered = render(img, region, size, rotation, quality, max_pixels)?;
                    encode_image(&rendered, format)
                })
                .await
                .map_err(|e| ProcessorError::Internal(e.to_string()))??;

                Ok(ProcessingResult {
                    content_type: format.content_type().into(),
                    body: Bytes::from(body),
                })
            }
        }
    }
}
