//! Transformation Service: wraps the decode/resize/encode engine,
//! consulting an optional metadata source for smart/aspect/focal crop
//! decisions before resizing. Does not retry; a decode or encode failure
//! is terminal for the request.

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView};

use crate::config::ImageFormat;
use crate::params::TransformOptions;

use super::{decode_image, encode_image, resize_image};

#[derive(Debug, thiserror::Error)]
pub enum TransformationError {
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("resize failed: {0}")]
    Resize(String),
    #[error("encode failed: {0}")]
    Encode(String),
    #[error("metadata lookup failed: {0}")]
    Metadata(String),
}

/// Crop/focal metadata an external service (e.g. a saliency detector) can
/// supply for `smart`-cropped transforms. Resolved before resize so the
/// crop rectangle lines up with the decoded image's actual dimensions.
#[derive(Debug, Clone, Copy, Default)]
pub struct FocalPoint {
    /// 0.0..=1.0 fraction of image width/height.
    pub x: f64,
    pub y: f64,
}

#[async_trait]
pub trait MetadataService: Send + Sync {
    async fn focal_point(&self, path: &str, image: &DynamicImage) -> Result<FocalPoint, TransformationError>;
}

/// Default metadata source used when `options.smart` has no external
/// detector wired up: falls back to center crop.
pub struct CenterFocalMetadata;

#[async_trait]
impl MetadataService for CenterFocalMetadata {
    async fn focal_point(&self, _path: &str, _image: &DynamicImage) -> Result<FocalPoint, TransformationError> {
        Ok(FocalPoint { x: 0.5, y: 0.5 })
    }
}

pub struct TransformationService {
    metadata: std::sync::Arc<dyn MetadataService>,
}

impl TransformationService {
    pub fn new(metadata: std::sync::Arc<dyn MetadataService>) -> Self {
        Self { metadata }
    }

    pub fn with_default_metadata() -> Self {
        Self::new(std::sync::Arc::new(CenterFocalMetadata))
    }

    /// Runs decode -> (optional smart crop) -> resize -> encode for one
    /// request. `path` is passed through only to let a metadata service key
    /// on the source path; it carries no caching semantics here.
    pub async fn transform(
        &self,
        path: &str,
        bytes: &[u8],
        options: &TransformOptions,
    ) -> Result<(Vec<u8>, ImageFormat), TransformationError> {
        let (mut image, detected_format) =
            decode_image(bytes).map_err(|e| TransformationError::Decode(e.to_string()))?;

        if options.smart || options.focal.is_some() {
            image = self.apply_focal_crop(path, image, options).await?;
        } else if let Some(aspect) = options.aspect.as_deref() {
            image = apply_aspect_crop(image, aspect, FocalPoint { x: 0.5, y: 0.5 });
        }

        let resized = resize_image(image, options.width, options.height)
            .map_err(|e| TransformationError::Resize(e.to_string()))?;

        let format = resolve_format(options.format.as_deref(), detected_format);
        let quality = options.quality.unwrap_or(crate::config::DEFAULT_QUALITY);
        let encoded =
            encode_image(&resized, format, quality).map_err(|e| TransformationError::Encode(e.to_string()))?;

        Ok((encoded, format))
    }

    async fn apply_focal_crop(
        &self,
        path: &str,
        image: DynamicImage,
        options: &TransformOptions,
    ) -> Result<DynamicImage, TransformationError> {
        let focal = if let Some(raw) = &options.focal {
            parse_focal(raw).unwrap_or(FocalPoint { x: 0.5, y: 0.5 })
        } else {
            self.metadata.focal_point(path, &image).await?
        };

        Ok(match &options.aspect {
            Some(aspect) => apply_aspect_crop(image, aspect, focal),
            None => image,
        })
    }
}

fn parse_focal(raw: &str) -> Option<FocalPoint> {
    let mut parts = raw.split(',');
    let x: f64 = parts.next()?.trim().parse().ok()?;
    let y: f64 = parts.next()?.trim().parse().ok()?;
    Some(FocalPoint { x: x.clamp(0.0, 1.0), y: y.clamp(0.0, 1.0) })
}

/// Crops `image` to the `a:b` aspect ratio, keeping the rectangle centered
/// on `focal` (a fraction of width/height).
fn apply_aspect_crop(image: DynamicImage, aspect: &str, focal: FocalPoint) -> DynamicImage {
    let Some((num, den)) = aspect.split_once(':').and_then(|(a, b)| Some((a.parse::<f64>().ok()?, b.parse::<f64>().ok()?))) else {
        return image;
    };
    if num <= 0.0 || den <= 0.0 {
        return image;
    }

    let (w, h) = image.dimensions();
    let target_ratio = num / den;
    let current_ratio = w as f64 / h as f64;

    let (crop_w, crop_h) = if current_ratio > target_ratio {
        ((h as f64 * target_ratio) as u32, h)
    } else {
        (w, (w as f64 / target_ratio) as u32)
    };
    let crop_w = crop_w.clamp(1, w);
    let crop_h = crop_h.clamp(1, h);

    let max_x = w - crop_w;
    let max_y = h - crop_h;
    let x = ((focal.x * w as f64) - crop_w as f64 / 2.0).clamp(0.0, max_x as f64) as u32;
    let y = ((focal.y * h as f64) - crop_h as f64 / 2.0).clamp(0.0, max_y as f64) as u32;

    image.crop_imm(x, y, crop_w, crop_h)
}

fn resolve_format(requested: Option<&str>, detected: Option<ImageFormat>) -> ImageFormat {
    match requested {
        Some("webp") => ImageFormat::webp,
        Some("jpeg") | Some("jpg") => ImageFormat::jpeg,
        Some("avif") => ImageFormat::avif,
        _ => detected.unwrap_or(ImageFormat::jpeg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    fn sample_jpeg(w: u32, h: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(w, h, |x, y| Rgb([(x % 255) as u8, (y % 255) as u8, 128]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    #[tokio::test]
    async fn transform_resizes_and_encodes_to_requested_format() {
        let service = TransformationService::with_default_metadata();
        let bytes = sample_jpeg(40, 40);
        let mut options = TransformOptions::default();
        options.width = Some(10);
        options.format = Some("webp".to_string());
        options.quality = Some(80);

        let (encoded, format) = service.transform("/cat.jpg", &bytes, &options).await.unwrap();
        assert_eq!(format, ImageFormat::webp);
        assert!(!encoded.is_empty());
    }

    #[tokio::test]
    async fn aspect_crop_centers_on_explicit_focal_point() {
        let service = TransformationService::with_default_metadata();
        let bytes = sample_jpeg(100, 50);
        let mut options = TransformOptions::default();
        options.aspect = Some("1:1".to_string());
        options.focal = Some("0.1,0.5".to_string());

        let (encoded, _) = service.transform("/cat.jpg", &bytes, &options).await.unwrap();
        assert!(!encoded.is_empty());
    }

    #[test]
    fn parse_focal_rejects_out_of_range_and_clamps() {
        let focal = parse_focal("1.5,-0.2").unwrap();
        assert_eq!(focal.x, 1.0);
        assert_eq!(focal.y, 0.0);
    }

    #[test]
    fn resolve_format_prefers_explicit_request_over_detected() {
        assert_eq!(resolve_format(Some("avif"), Some(ImageFormat::jpeg)), ImageFormat::avif);
        assert_eq!(resolve_format(None, Some(ImageFormat::webp)), ImageFormat::webp);
        assert_eq!(resolve_format(None, None), ImageFormat::jpeg);
    }
}
