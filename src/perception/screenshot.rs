use base64::Engine as _;
use image::imageops::FilterType;
use image::DynamicImage;

use crate::errors::{PilotError, PilotResult};
use crate::perception::types::{CaptureRequest, Observation, Region};

/// Crop, downscale and JPEG-encode a raw capture for transport to the model.
pub fn encode_for_transport(
    raw: DynamicImage,
    request: &CaptureRequest,
    jpeg_quality: u8,
) -> PilotResult<Observation> {
    let mut img = raw;
    if let Some(region) = request.region {
        img = crop_region(&img, region)?;
    }
    let (source_width, source_height) = (img.width(), img.height());

    if let Some(max) = request.max_size {
        if img.width() > max.width || img.height() > max.height {
            img = img.resize(max.width, max.height, FilterType::Lanczos3);
            tracing::debug!(
                from = %format!("{source_width}×{source_height}"),
                to = %format!("{}×{}", img.width(), img.height()),
                "capture downscaled"
            );
        }
    }

    let rgb = img.to_rgb8();
    let mut jpeg = Vec::new();
    image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, jpeg_quality.clamp(1, 100))
        .encode_image(&rgb)
        .map_err(|e| PilotError::Perception(format!("JPEG encode: {e}")))?;

    Ok(Observation {
        image_base64: base64::engine::general_purpose::STANDARD.encode(&jpeg),
        width: rgb.width(),
        height: rgb.height(),
        source_width,
        source_height,
        captured_at: chrono::Utc::now(),
    })
}

/// Crop to `region`, clamped to the image bounds.
fn crop_region(img: &DynamicImage, region: Region) -> PilotResult<DynamicImage> {
    let (w, h) = (img.width(), img.height());
    if region.x >= w || region.y >= h {
        return Err(PilotError::Perception(format!(
            "region origin ({}, {}) outside {w}×{h} capture",
            region.x, region.y
        )));
    }
    let cw = region.width.min(w - region.x);
    let ch = region.height.min(h - region.y);
    if cw == 0 || ch == 0 {
        return Err(PilotError::Perception("zero-size region".into()));
    }
    Ok(img.crop_imm(region.x, region.y, cw, ch))
}

#[cfg(feature = "desktop")]
pub use desktop::XcapCapture;

#[cfg(feature = "desktop")]
mod desktop {
    use async_trait::async_trait;

    use super::encode_for_transport;
    use crate::errors::{PilotError, PilotResult};
    use crate::perception::traits::ScreenCapture;
    use crate::perception::types::{CaptureRequest, Observation, ScreenSize};

    /// Primary-monitor capture backed by `xcap`.
    pub struct XcapCapture {
        jpeg_quality: u8,
    }

    impl XcapCapture {
        pub fn new(jpeg_quality: u8) -> Self {
            Self { jpeg_quality }
        }
    }

    fn primary_monitor() -> PilotResult<xcap::Monitor> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| PilotError::Perception(format!("enumerate monitors: {e}")))?;
        let mut fallback = None;
        for monitor in monitors {
            if monitor.is_primary() {
                return Ok(monitor);
            }
            fallback.get_or_insert(monitor);
        }
        fallback.ok_or_else(|| PilotError::Perception("no monitor found".into()))
    }

    #[async_trait]
    impl ScreenCapture for XcapCapture {
        async fn capture(&self, request: CaptureRequest) -> PilotResult<Observation> {
            let quality = self.jpeg_quality;
            tokio::task::spawn_blocking(move || {
                let monitor = primary_monitor()?;
                let raw = monitor
                    .capture_image()
                    .map_err(|e| PilotError::Perception(format!("capture: {e}")))?;
                encode_for_transport(image::DynamicImage::ImageRgba8(raw), &request, quality)
            })
            .await
            .map_err(|e| PilotError::Perception(format!("capture task join: {e}")))?
        }

        fn physical_size(&self) -> PilotResult<ScreenSize> {
            let monitor = primary_monitor()?;
            let scale = monitor.scale_factor() as f64;
            // xcap reports logical extents on some platforms; normalise to pixels.
            let (w, h) = if cfg!(target_os = "macos") {
                (
                    (monitor.width() as f64 * scale).round() as u32,
                    (monitor.height() as f64 * scale).round() as u32,
                )
            } else {
                (monitor.width(), monitor.height())
            };
            Ok(ScreenSize::new(w, h))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::perception::types::ScreenSize;

    fn solid(w: u32, h: u32) -> DynamicImage {
        DynamicImage::ImageRgba8(image::RgbaImage::from_pixel(w, h, image::Rgba([40, 80, 120, 255])))
    }

    #[test]
    fn test_downscale_preserves_aspect() {
        let req = CaptureRequest {
            region: None,
            max_size: Some(ScreenSize::new(1920, 1080)),
        };
        let obs = encode_for_transport(solid(3840, 2160), &req, 85).unwrap();
        assert_eq!((obs.width, obs.height), (1920, 1080));
        assert_eq!((obs.source_width, obs.source_height), (3840, 2160));
        assert!(!obs.image_base64.is_empty());
    }

    #[test]
    fn test_small_capture_untouched() {
        let req = CaptureRequest {
            region: None,
            max_size: Some(ScreenSize::new(1920, 1080)),
        };
        let obs = encode_for_transport(solid(800, 600), &req, 85).unwrap();
        assert_eq!((obs.width, obs.height), (800, 600));
    }

    #[test]
    fn test_region_is_clamped() {
        let req = CaptureRequest {
            region: Some(Region { x: 700, y: 500, width: 400, height: 400 }),
            max_size: None,
        };
        let obs = encode_for_transport(solid(800, 600), &req, 85).unwrap();
        assert_eq!((obs.width, obs.height), (100, 100));
    }

    #[test]
    fn test_region_outside_capture_fails() {
        let req = CaptureRequest {
            region: Some(Region { x: 900, y: 0, width: 10, height: 10 }),
            max_size: None,
        };
        assert!(encode_for_transport(solid(800, 600), &req, 85).is_err());
    }
}
