use serde::{Deserialize, Serialize};

/// Width × height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: u32,
    pub height: u32,
}

impl ScreenSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Rectangle in physical capture pixels: origin plus extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// What the capture collaborator is asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureRequest {
    pub region: Option<Region>,
    /// Downscale so the image fits inside this box, preserving aspect ratio.
    pub max_size: Option<ScreenSize>,
}

/// One encoded still image as it was handed to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Observation {
    /// Base64 JPEG, no data-URI prefix.
    pub image_base64: String,
    /// Pixel size of the encoded image (after any downscale).
    pub width: u32,
    pub height: u32,
    /// Pixel size of the raw capture before downscaling.
    pub source_width: u32,
    pub source_height: u32,
    pub captured_at: chrono::DateTime<chrono::Utc>,
}

impl Observation {
    pub fn image_size(&self) -> Option<ScreenSize> {
        if self.width == 0 || self.height == 0 {
            None
        } else {
            Some(ScreenSize::new(self.width, self.height))
        }
    }
}
