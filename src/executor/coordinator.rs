// Model-reported coordinates → logical screen pixels.
//
// Models disagree on what `(x, y)` means. Some answer on a fixed 0–1000
// grid regardless of image size, others in pixels of the (possibly
// downscaled) image they were shown. Input injection wants logical screen
// pixels, which differ from captured pixels by the display scale factor.
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::agent_engine::state::Action;
use crate::errors::PilotError;
use crate::perception::types::ScreenSize;

/// Model-name fragments whose owners answer on the 0–1000 grid.
const NORMALIZED_1000_MODELS: &[&str] = &["qwen3-vl", "qwen3_vl", "qwen3vl"];

const GRID: f64 = 1000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CoordFormat {
    #[default]
    Auto,
    #[serde(rename = "normalized_1000")]
    Normalized1000,
    Absolute,
}

impl FromStr for CoordFormat {
    type Err = PilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "normalized_1000" => Ok(Self::Normalized1000),
            "absolute" => Ok(Self::Absolute),
            other => Err(PilotError::Config(format!(
                "unknown coordinate format '{other}' (expected auto, normalized_1000 or absolute)"
            ))),
        }
    }
}

impl fmt::Display for CoordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Auto => "auto",
            Self::Normalized1000 => "normalized_1000",
            Self::Absolute => "absolute",
        })
    }
}

/// A `CoordFormat` with `Auto` already decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedFormat {
    Normalized1000,
    Absolute,
}

impl CoordFormat {
    /// Decide `Auto` by model-name substring. Unknown names get `Absolute`.
    pub fn resolve(self, model_id: &str) -> ResolvedFormat {
        match self {
            Self::Normalized1000 => ResolvedFormat::Normalized1000,
            Self::Absolute => ResolvedFormat::Absolute,
            Self::Auto => {
                let id = model_id.to_ascii_lowercase();
                if NORMALIZED_1000_MODELS.iter().any(|m| id.contains(m)) {
                    ResolvedFormat::Normalized1000
                } else {
                    ResolvedFormat::Absolute
                }
            }
        }
    }
}

/// Physical capture pixels per logical input pixel. Computed once at startup.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayScale(f64);

impl DisplayScale {
    pub const IDENTITY: DisplayScale = DisplayScale(1.0);

    pub fn new(factor: f64) -> Self {
        if factor.is_finite() && factor > 0.0 {
            Self(factor)
        } else {
            Self::IDENTITY
        }
    }

    /// Ratio of physical to logical screen width.
    pub fn from_widths(physical_width: u32, logical_width: u32) -> Self {
        if logical_width == 0 {
            return Self::IDENTITY;
        }
        Self::new(physical_width as f64 / logical_width as f64)
    }

    pub fn factor(self) -> f64 {
        self.0
    }
}

impl Default for DisplayScale {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Pure mapping from model space to logical screen space.
#[derive(Debug, Clone, Copy)]
pub struct CoordinateMapper {
    format: CoordFormat,
    scale: DisplayScale,
}

impl CoordinateMapper {
    pub fn new(format: CoordFormat, scale: DisplayScale) -> Self {
        Self { format, scale }
    }

    pub fn format(&self) -> CoordFormat {
        self.format
    }

    pub fn scale(&self) -> DisplayScale {
        self.scale
    }

    /// Map one raw point. `image` is the size of the image the model saw.
    pub fn map_point(
        &self,
        raw: (i32, i32),
        image: Option<ScreenSize>,
        screen: ScreenSize,
        model_id: &str,
    ) -> (i32, i32) {
        let (rx, ry) = (raw.0 as f64, raw.1 as f64);
        let (sw, sh) = (screen.width as f64, screen.height as f64);
        let mode = self.format.resolve(model_id);

        let (x, y) = match (mode, image) {
            (ResolvedFormat::Normalized1000, _) => (
                round_half_down(rx / GRID * (sw - 1.0)),
                round_half_down(ry / GRID * (sh - 1.0)),
            ),
            (ResolvedFormat::Absolute, Some(img)) if img.width > 0 && img.height > 0 => (
                round_half_down(rx / img.width as f64 * sw),
                round_half_down(ry / img.height as f64 * sh),
            ),
            // No image size: raw is in captured (physical) pixels.
            (ResolvedFormat::Absolute, _) => {
                let s = self.scale.factor();
                (round_half_down(rx / s), round_half_down(ry / s))
            }
        };

        let mapped = (clamp_axis(x, screen.width), clamp_axis(y, screen.height));
        tracing::debug!(
            raw_x = raw.0,
            raw_y = raw.1,
            x = mapped.0,
            y = mapped.1,
            mode = ?mode,
            scale = self.scale.factor(),
            "coordinate mapped"
        );
        mapped
    }

    /// Rewrite every coordinate in `action` into screen space.
    /// Non-spatial actions and scrolls without a position pass through.
    pub fn resolve_action(
        &self,
        action: &Action,
        image: Option<ScreenSize>,
        screen: ScreenSize,
        model_id: &str,
    ) -> Action {
        let mut resolved = action.clone();
        match &mut resolved {
            Action::Click(p) => {
                (p.x, p.y) = self.map_point((p.x, p.y), image, screen, model_id);
            }
            Action::Move(p) => {
                (p.x, p.y) = self.map_point((p.x, p.y), image, screen, model_id);
            }
            Action::Scroll(p) => {
                if let (Some(x), Some(y)) = (p.x, p.y) {
                    let (mx, my) = self.map_point((x, y), image, screen, model_id);
                    p.x = Some(mx);
                    p.y = Some(my);
                }
            }
            Action::Type(_)
            | Action::Hotkey(_)
            | Action::Wait(_)
            | Action::Screenshot(_)
            | Action::Done(_) => {}
        }
        resolved
    }
}

/// Nearest integer; an exact .5 goes to the lower pixel.
fn round_half_down(value: f64) -> f64 {
    (value - 0.5).ceil()
}

fn clamp_axis(value: f64, dimension: u32) -> i32 {
    let max = dimension.saturating_sub(1) as f64;
    value.clamp(0.0, max) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent_engine::state::{ClickParams, MouseButton, ScrollParams, TypeParams};

    const FHD: ScreenSize = ScreenSize::new(1920, 1080);

    fn mapper(format: CoordFormat) -> CoordinateMapper {
        CoordinateMapper::new(format, DisplayScale::IDENTITY)
    }

    #[test]
    fn test_normalized_center() {
        let m = mapper(CoordFormat::Normalized1000);
        assert_eq!(m.map_point((500, 500), None, FHD, "any"), (959, 539));
    }

    #[test]
    fn test_normalized_ignores_image_size() {
        let m = mapper(CoordFormat::Normalized1000);
        let img = Some(ScreenSize::new(800, 450));
        assert_eq!(m.map_point((1000, 1000), img, FHD, "any"), (1919, 1079));
        assert_eq!(m.map_point((0, 0), img, FHD, "any"), (0, 0));
    }

    #[test]
    fn test_absolute_scales_from_image() {
        let m = mapper(CoordFormat::Absolute);
        let img = Some(ScreenSize::new(800, 450));
        assert_eq!(m.map_point((100, 50), img, FHD, "any"), (240, 120));
    }

    #[test]
    fn test_absolute_without_image_is_screen_space() {
        let m = mapper(CoordFormat::Absolute);
        assert_eq!(m.map_point((321, 654), None, FHD, "any"), (321, 654));
    }

    #[test]
    fn test_absolute_without_image_applies_display_scale() {
        let m = CoordinateMapper::new(CoordFormat::Absolute, DisplayScale::from_widths(2880, 1920));
        assert_eq!(m.map_point((300, 150), None, FHD, "any"), (200, 100));
    }

    #[test]
    fn test_out_of_range_is_clamped() {
        for format in [CoordFormat::Normalized1000, CoordFormat::Absolute] {
            let m = mapper(format);
            assert_eq!(m.map_point((-10, 2000), None, FHD, "any"), (0, 1079));
            let small = ScreenSize::new(640, 480);
            assert_eq!(m.map_point((-10, 2000), None, small, "any"), (0, 479));
        }
    }

    #[test]
    fn test_auto_detects_by_model_name() {
        assert_eq!(CoordFormat::Auto.resolve("qwen3-vl:8b"), ResolvedFormat::Normalized1000);
        assert_eq!(CoordFormat::Auto.resolve("Qwen3-VL-Flash"), ResolvedFormat::Normalized1000);
        assert_eq!(CoordFormat::Auto.resolve("qwen2.5-vl-72b"), ResolvedFormat::Absolute);
        assert_eq!(CoordFormat::Auto.resolve("gpt-4o"), ResolvedFormat::Absolute);

        let m = mapper(CoordFormat::Auto);
        let img = Some(ScreenSize::new(800, 450));
        assert_eq!(m.map_point((500, 500), img, FHD, "qwen3-vl:8b"), (959, 539));
        assert_eq!(m.map_point((100, 50), img, FHD, "llava"), (240, 120));
    }

    #[test]
    fn test_forced_format_overrides_model_name() {
        assert_eq!(CoordFormat::Absolute.resolve("qwen3-vl:8b"), ResolvedFormat::Absolute);
        assert_eq!(CoordFormat::Normalized1000.resolve("gpt-4o"), ResolvedFormat::Normalized1000);
    }

    #[test]
    fn test_ties_round_toward_lower_pixel() {
        assert_eq!(round_half_down(959.5), 959.0);
        assert_eq!(round_half_down(959.51), 960.0);
        assert_eq!(round_half_down(119.99999999999999), 120.0);
        assert_eq!(round_half_down(0.4), 0.0);
    }

    #[test]
    fn test_display_scale_guards() {
        assert_eq!(DisplayScale::from_widths(1920, 0), DisplayScale::IDENTITY);
        assert_eq!(DisplayScale::new(f64::NAN), DisplayScale::IDENTITY);
        assert_eq!(DisplayScale::from_widths(3840, 1920).factor(), 2.0);
    }

    #[test]
    fn test_parse_format() {
        assert_eq!("normalized_1000".parse::<CoordFormat>().unwrap(), CoordFormat::Normalized1000);
        assert_eq!(" Absolute ".parse::<CoordFormat>().unwrap(), CoordFormat::Absolute);
        assert!("pixels".parse::<CoordFormat>().is_err());
    }

    #[test]
    fn test_resolve_action_rewrites_spatial_only() {
        let m = mapper(CoordFormat::Normalized1000);
        let click = Action::Click(ClickParams { x: 500, y: 500, button: MouseButton::Right, clicks: 2 });
        match m.resolve_action(&click, None, FHD, "m") {
            Action::Click(p) => {
                assert_eq!((p.x, p.y), (959, 539));
                assert_eq!(p.button, MouseButton::Right);
                assert_eq!(p.clicks, 2);
            }
            other => panic!("unexpected {other:?}"),
        }

        let scroll = Action::Scroll(ScrollParams { amount: -3, x: None, y: None });
        assert_eq!(m.resolve_action(&scroll, None, FHD, "m"), scroll);

        let scroll_at = Action::Scroll(ScrollParams { amount: 3, x: Some(1000), y: Some(0) });
        assert_eq!(
            m.resolve_action(&scroll_at, None, FHD, "m"),
            Action::Scroll(ScrollParams { amount: 3, x: Some(1919), y: Some(0) })
        );

        let typing = Action::Type(TypeParams { text: "500".into(), interval: 0.02 });
        assert_eq!(m.resolve_action(&typing, None, FHD, "m"), typing);
    }
}
