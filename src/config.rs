use std::path::{Path, PathBuf};

use anyhow::{Context, Result, ensure};
use serde::Deserialize;

use crate::error::Error;

/// Hard ceiling on the decoded base-image width, in pixels.
pub const MAX_DECODE_WIDTH: u32 = 720;
/// Hard ceiling on the decoded base-image height, in pixels.
pub const MAX_DECODE_HEIGHT: u32 = 1280;

/// Which rendering path is active. The two are mutually exclusive; the
/// inactive mode's parameters are kept in [`WatermarkConfig`] untouched so a
/// host UI can round-trip them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MarkMode {
    Text,
    Image,
}

/// Fill or outline rendering for text marks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextStyle {
    Fill,
    Stroke,
}

/// Typeface variant resolved against the system font database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Typeface {
    Normal,
    Bold,
    Italic,
    BoldItalic,
}

/// Immutable watermark style. Equality is meaningful: the surface skips a
/// rebuild entirely when an identical config is applied twice.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct WatermarkConfig {
    /// Watermark text; may contain `\n` for multi-line marks.
    pub text: String,
    /// Text size in logical pixels. For icon marks the same scalar acts as a
    /// scale factor relative to the baseline unit of 14.
    pub text_size: f32,
    /// Mark color (text fill/stroke; icons keep their own colors).
    pub color: [u8; 3],
    /// Overall mark opacity, 0-255.
    pub alpha: u8,
    /// Fill or stroke rendering for text marks.
    pub style: TextStyle,
    /// Typeface variant for text marks.
    pub typeface: Typeface,
    /// Rotation in degrees, wraps modulo 360.
    pub degree: f32,
    /// Horizontal spacing between repeats, percent of tile size.
    pub h_gap: u32,
    /// Vertical spacing between repeats, percent of tile size.
    pub v_gap: u32,
    /// Icon file used when `mark-mode` is `image`.
    pub icon: Option<PathBuf>,
    /// Selects the text or icon rendering path.
    pub mark_mode: MarkMode,
    /// Draws a one-pixel rectangle around each tile period.
    pub show_tile_bounds: bool,
}

impl Default for WatermarkConfig {
    fn default() -> Self {
        Self {
            text: String::new(),
            text_size: Self::default_text_size(),
            color: Self::default_color(),
            alpha: Self::default_alpha(),
            style: TextStyle::Fill,
            typeface: Typeface::Normal,
            degree: 0.0,
            h_gap: 0,
            v_gap: 0,
            icon: None,
            mark_mode: MarkMode::Text,
            show_tile_bounds: false,
        }
    }
}

impl WatermarkConfig {
    const fn default_text_size() -> f32 {
        14.0
    }

    const fn default_color() -> [u8; 3] {
        [255, 255, 255]
    }

    const fn default_alpha() -> u8 {
        255
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, Error> {
        let s = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&s)?)
    }

    /// Validate invariants that serde defaults alone cannot express.
    pub fn validated(self) -> Result<Self> {
        ensure!(
            self.text_size.is_finite() && self.text_size > 0.0,
            "text-size must be positive"
        );
        ensure!(self.degree.is_finite(), "degree must be finite");
        if self.mark_mode == MarkMode::Image {
            ensure!(
                self.icon.is_some(),
                "mark-mode image requires an icon path"
            );
        }
        Ok(self)
    }
}

/// Dimensions of the hosting surface the composite is rendered into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
    /// Uniform padding around the rendered image, in pixels.
    pub padding: u32,
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1920,
            padding: 0,
        }
    }
}

impl Viewport {
    pub fn new(width: u32, height: u32, padding: u32) -> Result<Self> {
        let viewport = Self {
            width,
            height,
            padding,
        };
        viewport.validate().context("invalid viewport")?;
        Ok(viewport)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(self.width > 0 && self.height > 0, "viewport must be non-empty");
        let pad = self.padding.saturating_mul(2);
        ensure!(
            pad < self.width && pad < self.height,
            "padding must leave a visible area"
        );
        Ok(())
    }

    /// Maximum decode width for the base image: half the padded extent,
    /// capped at [`MAX_DECODE_WIDTH`]. The compositor upscales from there.
    pub fn decode_limit_width(&self) -> u32 {
        (self.width.saturating_sub(self.padding.saturating_mul(2)) / 2)
            .min(MAX_DECODE_WIDTH)
            .max(1)
    }

    /// Maximum decode height, capped at [`MAX_DECODE_HEIGHT`].
    pub fn decode_limit_height(&self) -> u32 {
        (self.height.saturating_sub(self.padding.saturating_mul(2)) / 2)
            .min(MAX_DECODE_HEIGHT)
            .max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_from_empty_yaml() {
        let cfg: WatermarkConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(cfg, WatermarkConfig::default());
    }

    #[test]
    fn parses_kebab_case_fields() {
        let cfg: WatermarkConfig = serde_yaml::from_str(
            "text: hello\ntext-size: 24\nmark-mode: text\nh-gap: 50\nstyle: stroke\ntypeface: bold-italic\n",
        )
        .unwrap();
        assert_eq!(cfg.text, "hello");
        assert_eq!(cfg.text_size, 24.0);
        assert_eq!(cfg.h_gap, 50);
        assert_eq!(cfg.style, TextStyle::Stroke);
        assert_eq!(cfg.typeface, Typeface::BoldItalic);
    }

    #[test]
    fn image_mode_requires_icon() {
        let cfg = WatermarkConfig {
            mark_mode: MarkMode::Image,
            ..WatermarkConfig::default()
        };
        assert!(cfg.validated().is_err());
    }

    #[test]
    fn oversized_padding_is_rejected_without_overflow() {
        assert!(Viewport::new(100, 100, u32::MAX).is_err());
        assert!(Viewport::new(100, 100, 50).is_err());

        let hostile = Viewport {
            width: 10,
            height: 10,
            padding: u32::MAX,
        };
        assert_eq!(hostile.decode_limit_width(), 1);
        assert_eq!(hostile.decode_limit_height(), 1);
    }

    #[test]
    fn decode_limits_follow_padded_half_extent() {
        let small = Viewport::new(600, 800, 10).unwrap();
        assert_eq!(small.decode_limit_width(), 290);
        assert_eq!(small.decode_limit_height(), 390);

        let large = Viewport::new(4000, 6000, 0).unwrap();
        assert_eq!(large.decode_limit_width(), MAX_DECODE_WIDTH);
        assert_eq!(large.decode_limit_height(), MAX_DECODE_HEIGHT);
    }
}
