pub mod icon;
pub mod text;

use image::RgbaImage;

/// How the compositor continues a tile past its own extent on one axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeMode {
    /// Paint a single period and stop.
    Clamp,
    /// Repeat the period across the whole bounds.
    Repeat,
}

/// One period of the repeating watermark pattern.
///
/// Immutable once built. The surface publishes replacements by swapping an
/// `Arc<Tile>`; the raster itself is never mutated after construction, so a
/// reader holding the previous tile stays valid across the swap.
#[derive(Debug)]
pub struct Tile {
    image: RgbaImage,
    mode_x: EdgeMode,
    mode_y: EdgeMode,
}

impl Tile {
    pub fn new(image: RgbaImage, mode_x: EdgeMode, mode_y: EdgeMode) -> Self {
        debug_assert!(image.width() > 0 && image.height() > 0);
        Self {
            image,
            mode_x,
            mode_y,
        }
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn mode_x(&self) -> EdgeMode {
        self.mode_x
    }

    pub fn mode_y(&self) -> EdgeMode {
        self.mode_y
    }
}
