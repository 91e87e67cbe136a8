//! Messages exchanged between the surface (coordinating context) and the
//! render worker.

use std::sync::Arc;

use image::{Rgba, RgbaImage};

use crate::config::{Viewport, WatermarkConfig};
use crate::decode::{ImageInfo, ImageSource};
use crate::tile::Tile;

/// Monotonic token identifying one (config, image) render attempt. Results
/// carrying a superseded generation are discarded regardless of completion
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RenderGeneration(pub u64);

/// One unit of work for the render worker. `image: None` clears the worker's
/// cached decode (surface reset).
#[derive(Debug)]
pub struct RenderRequest {
    pub generation: u64,
    pub config: WatermarkConfig,
    pub image: Option<ImageSource>,
    pub viewport: Viewport,
    pub scale_correction: f32,
}

/// Completion notifications from the worker back to the surface. Every event
/// is tagged with the generation that produced it; the surface commits only
/// results matching the latest generation.
#[derive(Debug)]
pub enum RenderEvent {
    /// Base image decoded and scaled to its rendered bounds.
    ImageDecoded {
        generation: u64,
        image: Arc<RgbaImage>,
        info: ImageInfo,
    },
    /// A new tile period is ready to publish.
    TileReady { generation: u64, tile: Arc<Tile> },
    /// The active config produces no pattern (blank text).
    TileCleared { generation: u64 },
    /// Palette extraction finished for the decoded base image.
    BackgroundColor { generation: u64, color: Rgba<u8> },
}
