//! Icon tile builder: the icon's diagonal bounds any rotation, so the
//! diagonal is the pre-gap baseline for both tile axes.

use anyhow::{Result, ensure};
use image::{Rgba, RgbaImage};

use crate::config::WatermarkConfig;
use crate::geometry;
use crate::raster::{draw_rotated_center, outline_rect, resize_rgba};
use crate::tile::{EdgeMode, Tile};

/// The icon size scalar in [`WatermarkConfig::text_size`] is defined against
/// this baseline unit; `text_size == 14` means scale ratio 1.
pub const BASELINE_SIZE: f32 = 14.0;

/// Builds the icon tile. Fails fast on a released/empty source raster or a
/// degenerate scale ratio; the caller aborts the generation silently.
pub fn build_icon_tile(
    icon: &RgbaImage,
    config: &WatermarkConfig,
    rendered_width: u32,
    rendered_height: u32,
    scale_correction: f32,
) -> Result<Tile> {
    ensure!(
        icon.width() > 0 && icon.height() > 0,
        "source icon raster is empty or released"
    );

    let raw_w = (icon.width() as f32).clamp(1.0, rendered_width.max(1) as f32);
    let raw_h = (icon.height() as f32).clamp(1.0, rendered_height.max(1) as f32);

    let baseline = geometry::diagonal(raw_h, raw_w);
    let (gap_w, gap_h) = geometry::expand(baseline, baseline, config.h_gap, config.v_gap);

    let ratio = scale_correction * config.text_size / BASELINE_SIZE;
    ensure!(
        ratio.is_finite() && ratio > 0.0,
        "icon scale ratio must be positive, got {ratio}"
    );

    let tile_w = geometry::floor_at_least_one(gap_w as f32 * ratio);
    let tile_h = geometry::floor_at_least_one(gap_h as f32 * ratio);
    let icon_w = geometry::floor_at_least_one(raw_w * ratio);
    let icon_h = geometry::floor_at_least_one(raw_h * ratio);

    let scaled = resize_rgba(icon, icon_w, icon_h)?;
    let mut tile_img = RgbaImage::new(tile_w, tile_h);
    draw_rotated_center(&mut tile_img, &scaled, config.degree, config.alpha);
    if config.show_tile_bounds {
        outline_rect(&mut tile_img, Rgba([255, 0, 0, 255]));
    }
    Ok(Tile::new(tile_img, EdgeMode::Repeat, EdgeMode::Repeat))
}
