//! Text tile builder: multi-line measurement, line-breaking layout and glyph
//! rasterization into one rotated, gap-expanded tile period.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Result, anyhow};
use fontdue::layout::{CoordinateSystem, HorizontalAlign, Layout, LayoutSettings, TextStyle};
use image::{Rgba, RgbaImage};

use crate::config::{self, Typeface, WatermarkConfig};
use crate::geometry;
use crate::raster::{draw_rotated_center, outline_rect};
use crate::tile::{EdgeMode, Tile};

/// Resolves and caches fontdue faces by typeface variant. System fonts are
/// loaded lazily on first use so icon-only surfaces never pay for the scan.
pub struct FontBook {
    db: fontdb::Database,
    loaded: bool,
    cache: HashMap<Typeface, Arc<fontdue::Font>>,
}

impl Default for FontBook {
    fn default() -> Self {
        Self::new()
    }
}

impl FontBook {
    pub fn new() -> Self {
        Self {
            db: fontdb::Database::new(),
            loaded: false,
            cache: HashMap::new(),
        }
    }

    pub fn resolve(&mut self, typeface: Typeface) -> Result<Arc<fontdue::Font>> {
        if let Some(font) = self.cache.get(&typeface) {
            return Ok(Arc::clone(font));
        }
        if !self.loaded {
            self.db.load_system_fonts();
            self.loaded = true;
        }
        let (weight, style) = match typeface {
            Typeface::Normal => (fontdb::Weight::NORMAL, fontdb::Style::Normal),
            Typeface::Bold => (fontdb::Weight::BOLD, fontdb::Style::Normal),
            Typeface::Italic => (fontdb::Weight::NORMAL, fontdb::Style::Italic),
            Typeface::BoldItalic => (fontdb::Weight::BOLD, fontdb::Style::Italic),
        };
        let query = fontdb::Query {
            families: &[fontdb::Family::SansSerif],
            weight,
            stretch: fontdb::Stretch::Normal,
            style,
        };
        let id = self
            .db
            .query(&query)
            .or_else(|| self.db.faces().next().map(|face| face.id))
            .ok_or_else(|| anyhow!("no usable font face available on this system"))?;
        let font = self
            .db
            .with_face_data(id, |data, index| {
                fontdue::Font::from_bytes(
                    data,
                    fontdue::FontSettings {
                        collection_index: index,
                        ..fontdue::FontSettings::default()
                    },
                )
            })
            .ok_or_else(|| anyhow!("font face data unavailable"))?
            .map_err(|err| anyhow!("failed to parse font face: {err}"))?;
        let font = Arc::new(font);
        self.cache.insert(typeface, Arc::clone(&font));
        Ok(font)
    }
}

/// Widest line of `text` at `size`, measured by glyph advances.
pub fn max_line_width(font: &fontdue::Font, text: &str, size: f32) -> f32 {
    text.lines()
        .map(|line| {
            line.chars()
                .map(|ch| font.metrics(ch, size).advance_width)
                .sum()
        })
        .fold(0f32, f32::max)
}

/// Builds the text tile, or `Ok(None)` when the text is blank (the caller
/// clears the pattern in that case).
pub fn build_text_tile(
    font: &fontdue::Font,
    config: &WatermarkConfig,
    rendered_width: u32,
    rendered_height: u32,
) -> Result<Option<Tile>> {
    if config.text.trim().is_empty() {
        return Ok(None);
    }
    let size = config.text_size.max(1.0);
    let widest = max_line_width(font, &config.text, size);
    if widest <= 0.0 {
        return Ok(None);
    }

    let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
    layout.reset(&LayoutSettings {
        // Widest-line constraint plus a hair so that line never re-wraps.
        max_width: Some(widest + 1.0),
        horizontal_align: HorizontalAlign::Left,
        ..LayoutSettings::default()
    });
    layout.append(&[font], &TextStyle::new(&config.text, size, 0));

    // Never a tile larger than the image itself.
    let layout_w = widest.min(rendered_width.max(1) as f32).max(1.0);
    let layout_h = layout
        .height()
        .min(rendered_height.max(1) as f32)
        .max(1.0);

    let block = rasterize_block(font, &layout, config, layout_w, layout_h);

    let (rot_w, rot_h) = geometry::rotated_bounds(layout_w, layout_h, config.degree);
    let (tile_w, tile_h) = geometry::expand(rot_w, rot_h, config.h_gap, config.v_gap);

    let mut tile_img = RgbaImage::new(tile_w, tile_h);
    draw_rotated_center(&mut tile_img, &block, config.degree, 255);
    if config.show_tile_bounds {
        outline_rect(&mut tile_img, Rgba([255, 0, 0, 255]));
    }
    Ok(Some(Tile::new(tile_img, EdgeMode::Repeat, EdgeMode::Repeat)))
}

/// Rasterizes the laid-out glyphs into an unrotated block raster with the
/// configured color, opacity and fill/stroke style applied.
fn rasterize_block(
    font: &fontdue::Font,
    layout: &Layout,
    config: &WatermarkConfig,
    layout_w: f32,
    layout_h: f32,
) -> RgbaImage {
    let block_w = (layout_w.ceil() as u32).max(1);
    let block_h = (layout_h.ceil() as u32).max(1);
    let mut mask = vec![0u8; block_w as usize * block_h as usize];

    for glyph in layout.glyphs() {
        if glyph.width == 0 || glyph.height == 0 {
            continue;
        }
        let (_, coverage) = font.rasterize_config(glyph.key);
        let base_x = glyph.x.round() as i64;
        let base_y = glyph.y.round() as i64;
        for gy in 0..glyph.height {
            let py = base_y + gy as i64;
            if py < 0 || py >= i64::from(block_h) {
                continue;
            }
            for gx in 0..glyph.width {
                let px = base_x + gx as i64;
                if px < 0 || px >= i64::from(block_w) {
                    continue;
                }
                let idx = py as usize * block_w as usize + px as usize;
                mask[idx] = mask[idx].max(coverage[gy * glyph.width + gx]);
            }
        }
    }

    if config.style == config::TextStyle::Stroke {
        mask = outline_of(&mask, block_w as usize, block_h as usize);
    }

    let [r, g, b] = config.color;
    let mut block = RgbaImage::new(block_w, block_h);
    for (i, &coverage) in mask.iter().enumerate() {
        if coverage == 0 {
            continue;
        }
        let a = (u16::from(coverage) * u16::from(config.alpha) / 255) as u8;
        let x = (i % block_w as usize) as u32;
        let y = (i / block_w as usize) as u32;
        block.put_pixel(x, y, Rgba([r, g, b, a]));
    }
    block
}

/// Keeps only covered pixels that touch an uncovered 4-neighbor (or the block
/// edge), turning a filled coverage mask into its outline.
fn outline_of(mask: &[u8], w: usize, h: usize) -> Vec<u8> {
    let covered = |x: isize, y: isize| -> bool {
        x >= 0 && y >= 0 && (x as usize) < w && (y as usize) < h && mask[y as usize * w + x as usize] > 0
    };
    let mut out = vec![0u8; mask.len()];
    for y in 0..h {
        for x in 0..w {
            let idx = y * w + x;
            if mask[idx] == 0 {
                continue;
            }
            let (xi, yi) = (x as isize, y as isize);
            let interior = covered(xi - 1, yi)
                && covered(xi + 1, yi)
                && covered(xi, yi - 1)
                && covered(xi, yi + 1);
            if !interior {
                out[idx] = mask[idx];
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarkMode;

    fn test_font() -> Option<Arc<fontdue::Font>> {
        match FontBook::new().resolve(Typeface::Normal) {
            Ok(font) => Some(font),
            Err(err) => {
                eprintln!("skipping text tile test, no system font: {err}");
                None
            }
        }
    }

    fn text_config(text: &str) -> WatermarkConfig {
        WatermarkConfig {
            text: text.to_owned(),
            text_size: 24.0,
            mark_mode: MarkMode::Text,
            ..WatermarkConfig::default()
        }
    }

    #[test]
    fn blank_text_produces_no_tile() {
        let Some(font) = test_font() else { return };
        let config = text_config("   ");
        assert!(
            build_text_tile(&font, &config, 500, 500)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn unrotated_single_line_tile_matches_layout_size() {
        let Some(font) = test_font() else { return };
        let config = text_config("Watermark");
        let tile = build_text_tile(&font, &config, 1000, 1000)
            .unwrap()
            .expect("tile");

        let widest = max_line_width(&font, &config.text, config.text_size);
        let mut layout = Layout::new(CoordinateSystem::PositiveYDown);
        layout.reset(&LayoutSettings {
            max_width: Some(widest + 1.0),
            ..LayoutSettings::default()
        });
        layout.append(&[&*font], &TextStyle::new(&config.text, config.text_size, 0));

        assert_eq!(tile.width(), geometry::floor_at_least_one(widest));
        assert_eq!(tile.height(), geometry::floor_at_least_one(layout.height()));
    }

    #[test]
    fn rotation_by_ninety_swaps_tile_extents() {
        let Some(font) = test_font() else { return };
        let mut config = text_config("A\nBB");
        let flat = build_text_tile(&font, &config, 1000, 1000)
            .unwrap()
            .expect("tile");
        config.degree = 90.0;
        let turned = build_text_tile(&font, &config, 1000, 1000)
            .unwrap()
            .expect("tile");

        assert!((i64::from(turned.width()) - i64::from(flat.height())).abs() <= 1);
        assert!((i64::from(turned.height()) - i64::from(flat.width())).abs() <= 1);
    }

    #[test]
    fn gap_expansion_grows_the_tile() {
        let Some(font) = test_font() else { return };
        let mut config = text_config("spacing");
        let tight = build_text_tile(&font, &config, 1000, 1000)
            .unwrap()
            .expect("tile");
        config.h_gap = 100;
        config.v_gap = 50;
        let spaced = build_text_tile(&font, &config, 1000, 1000)
            .unwrap()
            .expect("tile");

        // Expansion floors after scaling, so allow one pixel of slack.
        let dw = i64::from(spaced.width()) - i64::from(tight.width()) * 2;
        let dh = i64::from(spaced.height()) * 2 - i64::from(tight.height()) * 3;
        assert!(dw.abs() <= 1, "width {dw}");
        assert!(dh.abs() <= 2, "height {dh}");
    }

    #[test]
    fn tile_is_clamped_to_rendered_bounds() {
        let Some(font) = test_font() else { return };
        let config = text_config("an extremely long watermark line that cannot fit");
        let tile = build_text_tile(&font, &config, 40, 20).unwrap().expect("tile");
        assert!(tile.width() <= 40);
        assert!(tile.height() <= 20);
    }

    #[test]
    fn stroke_style_hollows_the_glyphs() {
        let Some(font) = test_font() else { return };
        let mut config = text_config("O");
        config.text_size = 64.0;
        let filled = build_text_tile(&font, &config, 1000, 1000)
            .unwrap()
            .expect("tile");
        config.style = config::TextStyle::Stroke;
        let stroked = build_text_tile(&font, &config, 1000, 1000)
            .unwrap()
            .expect("tile");

        let coverage = |tile: &Tile| {
            tile.image()
                .pixels()
                .filter(|p| p[3] > 0)
                .count()
        };
        assert!(coverage(&stroked) < coverage(&filled));
        assert!(coverage(&stroked) > 0);
    }

    #[test]
    fn outline_keeps_only_boundary_pixels() {
        // 3x3 fully covered block: the center pixel is interior.
        let mask = vec![255u8; 9];
        let outline = outline_of(&mask, 3, 3);
        assert_eq!(outline[4], 0);
        assert_eq!(outline.iter().filter(|&&c| c > 0).count(), 8);
    }
}
