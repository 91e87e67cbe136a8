//! CPU raster primitives shared by the tile builders and the compositor.
//!
//! All drawing is straight (non-premultiplied) RGBA source-over blending on
//! `image::RgbaImage` buffers. Rotation uses inverse mapping with
//! nearest-neighbor sampling so every destination pixel is visited exactly
//! once and no holes appear at steep angles.

use anyhow::{Context, Result};
use fast_image_resize as fir;
use image::{Rgba, RgbaImage};

use crate::tile::{EdgeMode, Tile};

/// Source-over blend of `src` onto `dst`, with `src` alpha additionally
/// scaled by `alpha / 255`.
pub fn blend_pixel(dst: &mut Rgba<u8>, src: Rgba<u8>, alpha: u8) {
    let sa = (f32::from(src[3]) / 255.0) * (f32::from(alpha) / 255.0);
    if sa <= 0.0 {
        return;
    }
    let da = f32::from(dst[3]) / 255.0;
    let out_a = sa + da * (1.0 - sa);
    if out_a <= 0.0 {
        *dst = Rgba([0, 0, 0, 0]);
        return;
    }
    for c in 0..3 {
        let sc = f32::from(src[c]);
        let dc = f32::from(dst[c]);
        let out = (sc * sa + dc * da * (1.0 - sa)) / out_a;
        dst[c] = out.round().clamp(0.0, 255.0) as u8;
    }
    dst[3] = (out_a * 255.0).round().clamp(0.0, 255.0) as u8;
}

/// Draws `src` rotated by `degree` (clockwise, y-down) about the center of
/// `dst`, with the source centered on the same point. `alpha` scales the
/// source opacity.
pub fn draw_rotated_center(dst: &mut RgbaImage, src: &RgbaImage, degree: f32, alpha: u8) {
    let theta = degree.rem_euclid(360.0).to_radians();
    let (sin, cos) = theta.sin_cos();

    let dcx = dst.width() as f32 / 2.0;
    let dcy = dst.height() as f32 / 2.0;
    let scx = src.width() as f32 / 2.0;
    let scy = src.height() as f32 / 2.0;
    let (sw, sh) = (src.width() as i64, src.height() as i64);

    for dy in 0..dst.height() {
        for dx in 0..dst.width() {
            // Destination pixel center relative to the rotation pivot.
            let rx = dx as f32 + 0.5 - dcx;
            let ry = dy as f32 + 0.5 - dcy;
            // Inverse rotation back into source space.
            let sx = rx * cos + ry * sin + scx - 0.5;
            let sy = -rx * sin + ry * cos + scy - 0.5;
            let sxi = sx.round() as i64;
            let syi = sy.round() as i64;
            if sxi < 0 || syi < 0 || sxi >= sw || syi >= sh {
                continue;
            }
            let pixel = *src.get_pixel(sxi as u32, syi as u32);
            if pixel[3] == 0 {
                continue;
            }
            blend_pixel(dst.get_pixel_mut(dx, dy), pixel, alpha);
        }
    }
}

/// Blits `src` at `(x, y)` with its alpha scaled by `alpha / 255`, clipped to
/// the destination.
pub fn overlay_with_alpha(dst: &mut RgbaImage, src: &RgbaImage, x: u32, y: u32, alpha: u8) {
    if alpha == 0 {
        return;
    }
    let max_w = dst.width().saturating_sub(x).min(src.width());
    let max_h = dst.height().saturating_sub(y).min(src.height());
    for sy in 0..max_h {
        for sx in 0..max_w {
            let pixel = *src.get_pixel(sx, sy);
            blend_pixel(dst.get_pixel_mut(x + sx, y + sy), pixel, alpha);
        }
    }
}

/// Fills the rectangle at `(origin_x, origin_y)` of size `bounds_w` x
/// `bounds_h` with the tile's repeating pattern, honoring the tile's per-axis
/// edge modes. `Clamp` paints a single period on that axis.
pub fn fill_tiled(
    dst: &mut RgbaImage,
    tile: &Tile,
    origin_x: u32,
    origin_y: u32,
    bounds_w: u32,
    bounds_h: u32,
) {
    let (tw, th) = (tile.width(), tile.height());
    if tw == 0 || th == 0 {
        return;
    }
    let reach_x = match tile.mode_x() {
        EdgeMode::Clamp => tw.min(bounds_w),
        EdgeMode::Repeat => bounds_w,
    };
    let reach_y = match tile.mode_y() {
        EdgeMode::Clamp => th.min(bounds_h),
        EdgeMode::Repeat => bounds_h,
    };
    let src = tile.image();
    for by in 0..reach_y {
        let dy = origin_y + by;
        if dy >= dst.height() {
            break;
        }
        let sy = by % th;
        for bx in 0..reach_x {
            let dx = origin_x + bx;
            if dx >= dst.width() {
                break;
            }
            let pixel = *src.get_pixel(bx % tw, sy);
            if pixel[3] == 0 {
                continue;
            }
            blend_pixel(dst.get_pixel_mut(dx, dy), pixel, 255);
        }
    }
}

/// One-pixel rectangle along the outer edge of `img`.
pub fn outline_rect(img: &mut RgbaImage, color: Rgba<u8>) {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return;
    }
    for x in 0..w {
        img.put_pixel(x, 0, color);
        img.put_pixel(x, h - 1, color);
    }
    for y in 0..h {
        img.put_pixel(0, y, color);
        img.put_pixel(w - 1, y, color);
    }
}

/// High-quality RGBA resize (CatmullRom convolution).
pub fn resize_rgba(source: &RgbaImage, target_w: u32, target_h: u32) -> Result<RgbaImage> {
    if target_w == 0 || target_h == 0 {
        anyhow::bail!("resize dimensions must be positive");
    }
    if source.width() == target_w && source.height() == target_h {
        return Ok(source.clone());
    }

    let src_view = fir::images::ImageRef::new(
        source.width(),
        source.height(),
        source.as_raw(),
        fir::PixelType::U8x4,
    )
    .context("failed to create source view for resize")?;
    let mut dst_image = fir::images::Image::new(target_w, target_h, fir::PixelType::U8x4);
    let options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::CatmullRom));
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_view, &mut dst_image, Some(&options))
        .context("resize failed")?;
    let buffer = dst_image.into_vec();
    RgbaImage::from_raw(target_w, target_h, buffer)
        .ok_or_else(|| anyhow::anyhow!("failed to construct resized RGBA image"))
}
