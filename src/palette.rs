//! Background color extraction for the decoded base image.
//!
//! Runs off the serial render path and is strictly best-effort: `None` means
//! the caller leaves the background untouched.

use image::{Rgba, RgbaImage};

/// Target number of sampled pixels; larger images are strided down to this.
const SAMPLE_BUDGET: u32 = 1 << 14;

/// Alpha-weighted average color of the visible pixels.
pub fn average_color(img: &RgbaImage) -> Option<Rgba<u8>> {
    let mut accum = [0f64; 3];
    let mut total = 0f64;
    for pixel in img.pixels() {
        let alpha = f64::from(pixel[3]) / 255.0;
        if alpha <= 0.0 {
            continue;
        }
        total += alpha;
        for c in 0..3 {
            accum[c] += f64::from(pixel[c]) * alpha;
        }
    }
    if total <= f64::EPSILON {
        return None;
    }
    Some(Rgba([
        (accum[0] / total).round().clamp(0.0, 255.0) as u8,
        (accum[1] / total).round().clamp(0.0, 255.0) as u8,
        (accum[2] / total).round().clamp(0.0, 255.0) as u8,
        255,
    ]))
}

/// Representative muted swatch of the image, suitable as a backdrop behind
/// the photo. Buckets sampled pixels into a coarse RGB histogram, scores each
/// bucket by population and by how muted/dark it is, and returns the mean
/// color of the winner. Falls back to the plain average when nothing scores.
pub fn dominant_muted_color(img: &RgbaImage) -> Option<Rgba<u8>> {
    if img.width() == 0 || img.height() == 0 {
        return None;
    }
    let total_px = img.width() * img.height();
    let stride = (total_px / SAMPLE_BUDGET).max(1) as usize;

    // 4 bits per channel: 4096 buckets.
    let mut counts = vec![0u32; 1 << 12];
    let mut sums = vec![[0u64; 3]; 1 << 12];
    for pixel in img.pixels().step_by(stride) {
        if pixel[3] < 128 {
            continue;
        }
        let key = bucket_key(pixel[0], pixel[1], pixel[2]);
        counts[key] += 1;
        for c in 0..3 {
            sums[key][c] += u64::from(pixel[c]);
        }
    }

    let mut best: Option<(f64, usize)> = None;
    for (key, &count) in counts.iter().enumerate() {
        if count == 0 {
            continue;
        }
        let mean = bucket_mean(&sums[key], count);
        let (saturation, value) = saturation_value(mean);
        let score = f64::from(count) * muted_weight(saturation, value);
        if score > 0.0 && best.map_or(true, |(s, _)| score > s) {
            best = Some((score, key));
        }
    }

    match best {
        Some((_, key)) => {
            let mean = bucket_mean(&sums[key], counts[key]);
            Some(Rgba([mean[0], mean[1], mean[2], 255]))
        }
        None => average_color(img),
    }
}

fn bucket_key(r: u8, g: u8, b: u8) -> usize {
    (usize::from(r >> 4) << 8) | (usize::from(g >> 4) << 4) | usize::from(b >> 4)
}

fn bucket_mean(sum: &[u64; 3], count: u32) -> [u8; 3] {
    let n = u64::from(count);
    [
        (sum[0] / n) as u8,
        (sum[1] / n) as u8,
        (sum[2] / n) as u8,
    ]
}

fn saturation_value(rgb: [u8; 3]) -> (f64, f64) {
    let r = f64::from(rgb[0]) / 255.0;
    let g = f64::from(rgb[1]) / 255.0;
    let b = f64::from(rgb[2]) / 255.0;
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let saturation = if max <= 0.0 { 0.0 } else { (max - min) / max };
    (saturation, max)
}

/// Peaks at moderate saturation and darker values, the "dark muted" corner of
/// the palette; fully washed-out or neon buckets score near zero.
fn muted_weight(saturation: f64, value: f64) -> f64 {
    let sat_fit = 1.0 - ((saturation - 0.45) / 0.45).abs().min(1.0);
    let val_fit = 1.0 - ((value - 0.35) / 0.45).abs().min(1.0);
    0.1 + sat_fit * val_fit
}
