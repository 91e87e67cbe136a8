//! Bounded image decoding.
//!
//! Decoding is the crate's memory-safety valve: the returned raster never
//! exceeds the requested bounds, and the power-of-two downsample factor that
//! was applied is reported so callers can reason about the original size.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, anyhow, ensure};
use image::{ImageFormat, ImageReader, RgbaImage};
use jpeg_decoder::{Decoder as JpegDecoder, PixelFormat};
use tracing::debug;

use crate::config::Viewport;
use crate::error::Error;
use crate::raster::resize_rgba;
use crate::tile::EdgeMode;

/// Opaque reference to a base or icon image.
#[derive(Debug, Clone)]
pub enum ImageSource {
    Path(PathBuf),
    /// Already-decoded raster, compared by buffer identity.
    Memory(Arc<RgbaImage>),
}

impl PartialEq for ImageSource {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Path(a), Self::Path(b)) => a == b,
            (Self::Memory(a), Self::Memory(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// Decode result: the bounded raster plus the downsample factor used to
/// produce it.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub image: Arc<RgbaImage>,
    pub downsample: u32,
}

/// Decodes a source constrained to a maximum footprint. Implementations must
/// be safe to invoke repeatedly; calls are expected to block on IO or CPU and
/// are always dispatched off the coordinating context.
pub trait BoundedDecoder: Send + Sync {
    fn decode_bounded(
        &self,
        source: &ImageSource,
        max_width: u32,
        max_height: u32,
    ) -> Result<DecodedImage, Error>;
}

/// Filesystem-backed decoder. Probes dimensions first, then decodes and
/// shrinks by the chosen factor, so oversized sources never reach the
/// compositor at full resolution.
#[derive(Debug, Default)]
pub struct FsDecoder;

impl BoundedDecoder for FsDecoder {
    fn decode_bounded(
        &self,
        source: &ImageSource,
        max_width: u32,
        max_height: u32,
    ) -> Result<DecodedImage, Error> {
        decode_impl(source, max_width, max_height).map_err(Error::Decode)
    }
}

fn decode_impl(source: &ImageSource, max_width: u32, max_height: u32) -> Result<DecodedImage> {
    ensure!(max_width > 0 && max_height > 0, "decode bounds must be positive");
    match source {
        ImageSource::Path(path) => {
            let reader = ImageReader::open(path)
                .with_context(|| format!("failed to open image at {}", path.display()))?
                .with_guessed_format()
                .context("failed to guess image format")?;
            let format = reader.format();
            let (w, h) = reader
                .into_dimensions()
                .with_context(|| format!("failed to read dimensions of {}", path.display()))?;
            let downsample = downsample_for(w, h, max_width, max_height);
            let target_w = (w / downsample).max(1);
            let target_h = (h / downsample).max(1);

            // JPEGs can decode at a reduced scale, so the interim raster
            // stays near the bound instead of materializing full resolution.
            let source = match format {
                Some(ImageFormat::Jpeg) => match decode_jpeg_scaled(path, target_w, target_h) {
                    Ok(img) => img,
                    Err(err) => {
                        debug!(
                            "scaled JPEG decode of {} failed: {err:#} — falling back",
                            path.display()
                        );
                        decode_full(path)?
                    }
                },
                _ => decode_full(path)?,
            };
            let bounded = if source.dimensions() == (target_w, target_h) {
                source
            } else {
                resize_rgba(&source, target_w, target_h)?
            };
            Ok(DecodedImage {
                image: Arc::new(bounded),
                downsample,
            })
        }
        ImageSource::Memory(raster) => {
            ensure!(
                raster.width() > 0 && raster.height() > 0,
                "in-memory source raster is empty"
            );
            let downsample =
                downsample_for(raster.width(), raster.height(), max_width, max_height);
            if downsample == 1 {
                return Ok(DecodedImage {
                    image: Arc::clone(raster),
                    downsample,
                });
            }
            let bounded = shrink_by(raster, downsample)?;
            Ok(DecodedImage {
                image: Arc::new(bounded),
                downsample,
            })
        }
    }
}

/// Smallest power-of-two factor that brings `w` x `h` within the bounds.
pub fn downsample_for(w: u32, h: u32, max_w: u32, max_h: u32) -> u32 {
    let mut factor = 1u32;
    while w / factor > max_w || h / factor > max_h {
        factor = factor.saturating_mul(2);
        if factor >= u32::MAX / 2 {
            break;
        }
    }
    factor
}

fn decode_full(path: &Path) -> Result<RgbaImage> {
    Ok(image::open(path)
        .with_context(|| format!("failed to decode image at {}", path.display()))?
        .to_rgba8())
}

/// Decodes a JPEG at the smallest available scale covering the target size.
/// The returned raster may be somewhat larger than requested; the caller
/// resizes to the exact target.
fn decode_jpeg_scaled(path: &Path, target_w: u32, target_h: u32) -> Result<RgbaImage> {
    use jpeg_decoder::Error as JpegError;

    let file =
        File::open(path).with_context(|| format!("failed to open image at {}", path.display()))?;
    let mut decoder = JpegDecoder::new(BufReader::new(file));
    let request_w = target_w.clamp(1, u32::from(u16::MAX)) as u16;
    let request_h = target_h.clamp(1, u32::from(u16::MAX)) as u16;
    let map_err = |err: JpegError| match err {
        JpegError::Unsupported(feature) => anyhow!("unsupported JPEG feature: {feature:?}"),
        other => anyhow!(other),
    };
    decoder.scale(request_w, request_h).map_err(map_err)?;
    let pixels = decoder.decode().map_err(map_err)?;
    let info = decoder
        .info()
        .ok_or_else(|| anyhow!("missing image info while decoding {}", path.display()))?;
    let width = u32::from(info.width);
    let height = u32::from(info.height);

    let rgba = match info.pixel_format {
        PixelFormat::RGB24 => {
            let mut rgba = Vec::with_capacity(pixels.len() / 3 * 4);
            for chunk in pixels.chunks_exact(3) {
                rgba.extend_from_slice(&[chunk[0], chunk[1], chunk[2], 255]);
            }
            rgba
        }
        PixelFormat::L8 => {
            let mut rgba = Vec::with_capacity(pixels.len() * 4);
            for &v in &pixels {
                rgba.extend_from_slice(&[v, v, v, 255]);
            }
            rgba
        }
        PixelFormat::CMYK32 => {
            let mut rgba = Vec::with_capacity(pixels.len());
            for chunk in pixels.chunks_exact(4) {
                let k = f32::from(chunk[3]) / 255.0;
                let mut px = [0u8; 4];
                for c in 0..3 {
                    let ink = f32::from(chunk[c]) / 255.0 * (1.0 - k) + k;
                    px[c] = ((1.0 - ink) * 255.0).round().clamp(0.0, 255.0) as u8;
                }
                px[3] = 255;
                rgba.extend_from_slice(&px);
            }
            rgba
        }
        PixelFormat::L16 => {
            anyhow::bail!("16-bit grayscale JPEGs are not supported by the scaled decoder")
        }
    };

    RgbaImage::from_raw(width, height, rgba)
        .ok_or_else(|| anyhow!("failed to construct RGBA image for {}", path.display()))
}

fn shrink_by(source: &RgbaImage, factor: u32) -> Result<RgbaImage> {
    if factor <= 1 {
        return Ok(source.clone());
    }
    let w = (source.width() / factor).max(1);
    let h = (source.height() / factor).max(1);
    resize_rgba(source, w, h)
}

/// Derived display geometry for the current decoded base image: where it
/// lands inside the viewport and how tiling continues at the edges. Computed
/// once per decode and replaced wholesale with the next image selection.
#[derive(Debug, Clone, Copy)]
pub struct ImageInfo {
    pub downsample: u32,
    /// On-screen image size after fit-contain scaling into the padded viewport.
    pub rendered_width: u32,
    pub rendered_height: u32,
    /// Top-left of the rendered bounds within the viewport.
    pub offset_x: u32,
    pub offset_y: u32,
    /// Per-axis ratio of rendered size to decoded size.
    pub scale_x: f32,
    pub scale_y: f32,
    pub edge_x: EdgeMode,
    pub edge_y: EdgeMode,
}

impl ImageInfo {
    /// Fit-contain the decoded raster into the padded viewport, centered.
    pub fn compute(viewport: Viewport, decoded: &DecodedImage) -> Self {
        let dw = decoded.image.width().max(1);
        let dh = decoded.image.height().max(1);
        let avail_w = viewport
            .width
            .saturating_sub(viewport.padding.saturating_mul(2))
            .max(1);
        let avail_h = viewport
            .height
            .saturating_sub(viewport.padding.saturating_mul(2))
            .max(1);
        let scale = (avail_w as f32 / dw as f32).min(avail_h as f32 / dh as f32);
        let rendered_width = ((dw as f32 * scale).round() as u32).clamp(1, avail_w);
        let rendered_height = ((dh as f32 * scale).round() as u32).clamp(1, avail_h);
        Self {
            downsample: decoded.downsample,
            rendered_width,
            rendered_height,
            offset_x: viewport.padding + (avail_w - rendered_width) / 2,
            offset_y: viewport.padding + (avail_h - rendered_height) / 2,
            scale_x: rendered_width as f32 / dw as f32,
            scale_y: rendered_height as f32 / dh as f32,
            edge_x: EdgeMode::Repeat,
            edge_y: EdgeMode::Repeat,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn memory(w: u32, h: u32) -> ImageSource {
        ImageSource::Memory(Arc::new(RgbaImage::from_pixel(
            w,
            h,
            Rgba([50, 100, 150, 255]),
        )))
    }

    #[test]
    fn downsample_factor_is_power_of_two() {
        assert_eq!(downsample_for(1000, 2000, 720, 1280), 2);
        assert_eq!(downsample_for(700, 1200, 720, 1280), 1);
        assert_eq!(downsample_for(6000, 6000, 720, 1280), 16);
        assert_eq!(downsample_for(2880, 1280, 720, 1280), 4);
    }

    #[test]
    fn memory_decode_respects_bounds_and_reports_factor() {
        let decoded = FsDecoder
            .decode_bounded(&memory(1000, 2000), 720, 1280)
            .unwrap();
        assert_eq!(decoded.downsample, 2);
        assert_eq!(decoded.image.dimensions(), (500, 1000));
        assert!(decoded.image.width() <= 720 && decoded.image.height() <= 1280);
    }

    #[test]
    fn memory_decode_within_bounds_is_shared() {
        let source = memory(300, 200);
        let decoded = FsDecoder.decode_bounded(&source, 720, 1280).unwrap();
        assert_eq!(decoded.downsample, 1);
        let ImageSource::Memory(original) = &source else {
            unreachable!()
        };
        assert!(Arc::ptr_eq(original, &decoded.image));
    }

    #[test]
    fn file_decode_probes_then_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("big.png");
        RgbaImage::from_pixel(800, 600, Rgba([10, 20, 30, 255]))
            .save(&path)
            .unwrap();

        let decoded = FsDecoder
            .decode_bounded(&ImageSource::Path(path), 400, 400)
            .unwrap();
        assert_eq!(decoded.downsample, 2);
        assert_eq!(decoded.image.dimensions(), (400, 300));
    }

    #[test]
    fn jpeg_decode_is_bounded_via_the_scaled_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photo.jpg");
        image::RgbImage::from_pixel(800, 600, image::Rgb([10, 20, 30]))
            .save(&path)
            .unwrap();

        let decoded = FsDecoder
            .decode_bounded(&ImageSource::Path(path), 400, 400)
            .unwrap();
        assert_eq!(decoded.downsample, 2);
        assert_eq!(decoded.image.dimensions(), (400, 300));
    }

    #[test]
    fn missing_file_fails() {
        let source = ImageSource::Path(PathBuf::from("/nonexistent/image.png"));
        assert!(FsDecoder.decode_bounded(&source, 100, 100).is_err());
    }

    #[test]
    fn source_identity_compares_paths_and_buffers() {
        let a = ImageSource::Path(PathBuf::from("/a.png"));
        let b = ImageSource::Path(PathBuf::from("/a.png"));
        assert_eq!(a, b);

        let m1 = memory(4, 4);
        let m2 = m1.clone();
        assert_eq!(m1, m2);
        assert_ne!(m1, memory(4, 4));
    }

    #[test]
    fn image_info_fit_contains_and_centers() {
        let viewport = Viewport::new(1000, 1000, 50).unwrap();
        let decoded = DecodedImage {
            image: Arc::new(RgbaImage::new(450, 225)),
            downsample: 1,
        };
        let info = ImageInfo::compute(viewport, &decoded);
        assert_eq!(info.rendered_width, 900);
        assert_eq!(info.rendered_height, 450);
        assert_eq!(info.offset_x, 50);
        assert_eq!(info.offset_y, 50 + (900 - 450) / 2);
        assert!((info.scale_x - 2.0).abs() < 1e-3);
    }
}
