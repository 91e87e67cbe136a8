//! The watermark surface: configuration/image entry points, the render state
//! machine, and the compositor that produces visible frames.
//!
//! The surface lives on one coordinating context and never blocks: entry
//! points bump the generation counter and enqueue work, [`WatermarkSurface::pump`]
//! applies completed results, and [`WatermarkSurface::render_frame`] paints
//! the committed state. All pixel work happens on the render worker.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::{Viewport, WatermarkConfig};
use crate::decode::{BoundedDecoder, FsDecoder, ImageInfo, ImageSource};
use crate::events::{RenderEvent, RenderGeneration, RenderRequest};
use crate::raster::{fill_tiled, overlay_with_alpha};
use crate::tasks::renderer;
use crate::tile::Tile;

/// Fade-in duration for a newly accepted base image.
pub const FADE_DURATION: Duration = Duration::from_millis(450);
/// Duration of the background color transition.
pub const BACKGROUND_TRANSITION: Duration = Duration::from_millis(450);

/// Render pipeline state for the latest generation. Superseding a generation
/// implicitly cancels it; the new dispatch overwrites the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderState {
    Idle,
    Decoding,
    Building,
    Ready,
}

#[derive(Debug, Clone, Copy)]
struct Animation {
    start: Instant,
    duration: Duration,
}

impl Animation {
    fn begin(duration: Duration) -> Self {
        Self {
            start: Instant::now(),
            duration,
        }
    }

    fn progress(&self, now: Instant) -> f32 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (now.saturating_duration_since(self.start).as_secs_f32()
            / self.duration.as_secs_f32())
        .clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Copy)]
struct ColorTransition {
    from: Rgba<u8>,
    to: Rgba<u8>,
    anim: Animation,
}

type BackgroundCallback = Box<dyn FnMut(Rgba<u8>) + Send>;

pub struct WatermarkSurface {
    viewport: Viewport,
    config: WatermarkConfig,
    image: Option<ImageSource>,
    scale_correction: f32,
    latest: Arc<AtomicU64>,
    jobs: mpsc::UnboundedSender<RenderRequest>,
    events: mpsc::UnboundedReceiver<RenderEvent>,
    cancel: CancellationToken,
    state: RenderState,
    base: Option<(Arc<RgbaImage>, ImageInfo)>,
    tile: Option<Arc<Tile>>,
    /// Generation at which the current base image was committed; palette
    /// results are keyed to it.
    image_generation: u64,
    /// Generation of the most recent dispatch that changed the image
    /// identity. Decodes from older generations are superseded and must
    /// never become the visible base, even transiently.
    image_dispatch_generation: u64,
    fade: Option<Animation>,
    background: Rgba<u8>,
    background_transition: Option<ColorTransition>,
    on_background: Option<BackgroundCallback>,
}

impl WatermarkSurface {
    /// Creates a surface backed by the filesystem decoder. Must be called
    /// within a tokio runtime; the render worker is spawned immediately.
    pub fn new(viewport: Viewport) -> Self {
        Self::with_decoder(viewport, Arc::new(FsDecoder))
    }

    pub fn with_decoder(viewport: Viewport, decoder: Arc<dyn BoundedDecoder>) -> Self {
        let latest = Arc::new(AtomicU64::new(0));
        let (job_tx, job_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        tokio::spawn(renderer::run(
            decoder,
            job_rx,
            event_tx,
            Arc::clone(&latest),
            cancel.clone(),
        ));
        Self {
            viewport,
            config: WatermarkConfig::default(),
            image: None,
            scale_correction: 1.0,
            latest,
            jobs: job_tx,
            events: event_rx,
            cancel,
            state: RenderState::Idle,
            base: None,
            tile: None,
            image_generation: 0,
            image_dispatch_generation: 0,
            fade: None,
            background: Rgba([0, 0, 0, 0]),
            background_transition: None,
            on_background: None,
        }
    }

    /// Selects the base image. A new identity triggers decode; re-selecting
    /// the current identity rebuilds the tile only.
    pub fn set_image(&mut self, source: ImageSource) -> RenderGeneration {
        let changed = self.image.as_ref() != Some(&source);
        self.image = Some(source);
        self.dispatch(changed)
    }

    /// Applies a new watermark style. Applying an identical config while a
    /// build for it is already dispatched (or done) is a no-op.
    pub fn set_config(&mut self, config: WatermarkConfig) -> RenderGeneration {
        let unchanged = self.config == config;
        self.config = config;
        if self.image.is_none() || (unchanged && self.state != RenderState::Idle) {
            return self.generation();
        }
        self.dispatch(false)
    }

    /// Externally derived per-image scale factor for icon marks. Takes effect
    /// on the next dispatch.
    pub fn set_scale_correction(&mut self, factor: f32) {
        self.scale_correction = factor;
    }

    /// Registers the callback invoked when a background color is extracted
    /// from a newly decoded base image.
    pub fn on_background_color(&mut self, callback: impl FnMut(Rgba<u8>) + Send + 'static) {
        self.on_background = Some(Box::new(callback));
    }

    /// Clears the image, tile and background. In-flight work is superseded
    /// and the worker's cached rasters are released.
    pub fn reset(&mut self) {
        self.image = None;
        self.base = None;
        self.tile = None;
        self.fade = None;
        self.background = Rgba([0, 0, 0, 0]);
        self.background_transition = None;
        self.state = RenderState::Idle;
        let generation = self.next_generation();
        // Late palette results for the cleared image must not recolor the
        // background, and late decodes must not resurrect it; key both to a
        // generation that never decodes.
        self.image_generation = generation;
        self.image_dispatch_generation = generation;
        let _ = self.jobs.send(RenderRequest {
            generation,
            config: self.config.clone(),
            image: None,
            viewport: self.viewport,
            scale_correction: self.scale_correction,
        });
    }

    fn next_generation(&self) -> u64 {
        self.latest.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn dispatch(&mut self, image_changed: bool) -> RenderGeneration {
        let generation = self.next_generation();
        self.state = if image_changed {
            self.image_dispatch_generation = generation;
            RenderState::Decoding
        } else {
            RenderState::Building
        };
        let _ = self.jobs.send(RenderRequest {
            generation,
            config: self.config.clone(),
            image: self.image.clone(),
            viewport: self.viewport,
            scale_correction: self.scale_correction,
        });
        RenderGeneration(generation)
    }

    /// Drains completed render events without blocking. Returns true when
    /// the visible state changed and a repaint is due.
    pub fn pump(&mut self) -> bool {
        let mut repaint = false;
        while let Ok(event) = self.events.try_recv() {
            repaint |= self.apply(event);
        }
        repaint
    }

    /// Waits for at least one render event, then drains the rest. Returns
    /// false only when the worker is gone and no more events can arrive.
    pub async fn pump_wait(&mut self) -> bool {
        match self.events.recv().await {
            Some(event) => {
                self.apply(event);
                self.pump();
                true
            }
            None => false,
        }
    }

    fn apply(&mut self, event: RenderEvent) -> bool {
        let latest = self.latest.load(Ordering::SeqCst);
        match event {
            // Decodes commit only when they are at least as new as the latest
            // identity-changing dispatch. A newer generation for the same
            // identity reuses this decode (the worker caches it); an identity
            // change or reset republishes.
            RenderEvent::ImageDecoded {
                generation,
                image,
                info,
            } if self.image.is_some() && generation >= self.image_dispatch_generation => {
                self.base = Some((image, info));
                self.image_generation = generation;
                self.fade = Some(Animation::begin(FADE_DURATION));
                if self.state == RenderState::Decoding {
                    self.state = RenderState::Building;
                }
                true
            }
            // Tile swaps are strict last-writer-wins by generation.
            RenderEvent::TileReady { generation, tile } if generation == latest => {
                self.tile = Some(tile);
                self.state = RenderState::Ready;
                true
            }
            RenderEvent::TileCleared { generation } if generation == latest => {
                self.tile = None;
                self.state = RenderState::Ready;
                true
            }
            RenderEvent::BackgroundColor { generation, color }
                if generation == self.image_generation =>
            {
                self.background_transition = Some(ColorTransition {
                    from: self.background,
                    to: color,
                    anim: Animation::begin(BACKGROUND_TRANSITION),
                });
                if let Some(callback) = self.on_background.as_mut() {
                    callback(color);
                }
                true
            }
            other => {
                debug!(?other, "discarding superseded render event");
                false
            }
        }
    }

    /// Composites the committed state: background color, faded base image,
    /// and the watermark pattern repeated across the rendered bounds.
    pub fn render_frame(&mut self, now: Instant) -> RgbaImage {
        let bg = self.background_at(now);
        let mut frame = RgbaImage::from_pixel(self.viewport.width, self.viewport.height, bg);
        if let Some((base, info)) = &self.base {
            let alpha = self.fade_alpha(now);
            overlay_with_alpha(&mut frame, base, info.offset_x, info.offset_y, alpha);
            if let Some(tile) = &self.tile {
                fill_tiled(
                    &mut frame,
                    tile,
                    info.offset_x,
                    info.offset_y,
                    info.rendered_width,
                    info.rendered_height,
                );
            }
        }
        frame
    }

    /// Completes any running fade/background animation immediately.
    pub fn skip_animations(&mut self) {
        self.fade = None;
        if let Some(transition) = self.background_transition.take() {
            self.background = transition.to;
        }
    }

    fn fade_alpha(&self, now: Instant) -> u8 {
        match &self.fade {
            None => 255,
            Some(anim) => (anim.progress(now) * 255.0).round() as u8,
        }
    }

    fn background_at(&mut self, now: Instant) -> Rgba<u8> {
        if let Some(transition) = self.background_transition {
            let progress = transition.anim.progress(now);
            if progress >= 1.0 {
                self.background = transition.to;
                self.background_transition = None;
                return self.background;
            }
            return lerp_color(transition.from, transition.to, progress);
        }
        self.background
    }

    pub fn generation(&self) -> RenderGeneration {
        RenderGeneration(self.latest.load(Ordering::SeqCst))
    }

    pub fn state(&self) -> RenderState {
        self.state
    }

    pub fn tile(&self) -> Option<&Arc<Tile>> {
        self.tile.as_ref()
    }

    pub fn image_info(&self) -> Option<ImageInfo> {
        self.base.as_ref().map(|(_, info)| *info)
    }

    pub fn background_color(&self) -> Rgba<u8> {
        self.background
    }
}

impl Drop for WatermarkSurface {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

fn lerp_color(from: Rgba<u8>, to: Rgba<u8>, t: f32) -> Rgba<u8> {
    let t = t.clamp(0.0, 1.0);
    let mut out = [0u8; 4];
    for c in 0..4 {
        let f = f32::from(from[c]);
        let d = f32::from(to[c]) - f;
        out[c] = (f + d * t).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::{DecodedImage, FsDecoder};

    #[tokio::test]
    async fn superseded_decode_never_becomes_the_visible_base() {
        let viewport = Viewport::new(100, 100, 0).unwrap();
        let mut surface = WatermarkSurface::with_decoder(viewport, Arc::new(FsDecoder));
        let first = ImageSource::Memory(Arc::new(RgbaImage::new(10, 10)));
        let second = ImageSource::Memory(Arc::new(RgbaImage::new(12, 12)));
        let g1 = surface.set_image(first);
        let g2 = surface.set_image(second);

        let decoded = DecodedImage {
            image: Arc::new(RgbaImage::new(10, 10)),
            downsample: 1,
        };
        let info = ImageInfo::compute(viewport, &decoded);

        // A decode for the superseded image must be discarded even though it
        // arrives while the newer one is still in flight.
        let committed = surface.apply(RenderEvent::ImageDecoded {
            generation: g1.0,
            image: Arc::clone(&decoded.image),
            info,
        });
        assert!(!committed);
        assert!(surface.image_info().is_none());

        let committed = surface.apply(RenderEvent::ImageDecoded {
            generation: g2.0,
            image: decoded.image,
            info,
        });
        assert!(committed);
        assert!(surface.image_info().is_some());
    }

    #[test]
    fn animation_progress_is_clamped() {
        let anim = Animation {
            start: Instant::now(),
            duration: Duration::from_millis(100),
        };
        assert_eq!(anim.progress(anim.start), 0.0);
        assert_eq!(anim.progress(anim.start + Duration::from_millis(50)), 0.5);
        assert_eq!(anim.progress(anim.start + Duration::from_secs(5)), 1.0);
    }

    #[test]
    fn zero_duration_animation_is_complete() {
        let anim = Animation {
            start: Instant::now(),
            duration: Duration::ZERO,
        };
        assert_eq!(anim.progress(anim.start), 1.0);
    }

    #[test]
    fn color_lerp_endpoints_and_midpoint() {
        let black = Rgba([0, 0, 0, 255]);
        let white = Rgba([255, 255, 255, 255]);
        assert_eq!(lerp_color(black, white, 0.0), black);
        assert_eq!(lerp_color(black, white, 1.0), white);
        assert_eq!(lerp_color(black, white, 0.5), Rgba([128, 128, 128, 255]));
    }
}
