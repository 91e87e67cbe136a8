//! The render worker: one task, strictly serial tile generation.
//!
//! All decode and rasterization for a surface funnels through this single
//! worker so raster buffers are never read while being replaced. Requests
//! carry a generation token; the worker re-checks the shared latest
//! generation at every stage boundary and abandons superseded work instead of
//! finishing it. A failure (or panic) in any stage aborts only the current
//! generation; the worker stays alive for the next one.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use image::RgbaImage;
use tokio::select;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::{MarkMode, Viewport};
use crate::decode::{BoundedDecoder, ImageInfo, ImageSource};
use crate::error::Error;
use crate::events::{RenderEvent, RenderRequest};
use crate::palette;
use crate::raster::resize_rgba;
use crate::tile::icon::build_icon_tile;
use crate::tile::text::{FontBook, build_text_tile};

/// Identity and geometry of the last published decode. The raster itself
/// lives with the surface; the worker only needs enough to detect a cache hit
/// and to size subsequent tile builds.
struct CachedDecode {
    source: ImageSource,
    viewport: Viewport,
    info: ImageInfo,
}

#[derive(Default)]
struct WorkerState {
    fonts: FontBook,
    decoded: Option<CachedDecode>,
    icon: Option<(PathBuf, Arc<RgbaImage>)>,
}

/// Runs the render worker until cancellation or until the request channel
/// closes. Requests are processed strictly one at a time, in FIFO order.
pub async fn run(
    decoder: Arc<dyn BoundedDecoder>,
    mut job_rx: UnboundedReceiver<RenderRequest>,
    events_tx: UnboundedSender<RenderEvent>,
    latest: Arc<AtomicU64>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut state = WorkerState::default();
    loop {
        select! {
            _ = cancel.cancelled() => break,
            maybe_job = job_rx.recv() => {
                match maybe_job {
                    Some(job) => handle_request(job, &mut state, &decoder, &events_tx, &latest).await,
                    None => break,
                }
            }
        }
    }
    Ok(())
}

fn stale(latest: &AtomicU64, generation: u64) -> bool {
    latest.load(Ordering::SeqCst) != generation
}

async fn handle_request(
    job: RenderRequest,
    state: &mut WorkerState,
    decoder: &Arc<dyn BoundedDecoder>,
    events: &UnboundedSender<RenderEvent>,
    latest: &Arc<AtomicU64>,
) {
    let generation = job.generation;

    // A reset must clear the caches even when its generation is already
    // superseded: skipping it would let a later job for the same image
    // identity take the cache-hit path below and never republish the base.
    // Clearing is idempotent, so it runs ahead of the stale check.
    let Some(source) = job.image.clone() else {
        state.decoded = None;
        state.icon = None;
        return;
    };

    if stale(latest, generation) {
        debug!(generation, "skipping superseded request");
        return;
    }

    let cache_hit = state
        .decoded
        .as_ref()
        .is_some_and(|cached| cached.source == source && cached.viewport == job.viewport);
    if !cache_hit && !decode_base(&job, source, state, decoder, events, latest).await {
        return;
    }
    let Some(cached) = state.decoded.as_ref() else {
        return;
    };
    let info = cached.info;

    match job.config.mark_mode {
        MarkMode::Text => {
            // Blank text needs no font; clear the pattern directly.
            if job.config.text.trim().is_empty() {
                if !stale(latest, generation) {
                    let _ = events.send(RenderEvent::TileCleared { generation });
                }
                return;
            }
            let font = match state.fonts.resolve(job.config.typeface) {
                Ok(font) => font,
                Err(err) => {
                    warn!(generation, "font resolution failed: {err:#}");
                    return;
                }
            };
            let config = job.config.clone();
            let (w, h) = (info.rendered_width, info.rendered_height);
            let built =
                tokio::task::spawn_blocking(move || build_text_tile(&font, &config, w, h)).await;
            match built {
                Ok(Ok(Some(tile))) if !stale(latest, generation) => {
                    let _ = events.send(RenderEvent::TileReady {
                        generation,
                        tile: Arc::new(tile),
                    });
                }
                Ok(Ok(None)) if !stale(latest, generation) => {
                    let _ = events.send(RenderEvent::TileCleared { generation });
                }
                Ok(Ok(_)) => debug!(generation, "discarding superseded text tile"),
                Ok(Err(err)) => warn!(generation, "text mark: {}", Error::Build(err)),
                Err(join_err) => warn!(generation, "text tile build panicked: {join_err}"),
            }
        }
        MarkMode::Image => {
            let Some(icon) = resolve_icon(&job, state, decoder).await else {
                return;
            };
            if stale(latest, generation) {
                return;
            }
            let config = job.config.clone();
            let correction = job.scale_correction;
            let (w, h) = (info.rendered_width, info.rendered_height);
            let built = tokio::task::spawn_blocking(move || {
                build_icon_tile(&icon, &config, w, h, correction)
            })
            .await;
            match built {
                Ok(Ok(tile)) if !stale(latest, generation) => {
                    let _ = events.send(RenderEvent::TileReady {
                        generation,
                        tile: Arc::new(tile),
                    });
                }
                Ok(Ok(_)) => debug!(generation, "discarding superseded icon tile"),
                Ok(Err(err)) => warn!(generation, "icon mark: {}", Error::Build(err)),
                Err(join_err) => warn!(generation, "icon tile build panicked: {join_err}"),
            }
        }
    }
}

/// Decodes the base image bounded to the viewport's decode limits, scales it
/// to its rendered bounds and publishes it. Returns false when the
/// generation should be abandoned. A decode that turns out superseded is
/// released rather than cached, so the next generation decodes fresh and
/// republishes.
async fn decode_base(
    job: &RenderRequest,
    source: ImageSource,
    state: &mut WorkerState,
    decoder: &Arc<dyn BoundedDecoder>,
    events: &UnboundedSender<RenderEvent>,
    latest: &Arc<AtomicU64>,
) -> bool {
    let generation = job.generation;
    state.decoded = None;

    let max_w = job.viewport.decode_limit_width();
    let max_h = job.viewport.decode_limit_height();
    let decoder = Arc::clone(decoder);
    let src = source.clone();
    let decoded =
        match tokio::task::spawn_blocking(move || decoder.decode_bounded(&src, max_w, max_h)).await
        {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(err)) => {
                warn!(generation, "base image {err}");
                return false;
            }
            Err(join_err) => {
                warn!(generation, "decode task panicked: {join_err}");
                return false;
            }
        };
    if stale(latest, generation) {
        debug!(generation, "releasing superseded decode");
        return false;
    }
    debug!(
        generation,
        downsample = decoded.downsample,
        width = decoded.image.width(),
        height = decoded.image.height(),
        "decoded base image"
    );

    let info = ImageInfo::compute(job.viewport, &decoded);
    let display = {
        let raster = Arc::clone(&decoded.image);
        let (w, h) = (info.rendered_width, info.rendered_height);
        match tokio::task::spawn_blocking(move || resize_rgba(&raster, w, h)).await {
            Ok(Ok(display)) => Arc::new(display),
            Ok(Err(err)) => {
                warn!(generation, "display resize failed: {err:#}");
                return false;
            }
            Err(join_err) => {
                warn!(generation, "display resize panicked: {join_err}");
                return false;
            }
        }
    };
    if stale(latest, generation) {
        debug!(generation, "releasing superseded decode");
        return false;
    }

    state.decoded = Some(CachedDecode {
        source,
        viewport: job.viewport,
        info,
    });
    let _ = events.send(RenderEvent::ImageDecoded {
        generation,
        image: display,
        info,
    });

    // Palette extraction runs beside the serial path; its result is keyed to
    // this generation and silently dropped by the surface if superseded.
    let raster = Arc::clone(&decoded.image);
    let tx = events.clone();
    tokio::task::spawn_blocking(move || {
        if let Some(color) = palette::dominant_muted_color(&raster) {
            let _ = tx.send(RenderEvent::BackgroundColor { generation, color });
        }
    });
    true
}

/// Returns the icon raster for the current config, decoding and caching it
/// by path. A changed path invalidates the cache; a failed decode clears it
/// so the stale handle is never retried.
async fn resolve_icon(
    job: &RenderRequest,
    state: &mut WorkerState,
    decoder: &Arc<dyn BoundedDecoder>,
) -> Option<Arc<RgbaImage>> {
    let generation = job.generation;
    let Some(path) = job.config.icon.clone() else {
        warn!(generation, "image mark mode without an icon path");
        return None;
    };
    if let Some((cached_path, raster)) = state.icon.as_ref() {
        if *cached_path == path {
            return Some(Arc::clone(raster));
        }
    }
    state.icon = None;

    let decoder = Arc::clone(decoder);
    let source = ImageSource::Path(path.clone());
    let (max_w, max_h) = (job.viewport.width, job.viewport.height);
    let decoded =
        match tokio::task::spawn_blocking(move || decoder.decode_bounded(&source, max_w, max_h))
            .await
        {
            Ok(Ok(decoded)) => decoded,
            Ok(Err(err)) => {
                warn!(generation, "icon {err}");
                return None;
            }
            Err(join_err) => {
                warn!(generation, "icon decode panicked: {join_err}");
                return None;
            }
        };
    state.icon = Some((path, Arc::clone(&decoded.image)));
    Some(decoded.image)
}
