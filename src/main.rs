//! Binary entrypoint for watertile.
//!
//! Composites one watermarked preview frame from a config file and a base
//! image; all logic lives in the library crate.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, ensure};
use clap::{ArgAction, Parser};
use tracing::{Level, info};
use tracing_subscriber::{EnvFilter, fmt};

use watertile::surface::RenderState;
use watertile::{ImageSource, Viewport, WatermarkConfig, WatermarkSurface};

/// Simple CLI
#[derive(Debug, Parser)]
#[command(name = "watertile", about = "Repeating watermark compositor")]
struct Cli {
    /// Path to YAML watermark config file
    #[arg(short, long, value_name = "FILE", default_value = "config.yaml")]
    config: PathBuf,

    /// Base image to watermark
    #[arg(short, long, value_name = "FILE")]
    image: PathBuf,

    /// Viewport width in pixels
    #[arg(long, default_value_t = 1080)]
    width: u32,

    /// Viewport height in pixels
    #[arg(long, default_value_t = 1920)]
    height: u32,

    /// Uniform padding around the rendered image
    #[arg(long, default_value_t = 0)]
    padding: u32,

    /// Write the composited frame to this PNG path
    #[arg(short, long, value_name = "FILE")]
    out: Option<PathBuf>,

    /// Increase log verbosity (repeatable)
    #[arg(short = 'v', long = "verbose", action = ArgAction::Count)]
    verbose: u8,
}

fn init_tracing(verbosity: u8) -> Result<()> {
    // map -v to log level
    let level = match verbosity {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    let filter = EnvFilter::from_default_env()
        .add_directive(format!("watertile={}", level).parse()?);
    fmt().with_env_filter(filter).with_target(true).init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose)?;

    let config = WatermarkConfig::from_yaml_file(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?
        .validated()
        .context("validating configuration")?;
    let viewport = Viewport::new(cli.width, cli.height, cli.padding)?;

    let mut surface = WatermarkSurface::new(viewport);
    surface.set_config(config);
    let generation = surface.set_image(ImageSource::Path(cli.image.clone()));
    info!(generation = generation.0, image = %cli.image.display(), "render dispatched");

    let deadline = Instant::now() + Duration::from_secs(30);
    while surface.state() != RenderState::Ready {
        let remaining = deadline.saturating_duration_since(Instant::now());
        ensure!(!remaining.is_zero(), "timed out waiting for the render");
        let alive = tokio::time::timeout(remaining, surface.pump_wait())
            .await
            .context("timed out waiting for the render")?;
        ensure!(alive, "render worker exited");
    }
    surface.skip_animations();

    let frame = surface.render_frame(Instant::now());
    if let Some(tile) = surface.tile() {
        info!(
            tile_width = tile.width(),
            tile_height = tile.height(),
            "tile ready"
        );
    }
    match cli.out {
        Some(path) => {
            frame
                .save(&path)
                .with_context(|| format!("writing frame to {}", path.display()))?;
            info!(out = %path.display(), "frame written");
        }
        None => info!(
            width = frame.width(),
            height = frame.height(),
            "frame composited (pass --out to save it)"
        ),
    }
    Ok(())
}
