pub mod config;
pub mod decode;
pub mod error;
pub mod events;
pub mod geometry;
pub mod palette;
pub mod raster;
pub mod surface;
pub mod tile;
pub mod tasks {
    pub mod renderer;
}

pub use config::{Viewport, WatermarkConfig};
pub use decode::ImageSource;
pub use error::Error;
pub use events::RenderGeneration;
pub use surface::{RenderState, WatermarkSurface};
