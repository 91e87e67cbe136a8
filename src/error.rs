use thiserror::Error;

/// Library error type for watertile operations.
///
/// Decode and build failures never escape the render worker; they abort the
/// current generation and leave the previously published state visible. The
/// variants exist so the worker boundary and the public decoder trait share
/// one taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    /// The source image could not be decoded within the requested bounds.
    #[error("decode failed: {0:#}")]
    Decode(anyhow::Error),

    /// Tile construction failed (degenerate geometry, missing font, released
    /// or invalid source raster).
    #[error("tile build failed: {0:#}")]
    Build(anyhow::Error),

    /// Underlying IO error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// YAML/serde configuration error.
    #[error(transparent)]
    Config(#[from] serde_yaml::Error),
}
