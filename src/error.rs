// ============================================================================
// ERRORS — failure taxonomy for the tile renderer
// ============================================================================
//
// Only initialisation and I/O style failures ever reach the host. Per-tile
// texture failures are produced here but contained by the tile manager, and
// the index / transform hot paths never return errors at all.

use thiserror::Error;

use crate::tiles::TileId;

#[derive(Error, Debug)]
pub enum RenderError {
    /// The renderer (or its presentation back-end) could not be brought up.
    /// The renderer is unusable until re-initialised.
    #[error("Renderer initialisation failed: {0}")]
    Init(String),

    #[error("Texture creation failed for tile {tile}: {reason}")]
    TextureCreation { tile: TileId, reason: String },

    #[error("Invalid source image: {0}")]
    InvalidImage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

pub type Result<T> = std::result::Result<T, RenderError>;
