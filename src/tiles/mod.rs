// ============================================================================
// TILES — multi-resolution pyramid of texture-ready image tiles
// ============================================================================

pub mod manager;
pub mod pool;
pub mod pyramid;
pub mod texture;

use std::fmt;

use egui::Rect;
use image::RgbaImage;

pub use manager::{TileManager, TileStats};
pub use pyramid::PyramidLevel;
pub use texture::{SoftwareTextures, TextureFactory};

/// Identity of one tile: pyramid level plus column/row within that level.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId {
    pub level: usize,
    pub x: u32,
    pub y: u32,
}

impl TileId {
    pub fn new(level: usize, x: u32, y: u32) -> Self {
        Self { level, x, y }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}_x{}_y{}", self.level, self.x, self.y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TileStatus {
    /// Pixels are sliced but no texture has been created yet.
    Pending,
    /// A texture handle is live.
    Ready,
    /// The last texture creation failed; retried on the next request.
    Error,
}

/// One cached tile.
///
/// `bounds` is in level-0 image coordinates, so every level lines up with
/// box and overlay geometry without further scaling.
pub struct Tile<H> {
    pub id: TileId,
    pub bounds: Rect,
    pub pixels: RgbaImage,
    pub texture: Option<H>,
    pub status: TileStatus,
    /// Logical clock value of the last request that returned this tile.
    pub last_used: u64,
}

impl<H> Tile<H> {
    pub fn is_ready(&self) -> bool {
        self.status == TileStatus::Ready && self.texture.is_some()
    }
}
