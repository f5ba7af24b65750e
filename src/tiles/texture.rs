// ============================================================================
// TEXTURE FACTORY — presentation back-end seam for tile uploads
// ============================================================================
//
// The tile manager never talks to a GPU directly. It hands sliced pixels to a
// `TextureFactory` and stores whatever handle comes back. The viewer plugs in
// egui textures; headless rendering and tests use `SoftwareTextures`, which
// keeps the pixels in shared CPU buffers.

use std::sync::Arc;

use image::RgbaImage;

use super::TileId;
use super::pool::BufferPool;
use crate::error::{RenderError, Result};

pub trait TextureFactory {
    type Handle: Clone;

    /// Upload `pixels` for tile `id`. Failure is per tile and recoverable.
    fn create(&mut self, id: TileId, pixels: &RgbaImage) -> Result<Self::Handle>;

    /// Give a handle back when its tile is evicted or cleared.
    fn release(&mut self, handle: Self::Handle);

    /// Bytes the back-end keeps for reuse beyond the live handles.
    fn retained_bytes(&self) -> usize {
        0
    }

    /// Drop anything kept for reuse. Called when the image goes away.
    fn purge(&mut self) {}
}

/// CPU-side texture store. Handles are shared RGBA buffers.
pub struct SoftwareTextures {
    max_side: u32,
    pool: BufferPool,
    live: usize,
}

impl SoftwareTextures {
    pub fn new(max_side: u32) -> Self {
        Self {
            max_side,
            pool: BufferPool::new(),
            live: 0,
        }
    }

    /// Handles created and not yet released.
    pub fn live_count(&self) -> usize {
        self.live
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }
}

impl TextureFactory for SoftwareTextures {
    type Handle = Arc<RgbaImage>;

    fn create(&mut self, id: TileId, pixels: &RgbaImage) -> Result<Self::Handle> {
        let (w, h) = pixels.dimensions();
        if w == 0 || h == 0 {
            return Err(RenderError::TextureCreation {
                tile: id,
                reason: format!("empty {}x{} buffer", w, h),
            });
        }
        if w > self.max_side || h > self.max_side {
            return Err(RenderError::TextureCreation {
                tile: id,
                reason: format!("{}x{} exceeds max texture side {}", w, h, self.max_side),
            });
        }
        let mut buffer = self.pool.acquire(w, h).unwrap_or_else(|| RgbaImage::new(w, h));
        buffer.copy_from_slice(pixels.as_raw());
        self.live += 1;
        Ok(Arc::new(buffer))
    }

    fn release(&mut self, handle: Self::Handle) {
        self.live = self.live.saturating_sub(1);
        // Only recycle when no frame still holds the buffer.
        if let Ok(buffer) = Arc::try_unwrap(handle) {
            self.pool.release(buffer);
        }
    }

    fn retained_bytes(&self) -> usize {
        self.pool.pooled_memory_bytes()
    }

    fn purge(&mut self) {
        self.pool.clear();
    }
}
