// ============================================================================
// BUFFER POOL — recycle tile pixel buffers to avoid alloc/free churn
// ============================================================================

use std::collections::HashMap;

use image::RgbaImage;

/// Key for pooled buffers: (width, height).
type PoolKey = (u32, u32);

/// A pool of RGBA buffers keyed by dimensions.
///
/// Nearly every tile of a pyramid has the same full `tile_size × tile_size`
/// shape, so a buffer released on eviction is almost always reusable for the
/// next tile that gets uploaded.
pub struct BufferPool {
    pool: HashMap<PoolKey, Vec<RgbaImage>>,
    /// Maximum number of buffers to keep per key.
    max_per_key: usize,
}

impl BufferPool {
    pub fn new() -> Self {
        Self {
            pool: HashMap::new(),
            max_per_key: 8,
        }
    }

    /// Return a recycled buffer for the given dimensions, if one exists.
    /// Contents are stale; the caller overwrites every pixel.
    pub fn acquire(&mut self, width: u32, height: u32) -> Option<RgbaImage> {
        self.pool.get_mut(&(width, height)).and_then(|v| v.pop())
    }

    /// Hand a buffer back. Dropped if the pool is full for its size.
    pub fn release(&mut self, buffer: RgbaImage) {
        let key = buffer.dimensions();
        let entry = self.pool.entry(key).or_default();
        if entry.len() < self.max_per_key {
            entry.push(buffer);
        }
    }

    pub fn clear(&mut self) {
        self.pool.clear();
    }

    pub fn pooled_count(&self) -> usize {
        self.pool.values().map(|v| v.len()).sum()
    }

    /// Approximate memory held by pooled buffers (bytes).
    pub fn pooled_memory_bytes(&self) -> usize {
        self.pool
            .iter()
            .map(|((w, h), buffers)| (*w as usize) * (*h as usize) * 4 * buffers.len())
            .sum()
    }
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reuses_by_size_and_caps_per_key() {
        let mut pool = BufferPool::new();
        for _ in 0..10 {
            pool.release(RgbaImage::new(4, 4));
        }
        pool.release(RgbaImage::new(2, 3));
        assert_eq!(pool.pooled_count(), 9);
        assert_eq!(pool.pooled_memory_bytes(), 8 * 64 + 24);
        assert!(pool.acquire(3, 2).is_none());
        assert_eq!(pool.acquire(2, 3).map(|b| b.dimensions()), Some((2, 3)));
        pool.clear();
        assert!(pool.acquire(4, 4).is_none());
    }
}
