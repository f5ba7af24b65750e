// ============================================================================
// TILE MANAGER — pyramid generation, viewport lookup, LRU texture cache
// ============================================================================
//
// Generation is incremental: `load_image` only plans the pyramid, and each
// `step_generation` call slices one whole level. The renderer drives one step
// per tick so a large image never blocks the UI for more than a level.
//
// Recency uses a logical clock rather than wall time. Every tile handed out
// by a lookup gets its own fresh stamp, so eviction order is total and
// deterministic.

use std::collections::HashMap;
use std::sync::Arc;

use egui::Rect;
use image::RgbaImage;

use super::pyramid::{self, PyramidLevel};
use super::texture::TextureFactory;
use super::{Tile, TileId, TileStatus};
use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::geometry::{calculate_lod, expand_bounds};
use crate::{log_err, log_info};

/// Snapshot for diagnostics.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TileStats {
    pub total_tiles: usize,
    pub tiles_with_textures: usize,
    pub failed_tiles: usize,
    /// Texture memory held for reuse by the back-end.
    pub retained_bytes: usize,
    pub cache_size: usize,
    pub levels_planned: usize,
    pub levels_generated: usize,
    pub image_width: u32,
    pub image_height: u32,
}

pub struct TileManager<F: TextureFactory> {
    tile_size: u32,
    max_levels: usize,
    cache_size: usize,
    preload_margin: f32,
    factory: F,
    tiles: HashMap<TileId, Tile<F::Handle>>,
    source: Option<Arc<RgbaImage>>,
    pyramid: Vec<PyramidLevel>,
    /// Levels `0..generated` have been sliced.
    generated: usize,
    clock: u64,
}

impl<F: TextureFactory> TileManager<F> {
    pub fn new(config: &RendererConfig, factory: F) -> Self {
        Self {
            tile_size: config.tile_size.max(1),
            max_levels: config.max_levels.max(1),
            cache_size: config.cache_size.max(1),
            preload_margin: config.preload_margin,
            factory,
            tiles: HashMap::new(),
            source: None,
            pyramid: Vec::new(),
            generated: 0,
            clock: 0,
        }
    }

    // ========================================================================
    // GENERATION
    // ========================================================================

    /// Replace the source image. Existing tiles are released and the pyramid
    /// is re-planned; no tiles exist until generation runs.
    pub fn load_image(&mut self, image: Arc<RgbaImage>) -> Result<()> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(RenderError::InvalidImage(format!("source is {}x{}", w, h)));
        }
        self.clear();
        self.pyramid = pyramid::plan(w, h, self.tile_size, self.max_levels);
        self.generated = 0;
        self.source = Some(image);
        log_info!(
            "planned {} level(s) for {}x{} at tile size {}",
            self.pyramid.len(),
            w,
            h,
            self.tile_size
        );
        Ok(())
    }

    /// Slice the next pending level. Returns the level that was produced, or
    /// `None` once the pyramid is complete (or nothing is loaded).
    pub fn step_generation(&mut self) -> Option<usize> {
        let source = self.source.clone()?;
        let level = *self.pyramid.get(self.generated)?;
        let sliced = pyramid::slice_level(&source, &level, self.tile_size);
        let count = sliced.len();
        for (id, bounds, pixels) in sliced {
            let stamp = self.tick();
            self.insert_tile(id, bounds, pixels, stamp);
        }
        self.generated += 1;
        log_info!("level {} ready ({} tiles, {}x{})", level.level, count, level.width, level.height);
        Some(level.level)
    }

    /// Run generation to completion.
    pub fn finish_generation(&mut self) {
        while self.step_generation().is_some() {}
    }

    pub fn is_generating(&self) -> bool {
        self.source.is_some() && self.generated < self.pyramid.len()
    }

    /// Fraction of planned levels already sliced.
    pub fn progress(&self) -> f32 {
        if self.pyramid.is_empty() {
            return 0.0;
        }
        self.generated as f32 / self.pyramid.len() as f32
    }

    // ========================================================================
    // VIEWPORT QUERIES
    // ========================================================================

    /// Level used for `zoom`, limited to the levels this image actually has.
    pub fn level_for_zoom(&self, zoom: f32) -> usize {
        calculate_lod(zoom, self.pyramid.len().max(1))
    }

    /// Live tiles at the zoom's level that intersect `viewport`. Tiles that do
    /// not exist (not generated yet, or evicted) are omitted. Every returned
    /// tile has its recency refreshed.
    pub fn get_tiles_for_viewport(&mut self, viewport: Rect, zoom: f32) -> Vec<&Tile<F::Handle>> {
        let ids = self.visible_ids(viewport, zoom);
        let found: Vec<TileId> = ids.into_iter().filter(|id| self.tiles.contains_key(id)).collect();
        self.touch(found.iter().copied());
        found.iter().filter_map(|id| self.tiles.get(id)).collect()
    }

    /// Refresh the recency of specific tiles. Unknown ids are ignored.
    pub fn touch(&mut self, ids: impl IntoIterator<Item = TileId>) {
        for id in ids {
            if self.tiles.contains_key(&id) {
                let stamp = self.tick();
                if let Some(tile) = self.tiles.get_mut(&id) {
                    tile.last_used = stamp;
                }
            }
        }
    }

    /// Re-slice any tiles of an already generated level that are missing
    /// from the cache for `viewport`. Returns how many were rebuilt.
    pub fn ensure_tiles(&mut self, viewport: Rect, zoom: f32) -> usize {
        let Some(source) = self.source.clone() else {
            return 0;
        };
        let level_idx = self.level_for_zoom(zoom);
        if level_idx >= self.generated {
            return 0;
        }
        let level = self.pyramid[level_idx];
        let mut rebuilt = 0;
        for id in self.visible_ids(viewport, zoom) {
            if self.tiles.contains_key(&id) {
                continue;
            }
            let (bounds, pixels) = pyramid::slice_tile(&source, &level, id.x, id.y, self.tile_size);
            let stamp = self.tick();
            self.insert_tile(id, bounds, pixels, stamp);
            rebuilt += 1;
        }
        rebuilt
    }

    /// Texture handle for `id`, created on first request. A failed creation
    /// is logged, marks the tile as `Error` and yields `None`; the next
    /// request tries again.
    pub fn get_tile_texture(&mut self, id: TileId) -> Option<F::Handle> {
        let tile = self.tiles.get_mut(&id)?;
        if let Some(ref handle) = tile.texture {
            return Some(handle.clone());
        }
        match self.factory.create(id, &tile.pixels) {
            Ok(handle) => {
                tile.texture = Some(handle.clone());
                tile.status = TileStatus::Ready;
                Some(handle)
            }
            Err(e) => {
                log_err!("{}", e);
                tile.status = TileStatus::Error;
                None
            }
        }
    }

    /// Warm tiles (pixels and textures) in a margin around `viewport`.
    pub fn preload_adjacent_tiles(&mut self, viewport: Rect, zoom: f32) {
        let expanded = expand_bounds(viewport, self.preload_margin);
        self.ensure_tiles(expanded, zoom);
        let ids: Vec<TileId> = self
            .get_tiles_for_viewport(expanded, zoom)
            .iter()
            .filter(|t| t.texture.is_none())
            .map(|t| t.id)
            .collect();
        for id in ids {
            self.get_tile_texture(id);
        }
    }

    // ========================================================================
    // CACHE
    // ========================================================================

    /// Evict least-recently-used tiles until at most `cache_size` remain.
    /// Returns the number evicted.
    pub fn cleanup_cache(&mut self) -> usize {
        if self.tiles.len() <= self.cache_size {
            return 0;
        }
        let mut by_age: Vec<(u64, TileId)> = self.tiles.values().map(|t| (t.last_used, t.id)).collect();
        by_age.sort_unstable();
        let excess = self.tiles.len() - self.cache_size;
        for &(_, id) in by_age.iter().take(excess) {
            if let Some(handle) = self.tiles.remove(&id).and_then(|t| t.texture) {
                self.factory.release(handle);
            }
        }
        excess
    }

    pub fn stats(&self) -> TileStats {
        let (image_width, image_height) = self.image_size();
        TileStats {
            total_tiles: self.tiles.len(),
            tiles_with_textures: self.tiles.values().filter(|t| t.texture.is_some()).count(),
            failed_tiles: self.tiles.values().filter(|t| t.status == TileStatus::Error).count(),
            retained_bytes: self.factory.retained_bytes(),
            cache_size: self.cache_size,
            levels_planned: self.pyramid.len(),
            levels_generated: self.generated,
            image_width,
            image_height,
        }
    }

    /// Release every texture and drop all tiles. The source and plan stay,
    /// so evicted levels are rebuilt on demand.
    pub fn clear(&mut self) {
        for (_, tile) in self.tiles.drain() {
            if let Some(handle) = tile.texture {
                self.factory.release(handle);
            }
        }
    }

    /// `clear` plus forgetting the source image.
    pub fn destroy(&mut self) {
        self.clear();
        self.factory.purge();
        self.source = None;
        self.pyramid.clear();
        self.generated = 0;
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    pub fn tile(&self, id: TileId) -> Option<&Tile<F::Handle>> {
        self.tiles.get(&id)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    pub fn tile_size(&self) -> u32 {
        self.tile_size
    }

    pub fn pyramid(&self) -> &[PyramidLevel] {
        &self.pyramid
    }

    pub fn levels_generated(&self) -> usize {
        self.generated
    }

    pub fn source(&self) -> Option<&Arc<RgbaImage>> {
        self.source.as_ref()
    }

    pub fn image_size(&self) -> (u32, u32) {
        self.source.as_ref().map(|s| s.dimensions()).unwrap_or((0, 0))
    }

    pub fn factory(&self) -> &F {
        &self.factory
    }

    pub fn factory_mut(&mut self) -> &mut F {
        &mut self.factory
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    fn visible_ids(&self, viewport: Rect, zoom: f32) -> Vec<TileId> {
        let level_idx = self.level_for_zoom(zoom);
        let Some(level) = self.pyramid.get(level_idx) else {
            return Vec::new();
        };
        let Some((xs, ys)) = level.tile_range(viewport, self.tile_size) else {
            return Vec::new();
        };
        let mut ids = Vec::new();
        for y in ys {
            for x in xs.clone() {
                ids.push(TileId::new(level_idx, x, y));
            }
        }
        ids
    }

    fn insert_tile(&mut self, id: TileId, bounds: Rect, pixels: RgbaImage, stamp: u64) {
        let tile = Tile {
            id,
            bounds,
            pixels,
            texture: None,
            status: TileStatus::Pending,
            last_used: stamp,
        };
        if let Some(handle) = self.tiles.insert(id, tile).and_then(|old| old.texture) {
            self.factory.release(handle);
        }
    }
}

impl<F: TextureFactory> Drop for TileManager<F> {
    fn drop(&mut self) {
        self.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::SoftwareTextures;
    use egui::{Pos2, Vec2};

    fn config(tile_size: u32, cache_size: usize) -> RendererConfig {
        RendererConfig {
            tile_size,
            cache_size,
            ..Default::default()
        }
    }

    fn manager(w: u32, h: u32, tile_size: u32, cache_size: usize) -> TileManager<SoftwareTextures> {
        let mut m = TileManager::new(&config(tile_size, cache_size), SoftwareTextures::new(4096));
        m.load_image(Arc::new(RgbaImage::new(w, h))).unwrap();
        m
    }

    fn rect(x: f32, y: f32, w: f32, h: f32) -> Rect {
        Rect::from_min_size(Pos2::new(x, y), Vec2::new(w, h))
    }

    #[test]
    fn empty_image_is_rejected() {
        let mut m = TileManager::new(&RendererConfig::default(), SoftwareTextures::new(64));
        let err = m.load_image(Arc::new(RgbaImage::new(0, 10))).unwrap_err();
        assert!(matches!(err, RenderError::InvalidImage(_)));
    }

    #[test]
    fn generation_runs_one_level_per_step() {
        let mut m = manager(256, 128, 64, 1000);
        assert!(m.is_generating());
        assert_eq!(m.tile_count(), 0);
        assert_eq!(m.step_generation(), Some(0));
        assert_eq!(m.tile_count(), 8);
        assert_eq!(m.step_generation(), Some(1));
        assert_eq!(m.tile_count(), 8 + 2);
        m.finish_generation();
        assert!(!m.is_generating());
        assert_eq!(m.step_generation(), None);
        assert_eq!(m.stats().levels_generated, 4);
        assert_eq!(m.progress(), 1.0);
    }

    #[test]
    fn viewport_lookup_omits_ungenerated_levels() {
        let mut m = manager(512, 512, 128, 1000);
        m.step_generation();
        // zoom 0.5 selects level 1, which does not exist yet
        assert!(m.get_tiles_for_viewport(rect(0.0, 0.0, 512.0, 512.0), 0.5).is_empty());
        assert_eq!(m.get_tiles_for_viewport(rect(0.0, 0.0, 200.0, 100.0), 1.0).len(), 2);
    }

    #[test]
    fn texture_failure_is_contained_and_retried() {
        let mut m = TileManager::new(&config(64, 100), SoftwareTextures::new(32));
        m.load_image(Arc::new(RgbaImage::new(64, 64))).unwrap();
        m.step_generation();
        let id = TileId::new(0, 0, 0);
        assert!(m.get_tile_texture(id).is_none());
        assert_eq!(m.tile(id).map(|t| t.status), Some(TileStatus::Error));
        assert_eq!(m.stats().failed_tiles, 1);
        assert!(m.get_tile_texture(TileId::new(3, 9, 9)).is_none());
    }

    #[test]
    fn texture_is_created_once() {
        let mut m = manager(64, 64, 64, 100);
        m.step_generation();
        let id = TileId::new(0, 0, 0);
        let a = m.get_tile_texture(id).unwrap();
        let b = m.get_tile_texture(id).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(m.factory().live_count(), 1);
        assert!(m.tile(id).is_some_and(|t| t.is_ready()));
    }

    #[test]
    fn eviction_releases_textures_and_clear_releases_all() {
        let mut m = manager(512, 512, 64, 10);
        m.step_generation();
        let ids: Vec<TileId> = m
            .get_tiles_for_viewport(rect(0.0, 0.0, 512.0, 512.0), 1.0)
            .iter()
            .map(|t| t.id)
            .collect();
        for id in ids {
            m.get_tile_texture(id);
        }
        assert_eq!(m.factory().live_count(), 64);
        assert_eq!(m.cleanup_cache(), 54);
        assert_eq!(m.tile_count(), 10);
        assert_eq!(m.factory().live_count(), 10);
        m.clear();
        assert_eq!(m.factory().live_count(), 0);
    }

    #[test]
    fn evicted_tiles_are_rebuilt_on_demand() {
        let mut m = manager(512, 512, 128, 4);
        m.step_generation();
        m.get_tiles_for_viewport(rect(0.0, 0.0, 100.0, 100.0), 1.0);
        m.cleanup_cache();
        // generated row-major, so only the last three tiles and (0,0) survive
        let far = rect(400.0, 0.0, 50.0, 50.0);
        assert!(m.get_tiles_for_viewport(far, 1.0).is_empty());
        assert_eq!(m.ensure_tiles(far, 1.0), 1);
        let tiles = m.get_tiles_for_viewport(far, 1.0);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].id, TileId::new(0, 3, 0));
        assert_eq!(tiles[0].pixels.dimensions(), (128, 128));
    }

    #[test]
    fn preload_warms_the_margin() {
        let mut cfg = config(128, 1000);
        cfg.preload_margin = 128.0;
        let mut m = TileManager::new(&cfg, SoftwareTextures::new(1024));
        m.load_image(Arc::new(RgbaImage::new(1024, 1024))).unwrap();
        m.step_generation();
        m.preload_adjacent_tiles(rect(256.0, 256.0, 100.0, 100.0), 1.0);
        // 356 + 128 = 484 reaches column/row 3; 256 - 128 = 128 starts at 1
        assert_eq!(m.stats().tiles_with_textures, 9);
        assert!(m.tile(TileId::new(0, 1, 1)).is_some_and(|t| t.is_ready()));
        assert!(m.tile(TileId::new(0, 0, 0)).is_some_and(|t| t.texture.is_none()));
    }

    #[test]
    fn destroy_forgets_the_image() {
        let mut m = manager(128, 128, 64, 100);
        m.finish_generation();
        assert!(m.get_tile_texture(TileId::new(0, 0, 0)).is_some());
        m.clear();
        // the released 64x64 buffer is kept for the next upload
        assert_eq!(m.stats().retained_bytes, 64 * 64 * 4);
        m.destroy();
        assert_eq!(m.stats().retained_bytes, 0);
        assert_eq!(m.tile_count(), 0);
        assert_eq!(m.image_size(), (0, 0));
        assert!(!m.is_generating());
        assert_eq!(m.step_generation(), None);
    }
}
