// ============================================================================
// PYRAMID — level planning and tile slicing
// ============================================================================
//
// Level L is the source downsampled by 2^L (floor division per axis), cut
// into `tile_size` squares. The last column and row keep whatever is left, so
// edge tiles may be narrower or shorter than `tile_size`.
//
// Tile bounds are always expressed in level-0 image space. Interior tiles map
// exactly; the last column/row is stretched to the true image edge so that
// odd source sizes leave no uncovered sliver after the floor division.

use std::ops::RangeInclusive;

use egui::{Pos2, Rect};
use image::RgbaImage;
use image::imageops::{self, FilterType};
use rayon::prelude::*;

use super::TileId;

/// Shape of one pyramid level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PyramidLevel {
    pub level: usize,
    /// 1 / 2^level.
    pub scale: f32,
    pub width: u32,
    pub height: u32,
    pub tiles_x: u32,
    pub tiles_y: u32,
}

/// Plan up to `max_levels` levels for a `width × height` source, stopping
/// before any level would collapse below one pixel.
pub fn plan(width: u32, height: u32, tile_size: u32, max_levels: usize) -> Vec<PyramidLevel> {
    let mut levels = Vec::new();
    for level in 0..max_levels.min(32) {
        let w = width >> level;
        let h = height >> level;
        if w == 0 || h == 0 {
            break;
        }
        levels.push(PyramidLevel {
            level,
            scale: 1.0 / (1u64 << level) as f32,
            width: w,
            height: h,
            tiles_x: w.div_ceil(tile_size),
            tiles_y: h.div_ceil(tile_size),
        });
    }
    levels
}

impl PyramidLevel {
    pub fn tile_count(&self) -> usize {
        self.tiles_x as usize * self.tiles_y as usize
    }

    /// Pixel rectangle `(x, y, w, h)` of a tile within this level.
    pub fn tile_rect(&self, tx: u32, ty: u32, tile_size: u32) -> (u32, u32, u32, u32) {
        let sx = tx * tile_size;
        let sy = ty * tile_size;
        let sw = tile_size.min(self.width - sx);
        let sh = tile_size.min(self.height - sy);
        (sx, sy, sw, sh)
    }

    /// Source-image pixel span `(x0, y0, x1, y1)` a tile was sampled from.
    fn source_span(&self, tx: u32, ty: u32, tile_size: u32, image_w: u32, image_h: u32) -> (u32, u32, u32, u32) {
        let (sx, sy, sw, sh) = self.tile_rect(tx, ty, tile_size);
        let up = |v: u32, limit: u32| (((v as u64) << self.level).min(limit as u64)) as u32;
        let x0 = up(sx, image_w);
        let y0 = up(sy, image_h);
        let x1 = if tx + 1 == self.tiles_x { image_w } else { up(sx + sw, image_w) };
        let y1 = if ty + 1 == self.tiles_y { image_h } else { up(sy + sh, image_h) };
        (x0, y0, x1, y1)
    }

    /// Level-0 image-space bounds of a tile.
    pub fn tile_bounds(&self, tx: u32, ty: u32, tile_size: u32, image_w: u32, image_h: u32) -> Rect {
        let (x0, y0, x1, y1) = self.source_span(tx, ty, tile_size, image_w, image_h);
        Rect::from_min_max(
            Pos2::new(x0 as f32, y0 as f32),
            Pos2::new(x1 as f32, y1 as f32),
        )
    }

    /// Columns and rows of this level touched by an image-space viewport.
    /// `None` when the viewport misses the level entirely.
    pub fn tile_range(&self, viewport: Rect, tile_size: u32) -> Option<(RangeInclusive<u32>, RangeInclusive<u32>)> {
        let finite = viewport.min.x.is_finite()
            && viewport.min.y.is_finite()
            && viewport.max.x.is_finite()
            && viewport.max.y.is_finite();
        if !finite || self.tiles_x == 0 || self.tiles_y == 0 {
            return None;
        }
        let ts = tile_size as f32;
        let span = |lo: f32, hi: f32, count: u32| -> Option<RangeInclusive<u32>> {
            let start = ((lo * self.scale / ts).floor() as i64).max(0);
            let end = ((hi * self.scale / ts).ceil() as i64 - 1).min(count as i64 - 1);
            (start <= end).then(|| start as u32..=end as u32)
        };
        let xs = span(viewport.min.x, viewport.max.x, self.tiles_x)?;
        let ys = span(viewport.min.y, viewport.max.y, self.tiles_y)?;
        Some((xs, ys))
    }
}

/// Resample the whole source to `level` and cut every tile, in parallel.
pub fn slice_level(source: &RgbaImage, level: &PyramidLevel, tile_size: u32) -> Vec<(TileId, Rect, RgbaImage)> {
    let (image_w, image_h) = source.dimensions();
    let resized;
    let img: &RgbaImage = if level.level == 0 {
        source
    } else {
        resized = imageops::resize(source, level.width, level.height, FilterType::Triangle);
        &resized
    };

    let coords: Vec<(u32, u32)> = (0..level.tiles_y)
        .flat_map(|ty| (0..level.tiles_x).map(move |tx| (tx, ty)))
        .collect();

    coords
        .par_iter()
        .map(|&(tx, ty)| {
            let (sx, sy, sw, sh) = level.tile_rect(tx, ty, tile_size);
            let pixels = imageops::crop_imm(img, sx, sy, sw, sh).to_image();
            let bounds = level.tile_bounds(tx, ty, tile_size, image_w, image_h);
            (TileId::new(level.level, tx, ty), bounds, pixels)
        })
        .collect()
}

/// Rebuild a single tile straight from the source. Used to bring back tiles
/// that were evicted after their level was generated.
pub fn slice_tile(source: &RgbaImage, level: &PyramidLevel, tx: u32, ty: u32, tile_size: u32) -> (Rect, RgbaImage) {
    let (image_w, image_h) = source.dimensions();
    let (_, _, sw, sh) = level.tile_rect(tx, ty, tile_size);
    let (x0, y0, x1, y1) = level.source_span(tx, ty, tile_size, image_w, image_h);
    let region = imageops::crop_imm(source, x0, y0, x1 - x0, y1 - y0).to_image();
    let pixels = if level.level == 0 {
        region
    } else {
        imageops::resize(&region, sw, sh, FilterType::Triangle)
    };
    (level.tile_bounds(tx, ty, tile_size, image_w, image_h), pixels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use egui::Vec2;

    #[test]
    fn plan_matches_tile_counts() {
        let levels = plan(4096, 4096, 512, 4);
        assert_eq!(levels.len(), 4);
        assert_eq!(levels[0].tile_count(), 64);
        assert_eq!(levels[1].tile_count(), 16);
        assert_eq!(levels[2].tile_count(), 4);
        assert_eq!(levels[3].tile_count(), 1);
        assert_eq!(levels[3].width, 512);
    }

    #[test]
    fn plan_stops_before_empty_levels() {
        let levels = plan(5, 3, 512, 8);
        assert_eq!(levels.len(), 2);
        assert_eq!((levels[1].width, levels[1].height), (2, 1));
    }

    #[test]
    fn edge_tiles_are_partial_and_bounds_reach_the_image_edge() {
        let levels = plan(1000, 700, 256, 2);
        let l0 = &levels[0];
        assert_eq!((l0.tiles_x, l0.tiles_y), (4, 3));
        assert_eq!(l0.tile_rect(3, 2, 256), (768, 512, 232, 188));
        let b = l0.tile_bounds(3, 2, 256, 1000, 700);
        assert_eq!((b.max.x, b.max.y), (1000.0, 700.0));

        let l1 = &levels[1];
        assert_eq!((l1.width, l1.height, l1.tiles_x, l1.tiles_y), (500, 350, 2, 2));
        let b = l1.tile_bounds(0, 0, 256, 1000, 700);
        assert_eq!(b, Rect::from_min_max(Pos2::ZERO, Pos2::new(512.0, 512.0)));
        let b = l1.tile_bounds(1, 1, 256, 1000, 700);
        assert_eq!((b.min.x, b.max.x, b.max.y), (512.0, 1000.0, 700.0));
    }

    #[test]
    fn viewport_range_is_exclusive_at_tile_boundaries() {
        let l0 = plan(4096, 4096, 512, 1)[0];
        let vp = Rect::from_min_size(Pos2::ZERO, Vec2::splat(1000.0));
        assert_eq!(l0.tile_range(vp, 512), Some((0..=1, 0..=1)));
        let vp = Rect::from_min_size(Pos2::ZERO, Vec2::splat(1024.0));
        assert_eq!(l0.tile_range(vp, 512), Some((0..=1, 0..=1)));
        let vp = Rect::from_min_max(Pos2::new(-300.0, 3900.0), Pos2::new(100.0, 9000.0));
        assert_eq!(l0.tile_range(vp, 512), Some((0..=0, 7..=7)));
        let outside = Rect::from_min_max(Pos2::new(5000.0, 0.0), Pos2::new(6000.0, 10.0));
        assert_eq!(l0.tile_range(outside, 512), None);
    }

    #[test]
    fn sliced_tiles_carry_source_pixels() {
        let src = RgbaImage::from_fn(300, 200, |x, y| image::Rgba([x as u8, y as u8, 0, 255]));
        let levels = plan(300, 200, 128, 2);
        let tiles = slice_level(&src, &levels[0], 128);
        assert_eq!(tiles.len(), 6);
        let (id, bounds, px) = tiles
            .iter()
            .find(|(id, _, _)| *id == TileId::new(0, 2, 1))
            .unwrap();
        assert_eq!(id.to_string(), "L0_x2_y1");
        assert_eq!(px.dimensions(), (44, 72));
        assert_eq!(bounds.min, Pos2::new(256.0, 128.0));
        assert_eq!(px.get_pixel(0, 0), src.get_pixel(256, 128));

        let coarse = slice_level(&src, &levels[1], 128);
        assert_eq!(coarse.len(), 2);
        assert!(coarse.iter().all(|(id, _, _)| id.level == 1));
    }

    #[test]
    fn single_tile_rebuild_matches_level_geometry() {
        let src = RgbaImage::from_pixel(600, 600, image::Rgba([10, 20, 30, 255]));
        let levels = plan(600, 600, 256, 2);
        let (bounds, px) = slice_tile(&src, &levels[1], 1, 1, 256);
        assert_eq!(px.dimensions(), (44, 44));
        assert_eq!(bounds, Rect::from_min_max(Pos2::new(512.0, 512.0), Pos2::new(600.0, 600.0)));
        assert_eq!(px.get_pixel(10, 10), &image::Rgba([10, 20, 30, 255]));
        let (b0, p0) = slice_tile(&src, &levels[0], 0, 2, 256);
        assert_eq!(p0.dimensions(), (256, 88));
        assert_eq!(b0.min, Pos2::new(0.0, 512.0));
    }
}
