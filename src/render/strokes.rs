// ============================================================================
// BRUSH STROKES — flatten completed strokes into one cached raster layer
// ============================================================================
//
// Completed strokes are rasterised together at full opacity (so crossings
// don't darken) and the layer is faded once when drawn. The raster is
// memoised on a structural signature of the stroke set; pan and zoom reuse it,
// and only a change to the strokes themselves re-rasterises.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use egui::{Color32, Pos2, Rect, Vec2};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

/// Longest edge of the cached layer. Larger stroke sets are rasterised at
/// reduced resolution and stretched back over their bounds.
pub const MAX_LAYER_SIDE: u32 = 2048;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct BrushStroke {
    pub points: Vec<Pos2>,
    /// Brush diameter. `None` uses the overlay's brush size.
    pub size: Option<f32>,
}

impl BrushStroke {
    pub fn new(points: Vec<Pos2>, size: Option<f32>) -> Self {
        Self { points, size }
    }
}

/// A flattened stroke raster and the image-space rect it covers.
#[derive(Clone, Debug)]
pub struct StrokeLayer {
    pub bounds: Rect,
    pub image: Arc<RgbaImage>,
}

#[derive(Default)]
pub struct StrokeCache {
    signature: Option<u64>,
    layer: Option<StrokeLayer>,
    rasterized: u64,
}

impl StrokeCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layer for `strokes`, re-rasterised only when their signature changed.
    /// An empty set drops the cache.
    pub fn layer_for(&mut self, strokes: &[BrushStroke], default_size: f32, color: Color32) -> Option<StrokeLayer> {
        if strokes.iter().all(|s| s.points.is_empty()) {
            self.invalidate();
            return None;
        }
        let sig = signature(strokes, default_size, color);
        if self.signature != Some(sig) {
            self.layer = rasterize(strokes, default_size, color);
            self.signature = Some(sig);
            self.rasterized += 1;
        }
        self.layer.clone()
    }

    pub fn invalidate(&mut self) {
        self.signature = None;
        self.layer = None;
    }

    /// How many times a layer was actually rasterised.
    pub fn rasterize_count(&self) -> u64 {
        self.rasterized
    }
}

fn signature(strokes: &[BrushStroke], default_size: f32, color: Color32) -> u64 {
    let mut h = DefaultHasher::new();
    default_size.to_bits().hash(&mut h);
    color.to_array().hash(&mut h);
    strokes.len().hash(&mut h);
    for s in strokes {
        s.size.map(f32::to_bits).hash(&mut h);
        s.points.len().hash(&mut h);
        for p in &s.points {
            p.x.to_bits().hash(&mut h);
            p.y.to_bits().hash(&mut h);
        }
    }
    h.finish()
}

/// Capsule `(a, b, radius)`; a single-point stroke is a zero-length capsule.
type Capsule = (Pos2, Pos2, f32);

fn capsules(strokes: &[BrushStroke], default_size: f32) -> Vec<Capsule> {
    let mut out = Vec::new();
    for s in strokes {
        let radius = s.size.unwrap_or(default_size).max(0.0) * 0.5;
        let pts: Vec<Pos2> = s.points.iter().copied().filter(|p| p.x.is_finite() && p.y.is_finite()).collect();
        match pts.len() {
            0 => {}
            1 => out.push((pts[0], pts[0], radius)),
            _ => out.extend(pts.windows(2).map(|w| (w[0], w[1], radius))),
        }
    }
    out
}

/// Distance from `p` to segment `ab`.
pub fn segment_distance(p: Pos2, a: Pos2, b: Pos2) -> f32 {
    let ab = b - a;
    let len_sq = ab.length_sq();
    if len_sq <= f32::EPSILON {
        return (p - a).length();
    }
    let t = ((p - a).dot(ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).length()
}

/// Rasterise `strokes` into a straight-alpha RGBA layer.
pub fn rasterize(strokes: &[BrushStroke], default_size: f32, color: Color32) -> Option<StrokeLayer> {
    let caps = capsules(strokes, default_size);
    if caps.is_empty() {
        return None;
    }

    let mut min = Pos2::new(f32::INFINITY, f32::INFINITY);
    let mut max = Pos2::new(f32::NEG_INFINITY, f32::NEG_INFINITY);
    for &(a, b, r) in &caps {
        min = min.min(a.min(b) - Vec2::splat(r + 1.0));
        max = max.max(a.max(b) + Vec2::splat(r + 1.0));
    }
    let bounds = Rect::from_min_max(min, max);
    let (bw, bh) = (bounds.width(), bounds.height());
    if !(bw > 0.0 && bh > 0.0) {
        return None;
    }

    let density = (MAX_LAYER_SIDE as f32 / bw.max(bh)).min(1.0);
    let w = ((bw * density).ceil() as u32).clamp(1, MAX_LAYER_SIDE);
    let h = ((bh * density).ceil() as u32).clamp(1, MAX_LAYER_SIDE);
    let [r, g, b, _] = color.to_srgba_unmultiplied();
    let mut image = RgbaImage::from_pixel(w, h, Rgba([r, g, b, 0]));
    // One layer pixel spans `1 / density` image units.
    let unit = 1.0 / density;

    image
        .par_chunks_mut(w as usize * 4)
        .enumerate()
        .for_each(|(row, px)| {
            let y = bounds.min.y + (row as f32 + 0.5) * unit;
            for &(a, b, radius) in &caps {
                let reach = radius + unit;
                if y < a.y.min(b.y) - reach || y > a.y.max(b.y) + reach {
                    continue;
                }
                let x0 = (((a.x.min(b.x) - reach - bounds.min.x) / unit).floor().max(0.0)) as usize;
                let x1 = (((a.x.max(b.x) + reach - bounds.min.x) / unit).ceil() as usize).min(w as usize);
                for col in x0..x1 {
                    let x = bounds.min.x + (col as f32 + 0.5) * unit;
                    let d = segment_distance(Pos2::new(x, y), a, b);
                    // one layer pixel of antialiasing at the rim
                    let coverage = ((radius - d) / unit + 0.5).clamp(0.0, 1.0);
                    let alpha = (coverage * 255.0).round() as u8;
                    let slot = &mut px[col * 4 + 3];
                    if alpha > *slot {
                        *slot = alpha;
                    }
                }
            }
        });

    Some(StrokeLayer {
        bounds,
        image: Arc::new(image),
    })
}
