// ============================================================================
// COMPOSITOR — software rasteriser for frames built with SoftwareTextures
// ============================================================================
//
// Used by the headless `render` command and by tests. The output buffer is
// treated as premultiplied RGBA while drawing; the background is opaque, so
// the finished image is opaque and the two representations coincide.

use std::ops::Range;
use std::sync::Arc;

use ab_glyph::{Font, FontArc, ScaleFont, point};
use egui::{Color32, Pos2, Rect, Vec2};
use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use super::frame::{DrawCmd, Frame, Stroke};
use super::strokes::segment_distance;
use super::style;
use crate::geometry::{ViewTransform, image_to_screen, screen_to_image};
use crate::log_warn;

pub struct Compositor {
    font: Option<FontArc>,
    background: Color32,
}

impl Compositor {
    /// Compositor with the system sans-serif font for labels.
    pub fn new() -> Self {
        let font = load_label_font();
        if font.is_none() {
            log_warn!("no system font found, labels will not be drawn");
        }
        Self::with_font(font)
    }

    pub fn with_font(font: Option<FontArc>) -> Self {
        Self {
            font,
            background: style::BACKGROUND,
        }
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    /// Rasterise `frame` at its canvas size.
    pub fn compose(&self, frame: &Frame<Arc<RgbaImage>>) -> RgbaImage {
        let w = frame.canvas.x.round().max(0.0) as u32;
        let h = frame.canvas.y.round().max(0.0) as u32;
        let mut out = RgbaImage::from_pixel(w, h, Rgba(self.background.to_array()));
        if w == 0 || h == 0 {
            return out;
        }
        draw_tiles(&mut out, frame);
        for cmd in frame.commands() {
            self.draw_cmd(&mut out, cmd, &frame.transform);
        }
        out
    }

    fn draw_cmd(&self, out: &mut RgbaImage, cmd: &DrawCmd, t: &ViewTransform) {
        let to_screen = |p: Pos2| image_to_screen(p, t);
        match cmd {
            DrawCmd::Rect { rect, fill, stroke } => {
                let r = Rect::from_two_pos(to_screen(rect.min), to_screen(rect.max));
                if let Some(color) = fill {
                    fill_rect(out, r, *color);
                }
                if let Some(s) = stroke {
                    stroke_rect(out, r, s.width * t.scale, s.color);
                }
            }
            DrawCmd::Line { from, to, stroke } => {
                draw_path(out, &[to_screen(*from), to_screen(*to)], scaled(*stroke, t.scale));
            }
            DrawCmd::Path { points, stroke } => {
                let pts: Vec<Pos2> = points.iter().map(|p| to_screen(*p)).collect();
                draw_path(out, &pts, scaled(*stroke, t.scale));
            }
            DrawCmd::Circle {
                center,
                radius,
                fill,
                stroke,
            } => {
                let c = to_screen(*center);
                let r = radius * t.scale;
                if let Some(color) = fill {
                    draw_circle(out, c, r, None, *color);
                }
                if let Some(s) = stroke {
                    draw_circle(out, c, r, Some(s.width * t.scale), s.color);
                }
            }
            DrawCmd::Label { pos, text, size, color } => {
                if let Some(ref font) = self.font {
                    draw_label(out, font, to_screen(*pos), text, size * t.scale, *color);
                }
            }
            DrawCmd::Raster { rect, image, opacity } => {
                let r = Rect::from_two_pos(to_screen(rect.min), to_screen(rect.max));
                draw_raster(out, r, image, *opacity);
            }
        }
    }
}

impl Default for Compositor {
    fn default() -> Self {
        Self::new()
    }
}

/// Find a sans-serif system font for box labels.
pub fn load_label_font() -> Option<FontArc> {
    use font_kit::family_name::FamilyName;
    use font_kit::properties::{Properties, Weight};
    use font_kit::source::SystemSource;

    let mut props = Properties::new();
    props.weight = Weight::MEDIUM;
    let handle = SystemSource::new()
        .select_best_match(&[FamilyName::SansSerif], &props)
        .ok()?;
    let font = handle.load().ok()?;
    let data = font.copy_font_data()?;
    FontArc::try_from_vec((*data).clone()).ok()
}

// ============================================================================
// PIXEL HELPERS
// ============================================================================

fn scaled(stroke: Stroke, scale: f32) -> Stroke {
    Stroke::new(stroke.width * scale, stroke.color)
}

/// Source-over blend of a premultiplied colour at `coverage`.
fn blend(px: &mut Rgba<u8>, color: [u8; 4], coverage: f32) {
    let coverage = coverage.clamp(0.0, 1.0);
    let a = color[3] as f32 / 255.0 * coverage;
    if a <= 0.0 {
        return;
    }
    for i in 0..4 {
        let v = color[i] as f32 * coverage + px.0[i] as f32 * (1.0 - a);
        px.0[i] = v.round().clamp(0.0, 255.0) as u8;
    }
}

fn premultiply(p: &Rgba<u8>, opacity: f32) -> [u8; 4] {
    let a = p.0[3] as f32 / 255.0 * opacity;
    [
        (p.0[0] as f32 * a).round() as u8,
        (p.0[1] as f32 * a).round() as u8,
        (p.0[2] as f32 * a).round() as u8,
        (a * 255.0).round() as u8,
    ]
}

/// Pixel indices whose centres may fall within `[lo, hi]`, clipped to `0..limit`.
fn span(lo: f32, hi: f32, limit: u32) -> Range<u32> {
    if !(lo.is_finite() && hi.is_finite()) {
        return 0..0;
    }
    let start = lo.floor().max(0.0).min(limit as f32) as u32;
    let end = hi.ceil().max(0.0).min(limit as f32) as u32;
    start..end
}

fn center(x: u32, y: u32) -> Pos2 {
    Pos2::new(x as f32 + 0.5, y as f32 + 0.5)
}

// ============================================================================
// LAYERS
// ============================================================================

fn draw_tiles(out: &mut RgbaImage, frame: &Frame<Arc<RgbaImage>>) {
    if frame.tiles.is_empty() {
        return;
    }
    let w = out.width() as usize;
    let t = frame.transform;
    out.par_chunks_mut(w * 4).enumerate().for_each(|(row, px)| {
        for col in 0..w {
            let image_pt = screen_to_image(center(col as u32, row as u32), &t);
            let src = frame.unrotate_image_point(image_pt);
            // later tiles win where a fallback level overlaps
            let Some(tile) = frame.tiles.iter().rev().find(|tile| tile.bounds.contains(src)) else {
                continue;
            };
            let tex = &tile.texture;
            let (tw, th) = tex.dimensions();
            if tw == 0 || th == 0 || tile.bounds.width() <= 0.0 || tile.bounds.height() <= 0.0 {
                continue;
            }
            let u = ((src.x - tile.bounds.min.x) / tile.bounds.width() * tw as f32) as u32;
            let v = ((src.y - tile.bounds.min.y) / tile.bounds.height() * th as f32) as u32;
            let color = premultiply(tex.get_pixel(u.min(tw - 1), v.min(th - 1)), 1.0);
            let slot = &mut px[col * 4..col * 4 + 4];
            let mut dst = Rgba([slot[0], slot[1], slot[2], slot[3]]);
            blend(&mut dst, color, 1.0);
            slot.copy_from_slice(&dst.0);
        }
    });
}

fn fill_rect(out: &mut RgbaImage, r: Rect, color: Color32) {
    let (w, h) = out.dimensions();
    let c = color.to_array();
    for y in span(r.min.y, r.max.y, h) {
        for x in span(r.min.x, r.max.x, w) {
            if r.contains(center(x, y)) {
                blend(out.get_pixel_mut(x, y), c, 1.0);
            }
        }
    }
}

fn stroke_rect(out: &mut RgbaImage, r: Rect, width: f32, color: Color32) {
    let (w, h) = out.dimensions();
    let half = width.max(1.0) / 2.0;
    let outer = r.expand(half);
    let inner = r.shrink(half);
    let c = color.to_array();
    for y in span(outer.min.y, outer.max.y, h) {
        for x in span(outer.min.x, outer.max.x, w) {
            let p = center(x, y);
            if outer.contains(p) && !(inner.is_positive() && inner.contains(p)) {
                blend(out.get_pixel_mut(x, y), c, 1.0);
            }
        }
    }
}

/// Round-capped polyline. Coverage is the union over segments, so joints
/// and self-overlaps are not double-blended.
fn draw_path(out: &mut RgbaImage, points: &[Pos2], stroke: Stroke) {
    if points.is_empty() || points.iter().any(|p| !(p.x.is_finite() && p.y.is_finite())) {
        return;
    }
    let (w, h) = out.dimensions();
    let half = stroke.width.max(1.0) / 2.0;
    let mut bb = Rect::NOTHING;
    for p in points {
        bb.extend_with(*p);
    }
    let bb = bb.expand(half + 1.0);
    let c = stroke.color.to_array();
    let segments: Vec<(Pos2, Pos2)> = if points.len() == 1 {
        vec![(points[0], points[0])]
    } else {
        points.windows(2).map(|s| (s[0], s[1])).collect()
    };
    for y in span(bb.min.y, bb.max.y, h) {
        for x in span(bb.min.x, bb.max.x, w) {
            let p = center(x, y);
            let d = segments
                .iter()
                .map(|&(a, b)| segment_distance(p, a, b))
                .fold(f32::INFINITY, f32::min);
            let coverage = half - d + 0.5;
            if coverage > 0.0 {
                blend(out.get_pixel_mut(x, y), c, coverage);
            }
        }
    }
}

/// Filled disc, or a ring of `ring_width` when given.
fn draw_circle(out: &mut RgbaImage, c: Pos2, radius: f32, ring_width: Option<f32>, color: Color32) {
    if !(c.x.is_finite() && c.y.is_finite() && radius.is_finite()) || radius < 0.0 {
        return;
    }
    let (w, h) = out.dimensions();
    let reach = radius + ring_width.unwrap_or(0.0) + 1.0;
    let col = color.to_array();
    for y in span(c.y - reach, c.y + reach, h) {
        for x in span(c.x - reach, c.x + reach, w) {
            let d = (center(x, y) - c).length();
            let coverage = match ring_width {
                None => radius - d + 0.5,
                Some(rw) => rw.max(1.0) / 2.0 - (d - radius).abs() + 0.5,
            };
            if coverage > 0.0 {
                blend(out.get_pixel_mut(x, y), col, coverage);
            }
        }
    }
}

fn draw_label(out: &mut RgbaImage, font: &FontArc, top_left: Pos2, text: &str, size_px: f32, color: Color32) {
    if !(size_px.is_finite() && size_px >= 1.0) {
        return;
    }
    let (w, h) = out.dimensions();
    let scaled = font.as_scaled(size_px);
    let baseline = top_left.y + scaled.ascent();
    let c = color.to_array();
    let mut caret = top_left.x;
    let mut prev = None;
    for ch in text.chars() {
        let id = font.glyph_id(ch);
        if let Some(p) = prev {
            caret += scaled.kern(p, id);
        }
        let glyph = id.with_scale_and_position(size_px, point(caret, baseline));
        caret += scaled.h_advance(id);
        prev = Some(id);
        let Some(outlined) = font.outline_glyph(glyph) else {
            continue;
        };
        let bounds = outlined.px_bounds();
        outlined.draw(|gx, gy, coverage| {
            let x = bounds.min.x as i32 + gx as i32;
            let y = bounds.min.y as i32 + gy as i32;
            if x >= 0 && y >= 0 && (x as u32) < w && (y as u32) < h {
                blend(out.get_pixel_mut(x as u32, y as u32), c, coverage);
            }
        });
    }
}

fn draw_raster(out: &mut RgbaImage, r: Rect, layer: &RgbaImage, opacity: f32) {
    let (lw, lh) = layer.dimensions();
    if lw == 0 || lh == 0 || !(r.width() > 0.0 && r.height() > 0.0) {
        return;
    }
    let (w, h) = out.dimensions();
    let size = Vec2::new(r.width(), r.height());
    for y in span(r.min.y, r.max.y, h) {
        for x in span(r.min.x, r.max.x, w) {
            let p = center(x, y);
            if !r.contains(p) {
                continue;
            }
            let u = (((p.x - r.min.x) / size.x * lw as f32) as u32).min(lw - 1);
            let v = (((p.y - r.min.y) / size.y * lh as f32) as u32).min(lh - 1);
            let c = premultiply(layer.get_pixel(u, v), opacity);
            blend(out.get_pixel_mut(x, y), c, 1.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::frame::TileSprite;
    use crate::tiles::TileId;

    fn frame(w: f32, h: f32) -> Frame<Arc<RgbaImage>> {
        Frame {
            canvas: Vec2::new(w, h),
            ..Default::default()
        }
    }

    fn tile(bounds: Rect, image: RgbaImage) -> TileSprite<Arc<RgbaImage>> {
        TileSprite {
            id: TileId::new(0, 0, 0),
            bounds,
            texture: Arc::new(image),
        }
    }

    const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

    #[test]
    fn empty_frame_is_background() {
        let img = Compositor::with_font(None).compose(&frame(4.0, 3.0));
        assert_eq!(img.dimensions(), (4, 3));
        assert!(img.pixels().all(|p| *p == WHITE));
    }

    #[test]
    fn tiles_follow_the_view_transform() {
        let mut f = frame(20.0, 20.0);
        f.transform = ViewTransform::new(2.0, 0.0, 0.0);
        let red = RgbaImage::from_pixel(10, 10, Rgba([255, 0, 0, 255]));
        f.tiles.push(tile(Rect::from_min_size(Pos2::ZERO, Vec2::splat(5.0)), red));
        let img = Compositor::with_font(None).compose(&f);
        assert_eq!(*img.get_pixel(9, 9), Rgba([255, 0, 0, 255]));
        assert_eq!(*img.get_pixel(11, 11), WHITE);
    }

    #[test]
    fn rotation_turns_the_image_about_its_centre() {
        let mut f = frame(10.0, 10.0);
        f.rotation = std::f32::consts::PI;
        f.pivot = Pos2::new(5.0, 5.0);
        let half = RgbaImage::from_fn(10, 10, |x, _| if x < 5 { Rgba([255, 0, 0, 255]) } else { Rgba([0, 0, 255, 255]) });
        f.tiles.push(tile(Rect::from_min_size(Pos2::ZERO, Vec2::splat(10.0)), half));
        let img = Compositor::with_font(None).compose(&f);
        assert_eq!(*img.get_pixel(2, 5), Rgba([0, 0, 255, 255]));
        assert_eq!(*img.get_pixel(7, 5), Rgba([255, 0, 0, 255]));
    }

    #[test]
    fn rect_stroke_straddles_the_outline() {
        let mut f = frame(20.0, 20.0);
        f.boxes.push(DrawCmd::Rect {
            rect: Rect::from_min_max(Pos2::new(5.0, 5.0), Pos2::new(15.0, 15.0)),
            fill: None,
            stroke: Some(Stroke::new(2.0, Color32::BLACK)),
        });
        let img = Compositor::with_font(None).compose(&f);
        assert_eq!(*img.get_pixel(4, 10), Rgba([0, 0, 0, 255]));
        assert_eq!(*img.get_pixel(5, 10), Rgba([0, 0, 0, 255]));
        assert_eq!(*img.get_pixel(10, 10), WHITE);
        assert_eq!(*img.get_pixel(3, 10), WHITE);
    }

    #[test]
    fn translucent_fill_blends_over_background() {
        let mut f = frame(8.0, 8.0);
        f.overlay.push(DrawCmd::Rect {
            rect: Rect::from_min_size(Pos2::ZERO, Vec2::splat(8.0)),
            fill: Some(Color32::from_rgba_premultiplied(0, 0, 0, 128)),
            stroke: None,
        });
        let img = Compositor::with_font(None).compose(&f);
        let p = img.get_pixel(3, 3);
        assert!((126..=128).contains(&p[0]), "{:?}", p);
        assert_eq!(p[3], 255);
    }

    #[test]
    fn raster_layer_is_faded_by_opacity() {
        let mut f = frame(6.0, 6.0);
        f.overlay.push(DrawCmd::Raster {
            rect: Rect::from_min_size(Pos2::ZERO, Vec2::splat(6.0)),
            image: Arc::new(RgbaImage::from_pixel(2, 2, Rgba([0, 255, 0, 255]))),
            opacity: 0.5,
        });
        let img = Compositor::with_font(None).compose(&f);
        let p = img.get_pixel(4, 1);
        assert!((126..=129).contains(&p[0]), "{:?}", p);
        assert_eq!(p[1], 255);
    }

    #[test]
    fn path_and_circle_cover_their_centres() {
        let mut f = frame(30.0, 30.0);
        f.overlay.push(DrawCmd::Path {
            points: vec![Pos2::new(2.0, 5.0), Pos2::new(28.0, 5.0)],
            stroke: Stroke::new(4.0, Color32::RED),
        });
        f.overlay.push(DrawCmd::Circle {
            center: Pos2::new(15.0, 20.0),
            radius: 4.0,
            fill: Some(Color32::BLUE),
            stroke: None,
        });
        let img = Compositor::with_font(None).compose(&f);
        assert_eq!(*img.get_pixel(15, 5), Rgba([255, 0, 0, 255]));
        assert_eq!(*img.get_pixel(15, 12), WHITE);
        assert_eq!(*img.get_pixel(15, 20), Rgba([0, 0, 255, 255]));
        assert_eq!(*img.get_pixel(15, 27), WHITE);
    }

    #[test]
    fn labels_without_a_font_are_skipped() {
        let mut f = frame(10.0, 10.0);
        f.boxes.push(DrawCmd::Label {
            pos: Pos2::new(1.0, 1.0),
            text: "a".into(),
            size: 16.0,
            color: Color32::BLACK,
        });
        let img = Compositor::with_font(None).compose(&f);
        assert!(img.pixels().all(|p| *p == WHITE));
    }
}
