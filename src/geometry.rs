// ============================================================================
// COORDINATE TRANSFORM — screen space <-> image space under pan/zoom
// ============================================================================
//
// The view is a uniform scale followed by a translation:
//
//   screen = image * scale + translate
//   image  = (screen - translate) / scale
//
// Nothing here clamps. Points outside the image map to points outside the
// image and callers decide what is valid.

use egui::{Pos2, Rect, Vec2};

/// Smallest and largest zoom factors the interactive helpers will produce.
pub const MIN_ZOOM: f32 = 0.01;
pub const MAX_ZOOM: f32 = 100.0;

/// Uniform-scale + translation view transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ViewTransform {
    pub scale: f32,
    /// Pan offset in screen pixels.
    pub translate: Vec2,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            scale: 1.0,
            translate: Vec2::ZERO,
        }
    }
}

impl ViewTransform {
    pub fn new(scale: f32, translate_x: f32, translate_y: f32) -> Self {
        Self {
            scale,
            translate: Vec2::new(translate_x, translate_y),
        }
    }
}

pub fn screen_to_image(screen: Pos2, transform: &ViewTransform) -> Pos2 {
    Pos2::new(
        (screen.x - transform.translate.x) / transform.scale,
        (screen.y - transform.translate.y) / transform.scale,
    )
}

pub fn image_to_screen(image: Pos2, transform: &ViewTransform) -> Pos2 {
    Pos2::new(
        image.x * transform.scale + transform.translate.x,
        image.y * transform.scale + transform.translate.y,
    )
}

/// Region of image space covered by a `canvas_w × canvas_h` screen.
/// The origin goes negative when the view is panned past the image edge.
pub fn viewport_bounds(canvas_w: f32, canvas_h: f32, transform: &ViewTransform) -> Rect {
    let top_left = screen_to_image(Pos2::ZERO, transform);
    let bottom_right = screen_to_image(Pos2::new(canvas_w, canvas_h), transform);
    Rect::from_min_max(top_left, bottom_right)
}

/// Grow `rect` by `margin` image units on every side.
pub fn expand_bounds(rect: Rect, margin: f32) -> Rect {
    Rect::from_min_max(
        Pos2::new(rect.min.x - margin, rect.min.y - margin),
        Pos2::new(rect.max.x + margin, rect.max.y + margin),
    )
}

/// Edge-inclusive overlap test (touching rectangles intersect).
pub fn intersects(rect: Rect, viewport: Rect) -> bool {
    !(rect.max.x < viewport.min.x
        || rect.min.x > viewport.max.x
        || rect.max.y < viewport.min.y
        || rect.min.y > viewport.max.y)
}

/// Pick the pyramid level for a zoom factor.
///
/// Zoom 1.0 and above renders full resolution (level 0); each halving of the
/// zoom steps one level coarser, capped at the deepest level.
pub fn calculate_lod(zoom: f32, max_levels: usize) -> usize {
    let deepest = max_levels.saturating_sub(1);
    if zoom >= 1.0 {
        return 0;
    }
    if !zoom.is_finite() || zoom <= 0.0 {
        return deepest;
    }
    let level = (-zoom.log2()).floor() as usize;
    level.min(deepest)
}

/// A finite segment produced by extending a guide line.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineSegment {
    pub start: Pos2,
    pub end: Pos2,
}

/// Intersect the infinite line through `center` at `angle_rad` with the edges
/// of `[0, width] × [0, height]`.
///
/// Returns the two extreme crossings ordered along the line direction. When
/// fewer than two crossings exist (parallel line outside the rectangle) the
/// line is extended by `2 * max(width, height)` each way from `center`
/// instead, so the result is always finite.
pub fn extend_line_to_edges(center: Pos2, angle_rad: f32, width: f32, height: f32) -> LineSegment {
    let cos = angle_rad.cos();
    let sin = angle_rad.sin();
    // (point, signed distance along the direction)
    let mut hits: Vec<(Pos2, f32)> = Vec::with_capacity(4);

    if cos != 0.0 {
        let t = -center.x / cos;
        let y = center.y + t * sin;
        if (0.0..=height).contains(&y) {
            hits.push((Pos2::new(0.0, y), t));
        }
        let t = (width - center.x) / cos;
        let y = center.y + t * sin;
        if (0.0..=height).contains(&y) {
            hits.push((Pos2::new(width, y), t));
        }
    }

    if sin != 0.0 {
        let t = -center.y / sin;
        let x = center.x + t * cos;
        if (0.0..=width).contains(&x) {
            hits.push((Pos2::new(x, 0.0), t));
        }
        let t = (height - center.y) / sin;
        let x = center.x + t * cos;
        if (0.0..=width).contains(&x) {
            hits.push((Pos2::new(x, height), t));
        }
    }

    hits.sort_by(|a, b| a.1.total_cmp(&b.1));

    if hits.len() >= 2 {
        return LineSegment {
            start: hits[0].0,
            end: hits[hits.len() - 1].0,
        };
    }

    let extend = width.max(height) * 2.0;
    LineSegment {
        start: Pos2::new(center.x - cos * extend, center.y - sin * extend),
        end: Pos2::new(center.x + cos * extend, center.y + sin * extend),
    }
}

/// Zoom by `factor` while keeping the screen point `anchor` over the same
/// image point (mouse-wheel zoom).
pub fn zoom_around(transform: &ViewTransform, factor: f32, anchor: Pos2) -> ViewTransform {
    let new_scale = (transform.scale * factor).clamp(MIN_ZOOM, MAX_ZOOM);
    let image_anchor = screen_to_image(anchor, transform);
    ViewTransform {
        scale: new_scale,
        translate: Vec2::new(
            anchor.x - image_anchor.x * new_scale,
            anchor.y - image_anchor.y * new_scale,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Pos2, b: Pos2) -> bool {
        (a.x - b.x).abs() < 1e-3 && (a.y - b.y).abs() < 1e-3
    }

    #[test]
    fn screen_image_round_trip() {
        let transforms = [
            ViewTransform::new(1.0, 0.0, 0.0),
            ViewTransform::new(0.37, -120.5, 44.0),
            ViewTransform::new(4.0, 900.0, -3000.0),
            ViewTransform::new(-2.0, 10.0, 10.0),
        ];
        let points = [Pos2::new(0.0, 0.0), Pos2::new(812.25, -40.0), Pos2::new(-5.5, 2500.0)];
        for t in &transforms {
            for p in &points {
                let back = image_to_screen(screen_to_image(*p, t), t);
                assert!(
                    (back.x - p.x).abs() < 1e-2 && (back.y - p.y).abs() < 1e-2,
                    "{:?} -> {:?} under {:?}",
                    p,
                    back,
                    t
                );
            }
        }
    }

    #[test]
    fn screen_to_image_does_not_clamp() {
        let t = ViewTransform::new(2.0, 100.0, 100.0);
        let p = screen_to_image(Pos2::new(0.0, 0.0), &t);
        assert_eq!(p, Pos2::new(-50.0, -50.0));
    }

    #[test]
    fn viewport_follows_pan_and_zoom() {
        let t = ViewTransform::new(0.5, -200.0, 50.0);
        let vp = viewport_bounds(800.0, 600.0, &t);
        assert_eq!(vp.min, Pos2::new(400.0, -100.0));
        assert_eq!(vp.width(), 1600.0);
        assert_eq!(vp.height(), 1200.0);
    }

    #[test]
    fn expand_grows_symmetrically() {
        let r = Rect::from_min_size(Pos2::new(10.0, 20.0), Vec2::new(30.0, 40.0));
        let e = expand_bounds(r, 5.0);
        assert_eq!(e.min, Pos2::new(5.0, 15.0));
        assert_eq!(e.size(), Vec2::new(40.0, 50.0));
    }

    #[test]
    fn intersects_is_edge_inclusive() {
        let a = Rect::from_min_size(Pos2::ZERO, Vec2::splat(10.0));
        let touching = Rect::from_min_size(Pos2::new(10.0, 0.0), Vec2::splat(5.0));
        let apart = Rect::from_min_size(Pos2::new(10.5, 0.0), Vec2::splat(5.0));
        assert!(intersects(a, touching));
        assert!(!intersects(a, apart));
    }

    #[test]
    fn lod_steps_at_powers_of_two() {
        assert_eq!(calculate_lod(1.0, 4), 0);
        assert_eq!(calculate_lod(3.0, 4), 0);
        assert_eq!(calculate_lod(0.99, 4), 0);
        assert_eq!(calculate_lod(0.5, 4), 1);
        assert_eq!(calculate_lod(0.26, 4), 1);
        assert_eq!(calculate_lod(0.25, 4), 2);
        assert_eq!(calculate_lod(0.125, 4), 3);
        assert_eq!(calculate_lod(0.01, 4), 3);
        assert_eq!(calculate_lod(0.0, 4), 3);
    }

    #[test]
    fn lod_is_monotonic() {
        let mut prev = 0;
        let mut zoom = 8.0_f32;
        while zoom > 0.001 {
            let lod = calculate_lod(zoom, 6);
            assert!(lod >= prev, "zoom {} gave {} after {}", zoom, lod, prev);
            prev = lod;
            zoom *= 0.93;
        }
    }

    #[test]
    fn horizontal_line_spans_full_width() {
        let seg = extend_line_to_edges(Pos2::new(30.0, 40.0), 0.0, 200.0, 100.0);
        assert!(close(seg.start, Pos2::new(0.0, 40.0)));
        assert!(close(seg.end, Pos2::new(200.0, 40.0)));
    }

    #[test]
    fn vertical_line_spans_full_height() {
        let seg = extend_line_to_edges(
            Pos2::new(50.0, 50.0),
            std::f32::consts::FRAC_PI_2,
            100.0,
            100.0,
        );
        assert!(close(seg.start, Pos2::new(50.0, 0.0)));
        assert!(close(seg.end, Pos2::new(50.0, 100.0)));
    }

    #[test]
    fn sloped_line_hits_side_edges() {
        let angle = 1.0_f32.atan2(2.0);
        let seg = extend_line_to_edges(Pos2::new(50.0, 50.0), angle, 100.0, 100.0);
        assert!(close(seg.start, Pos2::new(0.0, 25.0)));
        assert!(close(seg.end, Pos2::new(100.0, 75.0)));
    }

    #[test]
    fn parallel_line_outside_falls_back_to_fixed_extension() {
        let center = Pos2::new(-50.0, 500.0);
        let seg = extend_line_to_edges(center, 0.0, 100.0, 80.0);
        assert!(seg.start.x.is_finite() && seg.end.y.is_finite());
        assert!(close(seg.start, Pos2::new(-250.0, 500.0)));
        assert!(close(seg.end, Pos2::new(150.0, 500.0)));
        assert!((seg.start.distance(center) - 200.0).abs() < 1e-3);
        assert!((seg.end.distance(center) - 200.0).abs() < 1e-3);
    }

    #[test]
    fn zoom_around_keeps_anchor_fixed() {
        let t = ViewTransform::new(1.5, 30.0, -12.0);
        let anchor = Pos2::new(400.0, 300.0);
        let before = screen_to_image(anchor, &t);
        let zoomed = zoom_around(&t, 1.2, anchor);
        let after = screen_to_image(anchor, &zoomed);
        assert!(close(before, after));
        assert!((zoomed.scale - 1.8).abs() < 1e-5);
    }
}
