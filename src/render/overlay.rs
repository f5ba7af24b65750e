// ============================================================================
// OVERLAY — transient guides and tool feedback drawn above the boxes
// ============================================================================
//
// The host replaces the whole `Overlay` whenever its tool state changes.
// Every field is optional; an absent field draws nothing.

use egui::{Color32, Pos2, Rect, Vec2};

use super::frame::{DrawCmd, Stroke};
use super::strokes::{BrushStroke, StrokeCache};
use super::style;
use crate::geometry::{LineSegment, extend_line_to_edges};

/// A persistent horizontal guide.
#[derive(Clone, Debug, PartialEq)]
pub struct Baseline {
    pub y: f32,
    pub color: Option<Color32>,
}

/// A persistent guide at an arbitrary angle.
#[derive(Clone, Debug, PartialEq)]
pub struct AngledBaseline {
    pub start: Pos2,
    pub end: Pos2,
    pub color: Option<Color32>,
}

/// Debug visualisation of resize hit areas.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Hitboxes {
    /// Circle centre and radius per corner.
    pub corners: Vec<(Pos2, f32)>,
    pub edges: Vec<Rect>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BrushCursor {
    pub center: Pos2,
    pub size: f32,
}

/// Guide preview that follows the pointer at a locked angle.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AngledGuide {
    pub pos: Pos2,
    pub angle_deg: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LineTool {
    Baseline,
    Angled,
    Rotate,
}

/// Line the user is currently dragging out.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawingLine {
    pub start: Pos2,
    pub end: Pos2,
    pub tool: LineTool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Overlay {
    pub show_hitboxes: bool,
    pub hitboxes: Option<Hitboxes>,
    pub current_box: Option<Rect>,
    pub auto_solve_regions: Vec<Rect>,
    pub current_auto_solve_region: Option<Rect>,
    pub brush_strokes: Vec<BrushStroke>,
    pub current_stroke: Vec<Pos2>,
    pub brush_size: Option<f32>,
    pub brush_cursor: Option<BrushCursor>,
    pub rotation_line: Option<LineSegment>,
    pub temp_baseline: Option<f32>,
    pub temp_angled_baseline: Option<AngledGuide>,
    pub drawing_line: Option<DrawingLine>,
}

/// Per-frame values the overlay builders need.
#[derive(Clone, Copy, Debug)]
pub struct OverlayContext {
    /// Current zoom; screen-pixel sizes are divided by it.
    pub scale: f32,
    /// Image extent used to extend guides; `NO_IMAGE_EXTENT` without an image.
    pub extent: Vec2,
    pub brush_size: f32,
    pub brush_alpha: f32,
}

impl OverlayContext {
    fn px(&self, v: f32) -> f32 {
        v / self.scale
    }
}

// ============================================================================
// GUIDES
// ============================================================================

pub fn build_guides(
    baselines: &[Baseline],
    angled: &[AngledBaseline],
    ctx: &OverlayContext,
    out: &mut Vec<DrawCmd>,
) {
    let width = ctx.px(style::GUIDE_WIDTH);
    for b in baselines {
        if !b.y.is_finite() {
            continue;
        }
        out.push(DrawCmd::Line {
            from: Pos2::new(0.0, b.y),
            to: Pos2::new(ctx.extent.x, b.y),
            stroke: Stroke::new(width, style::faded(b.color.unwrap_or(style::GUIDE), style::LINE_ALPHA)),
        });
    }
    for b in angled {
        out.push(DrawCmd::Line {
            from: b.start,
            to: b.end,
            stroke: Stroke::new(width, style::faded(b.color.unwrap_or(style::GUIDE), style::LINE_ALPHA)),
        });
    }
}

// ============================================================================
// OVERLAY
// ============================================================================

pub fn build_overlay(overlay: &Overlay, ctx: &OverlayContext, strokes: &mut StrokeCache, out: &mut Vec<DrawCmd>) {
    let hair = ctx.px(style::HAIRLINE);

    if let Some(hb) = overlay.hitboxes.as_ref().filter(|_| overlay.show_hitboxes) {
        for &(center, radius) in &hb.corners {
            out.push(DrawCmd::Circle {
                center,
                radius,
                fill: Some(style::faded(style::HITBOX_CORNER, 0.2)),
                stroke: Some(Stroke::new(hair, style::faded(style::HITBOX_CORNER, 0.5))),
            });
        }
        for &rect in &hb.edges {
            out.push(DrawCmd::Rect {
                rect,
                fill: Some(style::faded(style::HITBOX_EDGE, 0.15)),
                stroke: Some(Stroke::new(hair, style::faded(style::HITBOX_EDGE, 0.4))),
            });
        }
    }

    if let Some(rect) = overlay.current_box {
        out.push(DrawCmd::Rect {
            rect,
            fill: Some(style::faded(style::SELECTED, style::HOVER_FILL_ALPHA)),
            stroke: Some(Stroke::new(ctx.px(style::BOX_WIDTH), style::faded(style::SELECTED, style::LINE_ALPHA))),
        });
    }

    for (i, &rect) in overlay.auto_solve_regions.iter().enumerate() {
        out.push(DrawCmd::Rect {
            rect,
            fill: Some(style::faded(style::REGION_DONE, style::REGION_FILL_ALPHA)),
            stroke: Some(Stroke::new(ctx.px(style::BOX_WIDTH), style::faded(style::REGION_DONE, style::LINE_ALPHA))),
        });
        let offset = ctx.px(style::REGION_LABEL_OFFSET);
        out.push(DrawCmd::Label {
            pos: rect.min + Vec2::splat(offset),
            text: (i + 1).to_string(),
            size: ctx.px(style::LABEL_SIZE),
            color: style::REGION_DONE,
        });
    }

    if let Some(rect) = overlay
        .current_auto_solve_region
        .filter(|r| r.width() > 0.0 && r.height() > 0.0)
    {
        out.push(DrawCmd::Rect {
            rect,
            fill: Some(style::faded(style::REGION_ACTIVE, style::REGION_FILL_ALPHA)),
            stroke: Some(Stroke::new(ctx.px(style::DRAG_LINE_WIDTH), style::faded(style::REGION_ACTIVE, style::LINE_ALPHA))),
        });
    }

    build_brush(overlay, ctx, strokes, out);

    if let Some(cursor) = overlay.brush_cursor {
        out.push(DrawCmd::Circle {
            center: cursor.center,
            radius: cursor.size / 2.0,
            fill: None,
            stroke: Some(Stroke::new(ctx.px(style::BOX_WIDTH), style::BRUSH_CURSOR)),
        });
    }

    if let Some(line) = overlay.rotation_line {
        push_line_with_dots(out, line, line, style::ROTATION_LINE, ctx);
    }

    if let Some(y) = overlay.temp_baseline.filter(|y| y.is_finite()) {
        out.push(DrawCmd::Line {
            from: Pos2::new(0.0, y),
            to: Pos2::new(ctx.extent.x, y),
            stroke: Stroke::new(ctx.px(style::GUIDE_WIDTH), style::faded(style::GUIDE, style::TEMP_GUIDE_ALPHA)),
        });
    }

    if let Some(guide) = overlay.temp_angled_baseline {
        let seg = extend_line_to_edges(guide.pos, guide.angle_deg.to_radians(), ctx.extent.x, ctx.extent.y);
        out.push(DrawCmd::Line {
            from: seg.start,
            to: seg.end,
            stroke: Stroke::new(ctx.px(style::GUIDE_WIDTH), style::faded(style::GUIDE, style::TEMPLATE_GUIDE_ALPHA)),
        });
    }

    if let Some(line) = overlay.drawing_line {
        let drawn = LineSegment {
            start: line.start,
            end: line.end,
        };
        let shown = match line.tool {
            LineTool::Angled | LineTool::Rotate => extend_drawing_line(drawn, ctx.extent),
            LineTool::Baseline => drawn,
        };
        let color = match line.tool {
            LineTool::Rotate => style::ROTATE_TOOL,
            _ => style::GUIDE,
        };
        push_line_with_dots(out, shown, drawn, color, ctx);
    }
}

/// Completed strokes come from the cached raster; the stroke in progress is
/// drawn as vector path on top of it.
fn build_brush(overlay: &Overlay, ctx: &OverlayContext, strokes: &mut StrokeCache, out: &mut Vec<DrawCmd>) {
    let size = overlay.brush_size.unwrap_or(ctx.brush_size);

    if let Some(layer) = strokes.layer_for(&overlay.brush_strokes, size, style::BRUSH) {
        out.push(DrawCmd::Raster {
            rect: layer.bounds,
            image: layer.image,
            opacity: ctx.brush_alpha,
        });
    }

    let color = style::faded(style::BRUSH, ctx.brush_alpha);
    match overlay.current_stroke.as_slice() {
        [] => {}
        [p] => out.push(DrawCmd::Circle {
            center: *p,
            radius: size / 2.0,
            fill: Some(color),
            stroke: None,
        }),
        points => out.push(DrawCmd::Path {
            points: points.to_vec(),
            stroke: Stroke::new(size, color),
        }),
    }
}

/// Angled and rotate tools preview the full guide they will create.
fn extend_drawing_line(line: LineSegment, extent: Vec2) -> LineSegment {
    let d = line.end - line.start;
    if d.length() <= 1.0 {
        return line;
    }
    let center = line.start + d * 0.5;
    extend_line_to_edges(center, d.y.atan2(d.x), extent.x, extent.y)
}

fn push_line_with_dots(out: &mut Vec<DrawCmd>, shown: LineSegment, dots: LineSegment, color: Color32, ctx: &OverlayContext) {
    let color = style::faded(color, style::LINE_ALPHA);
    out.push(DrawCmd::Line {
        from: shown.start,
        to: shown.end,
        stroke: Stroke::new(ctx.px(style::DRAG_LINE_WIDTH), color),
    });
    for center in [dots.start, dots.end] {
        out.push(DrawCmd::Circle {
            center,
            radius: ctx.px(style::ENDPOINT_RADIUS),
            fill: Some(color),
            stroke: None,
        });
    }
}
