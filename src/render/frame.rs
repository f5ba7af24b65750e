// ============================================================================
// FRAME — layered display list produced by one render pass
// ============================================================================
//
// All geometry is in image space; stroke widths and label sizes are already
// divided by the zoom, so a presenter only has to apply the view transform.

use std::sync::Arc;

use egui::{Color32, Pos2, Rect, Vec2};
use image::RgbaImage;

use crate::geometry::ViewTransform;
use crate::tiles::TileId;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Stroke {
    pub width: f32,
    pub color: Color32,
}

impl Stroke {
    pub fn new(width: f32, color: Color32) -> Self {
        Self { width, color }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum DrawCmd {
    Rect {
        rect: Rect,
        fill: Option<Color32>,
        stroke: Option<Stroke>,
    },
    Line {
        from: Pos2,
        to: Pos2,
        stroke: Stroke,
    },
    /// Round-capped, round-joined path; overlapping segments do not stack.
    Path {
        points: Vec<Pos2>,
        stroke: Stroke,
    },
    Circle {
        center: Pos2,
        radius: f32,
        fill: Option<Color32>,
        stroke: Option<Stroke>,
    },
    /// Text whose top-left corner sits at `pos`.
    Label {
        pos: Pos2,
        text: String,
        size: f32,
        color: Color32,
    },
    /// A pre-rasterised layer stretched over `rect`.
    Raster {
        rect: Rect,
        image: Arc<RgbaImage>,
        opacity: f32,
    },
}

/// A tile ready to be drawn with its texture handle.
#[derive(Clone, Debug)]
pub struct TileSprite<H> {
    pub id: TileId,
    pub bounds: Rect,
    pub texture: H,
}

/// Output of `Renderer::render`. Layers are drawn bottom to top:
/// tiles, boxes, guides, overlay.
#[derive(Clone, Debug)]
pub struct Frame<H> {
    pub transform: ViewTransform,
    /// Canvas size in screen pixels.
    pub canvas: Vec2,
    /// Image layer rotation (radians) about `pivot`.
    pub rotation: f32,
    pub pivot: Pos2,
    pub tiles: Vec<TileSprite<H>>,
    pub boxes: Vec<DrawCmd>,
    pub guides: Vec<DrawCmd>,
    pub overlay: Vec<DrawCmd>,
}

impl<H> Default for Frame<H> {
    fn default() -> Self {
        Self {
            transform: ViewTransform::default(),
            canvas: Vec2::ZERO,
            rotation: 0.0,
            pivot: Pos2::ZERO,
            tiles: Vec::new(),
            boxes: Vec::new(),
            guides: Vec::new(),
            overlay: Vec::new(),
        }
    }
}

impl<H> Frame<H> {
    /// Vector layers in draw order.
    pub fn commands(&self) -> impl Iterator<Item = &DrawCmd> {
        self.boxes.iter().chain(&self.guides).chain(&self.overlay)
    }

    /// Where an image-space point of the (unrotated) source ends up once
    /// the image layer rotation is applied.
    pub fn rotate_image_point(&self, p: Pos2) -> Pos2 {
        rotate_about(p, self.pivot, self.rotation)
    }

    /// Inverse of `rotate_image_point`.
    pub fn unrotate_image_point(&self, p: Pos2) -> Pos2 {
        rotate_about(p, self.pivot, -self.rotation)
    }
}

pub fn rotate_about(p: Pos2, pivot: Pos2, angle: f32) -> Pos2 {
    if angle == 0.0 {
        return p;
    }
    let (sin, cos) = angle.sin_cos();
    let d = p - pivot;
    pivot + Vec2::new(d.x * cos - d.y * sin, d.x * sin + d.y * cos)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_round_trips_about_pivot() {
        let frame: Frame<()> = Frame {
            rotation: 0.7,
            pivot: Pos2::new(50.0, 40.0),
            ..Default::default()
        };
        let p = Pos2::new(120.0, -3.0);
        let back = frame.unrotate_image_point(frame.rotate_image_point(p));
        assert!((back - p).length() < 1e-3);
        let quarter = rotate_about(Pos2::new(60.0, 40.0), Pos2::new(50.0, 40.0), std::f32::consts::FRAC_PI_2);
        assert!((quarter - Pos2::new(50.0, 50.0)).length() < 1e-4);
    }
}
