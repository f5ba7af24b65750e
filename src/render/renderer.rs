// ============================================================================
// RENDERER — dirty-flag frame composer over tiles, boxes, guides and overlay
// ============================================================================
//
// Every mutator only records state and sets `needs_render`. The host calls
// `tick()` once per display frame; at most one frame is built per tick no
// matter how many mutations arrived since the last one.
//
// Tile-cache eviction and preloading run inside `tick()` strictly after the
// frame has been built, never while a frame is collecting tile handles.

use std::sync::Arc;

use egui::{Pos2, Rect, Vec2};
use image::RgbaImage;

use super::frame::{DrawCmd, Frame, Stroke, TileSprite, rotate_about};
use super::overlay::{self, AngledBaseline, Baseline, Overlay, OverlayContext};
use super::strokes::StrokeCache;
use super::style;
use crate::boxes::{AnnotationBox, BoxUpdate};
use crate::config::RendererConfig;
use crate::error::{RenderError, Result};
use crate::geometry::{self, ViewTransform};
use crate::index::{BoxRecord, Hit, SpatialIndex};
use crate::tiles::{TextureFactory, TileId, TileManager, TileStats};
use crate::{log_info, log_warn};

/// State of the tile layer as of its last refresh.
#[derive(Clone, Copy, Debug)]
struct TileRefresh {
    viewport: Rect,
    zoom: f32,
    /// Image region the current tiles were picked for.
    covered: Rect,
}

/// Live geometry of a box being dragged or resized. The box itself is
/// hidden and this rect is drawn on top of everything else in its place.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DragPreview {
    pub index: usize,
    pub rect: Rect,
}

pub struct Renderer<F: TextureFactory> {
    config: RendererConfig,
    tiles: TileManager<F>,
    index: SpatialIndex,
    boxes: Vec<AnnotationBox>,
    baselines: Vec<Baseline>,
    angled_baselines: Vec<AngledBaseline>,
    selected: Option<usize>,
    hovered: Option<usize>,

    transform: ViewTransform,
    canvas: Vec2,
    rotation_deg: f32,

    overlay: Overlay,
    drag_preview: Option<DragPreview>,
    strokes: StrokeCache,

    needs_render: bool,
    last_refresh: Option<TileRefresh>,
    force_tile_refresh: bool,
    frame: Frame<F::Handle>,
    frames_rendered: u64,
}

impl<F: TextureFactory> Renderer<F> {
    /// Bring up a renderer for a `canvas_w × canvas_h` screen. An invalid
    /// configuration or canvas is an initialisation failure.
    pub fn new(config: RendererConfig, factory: F, canvas_w: f32, canvas_h: f32) -> Result<Self> {
        config
            .validate()
            .map_err(|e| RenderError::Init(e.to_string()))?;
        if !(canvas_w.is_finite() && canvas_h.is_finite() && canvas_w >= 0.0 && canvas_h >= 0.0) {
            return Err(RenderError::Init(format!("bad canvas size {}x{}", canvas_w, canvas_h)));
        }
        let mut index = SpatialIndex::new();
        index.edge_threshold = config.edge_threshold;
        Ok(Self {
            tiles: TileManager::new(&config, factory),
            index,
            config,
            boxes: Vec::new(),
            baselines: Vec::new(),
            angled_baselines: Vec::new(),
            selected: None,
            hovered: None,
            transform: ViewTransform::default(),
            canvas: Vec2::new(canvas_w, canvas_h),
            rotation_deg: 0.0,
            overlay: Overlay::default(),
            drag_preview: None,
            strokes: StrokeCache::new(),
            needs_render: true,
            last_refresh: None,
            force_tile_refresh: true,
            frame: Frame::default(),
            frames_rendered: 0,
        })
    }

    // ========================================================================
    // IMAGE
    // ========================================================================

    /// Replace the source image. The previous pyramid and all its textures
    /// are released before the new one is planned; generation then advances
    /// one level per `tick()`.
    pub fn load_image(&mut self, image: Arc<RgbaImage>) -> Result<()> {
        self.tiles.load_image(image)?;
        self.frame.tiles.clear();
        self.last_refresh = None;
        self.force_tile_refresh = true;
        self.request_render(None);
        Ok(())
    }

    /// Load and generate the whole pyramid before returning.
    pub fn load_image_blocking(&mut self, image: Arc<RgbaImage>) -> Result<()> {
        self.load_image(image)?;
        self.tiles.finish_generation();
        Ok(())
    }

    pub fn image_size(&self) -> (u32, u32) {
        self.tiles.image_size()
    }

    /// Rotation of the image layer in degrees, about the image centre.
    /// Boxes and overlays are not rotated.
    pub fn set_image_rotation(&mut self, degrees: f32) {
        self.rotation_deg = if degrees.is_finite() { degrees } else { 0.0 };
        self.force_tile_refresh = true;
        self.mark_dirty();
    }

    pub fn image_rotation(&self) -> f32 {
        self.rotation_deg
    }

    // ========================================================================
    // BOXES
    // ========================================================================

    /// Replace the box list and rebuild the index. Use for structural
    /// changes; per-frame drag feedback goes through `update_box`.
    pub fn set_boxes(&mut self, boxes: Vec<AnnotationBox>) {
        self.index.rebuild(&boxes);
        self.boxes = boxes;
        self.mark_dirty();
    }

    /// Patch one box and mirror the change into the index. Out-of-range
    /// indices are ignored.
    pub fn update_box(&mut self, index: usize, update: &BoxUpdate) -> bool {
        let Some(b) = self.boxes.get_mut(index) else {
            return false;
        };
        b.apply(update);
        self.index.update(b, index);
        self.mark_dirty();
        true
    }

    /// Raise a box above every other box for drawing and hit lookups.
    pub fn bring_to_front(&mut self, index: usize) -> bool {
        let raised = self.index.bring_to_front(index);
        if raised {
            self.mark_dirty();
        }
        raised
    }

    pub fn boxes(&self) -> &[AnnotationBox] {
        &self.boxes
    }

    pub fn index(&self) -> &SpatialIndex {
        &self.index
    }

    pub fn set_selected_box(&mut self, index: Option<usize>) {
        self.selected = index;
        self.mark_dirty();
    }

    /// Returns whether the hover target changed (only then is a render
    /// requested).
    pub fn set_hovered_box(&mut self, index: Option<usize>) -> bool {
        if self.hovered == index {
            return false;
        }
        self.hovered = index;
        self.mark_dirty();
        true
    }

    pub fn selected_box(&self) -> Option<usize> {
        self.selected
    }

    pub fn hovered_box(&self) -> Option<usize> {
        self.hovered
    }

    // ========================================================================
    // GUIDES + OVERLAY
    // ========================================================================

    pub fn set_baselines(&mut self, horizontal: Vec<Baseline>, angled: Vec<AngledBaseline>) {
        self.baselines = horizontal;
        self.angled_baselines = angled;
        self.mark_dirty();
    }

    /// Replace the overlay payload wholesale.
    pub fn set_overlay(&mut self, overlay: Overlay) {
        self.overlay = overlay;
        self.mark_dirty();
    }

    pub fn overlay(&self) -> &Overlay {
        &self.overlay
    }

    /// Mark the frame dirty, replacing the current drag preview.
    pub fn request_render(&mut self, drag_preview: Option<DragPreview>) {
        self.drag_preview = drag_preview;
        self.needs_render = true;
    }

    pub fn needs_render(&self) -> bool {
        self.needs_render
    }

    fn mark_dirty(&mut self) {
        self.needs_render = true;
    }

    // ========================================================================
    // VIEW
    // ========================================================================

    pub fn set_pan(&mut self, x: f32, y: f32) {
        if !(x.is_finite() && y.is_finite()) {
            log_warn!("ignoring non-finite pan {}, {}", x, y);
            return;
        }
        self.transform.translate = Vec2::new(x, y);
        self.mark_dirty();
    }

    pub fn set_zoom(&mut self, zoom: f32) {
        if !(zoom.is_finite() && zoom > 0.0) {
            log_warn!("ignoring zoom {}", zoom);
            return;
        }
        self.transform.scale = zoom;
        self.mark_dirty();
    }

    pub fn set_transform(&mut self, transform: ViewTransform) {
        self.set_zoom(transform.scale);
        self.set_pan(transform.translate.x, transform.translate.y);
    }

    pub fn transform(&self) -> ViewTransform {
        self.transform
    }

    pub fn zoom(&self) -> f32 {
        self.transform.scale
    }

    /// New canvas size in screen pixels. Forces a tile-layer refresh.
    pub fn resize(&mut self, width: f32, height: f32) {
        if !(width.is_finite() && height.is_finite() && width >= 0.0 && height >= 0.0) {
            log_warn!("ignoring canvas size {}x{}", width, height);
            return;
        }
        self.canvas = Vec2::new(width, height);
        self.force_tile_refresh = true;
        self.mark_dirty();
    }

    pub fn canvas_size(&self) -> Vec2 {
        self.canvas
    }

    /// Image-space region currently on screen.
    pub fn viewport(&self) -> Rect {
        geometry::viewport_bounds(self.canvas.x, self.canvas.y, &self.transform)
    }

    pub fn screen_to_image(&self, screen: Pos2) -> Pos2 {
        geometry::screen_to_image(screen, &self.transform)
    }

    // ========================================================================
    // HIT LOOKUPS
    // ========================================================================

    /// Top-most non-orphaned box under a screen point, with a few screen
    /// pixels of slack.
    pub fn find_box_at_point(&self, sx: f32, sy: f32) -> Option<&BoxRecord> {
        let p = self.screen_to_image(Pos2::new(sx, sy));
        let tolerance = self.config.hit_tolerance_px / self.transform.scale;
        self.index.find_box_at_point(p.x, p.y, tolerance, false)
    }

    /// Every box under a screen point, for click-through selection.
    ///
    /// With `tolerance > 0` (image units) a box also matches when the point
    /// is within `tolerance` of one of its corners or in a band of that
    /// width along one of its edges, which may lie outside the box.
    pub fn find_all_boxes_at_point(&self, sx: f32, sy: f32, tolerance: f32) -> Vec<&BoxRecord> {
        let p = self.screen_to_image(Pos2::new(sx, sy));
        if !(tolerance > 0.0) {
            return self.index.find_boxes_at_point(p.x, p.y, false);
        }
        let mut hits: Vec<&BoxRecord> = self
            .index
            .all()
            .filter(|rec| self.boxes.get(rec.id).is_some())
            .filter(|rec| near_outline(rec, p, tolerance))
            .collect();
        hits.sort_by_key(|rec| rec.z);
        hits
    }

    /// Classify a screen point against box `index` (corner, edge or inside).
    pub fn hit_test(&self, index: usize, sx: f32, sy: f32) -> Option<Hit> {
        let rec = self.index.get(index)?;
        let p = self.screen_to_image(Pos2::new(sx, sy));
        self.index.hit_test(rec, p.x, p.y, self.config.handle_size)
    }

    // ========================================================================
    // FRAME LOOP
    // ========================================================================

    /// Per-display-frame hook. Advances pyramid generation by one level,
    /// builds a frame if anything changed, then warms and trims the tile
    /// cache. Returns whether a frame was built.
    pub fn tick(&mut self) -> bool {
        if let Some(level) = self.tiles.step_generation() {
            log_info!("pyramid level {} available", level);
            self.force_tile_refresh = true;
            self.needs_render = true;
        }

        let rendered = self.needs_render;
        if rendered {
            self.render();
            self.needs_render = false;
        }

        if self.tiles.source().is_some() {
            let viewport = self.tile_query_rect(self.viewport());
            self.tiles.preload_adjacent_tiles(viewport, self.transform.scale);
            // on-screen tiles outrank whatever the preload just touched
            let on_screen: Vec<TileId> = self.frame.tiles.iter().map(|t| t.id).collect();
            self.tiles.touch(on_screen);
        }
        self.tiles.cleanup_cache();
        rendered
    }

    /// Build a frame from the current state, regardless of the dirty flag.
    pub fn render(&mut self) -> &Frame<F::Handle> {
        let viewport = self.viewport();
        let zoom = self.transform.scale;

        let needed = self.tile_query_rect(viewport);
        let stale = match self.last_refresh {
            None => true,
            Some(last) => {
                (viewport.min.x - last.viewport.min.x).abs() > self.config.refresh_distance
                    || (viewport.min.y - last.viewport.min.y).abs() > self.config.refresh_distance
                    || (zoom - last.zoom).abs() > self.config.refresh_zoom
                    || !(last.covered.contains(needed.min) && last.covered.contains(needed.max))
            }
        };
        if stale || self.force_tile_refresh {
            // Small pans between refreshes must not expose uncovered edges.
            let covered = geometry::expand_bounds(needed, self.config.refresh_distance);
            self.refresh_tiles(covered, zoom);
            self.last_refresh = Some(TileRefresh { viewport, zoom, covered });
            self.force_tile_refresh = false;
        }

        let (w, h) = self.tiles.image_size();
        self.frame.transform = self.transform;
        self.frame.canvas = self.canvas;
        self.frame.rotation = self.rotation_deg.to_radians();
        self.frame.pivot = Pos2::new(w as f32 / 2.0, h as f32 / 2.0);

        self.frame.boxes = self.build_boxes(viewport);

        let ctx = self.overlay_context();
        self.frame.guides.clear();
        overlay::build_guides(&self.baselines, &self.angled_baselines, &ctx, &mut self.frame.guides);
        self.frame.overlay.clear();
        overlay::build_overlay(&self.overlay, &ctx, &mut self.strokes, &mut self.frame.overlay);

        self.frames_rendered += 1;
        &self.frame
    }

    /// The most recently built frame.
    pub fn frame(&self) -> &Frame<F::Handle> {
        &self.frame
    }

    pub fn frames_rendered(&self) -> u64 {
        self.frames_rendered
    }

    pub fn stats(&self) -> TileStats {
        self.tiles.stats()
    }

    pub fn tile_manager(&self) -> &TileManager<F> {
        &self.tiles
    }

    pub fn tile_manager_mut(&mut self) -> &mut TileManager<F> {
        &mut self.tiles
    }

    /// Release every tile, texture and index entry. The renderer can be
    /// reused by loading a new image.
    pub fn destroy(&mut self) {
        self.tiles.destroy();
        self.index.clear();
        self.boxes.clear();
        self.baselines.clear();
        self.angled_baselines.clear();
        self.overlay = Overlay::default();
        self.drag_preview = None;
        self.selected = None;
        self.hovered = None;
        self.strokes.invalidate();
        self.frame = Frame::default();
        self.last_refresh = None;
        self.needs_render = false;
    }

    // ========================================================================
    // LAYER BUILDERS
    // ========================================================================

    /// Re-pick the tile layer for the image region `query`.
    fn refresh_tiles(&mut self, query: Rect, zoom: f32) {
        self.frame.tiles.clear();
        if self.tiles.source().is_none() {
            return;
        }
        let zoom = self.available_zoom(zoom);
        self.tiles.ensure_tiles(query, zoom);
        let visible: Vec<(TileId, Rect)> = self
            .tiles
            .get_tiles_for_viewport(query, zoom)
            .iter()
            .map(|t| (t.id, t.bounds))
            .collect();
        for (id, bounds) in visible {
            // A tile whose texture failed is left out; the frame has a gap.
            if let Some(texture) = self.tiles.get_tile_texture(id) {
                self.frame.tiles.push(TileSprite { id, bounds, texture });
            }
        }
    }

    /// While the pyramid is still being generated, fall back to the
    /// coarsest level that already exists.
    fn available_zoom(&self, zoom: f32) -> f32 {
        let generated = self.tiles.levels_generated();
        if generated == 0 || self.tiles.level_for_zoom(zoom) < generated {
            return zoom;
        }
        0.5f32.powi(generated as i32 - 1)
    }

    /// Source-image region that ends up inside `viewport` once the image
    /// layer rotation is applied.
    fn tile_query_rect(&self, viewport: Rect) -> Rect {
        if self.rotation_deg == 0.0 {
            return viewport;
        }
        let (w, h) = self.tiles.image_size();
        let pivot = Pos2::new(w as f32 / 2.0, h as f32 / 2.0);
        let angle = -self.rotation_deg.to_radians();
        let corners = [
            viewport.left_top(),
            viewport.right_top(),
            viewport.left_bottom(),
            viewport.right_bottom(),
        ];
        let mut out = Rect::NOTHING;
        for c in corners {
            out.extend_with(rotate_about(c, pivot, angle));
        }
        out
    }

    fn build_boxes(&self, viewport: Rect) -> Vec<DrawCmd> {
        let mut cmds = Vec::new();
        if self.boxes.is_empty() {
            return cmds;
        }
        let scale = self.transform.scale;
        let dragged = self.drag_preview.map(|d| d.index);

        let mut visible = self.index.search(viewport);
        visible.sort_by_key(|rec| rec.z);
        for rec in visible {
            let Some(b) = self.boxes.get(rec.id) else {
                continue;
            };
            if dragged == Some(rec.id) || b.is_degenerate() {
                continue;
            }
            let selected = self.selected == Some(rec.id);
            let hovered = self.hovered == Some(rec.id);
            push_box(&mut cmds, b.rect(), &b.character, selected, hovered, scale);
        }

        if let Some(preview) = self.drag_preview
            && let Some(b) = self.boxes.get(preview.index)
            && preview.rect.is_finite()
            && preview.rect.width() > 0.0
            && preview.rect.height() > 0.0
        {
            push_drag_preview(&mut cmds, preview.rect, &b.character, scale);
        }
        cmds
    }

    fn overlay_context(&self) -> OverlayContext {
        let (w, h) = self.tiles.image_size();
        let extent = if w == 0 || h == 0 {
            Vec2::splat(style::NO_IMAGE_EXTENT)
        } else {
            Vec2::new(w as f32, h as f32)
        };
        OverlayContext {
            scale: self.transform.scale,
            extent,
            brush_size: self.config.brush_size,
            brush_alpha: self.config.brush_alpha,
        }
    }
}

/// Corner-radius / edge-band proximity used by click-through lookups.
fn near_outline(rec: &BoxRecord, p: Pos2, tolerance: f32) -> bool {
    let corners = [
        Pos2::new(rec.min_x, rec.min_y),
        Pos2::new(rec.max_x, rec.min_y),
        Pos2::new(rec.min_x, rec.max_y),
        Pos2::new(rec.max_x, rec.max_y),
    ];
    if corners.iter().any(|c| c.distance(p) < tolerance) {
        return true;
    }
    let in_x = p.x >= rec.min_x - tolerance && p.x <= rec.max_x + tolerance;
    let in_y = p.y >= rec.min_y - tolerance && p.y <= rec.max_y + tolerance;
    (in_x && ((p.y - rec.min_y).abs() < tolerance || (p.y - rec.max_y).abs() < tolerance))
        || (in_y && ((p.x - rec.min_x).abs() < tolerance || (p.x - rec.max_x).abs() < tolerance))
}

fn push_box(cmds: &mut Vec<DrawCmd>, rect: Rect, character: &str, selected: bool, hovered: bool, scale: f32) {
    let (color, width) = if selected {
        (style::SELECTED, style::SELECTED_WIDTH)
    } else if hovered {
        (style::HOVERED, style::HOVERED_WIDTH)
    } else {
        (style::BOX, style::BOX_WIDTH)
    };
    let fill = (hovered && !selected).then(|| style::faded(style::SELECTED, style::HOVER_FILL_ALPHA));
    cmds.push(DrawCmd::Rect {
        rect,
        fill,
        stroke: Some(Stroke::new(width / scale, color)),
    });

    let size = style::LABEL_SIZE / scale;
    let pad = style::LABEL_PADDING / scale;
    if !character.is_empty() {
        let mut pos = rect.min + Vec2::splat(pad);
        // too close to the image top: put the label under the box
        if rect.min.y < size + pad + style::LABEL_CLEARANCE {
            pos.y = rect.max.y + pad;
        }
        cmds.push(DrawCmd::Label {
            pos,
            text: character.to_string(),
            size,
            color,
        });
    }

    if selected || hovered {
        push_handles(cmds, rect, color, scale);
    }
}

fn push_handles(cmds: &mut Vec<DrawCmd>, rect: Rect, color: egui::Color32, scale: f32) {
    let border = Some(Stroke::new(style::HAIRLINE / scale, style::HANDLE_BORDER));
    let corner = Vec2::splat(style::CORNER_HANDLE / scale);
    for c in [rect.left_top(), rect.right_top(), rect.left_bottom(), rect.right_bottom()] {
        cmds.push(DrawCmd::Rect {
            rect: Rect::from_center_size(c, corner),
            fill: Some(color),
            stroke: border,
        });
    }
    let long = style::EDGE_HANDLE_LONG / scale;
    let short = style::EDGE_HANDLE_SHORT / scale;
    let edges = [
        (rect.center_top(), Vec2::new(long, short)),
        (rect.center_bottom(), Vec2::new(long, short)),
        (rect.left_center(), Vec2::new(short, long)),
        (rect.right_center(), Vec2::new(short, long)),
    ];
    for (center, size) in edges {
        cmds.push(DrawCmd::Rect {
            rect: Rect::from_center_size(center, size),
            fill: Some(color),
            stroke: border,
        });
    }
}

fn push_drag_preview(cmds: &mut Vec<DrawCmd>, rect: Rect, character: &str, scale: f32) {
    cmds.push(DrawCmd::Rect {
        rect,
        fill: Some(style::faded(style::SELECTED, style::HOVER_FILL_ALPHA)),
        stroke: Some(Stroke::new(
            style::PREVIEW_WIDTH / scale,
            style::faded(style::SELECTED, style::LINE_ALPHA),
        )),
    });
    if !character.is_empty() {
        cmds.push(DrawCmd::Label {
            pos: rect.min + Vec2::splat(style::LABEL_PADDING / scale),
            text: character.to_string(),
            size: style::LABEL_SIZE / scale,
            color: style::SELECTED,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tiles::SoftwareTextures;

    fn renderer() -> Renderer<SoftwareTextures> {
        Renderer::new(RendererConfig::default(), SoftwareTextures::new(8192), 800.0, 600.0).unwrap()
    }

    fn rects(cmds: &[DrawCmd]) -> Vec<Rect> {
        cmds.iter()
            .filter_map(|c| match c {
                DrawCmd::Rect { rect, .. } => Some(*rect),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn invalid_config_is_an_init_error() {
        let cfg = RendererConfig {
            tile_size: 0,
            ..Default::default()
        };
        let err = Renderer::new(cfg, SoftwareTextures::new(64), 10.0, 10.0).err();
        assert!(matches!(err, Some(RenderError::Init(_))));
        let err = Renderer::new(RendererConfig::default(), SoftwareTextures::new(64), f32::NAN, 10.0).err();
        assert!(matches!(err, Some(RenderError::Init(_))));
    }

    #[test]
    fn mutations_coalesce_into_one_frame() {
        let mut r = renderer();
        assert!(r.tick());
        assert!(!r.tick());
        r.set_pan(10.0, 0.0);
        r.set_zoom(2.0);
        r.set_boxes(vec![AnnotationBox::new(0.0, 0.0, 10.0, 10.0, "a")]);
        assert!(r.needs_render());
        assert!(r.tick());
        assert!(!r.needs_render());
        assert!(!r.tick());
        assert_eq!(r.frames_rendered(), 2);
    }

    #[test]
    fn hover_requests_render_only_on_change() {
        let mut r = renderer();
        r.tick();
        assert!(r.set_hovered_box(Some(1)));
        r.tick();
        assert!(!r.set_hovered_box(Some(1)));
        assert!(!r.needs_render());
    }

    #[test]
    fn dragged_box_is_drawn_last_at_preview_geometry() {
        let mut r = renderer();
        r.set_boxes(vec![
            AnnotationBox::new(10.0, 100.0, 50.0, 50.0, ""),
            AnnotationBox::new(200.0, 100.0, 50.0, 50.0, ""),
        ]);
        let preview = Rect::from_min_size(Pos2::new(300.0, 300.0), Vec2::splat(40.0));
        r.request_render(Some(DragPreview { index: 0, rect: preview }));
        r.tick();
        let drawn = rects(&r.frame().boxes);
        assert_eq!(drawn.len(), 2);
        assert_eq!(drawn[0], r.boxes()[1].rect());
        assert_eq!(*drawn.last().unwrap(), preview);
    }

    #[test]
    fn degenerate_boxes_are_skipped_without_aborting_the_frame() {
        let mut r = renderer();
        r.set_boxes(vec![
            AnnotationBox::new(10.0, 100.0, 0.0, 50.0, "x"),
            AnnotationBox::new(100.0, 100.0, 20.0, 20.0, "y"),
        ]);
        r.tick();
        let drawn = rects(&r.frame().boxes);
        assert_eq!(drawn, vec![r.boxes()[1].rect()]);
    }

    #[test]
    fn selected_box_gets_handles_and_label_flips_below_near_top() {
        let mut r = renderer();
        r.set_boxes(vec![AnnotationBox::new(10.0, 2.0, 50.0, 50.0, "g")]);
        r.set_selected_box(Some(0));
        r.tick();
        let cmds = &r.frame().boxes;
        // outline + 4 corners + 4 edges
        assert_eq!(rects(cmds).len(), 9);
        let label = cmds.iter().find_map(|c| match c {
            DrawCmd::Label { pos, color, .. } => Some((*pos, *color)),
            _ => None,
        });
        assert_eq!(label, Some((Pos2::new(14.0, 56.0), style::SELECTED)));
    }

    #[test]
    fn update_box_moves_index_entry() {
        let mut r = renderer();
        r.set_boxes(vec![AnnotationBox::new(0.0, 0.0, 10.0, 10.0, "a")]);
        assert!(r.update_box(0, &BoxUpdate::position(500.0, 500.0)));
        assert!(!r.update_box(9, &BoxUpdate::position(1.0, 1.0)));
        assert!(r.find_box_at_point(5.0, 5.0).is_none());
        assert_eq!(r.find_box_at_point(505.0, 505.0).map(|b| b.id), Some(0));
    }

    #[test]
    fn screen_space_lookup_respects_zoom_and_pan() {
        let mut r = renderer();
        r.set_boxes(vec![
            AnnotationBox::new(0.0, 0.0, 100.0, 100.0, "a"),
            AnnotationBox::new(50.0, 50.0, 100.0, 100.0, "b"),
        ]);
        r.set_zoom(2.0);
        r.set_pan(100.0, 100.0);
        // screen (220, 220) is image (60, 60)
        assert_eq!(r.find_box_at_point(220.0, 220.0).map(|b| b.id), Some(1));
        let all: Vec<usize> = r.find_all_boxes_at_point(220.0, 220.0, 0.0).iter().map(|b| b.id).collect();
        assert_eq!(all, vec![0, 1]);
        assert!(r.bring_to_front(0));
        assert_eq!(r.find_box_at_point(220.0, 220.0).map(|b| b.id), Some(0));
    }

    #[test]
    fn click_through_with_tolerance_reaches_outside_corners() {
        let mut r = renderer();
        r.set_boxes(vec![
            AnnotationBox::new(0.0, 0.0, 100.0, 100.0, "a"),
            AnnotationBox::new(300.0, 300.0, 10.0, 10.0, "b"),
        ]);
        // 3 units outside the bottom-right corner of box 0
        let hits: Vec<usize> = r.find_all_boxes_at_point(102.0, 102.0, 5.0).iter().map(|b| b.id).collect();
        assert_eq!(hits, vec![0]);
        assert!(r.find_all_boxes_at_point(102.0, 102.0, 0.0).is_empty());
        assert_eq!(r.hit_test(0, 98.0, 98.0), Some(Hit::Corner(crate::index::Corner::SouthEast)));
    }

    #[test]
    fn tiles_appear_once_levels_are_generated() {
        let mut r = renderer();
        r.load_image(Arc::new(RgbaImage::new(1024, 1024))).unwrap();
        assert!(r.frame().tiles.is_empty());
        r.tick();
        assert_eq!(r.frame().tiles.len(), 4);
        assert!(r.frame().tiles.iter().all(|t| t.id.level == 0));

        // zoomed out before level 2 exists: fall back to the coarsest generated level
        r.set_zoom(0.25);
        r.tick();
        assert!(r.frame().tiles.iter().all(|t| t.id.level == 1));
        r.tick();
        assert!(r.frame().tiles.iter().all(|t| t.id.level == 2));
        assert_eq!(r.frame().tiles.len(), 1);
    }

    #[test]
    fn small_pans_do_not_refresh_tiles() {
        let mut r = renderer();
        r.load_image_blocking(Arc::new(RgbaImage::new(4096, 4096))).unwrap();
        r.tick();
        let before: Vec<TileId> = r.frame().tiles.iter().map(|t| t.id).collect();
        r.set_pan(-30.0, 0.0);
        r.tick();
        let after: Vec<TileId> = r.frame().tiles.iter().map(|t| t.id).collect();
        assert_eq!(before, after);
        r.set_pan(-700.0, 0.0);
        r.tick();
        assert!(r.frame().tiles.iter().any(|t| t.id.x == 2));
    }

    #[test]
    fn zooming_out_slightly_refreshes_once_the_view_outgrows_its_tiles() {
        let cfg = RendererConfig {
            tile_size: 64,
            cache_size: 400,
            ..Default::default()
        };
        // padded by refresh_distance the first query ends on a tile edge (1024, 640)
        let mut r = Renderer::new(cfg, SoftwareTextures::new(1024), 974.0, 590.0).unwrap();
        r.load_image_blocking(Arc::new(RgbaImage::new(2048, 2048))).unwrap();
        r.tick();
        assert!(r.frame().tiles.iter().all(|t| t.bounds.max.x <= 1024.0));
        // min stays at the origin and the zoom moves by less than refresh_zoom
        r.set_zoom(0.92);
        r.tick();
        let far = r.viewport().max - Vec2::splat(1.0);
        assert!(r.frame().tiles.iter().any(|t| t.bounds.contains(far)));
    }

    #[test]
    fn cache_stays_within_budget_after_tick() {
        let cfg = RendererConfig {
            tile_size: 64,
            cache_size: 12,
            ..Default::default()
        };
        let mut r = Renderer::new(cfg, SoftwareTextures::new(1024), 256.0, 256.0).unwrap();
        r.load_image_blocking(Arc::new(RgbaImage::new(1024, 1024))).unwrap();
        r.tick();
        assert!(r.stats().total_tiles <= 12);
        assert!(!r.frame().tiles.is_empty());
    }

    #[test]
    fn destroy_releases_everything() {
        let mut r = renderer();
        r.load_image_blocking(Arc::new(RgbaImage::new(512, 512))).unwrap();
        r.set_boxes(vec![AnnotationBox::new(0.0, 0.0, 10.0, 10.0, "a")]);
        r.tick();
        r.destroy();
        assert_eq!(r.stats().total_tiles, 0);
        assert_eq!(r.index().size(), 0);
        assert!(r.frame().tiles.is_empty());
        assert_eq!(r.tile_manager().factory().live_count(), 0);
    }
}
