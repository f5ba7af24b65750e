// ============================================================================
// VIEWER — eframe host that drives the render tick and paints frames
// ============================================================================
//
// Controls:
//   wheel                zoom about the pointer
//   right/middle drag    pan
//   click                select (and raise) the box under the pointer
//   drag selected box    move it; drag a corner or edge handle to resize
//   B                    toggle the brush; Q / E rotate the image layer

use std::collections::HashMap;
use std::sync::Arc;

use eframe::egui;
use egui::{
    Align2, Color32, ColorImage, FontId, Key, Mesh, PointerButton, Pos2, Rect, Sense, Shape, TextureHandle,
    TextureOptions, Vec2,
};
use image::RgbaImage;

use glyphcrop::boxes::{AnnotationBox, BoxUpdate};
use glyphcrop::config::RendererConfig;
use glyphcrop::error::{RenderError, Result};
use glyphcrop::geometry::{ViewTransform, image_to_screen, zoom_around};
use glyphcrop::index::{Corner, Edge, Hit};
use glyphcrop::render::{BrushCursor, BrushStroke, DragPreview, DrawCmd, Renderer};
use glyphcrop::tiles::{TextureFactory, TileId};
use glyphcrop::{log_err, log_info};

// ============================================================================
// EGUI TEXTURE BACK-END
// ============================================================================

/// Uploads tiles as egui textures. Dropping the last handle frees the GPU
/// texture, so `release` only has to let go of it.
pub struct EguiTextures {
    ctx: egui::Context,
    max_side: u32,
    options: TextureOptions,
}

impl EguiTextures {
    pub fn new(ctx: egui::Context, max_side: u32) -> Self {
        Self {
            ctx,
            max_side,
            options: TextureOptions::LINEAR,
        }
    }
}

impl TextureFactory for EguiTextures {
    type Handle = TextureHandle;

    fn create(&mut self, id: TileId, pixels: &RgbaImage) -> Result<TextureHandle> {
        let (w, h) = pixels.dimensions();
        if w == 0 || h == 0 || w > self.max_side || h > self.max_side {
            return Err(RenderError::TextureCreation {
                tile: id,
                reason: format!("{}x{} outside 1..={}", w, h, self.max_side),
            });
        }
        let image = ColorImage::from_rgba_unmultiplied([w as usize, h as usize], pixels.as_raw());
        Ok(self.ctx.load_texture(id.to_string(), image, self.options))
    }

    fn release(&mut self, handle: TextureHandle) {
        drop(handle);
    }
}

// ============================================================================
// APP
// ============================================================================

/// What the primary button is doing to the selected box.
#[derive(Clone, Copy, Debug)]
struct BoxDrag {
    index: usize,
    hit: Hit,
    start: Rect,
    grab: Pos2,
}

pub struct ViewerApp {
    renderer: Option<Renderer<EguiTextures>>,
    error: Option<String>,
    pending_image: Option<Arc<RgbaImage>>,
    fitted: bool,
    brush: bool,
    brush_size: f32,
    drag: Option<BoxDrag>,
    /// Stroke layer textures keyed by the layer buffer they were made from.
    rasters: HashMap<usize, TextureHandle>,
}

impl ViewerApp {
    pub fn new(cc: &eframe::CreationContext<'_>, config: RendererConfig, image: RgbaImage, boxes: Vec<AnnotationBox>) -> Self {
        let factory = EguiTextures::new(cc.egui_ctx.clone(), config.max_texture_side);
        let mut app = Self {
            renderer: None,
            error: None,
            pending_image: Some(Arc::new(image)),
            fitted: false,
            brush: false,
            brush_size: config.brush_size,
            drag: None,
            rasters: HashMap::new(),
        };
        match Renderer::new(config, factory, 0.0, 0.0) {
            Ok(mut renderer) => {
                renderer.set_boxes(boxes);
                app.renderer = Some(renderer);
            }
            Err(e) => {
                log_err!("{}", e);
                app.error = Some(e.to_string());
            }
        }
        app
    }

    fn fit(renderer: &mut Renderer<EguiTextures>) {
        let (iw, ih) = renderer.image_size();
        let canvas = renderer.canvas_size();
        if iw == 0 || ih == 0 || canvas.x <= 0.0 || canvas.y <= 0.0 {
            return;
        }
        let zoom = (canvas.x / iw as f32).min(canvas.y / ih as f32);
        renderer.set_transform(ViewTransform::new(
            zoom,
            (canvas.x - iw as f32 * zoom) / 2.0,
            (canvas.y - ih as f32 * zoom) / 2.0,
        ));
    }

    fn handle_input(&mut self, ui: &egui::Ui, response: &egui::Response, origin: Pos2) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        let to_canvas = |p: Pos2| Pos2::new(p.x - origin.x, p.y - origin.y);

        // -- view -------------------------------------------------------------
        let scroll = ui.input(|i| i.scroll_delta.y);
        if scroll != 0.0
            && let Some(pos) = response.hover_pos()
        {
            let t = zoom_around(&renderer.transform(), (scroll * 0.0015).exp(), to_canvas(pos));
            renderer.set_transform(t);
        }
        if response.dragged_by(PointerButton::Secondary) || response.dragged_by(PointerButton::Middle) {
            let t = renderer.transform();
            let d = response.drag_delta();
            renderer.set_pan(t.translate.x + d.x, t.translate.y + d.y);
        }

        let (rotate_left, rotate_right, toggle_brush) =
            ui.input(|i| (i.key_pressed(Key::Q), i.key_pressed(Key::E), i.key_pressed(Key::B)));
        if rotate_left || rotate_right {
            let step = if rotate_left { -1.0 } else { 1.0 };
            renderer.set_image_rotation(renderer.image_rotation() + step);
        }
        if toggle_brush {
            self.brush = !self.brush;
            let mut overlay = renderer.overlay().clone();
            overlay.brush_cursor = None;
            overlay.current_stroke.clear();
            renderer.set_overlay(overlay);
        }

        let pointer = response.hover_pos().map(to_canvas);

        // -- brush ------------------------------------------------------------
        if self.brush {
            let mut overlay = renderer.overlay().clone();
            overlay.brush_cursor = pointer.map(|p| BrushCursor {
                center: renderer.screen_to_image(p),
                size: overlay.brush_size.unwrap_or(self.brush_size),
            });
            if response.dragged_by(PointerButton::Primary)
                && let Some(p) = response.interact_pointer_pos()
            {
                overlay.current_stroke.push(renderer.screen_to_image(to_canvas(p)));
            }
            if response.drag_released() && !overlay.current_stroke.is_empty() {
                let points = std::mem::take(&mut overlay.current_stroke);
                overlay.brush_strokes.push(BrushStroke::new(points, None));
            }
            if overlay != *renderer.overlay() {
                renderer.set_overlay(overlay);
            }
            return;
        }

        // -- hover + select ---------------------------------------------------
        let hovered = pointer.and_then(|p| renderer.find_box_at_point(p.x, p.y)).map(|r| r.id);
        renderer.set_hovered_box(hovered);

        if response.clicked()
            && let Some(p) = pointer
        {
            select_at(renderer, p);
        }

        // -- move / resize ----------------------------------------------------
        if response.drag_started_by(PointerButton::Primary)
            && let Some(p) = response.interact_pointer_pos().map(to_canvas)
        {
            self.drag = BoxDrag::begin(renderer, p);
        }
        if let Some(drag) = self.drag {
            let now = response
                .interact_pointer_pos()
                .map(|p| renderer.screen_to_image(to_canvas(p)))
                .unwrap_or(drag.grab);
            if response.drag_released() {
                drag.commit(renderer, now);
                self.drag = None;
            } else {
                renderer.request_render(Some(drag.preview(now)));
            }
        }
    }

    fn paint(&mut self, painter: &egui::Painter, origin: Pos2) {
        let Some(renderer) = self.renderer.as_ref() else {
            return;
        };
        let frame = renderer.frame();
        let t = frame.transform;
        let to_screen = |p: Pos2| {
            let s = image_to_screen(p, &t);
            Pos2::new(s.x + origin.x, s.y + origin.y)
        };

        painter.rect_filled(painter.clip_rect(), 0.0, Color32::WHITE);

        let uv = [Pos2::new(0.0, 0.0), Pos2::new(1.0, 0.0), Pos2::new(1.0, 1.0), Pos2::new(0.0, 1.0)];
        for tile in &frame.tiles {
            let b = tile.bounds;
            let corners = [b.left_top(), b.right_top(), b.right_bottom(), b.left_bottom()];
            let mut mesh = Mesh::with_texture(tile.texture.id());
            for (corner, uv) in corners.iter().zip(uv) {
                mesh.vertices.push(egui::epaint::Vertex {
                    pos: to_screen(frame.rotate_image_point(*corner)),
                    uv,
                    color: Color32::WHITE,
                });
            }
            mesh.indices = vec![0, 1, 2, 0, 2, 3];
            painter.add(Shape::mesh(mesh));
        }

        let mut live = Vec::new();
        for cmd in frame.commands() {
            paint_cmd(painter, cmd, &to_screen, t.scale, &mut self.rasters, &mut live);
        }
        self.rasters.retain(|key, _| live.contains(key));
    }

    fn status(&self) -> String {
        let Some(renderer) = self.renderer.as_ref() else {
            return self.error.clone().unwrap_or_default();
        };
        let s = renderer.stats();
        let mut text = format!(
            "{}x{}  zoom {:.0}%  tiles {} / {}  boxes {}",
            s.image_width,
            s.image_height,
            renderer.zoom() * 100.0,
            s.total_tiles,
            s.cache_size,
            renderer.boxes().len()
        );
        let tm = renderer.tile_manager();
        if tm.is_generating() {
            text.push_str(&format!("  building pyramid {:.0}%", tm.progress() * 100.0));
        }
        if renderer.image_rotation() != 0.0 {
            text.push_str(&format!("  rotation {:.0}°", renderer.image_rotation()));
        }
        if self.brush {
            text.push_str("  [brush]");
        }
        text
    }
}

/// Paint one display-list command; raster layers are uploaded once per
/// distinct layer buffer.
fn paint_cmd(
    painter: &egui::Painter,
    cmd: &DrawCmd,
    to_screen: &dyn Fn(Pos2) -> Pos2,
    scale: f32,
    rasters: &mut HashMap<usize, TextureHandle>,
    live: &mut Vec<usize>,
) {
    let stroke = |s: glyphcrop::render::Stroke| egui::Stroke::new(s.width * scale, s.color);
    match cmd {
        DrawCmd::Rect { rect, fill, stroke: s } => {
            let r = Rect::from_two_pos(to_screen(rect.min), to_screen(rect.max));
            painter.rect(
                r,
                0.0,
                fill.unwrap_or(Color32::TRANSPARENT),
                s.map(stroke).unwrap_or(egui::Stroke::NONE),
            );
        }
        DrawCmd::Line { from, to, stroke: s } => {
            painter.line_segment([to_screen(*from), to_screen(*to)], stroke(*s));
        }
        DrawCmd::Path { points, stroke: s } => {
            let pts: Vec<Pos2> = points.iter().map(|p| to_screen(*p)).collect();
            painter.add(Shape::line(pts, stroke(*s)));
        }
        DrawCmd::Circle {
            center,
            radius,
            fill,
            stroke: s,
        } => {
            painter.circle(
                to_screen(*center),
                radius * scale,
                fill.unwrap_or(Color32::TRANSPARENT),
                s.map(stroke).unwrap_or(egui::Stroke::NONE),
            );
        }
        DrawCmd::Label { pos, text, size, color } => {
            painter.text(to_screen(*pos), Align2::LEFT_TOP, text, FontId::proportional(size * scale), *color);
        }
        DrawCmd::Raster { rect, image, opacity } => {
            let key = Arc::as_ptr(image) as usize;
            live.push(key);
            let texture = rasters.entry(key).or_insert_with(|| {
                let (w, h) = image.dimensions();
                let color = ColorImage::from_rgba_unmultiplied([w as usize, h as usize], image.as_raw());
                painter.ctx().load_texture("brush_strokes", color, TextureOptions::LINEAR)
            });
            let r = Rect::from_two_pos(to_screen(rect.min), to_screen(rect.max));
            let uv = Rect::from_min_max(Pos2::ZERO, Pos2::new(1.0, 1.0));
            let tint = Color32::from_white_alpha((opacity.clamp(0.0, 1.0) * 255.0) as u8);
            painter.image(texture.id(), r, uv, tint);
        }
    }
}

/// Click selection: the top-most box under canvas point `p` becomes the
/// selection and is raised above its neighbours. Clicking empty space clears
/// the selection.
fn select_at<F: TextureFactory>(renderer: &mut Renderer<F>, p: Pos2) -> Option<usize> {
    let hit = renderer.find_box_at_point(p.x, p.y).map(|r| r.id);
    renderer.set_selected_box(hit);
    if let Some(id) = hit {
        renderer.bring_to_front(id);
    }
    hit
}

impl BoxDrag {
    /// Grab the selected box at canvas point `p`, if `p` is on it or on one
    /// of its handles.
    fn begin<F: TextureFactory>(renderer: &Renderer<F>, p: Pos2) -> Option<Self> {
        let index = renderer.selected_box()?;
        let hit = renderer.hit_test(index, p.x, p.y)?;
        let start = renderer.boxes().get(index)?.rect();
        Some(Self {
            index,
            hit,
            start,
            grab: renderer.screen_to_image(p),
        })
    }

    /// Geometry with the pointer at image point `now`.
    fn rect_at(&self, now: Pos2) -> Rect {
        dragged_rect(self.start, self.hit, now - self.grab)
    }

    fn preview(&self, now: Pos2) -> DragPreview {
        DragPreview {
            index: self.index,
            rect: self.rect_at(now),
        }
    }

    /// Write the final geometry back and drop the preview.
    fn commit<F: TextureFactory>(&self, renderer: &mut Renderer<F>, now: Pos2) {
        renderer.update_box(self.index, &BoxUpdate::geometry(self.rect_at(now)));
        renderer.request_render(None);
    }
}

/// Apply a pointer delta to a box according to which part was grabbed.
fn dragged_rect(start: Rect, hit: Hit, d: Vec2) -> Rect {
    let (mut min, mut max) = (start.min, start.max);
    match hit {
        Hit::Inside => return start.translate(d),
        Hit::Corner(Corner::NorthWest) => min += d,
        Hit::Corner(Corner::SouthEast) => max += d,
        Hit::Corner(Corner::NorthEast) => {
            max.x += d.x;
            min.y += d.y;
        }
        Hit::Corner(Corner::SouthWest) => {
            min.x += d.x;
            max.y += d.y;
        }
        Hit::Edge(Edge::North) => min.y += d.y,
        Hit::Edge(Edge::South) => max.y += d.y,
        Hit::Edge(Edge::West) => min.x += d.x,
        Hit::Edge(Edge::East) => max.x += d.x,
    }
    Rect::from_two_pos(min, max)
}

impl eframe::App for ViewerApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        let status = self.status();
        egui::TopBottomPanel::bottom("status").show(ctx, |ui| {
            ui.label(status);
        });

        egui::CentralPanel::default().frame(egui::Frame::none()).show(ctx, |ui| {
            let (response, painter) = ui.allocate_painter(ui.available_size(), Sense::click_and_drag());
            let canvas = response.rect;

            if let Some(renderer) = self.renderer.as_mut() {
                if renderer.canvas_size() != canvas.size() {
                    renderer.resize(canvas.width(), canvas.height());
                }
                if let Some(image) = self.pending_image.take() {
                    match renderer.load_image(image) {
                        Ok(()) => {
                            log_info!("image loaded");
                        }
                        Err(e) => {
                            log_err!("{}", e);
                            self.error = Some(e.to_string());
                        }
                    }
                }
                if !self.fitted && canvas.width() > 0.0 {
                    Self::fit(renderer);
                    self.fitted = true;
                }
            }

            self.handle_input(ui, &response, canvas.min);

            if let Some(renderer) = self.renderer.as_mut() {
                renderer.tick();
            }
            self.paint(&painter, canvas.min);
        });

        let busy = self
            .renderer
            .as_ref()
            .is_some_and(|r| r.needs_render() || r.tile_manager().is_generating());
        if busy || self.drag.is_some() {
            ctx.request_repaint();
        }
    }
}

/// Open the viewer window and block until it closes.
pub fn run(config: RendererConfig, image: RgbaImage, boxes: Vec<AnnotationBox>) -> std::result::Result<(), eframe::Error> {
    let options = eframe::NativeOptions {
        viewport: egui::ViewportBuilder::default()
            .with_inner_size([1280.0, 800.0])
            .with_title("GlyphCrop"),
        ..Default::default()
    };
    eframe::run_native(
        "GlyphCrop",
        options,
        Box::new(move |cc| Box::new(ViewerApp::new(cc, config, image, boxes))),
    )
}
