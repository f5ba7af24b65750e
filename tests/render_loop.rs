use std::sync::Arc;

use egui::{Pos2, Rect, Vec2};
use image::{Rgba, RgbaImage};

use glyphcrop::boxes::AnnotationBox;
use glyphcrop::config::RendererConfig;
use glyphcrop::render::style;
use glyphcrop::render::{Compositor, DragPreview, DrawCmd, Renderer};
use glyphcrop::tiles::SoftwareTextures;

fn renderer(w: f32, h: f32) -> Renderer<SoftwareTextures> {
    let config = RendererConfig {
        tile_size: 64,
        ..Default::default()
    };
    Renderer::new(config, SoftwareTextures::new(8192), w, h).unwrap()
}

fn page(w: u32, h: u32) -> Arc<RgbaImage> {
    Arc::new(RgbaImage::from_pixel(w, h, Rgba([200, 30, 30, 255])))
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
fn bursts_of_mutation_build_one_frame() {
    let mut r = renderer(320.0, 240.0);
    r.load_image_blocking(page(300, 200)).unwrap();
    assert!(r.tick());
    let before = r.frames_rendered();

    r.set_zoom(1.5);
    r.set_pan(-20.0, 10.0);
    r.set_boxes(vec![AnnotationBox::new(10.0, 10.0, 20.0, 20.0, "a")]);
    r.set_selected_box(Some(0));
    assert!(r.tick());
    assert_eq!(r.frames_rendered(), before + 1);

    // idle ticks do nothing
    assert!(!r.tick());
    assert!(!r.tick());
    assert_eq!(r.frames_rendered(), before + 1);
}

#[test]
fn incremental_pyramid_shows_tiles_before_completion() {
    let mut r = renderer(200.0, 200.0);
    r.load_image(page(256, 256)).unwrap();
    assert!(r.tile_manager().is_generating());
    r.set_zoom(0.5);
    assert!(r.tick());
    assert!(!r.frame().tiles.is_empty());
    while r.tile_manager().is_generating() {
        r.tick();
    }
    r.tick();
    // zoom 0.5 resolves to level 1 once it exists
    assert!(r.frame().tiles.iter().all(|t| t.id.level == 1));
}

#[test]
fn drag_preview_replaces_the_dragged_box() {
    let mut r = renderer(400.0, 400.0);
    r.load_image_blocking(page(400, 400)).unwrap();
    r.set_boxes(vec![
        AnnotationBox::new(40.0, 40.0, 30.0, 30.0, "a"),
        AnnotationBox::new(200.0, 200.0, 30.0, 30.0, "b"),
    ]);
    let moved = Rect::from_min_size(Pos2::new(100.0, 120.0), Vec2::splat(30.0));
    r.request_render(Some(DragPreview { index: 0, rect: moved }));
    r.tick();

    let drawn = rects(&r.frame().boxes);
    assert!(!drawn.contains(&Rect::from_min_size(Pos2::new(40.0, 40.0), Vec2::splat(30.0))));
    assert!(drawn.contains(&Rect::from_min_size(Pos2::new(200.0, 200.0), Vec2::splat(30.0))));
    assert_eq!(drawn.last(), Some(&moved));

    // hover changes keep the preview while the drag lasts
    r.set_hovered_box(Some(1));
    r.tick();
    assert!(rects(&r.frame().boxes).contains(&moved));

    r.request_render(None);
    r.tick();
    assert!(!rects(&r.frame().boxes).contains(&moved));
}

#[test]
fn headless_frame_composes_image_and_boxes() {
    let mut r = renderer(120.0, 120.0);
    r.load_image_blocking(page(50, 50)).unwrap();
    r.set_boxes(vec![AnnotationBox::new(10.0, 10.0, 20.0, 20.0, "")]);
    r.set_zoom(2.0);
    r.tick();

    let out = Compositor::with_font(None).compose(r.frame());
    assert_eq!(out.dimensions(), (120, 120));
    // inside the image, away from the box outline
    assert_eq!(*out.get_pixel(80, 80), Rgba([200, 30, 30, 255]));
    // outside the image
    assert_eq!(*out.get_pixel(110, 110), Rgba(style::BACKGROUND.to_array()));
    // on the box outline (image x = 10 maps to screen x = 20)
    assert_eq!(*out.get_pixel(20, 40), Rgba(style::BOX.to_array()));
}

#[test]
fn slight_zoom_out_keeps_the_right_edge_covered() {
    let config = RendererConfig {
        tile_size: 64,
        cache_size: 400,
        ..Default::default()
    };
    let mut r = Renderer::new(config, SoftwareTextures::new(8192), 974.0, 590.0).unwrap();
    r.load_image_blocking(page(2048, 2048)).unwrap();
    r.tick();
    r.set_zoom(0.92);
    r.tick();

    let out = Compositor::with_font(None).compose(r.frame());
    // screen x 970 is image x ~1054, past the tiles picked at zoom 1
    assert_eq!(*out.get_pixel(970, 100), Rgba([200, 30, 30, 255]));
    assert_eq!(*out.get_pixel(100, 589), Rgba([200, 30, 30, 255]));
}

#[test]
fn cache_budget_holds_after_every_tick() {
    let config = RendererConfig {
        tile_size: 32,
        cache_size: 12,
        preload_margin: 64.0,
        ..Default::default()
    };
    let mut r = Renderer::new(config, SoftwareTextures::new(8192), 100.0, 100.0).unwrap();
    r.load_image_blocking(page(512, 512)).unwrap();
    for step in 0..10 {
        r.set_pan(-(step as f32) * 40.0, -(step as f32) * 25.0);
        r.tick();
        assert!(r.stats().total_tiles <= 12, "step {}: {:?}", step, r.stats());
        assert!(!r.frame().tiles.is_empty());
    }
}
