// ============================================================================
// STYLE — colours and screen-pixel sizes for every drawn element
// ============================================================================
//
// Sizes are in screen pixels. Builders divide them by the current zoom so
// outlines, handles and labels keep a constant on-screen size while the
// geometry itself lives in image space.

use egui::Color32;

pub const SELECTED: Color32 = Color32::from_rgb(0x21, 0x96, 0xF3);
pub const HOVERED: Color32 = Color32::from_rgb(0xFF, 0x98, 0x00);
pub const BOX: Color32 = Color32::from_rgb(0x4C, 0xAF, 0x50);
pub const HANDLE_BORDER: Color32 = Color32::WHITE;

pub const GUIDE: Color32 = HOVERED;
pub const ROTATION_LINE: Color32 = Color32::from_rgb(0xFF, 0x57, 0x22);
pub const ROTATE_TOOL: Color32 = Color32::from_rgb(0x9C, 0x27, 0xB0);
pub const HITBOX_CORNER: Color32 = Color32::from_rgb(0x00, 0xFF, 0x00);
pub const HITBOX_EDGE: Color32 = Color32::from_rgb(0x00, 0x88, 0xFF);
pub const BRUSH: Color32 = SELECTED;
pub const BRUSH_CURSOR: Color32 = BOX;
pub const REGION_DONE: Color32 = BOX;
pub const REGION_ACTIVE: Color32 = HOVERED;

pub const BACKGROUND: Color32 = Color32::WHITE;

// Outline widths
pub const SELECTED_WIDTH: f32 = 3.0;
pub const HOVERED_WIDTH: f32 = 2.5;
pub const BOX_WIDTH: f32 = 2.0;
pub const PREVIEW_WIDTH: f32 = 3.0;
pub const GUIDE_WIDTH: f32 = 2.0;
pub const DRAG_LINE_WIDTH: f32 = 3.0;
pub const HAIRLINE: f32 = 1.0;

// Labels
pub const LABEL_SIZE: f32 = 16.0;
pub const LABEL_PADDING: f32 = 4.0;
/// Extra room (image units) a label needs above a box before it flips below.
pub const LABEL_CLEARANCE: f32 = 5.0;
pub const REGION_LABEL_OFFSET: f32 = 8.0;

// Handles
pub const CORNER_HANDLE: f32 = 8.0;
pub const EDGE_HANDLE_LONG: f32 = 20.0;
pub const EDGE_HANDLE_SHORT: f32 = 6.0;
pub const ENDPOINT_RADIUS: f32 = 8.0;

// Opacities
pub const HOVER_FILL_ALPHA: f32 = 0.1;
pub const REGION_FILL_ALPHA: f32 = 0.1;
pub const LINE_ALPHA: f32 = 0.8;
pub const TEMP_GUIDE_ALPHA: f32 = 0.6;
pub const TEMPLATE_GUIDE_ALPHA: f32 = 0.5;

/// Horizontal guide length when no image is loaded.
pub const NO_IMAGE_EXTENT: f32 = 10_000.0;

/// `color` at `alpha` opacity (colours here are opaque to begin with).
pub fn faded(color: Color32, alpha: f32) -> Color32 {
    color.gamma_multiply(alpha.clamp(0.0, 1.0))
}
