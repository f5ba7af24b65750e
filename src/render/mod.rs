// ============================================================================
// RENDER — frame composition, overlays and software presentation
// ============================================================================

pub mod compositor;
pub mod frame;
pub mod overlay;
pub mod renderer;
pub mod strokes;
pub mod style;

pub use compositor::Compositor;
pub use frame::{DrawCmd, Frame, Stroke, TileSprite};
pub use overlay::{
    AngledBaseline, AngledGuide, Baseline, BrushCursor, DrawingLine, Hitboxes, LineTool, Overlay,
};
pub use renderer::{DragPreview, Renderer};
pub use strokes::{BrushStroke, StrokeCache};
