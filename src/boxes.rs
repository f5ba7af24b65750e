// ============================================================================
// ANNOTATION BOXES — glyph crop rectangles in image space
// ============================================================================

use std::collections::BTreeMap;

use egui::{Pos2, Rect, Vec2};

/// One character-glyph crop region.
///
/// Geometry is fixed-shape; anything domain-specific beyond the character and
/// its variant lives in `extras` so the spatial index only ever sees `x`,
/// `y`, `width` and `height`.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct AnnotationBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// The glyph this box crops (usually one grapheme).
    pub character: String,
    /// Position of the character in the source text. `None` marks an orphaned
    /// box whose character was removed from the text.
    pub char_index: Option<usize>,
    pub variant_id: u32,
    pub extras: BTreeMap<String, String>,
}

impl AnnotationBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32, character: impl Into<String>) -> Self {
        Self {
            x,
            y,
            width,
            height,
            character: character.into(),
            char_index: Some(0),
            variant_id: 0,
            extras: BTreeMap::new(),
        }
    }

    pub fn with_char_index(mut self, char_index: Option<usize>) -> Self {
        self.char_index = char_index;
        self
    }

    pub fn rect(&self) -> Rect {
        Rect::from_min_size(Pos2::new(self.x, self.y), Vec2::new(self.width, self.height))
    }

    pub fn is_orphaned(&self) -> bool {
        self.char_index.is_none()
    }

    /// Zero/negative area or non-finite geometry. Such boxes are indexed but
    /// never drawn.
    pub fn is_degenerate(&self) -> bool {
        !(self.x.is_finite() && self.y.is_finite() && self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }

    /// Patch the fields present in `update`.
    pub fn apply(&mut self, update: &BoxUpdate) {
        if let Some(x) = update.x {
            self.x = x;
        }
        if let Some(y) = update.y {
            self.y = y;
        }
        if let Some(w) = update.width {
            self.width = w;
        }
        if let Some(h) = update.height {
            self.height = h;
        }
        if let Some(ref c) = update.character {
            self.character = c.clone();
        }
        if let Some(v) = update.variant_id {
            self.variant_id = v;
        }
    }
}

/// Partial update for `Renderer::update_box`. Absent fields are left alone.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BoxUpdate {
    pub x: Option<f32>,
    pub y: Option<f32>,
    pub width: Option<f32>,
    pub height: Option<f32>,
    pub character: Option<String>,
    pub variant_id: Option<u32>,
}

impl BoxUpdate {
    /// Move + resize in one go (drag and resize feedback).
    pub fn geometry(rect: Rect) -> Self {
        Self {
            x: Some(rect.min.x),
            y: Some(rect.min.y),
            width: Some(rect.width()),
            height: Some(rect.height()),
            ..Default::default()
        }
    }

    pub fn position(x: f32, y: f32) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn degenerate_detection() {
        assert!(!AnnotationBox::new(0.0, 0.0, 10.0, 10.0, "a").is_degenerate());
        assert!(AnnotationBox::new(0.0, 0.0, 0.0, 10.0, "a").is_degenerate());
        assert!(AnnotationBox::new(0.0, 0.0, 10.0, -1.0, "a").is_degenerate());
        assert!(AnnotationBox::new(f32::NAN, 0.0, 10.0, 10.0, "a").is_degenerate());
    }

    #[test]
    fn partial_update_only_touches_given_fields() {
        let mut b = AnnotationBox::new(1.0, 2.0, 3.0, 4.0, "q");
        b.apply(&BoxUpdate::position(10.0, 20.0));
        assert_eq!((b.x, b.y, b.width, b.height), (10.0, 20.0, 3.0, 4.0));
        assert_eq!(b.character, "q");
        b.apply(&BoxUpdate {
            character: Some("Q".into()),
            ..Default::default()
        });
        assert_eq!(b.character, "Q");
        assert_eq!(b.x, 10.0);
    }
}
