// ============================================================================
// RENDERER CONFIG — tile, cache and interaction tuning
// ============================================================================
//
// Settings live in a plain `key = value` file. Unknown keys are ignored and
// malformed values keep their defaults (with a warning in the session log),
// so an old or hand-edited file never stops the renderer from starting.

use std::path::Path;

use crate::error::{RenderError, Result};
use crate::log_warn;

#[derive(Clone, Debug, PartialEq)]
pub struct RendererConfig {
    /// Edge length of a pyramid tile in level pixels.
    pub tile_size: u32,
    /// Upper bound on pyramid depth (level 0 included). Levels that would be
    /// smaller than one pixel are never planned.
    pub max_levels: usize,
    /// Live tile budget enforced by cache eviction.
    pub cache_size: usize,
    /// Extra image-space margin warmed around the viewport.
    pub preload_margin: f32,
    /// Viewport movement (image units) that triggers a tile-layer refresh.
    pub refresh_distance: f32,
    /// Zoom change that triggers a tile-layer refresh.
    pub refresh_zoom: f32,
    /// Screen-pixel tolerance for pointer hit lookups.
    pub hit_tolerance_px: f32,
    /// Corner-handle radius for `hit_test` (image units).
    pub handle_size: f32,
    /// Edge band for `hit_test` (image units).
    pub edge_threshold: f32,
    /// Brush width used when a stroke does not carry its own.
    pub brush_size: f32,
    /// Opacity of the flattened brush stroke layer.
    pub brush_alpha: f32,
    /// Largest texture edge the software back-end accepts.
    pub max_texture_side: u32,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            tile_size: 512,
            max_levels: 4,
            cache_size: 100,
            preload_margin: 512.0,
            refresh_distance: 50.0,
            refresh_zoom: 0.1,
            hit_tolerance_px: 5.0,
            handle_size: 20.0,
            edge_threshold: 10.0,
            brush_size: 40.0,
            brush_alpha: 0.6,
            max_texture_side: 8192,
        }
    }
}

impl RendererConfig {
    /// Read a settings file. A missing or unreadable file is an error; bad
    /// individual values are not.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::parse(&content);
        config.validate()?;
        Ok(config)
    }

    /// Parse `key = value` lines on top of the defaults.
    pub fn parse(content: &str) -> Self {
        let mut c = Self::default();
        for (line_no, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else {
                log_warn!("config line {}: expected `key = value`, got {:?}", line_no + 1, line);
                continue;
            };
            let key = key.trim();
            let val = val.trim();
            let ok = match key {
                "tile_size" => set(&mut c.tile_size, val),
                "max_levels" => set(&mut c.max_levels, val),
                "cache_size" => set(&mut c.cache_size, val),
                "preload_margin" => set(&mut c.preload_margin, val),
                "refresh_distance" => set(&mut c.refresh_distance, val),
                "refresh_zoom" => set(&mut c.refresh_zoom, val),
                "hit_tolerance_px" => set(&mut c.hit_tolerance_px, val),
                "handle_size" => set(&mut c.handle_size, val),
                "edge_threshold" => set(&mut c.edge_threshold, val),
                "brush_size" => set(&mut c.brush_size, val),
                "brush_alpha" => set(&mut c.brush_alpha, val),
                "max_texture_side" => set(&mut c.max_texture_side, val),
                _ => true,
            };
            if !ok {
                log_warn!("config line {}: bad value {:?} for {}", line_no + 1, val, key);
            }
        }
        c
    }

    /// Reject settings the tile manager or renderer cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tile_size == 0 {
            return Err(RenderError::Config("tile_size must be at least 1".into()));
        }
        if self.max_levels == 0 {
            return Err(RenderError::Config("max_levels must be at least 1".into()));
        }
        if self.cache_size == 0 {
            return Err(RenderError::Config("cache_size must be at least 1".into()));
        }
        if self.max_texture_side == 0 {
            return Err(RenderError::Config("max_texture_side must be at least 1".into()));
        }
        let positive = [
            ("refresh_distance", self.refresh_distance),
            ("refresh_zoom", self.refresh_zoom),
            ("brush_size", self.brush_size),
        ];
        for (name, v) in positive {
            if !(v > 0.0) {
                return Err(RenderError::Config(format!("{} must be positive, got {}", name, v)));
            }
        }
        let non_negative = [
            ("preload_margin", self.preload_margin),
            ("hit_tolerance_px", self.hit_tolerance_px),
            ("handle_size", self.handle_size),
            ("edge_threshold", self.edge_threshold),
        ];
        for (name, v) in non_negative {
            if !(v >= 0.0) {
                return Err(RenderError::Config(format!("{} must not be negative, got {}", name, v)));
            }
        }
        if !(0.0..=1.0).contains(&self.brush_alpha) {
            return Err(RenderError::Config(format!(
                "brush_alpha must be within 0..=1, got {}",
                self.brush_alpha
            )));
        }
        Ok(())
    }
}

fn set<T: std::str::FromStr>(slot: &mut T, val: &str) -> bool {
    match val.parse() {
        Ok(v) => {
            *slot = v;
            true
        }
        Err(_) => false,
    }
}
