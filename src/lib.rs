//! GlyphCrop: viewport renderer for very large scanned pages annotated with
//! thousands of character boxes.
//!
//! The image is cut into a multi-resolution tile pyramid ([`tiles`]), boxes
//! live in an R-tree ([`index`]), and [`render::Renderer`] turns the current
//! view into a layered [`render::Frame`] that a window ([`eframe`] in the
//! `GlyphCrop` binary) or the software [`render::Compositor`] presents.

pub mod logger;

pub mod boxes;
pub mod config;
pub mod error;
pub mod geometry;
pub mod index;
pub mod render;
pub mod tiles;

pub use error::{RenderError, Result};
