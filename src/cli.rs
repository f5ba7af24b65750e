// ============================================================================
// GlyphCrop CLI — headless frame rendering and pyramid statistics
// ============================================================================
//
// Usage examples:
//   GlyphCrop render -i page.png -b boxes.csv -o frame.png --width 1280 --height 800
//   GlyphCrop render -i page.png -o frame.png --zoom 0.5 --pan-x 40 --pan-y 40 --select 3
//   GlyphCrop stats -i page.png --tile-size 256
//   GlyphCrop view -i page.png -b boxes.csv
//
// `render` and `stats` never open a window; the pyramid is generated to
// completion before the single frame is composed in software.

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Instant;

use clap::{Args, Parser, Subcommand};
use image::RgbaImage;

use glyphcrop::boxes::AnnotationBox;
use glyphcrop::config::RendererConfig;
use glyphcrop::error::{RenderError, Result};
use glyphcrop::render::{Compositor, Renderer};
use glyphcrop::tiles::{SoftwareTextures, TileManager};
use glyphcrop::{log_err, log_info};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// GlyphCrop large-page viewer and headless renderer.
#[derive(Parser, Debug)]
#[command(
    name = "GlyphCrop",
    version,
    about = "Tile-pyramid viewer for large scanned pages with character boxes",
    long_about = "Render a scanned page with its character boxes through the tile\n\
                  pyramid, either headlessly to a PNG or in an interactive window.\n\n\
                  Box files hold one `x,y,width,height,character[,variant]` line\n\
                  per box; lines starting with `#` are ignored."
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Render one frame to an image file.
    Render(RenderArgs),
    /// Print pyramid and tile statistics for an image.
    Stats(SourceArgs),
    /// Open the interactive viewer.
    View(SourceArgs),
}

/// Inputs shared by every command.
#[derive(Args, Debug, Clone)]
pub struct SourceArgs {
    /// Source image (PNG, JPEG, WEBP, BMP, TIFF).
    #[arg(short, long, value_name = "IMAGE")]
    pub input: PathBuf,

    /// Box list, one `x,y,width,height,character[,variant]` per line.
    #[arg(short, long, value_name = "BOXES.csv")]
    pub boxes: Option<PathBuf>,

    /// Renderer settings file (`key = value` lines).
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Tile edge in pixels (overrides the settings file).
    #[arg(long)]
    pub tile_size: Option<u32>,

    /// Maximum pyramid depth (overrides the settings file).
    #[arg(long)]
    pub max_levels: Option<usize>,

    /// Live tile budget (overrides the settings file).
    #[arg(long)]
    pub cache_size: Option<usize>,
}

#[derive(Args, Debug)]
pub struct RenderArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Output image path; the format follows the extension.
    #[arg(short, long, value_name = "FILE")]
    pub output: PathBuf,

    #[arg(long, default_value_t = 1280)]
    pub width: u32,

    #[arg(long, default_value_t = 800)]
    pub height: u32,

    /// Zoom factor. When omitted the whole image is fitted and centred.
    #[arg(short, long)]
    pub zoom: Option<f32>,

    /// Horizontal screen offset of the image origin.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub pan_x: f32,

    /// Vertical screen offset of the image origin.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub pan_y: f32,

    /// Index of the box to draw as selected.
    #[arg(long)]
    pub select: Option<usize>,

    /// Image layer rotation in degrees.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub rotation: f32,
}

// ============================================================================
// Public entry points
// ============================================================================

/// Run a headless command and return an OS exit code.
pub fn run(command: Command) -> ExitCode {
    let result = match command {
        Command::Render(args) => render(&args),
        Command::Stats(args) => stats(&args),
        // the window is opened by main before dispatching here
        Command::View(_) => Ok(()),
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_err!("{}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Settings file (if any) with command-line overrides applied.
pub fn resolve_config(args: &SourceArgs) -> Result<RendererConfig> {
    let mut config = match &args.config {
        Some(path) => RendererConfig::load(path)?,
        None => RendererConfig::default(),
    };
    if let Some(v) = args.tile_size {
        config.tile_size = v;
    }
    if let Some(v) = args.max_levels {
        config.max_levels = v;
    }
    if let Some(v) = args.cache_size {
        config.cache_size = v;
    }
    config.validate()?;
    Ok(config)
}

pub fn load_source(path: &Path) -> Result<RgbaImage> {
    let img = image::open(path)?.to_rgba8();
    if img.width() == 0 || img.height() == 0 {
        return Err(RenderError::InvalidImage(format!("{} is empty", path.display())));
    }
    log_info!("loaded {} ({}x{})", path.display(), img.width(), img.height());
    Ok(img)
}

pub fn load_boxes(path: &Path) -> Result<Vec<AnnotationBox>> {
    let content = std::fs::read_to_string(path)?;
    parse_boxes(&content)
}

/// Parse a box list. Boxes are numbered in file order; an empty character
/// marks an orphaned box. A trailing integer field is the variant id, so a
/// literal comma can still be a character (`1,2,3,4,,`).
pub fn parse_boxes(content: &str) -> Result<Vec<AnnotationBox>> {
    let mut boxes = Vec::new();
    for (line_no, line) in content.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let bad = |what: &str| RenderError::Config(format!("box line {}: {}", line_no + 1, what));
        let mut fields = trimmed.splitn(5, ',');
        let mut number = |name: &str| -> Result<f32> {
            let raw = fields.next().ok_or_else(|| bad(&format!("missing {}", name)))?;
            raw.trim()
                .parse::<f32>()
                .map_err(|_| bad(&format!("bad {} {:?}", name, raw)))
        };
        let x = number("x")?;
        let y = number("y")?;
        let width = number("width")?;
        let height = number("height")?;
        let rest = fields.next().ok_or_else(|| bad("missing character"))?;

        let (character, variant_id) = match rest.rsplit_once(',') {
            Some((ch, variant)) if !ch.is_empty() => match variant.trim().parse::<u32>() {
                Ok(v) => (ch, v),
                Err(_) => (rest, 0),
            },
            _ => (rest, 0),
        };
        let index = boxes.len();
        let char_index = (!character.is_empty()).then_some(index);
        let mut b = AnnotationBox::new(x, y, width, height, character).with_char_index(char_index);
        b.variant_id = variant_id;
        boxes.push(b);
    }
    Ok(boxes)
}

// ============================================================================
// Commands
// ============================================================================

fn render(args: &RenderArgs) -> Result<()> {
    let config = resolve_config(&args.source)?;
    let start = Instant::now();
    let image = load_source(&args.source.input)?;
    let boxes = match &args.source.boxes {
        Some(path) => load_boxes(path)?,
        None => Vec::new(),
    };
    let (iw, ih) = image.dimensions();
    let (cw, ch) = (args.width as f32, args.height as f32);

    let factory = SoftwareTextures::new(config.max_texture_side);
    let mut renderer = Renderer::new(config, factory, cw, ch)?;
    renderer.load_image_blocking(Arc::new(image))?;
    renderer.set_boxes(boxes);
    match args.zoom {
        Some(zoom) => {
            renderer.set_zoom(zoom);
            renderer.set_pan(args.pan_x, args.pan_y);
        }
        None => {
            let fit = (cw / iw as f32).min(ch / ih as f32);
            renderer.set_zoom(fit);
            renderer.set_pan((cw - iw as f32 * fit) / 2.0, (ch - ih as f32 * fit) / 2.0);
        }
    }
    renderer.set_selected_box(args.select);
    renderer.set_image_rotation(args.rotation);
    renderer.tick();

    let compositor = Compositor::new();
    let out = compositor.compose(renderer.frame());
    out.save(&args.output)?;

    let stats = renderer.stats();
    println!(
        "{} -> {} ({} tiles drawn, {} live, {:.0} ms)",
        args.source.input.display(),
        args.output.display(),
        renderer.frame().tiles.len(),
        stats.total_tiles,
        start.elapsed().as_secs_f64() * 1000.0
    );
    Ok(())
}

fn stats(args: &SourceArgs) -> Result<()> {
    let config = resolve_config(args)?;
    let image = load_source(&args.input)?;
    let start = Instant::now();
    let mut tiles = TileManager::new(&config, SoftwareTextures::new(config.max_texture_side));
    tiles.load_image(Arc::new(image))?;
    tiles.finish_generation();
    let elapsed = start.elapsed();

    let s = tiles.stats();
    println!("image      {}x{}", s.image_width, s.image_height);
    println!("tile size  {}", tiles.tile_size());
    for level in tiles.pyramid() {
        println!(
            "level {}    scale {:<8} {:>6}x{:<6} {:>3}x{:<3} tiles ({})",
            level.level,
            level.scale,
            level.width,
            level.height,
            level.tiles_x,
            level.tiles_y,
            level.tile_count()
        );
    }
    println!("tiles      {} generated in {:.0} ms", s.total_tiles, elapsed.as_secs_f64() * 1000.0);
    println!("cache      {} tile budget", s.cache_size);
    if let Some(path) = &args.boxes {
        let boxes = load_boxes(path)?;
        let orphaned = boxes.iter().filter(|b| b.is_orphaned()).count();
        println!("boxes      {} ({} orphaned)", boxes.len(), orphaned);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_boxes_with_comments_and_variants() {
        let src = "# page 1\n10,20,30,40,a\n\n 1.5, 2, 3, 4,b,2\n5,5,5,5,\n";
        let boxes = parse_boxes(src).unwrap();
        assert_eq!(boxes.len(), 3);
        assert_eq!(boxes[0].rect().min, egui::Pos2::new(10.0, 20.0));
        assert_eq!(boxes[0].character, "a");
        assert_eq!(boxes[0].char_index, Some(0));
        assert_eq!(boxes[1].x, 1.5);
        assert_eq!(boxes[1].character, "b");
        assert_eq!(boxes[1].variant_id, 2);
        assert!(boxes[2].is_orphaned());
    }

    #[test]
    fn comma_can_be_a_character() {
        let boxes = parse_boxes("1,2,3,4,,\n1,2,3,4,,,7\n").unwrap();
        assert_eq!(boxes[0].character, ",");
        assert_eq!(boxes[0].variant_id, 0);
        assert_eq!(boxes[1].character, ",");
        assert_eq!(boxes[1].variant_id, 7);
    }

    #[test]
    fn bad_lines_report_their_number() {
        let err = parse_boxes("1,2,3,4,a\n1,x,3,4,b\n").unwrap_err();
        assert!(err.to_string().contains("box line 2"), "{}", err);
        assert!(parse_boxes("1,2,3\n").is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let args = SourceArgs {
            input: PathBuf::from("page.png"),
            boxes: None,
            config: None,
            tile_size: Some(256),
            max_levels: None,
            cache_size: Some(10),
        };
        let c = resolve_config(&args).unwrap();
        assert_eq!(c.tile_size, 256);
        assert_eq!(c.cache_size, 10);
        assert_eq!(c.max_levels, RendererConfig::default().max_levels);

        let zero = SourceArgs { tile_size: Some(0), ..args };
        assert!(resolve_config(&zero).is_err());
    }
}
