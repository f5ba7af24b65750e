//! Session log for the viewer and the headless commands.
//!
//! One file per run, truncated at start-up, under the platform data
//! directory (`GlyphCrop/glyphcrop.log`). Every line carries the subsystem
//! that wrote it, taken from the calling module:
//!
//! ```text
//! [14:02:11] [INFO ] [tiles] level 2 ready (16 tiles, 1024x1024)
//! [14:02:11] [WARN ] [render] ignoring zoom NaN
//! ```
//!
//! `GLYPHCROP_LOG=error|warn|info` sets the lowest level written (default
//! `info`). Before `init()` runs, as in library use and tests, the macros do
//! nothing.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Mutex, OnceLock};
use std::time::{SystemTime, UNIX_EPOCH};

static SINK: OnceLock<Mutex<File>> = OnceLock::new();
static PATH: OnceLock<PathBuf> = OnceLock::new();
static THRESHOLD: AtomicU8 = AtomicU8::new(Level::Info as u8);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Error = 0,
    Warn = 1,
    Info = 2,
}

impl Level {
    fn tag(self) -> &'static str {
        match self {
            Level::Error => "ERROR",
            Level::Warn => "WARN ",
            Level::Info => "INFO ",
        }
    }

    pub fn parse(s: &str) -> Option<Level> {
        match s.trim().to_ascii_lowercase().as_str() {
            "error" => Some(Level::Error),
            "warn" | "warning" => Some(Level::Warn),
            "info" => Some(Level::Info),
            _ => None,
        }
    }
}

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Info, module_path!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Warn, module_path!(), &format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_err {
    ($($arg:tt)*) => {
        $crate::logger::write($crate::logger::Level::Error, module_path!(), &format!($($arg)*))
    };
}

/// Open the session log and mirror panics into it. Call once, first thing
/// in `main`.
pub fn init() {
    if let Ok(raw) = std::env::var("GLYPHCROP_LOG") {
        match Level::parse(&raw) {
            Some(level) => THRESHOLD.store(level as u8, Ordering::Relaxed),
            None => eprintln!("GLYPHCROP_LOG: unknown level {:?}, using info", raw),
        }
    }

    let path = data_dir().join("GlyphCrop").join("glyphcrop.log");
    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent);
    }
    let file = OpenOptions::new().create(true).write(true).truncate(true).open(&path);
    match file {
        Ok(f) => {
            let _ = PATH.set(path.clone());
            let _ = SINK.set(Mutex::new(f));
        }
        Err(e) => {
            eprintln!("cannot open log {}: {}", path.display(), e);
            return;
        }
    }

    raw_line(&format!(
        "=== GlyphCrop {} started (unix {}) ===",
        env!("CARGO_PKG_VERSION"),
        unix_secs().unwrap_or(0)
    ));

    let prev = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        raw_line(&format!("[{}] [PANIC] {}", clock(), info));
        prev(info);
    }));
}

/// Where this session is being logged, once `init` has succeeded.
pub fn log_path() -> Option<&'static PathBuf> {
    PATH.get()
}

/// Macro back-end. `module` is the caller's `module_path!()`.
pub fn write(level: Level, module: &str, msg: &str) {
    if SINK.get().is_none() || level as u8 > THRESHOLD.load(Ordering::Relaxed) {
        return;
    }
    raw_line(&format_line(&clock(), level, module, msg));
}

fn raw_line(line: &str) {
    if let Some(sink) = SINK.get()
        && let Ok(mut file) = sink.lock()
    {
        let _ = writeln!(file, "{}", line);
    }
}

fn format_line(clock: &str, level: Level, module: &str, msg: &str) -> String {
    format!("[{}] [{}] [{}] {}", clock, level.tag(), subsystem(module), msg)
}

/// `glyphcrop::tiles::manager` -> `tiles`, `GlyphCrop::viewer` -> `viewer`.
fn subsystem(module: &str) -> &str {
    let mut parts = module.split("::");
    let root = parts.next().unwrap_or(module);
    parts.next().unwrap_or(root)
}

fn data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata);
        }
    }
    #[cfg(target_os = "macos")]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join("Library").join("Application Support");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_DATA_HOME") {
        return PathBuf::from(xdg);
    }
    match std::env::var("HOME") {
        Ok(home) => PathBuf::from(home).join(".local").join("share"),
        Err(_) => PathBuf::from("."),
    }
}

fn unix_secs() -> Option<u64> {
    SystemTime::now().duration_since(UNIX_EPOCH).ok().map(|d| d.as_secs())
}

/// UTC wall clock, `HH:MM:SS`.
fn clock() -> String {
    match unix_secs() {
        Some(s) => format!("{:02}:{:02}:{:02}", (s % 86400) / 3600, (s % 3600) / 60, s % 60),
        None => "??:??:??".to_string(),
    }
}
