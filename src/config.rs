// Config Module - Settings file, command-line arguments and file watching
use anyhow::{Context, Result};
use clap::Parser;
use notify::{Config, Event as NotifyEvent, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

use crate::animation::{EngineSettings, DEFAULT_FADE_IN_MS, DEFAULT_MAX_FOV, DEFAULT_MIN_FOV, MAX_FPS, MIN_FPS};
use crate::geometry::{MAX_DIMENSIONS, MIN_DIMENSIONS};
use crate::renderer::StrokeStyle;
use crate::types::{Rgb, Subscription};

const APP_DIR: &str = "rustseract";

/// Events closer together than this are delivered as one change.
const WATCH_SETTLE: Duration = Duration::from_millis(50);

#[derive(Parser, Debug, Default)]
#[command(
    author,
    version,
    about = "Music-synchronised 4D hypercube animation in the terminal",
    long_about = "Renders a rotating tesseract whose spin is locked to the loop lengths of a\n\
                  music state (a TOML file edited live, optionally tempo-synced to a MIDI clock).\n\
                  The shape fades in whenever the music's root changes."
)]
pub struct Args {
    /// Target framerate
    #[arg(long)]
    pub fps: Option<f64>,

    /// Hypercube dimensions (1-4)
    #[arg(short, long)]
    pub dimensions: Option<usize>,

    /// Edge length in device pixels
    #[arg(short, long)]
    pub side_length: Option<f64>,

    /// Lower bound of the field-of-view swing
    #[arg(long)]
    pub min_fov: Option<f64>,

    /// Upper bound of the field-of-view swing
    #[arg(long)]
    pub max_fov: Option<f64>,

    /// Fade-in duration in milliseconds
    #[arg(long)]
    pub fade_in_ms: Option<f64>,

    /// Edge colour (hex)
    #[arg(short = 'c', long)]
    pub line_color: Option<String>,

    /// Music-state file to watch
    #[arg(short, long = "music")]
    pub music_state_path: Option<String>,

    /// Follow tempo from a MIDI clock
    #[arg(long)]
    pub midi_clock: Option<bool>,

    /// MIDI input device name for the clock
    #[arg(long)]
    pub midi_device: Option<String>,

    /// Seed for axis rebinding (reproducible runs)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Config file path or name (e.g., --cfg /full/path or --cfg myconf for ~/.config/rustseract/myconf.conf)
    #[arg(long)]
    pub cfg: Option<String>,

    /// Render off-screen and log frame statistics instead of drawing the TUI
    #[arg(long)]
    pub headless: bool,

    /// Stop after this many seconds (headless mode)
    #[arg(long)]
    pub seconds: Option<f64>,

    /// Write an example music-state file to this path and exit
    #[arg(long, value_name = "PATH")]
    pub init_music: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    #[serde(skip)]
    pub config_path: Option<PathBuf>,

    pub fps: f64,
    pub dimensions: usize,
    pub side_length: f64,
    pub min_fov: f64,
    pub max_fov: f64,
    pub fade_in_ms: f64,
    pub trail_alpha: f64,
    pub line_alpha: f64,
    pub line_color: String,
    pub line_width: f64,
    pub surface_scale: f64,
    pub music_state_path: String,
    pub midi_clock: bool,
    pub midi_device: String,
    pub seed: Option<u64>,
    pub log_file: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            config_path: None,
            fps: 60.0,
            dimensions: 4,
            side_length: 200.0,
            min_fov: DEFAULT_MIN_FOV,
            max_fov: DEFAULT_MAX_FOV,
            fade_in_ms: DEFAULT_FADE_IN_MS,
            trail_alpha: 0.1,
            line_alpha: 0.125,
            line_color: "FFFFFF".to_string(),
            line_width: 2.0,
            surface_scale: 4.0,
            music_state_path: String::new(),
            midi_clock: false,
            midi_device: String::new(),
            seed: None,
            log_file: String::new(),
        }
    }
}

fn config_dir() -> Result<PathBuf> {
    let home = std::env::var("HOME").context("HOME is not set")?;
    let dir = PathBuf::from(home).join(".config").join(APP_DIR);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// Expand a leading `~/` against `HOME`.
fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(path)
}

impl Settings {
    /// Apply explicitly given arguments. Returns whether any were given.
    pub fn merge_with_args(&mut self, args: &Args) -> bool {
        let mut args_provided = false;

        if let Some(fps) = args.fps {
            self.fps = fps;
            args_provided = true;
        }

        if let Some(dimensions) = args.dimensions {
            self.dimensions = dimensions;
            args_provided = true;
        }

        if let Some(side_length) = args.side_length {
            self.side_length = side_length;
            args_provided = true;
        }

        if let Some(min_fov) = args.min_fov {
            self.min_fov = min_fov;
            args_provided = true;
        }

        if let Some(max_fov) = args.max_fov {
            self.max_fov = max_fov;
            args_provided = true;
        }

        if let Some(fade_in_ms) = args.fade_in_ms {
            self.fade_in_ms = fade_in_ms;
            args_provided = true;
        }

        if let Some(ref line_color) = args.line_color {
            self.line_color = line_color.clone();
            args_provided = true;
        }

        if let Some(ref path) = args.music_state_path {
            self.music_state_path = path.clone();
            args_provided = true;
        }

        if let Some(midi_clock) = args.midi_clock {
            self.midi_clock = midi_clock;
            args_provided = true;
        }

        if let Some(ref midi_device) = args.midi_device {
            self.midi_device = midi_device.clone();
            args_provided = true;
        }

        if let Some(seed) = args.seed {
            self.seed = Some(seed);
            args_provided = true;
        }

        args_provided
    }

    pub fn config_path(cfg_arg: Option<&str>) -> Result<PathBuf> {
        let Some(cfg) = cfg_arg else {
            return Ok(config_dir()?.join("config.conf"));
        };

        let path = expand_home(cfg);
        if path.is_absolute() || cfg.contains('/') || cfg.contains('\\') {
            return Ok(path);
        }

        // bare name: a config in the app's config directory
        let filename = if cfg.ends_with(".conf") {
            cfg.to_string()
        } else {
            format!("{}.conf", cfg)
        };
        Ok(config_dir()?.join(filename))
    }

    pub fn load_with_path(cfg_arg: Option<&str>) -> Result<Self> {
        let path = Self::config_path(cfg_arg)?;
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let mut parsed: Self = toml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        parsed.config_path = Some(path.to_path_buf());
        parsed.sanitize();
        Ok(parsed)
    }

    /// Clamp values into usable ranges and normalise strings.
    pub fn sanitize(&mut self) {
        let finite_or = |value: f64, fallback: f64| if value.is_finite() { value } else { fallback };

        self.fps = finite_or(self.fps, 60.0).clamp(MIN_FPS, MAX_FPS);
        self.dimensions = self.dimensions.clamp(MIN_DIMENSIONS, MAX_DIMENSIONS);
        self.side_length = finite_or(self.side_length, 200.0);
        if self.side_length <= 0.0 {
            self.side_length = 200.0;
        }
        self.side_length = self.side_length.min(100_000.0);

        self.min_fov = finite_or(self.min_fov, DEFAULT_MIN_FOV).clamp(0.5, 2.0);
        self.max_fov = finite_or(self.max_fov, DEFAULT_MAX_FOV).clamp(0.5, 2.0);
        if self.min_fov > self.max_fov {
            std::mem::swap(&mut self.min_fov, &mut self.max_fov);
        }

        self.fade_in_ms = finite_or(self.fade_in_ms, DEFAULT_FADE_IN_MS).clamp(0.0, 600_000.0);
        self.trail_alpha = finite_or(self.trail_alpha, 0.1).clamp(0.0, 1.0);
        self.line_alpha = finite_or(self.line_alpha, 0.125).clamp(0.0, 1.0);
        self.line_width = finite_or(self.line_width, 2.0).clamp(0.5, 64.0);
        self.surface_scale = finite_or(self.surface_scale, 4.0).clamp(0.25, 64.0);

        self.line_color = Self::sanitize_color(&self.line_color);
        self.music_state_path = self.music_state_path.trim().to_string();
        self.midi_device = self.midi_device.trim().to_string();
        self.log_file = self.log_file.trim().to_string();
    }

    /// Uppercase six-digit hex without `#`; anything unparsable becomes white.
    fn sanitize_color(color: &str) -> String {
        match Rgb::from_hex(color) {
            Ok(rgb) => rgb.to_hex(),
            Err(_) => Rgb::WHITE.to_hex(),
        }
    }

    pub fn save(&self) -> Result<()> {
        let path = match self.config_path.clone() {
            Some(path) => path,
            None => Self::config_path(None)?,
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let mut sanitized = self.clone();
        sanitized.sanitize();

        let seed_line = match sanitized.seed {
            Some(seed) => format!("seed = {}", seed),
            None => "# seed = 42".to_string(),
        };

        let contents = format!(
            r#"# rustseract configuration file
# Edit this file while the program is running; changes apply on save
# without restarting the animation phase.

# Rendering frame rate (1-240)
fps = {}

# Hypercube dimensions (1-4). 4 draws the tesseract
dimensions = {}

# Edge length in device pixels (one raster pixel spans surface_scale of them)
side_length = {}

# Field-of-view swing bounds. The projection scales each point by fov^depth,
# so values just above 1.0 give a gentle perspective
min_fov = {}
max_fov = {}

# Fade-in duration in milliseconds after the music's root changes
fade_in_ms = {}

# Trail overlay alpha (0.0-1.0). Lower values leave longer trails
trail_alpha = {}

# Edge colour (hex) and alpha (0.0-1.0). Overlapping edges brighten
line_color = {:?}
line_alpha = {}

# Edge width in device pixels
line_width = {}

# Device pixels per raster pixel. Larger values show the shape smaller
surface_scale = {}

# Music-state TOML file (empty = music.toml next to this config)
music_state_path = {:?}

# Follow tempo from a MIDI clock (24 pulses per quarter note)
# Options: true, false
midi_clock = {}

# MIDI input device for the clock (empty = first available port)
midi_device = {:?}

# Seed for the random axis rebinding. Remove for a fresh choice every run
{}

# Log file for TUI mode (empty = rustseract.log next to this config)
log_file = {:?}
"#,
            sanitized.fps,
            sanitized.dimensions,
            sanitized.side_length,
            sanitized.min_fov,
            sanitized.max_fov,
            sanitized.fade_in_ms,
            sanitized.trail_alpha,
            sanitized.line_color,
            sanitized.line_alpha,
            sanitized.line_width,
            sanitized.surface_scale,
            sanitized.music_state_path,
            sanitized.midi_clock,
            sanitized.midi_device,
            seed_line,
            sanitized.log_file,
        );

        std::fs::write(&path, contents)
            .with_context(|| format!("writing config {}", path.display()))?;
        Ok(())
    }

    /// Directory holding the config file, used for default sibling paths.
    fn base_dir(&self) -> Result<PathBuf> {
        match self.config_path.as_ref().and_then(|p| p.parent()) {
            Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
            _ => config_dir(),
        }
    }

    pub fn music_path(&self) -> Result<PathBuf> {
        if self.music_state_path.is_empty() {
            return Ok(self.base_dir()?.join("music.toml"));
        }
        Ok(expand_home(&self.music_state_path))
    }

    pub fn log_path(&self) -> Result<PathBuf> {
        if self.log_file.is_empty() {
            return Ok(self.base_dir()?.join(format!("{}.log", APP_DIR)));
        }
        Ok(expand_home(&self.log_file))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        let line = Rgb::from_hex(&self.line_color).unwrap_or(Rgb::WHITE);
        EngineSettings {
            fade_in_ms: self.fade_in_ms,
            min_fov: self.min_fov,
            max_fov: self.max_fov,
            style: StrokeStyle {
                trail: Rgb::BLACK.with_alpha(self.trail_alpha as f32),
                line: line.with_alpha(self.line_alpha as f32),
                line_width: self.line_width,
            },
        }
    }

    /// Whether switching to `other` needs a new shape.
    pub fn geometry_changed(&self, other: &Settings) -> bool {
        self.dimensions != other.dimensions || self.side_length != other.side_length
    }
}

fn is_relevant(event: &NotifyEvent, file_name: &std::ffi::OsStr) -> bool {
    matches!(event.kind, EventKind::Modify(_) | EventKind::Create(_) | EventKind::Remove(_))
        && event.paths.iter().any(|p| p.file_name() == Some(file_name))
}

/// Call `on_change` whenever `path` is written, created or removed.
///
/// The parent directory is watched so editors that replace the file on save
/// are still seen. Bursts of events are coalesced into one call. Dropping or
/// unsubscribing the returned handle stops the watcher thread.
pub fn watch_path<F>(path: &Path, mut on_change: F) -> Result<Subscription>
where
    F: FnMut() + Send + 'static,
{
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .with_context(|| format!("{} has no file name", path.display()))?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    let (tx, rx) = mpsc::channel();
    let mut watcher = RecommendedWatcher::new(tx, Config::default())?;
    watcher
        .watch(&dir, RecursiveMode::NonRecursive)
        .with_context(|| format!("watching {}", dir.display()))?;

    let label = path.display().to_string();
    thread::spawn(move || {
        // ends once the watcher (and with it the sender) is dropped
        while let Ok(result) = rx.recv() {
            let mut changed = match result {
                Ok(event) => is_relevant(&event, &file_name),
                Err(e) => {
                    warn!("watch error on {}: {}", label, e);
                    false
                }
            };
            loop {
                match rx.recv_timeout(WATCH_SETTLE) {
                    Ok(Ok(event)) => changed |= is_relevant(&event, &file_name),
                    Ok(Err(_)) => {}
                    Err(mpsc::RecvTimeoutError::Timeout) => break,
                    Err(mpsc::RecvTimeoutError::Disconnected) => return,
                }
            }
            if changed {
                debug!("{} changed", label);
                on_change();
            }
        }
    });

    Ok(Subscription::new(move || drop(watcher)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Instant;

    #[test]
    fn test_sanitize_clamps_and_orders() {
        let mut settings = Settings {
            fps: 10_000.0,
            dimensions: 9,
            side_length: -5.0,
            min_fov: 1.5,
            max_fov: 1.1,
            trail_alpha: 4.0,
            line_color: "#ff8000".to_string(),
            music_state_path: "  song.toml ".to_string(),
            ..Settings::default()
        };
        settings.sanitize();

        assert_eq!(settings.fps, MAX_FPS);
        assert_eq!(settings.dimensions, MAX_DIMENSIONS);
        assert_eq!(settings.side_length, 200.0);
        assert_eq!((settings.min_fov, settings.max_fov), (1.1, 1.5));
        assert_eq!(settings.trail_alpha, 1.0);
        assert_eq!(settings.line_color, "FF8000");
        assert_eq!(settings.music_state_path, "song.toml");

        let mut zero = Settings { dimensions: 0, line_color: "nope".to_string(), ..Settings::default() };
        zero.sanitize();
        assert_eq!(zero.dimensions, MIN_DIMENSIONS);
        assert_eq!(zero.line_color, "FFFFFF");
    }

    #[test]
    fn test_merge_with_args() {
        let mut settings = Settings::default();
        assert!(!settings.merge_with_args(&Args::default()));

        let args = Args {
            fps: Some(30.0),
            dimensions: Some(3),
            seed: Some(9),
            midi_clock: Some(true),
            ..Args::default()
        };
        assert!(settings.merge_with_args(&args));
        assert_eq!(settings.fps, 30.0);
        assert_eq!(settings.dimensions, 3);
        assert_eq!(settings.seed, Some(9));
        assert!(settings.midi_clock);
    }

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["rustseract", "--headless", "--seconds", "2", "-d", "3", "--music", "m.toml"]);
        assert!(args.headless);
        assert_eq!(args.seconds, Some(2.0));
        assert_eq!(args.dimensions, Some(3));
        assert_eq!(args.music_state_path.as_deref(), Some("m.toml"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.conf");
        let settings = Settings {
            config_path: Some(path.clone()),
            dimensions: 3,
            side_length: 150.0,
            min_fov: 1.001,
            seed: Some(1234),
            midi_device: "IAC Bus 1".to_string(),
            ..Settings::default()
        };
        settings.save().unwrap();

        let cfg = path.to_str().unwrap();
        let loaded = Settings::load_with_path(Some(cfg)).unwrap();
        assert_eq!(loaded, settings);

        let contents = std::fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("# rustseract configuration file"));
    }

    #[test]
    fn test_unseeded_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.conf");
        let settings = Settings { config_path: Some(path.clone()), ..Settings::default() };
        settings.save().unwrap();
        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.seed, None);
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.conf");
        std::fs::write(&path, "fps = 30\ndimensions = 2\n").unwrap();
        let loaded = Settings::load_from(&path).unwrap();
        assert_eq!(loaded.fps, 30.0);
        assert_eq!(loaded.dimensions, 2);
        assert_eq!(loaded.side_length, 200.0);
    }

    #[test]
    fn test_default_sibling_paths() {
        let dir = tempfile::tempdir().unwrap();
        let settings = Settings {
            config_path: Some(dir.path().join("config.conf")),
            ..Settings::default()
        };
        assert_eq!(settings.music_path().unwrap(), dir.path().join("music.toml"));
        assert_eq!(settings.log_path().unwrap(), dir.path().join("rustseract.log"));
    }

    #[test]
    fn test_engine_settings_from_colours() {
        let settings = Settings { line_color: "FF0000".to_string(), line_alpha: 0.5, ..Settings::default() };
        let engine = settings.engine_settings();
        assert_eq!(engine.style.line.r, 1.0);
        assert_eq!(engine.style.line.g, 0.0);
        assert_eq!(engine.style.line.a, 0.5);
        assert!((engine.style.trail.a - 0.1).abs() < 1e-6);
        assert_eq!(engine.min_fov, DEFAULT_MIN_FOV);
    }

    #[test]
    fn test_watch_path_sees_writes_until_unsubscribed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched.toml");
        std::fs::write(&path, "a = 1\n").unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let mut sub = watch_path(&path, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        std::fs::write(dir.path().join("other.toml"), "b = 2\n").unwrap();
        std::fs::write(&path, "a = 2\n").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while calls.load(Ordering::SeqCst) == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(20));
        }
        assert!(calls.load(Ordering::SeqCst) >= 1);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
    }
}
