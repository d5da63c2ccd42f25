// rustseract - Music-synchronised 4D hypercube animation for the terminal
// Hosts the engine in a ratatui TUI, or off-screen with --headless
use anyhow::{Context, Result};
use clap::Parser;
use crossterm::event::{poll, read, Event, KeyCode, KeyEventKind, KeyModifiers};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::ExecutableCommand;
use rand::rngs::StdRng;
use rand::SeedableRng;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::Rect;
use ratatui::Terminal;
use std::fs::OpenOptions;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use rustseract::animation::{AnimationDriver, FrameReport, FrameScheduler};
use rustseract::config::{watch_path, Args, Settings};
use rustseract::geometry::build_hypercube;
use rustseract::midi::{connect_clock, list_midi_ports, MidiClock};
use rustseract::music::{example_music_state, watch_music_file, write_music_state, MusicStateHub, MusicStateReceiver};
use rustseract::surface::PixelSurface;
use rustseract::tui::{self, raster_size, HostStatus};
use rustseract::types::Subscription;

/// Off-screen raster size for headless runs.
const HEADLESS_RASTER: (usize, usize) = (160, 90);

/// Longest single sleep in headless mode, so Ctrl+C is noticed promptly.
const HEADLESS_MAX_WAIT: Duration = Duration::from_millis(100);

fn init_logging(settings: &Settings, headless: bool) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if headless {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .init();
    } else {
        // the terminal belongs to the UI, so logs go to a file
        let path = settings.log_path()?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening log file {}", path.display()))?;
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_ansi(false)
            .with_writer(Mutex::new(file))
            .init();
    }
    Ok(())
}

/// Everything the frame loop needs, independent of where frames end up.
struct Host {
    settings: Settings,
    config_path: PathBuf,
    driver: AnimationDriver<StdRng>,
    scheduler: FrameScheduler,
    music_rx: MusicStateReceiver,
    settings_rx: mpsc::Receiver<()>,
    status: HostStatus,
    subscriptions: Vec<Subscription>,
    clock: Option<MidiClock>,
}

impl Host {
    fn start(settings: Settings, config_path: PathBuf) -> Result<Self> {
        let hub = Arc::new(MusicStateHub::new());
        let music_path = settings.music_path()?;

        let mut subscriptions = Vec::new();
        subscriptions.push(watch_music_file(music_path.clone(), hub.clone())?);

        let (settings_tx, settings_rx) = mpsc::channel();
        subscriptions.push(watch_path(&config_path, move || {
            let _ = settings_tx.send(());
        })?);

        let clock = if settings.midi_clock {
            match connect_clock(&settings.midi_device, hub.clone()) {
                Ok(clock) => Some(clock),
                Err(e) => {
                    warn!("MIDI clock unavailable, using music-state tempo: {:#}", e);
                    if let Ok(ports) = list_midi_ports() {
                        info!("Available MIDI inputs: {:?}", ports);
                    }
                    None
                }
            }
        } else {
            None
        };

        let rng = match settings.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let now = Instant::now();
        let shape = build_hypercube(settings.dimensions, settings.side_length)?;
        let driver = AnimationDriver::new(shape, settings.engine_settings(), rng, now);
        let scheduler = FrameScheduler::new(settings.fps, now);

        let status = HostStatus {
            music_source: music_path.display().to_string(),
            clock: clock.as_ref().map(|c| c.port_name().to_string()),
            dimensions: settings.dimensions,
            target_fps: settings.fps,
        };

        info!(
            "Started: {}D hypercube, side {}, {} fps, music {}",
            settings.dimensions,
            settings.side_length,
            settings.fps,
            music_path.display()
        );

        Ok(Host {
            settings,
            config_path,
            driver,
            scheduler,
            music_rx: hub.subscribe(),
            settings_rx,
            status,
            subscriptions,
            clock,
        })
    }

    /// Reload the settings file if it changed. Never touches the animation phase.
    fn reload_settings(&mut self, surface: &mut PixelSurface) {
        let mut changed = false;
        while self.settings_rx.try_recv().is_ok() {
            changed = true;
        }
        if !changed {
            return;
        }

        let new_settings = match Settings::load_from(&self.config_path) {
            Ok(s) => s,
            Err(e) => {
                warn!("Keeping previous settings: {:#}", e);
                return;
            }
        };
        if new_settings == self.settings {
            return;
        }

        if self.settings.geometry_changed(&new_settings) {
            match build_hypercube(new_settings.dimensions, new_settings.side_length) {
                Ok(shape) => self.driver.set_shape(shape),
                Err(e) => warn!("Keeping previous shape: {}", e),
            }
        }
        if new_settings.fps != self.settings.fps {
            self.scheduler.set_fps(new_settings.fps);
        }
        surface.set_scale(new_settings.surface_scale);
        self.driver.set_settings(new_settings.engine_settings());

        if new_settings.music_state_path != self.settings.music_state_path
            || new_settings.midi_clock != self.settings.midi_clock
            || new_settings.midi_device != self.settings.midi_device
        {
            info!("Music source changes apply on restart");
        }

        self.status.dimensions = new_settings.dimensions;
        self.status.target_fps = new_settings.fps;
        self.settings = new_settings;
        info!("Settings reloaded from {}", self.config_path.display());
    }

    /// Draw a frame if one is due.
    fn frame(&mut self, now: Instant, surface: &mut PixelSurface) -> Option<FrameReport> {
        if !self.scheduler.poll_frame(now) {
            return None;
        }
        if self.driver.sync_music(&mut self.music_rx, now) {
            debug!("Phase now {:?}", self.driver.phase_at(now));
        }
        Some(self.driver.tick(now, surface))
    }

    /// Tear down scheduling and every provider. Safe to call more than once.
    fn shutdown(&mut self) {
        if self.scheduler.cancel() {
            info!("Stopped after {} frames", self.driver.frames());
        }
        for subscription in &mut self.subscriptions {
            subscription.unsubscribe();
        }
        if let Some(clock) = self.clock.as_mut() {
            clock.close();
        }
    }
}

impl Drop for Host {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_tui(host: &mut Host) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    stdout.execute(EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;
    terminal.clear()?;

    let result = tui_loop(host, &mut terminal);

    host.shutdown();
    terminal.show_cursor()?;
    disable_raw_mode()?;
    terminal.backend_mut().execute(LeaveAlternateScreen)?;
    result
}

fn tui_loop(host: &mut Host, terminal: &mut Terminal<CrosstermBackend<io::Stdout>>) -> Result<()> {
    let (width, height) = raster_size(terminal.size()?);
    let mut surface = PixelSurface::new(width, height, host.settings.surface_scale);
    let _resize_log = surface.on_resize(|w, h| debug!("Surface resized to {:.0}x{:.0}", w, h));

    loop {
        let Some(wait) = host.scheduler.time_until_next(Instant::now()) else {
            return Ok(());
        };

        if poll(wait)? {
            match read()? {
                Event::Key(key) if key.kind == KeyEventKind::Press => match key.code {
                    KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(()),
                    KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => return Ok(()),
                    _ => {}
                },
                Event::Resize(cols, rows) => {
                    let (w, h) = raster_size(Rect::new(0, 0, cols, rows));
                    surface.resize(w, h);
                }
                _ => {}
            }
        }

        host.reload_settings(&mut surface);

        if let Some(report) = host.frame(Instant::now(), &mut surface) {
            terminal.draw(|f| tui::draw(f, &surface, &report, &host.status))?;
        }
    }
}

fn run_headless(host: &mut Host, seconds: Option<f64>) -> Result<()> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })?;

    let start = Instant::now();
    let deadline = seconds
        .filter(|s| s.is_finite() && *s >= 0.0)
        .map(|s| start + Duration::from_secs_f64(s.min(1.0e7)));

    let (width, height) = HEADLESS_RASTER;
    let mut surface = PixelSurface::new(width, height, host.settings.surface_scale);
    let mut drawn = 0u64;
    let mut last_log = start;
    let mut last_phase = None;

    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if deadline.is_some_and(|d| now >= d) {
            break;
        }
        let Some(wait) = host.scheduler.time_until_next(now) else {
            break;
        };
        if !wait.is_zero() {
            thread::sleep(wait.min(HEADLESS_MAX_WAIT));
            continue;
        }

        host.reload_settings(&mut surface);

        if let Some(report) = host.frame(Instant::now(), &mut surface) {
            if report.drawn {
                drawn += 1;
            }
            if last_phase != Some(report.phase) {
                info!("Phase: {}", report.phase.name());
                last_phase = Some(report.phase);
            }
            if now.duration_since(last_log) >= Duration::from_secs(1) {
                info!(
                    "frame {} | {} | opacity {:.2} | fov {:.5} | {:.1} bpm | brightness {:.4}",
                    report.frame,
                    report.phase.name(),
                    report.opacity,
                    report.field_of_view,
                    report.bpm,
                    surface.mean_brightness()
                );
                last_log = now;
            }
        }
    }

    host.shutdown();
    info!(
        "Headless run finished: {} frames drawn in {:.1}s",
        drawn,
        start.elapsed().as_secs_f64()
    );
    Ok(())
}

fn init_music(path: &Path) -> Result<()> {
    write_music_state(path, &example_music_state())?;
    println!("Wrote example music state to {}", path.display());
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(path) = args.init_music.as_deref() {
        return init_music(path);
    }

    let cfg_arg = args.cfg.as_deref();
    let config_path = Settings::config_path(cfg_arg)?;
    let config_file_exists = config_path.exists();

    let mut settings = if config_file_exists {
        match Settings::load_from(&config_path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("Failed to load config file: {:#}", e);
                eprintln!("Config file: {}", config_path.display());
                eprintln!("Please fix the config file or delete it to regenerate with defaults.");
                return Err(e);
            }
        }
    } else {
        Settings { config_path: Some(config_path.clone()), ..Settings::default() }
    };

    let args_provided = settings.merge_with_args(&args);
    settings.sanitize();

    // persist CLI choices, and create the file on first run
    if !config_file_exists || args_provided {
        settings.save()?;
    }

    init_logging(&settings, args.headless)?;
    info!("Using config file: {}", config_path.display());

    let music_path = settings.music_path()?;
    if !config_file_exists && !music_path.exists() {
        write_music_state(&music_path, &example_music_state())?;
        info!("Created example music state at {}", music_path.display());
    }

    let mut host = Host::start(settings, config_path)?;
    if args.headless {
        run_headless(&mut host, args.seconds)
    } else {
        run_tui(&mut host)
    }
}
