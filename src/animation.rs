// Animation Module - fade-in state machine, field-of-view oscillation and frame scheduling
use rand::Rng;
use std::f64::consts::PI;
use std::slice;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::geometry::{Coordinates, Plane, Shape};
use crate::music::{MusicState, MusicStateReceiver, Track};
use crate::renderer::{draw_scene, Camera, StrokeStyle};
use crate::rotation::{derive_config, VisualiserConfig, TICKS_PER_BEAT};
use crate::surface::DrawingSurface;

pub const DEFAULT_FADE_IN_MS: f64 = 3000.0;
pub const DEFAULT_MIN_FOV: f64 = 1.002;
pub const DEFAULT_MAX_FOV: f64 = 1.0025;

pub const MIN_FPS: f64 = 1.0;
pub const MAX_FPS: f64 = 240.0;

/// Tunables the driver reads every tick. Replacing them never moves the phase.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EngineSettings {
    pub fade_in_ms: f64,
    pub min_fov: f64,
    pub max_fov: f64,
    pub style: StrokeStyle,
}

impl Default for EngineSettings {
    fn default() -> Self {
        EngineSettings {
            fade_in_ms: DEFAULT_FADE_IN_MS,
            min_fov: DEFAULT_MIN_FOV,
            max_fov: DEFAULT_MAX_FOV,
            style: StrokeStyle::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationPhase {
    /// No music state: fully transparent, nothing drawn.
    Idle,
    FadingIn,
    Steady,
}

impl AnimationPhase {
    pub fn name(self) -> &'static str {
        match self {
            AnimationPhase::Idle => "idle",
            AnimationPhase::FadingIn => "fading in",
            AnimationPhase::Steady => "steady",
        }
    }
}

/// Quadratic fade from 0 to 1 over `fade_ms`.
pub fn opacity(elapsed_ms: f64, fade_ms: f64) -> f64 {
    if !(fade_ms.is_finite() && fade_ms > 0.0) {
        return 1.0;
    }
    if !(elapsed_ms.is_finite() && elapsed_ms > 0.0) {
        return 0.0;
    }
    (elapsed_ms / fade_ms).powi(2).min(1.0)
}

/// Beats covered by one kick loop, halved so the fov swing spans two loops.
pub fn beats_in_loop(kick_loop_ticks: u64) -> f64 {
    kick_loop_ticks as f64 / TICKS_PER_BEAT as f64 / 2.0
}

/// Cosine swing across `[min_fov, max_fov]`, starting at the minimum.
///
/// An empty kick loop (no beats) holds the minimum.
pub fn field_of_view(elapsed_ms: f64, bpm: f64, beats_in_loop: f64, min_fov: f64, max_fov: f64) -> f64 {
    let (low, high) = if min_fov <= max_fov { (min_fov, max_fov) } else { (max_fov, min_fov) };
    if !(beats_in_loop > 0.0 && bpm.is_finite() && elapsed_ms.is_finite()) {
        return low;
    }
    let theta = elapsed_ms / 60_000.0 * (bpm / beats_in_loop);
    let swing = ((theta + PI).cos() + 1.0) / 2.0;
    (low + (high - low) * swing).clamp(low, high)
}

/// What one tick did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub phase: AnimationPhase,
    pub opacity: f64,
    pub field_of_view: f64,
    pub bpm: f64,
    /// `false` when idle or when the surface was not ready.
    pub drawn: bool,
}

/// Owns the shape, camera and current rotation config, and draws one frame
/// per `tick`. The only writer of the shape's rotation.
pub struct AnimationDriver<R: Rng> {
    settings: EngineSettings,
    shape: Shape,
    camera: Camera,
    config: VisualiserConfig,
    music: Option<MusicState>,
    rng: R,
    frames: u64,
}

impl<R: Rng> AnimationDriver<R> {
    pub fn new(shape: Shape, settings: EngineSettings, rng: R, now: Instant) -> Self {
        let mut camera = Camera::new(settings.max_fov);
        camera.position = Coordinates::ORIGIN.with(Plane::Z, shape.side_length());
        AnimationDriver {
            config: VisualiserConfig::initial(settings.max_fov, now),
            settings,
            shape,
            camera,
            music: None,
            rng,
            frames: 0,
        }
    }

    /// Rebuild the rotation config from a new snapshot. `None` (or a snapshot
    /// with an unusable tempo) puts the driver in Idle.
    pub fn apply_music_state(&mut self, state: Option<MusicState>, now: Instant) {
        let state = state.and_then(MusicState::validated);
        let previous_root = self.config.root;

        self.config = derive_config(state.as_ref(), &self.config, self.settings.max_fov, now, &mut self.rng);
        self.camera.field_of_view = self.settings.max_fov;

        if self.config.root != previous_root {
            info!(
                "Phase reset: root {:?} -> {:?}",
                previous_root, self.config.root
            );
        }
        debug!(
            "Music state applied: bpm={:.1}, pad axis={:?}",
            self.config.bpm, self.config.pad_axis
        );
        self.music = state;
    }

    /// Apply the latest published snapshot, if any arrived since the last call.
    pub fn sync_music(&mut self, receiver: &mut MusicStateReceiver, now: Instant) -> bool {
        match receiver.take_update() {
            Some(state) => {
                self.apply_music_state(state, now);
                true
            }
            None => false,
        }
    }

    pub fn phase_at(&self, now: Instant) -> AnimationPhase {
        if self.music.is_none() {
            return AnimationPhase::Idle;
        }
        if self.config.elapsed_ms(now) < self.settings.fade_in_ms {
            AnimationPhase::FadingIn
        } else {
            AnimationPhase::Steady
        }
    }

    pub fn opacity_at(&self, now: Instant) -> f64 {
        match self.phase_at(now) {
            AnimationPhase::Idle => 0.0,
            AnimationPhase::FadingIn => opacity(self.config.elapsed_ms(now), self.settings.fade_in_ms),
            AnimationPhase::Steady => 1.0,
        }
    }

    pub fn field_of_view_at(&self, now: Instant) -> f64 {
        let kick_ticks = self
            .music
            .as_ref()
            .map(|m| m.tracks.loop_ticks(Track::Kick))
            .unwrap_or(0);
        field_of_view(
            self.config.elapsed_ms(now),
            self.config.bpm,
            beats_in_loop(kick_ticks),
            self.settings.min_fov,
            self.settings.max_fov,
        )
    }

    /// Advance to `now` and draw onto `surface`.
    pub fn tick<S: DrawingSurface + ?Sized>(&mut self, now: Instant, surface: &mut S) -> FrameReport {
        self.frames += 1;
        let phase = self.phase_at(now);

        if phase == AnimationPhase::Idle {
            return FrameReport {
                frame: self.frames,
                phase,
                opacity: 0.0,
                field_of_view: self.camera.field_of_view,
                bpm: self.config.bpm,
                drawn: false,
            };
        }

        self.camera.field_of_view = self.field_of_view_at(now);
        // fresh snapshot each frame; the topology stays shared
        self.shape = self.shape.with_rotation(self.config.rotation_at(now));

        let drawn = draw_scene(surface, slice::from_ref(&self.shape), &self.camera, &self.settings.style);

        FrameReport {
            frame: self.frames,
            phase,
            opacity: self.opacity_at(now),
            field_of_view: self.camera.field_of_view,
            bpm: self.config.bpm,
            drawn,
        }
    }

    pub fn set_settings(&mut self, settings: EngineSettings) {
        self.settings = settings;
    }

    /// Swap in a new shape, carrying over the current rotation and position.
    pub fn set_shape(&mut self, shape: Shape) {
        let rotation = self.shape.rotation;
        let position = self.shape.position;
        self.camera.position = Coordinates::ORIGIN.with(Plane::Z, shape.side_length());
        self.shape = shape.with_rotation(rotation).with_position(position);
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn config(&self) -> &VisualiserConfig {
        &self.config
    }

    pub fn music(&self) -> Option<&MusicState> {
        self.music.as_ref()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Paces ticks to a target frame rate.
///
/// Hosts wait for `time_until_next` (an event poll timeout, a sleep) and then
/// call `poll_frame`. Once cancelled it never yields another frame.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    interval: Duration,
    next_due: Instant,
    cancelled: bool,
}

fn frame_interval(fps: f64) -> Duration {
    let fps = if fps.is_finite() { fps.clamp(MIN_FPS, MAX_FPS) } else { MIN_FPS };
    Duration::from_secs_f64(1.0 / fps)
}

impl FrameScheduler {
    /// The first frame is due immediately.
    pub fn new(fps: f64, now: Instant) -> Self {
        FrameScheduler { interval: frame_interval(fps), next_due: now, cancelled: false }
    }

    pub fn set_fps(&mut self, fps: f64) {
        self.interval = frame_interval(fps);
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// How long to wait before the next frame. `None` once cancelled.
    pub fn time_until_next(&self, now: Instant) -> Option<Duration> {
        if self.cancelled {
            return None;
        }
        Some(self.next_due.saturating_duration_since(now))
    }

    /// `true` when a frame is due at `now`; schedules the one after it.
    pub fn poll_frame(&mut self, now: Instant) -> bool {
        if self.cancelled || now < self.next_due {
            return false;
        }
        self.next_due += self.interval;
        // after a stall, skip the missed frames instead of bursting
        if self.next_due <= now {
            self.next_due = now + self.interval;
        }
        true
    }

    /// Stop scheduling. Returns `true` only for the call that actually cancelled.
    pub fn cancel(&mut self) -> bool {
        if self.cancelled {
            return false;
        }
        self.cancelled = true;
        true
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{build_hypercube, Axis};
    use crate::music::MusicStateHub;
    use crate::surface::PixelSurface;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn driver(now: Instant) -> AnimationDriver<StdRng> {
        let shape = build_hypercube(4, 200.0).unwrap();
        AnimationDriver::new(shape, EngineSettings::default(), StdRng::seed_from_u64(7), now)
    }

    fn music(root: i64) -> MusicState {
        MusicState::new(120.0, root)
            .with_track(Track::Bass, 4 * TICKS_PER_BEAT, 4)
            .with_track(Track::Pad, 8 * TICKS_PER_BEAT, 2)
            .with_track(Track::Kick, 4 * TICKS_PER_BEAT, 4)
    }

    #[test]
    fn test_opacity_curve() {
        assert_eq!(opacity(0.0, 3000.0), 0.0);
        assert_eq!(opacity(1500.0, 3000.0), 0.25);
        assert_eq!(opacity(3000.0, 3000.0), 1.0);
        assert_eq!(opacity(9000.0, 3000.0), 1.0);
        assert_eq!(opacity(100.0, 0.0), 1.0);

        let mut last = 0.0;
        for step in 0..=300 {
            let value = opacity(step as f64 * 10.0, 3000.0);
            assert!(value >= last);
            last = value;
        }
    }

    #[test]
    fn test_field_of_view_stays_in_band() {
        let beats = beats_in_loop(4 * TICKS_PER_BEAT);
        assert_eq!(beats, 2.0);
        assert_eq!(field_of_view(0.0, 120.0, beats, DEFAULT_MIN_FOV, DEFAULT_MAX_FOV), DEFAULT_MIN_FOV);

        for step in 0..2000 {
            let fov = field_of_view(step as f64 * 37.0, 133.0, beats, DEFAULT_MIN_FOV, DEFAULT_MAX_FOV);
            assert!((DEFAULT_MIN_FOV..=DEFAULT_MAX_FOV).contains(&fov), "fov {} out of band", fov);
        }
    }

    #[test]
    fn test_field_of_view_reaches_max_half_cycle_later() {
        // 120 bpm over 2 beats: theta advances 60 rad per minute
        let half_cycle_ms = PI / 60.0 * 60_000.0;
        let fov = field_of_view(half_cycle_ms, 120.0, 2.0, 1.0, 2.0);
        assert!((fov - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_kick_loop_holds_min_fov() {
        assert_eq!(field_of_view(12_345.0, 120.0, beats_in_loop(0), 1.002, 1.0025), 1.002);
    }

    #[test]
    fn test_idle_until_music_arrives() {
        let t0 = Instant::now();
        let mut d = driver(t0);
        let mut surface = PixelSurface::new(40, 30, 4.0);

        let report = d.tick(t0 + ms(100), &mut surface);
        assert_eq!(report.phase, AnimationPhase::Idle);
        assert_eq!(report.opacity, 0.0);
        assert!(!report.drawn);
        assert_eq!(surface.mean_brightness(), 0.0);

        let t1 = t0 + ms(500);
        d.apply_music_state(Some(music(3)), t1);
        assert_eq!(d.config().time_origin, t1);
        assert_eq!(d.phase_at(t1), AnimationPhase::FadingIn);
        assert_eq!(d.opacity_at(t1), 0.0);

        let report = d.tick(t1 + ms(1500), &mut surface);
        assert_eq!(report.phase, AnimationPhase::FadingIn);
        assert!((report.opacity - 0.25).abs() < 1e-9);
        assert!(report.drawn);
        assert!(surface.mean_brightness() > 0.0);

        assert_eq!(d.phase_at(t1 + ms(3000)), AnimationPhase::Steady);
        assert_eq!(d.opacity_at(t1 + ms(3000)), 1.0);
    }

    #[test]
    fn test_root_change_restarts_fade() {
        let t0 = Instant::now();
        let mut d = driver(t0);
        d.apply_music_state(Some(music(1)), t0);
        assert_eq!(d.phase_at(t0 + ms(5000)), AnimationPhase::Steady);

        d.apply_music_state(Some(music(1)), t0 + ms(5000));
        assert_eq!(d.config().time_origin, t0);
        assert_eq!(d.phase_at(t0 + ms(5000)), AnimationPhase::Steady);

        d.apply_music_state(Some(music(2)), t0 + ms(6000));
        assert_eq!(d.config().time_origin, t0 + ms(6000));
        assert_eq!(d.phase_at(t0 + ms(6000)), AnimationPhase::FadingIn);
    }

    #[test]
    fn test_empty_state_returns_to_idle() {
        let t0 = Instant::now();
        let mut d = driver(t0);
        d.apply_music_state(Some(music(1)), t0);
        d.apply_music_state(None, t0 + ms(4000));
        assert_eq!(d.phase_at(t0 + ms(4000)), AnimationPhase::Idle);
        assert_eq!(d.opacity_at(t0 + ms(4000)), 0.0);
    }

    #[test]
    fn test_invalid_tempo_is_idle() {
        let t0 = Instant::now();
        let mut d = driver(t0);
        d.apply_music_state(Some(MusicState::new(0.0, 1)), t0);
        assert_eq!(d.phase_at(t0), AnimationPhase::Idle);
    }

    #[test]
    fn test_tick_replaces_rotation_snapshot() {
        let t0 = Instant::now();
        let mut d = driver(t0);
        d.apply_music_state(Some(music(1)), t0);
        let before = d.shape().clone();

        // one bar at 120 bpm: bass spins za a quarter turn
        let mut surface = PixelSurface::new(0, 0, 1.0);
        let report = d.tick(t0 + ms(2000), &mut surface);
        assert!(!report.drawn);
        assert!(d.shape().shares_topology(&before));
        assert!((d.shape().rotation[Axis::ZA] - 90.0).abs() < 1e-6 || d.config().pad_axis == Some(Axis::ZA));
        assert_eq!(d.frames(), 1);
    }

    #[test]
    fn test_sync_music_takes_latest_only() {
        let t0 = Instant::now();
        let hub = MusicStateHub::new();
        let mut rx = hub.subscribe();
        let mut d = driver(t0);

        // the first sync always applies the current value
        assert!(d.sync_music(&mut rx, t0));
        assert!(d.music().is_none());

        hub.publish(Some(music(1)));
        hub.publish(Some(music(2)));
        assert!(d.sync_music(&mut rx, t0 + ms(10)));
        assert_eq!(d.music().map(|m| m.root), Some(2));
        assert!(!d.sync_music(&mut rx, t0 + ms(20)));
    }

    #[test]
    fn test_settings_swap_keeps_phase() {
        let t0 = Instant::now();
        let mut d = driver(t0);
        d.apply_music_state(Some(music(1)), t0);
        let origin = d.config().time_origin;

        d.set_settings(EngineSettings { fade_in_ms: 10_000.0, ..EngineSettings::default() });
        d.set_shape(build_hypercube(3, 100.0).unwrap());
        assert_eq!(d.config().time_origin, origin);
        assert_eq!(d.shape().dimensions(), 3);
        assert_eq!(d.phase_at(t0 + ms(5000)), AnimationPhase::FadingIn);
    }

    #[test]
    fn test_scheduler_paces_frames() {
        let t0 = Instant::now();
        let mut scheduler = FrameScheduler::new(50.0, t0);
        assert_eq!(scheduler.interval(), ms(20));
        assert!(scheduler.poll_frame(t0));
        assert!(!scheduler.poll_frame(t0 + ms(5)));
        assert_eq!(scheduler.time_until_next(t0 + ms(5)), Some(ms(15)));
        assert!(scheduler.poll_frame(t0 + ms(20)));

        // a long stall yields one frame, not a burst
        assert!(scheduler.poll_frame(t0 + ms(500)));
        assert!(!scheduler.poll_frame(t0 + ms(501)));
    }

    #[test]
    fn test_scheduler_cancel_is_idempotent() {
        let t0 = Instant::now();
        let mut scheduler = FrameScheduler::new(60.0, t0);
        assert!(scheduler.cancel());
        assert!(!scheduler.cancel());
        assert!(scheduler.is_cancelled());
        assert!(!scheduler.poll_frame(t0 + ms(1000)));
        assert_eq!(scheduler.time_until_next(t0), None);
    }

    #[test]
    fn test_fps_is_clamped() {
        let t0 = Instant::now();
        let mut scheduler = FrameScheduler::new(10_000.0, t0);
        assert_eq!(scheduler.interval(), Duration::from_secs_f64(1.0 / MAX_FPS));
        scheduler.set_fps(0.0);
        assert_eq!(scheduler.interval(), Duration::from_secs(1));
    }
}
