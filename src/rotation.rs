// Rotation Module - Tempo-locked rotation speeds and starting angles per axis
use rand::Rng;
use std::time::Instant;

use crate::geometry::{Axis, AxisMap, Rotation};
use crate::music::{MusicState, Track, Tracks};

/// Musical ticks in one beat.
pub const TICKS_PER_BEAT: u64 = 3840;
pub const BEATS_PER_BAR: u64 = 4;
pub const DEFAULT_BPM: f64 = 120.0;

/// Axis permanently driven by the bass loop.
pub const BASS_AXIS: Axis = Axis::ZA;

/// Track(s) whose loop sets each axis' starting angle, first track with notes wins.
pub const STARTING_ANGLE_TRACKS: [(Axis, &[Track]); 6] = [
    (Axis::XY, &[Track::Kick]),
    (Axis::XZ, &[Track::Clap]),
    (Axis::YZ, &[Track::Ride]),
    (Axis::XA, &[Track::OpenHat, Track::ClosedHat]),
    (Axis::YA, &[Track::Shaker]),
    (Axis::ZA, &[Track::Twig]),
];

/// Full rotations per bar for a loop of `loop_ticks`, so one spin lasts one
/// repetition of the pattern. Empty loops do not rotate.
pub fn ticks_to_rotation(loop_ticks: u64) -> f64 {
    if loop_ticks == 0 {
        return 0.0;
    }
    (BEATS_PER_BAR * TICKS_PER_BEAT) as f64 / loop_ticks as f64
}

pub fn ms_per_bar(bpm: f64) -> f64 {
    60_000.0 / (bpm / BEATS_PER_BAR as f64)
}

/// Bars elapsed after `elapsed_ms` at `bpm`. A non-positive tempo never advances.
pub fn bars_elapsed(elapsed_ms: f64, bpm: f64) -> f64 {
    if !(bpm.is_finite() && bpm > 0.0) || !elapsed_ms.is_finite() {
        return 0.0;
    }
    elapsed_ms / ms_per_bar(bpm)
}

/// Angle in degrees, unreduced. The projector normalizes modulo 360.
pub fn get_angle(starting_angle: f64, quarter_turns_per_bar: f64, bars_elapsed: f64) -> f64 {
    starting_angle + bars_elapsed * quarter_turns_per_bar * 90.0
}

/// Starting angle from the first candidate track that has notes; 0 when none do.
pub fn starting_angle(tracks: &Tracks, candidates: &[Track]) -> f64 {
    candidates
        .iter()
        .filter_map(|&track| tracks.get(track))
        .find(|state| state.notes > 0)
        .map(|state| ticks_to_rotation(state.loop_ticks) * 360.0)
        .unwrap_or(0.0)
}

/// Rotation parameters derived from one music-state snapshot.
///
/// Rebuilt wholesale on every music-state update, never edited in place.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualiserConfig {
    pub field_of_view: f64,
    pub bpm: f64,
    pub rotation_speed: AxisMap<f64>,
    pub rotation_starting_angle: AxisMap<f64>,
    pub time_origin: Instant,
    pub root: Option<i64>,
    /// Axis the pad loop was bound to by the last update.
    pub pad_axis: Option<Axis>,
}

impl VisualiserConfig {
    pub fn initial(field_of_view: f64, now: Instant) -> Self {
        VisualiserConfig {
            field_of_view,
            bpm: DEFAULT_BPM,
            rotation_speed: AxisMap::default(),
            rotation_starting_angle: AxisMap::default(),
            time_origin: now,
            root: None,
            pad_axis: None,
        }
    }

    pub fn elapsed_ms(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.time_origin).as_secs_f64() * 1000.0
    }

    pub fn bars_elapsed(&self, now: Instant) -> f64 {
        bars_elapsed(self.elapsed_ms(now), self.bpm)
    }

    /// Per-axis angle at `now`.
    pub fn rotation_at(&self, now: Instant) -> Rotation {
        let bars = self.bars_elapsed(now);
        AxisMap::from_fn(|axis| {
            get_angle(self.rotation_starting_angle[axis], self.rotation_speed[axis], bars)
        })
    }
}

/// Build the config for a new music-state snapshot.
///
/// The bass loop drives `za`, the pad loop drives one axis picked from all six
/// by `rng`, every other axis stands still. `time_origin` moves to `now` only
/// when the root identity differs from `previous`.
pub fn derive_config<R: Rng + ?Sized>(
    music: Option<&MusicState>,
    previous: &VisualiserConfig,
    field_of_view: f64,
    now: Instant,
    rng: &mut R,
) -> VisualiserConfig {
    let root = music.map(|m| m.root);
    let time_origin = if root != previous.root { now } else { previous.time_origin };

    let empty = Tracks::default();
    let tracks = music.map(|m| &m.tracks).unwrap_or(&empty);

    let mut rotation_speed = AxisMap::splat(0.0);
    rotation_speed[BASS_AXIS] = ticks_to_rotation(tracks.loop_ticks(Track::Bass));
    let pad_axis = Axis::ALL[rng.gen_range(0..Axis::ALL.len())];
    rotation_speed[pad_axis] = ticks_to_rotation(tracks.loop_ticks(Track::Pad));

    let mut rotation_starting_angle = AxisMap::splat(0.0);
    for (axis, candidates) in STARTING_ANGLE_TRACKS {
        rotation_starting_angle[axis] = starting_angle(tracks, candidates);
    }

    VisualiserConfig {
        field_of_view,
        bpm: music.map(|m| m.bpm).unwrap_or(DEFAULT_BPM),
        rotation_speed,
        rotation_starting_angle,
        time_origin,
        root,
        pad_axis: Some(pad_axis),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn bar_ticks() -> u64 {
        BEATS_PER_BAR * TICKS_PER_BEAT
    }

    #[test]
    fn test_ticks_to_rotation() {
        assert_eq!(ticks_to_rotation(0), 0.0);
        assert_eq!(ticks_to_rotation(4 * TICKS_PER_BEAT), 1.0);
        assert_eq!(ticks_to_rotation(8 * TICKS_PER_BEAT), 0.5);
        assert_eq!(ticks_to_rotation(2 * TICKS_PER_BEAT), 2.0);
    }

    #[test]
    fn test_get_angle() {
        assert_eq!(get_angle(10.0, 2.0, 1.5), 280.0);
        assert_eq!(get_angle(45.0, 0.0, 100.0), 45.0);
    }

    #[test]
    fn test_bars_elapsed() {
        // 120 bpm: 2000 ms per bar
        assert_abs_diff_eq!(ms_per_bar(120.0), 2000.0);
        assert_abs_diff_eq!(bars_elapsed(3000.0, 120.0), 1.5);
        assert_eq!(bars_elapsed(3000.0, 0.0), 0.0);
        assert_eq!(bars_elapsed(3000.0, -5.0), 0.0);
    }

    #[test]
    fn test_starting_angle_fallback() {
        let mut tracks = Tracks::default();
        assert_eq!(starting_angle(&tracks, &[Track::OpenHat, Track::ClosedHat]), 0.0);

        tracks.closed_hat = Some(crate::music::TrackState::new(bar_ticks() / 2, 3));
        assert_eq!(starting_angle(&tracks, &[Track::OpenHat, Track::ClosedHat]), 720.0);

        // open hat present but silent still falls through
        tracks.open_hat = Some(crate::music::TrackState::new(bar_ticks(), 0));
        assert_eq!(starting_angle(&tracks, &[Track::OpenHat, Track::ClosedHat]), 720.0);

        tracks.open_hat = Some(crate::music::TrackState::new(bar_ticks(), 1));
        assert_eq!(starting_angle(&tracks, &[Track::OpenHat, Track::ClosedHat]), 360.0);
    }

    #[test]
    fn test_axis_binding() {
        let now = Instant::now();
        let state = MusicState::new(120.0, 1)
            .with_track(Track::Bass, bar_ticks(), 4)
            .with_track(Track::Pad, 2 * bar_ticks(), 4);
        let mut rng = StdRng::seed_from_u64(7);
        let previous = VisualiserConfig::initial(1.0025, now);

        for _ in 0..20 {
            let config = derive_config(Some(&state), &previous, 1.0025, now, &mut rng);
            let pad_axis = config.pad_axis.unwrap();
            for axis in Axis::ALL {
                let speed = config.rotation_speed[axis];
                if axis == pad_axis {
                    assert_eq!(speed, 0.5);
                } else if axis == BASS_AXIS {
                    assert_eq!(speed, 1.0);
                } else {
                    assert_eq!(speed, 0.0);
                }
            }
        }
    }

    #[test]
    fn test_rebinding_is_reproducible_with_seed() {
        let now = Instant::now();
        let state = MusicState::new(120.0, 1).with_track(Track::Pad, bar_ticks(), 1);
        let previous = VisualiserConfig::initial(1.0, now);

        let picks = |seed| {
            let mut rng = StdRng::seed_from_u64(seed);
            (0..10)
                .map(|_| derive_config(Some(&state), &previous, 1.0, now, &mut rng).pad_axis)
                .collect::<Vec<_>>()
        };
        assert_eq!(picks(42), picks(42));
    }

    #[test]
    fn test_every_axis_can_be_rebound() {
        let now = Instant::now();
        let state = MusicState::new(120.0, 1).with_track(Track::Pad, bar_ticks(), 1);
        let previous = VisualiserConfig::initial(1.0, now);
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..500 {
            let config = derive_config(Some(&state), &previous, 1.0, now, &mut rng);
            seen.insert(config.pad_axis.unwrap());
        }
        assert_eq!(seen.len(), 6);
    }

    #[test]
    fn test_time_origin_resets_only_on_root_change() {
        let t0 = Instant::now();
        let t1 = t0 + Duration::from_secs(5);
        let t2 = t0 + Duration::from_secs(9);
        let mut rng = StdRng::seed_from_u64(3);

        let initial = VisualiserConfig::initial(1.0, t0);
        let first = derive_config(Some(&MusicState::new(120.0, 4)), &initial, 1.0, t1, &mut rng);
        assert_eq!(first.time_origin, t1);

        let same_root = derive_config(Some(&MusicState::new(90.0, 4)), &first, 1.0, t2, &mut rng);
        assert_eq!(same_root.time_origin, t1);
        assert_eq!(same_root.bpm, 90.0);

        let new_root = derive_config(Some(&MusicState::new(90.0, 5)), &same_root, 1.0, t2, &mut rng);
        assert_eq!(new_root.time_origin, t2);

        let cleared = derive_config(None, &new_root, 1.0, t2 + Duration::from_secs(1), &mut rng);
        assert_eq!(cleared.root, None);
        assert_eq!(cleared.time_origin, t2 + Duration::from_secs(1));
    }

    #[test]
    fn test_rotation_at_advances_with_tempo() {
        let t0 = Instant::now();
        let mut config = VisualiserConfig::initial(1.0, t0);
        config.bpm = 120.0;
        config.rotation_speed[Axis::ZA] = 1.0;
        config.rotation_starting_angle[Axis::XY] = 30.0;

        // one bar at 120 bpm
        let rotation = config.rotation_at(t0 + Duration::from_millis(2000));
        assert_abs_diff_eq!(rotation[Axis::ZA], 90.0, epsilon = 1e-9);
        assert_abs_diff_eq!(rotation[Axis::XY], 30.0, epsilon = 1e-9);
        assert_eq!(rotation[Axis::YA], 0.0);
    }

    #[test]
    fn test_empty_state_derives_static_config() {
        let now = Instant::now();
        let mut rng = StdRng::seed_from_u64(9);
        let config = derive_config(None, &VisualiserConfig::initial(1.0, now), 1.0, now, &mut rng);
        assert_eq!(config.bpm, DEFAULT_BPM);
        for (_, speed) in config.rotation_speed.iter() {
            assert_eq!(speed, 0.0);
        }
        for (_, angle) in config.rotation_starting_angle.iter() {
            assert_eq!(angle, 0.0);
        }
    }
}
