// Music Module - Music-state snapshots, the last-write-wins hub, and the file provider
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::watch_path;
use crate::rotation::TICKS_PER_BEAT;
use crate::types::Subscription;

/// Named pattern tracks the visualiser listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Track {
    Bass,
    Pad,
    Kick,
    ClosedHat,
    Twig,
    Shaker,
    Clap,
    Ride,
    OpenHat,
}

impl Track {
    pub const ALL: [Track; 9] = [
        Track::Bass,
        Track::Pad,
        Track::Kick,
        Track::ClosedHat,
        Track::Twig,
        Track::Shaker,
        Track::Clap,
        Track::Ride,
        Track::OpenHat,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Track::Bass => "bass",
            Track::Pad => "pad",
            Track::Kick => "kick",
            Track::ClosedHat => "closed_hat",
            Track::Twig => "twig",
            Track::Shaker => "shaker",
            Track::Clap => "clap",
            Track::Ride => "ride",
            Track::OpenHat => "open_hat",
        }
    }
}

/// Loop length of one track's pattern. `loop_ticks == 0` is an empty pattern.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackState {
    pub loop_ticks: u64,
    #[serde(default)]
    pub notes: u32,
}

impl TrackState {
    pub fn new(loop_ticks: u64, notes: u32) -> Self {
        TrackState { loop_ticks, notes }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Tracks {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bass: Option<TrackState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pad: Option<TrackState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kick: Option<TrackState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_hat: Option<TrackState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub twig: Option<TrackState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shaker: Option<TrackState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub clap: Option<TrackState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ride: Option<TrackState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_hat: Option<TrackState>,
}

impl Tracks {
    pub fn get(&self, track: Track) -> Option<&TrackState> {
        self.slot(track).as_ref()
    }

    pub fn set(&mut self, track: Track, state: Option<TrackState>) {
        *self.slot_mut(track) = state;
    }

    /// Loop length in ticks, 0 when the track is absent.
    pub fn loop_ticks(&self, track: Track) -> u64 {
        self.get(track).map(|t| t.loop_ticks).unwrap_or(0)
    }

    fn slot(&self, track: Track) -> &Option<TrackState> {
        match track {
            Track::Bass => &self.bass,
            Track::Pad => &self.pad,
            Track::Kick => &self.kick,
            Track::ClosedHat => &self.closed_hat,
            Track::Twig => &self.twig,
            Track::Shaker => &self.shaker,
            Track::Clap => &self.clap,
            Track::Ride => &self.ride,
            Track::OpenHat => &self.open_hat,
        }
    }

    fn slot_mut(&mut self, track: Track) -> &mut Option<TrackState> {
        match track {
            Track::Bass => &mut self.bass,
            Track::Pad => &mut self.pad,
            Track::Kick => &mut self.kick,
            Track::ClosedHat => &mut self.closed_hat,
            Track::Twig => &mut self.twig,
            Track::Shaker => &mut self.shaker,
            Track::Clap => &mut self.clap,
            Track::Ride => &mut self.ride,
            Track::OpenHat => &mut self.open_hat,
        }
    }
}

/// Snapshot of the upstream music state the visualiser is locked to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MusicState {
    pub bpm: f64,
    /// Identity of the current musical root (root note, pattern seed).
    /// A change restarts the rotation phase and the fade-in.
    pub root: i64,
    #[serde(default)]
    pub tracks: Tracks,
}

impl MusicState {
    pub fn new(bpm: f64, root: i64) -> Self {
        MusicState { bpm, root, tracks: Tracks::default() }
    }

    pub fn with_track(mut self, track: Track, loop_ticks: u64, notes: u32) -> Self {
        self.tracks.set(track, Some(TrackState::new(loop_ticks, notes)));
        self
    }

    /// `None` when the snapshot cannot drive an animation (non-positive tempo).
    pub fn validated(self) -> Option<Self> {
        if self.bpm.is_finite() && self.bpm > 0.0 {
            Some(self)
        } else {
            None
        }
    }
}

/// A populated state for `--init-music` and demos.
pub fn example_music_state() -> MusicState {
    let bar = 4 * TICKS_PER_BEAT;
    MusicState::new(128.0, 0)
        .with_track(Track::Bass, 2 * bar, 12)
        .with_track(Track::Pad, 4 * bar, 6)
        .with_track(Track::Kick, bar, 4)
        .with_track(Track::ClosedHat, bar / 2, 8)
        .with_track(Track::Twig, 3 * bar, 5)
        .with_track(Track::Shaker, bar, 16)
        .with_track(Track::Clap, 2 * bar, 4)
        .with_track(Track::Ride, 4 * bar, 0)
        .with_track(Track::OpenHat, bar, 2)
}

struct HubState {
    base: Option<MusicState>,
    tempo_override: Option<f64>,
}

/// Latest-value slot between music-state providers and the animation driver.
///
/// Providers publish whenever they like; readers only ever see the most
/// recently committed snapshot. Intermediate states are dropped.
pub struct MusicStateHub {
    tx: watch::Sender<Option<MusicState>>,
    state: Mutex<HubState>,
}

impl Default for MusicStateHub {
    fn default() -> Self {
        Self::new()
    }
}

impl MusicStateHub {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        MusicStateHub {
            tx,
            state: Mutex::new(HubState { base: None, tempo_override: None }),
        }
    }

    pub fn publish(&self, state: Option<MusicState>) {
        let mut hub = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        hub.base = state;
        self.commit(&hub);
    }

    /// Replace the tempo of whatever state is (or will be) published. `None` restores it.
    pub fn set_tempo_override(&self, bpm: Option<f64>) {
        let mut hub = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        hub.tempo_override = bpm.filter(|b| b.is_finite() && *b > 0.0);
        self.commit(&hub);
    }

    pub fn current(&self) -> Option<MusicState> {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> MusicStateReceiver {
        MusicStateReceiver { rx: self.tx.subscribe(), primed: false }
    }

    fn commit(&self, hub: &HubState) {
        let effective = hub.base.clone().and_then(|mut state| {
            if let Some(bpm) = hub.tempo_override {
                state.bpm = bpm;
            }
            state.validated()
        });
        self.tx.send_replace(effective);
    }
}

pub struct MusicStateReceiver {
    rx: watch::Receiver<Option<MusicState>>,
    primed: bool,
}

impl MusicStateReceiver {
    /// The latest snapshot if it changed since the last call. The first call
    /// always yields the current value.
    pub fn take_update(&mut self) -> Option<Option<MusicState>> {
        let changed = !self.primed || self.rx.has_changed().unwrap_or(false);
        if !changed {
            return None;
        }
        self.primed = true;
        Some(self.rx.borrow_and_update().clone())
    }

    pub fn latest(&self) -> Option<MusicState> {
        self.rx.borrow().clone()
    }
}

/// Read a music-state file. A missing or blank file is the empty state.
pub fn read_music_state(path: &Path) -> Result<Option<MusicState>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("reading music state {}", path.display()))?;
    if contents.trim().is_empty() {
        return Ok(None);
    }
    let state: MusicState = toml::from_str(&contents)
        .with_context(|| format!("parsing music state {}", path.display()))?;
    Ok(state.validated())
}

pub fn write_music_state(path: &Path, state: &MusicState) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let contents = format!(
        "# Music state consumed by rustseract. Edit while running; changes apply on save.\n\
         # Loop lengths are in ticks ({} per beat). A changed `root` restarts the rotation phase.\n\n{}",
        TICKS_PER_BEAT,
        toml::to_string_pretty(state)?
    );
    std::fs::write(path, contents)?;
    Ok(())
}

/// Publish the file's current contents. Malformed files publish the empty state.
pub fn load_into_hub(path: &Path, hub: &MusicStateHub) {
    match read_music_state(path) {
        Ok(state) => {
            match &state {
                Some(s) => debug!(bpm = s.bpm, root = s.root, "music state loaded"),
                None => debug!(path = %path.display(), "music state empty"),
            }
            hub.publish(state);
        }
        Err(e) => {
            warn!("ignoring music state: {:#}", e);
            hub.publish(None);
        }
    }
}

/// Load the music-state file now and republish it every time it changes on disk.
pub fn watch_music_file(path: PathBuf, hub: Arc<MusicStateHub>) -> Result<Subscription> {
    load_into_hub(&path, &hub);
    let watched = path.clone();
    let subscription = watch_path(&path, move || load_into_hub(&watched, &hub))?;
    info!(path = %path.display(), "watching music state");
    Ok(subscription)
}
