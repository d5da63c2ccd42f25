// MIDI Module - MIDI clock input driving the music-state tempo
use anyhow::{anyhow, Result};
use midir::{MidiInput, MidiInputConnection};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info};

use crate::music::MusicStateHub;

/// MIDI clock resolution: pulses per quarter note.
pub const PULSES_PER_QUARTER: u64 = 24;

/// Smallest tempo movement worth republishing, in BPM.
pub const MIN_TEMPO_CHANGE: f64 = 0.5;

/// Pulse intervals averaged into one tempo estimate (one quarter note).
const WINDOW: usize = PULSES_PER_QUARTER as usize;
const MIN_SAMPLES: usize = 6;

/// A gap this long (µs) means the clock paused; stale intervals are dropped.
const MAX_PULSE_GAP_US: u64 = 1_000_000;

/// System real-time messages we care about
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockMessage {
    Pulse,
    Start,
    Continue,
    Stop,
}

/// Parse MIDI message bytes into a clock message
pub fn parse_clock_message(message: &[u8]) -> Option<ClockMessage> {
    match message.first()? {
        0xF8 => Some(ClockMessage::Pulse),
        0xFA => Some(ClockMessage::Start),
        0xFB => Some(ClockMessage::Continue),
        0xFC => Some(ClockMessage::Stop),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TempoUpdate {
    Tempo(f64),
    Stopped,
}

/// Turns clock pulse timestamps into a smoothed tempo.
#[derive(Debug, Default)]
pub struct TempoTracker {
    last_pulse_us: Option<u64>,
    intervals: VecDeque<u64>,
    published: Option<f64>,
}

impl TempoTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn reset(&mut self) {
        self.last_pulse_us = None;
        self.intervals.clear();
    }

    /// Current estimate, once enough pulses have arrived.
    pub fn bpm(&self) -> Option<f64> {
        if self.intervals.len() < MIN_SAMPLES {
            return None;
        }
        let mean_us = self.intervals.iter().sum::<u64>() as f64 / self.intervals.len() as f64;
        if mean_us <= 0.0 {
            return None;
        }
        Some(60_000_000.0 / (mean_us * PULSES_PER_QUARTER as f64))
    }

    /// Feed one message stamped in microseconds. Returns an update only when the
    /// tempo moved by at least `MIN_TEMPO_CHANGE` or the clock stopped.
    pub fn handle(&mut self, message: ClockMessage, timestamp_us: u64) -> Option<TempoUpdate> {
        match message {
            ClockMessage::Start | ClockMessage::Continue => {
                self.reset();
                None
            }
            ClockMessage::Stop => {
                self.reset();
                self.published.take().map(|_| TempoUpdate::Stopped)
            }
            ClockMessage::Pulse => {
                if let Some(last) = self.last_pulse_us {
                    let interval = timestamp_us.saturating_sub(last);
                    if interval == 0 || interval > MAX_PULSE_GAP_US {
                        self.intervals.clear();
                    } else {
                        self.intervals.push_back(interval);
                        while self.intervals.len() > WINDOW {
                            self.intervals.pop_front();
                        }
                    }
                }
                self.last_pulse_us = Some(timestamp_us);

                let bpm = self.bpm()?;
                let moved = match self.published {
                    Some(previous) => (bpm - previous).abs() >= MIN_TEMPO_CHANGE,
                    None => true,
                };
                if moved {
                    self.published = Some(bpm);
                    Some(TempoUpdate::Tempo(bpm))
                } else {
                    None
                }
            }
        }
    }
}

/// List all available MIDI input ports
pub fn list_midi_ports() -> Result<Vec<String>> {
    let midi_in = MidiInput::new("rustseract")?;
    let ports = midi_in.ports();

    let mut port_names = Vec::new();
    for port in ports.iter() {
        if let Ok(name) = midi_in.port_name(port) {
            port_names.push(name);
        }
    }

    Ok(port_names)
}

/// Find a MIDI input port by name (case-insensitive substring match)
pub fn find_midi_port(midi_in: &MidiInput, port_name: &str) -> Result<usize> {
    let ports = midi_in.ports();

    for (i, port) in ports.iter().enumerate() {
        if let Ok(name) = midi_in.port_name(port) {
            if name.to_lowercase().contains(&port_name.to_lowercase()) {
                return Ok(i);
            }
        }
    }

    Err(anyhow!("MIDI port '{}' not found", port_name))
}

/// Live clock input. Closing (or dropping) it disconnects the port and hands
/// tempo back to the music state.
pub struct MidiClock {
    connection: Option<MidiInputConnection<()>>,
    hub: Arc<MusicStateHub>,
    port_name: String,
}

impl MidiClock {
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    pub fn is_open(&self) -> bool {
        self.connection.is_some()
    }

    pub fn close(&mut self) {
        if let Some(connection) = self.connection.take() {
            connection.close();
            self.hub.set_tempo_override(None);
            info!("MIDI clock closed: {}", self.port_name);
        }
    }
}

impl Drop for MidiClock {
    fn drop(&mut self) {
        self.close();
    }
}

/// Connect to `device_name` (first port when empty or not found) and override
/// the hub's tempo from its clock.
pub fn connect_clock(device_name: &str, hub: Arc<MusicStateHub>) -> Result<MidiClock> {
    let midi_in = MidiInput::new("rustseract")?;

    let ports = midi_in.ports();
    if ports.is_empty() {
        return Err(anyhow!("No MIDI input ports available"));
    }

    let port_index = if device_name.is_empty() {
        0
    } else {
        find_midi_port(&midi_in, device_name).unwrap_or(0)
    };
    let port = &ports[port_index];
    let port_name = midi_in.port_name(port).unwrap_or_else(|_| format!("port {}", port_index));

    let mut tracker = TempoTracker::new();
    let callback_hub = hub.clone();
    let connection = midi_in
        .connect(
            port,
            "rustseract_clock",
            move |timestamp_us, message, _| {
                let Some(clock) = parse_clock_message(message) else {
                    return;
                };
                match tracker.handle(clock, timestamp_us) {
                    Some(TempoUpdate::Tempo(bpm)) => {
                        debug!("MIDI clock tempo {:.2}", bpm);
                        callback_hub.set_tempo_override(Some(bpm));
                    }
                    Some(TempoUpdate::Stopped) => {
                        debug!("MIDI clock stopped");
                        callback_hub.set_tempo_override(None);
                    }
                    None => {}
                }
            },
            (),
        )
        .map_err(|e| anyhow!("Failed to connect to MIDI port: {}", e))?;

    info!("MIDI clock connected: {}", port_name);
    Ok(MidiClock { connection: Some(connection), hub, port_name })
}
