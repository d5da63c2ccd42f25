// rustseract - Tempo-locked 4D hypercube animation engine
//
// The engine (geometry, rotation, renderer, animation) draws onto any
// `DrawingSurface`; the remaining modules host it in a terminal.

pub mod animation;
pub mod config;
pub mod geometry;
pub mod midi;
pub mod music;
pub mod renderer;
pub mod rotation;
pub mod surface;
pub mod tui;
pub mod types;

pub use animation::{AnimationDriver, AnimationPhase, EngineSettings, FrameReport, FrameScheduler};
pub use geometry::{build_hypercube, Axis, Coordinates, GeometryError, Plane, Shape};
pub use music::{MusicState, MusicStateHub};
pub use renderer::{draw_scene, Camera, StrokeStyle};
pub use surface::{CompositeMode, DrawingSurface, PixelSurface};
