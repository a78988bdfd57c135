//! Rendering systems: background effects and the per-frame sequence

pub mod background;
pub mod sequencer;

pub use background::{BackgroundEffects, ComputeEffect};
pub use sequencer::{record_frame, write_scene_uniforms, DrawStats, FrameRecording};
