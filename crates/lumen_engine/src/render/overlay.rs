//! UI overlay seam
//!
//! The overlay sees raw input, edits an explicit [`OverlayState`] once per
//! frame, and records into a dynamic rendering pass that is already open on
//! the swapchain image.

use ash::vk;

use crate::config::BlitFilter;
use crate::input::{InputEvent, KeyCode};
use crate::render::api::GpuDevice;
use crate::render::resources::ComputePushConstants;

/// Lowest render scale the overlay will select
pub const MIN_RENDER_SCALE: f32 = 0.1;

/// Render scale change per key press
pub const RENDER_SCALE_STEP: f32 = 0.1;

/// Timings and counters of the last frame
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EngineStats {
    /// Whole frame, milliseconds
    pub frame_time: f32,
    /// Triangles submitted
    pub triangle_count: u32,
    /// Indexed draws recorded
    pub draw_count: u32,
    /// Draw collection, milliseconds
    pub scene_update_time: f32,
    /// Geometry pass recording, milliseconds
    pub mesh_draw_time: f32,
}

/// UI-editable renderer settings, owned by the renderer and lent to the overlay
#[derive(Debug, Clone, PartialEq)]
pub struct OverlayState {
    /// Selected background effect
    pub background_effect: usize,
    /// Payload of every effect, in palette order
    pub effect_data: Vec<ComputePushConstants>,
    /// Fraction of the draw target rendered this frame
    pub render_scale: f32,
    /// Final blit filter
    pub blit_filter: BlitFilter,
    /// Stats of the previous frame
    pub stats: EngineStats,
}

impl OverlayState {
    /// Payload of the selected effect, if any
    pub fn selected_effect_data(&self) -> Option<&ComputePushConstants> {
        self.effect_data.get(self.background_effect)
    }
}

/// Something that draws on top of the final image
pub trait Overlay<D: GpuDevice> {
    /// Feed one raw input event
    fn handle_input(&mut self, event: &InputEvent);

    /// Update the UI state; runs once per frame before recording starts
    fn build(&mut self, state: &mut OverlayState);

    /// Record draw commands into the open pass targeting `target`
    fn record(&mut self, device: &mut D, cmd: vk::CommandBuffer, target: vk::ImageView, extent: vk::Extent2D);
}

/// Overlay that draws nothing and ignores input
#[derive(Debug, Default, Clone, Copy)]
pub struct NullOverlay;

impl<D: GpuDevice> Overlay<D> for NullOverlay {
    fn handle_input(&mut self, _event: &InputEvent) {}

    fn build(&mut self, _state: &mut OverlayState) {}

    fn record(&mut self, _device: &mut D, _cmd: vk::CommandBuffer, _target: vk::ImageView, _extent: vk::Extent2D) {}
}

/// Keyboard-driven settings plus a periodic stats line in the log
#[derive(Debug)]
pub struct StatsOverlay {
    log_every: u32,
    frames: u32,
    cycle_effect: u32,
    scale_steps: i32,
}

impl StatsOverlay {
    /// Log stats once every `log_every` frames; zero disables logging
    pub fn new(log_every: u32) -> Self {
        Self {
            log_every,
            frames: 0,
            cycle_effect: 0,
            scale_steps: 0,
        }
    }
}

impl Default for StatsOverlay {
    fn default() -> Self {
        Self::new(240)
    }
}

impl<D: GpuDevice> Overlay<D> for StatsOverlay {
    fn handle_input(&mut self, event: &InputEvent) {
        match event {
            InputEvent::KeyDown(KeyCode::Tab) => self.cycle_effect += 1,
            InputEvent::KeyDown(KeyCode::LeftBracket) => self.scale_steps -= 1,
            InputEvent::KeyDown(KeyCode::RightBracket) => self.scale_steps += 1,
            _ => {}
        }
    }

    fn build(&mut self, state: &mut OverlayState) {
        if self.cycle_effect > 0 && !state.effect_data.is_empty() {
            let count = state.effect_data.len();
            state.background_effect = (state.background_effect + self.cycle_effect as usize) % count;
            log::info!("Background effect {}", state.background_effect);
        }
        self.cycle_effect = 0;

        if self.scale_steps != 0 {
            let scale = state.render_scale + self.scale_steps as f32 * RENDER_SCALE_STEP;
            state.render_scale = scale.clamp(MIN_RENDER_SCALE, 1.0);
            log::info!("Render scale {:.2}", state.render_scale);
        }
        self.scale_steps = 0;

        self.frames += 1;
        if self.log_every > 0 && self.frames >= self.log_every {
            self.frames = 0;
            let stats = state.stats;
            log::info!(
                "frame {:.2} ms | draws {} | triangles {} | update {:.3} ms | mesh draw {:.3} ms",
                stats.frame_time,
                stats.draw_count,
                stats.triangle_count,
                stats.scene_update_time,
                stats.mesh_draw_time
            );
        }
    }

    fn record(&mut self, _device: &mut D, _cmd: vk::CommandBuffer, _target: vk::ImageView, _extent: vk::Extent2D) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::testing::MockDevice;
    use approx::assert_relative_eq;

    fn state() -> OverlayState {
        OverlayState {
            background_effect: 0,
            effect_data: vec![ComputePushConstants::default(); 2],
            render_scale: 1.0,
            blit_filter: BlitFilter::Linear,
            stats: EngineStats::default(),
        }
    }

    fn press(overlay: &mut StatsOverlay, key: KeyCode) {
        Overlay::<MockDevice>::handle_input(overlay, &InputEvent::KeyDown(key));
    }

    #[test]
    fn test_tab_cycles_effects() {
        let mut overlay = StatsOverlay::new(0);
        let mut state = state();

        press(&mut overlay, KeyCode::Tab);
        Overlay::<MockDevice>::build(&mut overlay, &mut state);
        assert_eq!(state.background_effect, 1);

        press(&mut overlay, KeyCode::Tab);
        Overlay::<MockDevice>::build(&mut overlay, &mut state);
        assert_eq!(state.background_effect, 0);
    }

    #[test]
    fn test_brackets_adjust_scale_within_bounds() {
        let mut overlay = StatsOverlay::new(0);
        let mut state = state();

        press(&mut overlay, KeyCode::RightBracket);
        Overlay::<MockDevice>::build(&mut overlay, &mut state);
        assert_relative_eq!(state.render_scale, 1.0);

        for _ in 0..3 {
            press(&mut overlay, KeyCode::LeftBracket);
        }
        Overlay::<MockDevice>::build(&mut overlay, &mut state);
        assert_relative_eq!(state.render_scale, 0.7, epsilon = 1e-6);

        for _ in 0..20 {
            press(&mut overlay, KeyCode::LeftBracket);
        }
        Overlay::<MockDevice>::build(&mut overlay, &mut state);
        assert_relative_eq!(state.render_scale, MIN_RENDER_SCALE);
    }

    #[test]
    fn test_null_overlay_leaves_state_alone() {
        let mut overlay = NullOverlay;
        let mut state = state();
        Overlay::<MockDevice>::handle_input(&mut overlay, &InputEvent::KeyDown(KeyCode::Tab));
        Overlay::<MockDevice>::build(&mut overlay, &mut state);
        assert_eq!(state, self::state());
    }
}
