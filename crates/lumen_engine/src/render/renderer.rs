//! # Renderer
//!
//! The explicit rendering context. One `Renderer` owns the device and every
//! piece of per-process GPU state; nothing is global, so tests construct as
//! many isolated renderers as they like over a mock device.
//!
//! ## Frame lifecycle
//! 1. wait on the current slot's fence (bounded, a timeout is fatal)
//! 2. retire the slot: flush its deletion queue, reset its descriptor pools
//! 3. acquire a swapchain image; out-of-date marks a resize and returns early
//! 4. reset the fence, then record the frame
//! 5. submit: wait on image-acquired, signal render-complete, fence the slot
//! 6. present; out-of-date marks a resize
//! 7. advance the frame counter

use std::path::Path;

use ash::vk;
use slotmap::SlotMap;

use crate::config::{EngineConfig, RendererConfig};
use crate::foundation::logging::log_fatal;
use crate::foundation::math::{mat4_to_cols, Mat4};
use crate::foundation::time::Stopwatch;
use crate::input::InputEvent;
use crate::render::api::{GpuDevice, SubmitDesc, VulkanResult};
use crate::render::frame::{DeletionQueue, Disposal, FrameRing};
use crate::render::material::MetallicRoughnessMaterial;
use crate::render::overlay::{EngineStats, Overlay, OverlayState};
use crate::render::primitives::Camera;
use crate::render::resources::{
    DefaultResources, DescriptorAllocatorGrowable, DescriptorLayoutBuilder, DrawTargets, GpuSceneData,
    PoolSizeRatio, ResourceManager, DEPTH_FORMAT, DRAW_FORMAT,
};
use crate::render::systems::{record_frame, write_scene_uniforms, BackgroundEffects, FrameRecording};
use crate::scene::{load_gltf, DrawContext, LoadedScene, SceneLoadError, SceneUploader};

slotmap::new_key_type! {
    /// Handle of a scene owned by the renderer
    pub struct SceneKey;
}

const GLOBAL_POOL_RATIOS: [PoolSizeRatio; 1] = [PoolSizeRatio::new(vk::DescriptorType::STORAGE_IMAGE, 1.0)];

/// Sets in the first global descriptor pool
const GLOBAL_DESCRIPTOR_SETS: u32 = 10;

/// GPU state created once at startup
struct Core {
    resources: ResourceManager,
    defaults: DefaultResources,
    targets: DrawTargets,
    scene_layout: vk::DescriptorSetLayout,
    effects: BackgroundEffects,
    material: MetallicRoughnessMaterial,
}

/// Rendering context generic over the device backend
pub struct Renderer<D: GpuDevice> {
    device: D,
    config: RendererConfig,
    frames: FrameRing,
    deletion_queue: DeletionQueue,
    global_descriptors: DescriptorAllocatorGrowable,
    resources: ResourceManager,
    defaults: DefaultResources,
    targets: DrawTargets,
    effects: BackgroundEffects,
    material: MetallicRoughnessMaterial,
    scene_layout: vk::DescriptorSetLayout,
    scenes: SlotMap<SceneKey, LoadedScene>,
    main_draw_context: DrawContext,
    scene_data: GpuSceneData,
    view_proj: Mat4,
    overlay: Box<dyn Overlay<D>>,
    overlay_state: OverlayState,
    stats: EngineStats,
    resize_pending: bool,
    destroyed: bool,
}

impl<D: GpuDevice> Renderer<D> {
    /// Build every startup resource on `device`.
    ///
    /// On failure everything created so far is released before the error is
    /// returned.
    pub fn new(mut device: D, config: &EngineConfig, overlay: Box<dyn Overlay<D>>) -> VulkanResult<Self> {
        log::debug!("Creating Renderer...");
        let mut deletion_queue = DeletionQueue::new();

        let mut frames = match FrameRing::new(&mut device, config.renderer.initial_descriptor_sets) {
            Ok(frames) => frames,
            Err(e) => {
                log_fatal("frames", &e);
                return Err(e);
            }
        };

        let mut global_descriptors =
            match DescriptorAllocatorGrowable::new(&mut device, GLOBAL_DESCRIPTOR_SETS, &GLOBAL_POOL_RATIOS) {
                Ok(allocator) => allocator,
                Err(e) => {
                    log_fatal("descriptors", &e);
                    frames.destroy(&mut device);
                    return Err(e);
                }
            };

        let core = match Self::build_core(&mut device, config, &mut global_descriptors, &mut deletion_queue) {
            Ok(core) => core,
            Err(e) => {
                log_fatal("renderer", &e);
                frames.destroy(&mut device);
                global_descriptors.destroy(&mut device);
                deletion_queue.flush(&mut device);
                return Err(e);
            }
        };

        let overlay_state = OverlayState {
            background_effect: config.renderer.background_effect.min(core.effects.len().saturating_sub(1)),
            effect_data: core.effects.default_payloads(),
            render_scale: config.renderer.render_scale,
            blit_filter: config.renderer.blit_filter,
            stats: EngineStats::default(),
        };

        log::info!("Renderer initialized");
        Ok(Self {
            device,
            config: config.renderer.clone(),
            frames,
            deletion_queue,
            global_descriptors,
            resources: core.resources,
            defaults: core.defaults,
            targets: core.targets,
            effects: core.effects,
            material: core.material,
            scene_layout: core.scene_layout,
            scenes: SlotMap::with_key(),
            main_draw_context: DrawContext::new(),
            scene_data: GpuSceneData::default(),
            view_proj: Mat4::identity(),
            overlay,
            overlay_state,
            stats: EngineStats::default(),
            resize_pending: false,
            destroyed: false,
        })
    }

    fn build_core(
        device: &mut D,
        config: &EngineConfig,
        global_descriptors: &mut DescriptorAllocatorGrowable,
        deletion_queue: &mut DeletionQueue,
    ) -> VulkanResult<Core> {
        let mut resources = ResourceManager::new(device, deletion_queue)?;
        let extent = device.swapchain_extent();
        let targets = DrawTargets::new(device, &mut resources, deletion_queue, extent)?;
        let defaults = DefaultResources::new(device, &mut resources, deletion_queue)?;

        let scene_layout = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .build(device, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)?;
        deletion_queue.push(Disposal::DescriptorSetLayout(scene_layout));

        let effects = BackgroundEffects::new(device, &config.shaders, global_descriptors, &targets.color, deletion_queue)?;
        let material = MetallicRoughnessMaterial::build_pipelines(
            device,
            &config.shaders,
            scene_layout,
            DRAW_FORMAT,
            DEPTH_FORMAT,
            deletion_queue,
        )?;

        Ok(Core {
            resources,
            defaults,
            targets,
            scene_layout,
            effects,
            material,
        })
    }

    /// Rebuild the draw list and frame uniforms from every loaded scene
    pub fn update_scene(&mut self, camera: &Camera) {
        let stopwatch = Stopwatch::start_new();

        self.main_draw_context.clear();
        let top = Mat4::identity();
        for scene in self.scenes.values() {
            scene.collect_draws(&top, &mut self.main_draw_context);
        }

        let extent = self.device.swapchain_extent();
        let aspect = extent.width as f32 / extent.height.max(1) as f32;
        let view = camera.view_matrix();
        let proj = camera.projection_matrix(aspect);
        self.view_proj = proj * view;
        self.scene_data = GpuSceneData {
            view: mat4_to_cols(&view),
            proj: mat4_to_cols(&proj),
            view_proj: mat4_to_cols(&self.view_proj),
            ..GpuSceneData::default()
        };

        self.stats.scene_update_time = stopwatch.elapsed_millis();
    }

    /// Render and present one frame.
    ///
    /// Returns `Ok` without rendering when the swapchain is out of date; the
    /// caller checks [`resize_pending`](Self::resize_pending) and calls
    /// [`resize_swapchain`](Self::resize_swapchain). Every error is fatal.
    pub fn render_frame(&mut self) -> VulkanResult<()> {
        let stopwatch = Stopwatch::start_new();
        let timeout = self.config.fence_timeout_ns;
        let frame = self.frames.current();

        if let Err(e) = self.device.wait_for_fence(frame.render_fence, timeout) {
            log_fatal("frame", &e);
            return Err(e);
        }
        frame.retire(&mut self.device)?;

        let image_index = match self.device.acquire_next_image(frame.image_acquired, timeout) {
            Ok(index) => index,
            Err(e) if e.is_out_of_date() => {
                log::debug!("Swapchain out of date on acquire");
                self.resize_pending = true;
                return Ok(());
            }
            Err(e) => {
                log_fatal("swapchain", &e);
                return Err(e);
            }
        };

        self.device.reset_fence(frame.render_fence)?;

        self.overlay.build(&mut self.overlay_state);
        let scene_set = write_scene_uniforms(
            &mut self.device,
            &self.resources,
            frame,
            self.scene_layout,
            &self.scene_data,
        )?;

        let (swapchain_image, swapchain_view) = self.device.swapchain_image(image_index)?;
        let swapchain_extent = self.device.swapchain_extent();
        let effect_index = self.overlay_state.background_effect;
        let effect_data = self
            .overlay_state
            .selected_effect_data()
            .copied()
            .unwrap_or_default();

        let recording = FrameRecording {
            cmd: frame.command_buffer,
            targets: &self.targets,
            draw_extent: self.targets.draw_extent(swapchain_extent, self.overlay_state.render_scale),
            swapchain_image,
            swapchain_view,
            swapchain_extent,
            effects: &self.effects,
            effect_index,
            effect_data: &effect_data,
            scene_set,
            draws: &self.main_draw_context,
            view_proj: self.view_proj,
            blit_filter: self.overlay_state.blit_filter.to_vk(),
        };
        let draw_stats = record_frame(&mut self.device, &recording, self.overlay.as_mut())?;

        self.device.submit(&SubmitDesc {
            command_buffer: frame.command_buffer,
            wait: Some((frame.image_acquired, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)),
            signal: Some((frame.render_complete, vk::PipelineStageFlags2::ALL_GRAPHICS)),
            fence: frame.render_fence,
        })?;

        match self.device.present(image_index, frame.render_complete) {
            Ok(()) => {}
            Err(e) if e.is_out_of_date() => {
                log::debug!("Swapchain out of date on present");
                self.resize_pending = true;
            }
            Err(e) => {
                log_fatal("swapchain", &e);
                return Err(e);
            }
        }

        self.frames.advance();

        self.stats.draw_count = draw_stats.draw_count;
        self.stats.triangle_count = draw_stats.triangle_count;
        self.stats.mesh_draw_time = draw_stats.mesh_draw_time;
        self.stats.frame_time = stopwatch.elapsed_millis();
        self.overlay_state.stats = self.stats;

        log::trace!("Frame {} presented", self.frames.frame_number());
        Ok(())
    }

    /// Rebuild the swapchain at the window's new size. The draw targets keep
    /// their size; the draw extent shrinks to fit.
    pub fn resize_swapchain(&mut self, width: u32, height: u32) -> VulkanResult<()> {
        if width == 0 || height == 0 {
            log::debug!("Skipping swapchain rebuild for a zero-sized window");
            return Ok(());
        }
        log::info!("Recreating swapchain at {}x{}", width, height);
        self.device.wait_idle()?;
        self.device.recreate_swapchain(width, height)?;
        self.resize_pending = false;
        Ok(())
    }

    /// Import a glTF file and keep it drawn until unloaded
    pub fn load_scene(&mut self, path: impl AsRef<Path>) -> Result<SceneKey, SceneLoadError> {
        let uploader = SceneUploader {
            resources: &mut self.resources,
            defaults: &self.defaults,
            material: &mut self.material,
        };
        let scene = load_gltf(&mut self.device, uploader, path)?;
        Ok(self.add_scene(scene))
    }

    /// Take ownership of an already built scene
    pub fn add_scene(&mut self, scene: LoadedScene) -> SceneKey {
        log::debug!("Adding scene '{}'", scene.name);
        self.scenes.insert(scene)
    }

    /// Wait for the device to go idle, then release a scene's resources
    pub fn unload_scene(&mut self, key: SceneKey) -> VulkanResult<bool> {
        let Some(scene) = self.scenes.remove(key) else {
            return Ok(false);
        };
        self.device.wait_idle()?;
        log::info!("Unloading scene '{}'", scene.name);
        scene.destroy(&mut self.device, &self.defaults);
        Ok(true)
    }

    /// Pass one input event to the overlay
    pub fn handle_input(&mut self, event: &InputEvent) {
        self.overlay.handle_input(event);
        if matches!(event, InputEvent::Resized { .. }) {
            self.resize_pending = true;
        }
    }

    /// Wait idle and release everything, newest first. Safe to call twice.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;
        log::debug!("Destroying Renderer...");

        if let Err(e) = self.device.wait_idle() {
            log::error!("wait_idle failed during shutdown: {}", e);
        }

        for (_, scene) in self.scenes.drain() {
            scene.destroy(&mut self.device, &self.defaults);
        }
        self.frames.destroy(&mut self.device);
        self.global_descriptors.destroy(&mut self.device);
        let released = self.deletion_queue.flush(&mut self.device);
        log::info!("Renderer destroyed ({} global resources released)", released);
    }

    /// Backend device
    pub fn device(&self) -> &D {
        &self.device
    }

    /// Mutable backend device
    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    /// Frame ring, for inspection
    pub fn frames(&self) -> &FrameRing {
        &self.frames
    }

    /// Frames presented so far
    pub fn frame_number(&self) -> u64 {
        self.frames.frame_number()
    }

    /// Whether the swapchain must be rebuilt before the next frame
    pub fn resize_pending(&self) -> bool {
        self.resize_pending
    }

    /// UI-editable settings
    pub fn overlay_state(&self) -> &OverlayState {
        &self.overlay_state
    }

    /// Mutable UI-editable settings
    pub fn overlay_state_mut(&mut self) -> &mut OverlayState {
        &mut self.overlay_state
    }

    /// Stats of the last frame
    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// Draws collected by the last [`update_scene`](Self::update_scene)
    pub fn draw_context(&self) -> &DrawContext {
        &self.main_draw_context
    }

    /// Shared fallback textures and samplers
    pub fn defaults(&self) -> &DefaultResources {
        &self.defaults
    }

    /// A loaded scene
    pub fn scene(&self, key: SceneKey) -> Option<&LoadedScene> {
        self.scenes.get(key)
    }

    /// Number of loaded scenes
    pub fn scene_count(&self) -> usize {
        self.scenes.len()
    }
}

impl<D: GpuDevice> Drop for Renderer<D> {
    fn drop(&mut self) {
        self.destroy();
    }
}
