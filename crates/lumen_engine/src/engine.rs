//! Core engine implementation
//!
//! [`Engine`] ties the window, input translation, camera and renderer into the
//! fixed init → run → terminate sequence.

use std::thread;
use std::time::Duration;

use thiserror::Error;

use crate::config::{ConfigError, EngineConfig};
use crate::foundation::math::Vec3;
use crate::foundation::time::Timer;
use crate::input::{InputEvent, InputTranslator, KeyCode};
use crate::render::{Camera, Renderer, StatsOverlay, VulkanDevice, VulkanError, Window, WindowError};
use crate::scene::SceneLoadError;

/// Sleep between polls while the window is minimized
const MINIMIZED_SLEEP: Duration = Duration::from_millis(100);

/// How long to wait before polling again when there is nothing to draw.
///
/// A resize that is still pending after a rebuild attempt means the
/// framebuffer is zero-sized.
fn idle_pause(minimized: bool, resize_pending: bool) -> Option<Duration> {
    (minimized || resize_pending).then_some(MINIMIZED_SLEEP)
}

/// Engine errors
#[derive(Error, Debug)]
pub enum EngineError {
    /// GPU failure
    #[error("Renderer error: {0}")]
    Vulkan(#[from] VulkanError),

    /// Bad configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Window system failure
    #[error("Window error: {0}")]
    Window(#[from] WindowError),

    /// The startup scene could not be loaded
    #[error("Scene error: {0}")]
    Scene(#[from] SceneLoadError),
}

/// Main engine struct
///
/// Owns the renderer and the window it presents to. The renderer is declared
/// first so it is torn down while the window's surface is still alive.
pub struct Engine {
    renderer: Renderer<VulkanDevice>,
    window: Window,
    camera: Camera,
    translator: InputTranslator,
    timer: Timer,
    minimized: bool,
    running: bool,
}

impl Engine {
    /// Open the window, bring up the device and renderer, and load the
    /// configured startup scene
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        log::info!("Initializing engine...");
        config.validate()?;

        let mut window = Window::new(&config.window)?;
        let device = VulkanDevice::new(&mut window, &config.renderer, &config.window.title)?;
        let mut renderer = Renderer::new(device, &config, Box::new(StatsOverlay::default()))?;

        if let Some(path) = &config.scene.path {
            match renderer.load_scene(path) {
                Ok(_) => log::info!("Loaded startup scene {}", path.display()),
                Err(e) if config.scene.required => return Err(e.into()),
                Err(e) => log::warn!("Skipping startup scene {}: {}", path.display(), e),
            }
        }

        Ok(Self {
            renderer,
            window,
            camera: Camera::new(Vec3::new(30.0, 0.0, -85.0)),
            translator: InputTranslator::new(),
            timer: Timer::new(),
            minimized: false,
            running: true,
        })
    }

    /// Run the main loop until the window closes or a fatal error occurs
    pub fn run(&mut self) -> Result<(), EngineError> {
        log::info!("Starting main loop...");

        while self.running {
            self.window.poll_events();
            for event in self.window.flush_events() {
                if let Some(event) = self.translator.translate(&event) {
                    self.handle_event(&event);
                }
            }
            if self.window.should_close() {
                self.running = false;
            }
            if !self.running {
                break;
            }

            if !self.minimized && self.renderer.resize_pending() {
                let (width, height) = self.window.get_framebuffer_size();
                self.renderer.resize_swapchain(width, height)?;
            }
            if let Some(pause) = idle_pause(self.minimized, self.renderer.resize_pending()) {
                thread::sleep(pause);
                continue;
            }

            self.timer.update();
            self.camera.update();
            self.renderer.update_scene(&self.camera);
            self.renderer.render_frame()?;
        }

        log::info!(
            "Main loop finished after {} frames ({} presented, last frame {:.1} fps)",
            self.timer.frame_count(),
            self.renderer.frame_number(),
            self.timer.current_fps()
        );
        Ok(())
    }

    /// Release every GPU resource. Also runs on drop.
    pub fn terminate(&mut self) {
        log::info!("Shutting down engine...");
        self.renderer.destroy();
    }

    /// Ask the loop to stop after the current iteration
    pub fn quit(&mut self) {
        log::info!("Engine shutdown requested");
        self.running = false;
    }

    /// The renderer
    pub fn renderer(&self) -> &Renderer<VulkanDevice> {
        &self.renderer
    }

    /// Mutable renderer, for loading extra scenes
    pub fn renderer_mut(&mut self) -> &mut Renderer<VulkanDevice> {
        &mut self.renderer
    }

    /// The fly camera
    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    fn handle_event(&mut self, event: &InputEvent) {
        match event {
            InputEvent::Quit | InputEvent::KeyDown(KeyCode::Escape) => {
                self.quit();
                return;
            }
            InputEvent::Minimized => self.minimized = true,
            InputEvent::Restored => self.minimized = false,
            _ => {}
        }
        self.camera.process_input(event);
        self.renderer.handle_input(event);
    }
}
