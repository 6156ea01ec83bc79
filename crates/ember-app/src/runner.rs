//! Application runner and event loop.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use ember_core::TransformStack;
use ember_gpu::{GpuError, DEFAULT_FRAMES_IN_FLIGHT};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use winit::application::ApplicationHandler;
use winit::dpi::{PhysicalPosition, PhysicalSize};
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::{Fullscreen, Window, WindowId};

use crate::app::EmberApp;
use crate::engine::RenderEngine;
use crate::frame::FrameContext;

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    /// Window title.
    pub title: String,
    /// Initial window width.
    pub width: u32,
    /// Initial window height.
    pub height: u32,
    /// Initial window position in physical pixels.
    pub position: Option<(i32, i32)>,
    /// Borderless fullscreen on the current monitor.
    pub fullscreen: bool,
    /// Target frames per second (None for unlimited).
    pub target_fps: Option<u32>,
    /// Enable vsync.
    pub vsync: bool,
    /// Enable Vulkan validation layers (default: debug builds only).
    pub validation: bool,
    pub frames_in_flight: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            title: "Ember".to_string(),
            width: 1280,
            height: 720,
            position: None,
            fullscreen: false,
            target_fps: None,
            vsync: true,
            validation: cfg!(debug_assertions),
            frames_in_flight: DEFAULT_FRAMES_IN_FLIGHT,
        }
    }
}

impl AppConfig {
    /// Create a new config with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_size(mut self, width: u32, height: u32) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    #[must_use]
    pub const fn with_position(mut self, x: i32, y: i32) -> Self {
        self.position = Some((x, y));
        self
    }

    #[must_use]
    pub const fn with_fullscreen(mut self, fullscreen: bool) -> Self {
        self.fullscreen = fullscreen;
        self
    }

    #[must_use]
    pub const fn with_target_fps(mut self, fps: u32) -> Self {
        self.target_fps = Some(fps);
        self
    }

    #[must_use]
    pub const fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    #[must_use]
    pub const fn with_validation(mut self, validation: bool) -> Self {
        self.validation = validation;
        self
    }

    #[must_use]
    pub const fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames;
        self
    }

    /// Frame budget for the target FPS, if any.
    pub fn target_frame_time(&self) -> Option<Duration> {
        self.target_fps
            .filter(|&fps| fps > 0)
            .map(|fps| Duration::from_nanos(1_000_000_000 / u64::from(fps)))
    }
}

/// Install the global `tracing` subscriber.
///
/// `RUST_LOG` overrides the default `info` filter. Does nothing if a
/// subscriber is already installed.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Log category for an error reaching the runner.
pub fn error_category(err: &anyhow::Error) -> &'static str {
    err.downcast_ref::<GpuError>()
        .map_or("application", |gpu| gpu.class().label())
}

/// Run an app with the given configuration.
///
/// Any error escaping the app or the frame protocol is logged with its
/// category and terminates the process with exit status 1.
pub fn run_app<A: EmberApp + 'static>(config: AppConfig) -> anyhow::Result<()> {
    init_logging();

    info!("{} starting...", config.title);

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut runner = AppRunner::<A> {
        config,
        state: None,
    };

    event_loop.run_app(&mut runner)?;
    Ok(())
}

struct AppRunner<A: EmberApp> {
    config: AppConfig,
    state: Option<AppState<A>>,
}

/// Declared before the engine so it is dropped first.
struct AppState<A: EmberApp> {
    app: A,
    engine: RenderEngine,
    transforms: TransformStack,
    last_frame_time: Instant,
    last_generation: u64,
    target_frame_time: Option<Duration>,
    min_fps: f64,
    max_fps: f64,
    fps_sum: f64,
}

impl<A: EmberApp + 'static> ApplicationHandler for AppRunner<A> {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.state.is_some() {
            return;
        }

        info!("Creating application state...");

        match self.create_state(event_loop) {
            Ok(state) => {
                self.state = Some(state);
                info!("Application ready!");
            }
            Err(e) => self.fail(&e),
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        if let Some(state) = &mut self.state {
            if state.app.on_event(&event) {
                return;
            }
        }

        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested");
                self.shutdown(event_loop);
            }
            WindowEvent::RedrawRequested => {
                let Some(state) = &mut self.state else {
                    return;
                };
                let size = state.engine.window().inner_size();
                if size.width == 0 || size.height == 0 {
                    // Minimized; nothing to present
                    return;
                }

                if let Err(e) = state.render_frame() {
                    self.fail(&e);
                }
                if self.state.as_ref().is_some_and(|state| state.app.should_exit()) {
                    self.shutdown(event_loop);
                }
            }
            WindowEvent::Resized(size) => {
                if let Some(state) = &mut self.state {
                    tracing::debug!("Window resized to {}x{}", size.width, size.height);
                    state.engine.notify_resized();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(state) = &self.state {
            state.engine.window().request_redraw();
        }
    }
}

impl<A: EmberApp + 'static> AppRunner<A> {
    fn create_state(&self, event_loop: &ActiveEventLoop) -> anyhow::Result<AppState<A>> {
        let mut window_attrs = Window::default_attributes()
            .with_title(&self.config.title)
            .with_inner_size(PhysicalSize::new(self.config.width, self.config.height));
        if let Some((x, y)) = self.config.position {
            window_attrs = window_attrs.with_position(PhysicalPosition::new(x, y));
        }
        if self.config.fullscreen {
            window_attrs = window_attrs.with_fullscreen(Some(Fullscreen::Borderless(None)));
        }

        let window = Arc::new(event_loop.create_window(window_attrs)?);

        let mut engine = RenderEngine::new(window, &self.config)?;
        let app = A::init(&mut engine)?;
        let last_generation = engine.swapchain_generation();

        Ok(AppState {
            app,
            engine,
            transforms: TransformStack::new(),
            last_frame_time: Instant::now(),
            last_generation,
            target_frame_time: self.config.target_frame_time(),
            min_fps: f64::MAX,
            max_fps: 0.0,
            fps_sum: 0.0,
        })
    }

    fn shutdown(&mut self, event_loop: &ActiveEventLoop) {
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        event_loop.exit();
    }

    /// Log a fatal error, release what can be released and exit with status 1.
    fn fail(&mut self, err: &anyhow::Error) -> ! {
        error!(category = error_category(err), "{err:#}");
        if let Some(mut state) = self.state.take() {
            state.cleanup();
        }
        std::process::exit(1);
    }
}

impl<A: EmberApp> AppState<A> {
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    fn render_frame(&mut self) -> anyhow::Result<()> {
        let frame_start = Instant::now();

        let dt = frame_start
            .duration_since(self.last_frame_time)
            .as_secs_f32();
        self.last_frame_time = frame_start;
        if dt > 0.0 {
            let fps = 1.0 / f64::from(dt);
            self.min_fps = self.min_fps.min(fps);
            self.max_fps = self.max_fps.max(fps);
            self.fps_sum += fps;
        }

        self.app.update(&self.engine, dt);

        let active = self.engine.begin_frame()?;

        let generation = self.engine.swapchain_generation();
        if generation != self.last_generation {
            self.last_generation = generation;
            self.app.on_resize(&self.engine, active.extent)?;
        }

        let swapchain_image = self.engine.swapchain_image(active.image_index)?;
        let mut frame = FrameContext::new(
            &active,
            swapchain_image,
            dt,
            std::mem::take(&mut self.transforms),
        );
        let rendered = self.app.render(&self.engine, &mut frame);
        self.transforms = frame.into_transforms();
        rendered?;

        self.engine.end_frame()?;

        if let Some(target) = self.target_frame_time {
            let elapsed = frame_start.elapsed();
            if elapsed < target {
                thread::sleep(target - elapsed);
            }
        }

        Ok(())
    }

    fn cleanup(&mut self) {
        let frames = self.engine.frame_number();
        if frames > 0 {
            info!("FPS Statistics:");
            info!("  Min: {:.1}", self.min_fps);
            info!("  Max: {:.1}", self.max_fps);
            info!("  Avg: {:.1}", self.fps_sum / frames as f64);
            info!("  Total frames: {frames}");
        }

        info!("Starting cleanup...");
        if let Err(e) = self.engine.wait_idle() {
            error!("Failed to wait idle: {e}");
        }
        self.app.cleanup(&self.engine);
        info!("Cleanup complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_builder() {
        let config = AppConfig::new("test")
            .with_size(640, 480)
            .with_position(10, -20)
            .with_fullscreen(true)
            .with_frames_in_flight(3);

        assert_eq!(config.title, "test");
        assert_eq!((config.width, config.height), (640, 480));
        assert_eq!(config.position, Some((10, -20)));
        assert!(config.fullscreen);
        assert_eq!(config.frames_in_flight, 3);
    }

    #[test]
    fn target_frame_time() {
        assert_eq!(AppConfig::default().target_frame_time(), None);
        assert_eq!(
            AppConfig::default().with_target_fps(50).target_frame_time(),
            Some(Duration::from_millis(20))
        );
        assert_eq!(AppConfig::default().with_target_fps(0).target_frame_time(), None);
    }

    #[test]
    fn error_categories() {
        let gpu = anyhow::Error::new(GpuError::InvalidConfiguration("zero size".into()));
        assert_eq!(error_category(&gpu), "configuration");

        let exhausted = anyhow::Error::new(GpuError::NoSuitableDevice);
        assert_eq!(error_category(&exhausted), "device");

        assert_eq!(error_category(&anyhow::anyhow!("bad input")), "application");
    }
}
