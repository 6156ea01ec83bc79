//! `EmberApp` trait definition.

use ash::vk;
use winit::event::WindowEvent;

use crate::engine::RenderEngine;
use crate::frame::FrameContext;

/// Trait for Ember applications.
///
/// The runner creates the window, device and swapchain, then drives the
/// frame protocol around `render`. Applications only record commands.
pub trait EmberApp: Sized {
    /// Called once after the engine is up.
    fn init(engine: &mut RenderEngine) -> anyhow::Result<Self>;

    /// Update application state. `dt` is in seconds.
    fn update(&mut self, engine: &RenderEngine, dt: f32);

    /// Record this frame's commands into `frame.command_buffer`.
    ///
    /// The runner submits and presents afterwards. The application is
    /// responsible for leaving the swapchain image in `PRESENT_SRC_KHR`.
    fn render(&mut self, engine: &RenderEngine, frame: &mut FrameContext) -> anyhow::Result<()>;

    /// Called after the swapchain was recreated, before the next `render`.
    ///
    /// The device is idle, so size-dependent resources can be replaced.
    #[allow(unused_variables)]
    fn on_resize(&mut self, engine: &RenderEngine, extent: vk::Extent2D) -> anyhow::Result<()> {
        Ok(())
    }

    /// Return `true` if the event was handled and should not be processed further.
    #[allow(unused_variables)]
    fn on_event(&mut self, event: &WindowEvent) -> bool {
        false
    }

    /// Whether the application wants the event loop to stop.
    fn should_exit(&self) -> bool {
        false
    }

    /// Release GPU resources. The device is idle.
    #[allow(unused_variables)]
    fn cleanup(&mut self, engine: &RenderEngine) {}
}
