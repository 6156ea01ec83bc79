//! The engine aggregate handed to applications.

use std::sync::Arc;

use ash::vk;
use ember_gpu::{
    ActiveFrame, FramePacer, FramebufferSize, GpuContext, GpuContextBuilder, Presenter, Result,
    VulkanPresenter,
};
use winit::window::Window;

use crate::runner::AppConfig;

/// Window handle that reports its drawable size to the presenter.
#[derive(Clone)]
pub struct WindowSurface(pub Arc<Window>);

impl FramebufferSize for WindowSurface {
    fn framebuffer_size(&self) -> (u32, u32) {
        let size = self.0.inner_size();
        (size.width, size.height)
    }
}

/// Owns the GPU context and the frame pacer for one window.
///
/// Field order is the teardown order: the pacer's swapchain and frame slots
/// are destroyed before the device they were created on.
pub struct RenderEngine {
    pacer: FramePacer<VulkanPresenter<WindowSurface>>,
    gpu: GpuContext,
    window: Arc<Window>,
}

impl RenderEngine {
    /// Bring up the device and swapchain for `window`.
    pub fn new(window: Arc<Window>, config: &AppConfig) -> Result<Self> {
        let gpu = GpuContextBuilder::new()
            .app_name(&config.title)
            .validation(config.validation)
            .vsync(config.vsync)
            .build(window.as_ref())?;

        let presenter = VulkanPresenter::new(
            &gpu,
            WindowSurface(Arc::clone(&window)),
            config.frames_in_flight,
        )?;

        let extent = presenter.swapchain().extent;
        tracing::info!(
            "Swapchain created: {}x{} ({} images, {} frames in flight)",
            extent.width,
            extent.height,
            presenter.swapchain().images.len(),
            config.frames_in_flight
        );

        Ok(Self {
            pacer: FramePacer::new(presenter)?,
            gpu,
            window,
        })
    }

    pub const fn gpu(&self) -> &GpuContext {
        &self.gpu
    }

    pub const fn window(&self) -> &Arc<Window> {
        &self.window
    }

    /// Number of frame slots, which bounds per-slot resources.
    pub fn frames_in_flight(&self) -> usize {
        self.pacer.presenter().frames_in_flight()
    }

    /// Current swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.pacer.presenter().swapchain().extent
    }

    /// Width over height of the swapchain.
    pub fn aspect_ratio(&self) -> f32 {
        let extent = self.extent();
        extent.width as f32 / extent.height.max(1) as f32
    }

    /// Incremented whenever the swapchain is recreated.
    pub const fn swapchain_generation(&self) -> u64 {
        self.pacer.swapchain_generation()
    }

    pub const fn frame_number(&self) -> u64 {
        self.pacer.frame_number()
    }

    /// Swapchain image for an acquired index.
    pub fn swapchain_image(&self, image_index: u32) -> Result<vk::Image> {
        self.pacer.presenter().image(image_index)
    }

    pub fn begin_frame(&mut self) -> Result<ActiveFrame> {
        self.pacer.begin_frame()
    }

    pub fn end_frame(&mut self) -> Result<()> {
        self.pacer.end_frame()
    }

    /// Recreate the swapchain after the current frame.
    pub fn notify_resized(&mut self) {
        self.pacer.notify_resized();
    }

    pub fn wait_idle(&self) -> Result<()> {
        self.gpu.wait_idle()
    }
}
