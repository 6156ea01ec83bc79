//! Vulkan implementation of the frame protocol.

use crate::command::{begin_command_buffer, end_command_buffer, CommandPool};
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::pacer::{AcquireOutcome, PresentOutcome, Presenter};
use crate::swapchain::{Swapchain, SwapchainTarget};
use crate::sync::{FrameSlot, ImageSemaphores};
use ash::vk;
use std::sync::Arc;
use std::time::Duration;

/// Source of the window's current drawable size.
pub trait FramebufferSize {
    /// Drawable size in physical pixels. Zero while minimized.
    fn framebuffer_size(&self) -> (u32, u32);

    /// Block until the size may have changed.
    fn wait_for_change(&self) {
        std::thread::sleep(Duration::from_millis(16));
    }
}

/// Stages that wait on the acquired image before writing to it.
const IMAGE_WAIT_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
    vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT.as_raw()
        | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw()
        | vk::PipelineStageFlags2::TRANSFER.as_raw(),
);

/// Swapchain, frame slots and submission for one window.
pub struct VulkanPresenter<S: FramebufferSize> {
    device: Arc<ash::Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    queue: vk::Queue,
    target: SwapchainTarget,
    swapchain: Swapchain,
    command_pool: CommandPool,
    slots: Vec<FrameSlot>,
    render_finished: ImageSemaphores,
    window: S,
    destroyed: bool,
}

impl<S: FramebufferSize> VulkanPresenter<S> {
    /// Create the swapchain and `frames_in_flight` slots.
    pub fn new(ctx: &GpuContext, window: S, frames_in_flight: usize) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(GpuError::InvalidConfiguration(
                "At least one frame in flight is required".to_string(),
            ));
        }

        let device = ctx.device_arc();
        let swapchain_loader = ctx.swapchain_loader().clone();
        let target = ctx.swapchain_target();

        let (width, height) = window.framebuffer_size();
        let swapchain = unsafe { target.create(&swapchain_loader, width, height)? };

        let command_pool = match unsafe { CommandPool::resettable(&device, ctx.queue_family()) } {
            Ok(pool) => pool,
            Err(e) => {
                let mut swapchain = swapchain;
                unsafe { swapchain.destroy(&swapchain_loader) };
                return Err(e);
            }
        };

        let mut presenter = Self {
            device,
            swapchain_loader,
            queue: ctx.queue(),
            target,
            swapchain,
            command_pool,
            slots: Vec::with_capacity(frames_in_flight),
            render_finished: ImageSemaphores::empty(),
            window,
            destroyed: false,
        };

        // Anything created so far is released by Drop on failure
        let command_buffers = unsafe {
            presenter
                .command_pool
                .allocate_primary(&presenter.device, frames_in_flight as u32)?
        };
        for command_buffer in command_buffers {
            let slot = unsafe { FrameSlot::new(&presenter.device, command_buffer)? };
            presenter.slots.push(slot);
        }
        presenter.render_finished =
            unsafe { ImageSemaphores::new(&presenter.device, presenter.swapchain.images.len())? };

        Ok(presenter)
    }

    fn slot(&self, slot: usize) -> Result<&FrameSlot> {
        self.slots
            .get(slot)
            .ok_or_else(|| GpuError::InvalidState(format!("Frame slot {slot} out of range")))
    }

    pub const fn swapchain(&self) -> &Swapchain {
        &self.swapchain
    }

    /// Swapchain image for an acquired index.
    pub fn image(&self, image_index: u32) -> Result<vk::Image> {
        self.swapchain
            .images
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| GpuError::InvalidState(format!("Image index {image_index} out of range")))
    }

    pub const fn window(&self) -> &S {
        &self.window
    }

    /// Destroy swapchain and slot resources. Idempotent.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        unsafe {
            let _ = self.device.device_wait_idle();
            for slot in self.slots.drain(..) {
                slot.destroy(&self.device);
            }
            self.render_finished.destroy(&self.device);
            self.command_pool.destroy(&self.device);
            self.swapchain.destroy(&self.swapchain_loader);
        }
    }
}

impl<S: FramebufferSize> Drop for VulkanPresenter<S> {
    fn drop(&mut self) {
        self.destroy();
    }
}

impl<S: FramebufferSize> Presenter for VulkanPresenter<S> {
    fn frames_in_flight(&self) -> usize {
        self.slots.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        let slot = self.slot(slot)?;
        unsafe { slot.wait(&self.device) }
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        let semaphore = self.slot(slot)?.image_available;
        unsafe {
            self.swapchain
                .acquire_next_image(&self.swapchain_loader, semaphore, u64::MAX)
        }
    }

    fn begin_recording(&mut self, slot: usize) -> Result<vk::CommandBuffer> {
        let slot = self.slot(slot)?;
        let cmd = slot.command_buffer;

        unsafe {
            slot.rearm(&self.device)?;
            begin_command_buffer(
                &self.device,
                cmd,
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT,
            )?;
        }

        Ok(cmd)
    }

    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()> {
        let render_finished = self.render_finished.for_image(image_index)?;
        let slot = self.slot(slot)?;

        let wait_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(slot.image_available)
            .stage_mask(IMAGE_WAIT_STAGES);
        let signal_info = vk::SemaphoreSubmitInfo::default()
            .semaphore(render_finished)
            .stage_mask(vk::PipelineStageFlags2::ALL_COMMANDS);
        let cmd_info = vk::CommandBufferSubmitInfo::default().command_buffer(slot.command_buffer);

        let submit_info = vk::SubmitInfo2::default()
            .wait_semaphore_infos(std::slice::from_ref(&wait_info))
            .command_buffer_infos(std::slice::from_ref(&cmd_info))
            .signal_semaphore_infos(std::slice::from_ref(&signal_info));

        unsafe {
            end_command_buffer(&self.device, slot.command_buffer)?;
            self.device
                .queue_submit2(self.queue, &[submit_info], slot.in_flight)?;
        }
        Ok(())
    }

    fn present(&mut self, _slot: usize, image_index: u32) -> Result<PresentOutcome> {
        let render_finished = self.render_finished.for_image(image_index)?;
        unsafe {
            self.swapchain.present(
                &self.swapchain_loader,
                self.queue,
                image_index,
                &[render_finished],
            )
        }
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        let (width, height) = self.window.framebuffer_size();
        vk::Extent2D { width, height }
    }

    fn wait_for_extent_change(&mut self) {
        self.window.wait_for_change();
    }

    fn wait_idle(&mut self) -> Result<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// The device is idle here, so the per-image semaphores can be replaced
    /// along with the images.
    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> Result<vk::Extent2D> {
        unsafe {
            self.render_finished.destroy(&self.device);
            self.swapchain.destroy(&self.swapchain_loader);
            self.swapchain =
                self.target
                    .create(&self.swapchain_loader, extent.width, extent.height)?;
            self.render_finished = ImageSemaphores::new(&self.device, self.swapchain.images.len())?;
        }
        Ok(self.swapchain.extent)
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent
    }
}
