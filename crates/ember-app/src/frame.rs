//! Per-frame context for rendering.

use ash::vk;
use ember_core::TransformStack;
use ember_gpu::ActiveFrame;
use glam::Mat4;

/// Context for the frame being recorded.
///
/// Owns the transform stack for the duration of the frame. The stack is
/// reset to the identity before every frame.
pub struct FrameContext {
    /// Command buffer for recording rendering commands.
    pub command_buffer: vk::CommandBuffer,
    /// Index of the acquired swapchain image.
    pub image_index: u32,
    /// The swapchain image for this frame.
    pub swapchain_image: vk::Image,
    /// Frame-in-flight slot; per-slot resources are safe to overwrite.
    pub slot: usize,
    pub extent: vk::Extent2D,
    /// Delta time since last frame in seconds.
    pub dt: f32,
    pub frame_number: u64,
    transforms: TransformStack,
}

impl FrameContext {
    pub(crate) fn new(
        frame: &ActiveFrame,
        swapchain_image: vk::Image,
        dt: f32,
        mut transforms: TransformStack,
    ) -> Self {
        transforms.reset();
        Self {
            command_buffer: frame.command_buffer,
            image_index: frame.image_index,
            swapchain_image,
            slot: frame.slot,
            extent: frame.extent,
            dt,
            frame_number: frame.frame_number,
            transforms,
        }
    }

    pub fn transforms(&self) -> &TransformStack {
        &self.transforms
    }

    pub fn transforms_mut(&mut self) -> &mut TransformStack {
        &mut self.transforms
    }

    /// Current top of the transform stack.
    pub fn transform(&self) -> Mat4 {
        self.transforms.current()
    }

    /// Give the stack back so its storage is reused next frame.
    pub(crate) fn into_transforms(self) -> TransformStack {
        self.transforms
    }
}
