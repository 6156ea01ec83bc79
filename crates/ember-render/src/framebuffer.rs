//! Storage-buffer framebuffer written by the point passes.
//!
//! The render pass packs `depth << 16 | rgb565` into one `u32` per pixel with
//! `atomicMin`, so clearing to all ones makes every pixel "infinitely far".
//! The resolve pass rewrites each pixel in place as 8-bit color, after which
//! the buffer is copied straight into the swapchain image.

use ash::vk;
use ember_gpu::memory::subresource_range;
use ember_gpu::{BufferDesc, BufferKind, GpuBuffer, GpuError, ResourceArena, Result};

/// Value every pixel is reset to before the render pass.
pub const CLEAR_VALUE: u32 = u32::MAX;

/// Bytes per framebuffer pixel.
const PIXEL_SIZE: u64 = 4;

pub struct PointFramebuffer {
    buffer: GpuBuffer,
    extent: vk::Extent2D,
}

impl PointFramebuffer {
    pub fn new(arena: &ResourceArena<'_>, extent: vk::Extent2D) -> Result<Self> {
        let pixels = pixel_count(extent)?;
        let desc = BufferDesc::device_local(
            "point_framebuffer",
            BufferKind::Storage,
            u64::from(pixels) * PIXEL_SIZE,
            vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_DST
                | vk::BufferUsageFlags::TRANSFER_SRC,
        )
        .with_element_count(u64::from(pixels));

        Ok(Self {
            buffer: arena.create_buffer(&desc)?,
            extent,
        })
    }

    pub const fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    pub const fn buffer(&self) -> &GpuBuffer {
        &self.buffer
    }

    pub fn pixel_count(&self) -> u32 {
        self.extent.width * self.extent.height
    }

    /// Reset every pixel to [`CLEAR_VALUE`] and make the write visible to compute.
    ///
    /// The buffer is shared by every frame slot, so the fill first waits for
    /// the previous frame's passes and copy out of it.
    ///
    /// # Safety
    /// `cmd` must be recording.
    pub unsafe fn record_clear(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        let before_fill = reuse_barrier(self.buffer.buffer);
        let dependency_info =
            vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&before_fill));

        unsafe {
            device.cmd_pipeline_barrier2(cmd, &dependency_info);
            device.cmd_fill_buffer(cmd, self.buffer.buffer, 0, vk::WHOLE_SIZE, CLEAR_VALUE);
        }

        let after_fill = vk::BufferMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
            .dst_access_mask(vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE)
            .buffer(self.buffer.buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE);

        let dependency_info =
            vk::DependencyInfo::default().buffer_memory_barriers(std::slice::from_ref(&after_fill));

        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency_info) };
    }

    /// Copy the resolved pixels into a swapchain image and leave it ready to present.
    ///
    /// # Safety
    /// `cmd` must be recording and `image` must be a swapchain image of the
    /// same extent, created with `TRANSFER_DST` usage.
    pub unsafe fn record_copy_to_swapchain(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        image: vk::Image,
    ) {
        let range = subresource_range(vk::ImageAspectFlags::COLOR);

        let buffer_barrier = vk::BufferMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
            .src_access_mask(vk::AccessFlags2::SHADER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_READ)
            .buffer(self.buffer.buffer)
            .offset(0)
            .size(vk::WHOLE_SIZE);

        // Waits on the acquire semaphore's stage before touching the image
        let to_transfer = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .src_access_mask(vk::AccessFlags2::NONE)
            .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .old_layout(vk::ImageLayout::UNDEFINED)
            .new_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .image(image)
            .subresource_range(range);

        let dependency_info = vk::DependencyInfo::default()
            .buffer_memory_barriers(std::slice::from_ref(&buffer_barrier))
            .image_memory_barriers(std::slice::from_ref(&to_transfer));
        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency_info) };

        let region = vk::BufferImageCopy::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(0)
                    .base_array_layer(0)
                    .layer_count(1),
            )
            .image_extent(vk::Extent3D {
                width: self.extent.width,
                height: self.extent.height,
                depth: 1,
            });

        unsafe {
            device.cmd_copy_buffer_to_image(
                cmd,
                self.buffer.buffer,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        let to_present = vk::ImageMemoryBarrier2::default()
            .src_stage_mask(vk::PipelineStageFlags2::TRANSFER)
            .src_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
            .dst_stage_mask(vk::PipelineStageFlags2::BOTTOM_OF_PIPE)
            .dst_access_mask(vk::AccessFlags2::NONE)
            .old_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .new_layout(vk::ImageLayout::PRESENT_SRC_KHR)
            .image(image)
            .subresource_range(range);

        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(std::slice::from_ref(&to_present));
        unsafe { device.cmd_pipeline_barrier2(cmd, &dependency_info) };
    }

    pub fn destroy(&mut self, arena: &ResourceArena<'_>) -> Result<()> {
        arena.destroy_buffer(&mut self.buffer)
    }
}

/// Orders a new clear after an earlier frame's use of the framebuffer.
///
/// Covers the point passes (shader reads and writes) and the copy into the
/// swapchain (transfer read), plus the earlier clear itself.
pub fn reuse_barrier(buffer: vk::Buffer) -> vk::BufferMemoryBarrier2<'static> {
    vk::BufferMemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::TRANSFER)
        .src_access_mask(
            vk::AccessFlags2::SHADER_READ
                | vk::AccessFlags2::SHADER_WRITE
                | vk::AccessFlags2::TRANSFER_READ
                | vk::AccessFlags2::TRANSFER_WRITE,
        )
        .dst_stage_mask(vk::PipelineStageFlags2::TRANSFER)
        .dst_access_mask(vk::AccessFlags2::TRANSFER_WRITE)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
}

/// Pixels in `extent`, rejecting empty and oversized extents.
pub fn pixel_count(extent: vk::Extent2D) -> Result<u32> {
    if extent.width == 0 || extent.height == 0 {
        return Err(GpuError::InvalidConfiguration(format!(
            "Framebuffer extent {}x{} is empty",
            extent.width, extent.height
        )));
    }
    extent.width.checked_mul(extent.height).ok_or_else(|| {
        GpuError::InvalidConfiguration(format!(
            "Framebuffer extent {}x{} is too large",
            extent.width, extent.height
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn pixel_count_checks_extent() {
        assert_eq!(pixel_count(extent(800, 600)).unwrap(), 480_000);
        assert!(matches!(
            pixel_count(extent(0, 600)),
            Err(GpuError::InvalidConfiguration(_))
        ));
        assert!(pixel_count(extent(u32::MAX, 2)).is_err());
    }

    #[test]
    fn clear_waits_for_previous_frame() {
        let barrier = reuse_barrier(vk::Buffer::null());

        // Frame N's render, resolve and copy all touch the shared buffer
        assert!(barrier
            .src_stage_mask
            .contains(vk::PipelineStageFlags2::COMPUTE_SHADER | vk::PipelineStageFlags2::TRANSFER));
        assert!(barrier.src_access_mask.contains(
            vk::AccessFlags2::SHADER_READ
                | vk::AccessFlags2::SHADER_WRITE
                | vk::AccessFlags2::TRANSFER_READ
        ));
        assert_eq!(barrier.dst_stage_mask, vk::PipelineStageFlags2::TRANSFER);
        assert_eq!(barrier.dst_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(barrier.size, vk::WHOLE_SIZE);
    }
}
