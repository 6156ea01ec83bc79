//! Point cloud renderer: the dispatcher plus everything it binds per frame.

use ash::vk;
use ember_core::PointCloud;
use ember_gpu::{
    write_storage_buffer, write_uniform_buffer, BufferDesc, BufferKind, DescriptorArena,
    DescriptorCapacity, GpuBuffer, GpuContext, GpuError, Result,
};
use glam::Mat4;

use crate::dispatch::{DispatchConfig, PointCloudDispatcher, PointUniforms};
use crate::framebuffer::PointFramebuffer;
use crate::point_cloud::GpuPointCloud;

/// SPIR-V for the two point passes.
pub struct PointShaders<'a> {
    pub render: &'a [u32],
    pub resolve: &'a [u32],
}

/// Renders one point cloud into swapchain images.
///
/// Uniform buffers and descriptor sets are kept per frame slot; the
/// framebuffer and point buffer are shared and only replaced after the
/// device is idle.
pub struct PointRenderer {
    dispatcher: PointCloudDispatcher,
    descriptors: DescriptorArena,
    sets: Vec<vk::DescriptorSet>,
    uniforms: Vec<GpuBuffer>,
    framebuffer: PointFramebuffer,
    cloud: GpuPointCloud,
    flags: u32,
}

impl PointRenderer {
    /// Upload `cloud` and build the pipelines and per-slot resources.
    pub fn new(
        ctx: &GpuContext,
        shaders: &PointShaders<'_>,
        config: DispatchConfig,
        cloud: &PointCloud,
        extent: vk::Extent2D,
        frames_in_flight: usize,
    ) -> Result<Self> {
        let device = ctx.device();
        let arena = ctx.arena();
        let slots = u32::try_from(frames_in_flight)
            .map_err(|_| GpuError::InvalidConfiguration("Too many frame slots".to_string()))?;

        if !ctx.capabilities().compute.fits_work_group(config.work_group_size) {
            return Err(GpuError::InvalidConfiguration(format!(
                "Work group size {} exceeds device limits {:?}",
                config.work_group_size,
                ctx.capabilities().compute
            )));
        }

        let dispatcher = unsafe {
            PointCloudDispatcher::new(
                device,
                shaders.render,
                shaders.resolve,
                config,
                ctx.capabilities().max_dispatch_groups(),
            )?
        };

        let capacity = DescriptorCapacity::new(slots)
            .with(vk::DescriptorType::UNIFORM_BUFFER, slots)
            .with(vk::DescriptorType::STORAGE_BUFFER, slots * 2);
        let mut descriptors = unsafe { DescriptorArena::new(device, capacity)? };

        let cloud = GpuPointCloud::upload(&arena, cloud)?;
        let framebuffer = PointFramebuffer::new(&arena, extent)?;

        let mut sets = Vec::with_capacity(frames_in_flight);
        let mut uniforms = Vec::with_capacity(frames_in_flight);
        for slot in 0..frames_in_flight {
            uniforms.push(arena.create_buffer(&BufferDesc::host_visible(
                format!("point_uniforms_{slot}"),
                BufferKind::Uniform,
                PointUniforms::SIZE,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
            ))?);
            sets.push(descriptors.alloc_set(dispatcher.descriptor_layout())?);
        }

        let flags = match ctx.surface_format().format {
            vk::Format::B8G8R8A8_UNORM | vk::Format::B8G8R8A8_SRGB => PointUniforms::FLAG_BGRA,
            _ => 0,
        };

        let renderer = Self {
            dispatcher,
            descriptors,
            sets,
            uniforms,
            framebuffer,
            cloud,
            flags,
        };
        unsafe { renderer.write_descriptors(device) };

        tracing::info!(
            "Point renderer ready: {} points, {}x{}, {} slots",
            renderer.cloud.point_count,
            extent.width,
            extent.height,
            frames_in_flight
        );
        Ok(renderer)
    }

    unsafe fn write_descriptors(&self, device: &ash::Device) {
        for (set, uniforms) in self.sets.iter().zip(&self.uniforms) {
            unsafe {
                write_uniform_buffer(device, *set, 0, uniforms.buffer, PointUniforms::SIZE);
                write_storage_buffer(device, *set, 1, self.cloud.buffer.buffer, self.cloud.range());
                write_storage_buffer(
                    device,
                    *set,
                    2,
                    self.framebuffer.buffer().buffer,
                    self.framebuffer.buffer().size,
                );
            }
        }
    }

    pub const fn point_count(&self) -> u32 {
        self.cloud.point_count
    }

    pub const fn extent(&self) -> vk::Extent2D {
        self.framebuffer.extent()
    }

    pub const fn dispatcher(&self) -> &PointCloudDispatcher {
        &self.dispatcher
    }

    /// Replace the framebuffer when the swapchain extent changes.
    ///
    /// Waits for the device to go idle first, since in-flight frames still
    /// reference the old buffer.
    pub fn resize(&mut self, ctx: &GpuContext, extent: vk::Extent2D) -> Result<()> {
        if extent == self.framebuffer.extent() {
            return Ok(());
        }

        ctx.wait_idle()?;
        let arena = ctx.arena();
        let framebuffer = PointFramebuffer::new(&arena, extent)?;
        let mut old = std::mem::replace(&mut self.framebuffer, framebuffer);
        old.destroy(&arena)?;

        unsafe { self.write_descriptors(ctx.device()) };
        tracing::debug!("Point framebuffer resized to {}x{}", extent.width, extent.height);
        Ok(())
    }

    /// Record one frame: clear, render and resolve the cloud, then copy into
    /// `swapchain_image`.
    ///
    /// # Safety
    /// `cmd` must be recording for `slot`, whose previous submission has
    /// completed, and `swapchain_image` must match the framebuffer extent.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn record(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        slot: usize,
        view_proj: Mat4,
        swapchain_image: vk::Image,
    ) -> Result<()> {
        let set = *self
            .sets
            .get(slot)
            .ok_or_else(|| GpuError::InvalidState(format!("No descriptor set for slot {slot}")))?;

        let extent = self.framebuffer.extent();
        let uniforms = PointUniforms {
            view_proj: view_proj.to_cols_array_2d(),
            resolution: [extent.width, extent.height],
            point_count: self.cloud.point_count,
            flags: self.flags,
        };
        self.uniforms[slot].write(std::slice::from_ref(&uniforms))?;

        unsafe {
            self.framebuffer.record_clear(device, cmd);
            self.dispatcher.record(
                device,
                cmd,
                set,
                self.cloud.point_count,
                self.framebuffer.pixel_count(),
            )?;
            self.framebuffer.record_copy_to_swapchain(device, cmd, swapchain_image);
        }

        Ok(())
    }

    /// Destroy every GPU object. The device must be idle.
    pub fn destroy(&mut self, ctx: &GpuContext) -> Result<()> {
        let arena = ctx.arena();

        self.descriptors.destroy();
        self.sets.clear();
        for buffer in &mut self.uniforms {
            arena.destroy_buffer(buffer)?;
        }
        self.framebuffer.destroy(&arena)?;
        self.cloud.destroy(&arena)?;
        unsafe { self.dispatcher.destroy(ctx.device()) };
        Ok(())
    }
}
