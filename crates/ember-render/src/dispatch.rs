//! Batched compute dispatch for point clouds.
//!
//! A cloud is rasterized by one invocation per point. Large clouds are split
//! into several dispatches so no single dispatch exceeds the device's
//! work-group count limit, and so the driver can interleave other work
//! between batches. Every batch receives the full point count; the shader
//! discards invocations at or past it.

use ash::vk;
use ember_gpu::{ComputePipeline, DescriptorLayout, DescriptorSetLayoutBuilder, GpuError, Result};

/// Dispatch configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Invocations per work group. Must match `local_size_x` in the shaders.
    pub work_group_size: u32,
    /// Preferred number of dispatches per pass.
    pub batch_count: u32,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            work_group_size: 256,
            batch_count: 8,
        }
    }
}

/// One dispatch within a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchBatch {
    /// Index of the first element this batch covers.
    pub offset: u64,
    pub group_count: u32,
}

/// How a pass over `element_count` elements splits into dispatches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchPlan {
    element_count: u64,
    work_group_size: u32,
    total_groups: u64,
    batches: Vec<DispatchBatch>,
}

impl BatchPlan {
    /// Plan a pass with no device limit on the per-dispatch group count.
    pub fn new(element_count: u64, work_group_size: u32, batch_count: u32) -> Result<Self> {
        Self::with_group_limit(element_count, work_group_size, batch_count, u32::MAX)
    }

    /// Plan a pass, raising the batch count when a batch would exceed
    /// `max_group_count` work groups.
    pub fn with_group_limit(
        element_count: u64,
        work_group_size: u32,
        batch_count: u32,
        max_group_count: u32,
    ) -> Result<Self> {
        if work_group_size == 0 || batch_count == 0 || max_group_count == 0 {
            return Err(GpuError::InvalidConfiguration(format!(
                "Dispatch needs non-zero work group size, batch count and group limit \
                 (got {work_group_size}, {batch_count}, {max_group_count})"
            )));
        }

        let wg = u64::from(work_group_size);
        let total_groups = element_count.div_ceil(wg);

        let mut plan = Self {
            element_count,
            work_group_size,
            total_groups,
            batches: Vec::new(),
        };
        if total_groups == 0 {
            return Ok(plan);
        }

        let required = total_groups.div_ceil(u64::from(max_group_count));
        let batch_count = u64::from(batch_count).max(required);
        if batch_count > u64::from(u32::MAX) {
            return Err(GpuError::InvalidConfiguration(format!(
                "{element_count} elements need more than {} dispatches",
                u32::MAX
            )));
        }
        let groups_per_batch = total_groups.div_ceil(batch_count);
        let group_count = u32::try_from(groups_per_batch).map_err(|_| {
            GpuError::InvalidConfiguration(format!(
                "{groups_per_batch} work groups per batch exceed the dispatch limit"
            ))
        })?;

        // The final batch keeps the full group count
        plan.batches = (0..batch_count)
            .map(|i| i * groups_per_batch)
            .take_while(|&first_group| first_group < total_groups)
            .map(|first_group| DispatchBatch {
                offset: first_group * wg,
                group_count,
            })
            .collect();

        Ok(plan)
    }

    pub fn batches(&self) -> &[DispatchBatch] {
        &self.batches
    }

    pub const fn element_count(&self) -> u64 {
        self.element_count
    }

    pub const fn work_group_size(&self) -> u32 {
        self.work_group_size
    }

    /// Work groups needed to cover every element once.
    pub const fn total_groups(&self) -> u64 {
        self.total_groups
    }

    /// Work groups actually dispatched, which may exceed [`Self::total_groups`].
    pub fn dispatched_groups(&self) -> u64 {
        self.batches
            .iter()
            .map(|batch| u64::from(batch.group_count))
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.batches.is_empty()
    }
}

/// Push constants shared by the render and resolve shaders.
///
/// ```glsl
/// layout(push_constant) uniform PushConstants {
///     uint offset;
///     uint count;
/// } pc;
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PointPushConstants {
    /// First element of the batch.
    pub offset: u32,
    /// Total element count; invocations at or past it return immediately.
    pub count: u32,
}

impl PointPushConstants {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
}

/// Uniform block at binding 0.
///
/// ```glsl
/// layout(set = 0, binding = 0) uniform Frame {
///     mat4 view_proj;
///     uvec2 resolution;
///     uint point_count;
///     uint flags;
/// };
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PointUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub resolution: [u32; 2],
    pub point_count: u32,
    pub flags: u32,
}

impl PointUniforms {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Resolve writes blue in the low byte (BGRA swapchains).
    pub const FLAG_BGRA: u32 = 1;
}

/// Records the render and resolve passes of a point cloud.
///
/// Both pipelines share one descriptor set layout:
/// binding 0 is [`PointUniforms`], binding 1 the `GpuPoint` storage buffer and
/// binding 2 the framebuffer storage buffer of one `u32` per pixel.
pub struct PointCloudDispatcher {
    render: ComputePipeline,
    resolve: ComputePipeline,
    descriptor_layout: DescriptorLayout,
    config: DispatchConfig,
    max_group_count: u32,
}

impl PointCloudDispatcher {
    /// Create both pipelines and their descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid and both shaders must be valid SPIR-V
    /// compiled with `local_size_x` equal to `config.work_group_size`.
    pub unsafe fn new(
        device: &ash::Device,
        render_spirv: &[u32],
        resolve_spirv: &[u32],
        config: DispatchConfig,
        max_group_count: u32,
    ) -> Result<Self> {
        // Validates the config before any object is created
        BatchPlan::with_group_limit(0, config.work_group_size, config.batch_count, max_group_count)?;

        let descriptor_layout = unsafe { Self::descriptor_layout_builder().build(device)? };

        let push_constant_range = vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(PointPushConstants::SIZE);

        let set_layouts = [descriptor_layout.layout];
        let push_ranges = [push_constant_range];

        let render =
            match unsafe { ComputePipeline::new(device, render_spirv, &set_layouts, &push_ranges) } {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    unsafe { descriptor_layout.destroy(device) };
                    return Err(e);
                }
            };

        let resolve =
            match unsafe { ComputePipeline::new(device, resolve_spirv, &set_layouts, &push_ranges) } {
                Ok(pipeline) => pipeline,
                Err(e) => {
                    unsafe {
                        render.destroy(device);
                        descriptor_layout.destroy(device);
                    }
                    return Err(e);
                }
            };

        tracing::debug!(
            "Point cloud dispatcher ready: work group {}, {} batches, group limit {max_group_count}",
            config.work_group_size,
            config.batch_count
        );

        Ok(Self {
            render,
            resolve,
            descriptor_layout,
            config,
            max_group_count,
        })
    }

    /// Layout of the set both passes bind.
    pub fn descriptor_layout_builder() -> DescriptorSetLayoutBuilder<'static> {
        DescriptorSetLayoutBuilder::new()
            .uniform_buffer(0, vk::ShaderStageFlags::COMPUTE)
            .storage_buffer(1, vk::ShaderStageFlags::COMPUTE)
            .storage_buffer(2, vk::ShaderStageFlags::COMPUTE)
    }

    pub const fn descriptor_layout(&self) -> &DescriptorLayout {
        &self.descriptor_layout
    }

    pub const fn config(&self) -> DispatchConfig {
        self.config
    }

    /// Plan a pass over `element_count` elements.
    pub fn plan(&self, element_count: u64) -> Result<BatchPlan> {
        BatchPlan::with_group_limit(
            element_count,
            self.config.work_group_size,
            self.config.batch_count,
            self.max_group_count,
        )
    }

    /// Record the render pass over `point_count` points, a compute hazard
    /// barrier, then the resolve pass over `pixel_count` pixels.
    ///
    /// # Safety
    /// `cmd` must be recording and `set` must have every binding written.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn record(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        set: vk::DescriptorSet,
        point_count: u32,
        pixel_count: u32,
    ) -> Result<()> {
        let render_plan = self.plan(u64::from(point_count))?;
        let resolve_plan = self.plan(u64::from(pixel_count))?;

        unsafe {
            record_pass(device, cmd, &self.render, set, &render_plan)?;
            record_compute_barrier(device, cmd);
            record_pass(device, cmd, &self.resolve, set, &resolve_plan)?;
        }

        Ok(())
    }

    /// Destroy both pipelines and the layout.
    ///
    /// # Safety
    /// The device must be valid and no submitted work may still use them.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            self.render.destroy(device);
            self.resolve.destroy(device);
            self.descriptor_layout.destroy(device);
        }
    }
}

unsafe fn record_pass(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    pipeline: &ComputePipeline,
    set: vk::DescriptorSet,
    plan: &BatchPlan,
) -> Result<()> {
    if plan.is_empty() {
        return Ok(());
    }

    let count = u32::try_from(plan.element_count()).map_err(|_| {
        GpuError::InvalidConfiguration(format!("{} elements overflow u32", plan.element_count()))
    })?;

    unsafe {
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, pipeline.pipeline);
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            pipeline.layout,
            0,
            &[set],
            &[],
        );
    }

    for batch in plan.batches() {
        // Every batch starts below the element count, so this only fails with count
        let offset = u32::try_from(batch.offset).map_err(|_| {
            GpuError::InvalidConfiguration(format!("Batch offset {} overflows u32", batch.offset))
        })?;
        let push_constants = PointPushConstants { offset, count };

        unsafe {
            device.cmd_push_constants(
                cmd,
                pipeline.layout,
                vk::ShaderStageFlags::COMPUTE,
                0,
                bytemuck::bytes_of(&push_constants),
            );
            device.cmd_dispatch(cmd, batch.group_count, 1, 1);
        }
    }

    Ok(())
}

/// Full memory barrier between two compute passes.
///
/// # Safety
/// `cmd` must be recording.
pub unsafe fn record_compute_barrier(device: &ash::Device, cmd: vk::CommandBuffer) {
    let barrier = vk::MemoryBarrier2::default()
        .src_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
        .src_access_mask(vk::AccessFlags2::SHADER_WRITE)
        .dst_stage_mask(vk::PipelineStageFlags2::COMPUTE_SHADER)
        .dst_access_mask(vk::AccessFlags2::SHADER_READ | vk::AccessFlags2::SHADER_WRITE);

    let dependency_info =
        vk::DependencyInfo::default().memory_barriers(std::slice::from_ref(&barrier));

    unsafe { device.cmd_pipeline_barrier2(cmd, &dependency_info) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uneven_cloud_is_fully_covered() {
        let plan = BatchPlan::new(1_000_003, 1024, 8).unwrap();

        assert_eq!(plan.total_groups(), 977);
        assert_eq!(plan.batches().len(), 8);
        assert!(plan.batches().iter().all(|b| b.group_count == 123));
        assert!(plan.dispatched_groups() >= 977);
        assert!(plan.dispatched_groups() * 1024 >= 1_000_003);

        let last = plan.batches().last().unwrap();
        assert_eq!(last.offset, 7 * 123 * 1024);
    }

    #[test]
    fn divisible_cloud_splits_evenly() {
        let plan = BatchPlan::new(8192, 256, 8).unwrap();

        let offsets: Vec<u64> = plan.batches().iter().map(|b| b.offset).collect();
        assert_eq!(offsets, [0, 1024, 2048, 3072, 4096, 5120, 6144, 7168]);
        assert!(plan.batches().iter().all(|b| b.group_count == 4));
        assert_eq!(plan.dispatched_groups(), plan.total_groups());
    }

    #[test]
    fn small_cloud_uses_fewer_batches() {
        let plan = BatchPlan::new(600, 256, 8).unwrap();
        assert_eq!(plan.total_groups(), 3);
        assert_eq!(
            plan.batches(),
            [
                DispatchBatch { offset: 0, group_count: 1 },
                DispatchBatch { offset: 256, group_count: 1 },
                DispatchBatch { offset: 512, group_count: 1 },
            ]
        );
    }

    #[test]
    fn empty_cloud_has_no_batches() {
        let plan = BatchPlan::new(0, 256, 8).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.total_groups(), 0);
    }

    #[test]
    fn zero_parameters_are_rejected() {
        assert!(matches!(
            BatchPlan::new(100, 0, 8),
            Err(GpuError::InvalidConfiguration(_))
        ));
        assert!(matches!(
            BatchPlan::new(100, 256, 0),
            Err(GpuError::InvalidConfiguration(_))
        ));
        assert!(BatchPlan::with_group_limit(100, 256, 8, 0).is_err());
    }

    #[test]
    fn group_limit_raises_batch_count() {
        let plan = BatchPlan::with_group_limit(256 * 200_000, 256, 2, 65_535).unwrap();

        assert_eq!(plan.batches().len(), 4);
        assert!(plan.batches().iter().all(|b| b.group_count <= 65_535));
        assert_eq!(plan.dispatched_groups(), 200_000);
    }

    #[test]
    fn large_counts_do_not_overflow() {
        let plan = BatchPlan::new(u64::from(u32::MAX) * 4, 64, 8).unwrap();
        assert!(plan.dispatched_groups() * 64 >= u64::from(u32::MAX) * 4);
    }

    #[test]
    fn push_constants_layout() {
        assert_eq!(PointPushConstants::SIZE, 8);
        assert_eq!(std::mem::offset_of!(PointPushConstants, offset), 0);
        assert_eq!(std::mem::offset_of!(PointPushConstants, count), 4);
    }

    #[test]
    fn uniforms_layout() {
        assert_eq!(PointUniforms::SIZE, 80);
        assert_eq!(std::mem::offset_of!(PointUniforms, resolution), 64);
        assert_eq!(std::mem::offset_of!(PointUniforms, point_count), 72);
        assert_eq!(std::mem::offset_of!(PointUniforms, flags), 76);
    }
}
