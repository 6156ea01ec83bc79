//! GPU upload of point clouds.

use ash::vk;
use ember_core::{PointCloud, PointVertex};
use ember_gpu::{BufferDesc, BufferKind, GpuBuffer, GpuError, ResourceArena, Result};

/// Point layout in the storage buffer.
///
/// ```glsl
/// struct Point {
///     vec3 position;
///     uint color;     // RGBA8, red in the low byte
/// };
/// ```
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct GpuPoint {
    pub position: [f32; 3],
    pub color: u32,
}

impl GpuPoint {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;
}

impl From<&PointVertex> for GpuPoint {
    fn from(vertex: &PointVertex) -> Self {
        Self {
            position: vertex.position.to_array(),
            color: vertex.packed_rgba(),
        }
    }
}

/// Device-local storage buffer holding a point cloud.
pub struct GpuPointCloud {
    pub buffer: GpuBuffer,
    pub point_count: u32,
}

impl GpuPointCloud {
    /// Convert and stage a cloud into device-local memory.
    ///
    /// An empty cloud still gets a one-point buffer so descriptor writes stay
    /// valid; `point_count` is zero and nothing is drawn.
    pub fn upload(arena: &ResourceArena<'_>, cloud: &PointCloud) -> Result<Self> {
        let points: Vec<GpuPoint> = cloud.vertices.iter().map(GpuPoint::from).collect();
        let point_count = u32::try_from(points.len()).map_err(|_| {
            GpuError::InvalidConfiguration(format!(
                "{} points exceed the u32 dispatch range",
                points.len()
            ))
        })?;

        let capacity = points.len().max(1) as u64;
        let desc = BufferDesc::device_local(
            "point_cloud",
            BufferKind::Storage,
            capacity * GpuPoint::SIZE,
            vk::BufferUsageFlags::STORAGE_BUFFER,
        )
        .with_element_count(u64::from(point_count));

        let buffer = arena.create_buffer_with_data(&desc, bytemuck::cast_slice(&points))?;

        tracing::info!(
            "Uploaded {point_count} points ({} KiB)",
            buffer.size / 1024
        );

        Ok(Self {
            buffer,
            point_count,
        })
    }

    /// Byte range descriptors should cover.
    pub const fn range(&self) -> u64 {
        self.buffer.size
    }

    pub fn destroy(&mut self, arena: &ResourceArena<'_>) -> Result<()> {
        arena.destroy_buffer(&mut self.buffer)
    }
}
