//! Sampled textures fed from the video frame queue.
//!
//! Each stream gets one `R8_UNORM` image per plane, shared by every frame
//! slot. Only the host-visible staging buffers are per slot, so the CPU can
//! fill the next frame's planes while another slot's copy still executes.
//! The images themselves are ordered by the upload transition, which waits
//! for any earlier copy into or read of the same image.

use ash::vk;
use ember_gpu::arena::record_copy_buffer_region_to_image;
use ember_gpu::{
    record_transition, BufferDesc, GpuBuffer, GpuError, GpuImage, ImageDesc, ResourceArena,
    Result,
};
use ember_video::{Plane, StreamLayout, VideoFrameSet};

/// Buffer offsets used for image copies are kept 4-byte aligned.
const COPY_ALIGNMENT: u64 = 4;

/// Byte offset of every plane in a staging buffer, plus the total size.
///
/// Offsets are ordered stream by stream, then Y, Cb, Cr.
pub fn staging_layout(layouts: &[StreamLayout]) -> (Vec<u64>, u64) {
    let mut offsets = Vec::with_capacity(layouts.len() * Plane::ALL.len());
    let mut cursor = 0u64;
    for layout in layouts {
        for plane in Plane::ALL {
            offsets.push(cursor);
            cursor += (layout.plane_len(plane) as u64).next_multiple_of(COPY_ALIGNMENT);
        }
    }
    (offsets, cursor)
}

/// Plane textures for every tracked stream.
pub struct VideoPlaneTextures {
    layouts: Vec<StreamLayout>,
    /// Indexed by `stream * 3 + plane`.
    images: Vec<GpuImage>,
    /// One per frame slot.
    staging: Vec<GpuBuffer>,
    offsets: Vec<u64>,
}

impl VideoPlaneTextures {
    /// Create images and per-slot staging buffers for `layouts`.
    pub fn new(
        arena: &ResourceArena<'_>,
        layouts: &[StreamLayout],
        frames_in_flight: usize,
    ) -> Result<Self> {
        if frames_in_flight == 0 {
            return Err(GpuError::InvalidConfiguration(
                "Video textures need at least one frame slot".to_string(),
            ));
        }

        let (offsets, staging_size) = staging_layout(layouts);
        let mut textures = Self {
            layouts: layouts.to_vec(),
            images: Vec::with_capacity(offsets.len()),
            staging: Vec::with_capacity(frames_in_flight),
            offsets,
        };

        if let Err(e) = textures.allocate(arena, staging_size, frames_in_flight) {
            if let Err(destroy_err) = textures.destroy(arena) {
                tracing::error!("Failed to release video textures after error: {destroy_err}");
            }
            return Err(e);
        }

        tracing::debug!(
            "Video textures for {} streams, {} bytes staging per slot",
            layouts.len(),
            staging_size
        );
        Ok(textures)
    }

    fn allocate(
        &mut self,
        arena: &ResourceArena<'_>,
        staging_size: u64,
        frames_in_flight: usize,
    ) -> Result<()> {
        for (stream, layout) in self.layouts.iter().enumerate() {
            for plane in Plane::ALL {
                let (width, height) = layout.plane_extent(plane);
                let desc = ImageDesc::color_2d(
                    format!("video_{stream}_{plane:?}"),
                    width,
                    height,
                    vk::Format::R8_UNORM,
                    vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST,
                );
                self.images.push(arena.create_image(&desc)?);
            }
        }

        for slot in 0..frames_in_flight {
            self.staging.push(
                arena.create_buffer(&BufferDesc::staging(
                    format!("video_staging_{slot}"),
                    staging_size.max(COPY_ALIGNMENT),
                ))?,
            );
        }
        Ok(())
    }

    pub fn layouts(&self) -> &[StreamLayout] {
        &self.layouts
    }

    /// The image holding `plane` of `stream`.
    pub fn plane(&self, stream: usize, plane: Plane) -> Option<&GpuImage> {
        self.images.get(stream * Plane::ALL.len() + plane.index())
    }

    /// Copy a frame set into the slot's staging buffer and record the
    /// transfers into `cmd`. The images end in `SHADER_READ_ONLY_OPTIMAL`.
    ///
    /// # Safety
    /// `cmd` must be recording for `slot`, and the slot's previous submission
    /// must have completed.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn record_upload(
        &mut self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        slot: usize,
        set: &VideoFrameSet,
    ) -> Result<()> {
        if set.layouts() != self.layouts {
            return Err(GpuError::InvalidConfiguration(format!(
                "Frame set layouts {:?} do not match textures {:?}",
                set.layouts(),
                self.layouts
            )));
        }
        let staging = self.staging.get_mut(slot).ok_or_else(|| {
            GpuError::InvalidState(format!("No video staging buffer for slot {slot}"))
        })?;

        let planes = set
            .frames
            .iter()
            .flat_map(|frame| Plane::ALL.map(|plane| frame.plane(plane)));
        for (&offset, bytes) in self.offsets.iter().zip(planes) {
            staging.write_bytes(offset, bytes)?;
        }

        for (image, &offset) in self.images.iter_mut().zip(&self.offsets) {
            // Every texel is overwritten, so the previous contents can be discarded
            unsafe {
                record_transition(
                    device,
                    cmd,
                    image.image,
                    image.aspect,
                    vk::ImageLayout::UNDEFINED,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                )?;
                record_copy_buffer_region_to_image(device, cmd, staging.buffer, offset, image);
                record_transition(
                    device,
                    cmd,
                    image.image,
                    image.aspect,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                )?;
            }
            image.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        }

        Ok(())
    }

    /// Destroy every image and staging buffer. Reports the first failure.
    pub fn destroy(&mut self, arena: &ResourceArena<'_>) -> Result<()> {
        let mut result = Ok(());
        for image in &mut self.images {
            let destroyed = arena.destroy_image(image);
            if result.is_ok() {
                result = destroyed;
            }
        }
        for buffer in &mut self.staging {
            let destroyed = arena.destroy_buffer(buffer);
            if result.is_ok() {
                result = destroyed;
            }
        }
        self.images.clear();
        self.staging.clear();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planes_are_packed_in_stream_order() {
        let (offsets, total) = staging_layout(&[StreamLayout::new(4, 4), StreamLayout::new(2, 2)]);

        // 4x4: Y 16, Cb 4, Cr 4; 2x2: Y 4, Cb 1 -> 4, Cr 1 -> 4
        assert_eq!(offsets, [0, 16, 20, 24, 28, 32]);
        assert_eq!(total, 36);
    }

    #[test]
    fn offsets_stay_aligned_for_odd_sizes() {
        let (offsets, total) = staging_layout(&[StreamLayout::new(5, 3)]);

        assert_eq!(offsets, [0, 16, 24]);
        assert_eq!(total, 32);
        assert!(offsets.iter().all(|o| o % COPY_ALIGNMENT == 0));
    }

    #[test]
    fn no_streams_no_planes() {
        let (offsets, total) = staging_layout(&[]);
        assert!(offsets.is_empty());
        assert_eq!(total, 0);
    }
}
