//! Resource arena: buffer and image creation, staged uploads and destruction.
//!
//! Uploads are synchronous. Each one records a one-shot command buffer on the
//! context's unified queue and blocks until the queue is idle, so the arena is
//! meant for setup and occasional streaming rather than per-frame traffic.

use crate::command::OneShotCommands;
use crate::context::GpuContext;
use crate::error::{GpuError, Result};
use crate::layout::record_transition;
use crate::memory::{BufferDesc, GpuBuffer, GpuImage, ImageDesc};
use ash::vk;

/// Borrowing handle over the context's allocator, queue and transient pool.
#[derive(Clone, Copy)]
pub struct ResourceArena<'a> {
    ctx: &'a GpuContext,
}

impl<'a> ResourceArena<'a> {
    /// Create an arena over a context.
    pub const fn new(ctx: &'a GpuContext) -> Self {
        Self { ctx }
    }

    /// Create a buffer. A zero size is a configuration error.
    pub fn create_buffer(&self, desc: &BufferDesc) -> Result<GpuBuffer> {
        self.ctx.allocator().lock().create_buffer(desc)
    }

    /// Create a device-local buffer and fill it through a staging buffer.
    pub fn create_buffer_with_data(&self, desc: &BufferDesc, bytes: &[u8]) -> Result<GpuBuffer> {
        let mut desc = desc.clone();
        desc.usage |= vk::BufferUsageFlags::TRANSFER_DST;

        let mut buffer = self.create_buffer(&desc)?;
        if let Err(e) = self.staged_upload(&buffer, bytes) {
            if let Err(destroy_err) = self.destroy_buffer(&mut buffer) {
                tracing::error!("Failed to destroy '{}' after upload error: {destroy_err}", desc.name);
            }
            return Err(e);
        }
        Ok(buffer)
    }

    /// Copy `bytes` to the start of `dst` through a temporary staging buffer.
    ///
    /// Blocks until the copy has completed on the GPU.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn staged_upload(&self, dst: &GpuBuffer, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let size = bytes.len() as u64;
        if size > dst.size {
            return Err(GpuError::InvalidConfiguration(format!(
                "Upload of {size} bytes exceeds buffer '{}' of {} bytes",
                dst.name, dst.size
            )));
        }

        let mut staging = StagingBuffer::new(*self, &format!("{} staging", dst.name), bytes)?;

        let device = self.ctx.device();
        let commands =
            unsafe { OneShotCommands::begin(device, self.ctx.transient_pool(), self.ctx.queue())? };

        let region = vk::BufferCopy::default().size(size);
        unsafe {
            device.cmd_copy_buffer(commands.cmd(), staging.buffer()?.buffer, dst.buffer, &[region]);
        }

        commands.submit_and_wait()?;
        staging.release()
    }

    /// Create an image with a view and optional sampler.
    pub fn create_image(&self, desc: &ImageDesc) -> Result<GpuImage> {
        self.ctx.allocator().lock().create_image(desc)
    }

    /// Upload tightly packed texel data into a freshly created image.
    ///
    /// The image ends in `SHADER_READ_ONLY_OPTIMAL`.
    pub fn upload_image(&self, image: &mut GpuImage, bytes: &[u8]) -> Result<()> {
        let expected = image.packed_size().ok_or_else(|| {
            GpuError::InvalidConfiguration(format!("Cannot upload texels of format {:?}", image.format))
        })?;
        if bytes.len() as u64 != expected {
            return Err(GpuError::InvalidConfiguration(format!(
                "Image upload of {} bytes, expected {expected}",
                bytes.len()
            )));
        }

        let mut staging = StagingBuffer::new(*self, "image staging", bytes)?;

        let device = self.ctx.device();
        let commands =
            unsafe { OneShotCommands::begin(device, self.ctx.transient_pool(), self.ctx.queue())? };

        unsafe {
            record_transition(
                device,
                commands.cmd(),
                image.image,
                image.aspect,
                image.layout,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            )?;
            record_copy_buffer_to_image(device, commands.cmd(), staging.buffer()?.buffer, image);
            record_transition(
                device,
                commands.cmd(),
                image.image,
                image.aspect,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            )?;
        }

        commands.submit_and_wait()?;
        image.layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        staging.release()
    }

    /// Transition an image's layout with a one-shot submission.
    pub fn transition_layout(
        &self,
        image: &mut GpuImage,
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    ) -> Result<()> {
        let device = self.ctx.device();
        let commands =
            unsafe { OneShotCommands::begin(device, self.ctx.transient_pool(), self.ctx.queue())? };

        unsafe { record_transition(device, commands.cmd(), image.image, image.aspect, old, new)? };

        commands.submit_and_wait()?;
        image.layout = new;
        Ok(())
    }

    /// Destroy a buffer. Idempotent; a still-mapped buffer is an error.
    pub fn destroy_buffer(&self, buffer: &mut GpuBuffer) -> Result<()> {
        self.ctx.allocator().lock().free_buffer(buffer)
    }

    /// Destroy an image with its view and sampler. Idempotent.
    pub fn destroy_image(&self, image: &mut GpuImage) -> Result<()> {
        self.ctx.allocator().lock().free_image(image)
    }
}

/// Record a copy of tightly packed texels covering the whole image.
///
/// # Safety
/// All handles must be valid, `cmd` must be recording and the image must be
/// in `TRANSFER_DST_OPTIMAL` when the copy executes.
pub unsafe fn record_copy_buffer_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Buffer,
    image: &GpuImage,
) {
    record_copy_buffer_region_to_image(device, cmd, src, 0, image);
}

/// Like [`record_copy_buffer_to_image`], reading from `offset` in `src`.
///
/// # Safety
/// Same as [`record_copy_buffer_to_image`].
pub unsafe fn record_copy_buffer_region_to_image(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    src: vk::Buffer,
    offset: u64,
    image: &GpuImage,
) {
    let region = vk::BufferImageCopy::default()
        .buffer_offset(offset)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(image.aspect)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_extent(vk::Extent3D {
            width: image.extent.width,
            height: image.extent.height,
            depth: 1,
        });

    unsafe {
        device.cmd_copy_buffer_to_image(
            cmd,
            src,
            image.image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );
    }
}

/// Host-visible staging buffer destroyed on drop.
struct StagingBuffer<'a> {
    arena: ResourceArena<'a>,
    buffer: Option<GpuBuffer>,
}

impl<'a> StagingBuffer<'a> {
    fn new(arena: ResourceArena<'a>, name: &str, bytes: &[u8]) -> Result<Self> {
        let mut buffer = arena.create_buffer(&BufferDesc::staging(name, bytes.len() as u64))?;
        let mut staging = Self {
            arena,
            buffer: None,
        };

        let written = buffer.write_bytes(0, bytes);
        staging.buffer = Some(buffer);
        written?;

        Ok(staging)
    }

    fn buffer(&self) -> Result<&GpuBuffer> {
        self.buffer
            .as_ref()
            .ok_or_else(|| GpuError::InvalidState("Staging buffer already released".into()))
    }

    /// Destroy now and report the outcome.
    fn release(&mut self) -> Result<()> {
        match self.buffer.take() {
            Some(mut buffer) => self.arena.destroy_buffer(&mut buffer),
            None => Ok(()),
        }
    }
}

impl Drop for StagingBuffer<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            tracing::error!("Failed to destroy staging buffer: {e}");
        }
    }
}
