//! Synchronization objects for frame slots and swapchain images.

use crate::error::{GpuError, Result};
use ash::vk;

/// Number of frames the CPU may record ahead of the GPU.
pub const DEFAULT_FRAMES_IN_FLIGHT: usize = 2;

/// Fence, acquire semaphore and primary command buffer of one frame-in-flight slot.
///
/// The fence is created signaled so the first wait on a fresh slot returns
/// immediately. It is only reset once an image has been acquired for the
/// slot, which keeps it signaled across a skipped frame.
pub struct FrameSlot {
    /// Signaled when the slot's last submission completes.
    pub in_flight: vk::Fence,
    /// Signaled by the presentation engine when the acquired image is ready.
    pub image_available: vk::Semaphore,
    pub command_buffer: vk::CommandBuffer,
}

impl FrameSlot {
    /// Create the slot's synchronization objects around an allocated command buffer.
    ///
    /// Objects created before a failure are destroyed again.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, command_buffer: vk::CommandBuffer) -> Result<Self> {
        let fence_info = vk::FenceCreateInfo::default().flags(vk::FenceCreateFlags::SIGNALED);
        let semaphore_info = vk::SemaphoreCreateInfo::default();

        let in_flight = unsafe { device.create_fence(&fence_info, None)? };
        let image_available = match unsafe { device.create_semaphore(&semaphore_info, None) } {
            Ok(semaphore) => semaphore,
            Err(e) => {
                unsafe { device.destroy_fence(in_flight, None) };
                return Err(e.into());
            }
        };

        Ok(Self {
            in_flight,
            image_available,
            command_buffer,
        })
    }

    /// Block until the slot's previous submission has completed.
    ///
    /// # Safety
    /// The device must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn wait(&self, device: &ash::Device) -> Result<()> {
        unsafe { device.wait_for_fences(&[self.in_flight], true, u64::MAX)? };
        Ok(())
    }

    /// Unsignal the fence and reset the command buffer for a new recording.
    ///
    /// # Safety
    /// The slot's previous submission must have completed, and its pool must
    /// allow individual command buffer resets.
    pub unsafe fn rearm(&self, device: &ash::Device) -> Result<()> {
        unsafe {
            device.reset_fences(&[self.in_flight])?;
            device.reset_command_buffer(self.command_buffer, vk::CommandBufferResetFlags::empty())?;
        }
        Ok(())
    }

    /// Destroy the synchronization objects. The command buffer is freed with its pool.
    ///
    /// # Safety
    /// The device must be valid and resources must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// Render-finished semaphores, one per swapchain image.
///
/// Present holds its wait semaphore until the same image is acquired again,
/// which can be several frames after the slot that signaled it is reused.
/// Keying the semaphore by image keeps it out of a new submission's signal
/// list until the presentation engine is done with it.
pub struct ImageSemaphores {
    semaphores: Vec<vk::Semaphore>,
}

impl ImageSemaphores {
    /// No semaphores yet; filled once the swapchain images are known.
    pub const fn empty() -> Self {
        Self {
            semaphores: Vec::new(),
        }
    }

    /// Create one semaphore for each of `image_count` swapchain images.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn new(device: &ash::Device, image_count: usize) -> Result<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::default();
        let mut semaphores = Self {
            semaphores: Vec::with_capacity(image_count),
        };

        for _ in 0..image_count {
            match unsafe { device.create_semaphore(&semaphore_info, None) } {
                Ok(semaphore) => semaphores.semaphores.push(semaphore),
                Err(e) => {
                    unsafe { semaphores.destroy(device) };
                    return Err(e.into());
                }
            }
        }
        Ok(semaphores)
    }

    /// Semaphore signaled when rendering to `image_index` finishes.
    pub fn for_image(&self, image_index: u32) -> Result<vk::Semaphore> {
        self.semaphores
            .get(image_index as usize)
            .copied()
            .ok_or_else(|| {
                GpuError::InvalidState(format!(
                    "No render-finished semaphore for image {image_index} of {}",
                    self.semaphores.len()
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.semaphores.len()
    }

    pub fn is_empty(&self) -> bool {
        self.semaphores.is_empty()
    }

    /// Destroy every semaphore. Idempotent.
    ///
    /// # Safety
    /// The device must be valid and no pending operation may use the semaphores.
    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for semaphore in self.semaphores.drain(..) {
            unsafe { device.destroy_semaphore(semaphore, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    #[test]
    fn semaphores_follow_the_image_not_the_slot() {
        let semaphores = ImageSemaphores {
            semaphores: (1..=3).map(vk::Semaphore::from_raw).collect(),
        };

        // Two slots cycling over three images: slot 0 meets images 0 and 2
        assert_eq!(semaphores.for_image(0).unwrap().as_raw(), 1);
        assert_eq!(semaphores.for_image(2).unwrap().as_raw(), 3);
        assert_ne!(
            semaphores.for_image(0).unwrap(),
            semaphores.for_image(2).unwrap()
        );
        assert_eq!(semaphores.len(), 3);
    }

    #[test]
    fn unknown_image_is_rejected() {
        let semaphores = ImageSemaphores {
            semaphores: vec![vk::Semaphore::from_raw(1)],
        };
        assert!(matches!(
            semaphores.for_image(1),
            Err(GpuError::InvalidState(_))
        ));
    }
}
