//! Command pools and the one-shot submission guard.

use crate::error::Result;
use ash::vk;

/// A command pool bound to the unified queue family.
pub struct CommandPool {
    pool: vk::CommandPool,
}

impl CommandPool {
    /// Pool for short-lived upload command buffers.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn transient(device: &ash::Device, queue_family: u32) -> Result<Self> {
        unsafe { Self::with_flags(device, queue_family, vk::CommandPoolCreateFlags::TRANSIENT) }
    }

    /// Pool whose command buffers are reset one at a time, once per frame.
    ///
    /// # Safety
    /// The device must be valid and the queue family must exist.
    pub unsafe fn resettable(device: &ash::Device, queue_family: u32) -> Result<Self> {
        unsafe {
            Self::with_flags(
                device,
                queue_family,
                vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            )
        }
    }

    unsafe fn with_flags(
        device: &ash::Device,
        queue_family: u32,
        flags: vk::CommandPoolCreateFlags,
    ) -> Result<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family)
            .flags(flags);
        let pool = unsafe { device.create_command_pool(&create_info, None)? };
        Ok(Self { pool })
    }

    pub const fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    /// Allocate `count` primary command buffers.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn allocate_primary(
        &self,
        device: &ash::Device,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);
        Ok(unsafe { device.allocate_command_buffers(&alloc_info)? })
    }

    /// Destroy the pool, which frees every command buffer allocated from it.
    ///
    /// # Safety
    /// The device must be valid and no command buffer from the pool may be pending.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_command_pool(self.pool, None) };
    }
}

/// Begin recording `cmd`.
///
/// # Safety
/// The device and command buffer must be valid, and `cmd` must not be pending.
pub unsafe fn begin_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    flags: vk::CommandBufferUsageFlags,
) -> Result<()> {
    let begin_info = vk::CommandBufferBeginInfo::default().flags(flags);
    unsafe { device.begin_command_buffer(cmd, &begin_info)? };
    Ok(())
}

/// Finish recording `cmd`.
///
/// # Safety
/// The device and command buffer must be valid, and `cmd` must be recording.
pub unsafe fn end_command_buffer(device: &ash::Device, cmd: vk::CommandBuffer) -> Result<()> {
    unsafe { device.end_command_buffer(cmd)? };
    Ok(())
}

/// A command buffer recorded once, submitted and waited on synchronously.
///
/// Used for staged uploads. The buffer goes back to its pool when the guard
/// drops, including on the error paths before submission.
pub struct OneShotCommands<'a> {
    device: &'a ash::Device,
    pool: vk::CommandPool,
    queue: vk::Queue,
    cmd: vk::CommandBuffer,
}

impl<'a> OneShotCommands<'a> {
    /// Allocate a command buffer and begin recording.
    ///
    /// # Safety
    /// All handles must be valid and the pool must belong to the queue's family.
    pub unsafe fn begin(device: &'a ash::Device, pool: &CommandPool, queue: vk::Queue) -> Result<Self> {
        let cmd = unsafe { pool.allocate_primary(device, 1)? }
            .pop()
            .ok_or(vk::Result::ERROR_OUT_OF_HOST_MEMORY)?;

        // Constructed first so a failed begin still frees the buffer
        let guard = Self {
            device,
            pool: pool.handle(),
            queue,
            cmd,
        };
        unsafe {
            begin_command_buffer(device, cmd, vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT)?;
        }
        Ok(guard)
    }

    pub const fn cmd(&self) -> vk::CommandBuffer {
        self.cmd
    }

    /// End recording, submit, and block until the queue is idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn submit_and_wait(self) -> Result<()> {
        let cmd_info = vk::CommandBufferSubmitInfo::default().command_buffer(self.cmd);
        let submit_info =
            vk::SubmitInfo2::default().command_buffer_infos(std::slice::from_ref(&cmd_info));

        unsafe {
            end_command_buffer(self.device, self.cmd)?;
            self.device
                .queue_submit2(self.queue, &[submit_info], vk::Fence::null())?;
            self.device.queue_wait_idle(self.queue)?;
        }
        Ok(())
    }
}

impl Drop for OneShotCommands<'_> {
    fn drop(&mut self) {
        unsafe { self.device.free_command_buffers(self.pool, &[self.cmd]) };
    }
}
