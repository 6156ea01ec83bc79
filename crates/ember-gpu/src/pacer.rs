//! Frame pacing.
//!
//! Each frame moves `Idle -> Acquiring -> Recording -> Submitted -> Idle`.
//! At most `frames_in_flight` submissions are outstanding: a slot's fence is
//! waited on before the slot is reused, and it is only reset once an image
//! has actually been acquired so that a failed acquire never leaves behind a
//! reset fence that nothing will signal.
//!
//! Transient swapchain conditions are handled inside the pacer. Any error it
//! does return is terminal: the pacer moves to [`FrameState::Failed`] and
//! rejects further frames, since a failed submit can leave a slot's fence
//! reset with nothing to signal it.

use crate::error::{GpuError, Result};
use ash::vk;

/// Result of acquiring a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    Acquired { image_index: u32, suboptimal: bool },
    /// The swapchain no longer matches the surface; nothing was acquired.
    OutOfDate,
}

/// Result of presenting a swapchain image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresentOutcome {
    Optimal,
    Suboptimal,
    OutOfDate,
}

/// Position of the pacer in the per-frame protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Acquiring,
    Recording,
    Submitted,
    /// An operation returned an error; no further frames are accepted.
    Failed,
}

/// Device-facing half of the frame protocol.
///
/// `slot` is always in `0..frames_in_flight()`.
pub trait Presenter {
    fn frames_in_flight(&self) -> usize;

    /// Block until the slot's previous submission has completed.
    fn wait_for_slot(&mut self, slot: usize) -> Result<()>;

    /// Acquire an image, signaling the slot's image-available semaphore.
    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome>;

    /// Reset the slot's fence and command buffer and begin recording.
    fn begin_recording(&mut self, slot: usize) -> Result<vk::CommandBuffer>;

    /// End recording and submit, signaling the slot's fence.
    fn submit(&mut self, slot: usize, image_index: u32) -> Result<()>;

    /// Present once the slot's rendering has finished.
    fn present(&mut self, slot: usize, image_index: u32) -> Result<PresentOutcome>;

    /// Current size of the window's drawable area.
    fn framebuffer_extent(&self) -> vk::Extent2D;

    /// Block until the platform reports a possibly different framebuffer size.
    fn wait_for_extent_change(&mut self);

    fn wait_idle(&mut self) -> Result<()>;

    /// Replace the swapchain, returning the extent actually used.
    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> Result<vk::Extent2D>;

    fn swapchain_extent(&self) -> vk::Extent2D;
}

/// Frame handed to the caller between [`FramePacer::begin_frame`] and
/// [`FramePacer::end_frame`].
#[derive(Debug, Clone, Copy)]
pub struct ActiveFrame {
    /// Command buffer in the recording state.
    pub command_buffer: vk::CommandBuffer,
    pub image_index: u32,
    /// Frame-in-flight slot.
    pub slot: usize,
    pub frame_number: u64,
    pub extent: vk::Extent2D,
}

/// Drives the acquire/record/submit/present protocol.
pub struct FramePacer<P: Presenter> {
    presenter: P,
    state: FrameState,
    slot: usize,
    frame_number: u64,
    image_index: u32,
    resize_requested: bool,
    swapchain_generation: u64,
}

impl<P: Presenter> FramePacer<P> {
    pub fn new(presenter: P) -> Result<Self> {
        if presenter.frames_in_flight() == 0 {
            return Err(GpuError::InvalidConfiguration(
                "At least one frame in flight is required".to_string(),
            ));
        }

        Ok(Self {
            presenter,
            state: FrameState::Idle,
            slot: 0,
            frame_number: 0,
            image_index: 0,
            resize_requested: false,
            swapchain_generation: 0,
        })
    }

    /// Start a frame: wait for the slot, acquire an image, begin recording.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn begin_frame(&mut self) -> Result<ActiveFrame> {
        if self.state != FrameState::Idle {
            return Err(GpuError::InvalidState(format!(
                "begin_frame called in state {:?}",
                self.state
            )));
        }
        self.state = FrameState::Acquiring;

        let frame = self.acquire_and_record();
        self.fail_on_error(frame)
    }

    fn acquire_and_record(&mut self) -> Result<ActiveFrame> {
        self.presenter.wait_for_slot(self.slot)?;

        let image_index = loop {
            match self.presenter.acquire_image(self.slot)? {
                AcquireOutcome::Acquired {
                    image_index,
                    suboptimal,
                } => {
                    if suboptimal {
                        tracing::debug!("Acquired suboptimal swapchain image {image_index}");
                    }
                    break image_index;
                }
                AcquireOutcome::OutOfDate => self.recreate_swapchain()?,
            }
        };

        let command_buffer = self.presenter.begin_recording(self.slot)?;
        self.image_index = image_index;
        self.state = FrameState::Recording;

        Ok(ActiveFrame {
            command_buffer,
            image_index,
            slot: self.slot,
            frame_number: self.frame_number,
            extent: self.presenter.swapchain_extent(),
        })
    }

    /// Finish the frame: submit, present, and recreate the swapchain if needed.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn end_frame(&mut self) -> Result<()> {
        if self.state != FrameState::Recording {
            return Err(GpuError::InvalidState(format!(
                "end_frame called in state {:?}",
                self.state
            )));
        }

        let finished = self.submit_and_present();
        self.fail_on_error(finished)
    }

    fn submit_and_present(&mut self) -> Result<()> {
        self.presenter.submit(self.slot, self.image_index)?;
        self.state = FrameState::Submitted;

        let outcome = self.presenter.present(self.slot, self.image_index)?;

        self.slot = (self.slot + 1) % self.presenter.frames_in_flight();
        self.frame_number += 1;

        if outcome != PresentOutcome::Optimal || self.resize_requested {
            self.recreate_swapchain()?;
        }

        self.state = FrameState::Idle;
        Ok(())
    }

    fn fail_on_error<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::error!("Frame pacer failed in state {:?}: {e}", self.state);
            self.state = FrameState::Failed;
        }
        result
    }

    /// Request swapchain recreation at the end of the current frame.
    pub fn notify_resized(&mut self) {
        self.resize_requested = true;
    }

    fn recreate_swapchain(&mut self) -> Result<()> {
        // A minimized window has no drawable area; wait until it comes back
        let mut extent = self.presenter.framebuffer_extent();
        while extent.width == 0 || extent.height == 0 {
            self.presenter.wait_for_extent_change();
            extent = self.presenter.framebuffer_extent();
        }

        self.presenter.wait_idle()?;
        let extent = self.presenter.recreate_swapchain(extent)?;

        self.resize_requested = false;
        self.swapchain_generation += 1;
        tracing::info!(
            "Swapchain recreated at {}x{}",
            extent.width,
            extent.height
        );
        Ok(())
    }

    pub const fn state(&self) -> FrameState {
        self.state
    }

    /// Number of frames completed so far.
    pub const fn frame_number(&self) -> u64 {
        self.frame_number
    }

    /// Slot the next frame will use.
    pub const fn current_slot(&self) -> usize {
        self.slot
    }

    /// Incremented on every swapchain recreation.
    pub const fn swapchain_generation(&self) -> u64 {
        self.swapchain_generation
    }

    pub const fn presenter(&self) -> &P {
        &self.presenter
    }

    pub fn presenter_mut(&mut self) -> &mut P {
        &mut self.presenter
    }

    pub fn into_presenter(self) -> P {
        self.presenter
    }
}
