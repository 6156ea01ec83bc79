//! Frame protocol tests against a simulated device.

use ash::vk::{self, Handle};
use ember_gpu::{
    AcquireOutcome, FramePacer, FrameState, GpuError, PresentOutcome, Presenter, Result,
};
use std::collections::VecDeque;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fence {
    Signaled,
    /// Reset but not yet submitted. Waiting on it would hang forever.
    Reset,
    Pending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    WaitSlot(usize),
    Acquire(usize),
    Record(usize),
    Submit(usize),
    Present(usize),
    WaitExtent,
    WaitIdle,
    Recreate(u32, u32),
}

/// Simulates fences that complete on the next wait and scripted swapchain results.
struct MockPresenter {
    fences: Vec<Fence>,
    max_pending: usize,
    calls: Vec<Call>,
    acquire_script: VecDeque<AcquireOutcome>,
    present_script: VecDeque<PresentOutcome>,
    /// Successive framebuffer sizes reported after each wait.
    extents: VecDeque<(u32, u32)>,
    current_extent: (u32, u32),
    swapchain_extent: vk::Extent2D,
    next_image: u32,
    /// Error returned by the next submit.
    submit_error: Option<vk::Result>,
}

impl MockPresenter {
    fn new(frames_in_flight: usize) -> Self {
        Self {
            fences: vec![Fence::Signaled; frames_in_flight],
            max_pending: 0,
            calls: Vec::new(),
            acquire_script: VecDeque::new(),
            present_script: VecDeque::new(),
            extents: VecDeque::new(),
            current_extent: (800, 600),
            swapchain_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            next_image: 0,
            submit_error: None,
        }
    }

    fn pending(&self) -> usize {
        self.fences.iter().filter(|&&f| f == Fence::Pending).count()
    }
}

impl Presenter for MockPresenter {
    fn frames_in_flight(&self) -> usize {
        self.fences.len()
    }

    fn wait_for_slot(&mut self, slot: usize) -> Result<()> {
        self.calls.push(Call::WaitSlot(slot));
        match self.fences[slot] {
            Fence::Reset => Err(GpuError::InvalidState(format!(
                "deadlock: waiting on reset fence of slot {slot}"
            ))),
            Fence::Pending | Fence::Signaled => {
                self.fences[slot] = Fence::Signaled;
                Ok(())
            }
        }
    }

    fn acquire_image(&mut self, slot: usize) -> Result<AcquireOutcome> {
        self.calls.push(Call::Acquire(slot));
        let outcome = self.acquire_script.pop_front().unwrap_or_else(|| {
            let image_index = self.next_image;
            self.next_image = (self.next_image + 1) % 3;
            AcquireOutcome::Acquired {
                image_index,
                suboptimal: false,
            }
        });
        Ok(outcome)
    }

    fn begin_recording(&mut self, slot: usize) -> Result<vk::CommandBuffer> {
        self.calls.push(Call::Record(slot));
        assert_eq!(self.fences[slot], Fence::Signaled, "reset of a busy fence");
        self.fences[slot] = Fence::Reset;
        Ok(vk::CommandBuffer::from_raw(slot as u64 + 1))
    }

    fn submit(&mut self, slot: usize, _image_index: u32) -> Result<()> {
        self.calls.push(Call::Submit(slot));
        if let Some(e) = self.submit_error.take() {
            return Err(GpuError::Vulkan(e));
        }
        assert_eq!(self.fences[slot], Fence::Reset);
        self.fences[slot] = Fence::Pending;
        self.max_pending = self.max_pending.max(self.pending());
        Ok(())
    }

    fn present(&mut self, slot: usize, _image_index: u32) -> Result<PresentOutcome> {
        self.calls.push(Call::Present(slot));
        Ok(self
            .present_script
            .pop_front()
            .unwrap_or(PresentOutcome::Optimal))
    }

    fn framebuffer_extent(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.current_extent.0,
            height: self.current_extent.1,
        }
    }

    fn wait_for_extent_change(&mut self) {
        self.calls.push(Call::WaitExtent);
        if let Some(next) = self.extents.pop_front() {
            self.current_extent = next;
        }
    }

    fn wait_idle(&mut self) -> Result<()> {
        self.calls.push(Call::WaitIdle);
        for fence in &mut self.fences {
            if *fence == Fence::Pending {
                *fence = Fence::Signaled;
            }
        }
        Ok(())
    }

    fn recreate_swapchain(&mut self, extent: vk::Extent2D) -> Result<vk::Extent2D> {
        self.calls.push(Call::Recreate(extent.width, extent.height));
        assert!(extent.width > 0 && extent.height > 0);
        self.swapchain_extent = extent;
        Ok(extent)
    }

    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain_extent
    }
}

fn run_frames(pacer: &mut FramePacer<MockPresenter>, count: usize) {
    for _ in 0..count {
        pacer.begin_frame().unwrap();
        pacer.end_frame().unwrap();
    }
}

#[test]
fn unsignaled_fences_never_exceed_frames_in_flight() {
    let mut pacer = FramePacer::new(MockPresenter::new(2)).unwrap();
    run_frames(&mut pacer, 10);

    assert!(pacer.presenter().max_pending <= 2);
    assert_eq!(pacer.frame_number(), 10);
    assert_eq!(pacer.current_slot(), 0);
}

#[test]
fn slots_rotate_in_order() {
    let mut pacer = FramePacer::new(MockPresenter::new(3)).unwrap();
    let slots: Vec<usize> = (0..6)
        .map(|_| {
            let frame = pacer.begin_frame().unwrap();
            pacer.end_frame().unwrap();
            frame.slot
        })
        .collect();
    assert_eq!(slots, [0, 1, 2, 0, 1, 2]);
}

#[test]
fn per_slot_order_is_wait_acquire_record_submit_present() {
    let mut pacer = FramePacer::new(MockPresenter::new(2)).unwrap();
    run_frames(&mut pacer, 1);

    assert_eq!(
        pacer.presenter().calls,
        [
            Call::WaitSlot(0),
            Call::Acquire(0),
            Call::Record(0),
            Call::Submit(0),
            Call::Present(0),
        ]
    );
}

#[test]
fn out_of_date_acquire_keeps_fence_signaled() {
    let mut mock = MockPresenter::new(2);
    mock.acquire_script.push_back(AcquireOutcome::OutOfDate);
    mock.current_extent = (1024, 768);
    let mut pacer = FramePacer::new(mock).unwrap();

    let frame = pacer.begin_frame().unwrap();
    assert_eq!(frame.extent.width, 1024);
    assert_eq!(pacer.swapchain_generation(), 1);
    pacer.end_frame().unwrap();

    // The fence was only reset after the retried acquire succeeded
    let calls = &pacer.presenter().calls;
    let recreate = calls
        .iter()
        .position(|c| *c == Call::Recreate(1024, 768))
        .unwrap();
    let record = calls.iter().position(|c| *c == Call::Record(0)).unwrap();
    assert!(recreate < record);

    // Running on through the same slot must not deadlock
    run_frames(&mut pacer, 4);
}

#[test]
fn zero_extent_blocks_until_restored() {
    let mut mock = MockPresenter::new(2);
    mock.present_script.push_back(PresentOutcome::OutOfDate);
    mock.current_extent = (0, 0);
    mock.extents.extend([(0, 0), (0, 600), (640, 480)]);
    let mut pacer = FramePacer::new(mock).unwrap();

    pacer.begin_frame().unwrap();
    pacer.end_frame().unwrap();

    let calls = &pacer.presenter().calls;
    let tail: Vec<&Call> = calls
        .iter()
        .skip_while(|c| !matches!(c, Call::Present(_)))
        .skip(1)
        .collect();
    assert_eq!(
        tail,
        [
            &Call::WaitExtent,
            &Call::WaitExtent,
            &Call::WaitExtent,
            &Call::WaitIdle,
            &Call::Recreate(640, 480),
        ]
    );
    assert_eq!(pacer.state(), FrameState::Idle);
}

#[test]
fn suboptimal_present_and_resize_recreate() {
    let mut mock = MockPresenter::new(2);
    mock.present_script.push_back(PresentOutcome::Suboptimal);
    let mut pacer = FramePacer::new(mock).unwrap();

    run_frames(&mut pacer, 1);
    assert_eq!(pacer.swapchain_generation(), 1);

    run_frames(&mut pacer, 1);
    assert_eq!(pacer.swapchain_generation(), 1);

    pacer.notify_resized();
    run_frames(&mut pacer, 1);
    assert_eq!(pacer.swapchain_generation(), 2);

    run_frames(&mut pacer, 1);
    assert_eq!(pacer.swapchain_generation(), 2);
}

#[test]
fn suboptimal_acquire_proceeds() {
    let mut mock = MockPresenter::new(2);
    mock.acquire_script.push_back(AcquireOutcome::Acquired {
        image_index: 2,
        suboptimal: true,
    });
    let mut pacer = FramePacer::new(mock).unwrap();

    let frame = pacer.begin_frame().unwrap();
    assert_eq!(frame.image_index, 2);
    assert_eq!(pacer.swapchain_generation(), 0);
}

#[test]
fn calls_out_of_order_are_rejected() {
    let mut pacer = FramePacer::new(MockPresenter::new(2)).unwrap();

    assert!(matches!(pacer.end_frame(), Err(GpuError::InvalidState(_))));

    pacer.begin_frame().unwrap();
    assert_eq!(pacer.state(), FrameState::Recording);
    assert!(matches!(pacer.begin_frame(), Err(GpuError::InvalidState(_))));

    pacer.end_frame().unwrap();
    assert_eq!(pacer.state(), FrameState::Idle);
}

#[test]
fn zero_frames_in_flight_is_rejected() {
    assert!(matches!(
        FramePacer::new(MockPresenter::new(0)),
        Err(GpuError::InvalidConfiguration(_))
    ));
}

#[test]
fn failed_submit_stops_the_pacer() {
    let mut presenter = MockPresenter::new(2);
    presenter.submit_error = Some(vk::Result::ERROR_DEVICE_LOST);
    let mut pacer = FramePacer::new(presenter).unwrap();

    pacer.begin_frame().unwrap();
    let err = pacer.end_frame().unwrap_err();
    assert!(matches!(err, GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
    assert_eq!(pacer.state(), FrameState::Failed);

    // The slot's fence was reset and never submitted; no further frame may wait on it
    assert!(matches!(pacer.begin_frame(), Err(GpuError::InvalidState(_))));
    assert!(matches!(pacer.end_frame(), Err(GpuError::InvalidState(_))));
    assert_eq!(pacer.state(), FrameState::Failed);
    assert!(!pacer
        .presenter()
        .calls
        .iter()
        .skip_while(|call| **call != Call::Submit(0))
        .skip(1)
        .any(|call| matches!(call, Call::WaitSlot(_))));
}

#[test]
fn failed_acquire_stops_the_pacer() {
    let mut presenter = MockPresenter::new(2);
    // Stale fence makes the first wait fail
    presenter.fences[0] = Fence::Reset;
    let mut pacer = FramePacer::new(presenter).unwrap();

    assert!(pacer.begin_frame().is_err());
    assert_eq!(pacer.state(), FrameState::Failed);
    assert!(matches!(pacer.begin_frame(), Err(GpuError::InvalidState(_))));
    assert_eq!(pacer.frame_number(), 0);
}
