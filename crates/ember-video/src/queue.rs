//! Bounded frame queue shared by the decode and render threads.
//!
//! The ring is a fixed set of pre-allocated [`VideoFrameSet`] slots. `head`
//! is the next slot to fill, `tail` the next to drain; `len == 0` is empty
//! and `len == capacity` is full. All three are only touched with the mutex
//! held. Plane data is copied into and out of slots so that neither side
//! ever holds a reference into the ring after the lock is released.

use crate::error::{Result, VideoError};
use crate::frame::{StreamLayout, VideoFrameSet};
use parking_lot::{Condvar, Mutex};

/// Default number of frame sets buffered ahead of the renderer.
const DEFAULT_CAPACITY: usize = 3;

/// Queue configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoQueueConfig {
    pub capacity: usize,
}

impl Default for VideoQueueConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

struct Ring {
    slots: Vec<VideoFrameSet>,
    head: usize,
    tail: usize,
    len: usize,
    stopped: bool,
}

impl Ring {
    fn push(&mut self, set: &VideoFrameSet) {
        let capacity = self.slots.len();
        self.slots[self.head].copy_from(set);
        self.head = (self.head + 1) % capacity;
        self.len += 1;
    }

    fn pop_into(&mut self, out: &mut VideoFrameSet) {
        let capacity = self.slots.len();
        out.copy_from(&self.slots[self.tail]);
        self.tail = (self.tail + 1) % capacity;
        self.len -= 1;
    }

    fn is_full(&self) -> bool {
        self.len == self.slots.len()
    }
}

/// Fixed-capacity FIFO of video frame sets.
pub struct VideoFrameQueue {
    ring: Mutex<Ring>,
    not_full: Condvar,
    not_empty: Condvar,
    layouts: Vec<StreamLayout>,
}

impl VideoFrameQueue {
    /// Create a queue and allocate every slot for the given stream layouts.
    pub fn new(config: VideoQueueConfig, layouts: &[StreamLayout]) -> Result<Self> {
        if config.capacity == 0 {
            return Err(VideoError::InvalidConfiguration(
                "Video queue capacity must be at least 1".to_string(),
            ));
        }
        if let Some(layout) = layouts.iter().find(|layout| layout.is_empty()) {
            return Err(VideoError::InvalidConfiguration(format!(
                "Stream layout {}x{} is empty",
                layout.width, layout.height
            )));
        }

        let slots = (0..config.capacity)
            .map(|_| VideoFrameSet::allocate(layouts))
            .collect();

        Ok(Self {
            ring: Mutex::new(Ring {
                slots,
                head: 0,
                tail: 0,
                len: 0,
                stopped: false,
            }),
            not_full: Condvar::new(),
            not_empty: Condvar::new(),
            layouts: layouts.to_vec(),
        })
    }

    /// Layouts of the streams each entry holds.
    pub fn layouts(&self) -> &[StreamLayout] {
        &self.layouts
    }

    /// An empty frame set shaped for this queue.
    pub fn allocate_set(&self) -> VideoFrameSet {
        VideoFrameSet::allocate(&self.layouts)
    }

    /// Copy a frame set into the queue, blocking while it is full.
    ///
    /// Returns `false` without enqueueing once the queue has been stopped.
    pub fn enqueue(&self, set: &VideoFrameSet) -> bool {
        let mut ring = self.ring.lock();
        while ring.is_full() && !ring.stopped {
            self.not_full.wait(&mut ring);
        }
        if ring.stopped {
            return false;
        }

        ring.push(set);
        self.not_empty.notify_one();
        true
    }

    /// Copy the oldest frame set into `out`, blocking while the queue is empty.
    ///
    /// Returns `false` if the queue is stopped and drained.
    pub fn dequeue_into(&self, out: &mut VideoFrameSet) -> bool {
        let mut ring = self.ring.lock();
        while ring.len == 0 && !ring.stopped {
            self.not_empty.wait(&mut ring);
        }
        if ring.len == 0 {
            return false;
        }

        ring.pop_into(out);
        self.not_full.notify_one();
        true
    }

    /// Owned variant of [`Self::dequeue_into`].
    pub fn dequeue(&self) -> Option<VideoFrameSet> {
        let mut out = self.allocate_set();
        self.dequeue_into(&mut out).then_some(out)
    }

    /// Copy the oldest frame set into `out` if one is ready.
    pub fn try_dequeue_into(&self, out: &mut VideoFrameSet) -> bool {
        let mut ring = self.ring.lock();
        if ring.len == 0 {
            return false;
        }

        ring.pop_into(out);
        self.not_full.notify_one();
        true
    }

    /// Stop the queue and wake every waiter.
    ///
    /// Blocked producers return `false`; consumers drain what is left.
    pub fn stop(&self) {
        let mut ring = self.ring.lock();
        ring.stopped = true;
        drop(ring);

        self.not_full.notify_all();
        self.not_empty.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.ring.lock().stopped
    }

    pub fn len(&self) -> usize {
        self.ring.lock().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.ring.lock().slots.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::Plane;

    fn layout() -> StreamLayout {
        StreamLayout::new(4, 4)
    }

    fn set_with_luma(value: u8) -> VideoFrameSet {
        let mut set = VideoFrameSet::allocate(&[layout()]);
        set.frames[0].plane_mut(Plane::Y).fill(value);
        set
    }

    #[test]
    fn zero_capacity_is_rejected() {
        let result = VideoFrameQueue::new(VideoQueueConfig { capacity: 0 }, &[layout()]);
        assert!(matches!(result, Err(VideoError::InvalidConfiguration(_))));

        let result = VideoFrameQueue::new(VideoQueueConfig::default(), &[StreamLayout::new(0, 4)]);
        assert!(result.is_err());
    }

    #[test]
    fn indices_wrap_around() {
        let queue = VideoFrameQueue::new(VideoQueueConfig { capacity: 2 }, &[layout()]).unwrap();
        let mut out = queue.allocate_set();

        for value in 0..5u8 {
            assert!(queue.enqueue(&set_with_luma(value)));
            assert!(queue.try_dequeue_into(&mut out));
            assert_eq!(out.frames[0].plane(Plane::Y)[0], value);
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn try_dequeue_on_empty() {
        let queue = VideoFrameQueue::new(VideoQueueConfig::default(), &[layout()]).unwrap();
        let mut out = queue.allocate_set();
        assert!(!queue.try_dequeue_into(&mut out));
    }

    #[test]
    fn stopped_queue_rejects_and_drains() {
        let queue = VideoFrameQueue::new(VideoQueueConfig::default(), &[layout()]).unwrap();
        assert!(queue.enqueue(&set_with_luma(1)));
        queue.stop();

        assert!(!queue.enqueue(&set_with_luma(2)));
        assert!(queue.dequeue().is_some());
        assert!(queue.dequeue().is_none());
        assert!(queue.is_stopped());
    }
}
