//! Decode thread feeding the frame queue.
//!
//! When any stream reaches its end, every stream is rewound together and
//! decoding continues. Streams of different lengths therefore restart in
//! lockstep with the shortest one rather than looping independently.

use crate::error::{Result, VideoError};
use crate::frame::VideoFrameSet;
use crate::queue::VideoFrameQueue;
use crate::stream::{DecodeStatus, VideoStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Owns the producer thread. Stopping and joining happens on drop.
pub struct DecodeThread {
    handle: Option<JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    queue: Arc<VideoFrameQueue>,
}

impl DecodeThread {
    /// Start decoding `streams` into `queue`.
    ///
    /// The streams must match the queue's layouts in number and size.
    pub fn spawn(streams: Vec<Box<dyn VideoStream>>, queue: Arc<VideoFrameQueue>) -> Result<Self> {
        let layouts: Vec<_> = streams.iter().map(|stream| stream.layout()).collect();
        if layouts != queue.layouts() {
            return Err(VideoError::InvalidConfiguration(format!(
                "Stream layouts {layouts:?} do not match queue layouts {:?}",
                queue.layouts()
            )));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_queue = Arc::clone(&queue);

        let handle = thread::Builder::new()
            .name("ember-video-decode".to_string())
            .spawn(move || decode_loop(streams, &thread_queue, &thread_stop))?;

        Ok(Self {
            handle: Some(handle),
            stop,
            queue,
        })
    }

    pub fn queue(&self) -> &Arc<VideoFrameQueue> {
        &self.queue
    }

    /// Whether the thread has exited. The queue is stopped by then, so
    /// consumers drain what is left and then see the end of the stream.
    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Stop the thread and wait for it to exit.
    pub fn shutdown(mut self) {
        self.stop_and_join();
    }

    fn stop_and_join(&mut self) {
        self.stop.store(true, Ordering::Release);
        // Wakes the producer if it is blocked on a full queue
        self.queue.stop();

        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Video decode thread panicked");
            }
        }
    }
}

impl Drop for DecodeThread {
    fn drop(&mut self) {
        self.stop_and_join();
    }
}

fn decode_loop(mut streams: Vec<Box<dyn VideoStream>>, queue: &VideoFrameQueue, stop: &AtomicBool) {
    let mut scratch = queue.allocate_set();
    // Rewinds without a decoded frame in between; two in a row means a stream is empty
    let mut idle_rewinds = 0;

    while !stop.load(Ordering::Acquire) {
        match decode_set(&mut streams, &mut scratch) {
            Ok(DecodeStatus::Frame) => {
                idle_rewinds = 0;
                if !queue.enqueue(&scratch) {
                    break;
                }
            }
            Ok(DecodeStatus::EndOfStream) => {
                idle_rewinds += 1;
                if idle_rewinds > 1 {
                    tracing::error!("Video stream produced no frames after rewinding");
                    break;
                }
                tracing::debug!("End of stream, rewinding all {} streams", streams.len());
                if let Err(e) = streams.iter_mut().try_for_each(|stream| stream.rewind()) {
                    tracing::error!("Video rewind failed: {e}");
                    break;
                }
            }
            Err(e) => {
                tracing::error!("Video decode failed: {e}");
                break;
            }
        }
    }

    // Consumers blocked on an empty queue would otherwise wait forever
    queue.stop();
    tracing::debug!("Video decode thread exiting");
}

/// Decode one frame from every stream into `set`.
fn decode_set(streams: &mut [Box<dyn VideoStream>], set: &mut VideoFrameSet) -> Result<DecodeStatus> {
    let mut status = DecodeStatus::Frame;
    for (stream, frame) in streams.iter_mut().zip(&mut set.frames) {
        if stream.decode_into(frame)? == DecodeStatus::EndOfStream {
            status = DecodeStatus::EndOfStream;
        }
    }
    Ok(status)
}
