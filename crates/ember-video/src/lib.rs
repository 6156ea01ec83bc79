//! Video frame transport for the Ember engine.
//!
//! A single decode thread pulls YCbCr frames from every tracked stream and
//! pushes them, one set at a time, into a bounded ring that the render
//! thread drains once per frame. All storage is allocated up front; steady
//! state playback copies planes but never allocates.

pub mod error;
pub mod frame;
pub mod producer;
pub mod queue;
pub mod stream;

pub use error::{Result, VideoError};
pub use frame::{Plane, StreamLayout, VideoFrameSet, YcbcrFrame};
pub use producer::DecodeThread;
pub use queue::{VideoFrameQueue, VideoQueueConfig};
pub use stream::{DecodeStatus, TestPatternStream, VideoStream};
