//! Video stream sources.

use crate::error::{Result, VideoError};
use crate::frame::{Plane, StreamLayout, YcbcrFrame};

/// Outcome of decoding one frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A frame was written to the output.
    Frame,
    /// The stream has no more frames until it is rewound.
    EndOfStream,
}

/// A source of decoded YCbCr frames.
///
/// Implementations wrap an actual decoder. They are moved onto the decode
/// thread, hence `Send`.
pub trait VideoStream: Send {
    /// Dimensions of every frame this stream produces.
    fn layout(&self) -> StreamLayout;

    /// Decode the next frame into `frame`, which is sized for [`Self::layout`].
    fn decode_into(&mut self, frame: &mut YcbcrFrame) -> Result<DecodeStatus>;

    /// Seek back to the first frame.
    fn rewind(&mut self) -> Result<()>;
}

/// Synthetic stream of a fixed number of frames.
///
/// Frame `n` has every luma sample set to `seed + n` (wrapping) and a
/// horizontal chroma ramp, which makes ordering easy to verify downstream.
#[derive(Debug, Clone)]
pub struct TestPatternStream {
    layout: StreamLayout,
    frame_count: u32,
    position: u32,
    seed: u8,
}

impl TestPatternStream {
    pub fn new(layout: StreamLayout, frame_count: u32) -> Self {
        Self {
            layout,
            frame_count,
            position: 0,
            seed: 0,
        }
    }

    #[must_use]
    pub const fn with_seed(mut self, seed: u8) -> Self {
        self.seed = seed;
        self
    }

    /// Index of the next frame to decode.
    pub const fn position(&self) -> u32 {
        self.position
    }

    /// Luma value of frame `index`.
    pub const fn luma_for(&self, index: u32) -> u8 {
        self.seed.wrapping_add(index as u8)
    }
}

impl VideoStream for TestPatternStream {
    fn layout(&self) -> StreamLayout {
        self.layout
    }

    fn decode_into(&mut self, frame: &mut YcbcrFrame) -> Result<DecodeStatus> {
        if self.position >= self.frame_count {
            return Ok(DecodeStatus::EndOfStream);
        }
        if frame.layout() != self.layout {
            return Err(VideoError::Decode(format!(
                "Output frame is {}x{}, stream is {}x{}",
                frame.width, frame.height, self.layout.width, self.layout.height
            )));
        }

        frame.plane_mut(Plane::Y).fill(self.luma_for(self.position));

        let (chroma_width, _) = self.layout.plane_extent(Plane::Cb);
        for plane in [Plane::Cb, Plane::Cr] {
            for (i, sample) in frame.plane_mut(plane).iter_mut().enumerate() {
                let x = i % chroma_width as usize;
                *sample = (x * 255 / chroma_width.max(1) as usize) as u8;
            }
        }

        self.position += 1;
        Ok(DecodeStatus::Frame)
    }

    fn rewind(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }
}
