//! Decoded frame storage.

/// One of the three planes of a YCbCr frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Plane {
    /// Luma, full resolution.
    Y,
    /// Blue-difference chroma, half resolution on both axes.
    Cb,
    /// Red-difference chroma, half resolution on both axes.
    Cr,
}

impl Plane {
    pub const ALL: [Self; 3] = [Self::Y, Self::Cb, Self::Cr];

    pub const fn index(self) -> usize {
        match self {
            Self::Y => 0,
            Self::Cb => 1,
            Self::Cr => 2,
        }
    }
}

/// Dimensions of a 4:2:0 stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamLayout {
    pub width: u32,
    pub height: u32,
}

impl StreamLayout {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Width and height of a plane. Chroma rounds up for odd sizes.
    pub const fn plane_extent(&self, plane: Plane) -> (u32, u32) {
        match plane {
            Plane::Y => (self.width, self.height),
            Plane::Cb | Plane::Cr => (self.width.div_ceil(2), self.height.div_ceil(2)),
        }
    }

    /// Size of a plane in bytes at one byte per sample.
    pub const fn plane_len(&self, plane: Plane) -> usize {
        let (width, height) = self.plane_extent(plane);
        width as usize * height as usize
    }

    /// Size of all three planes in bytes.
    pub const fn frame_len(&self) -> usize {
        self.plane_len(Plane::Y) + self.plane_len(Plane::Cb) + self.plane_len(Plane::Cr)
    }

    pub const fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

/// One decoded frame: Y, Cb and Cr planes with the declared dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YcbcrFrame {
    pub width: u32,
    pub height: u32,
    pub planes: [Vec<u8>; 3],
}

impl YcbcrFrame {
    /// A zeroed frame sized for `layout`.
    pub fn allocate(layout: StreamLayout) -> Self {
        Self {
            width: layout.width,
            height: layout.height,
            planes: Plane::ALL.map(|plane| vec![0; layout.plane_len(plane)]),
        }
    }

    pub const fn layout(&self) -> StreamLayout {
        StreamLayout::new(self.width, self.height)
    }

    pub fn plane(&self, plane: Plane) -> &[u8] {
        &self.planes[plane.index()]
    }

    pub fn plane_mut(&mut self, plane: Plane) -> &mut [u8] {
        &mut self.planes[plane.index()]
    }

    /// Copy another frame into this one, reusing the existing plane storage.
    pub fn copy_from(&mut self, other: &Self) {
        self.width = other.width;
        self.height = other.height;
        for (dst, src) in self.planes.iter_mut().zip(&other.planes) {
            dst.clone_from(src);
        }
    }
}

/// One frame per tracked stream, moved through the queue as a unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoFrameSet {
    pub frames: Vec<YcbcrFrame>,
}

impl VideoFrameSet {
    /// Zeroed frames for each stream layout.
    pub fn allocate(layouts: &[StreamLayout]) -> Self {
        Self {
            frames: layouts.iter().copied().map(YcbcrFrame::allocate).collect(),
        }
    }

    pub fn layouts(&self) -> Vec<StreamLayout> {
        self.frames.iter().map(YcbcrFrame::layout).collect()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Copy another set into this one, reusing storage where sizes match.
    pub fn copy_from(&mut self, other: &Self) {
        self.frames.truncate(other.frames.len());
        for (dst, src) in self.frames.iter_mut().zip(&other.frames) {
            dst.copy_from(src);
        }
        if self.frames.len() < other.frames.len() {
            let start = self.frames.len();
            self.frames.extend_from_slice(&other.frames[start..]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chroma_planes_round_up() {
        let layout = StreamLayout::new(5, 3);
        assert_eq!(layout.plane_extent(Plane::Y), (5, 3));
        assert_eq!(layout.plane_extent(Plane::Cb), (3, 2));
        assert_eq!(layout.plane_len(Plane::Cr), 6);
        assert_eq!(layout.frame_len(), 15 + 6 + 6);
    }

    #[test]
    fn allocated_frame_matches_layout() {
        let frame = YcbcrFrame::allocate(StreamLayout::new(4, 4));
        assert_eq!(frame.plane(Plane::Y).len(), 16);
        assert_eq!(frame.plane(Plane::Cb).len(), 4);
        assert!(frame.plane(Plane::Cr).iter().all(|&b| b == 0));
    }

    #[test]
    fn copy_reuses_plane_storage() {
        let layout = StreamLayout::new(8, 8);
        let mut src = YcbcrFrame::allocate(layout);
        src.plane_mut(Plane::Y).fill(200);
        src.plane_mut(Plane::Cr).fill(7);

        let mut dst = YcbcrFrame::allocate(layout);
        let luma_ptr = dst.plane(Plane::Y).as_ptr();

        dst.copy_from(&src);
        assert_eq!(dst, src);
        assert_eq!(dst.plane(Plane::Y).as_ptr(), luma_ptr);
    }

    #[test]
    fn set_copy_adjusts_stream_count() {
        let layouts = [StreamLayout::new(2, 2), StreamLayout::new(4, 2)];
        let src = VideoFrameSet::allocate(&layouts);

        let mut fewer = VideoFrameSet::allocate(&layouts[..1]);
        fewer.copy_from(&src);
        assert_eq!(fewer.layouts(), layouts);

        let mut more = VideoFrameSet::allocate(&[layouts[0], layouts[1], layouts[1]]);
        more.copy_from(&src);
        assert_eq!(more, src);
    }
}
