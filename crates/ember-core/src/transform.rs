//! Transform matrix stack used while recording a frame.

use glam::{Mat4, Quat, Vec3};

use crate::constants::DEFAULT_TRANSFORM_STACK_DEPTH;
use crate::error::{Error, Result};

/// A growable stack of model transforms.
///
/// The bottom entry is the root transform and can never be popped. `push`
/// duplicates the current top so later multiplications only affect the new
/// entry until it is popped again.
#[derive(Debug, Clone)]
pub struct TransformStack {
    stack: Vec<Mat4>,
    max_depth: usize,
}

impl Default for TransformStack {
    fn default() -> Self {
        Self::new()
    }
}

impl TransformStack {
    /// Create a stack holding a single identity transform.
    pub fn new() -> Self {
        Self::with_max_depth(DEFAULT_TRANSFORM_STACK_DEPTH)
    }

    /// Create a stack limited to `max_depth` entries (including the root).
    pub fn with_max_depth(max_depth: usize) -> Self {
        let mut stack = Vec::with_capacity(max_depth.clamp(1, DEFAULT_TRANSFORM_STACK_DEPTH));
        stack.push(Mat4::IDENTITY);
        Self {
            stack,
            max_depth: max_depth.max(1),
        }
    }

    /// The current (top) transform.
    #[must_use]
    pub fn current(&self) -> Mat4 {
        *self.top()
    }

    /// Number of entries, including the root.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// Maximum number of entries.
    #[must_use]
    pub const fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Duplicate the current transform onto the stack.
    pub fn push(&mut self) -> Result<()> {
        if self.stack.len() >= self.max_depth {
            return Err(Error::StackOverflow {
                max_depth: self.max_depth,
            });
        }
        let top = self.current();
        self.stack.push(top);
        Ok(())
    }

    /// Remove the current transform and return it.
    pub fn pop(&mut self) -> Result<Mat4> {
        if self.stack.len() <= 1 {
            return Err(Error::StackUnderflow);
        }
        self.stack.pop().ok_or(Error::StackUnderflow)
    }

    /// Replace the current transform.
    pub fn load(&mut self, matrix: Mat4) {
        *self.top_mut() = matrix;
    }

    /// Replace the current transform with identity.
    pub fn load_identity(&mut self) {
        self.load(Mat4::IDENTITY);
    }

    /// Post-multiply the current transform.
    pub fn multiply(&mut self, matrix: Mat4) {
        let top = self.top_mut();
        *top *= matrix;
    }

    /// Apply a translation.
    pub fn translate(&mut self, offset: Vec3) {
        self.multiply(Mat4::from_translation(offset));
    }

    /// Apply a rotation of `angle` radians around `axis`.
    pub fn rotate(&mut self, axis: Vec3, angle: f32) {
        self.multiply(Mat4::from_quat(Quat::from_axis_angle(axis.normalize(), angle)));
    }

    /// Apply a non-uniform scale.
    pub fn scale(&mut self, factors: Vec3) {
        self.multiply(Mat4::from_scale(factors));
    }

    /// Drop everything above the root and reset the root to identity.
    ///
    /// Called at the start of each frame.
    pub fn reset(&mut self) {
        self.stack.truncate(1);
        self.load_identity();
    }

    fn top(&self) -> &Mat4 {
        // The root entry is never removed.
        &self.stack[self.stack.len() - 1]
    }

    fn top_mut(&mut self) -> &mut Mat4 {
        let last = self.stack.len() - 1;
        &mut self.stack[last]
    }
}
