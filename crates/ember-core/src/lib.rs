//! Core types and file formats for the Ember engine.
//!
//! This crate provides the foundational pieces shared by the GPU and
//! application layers:
//! - The point-cloud binary file format
//! - The per-frame transform matrix stack
//! - Common error types

pub mod error;
pub mod point_cloud;
pub mod transform;

pub use error::{Error, Result};
pub use point_cloud::{PointCloud, PointVertex};
pub use transform::TransformStack;

/// Engine-wide constants
pub mod constants {
    /// Size in bytes of the point-cloud vertex count header.
    pub const POINT_CLOUD_HEADER_SIZE: usize = 8;
    /// Size in bytes of one packed point-cloud vertex record (3 x f32 + 3 x u8).
    pub const POINT_RECORD_SIZE: usize = 15;
    /// Default maximum depth of the transform stack.
    pub const DEFAULT_TRANSFORM_STACK_DEPTH: usize = 32;
}
