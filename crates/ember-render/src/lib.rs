//! Point-cloud compute rendering for the Ember engine.
//!
//! This crate provides:
//! - Batch planning that keeps dispatches under the device group limit
//! - The render/resolve compute passes and their shader ABI
//! - GPU upload of point clouds and of decoded video planes

pub mod dispatch;
pub mod framebuffer;
pub mod point_cloud;
pub mod renderer;
pub mod video_texture;

pub use dispatch::{
    BatchPlan, DispatchBatch, DispatchConfig, PointCloudDispatcher, PointPushConstants,
    PointUniforms,
};
pub use framebuffer::PointFramebuffer;
pub use point_cloud::{GpuPoint, GpuPointCloud};
pub use renderer::{PointRenderer, PointShaders};
pub use video_texture::VideoPlaneTextures;
