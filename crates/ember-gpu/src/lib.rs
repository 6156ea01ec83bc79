//! Vulkan resource and frame-synchronization layer for the Ember engine.
//!
//! This crate provides:
//! - Instance, surface and device bootstrap
//! - Buffer and image allocation via gpu-allocator, with staged uploads
//! - A fixed-capacity descriptor arena with usage accounting
//! - Frame pacing across frames in flight, surviving swapchain invalidation
//! - Compute pipeline creation

pub mod arena;
pub mod capabilities;
pub mod command;
pub mod context;
pub mod descriptors;
pub mod error;
pub mod instance;
pub mod layout;
pub mod memory;
pub mod pacer;
pub mod pipeline;
pub mod presenter;
pub mod surface;
pub mod swapchain;
pub mod sync;

pub use arena::ResourceArena;
pub use capabilities::{ComputeLimits, GpuCapabilities, GpuVendor, MemorySummary};
pub use command::{CommandPool, OneShotCommands};
pub use context::{GpuContext, GpuContextBuilder};
pub use descriptors::{
    write_combined_image_sampler, write_storage_buffer, write_storage_image,
    write_uniform_buffer, DescriptorArena, DescriptorCapacity, DescriptorCounts,
    DescriptorLayout, DescriptorSetLayoutBuilder, DescriptorSetSource, DescriptorUsage,
};
pub use error::{ErrorClass, GpuError, Result};
pub use layout::{record_transition, transition_masks};
pub use memory::{BufferDesc, BufferKind, GpuAllocator, GpuBuffer, GpuImage, ImageDesc};
pub use pacer::{
    AcquireOutcome, ActiveFrame, FramePacer, FrameState, PresentOutcome, Presenter,
};
pub use pipeline::{load_spirv, ComputePipeline};
pub use presenter::{FramebufferSize, VulkanPresenter};
pub use sync::{FrameSlot, ImageSemaphores, DEFAULT_FRAMES_IN_FLIGHT};

/// Re-export of the Vulkan bindings so dependents share one version.
pub use ash::vk;
