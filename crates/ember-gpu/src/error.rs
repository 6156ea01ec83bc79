//! GPU error types.

use ash::vk;
use thiserror::Error;

use crate::descriptors::DescriptorUsage;

/// GPU-related errors.
#[derive(Error, Debug)]
pub enum GpuError {
    /// Vulkan error.
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// No physical device passed the suitability checks.
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// No memory type satisfies both the resource's type mask and the requested properties.
    #[error("No suitable memory type (type bits {type_bits:#b}, required {required:?})")]
    NoSuitableMemoryType {
        type_bits: u32,
        required: vk::MemoryPropertyFlags,
    },

    /// The shared descriptor pool ran out of space.
    #[error("Descriptor pool exhausted: {usage}")]
    DescriptorPoolExhausted { usage: DescriptorUsage },

    /// A required field was missing or zero before a constructor call.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Requested image layout transition is outside the supported set.
    #[error("Unsupported image layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        old: vk::ImageLayout,
        new: vk::ImageLayout,
    },

    /// A buffer was destroyed while its host mapping was still active.
    #[error("Buffer '{0}' destroyed while still mapped")]
    BufferStillMapped(String),

    /// Memory allocation failed.
    #[error("Memory allocation failed: {0}")]
    AllocationFailed(String),

    /// Surface creation failed.
    #[error("Surface creation failed: {0}")]
    SurfaceCreation(String),

    /// Swapchain creation failed.
    #[error("Swapchain creation failed: {0}")]
    SwapchainCreation(String),

    /// Pipeline creation failed.
    #[error("Pipeline creation failed: {0}")]
    PipelineCreation(String),

    /// Invalid state.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Coarse error classes used to decide how a failure is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Caller bug such as a zero-sized resource or an unsupported transition.
    Configuration,
    /// Out of memory types or descriptor space. Reported to the caller.
    ResourceExhaustion,
    /// Swapchain out of date or suboptimal. Recovered by recreation.
    Transient,
    /// Device lost or any unexpected API result.
    Device,
}

impl ErrorClass {
    /// Short label used as the log category.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::ResourceExhaustion => "resource-exhaustion",
            Self::Transient => "transient",
            Self::Device => "device",
        }
    }
}

impl GpuError {
    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR | vk::Result::SUBOPTIMAL_KHR) => {
                ErrorClass::Transient
            }
            Self::NoSuitableMemoryType { .. }
            | Self::DescriptorPoolExhausted { .. }
            | Self::AllocationFailed(_) => ErrorClass::ResourceExhaustion,
            Self::InvalidConfiguration(_)
            | Self::UnsupportedLayoutTransition { .. }
            | Self::BufferStillMapped(_)
            | Self::InvalidState(_) => ErrorClass::Configuration,
            Self::Vulkan(_)
            | Self::NoSuitableDevice
            | Self::SurfaceCreation(_)
            | Self::SwapchainCreation(_)
            | Self::PipelineCreation(_)
            | Self::Other(_) => ErrorClass::Device,
        }
    }

    /// Whether the process should terminate on this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self.class(), ErrorClass::Configuration | ErrorClass::Device)
    }

    /// Whether this is the swapchain out-of-date condition.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Self::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR))
    }
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, GpuError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        assert_eq!(
            GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).class(),
            ErrorClass::Transient
        );
        assert!(GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST).is_fatal());
        assert!(GpuError::NoSuitableDevice.is_fatal());
        assert!(GpuError::InvalidConfiguration("zero size".into()).is_fatal());
        assert!(GpuError::UnsupportedLayoutTransition {
            old: vk::ImageLayout::GENERAL,
            new: vk::ImageLayout::PRESENT_SRC_KHR,
        }
        .is_fatal());

        let exhausted = GpuError::NoSuitableMemoryType {
            type_bits: 0b101,
            required: vk::MemoryPropertyFlags::HOST_VISIBLE,
        };
        assert_eq!(exhausted.class(), ErrorClass::ResourceExhaustion);
        assert!(!exhausted.is_fatal());
    }

    #[test]
    fn out_of_date_detection() {
        assert!(GpuError::Vulkan(vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(!GpuError::Vulkan(vk::Result::SUBOPTIMAL_KHR).is_out_of_date());
    }
}
