//! Swapchain creation, acquire and present.
//!
//! Frames reach the swapchain through transfer copies, so images are created
//! with `TRANSFER_DST` usage and no views.

use crate::error::{GpuError, Result};
use crate::pacer::{AcquireOutcome, PresentOutcome};
use ash::vk;

/// Usage every swapchain image is created with.
pub const SWAPCHAIN_IMAGE_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::TRANSFER_DST.as_raw() | vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw(),
);

/// A created swapchain and its images.
pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl Swapchain {
    /// Acquire the next image, signaling `semaphore` when it is ready.
    ///
    /// An out-of-date swapchain is reported as [`AcquireOutcome::OutOfDate`],
    /// in which case the semaphore is left unsignaled.
    ///
    /// # Safety
    /// All handles must be valid.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn acquire_next_image(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        semaphore: vk::Semaphore,
        timeout_ns: u64,
    ) -> Result<AcquireOutcome> {
        let acquired = unsafe {
            swapchain_loader.acquire_next_image(self.swapchain, timeout_ns, semaphore, vk::Fence::null())
        };
        match acquired {
            Ok((image_index, suboptimal)) => Ok(AcquireOutcome::Acquired {
                image_index,
                suboptimal,
            }),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(AcquireOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue `image_index` for presentation once `wait_semaphores` signal.
    ///
    /// # Safety
    /// All handles must be valid and the image must have been acquired.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub unsafe fn present(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<PresentOutcome> {
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(wait_semaphores)
            .swapchains(std::slice::from_ref(&self.swapchain))
            .image_indices(std::slice::from_ref(&image_index));

        match unsafe { swapchain_loader.queue_present(queue, &present_info) } {
            Ok(false) => Ok(PresentOutcome::Optimal),
            Ok(true) => Ok(PresentOutcome::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(PresentOutcome::OutOfDate),
            Err(e) => Err(e.into()),
        }
    }

    /// Destroy the swapchain. Idempotent.
    ///
    /// # Safety
    /// The loader must be the one it was created with, and no image may be in use.
    pub unsafe fn destroy(&mut self, swapchain_loader: &ash::khr::swapchain::Device) {
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe { swapchain_loader.destroy_swapchain(self.swapchain, None) };
        }
        self.swapchain = vk::SwapchainKHR::null();
        self.images.clear();
    }
}

/// Everything needed to (re)create a swapchain for one surface.
#[derive(Clone)]
pub struct SwapchainTarget {
    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::khr::surface::Instance,
    pub physical_device: vk::PhysicalDevice,
    pub surface_format: vk::SurfaceFormatKHR,
    pub present_mode: vk::PresentModeKHR,
    pub queue_family: u32,
}

impl SwapchainTarget {
    /// Create a swapchain sized for the given framebuffer.
    ///
    /// # Safety
    /// The loader must belong to the device and instance the surface was created with.
    pub unsafe fn create(
        &self,
        swapchain_loader: &ash::khr::swapchain::Device,
        width: u32,
        height: u32,
    ) -> Result<Swapchain> {
        let capabilities = unsafe {
            self.surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface)?
        };
        if !capabilities.supported_usage_flags.contains(SWAPCHAIN_IMAGE_USAGE) {
            return Err(GpuError::SwapchainCreation(format!(
                "Surface does not support {SWAPCHAIN_IMAGE_USAGE:?} images"
            )));
        }

        let extent = calculate_extent(&capabilities, width, height);
        if extent.width == 0 || extent.height == 0 {
            return Err(GpuError::SwapchainCreation(
                "Surface has zero extent".to_string(),
            ));
        }

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(self.surface)
            .min_image_count(select_image_count(&capabilities))
            .image_format(self.surface_format.format)
            .image_color_space(self.surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_IMAGE_USAGE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .queue_family_indices(std::slice::from_ref(&self.queue_family))
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(self.present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .map_err(|e| GpuError::SwapchainCreation(e.to_string()))?;
        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(e.into());
            }
        };

        tracing::info!(
            "Swapchain created: {}x{}, {} images, {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            self.surface_format.format,
            self.present_mode
        );

        Ok(Swapchain {
            swapchain,
            images,
            format: self.surface_format.format,
            extent,
        })
    }
}

/// One more image than the minimum, capped by the maximum (0 means unbounded).
pub const fn select_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let wanted = capabilities.min_image_count + 1;
    match capabilities.max_image_count {
        0 => wanted,
        max if wanted > max => max,
        _ => wanted,
    }
}

/// Select the best surface format, or `None` when the list is empty.
pub fn select_surface_format(available: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    // Prefer SRGB
    available
        .iter()
        .find(|format| {
            format.format == vk::Format::B8G8R8A8_SRGB
                && format.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| available.first())
        .copied()
}

/// Select the best present mode.
pub fn select_present_mode(available: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if vsync {
        return vk::PresentModeKHR::FIFO;
    }

    // Prefer mailbox (triple buffering without vsync), then immediate
    [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE]
        .into_iter()
        .find(|mode| available.contains(mode))
        // FIFO is always supported
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// Extent for a framebuffer of `width` x `height`.
pub fn calculate_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    // u32::MAX means the surface takes whatever size the swapchain has
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }
    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: width.clamp(min.width, max.width),
        height: height.clamp(min.height, max.height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_srgb_format() {
        let unorm = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let srgb = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(select_surface_format(&[unorm, srgb]), Some(srgb));
        assert_eq!(select_surface_format(&[unorm]), Some(unorm));
        assert_eq!(select_surface_format(&[]), None);
    }

    #[test]
    fn present_mode_selection() {
        let all = [
            vk::PresentModeKHR::FIFO,
            vk::PresentModeKHR::IMMEDIATE,
            vk::PresentModeKHR::MAILBOX,
        ];
        assert_eq!(select_present_mode(&all, true), vk::PresentModeKHR::FIFO);
        assert_eq!(select_present_mode(&all, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            select_present_mode(&[vk::PresentModeKHR::IMMEDIATE], false),
            vk::PresentModeKHR::IMMEDIATE
        );
        assert_eq!(select_present_mode(&[], false), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let extent = calculate_extent(&caps((800, 600)), 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_clamps_when_surface_is_flexible() {
        let extent = calculate_extent(&caps((u32::MAX, u32::MAX)), 10_000, 0);
        assert_eq!((extent.width, extent.height), (4096, 1));
    }

    #[test]
    fn image_count_respects_maximum() {
        assert_eq!(select_image_count(&caps((1, 1))), 3);

        let mut unbounded = caps((1, 1));
        unbounded.max_image_count = 0;
        unbounded.min_image_count = 4;
        assert_eq!(select_image_count(&unbounded), 5);

        let mut tight = caps((1, 1));
        tight.min_image_count = 3;
        assert_eq!(select_image_count(&tight), 3);
    }
}
