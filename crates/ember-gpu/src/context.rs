//! GPU context management.
//!
//! The context owns everything that lives for the whole program: instance,
//! surface, logical device, allocator, the unified graphics/present queue and
//! a transient command pool for one-shot uploads. The swapchain is owned by
//! the presenter so it can be recreated independently.

use crate::arena::ResourceArena;
use crate::capabilities::{api_at_least, device_extension_names, GpuCapabilities, MIN_API_VERSION};
use crate::command::CommandPool;
use crate::error::{GpuError, Result};
use crate::instance::create_instance;
use crate::memory::GpuAllocator;
use crate::surface::SurfaceContext;
use crate::swapchain::SwapchainTarget;
use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};
use std::ffi::CStr;
use std::fmt;
use std::sync::Arc;

/// Device extensions every candidate must support.
pub fn required_device_extensions() -> Vec<&'static CStr> {
    vec![ash::khr::swapchain::NAME]
}

/// What one queue family can do, as far as selection cares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilySupport {
    pub graphics: bool,
    pub present: bool,
}

/// Facts queried from a physical device, evaluated without touching the GPU.
#[derive(Debug, Clone, Default)]
pub struct DeviceCandidate {
    pub name: String,
    pub api_version: u32,
    pub queue_families: Vec<QueueFamilySupport>,
    pub format_count: usize,
    pub present_mode_count: usize,
    pub missing_extensions: Vec<String>,
}

/// Why a physical device was not selected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    /// No queue family supports both graphics and presentation.
    NoUnifiedQueue,
    /// The surface reports no formats or no present modes.
    SwapchainInadequate,
    MissingExtensions(Vec<String>),
    /// The device predates core synchronization2.
    ApiTooOld(u32),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoUnifiedQueue => write!(f, "no queue family with graphics and present support"),
            Self::SwapchainInadequate => write!(f, "swapchain inadequate"),
            Self::MissingExtensions(names) => {
                write!(f, "missing extensions: {}", names.join(", "))
            }
            Self::ApiTooOld(version) => write!(
                f,
                "Vulkan {}.{} is below 1.3",
                vk::api_version_major(*version),
                vk::api_version_minor(*version)
            ),
        }
    }
}

impl DeviceCandidate {
    /// Return the unified queue family index, or why the device is unsuitable.
    pub fn evaluate(&self) -> std::result::Result<u32, Rejection> {
        if !api_at_least(self.api_version, MIN_API_VERSION) {
            return Err(Rejection::ApiTooOld(self.api_version));
        }

        // First family with both capabilities wins
        let family = self
            .queue_families
            .iter()
            .position(|family| family.graphics && family.present)
            .ok_or(Rejection::NoUnifiedQueue)?;

        if self.format_count == 0 || self.present_mode_count == 0 {
            return Err(Rejection::SwapchainInadequate);
        }

        if !self.missing_extensions.is_empty() {
            return Err(Rejection::MissingExtensions(self.missing_extensions.clone()));
        }

        Ok(family as u32)
    }
}

/// Pick the first suitable candidate, returning its position and queue family.
pub fn select_device(candidates: &[DeviceCandidate]) -> Option<(usize, u32)> {
    candidates
        .iter()
        .enumerate()
        .find_map(|(index, candidate)| match candidate.evaluate() {
            Ok(family) => Some((index, family)),
            Err(reason) => {
                tracing::debug!("Rejected GPU {}: {reason}", candidate.name);
                None
            }
        })
}

/// Query the selection facts for one physical device.
///
/// # Safety
/// The instance, surface and physical device must be valid.
unsafe fn query_candidate(
    instance: &ash::Instance,
    surface: &SurfaceContext,
    physical_device: vk::PhysicalDevice,
) -> Result<DeviceCandidate> {
    let properties = unsafe { instance.get_physical_device_properties(physical_device) };
    let name = properties
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();

    let families =
        unsafe { instance.get_physical_device_queue_family_properties(physical_device) };
    let mut queue_families = Vec::with_capacity(families.len());
    for (index, family) in families.iter().enumerate() {
        queue_families.push(QueueFamilySupport {
            graphics: family.queue_flags.contains(vk::QueueFlags::GRAPHICS),
            present: unsafe { surface.supports_present(physical_device, index as u32)? },
        });
    }

    let support = unsafe { surface.support(physical_device)? };

    let available = unsafe { device_extension_names(instance, physical_device) };
    let missing_extensions = required_device_extensions()
        .into_iter()
        .filter_map(|ext| ext.to_str().ok())
        .filter(|ext| !available.contains(*ext))
        .map(String::from)
        .collect();

    Ok(DeviceCandidate {
        name,
        api_version: properties.api_version,
        queue_families,
        format_count: support.formats.len(),
        present_mode_count: support.present_modes.len(),
        missing_extensions,
    })
}

/// Main GPU context holding Vulkan resources.
pub struct GpuContext {
    // Entry must be kept alive for the lifetime of the context
    #[allow(dead_code)]
    entry: ash::Entry,
    instance: ash::Instance,
    surface: SurfaceContext,
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: Mutex<GpuAllocator>,
    queue_family: u32,
    queue: vk::Queue,
    transient_pool: CommandPool,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
}

impl GpuContext {
    /// Get the Vulkan device handle.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    /// Shared handle to the logical device.
    pub fn device_arc(&self) -> Arc<ash::Device> {
        Arc::clone(&self.device)
    }

    /// Get the Vulkan instance handle.
    pub const fn instance(&self) -> &ash::Instance {
        &self.instance
    }

    /// Get the physical device handle.
    pub const fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Get GPU capabilities.
    pub const fn capabilities(&self) -> &GpuCapabilities {
        &self.capabilities
    }

    /// Get access to the GPU allocator.
    pub const fn allocator(&self) -> &Mutex<GpuAllocator> {
        &self.allocator
    }

    /// The unified graphics, compute and present queue.
    pub const fn queue(&self) -> vk::Queue {
        self.queue
    }

    pub const fn queue_family(&self) -> u32 {
        self.queue_family
    }

    /// Pool for short-lived command buffers.
    pub const fn transient_pool(&self) -> &CommandPool {
        &self.transient_pool
    }

    pub const fn surface(&self) -> &SurfaceContext {
        &self.surface
    }

    pub const fn swapchain_loader(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain_loader
    }

    /// Surface format chosen at device selection.
    pub const fn surface_format(&self) -> vk::SurfaceFormatKHR {
        self.surface_format
    }

    /// Present mode chosen at device selection.
    pub const fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    /// Current surface capabilities.
    pub fn surface_capabilities(&self) -> Result<vk::SurfaceCapabilitiesKHR> {
        let capabilities = unsafe {
            self.surface
                .surface_loader
                .get_physical_device_surface_capabilities(self.physical_device, self.surface.surface)?
        };
        Ok(capabilities)
    }

    /// Resource arena borrowing this context.
    pub const fn arena(&self) -> ResourceArena<'_> {
        ResourceArena::new(self)
    }

    /// Parameters for creating swapchains on this context's surface.
    pub fn swapchain_target(&self) -> SwapchainTarget {
        SwapchainTarget {
            surface: self.surface.surface,
            surface_loader: self.surface.surface_loader.clone(),
            physical_device: self.physical_device,
            surface_format: self.surface_format,
            present_mode: self.present_mode,
            queue_family: self.queue_family,
        }
    }

    /// Wait for device to be idle.
    #[cfg_attr(
        feature = "profiling-tracy",
        tracing::instrument(level = "trace", skip_all)
    )]
    pub fn wait_idle(&self) -> Result<()> {
        unsafe {
            self.device.device_wait_idle()?;
        }
        Ok(())
    }
}

impl Drop for GpuContext {
    fn drop(&mut self) {
        unsafe {
            let _ = self.device.device_wait_idle();

            // Frees all VkDeviceMemory, so it must happen before the device goes
            self.allocator.lock().shutdown();

            self.transient_pool.destroy(&self.device);
            self.device.destroy_device(None);
            self.surface.destroy();
            self.instance.destroy_instance(None);
        }
    }
}

/// Builder for creating a GPU context.
pub struct GpuContextBuilder {
    app_name: String,
    enable_validation: bool,
    vsync: bool,
}

impl Default for GpuContextBuilder {
    fn default() -> Self {
        Self {
            app_name: "Ember".to_string(),
            enable_validation: cfg!(debug_assertions),
            vsync: true,
        }
    }
}

impl GpuContextBuilder {
    /// Create a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the application name.
    #[must_use]
    pub fn app_name(mut self, name: impl Into<String>) -> Self {
        self.app_name = name.into();
        self
    }

    /// Enable or disable validation layers.
    #[must_use]
    pub const fn validation(mut self, enable: bool) -> Self {
        self.enable_validation = enable;
        self
    }

    /// Prefer FIFO presentation.
    #[must_use]
    pub const fn vsync(mut self, enable: bool) -> Self {
        self.vsync = enable;
        self
    }

    /// Build the GPU context for a window.
    pub fn build<W>(self, window: &W) -> Result<GpuContext>
    where
        W: HasDisplayHandle + HasWindowHandle + ?Sized,
    {
        let entry = unsafe { ash::Entry::load() }
            .map_err(|e| GpuError::Other(format!("Failed to load Vulkan: {e}")))?;

        let display = window
            .display_handle()
            .map_err(|e| GpuError::SurfaceCreation(format!("Failed to get display handle: {e}")))?
            .as_raw();

        let instance =
            unsafe { create_instance(&entry, &self.app_name, self.enable_validation, display)? };

        let surface = match unsafe { SurfaceContext::from_window(&entry, &instance, window) } {
            Ok(surface) => surface,
            Err(e) => {
                unsafe { instance.destroy_instance(None) };
                return Err(e);
            }
        };

        match unsafe { self.finish(&instance, &surface) } {
            Ok(parts) => Ok(GpuContext {
                entry,
                instance,
                surface,
                physical_device: parts.physical_device,
                device: parts.device,
                capabilities: parts.capabilities,
                allocator: Mutex::new(parts.allocator),
                queue_family: parts.queue_family,
                queue: parts.queue,
                transient_pool: parts.transient_pool,
                swapchain_loader: parts.swapchain_loader,
                surface_format: parts.surface_format,
                present_mode: parts.present_mode,
            }),
            Err(e) => {
                unsafe {
                    surface.destroy();
                    instance.destroy_instance(None);
                }
                Err(e)
            }
        }
    }

    /// Select the device and create everything that hangs off it.
    unsafe fn finish(&self, instance: &ash::Instance, surface: &SurfaceContext) -> Result<DeviceParts> {
        let physical_devices = unsafe { instance.enumerate_physical_devices()? };

        let mut candidates = Vec::with_capacity(physical_devices.len());
        for &physical_device in &physical_devices {
            candidates.push(unsafe { query_candidate(instance, surface, physical_device)? });
        }

        let (index, queue_family) =
            select_device(&candidates).ok_or(GpuError::NoSuitableDevice)?;
        let physical_device = physical_devices[index];

        let capabilities = unsafe { GpuCapabilities::query(instance, physical_device) };
        tracing::info!("Selected GPU: {}", capabilities.summary());

        let support = unsafe { surface.support(physical_device)? };
        let surface_format = support
            .recommended_format()
            .ok_or(GpuError::NoSuitableDevice)?;
        let present_mode = support.recommended_present_mode(self.vsync);

        let (device, queue) = unsafe { create_device(instance, physical_device, queue_family)? };
        let device = Arc::new(device);

        let allocator =
            match unsafe { GpuAllocator::new(instance, Arc::clone(&device), physical_device) } {
                Ok(allocator) => allocator,
                Err(e) => {
                    unsafe { device.destroy_device(None) };
                    return Err(e);
                }
            };

        let transient_pool = match unsafe { CommandPool::transient(&device, queue_family) } {
            Ok(pool) => pool,
            Err(e) => {
                drop(allocator);
                unsafe { device.destroy_device(None) };
                return Err(e);
            }
        };

        let swapchain_loader = ash::khr::swapchain::Device::new(instance, &device);

        Ok(DeviceParts {
            physical_device,
            device,
            capabilities,
            allocator,
            queue_family,
            queue,
            transient_pool,
            swapchain_loader,
            surface_format,
            present_mode,
        })
    }
}

struct DeviceParts {
    physical_device: vk::PhysicalDevice,
    device: Arc<ash::Device>,
    capabilities: GpuCapabilities,
    allocator: GpuAllocator,
    queue_family: u32,
    queue: vk::Queue,
    transient_pool: CommandPool,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
}

/// Create the logical device with one queue from the unified family.
///
/// # Safety
/// The instance and physical device must be valid.
unsafe fn create_device(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
    queue_family: u32,
) -> Result<(ash::Device, vk::Queue)> {
    let queue_priority = 1.0_f32;
    let queue_create_info = vk::DeviceQueueCreateInfo::default()
        .queue_family_index(queue_family)
        .queue_priorities(std::slice::from_ref(&queue_priority));

    let extension_names: Vec<*const std::ffi::c_char> = required_device_extensions()
        .iter()
        .map(|ext| ext.as_ptr())
        .collect();

    let mut vulkan_1_3_features = vk::PhysicalDeviceVulkan13Features::default()
        .dynamic_rendering(true)
        .synchronization2(true);

    let mut features2 = vk::PhysicalDeviceFeatures2::default().push_next(&mut vulkan_1_3_features);

    let device_create_info = vk::DeviceCreateInfo::default()
        .queue_create_infos(std::slice::from_ref(&queue_create_info))
        .enabled_extension_names(&extension_names)
        .push_next(&mut features2);

    let device = unsafe { instance.create_device(physical_device, &device_create_info, None)? };
    let queue = unsafe { device.get_device_queue(queue_family, 0) };

    Ok((device, queue))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(graphics: bool, present: bool) -> QueueFamilySupport {
        QueueFamilySupport { graphics, present }
    }

    fn suitable(name: &str) -> DeviceCandidate {
        DeviceCandidate {
            name: name.to_string(),
            api_version: vk::API_VERSION_1_3,
            queue_families: vec![family(false, true), family(true, true)],
            format_count: 2,
            present_mode_count: 1,
            missing_extensions: vec![],
        }
    }

    #[test]
    fn unified_family_is_first_with_both() {
        let mut candidate = suitable("gpu");
        candidate.queue_families.push(family(true, true));
        assert_eq!(candidate.evaluate(), Ok(1));
    }

    #[test]
    fn split_graphics_and_present_is_rejected() {
        let candidate = DeviceCandidate {
            queue_families: vec![family(true, false), family(false, true)],
            ..suitable("split")
        };
        assert_eq!(candidate.evaluate(), Err(Rejection::NoUnifiedQueue));
    }

    #[test]
    fn empty_surface_support_is_rejected() {
        let no_formats = DeviceCandidate {
            format_count: 0,
            ..suitable("a")
        };
        let no_modes = DeviceCandidate {
            present_mode_count: 0,
            ..suitable("b")
        };
        assert_eq!(no_formats.evaluate(), Err(Rejection::SwapchainInadequate));
        assert_eq!(no_modes.evaluate(), Err(Rejection::SwapchainInadequate));
    }

    #[test]
    fn missing_extension_is_rejected() {
        let candidate = DeviceCandidate {
            missing_extensions: vec!["VK_KHR_swapchain".to_string()],
            ..suitable("headless")
        };
        let rejection = candidate.evaluate().unwrap_err();
        assert!(rejection.to_string().contains("VK_KHR_swapchain"));
    }

    #[test]
    fn old_api_is_rejected() {
        let candidate = DeviceCandidate {
            api_version: vk::API_VERSION_1_2,
            ..suitable("legacy")
        };
        assert_eq!(
            candidate.evaluate(),
            Err(Rejection::ApiTooOld(vk::API_VERSION_1_2))
        );
        assert!(candidate.evaluate().unwrap_err().to_string().contains("1.2"));
    }

    #[test]
    fn first_suitable_device_wins() {
        let rejected = DeviceCandidate {
            queue_families: vec![],
            ..suitable("cpu")
        };
        let candidates = [rejected, suitable("first"), suitable("second")];
        assert_eq!(select_device(&candidates), Some((1, 1)));
    }

    #[test]
    fn no_suitable_device() {
        assert_eq!(select_device(&[]), None);
        let candidates = [DeviceCandidate {
            format_count: 0,
            ..suitable("only")
        }];
        assert_eq!(select_device(&candidates), None);
    }
}
