//! Properties of the selected physical device.

use ash::vk;
use std::collections::HashSet;

/// Minimum API version: `queue_submit2` and `cmd_pipeline_barrier2` are core
/// from 1.3 onwards.
pub const MIN_API_VERSION: u32 = vk::API_VERSION_1_3;

/// PCI vendor of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GpuVendor {
    Nvidia,
    Amd,
    Intel,
    Apple,
    Other(u32),
}

impl GpuVendor {
    pub const fn from_vendor_id(id: u32) -> Self {
        match id {
            0x10DE => Self::Nvidia,
            0x1002 => Self::Amd,
            0x8086 => Self::Intel,
            0x106B => Self::Apple,
            other => Self::Other(other),
        }
    }
}

/// Limits consulted when planning compute dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ComputeLimits {
    /// Work groups per dispatch, per axis.
    pub max_group_count: [u32; 3],
    pub max_group_size: [u32; 3],
    pub max_invocations: u32,
    pub max_push_constants_size: u32,
}

impl ComputeLimits {
    /// Whether a 1D work group of `size` invocations can be dispatched.
    pub const fn fits_work_group(&self, size: u32) -> bool {
        size > 0 && size <= self.max_group_size[0] && size <= self.max_invocations
    }
}

/// Heap sizes in bytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemorySummary {
    pub device_local_bytes: u64,
    pub heap_count: u32,
}

impl MemorySummary {
    pub fn from_properties(properties: &vk::PhysicalDeviceMemoryProperties) -> Self {
        let heaps = properties
            .memory_heaps
            .iter()
            .take(properties.memory_heap_count as usize);
        Self {
            device_local_bytes: heaps
                .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
                .map(|heap| heap.size)
                .sum(),
            heap_count: properties.memory_heap_count,
        }
    }
}

/// Detected device capabilities.
#[derive(Debug, Clone)]
pub struct GpuCapabilities {
    pub vendor: GpuVendor,
    pub device_name: String,
    pub api_version: u32,
    pub driver_version: u32,
    pub compute: ComputeLimits,
    pub memory: MemorySummary,
    pub available_extensions: HashSet<String>,
}

impl GpuCapabilities {
    /// Query capabilities from a physical device.
    ///
    /// # Safety
    /// The instance and physical device must be valid.
    pub unsafe fn query(instance: &ash::Instance, physical_device: vk::PhysicalDevice) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };
        let limits = &properties.limits;

        Self {
            vendor: GpuVendor::from_vendor_id(properties.vendor_id),
            device_name: properties
                .device_name_as_c_str()
                .map_or_else(|_| "<unnamed device>".to_string(), |name| {
                    name.to_string_lossy().into_owned()
                }),
            api_version: properties.api_version,
            driver_version: properties.driver_version,
            compute: ComputeLimits {
                max_group_count: limits.max_compute_work_group_count,
                max_group_size: limits.max_compute_work_group_size,
                max_invocations: limits.max_compute_work_group_invocations,
                max_push_constants_size: limits.max_push_constants_size,
            },
            memory: MemorySummary::from_properties(&memory_properties),
            available_extensions: unsafe { device_extension_names(instance, physical_device) },
        }
    }

    /// Largest group count accepted by a 1D dispatch.
    pub const fn max_dispatch_groups(&self) -> u32 {
        self.compute.max_group_count[0]
    }

    /// Whether the device reports at least [`MIN_API_VERSION`].
    pub const fn meets_api_version(&self) -> bool {
        api_at_least(self.api_version, MIN_API_VERSION)
    }

    /// One-line description for the startup log.
    pub fn summary(&self) -> String {
        format!(
            "{} ({:?}) - Vulkan {}.{}.{} - {} MB device-local",
            self.device_name,
            self.vendor,
            vk::api_version_major(self.api_version),
            vk::api_version_minor(self.api_version),
            vk::api_version_patch(self.api_version),
            self.memory.device_local_bytes / (1024 * 1024),
        )
    }
}

/// Compare two packed API versions, ignoring the variant and patch.
pub const fn api_at_least(version: u32, required: u32) -> bool {
    let (major, minor) = (vk::api_version_major(version), vk::api_version_minor(version));
    let (req_major, req_minor) = (
        vk::api_version_major(required),
        vk::api_version_minor(required),
    );
    major > req_major || (major == req_major && minor >= req_minor)
}

/// Names of all extensions a physical device advertises.
///
/// # Safety
/// The instance and physical device must be valid.
pub unsafe fn device_extension_names(
    instance: &ash::Instance,
    physical_device: vk::PhysicalDevice,
) -> HashSet<String> {
    unsafe { instance.enumerate_device_extension_properties(physical_device) }
        .unwrap_or_default()
        .iter()
        .filter_map(|ext| {
            ext.extension_name_as_c_str()
                .ok()
                .and_then(|name| name.to_str().ok())
                .map(String::from)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vendor_identification() {
        assert_eq!(GpuVendor::from_vendor_id(0x10DE), GpuVendor::Nvidia);
        assert_eq!(GpuVendor::from_vendor_id(0x106B), GpuVendor::Apple);
        assert_eq!(GpuVendor::from_vendor_id(0x1234), GpuVendor::Other(0x1234));
    }

    #[test]
    fn api_version_ordering() {
        assert!(api_at_least(vk::API_VERSION_1_3, MIN_API_VERSION));
        assert!(api_at_least(vk::make_api_version(0, 1, 3, 280), MIN_API_VERSION));
        assert!(api_at_least(vk::make_api_version(0, 2, 0, 0), MIN_API_VERSION));
        assert!(!api_at_least(vk::API_VERSION_1_2, MIN_API_VERSION));
    }

    #[test]
    fn work_group_fit() {
        let limits = ComputeLimits {
            max_group_count: [65_535; 3],
            max_group_size: [1024, 1024, 64],
            max_invocations: 256,
            max_push_constants_size: 128,
        };
        assert!(limits.fits_work_group(256));
        assert!(!limits.fits_work_group(512));
        assert!(!limits.fits_work_group(0));
    }

    #[test]
    fn device_local_heaps_are_summed() {
        let mut properties = vk::PhysicalDeviceMemoryProperties {
            memory_heap_count: 3,
            ..Default::default()
        };
        properties.memory_heaps[0] = vk::MemoryHeap {
            size: 8 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        properties.memory_heaps[1] = vk::MemoryHeap {
            size: 16 << 30,
            flags: vk::MemoryHeapFlags::empty(),
        };
        properties.memory_heaps[2] = vk::MemoryHeap {
            size: 256 << 20,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };
        // Beyond memory_heap_count, ignored
        properties.memory_heaps[3] = vk::MemoryHeap {
            size: 1 << 30,
            flags: vk::MemoryHeapFlags::DEVICE_LOCAL,
        };

        let summary = MemorySummary::from_properties(&properties);
        assert_eq!(summary.device_local_bytes, (8 << 30) + (256 << 20));
        assert_eq!(summary.heap_count, 3);
    }
}
