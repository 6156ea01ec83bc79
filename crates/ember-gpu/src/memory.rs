//! GPU memory management.
//!
//! Buffers and images are allocated through `gpu-allocator`. Before an
//! allocation is made the resource's memory type mask is checked against the
//! requested property flags so an unsatisfiable request surfaces as
//! [`GpuError::NoSuitableMemoryType`] instead of an opaque allocator failure.

use crate::error::{GpuError, Result};
use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::sync::Arc;

/// What a buffer is used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    Storage,
    Staging,
}

/// Parameters for [`GpuAllocator::create_buffer`].
#[derive(Debug, Clone)]
pub struct BufferDesc {
    /// Size in bytes. Must be non-zero.
    pub size: u64,
    /// Number of logical elements stored in the buffer.
    pub element_count: u64,
    pub usage: vk::BufferUsageFlags,
    /// Required memory property flags.
    pub properties: vk::MemoryPropertyFlags,
    pub kind: BufferKind,
    /// Debug name passed to the allocator.
    pub name: String,
}

impl BufferDesc {
    /// A device-local buffer.
    pub fn device_local(
        name: impl Into<String>,
        kind: BufferKind,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Self {
        Self {
            size,
            element_count: 0,
            usage,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            kind,
            name: name.into(),
        }
    }

    /// A host-visible, host-coherent buffer.
    pub fn host_visible(
        name: impl Into<String>,
        kind: BufferKind,
        size: u64,
        usage: vk::BufferUsageFlags,
    ) -> Self {
        Self {
            size,
            element_count: 0,
            usage,
            properties: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            kind,
            name: name.into(),
        }
    }

    /// A host-visible staging buffer used as a transfer source.
    pub fn staging(name: impl Into<String>, size: u64) -> Self {
        Self::host_visible(
            name,
            BufferKind::Staging,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
        )
    }

    /// Set the logical element count.
    #[must_use]
    pub const fn with_element_count(mut self, element_count: u64) -> Self {
        self.element_count = element_count;
        self
    }
}

/// Parameters for [`GpuAllocator::create_image`].
#[derive(Debug, Clone)]
pub struct ImageDesc {
    pub width: u32,
    pub height: u32,
    pub format: vk::Format,
    pub usage: vk::ImageUsageFlags,
    pub aspect: vk::ImageAspectFlags,
    pub properties: vk::MemoryPropertyFlags,
    /// Create a linear sampler alongside the view.
    pub sampled: bool,
    pub name: String,
}

impl ImageDesc {
    /// A device-local 2D color image.
    pub fn color_2d(
        name: impl Into<String>,
        width: u32,
        height: u32,
        format: vk::Format,
        usage: vk::ImageUsageFlags,
    ) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            aspect: vk::ImageAspectFlags::COLOR,
            properties: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            sampled: usage.contains(vk::ImageUsageFlags::SAMPLED),
            name: name.into(),
        }
    }
}

/// Find a memory type allowed by `type_bits` that has all `required` flags.
pub fn find_memory_type_index(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    required: vk::MemoryPropertyFlags,
) -> Result<u32> {
    memory_properties
        .memory_types
        .iter()
        .take(memory_properties.memory_type_count as usize)
        .enumerate()
        .find(|(index, memory_type)| {
            type_bits & (1 << index) != 0 && memory_type.property_flags.contains(required)
        })
        .map(|(index, _)| index as u32)
        .ok_or(GpuError::NoSuitableMemoryType {
            type_bits,
            required,
        })
}

/// Map property flags to the allocator's memory location.
pub fn location_for_properties(properties: vk::MemoryPropertyFlags) -> MemoryLocation {
    if properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
        MemoryLocation::CpuToGpu
    } else {
        MemoryLocation::GpuOnly
    }
}

/// GPU memory allocator wrapper.
pub struct GpuAllocator {
    allocator: Option<Allocator>,
    device: Arc<ash::Device>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl GpuAllocator {
    /// Create a new allocator.
    ///
    /// # Safety
    /// The instance, device, and physical device must be valid.
    pub unsafe fn new(
        instance: &ash::Instance,
        device: Arc<ash::Device>,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let memory_properties =
            unsafe { instance.get_physical_device_memory_properties(physical_device) };

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.clone(),
            device: (*device).clone(),
            physical_device,
            debug_settings: gpu_allocator::AllocatorDebugSettings {
                log_memory_information: cfg!(debug_assertions),
                log_leaks_on_shutdown: true,
                store_stack_traces: false,
                log_allocations: false,
                log_frees: false,
                log_stack_traces: false,
            },
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })
        .map_err(|e| GpuError::AllocationFailed(e.to_string()))?;

        Ok(Self {
            allocator: Some(allocator),
            device,
            memory_properties,
        })
    }

    /// Memory properties of the physical device.
    pub const fn memory_properties(&self) -> &vk::PhysicalDeviceMemoryProperties {
        &self.memory_properties
    }

    fn inner(&mut self) -> Result<&mut Allocator> {
        self.allocator
            .as_mut()
            .ok_or_else(|| GpuError::InvalidState("Allocator not initialized".to_string()))
    }

    /// Create a buffer and bind memory to it.
    pub fn create_buffer(&mut self, desc: &BufferDesc) -> Result<GpuBuffer> {
        if desc.size == 0 {
            return Err(GpuError::InvalidConfiguration(format!(
                "Buffer '{}' has zero size",
                desc.name
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(desc.size)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = match self.allocate(
            &desc.name,
            requirements,
            desc.properties,
            desc.size,
            true,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        if let Err(e) = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        } {
            self.release(allocation);
            unsafe { self.device.destroy_buffer(buffer, None) };
            return Err(e.into());
        }

        Ok(GpuBuffer {
            buffer,
            allocation: Some(allocation),
            size: desc.size,
            element_count: desc.element_count,
            kind: desc.kind,
            name: desc.name.clone(),
            mapped: false,
        })
    }

    /// Destroy a buffer and free its memory.
    ///
    /// Destroying an already destroyed buffer is a no-op. Destroying a buffer
    /// whose host mapping is still active is an error and leaves it intact.
    pub fn free_buffer(&mut self, buffer: &mut GpuBuffer) -> Result<()> {
        let (handle, allocation) = match buffer.take_for_destroy() {
            Ok(Some(parts)) => parts,
            Ok(None) => return Ok(()),
            Err(e) => {
                tracing::error!("{e}");
                return Err(e);
            }
        };

        let device = Arc::clone(&self.device);
        destroy_then_free(
            || unsafe { device.destroy_buffer(handle, None) },
            allocation,
            |allocation| self.free_allocation(allocation),
        )
    }

    /// Create an image with a view and, when requested, a sampler.
    pub fn create_image(&mut self, desc: &ImageDesc) -> Result<GpuImage> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::InvalidConfiguration(format!(
                "Image '{}' has zero extent {}x{}",
                desc.name, desc.width, desc.height
            )));
        }

        let extent = vk::Extent3D {
            width: desc.width,
            height: desc.height,
            depth: 1,
        };
        let create_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(desc.format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(desc.usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { self.device.create_image(&create_info, None)? };
        let requirements = unsafe { self.device.get_image_memory_requirements(image) };

        let allocation = match self.allocate(
            &desc.name,
            requirements,
            desc.properties,
            requirements.size,
            false,
        ) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_image(image, None) };
                return Err(e);
            }
        };

        let mut gpu_image = GpuImage {
            image,
            allocation: Some(allocation),
            view: vk::ImageView::null(),
            sampler: None,
            format: desc.format,
            extent: vk::Extent2D {
                width: desc.width,
                height: desc.height,
            },
            aspect: desc.aspect,
            layout: vk::ImageLayout::UNDEFINED,
        };

        if let Err(e) = unsafe { self.finish_image(&mut gpu_image, desc.sampled) } {
            if let Err(free_err) = self.free_image(&mut gpu_image) {
                tracing::error!("Failed to release partially created image: {free_err}");
            }
            return Err(e);
        }

        Ok(gpu_image)
    }

    /// Bind memory, then create the view and optional sampler.
    unsafe fn finish_image(&self, image: &mut GpuImage, sampled: bool) -> Result<()> {
        let (memory, offset) = match image.allocation.as_ref() {
            Some(allocation) => (allocation.memory(), allocation.offset()),
            None => return Err(GpuError::InvalidState("Image has no allocation".into())),
        };

        unsafe {
            self.device.bind_image_memory(image.image, memory, offset)?;

            let view_info = vk::ImageViewCreateInfo::default()
                .image(image.image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(image.format)
                .subresource_range(subresource_range(image.aspect));
            image.view = self.device.create_image_view(&view_info, None)?;

            if sampled {
                let sampler_info = vk::SamplerCreateInfo::default()
                    .mag_filter(vk::Filter::LINEAR)
                    .min_filter(vk::Filter::LINEAR)
                    .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
                    .address_mode_u(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                    .address_mode_v(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                    .address_mode_w(vk::SamplerAddressMode::CLAMP_TO_EDGE)
                    .max_lod(0.0);
                image.sampler = Some(self.device.create_sampler(&sampler_info, None)?);
            }
        }

        Ok(())
    }

    /// Destroy an image with its view and sampler. Idempotent.
    pub fn free_image(&mut self, image: &mut GpuImage) -> Result<()> {
        if image.image == vk::Image::null() {
            return Ok(());
        }

        unsafe {
            if let Some(sampler) = image.sampler.take() {
                self.device.destroy_sampler(sampler, None);
            }
            if image.view != vk::ImageView::null() {
                self.device.destroy_image_view(image.view, None);
                image.view = vk::ImageView::null();
            }
        }

        let handle = std::mem::replace(&mut image.image, vk::Image::null());
        let device = Arc::clone(&self.device);
        destroy_then_free(
            || unsafe { device.destroy_image(handle, None) },
            image.allocation.take(),
            |allocation| self.free_allocation(allocation),
        )
    }

    fn free_allocation(&mut self, allocation: Allocation) -> Result<()> {
        self.inner()?
            .free(allocation)
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    fn allocate(
        &mut self,
        name: &str,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
        requested_size: u64,
        linear: bool,
    ) -> Result<Allocation> {
        if let Err(e) =
            find_memory_type_index(&self.memory_properties, requirements.memory_type_bits, properties)
        {
            tracing::warn!("'{name}': {e} for {requested_size} bytes");
            return Err(e);
        }

        self.inner()?
            .allocate(&AllocationCreateDesc {
                name,
                requirements,
                location: location_for_properties(properties),
                linear,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
            .map_err(|e| GpuError::AllocationFailed(e.to_string()))
    }

    fn release(&mut self, allocation: Allocation) {
        if let Ok(allocator) = self.inner() {
            if let Err(e) = allocator.free(allocation) {
                tracing::error!("Failed to free allocation: {e}");
            }
        }
    }

    /// Shutdown the allocator, freeing all GPU memory.
    ///
    /// This must be called before the Vulkan device is destroyed.
    /// Any remaining allocations will be freed (and logged as leaks).
    pub fn shutdown(&mut self) {
        // Dropping the inner allocator calls vkFreeMemory on every block
        drop(self.allocator.take());
    }
}

impl Drop for GpuAllocator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Destroy a resource handle, then hand its memory back.
///
/// The handle always goes first, so a failed free never leaves a live
/// Vulkan object bound to released memory.
fn destroy_then_free<A>(
    destroy: impl FnOnce(),
    allocation: Option<A>,
    free: impl FnOnce(A) -> Result<()>,
) -> Result<()> {
    destroy();
    allocation.map_or(Ok(()), free)
}

/// Bounds-checked view of a buffer's host-visible memory.
pub struct HostMapping<'a> {
    bytes: &'a mut [u8],
}

impl<'a> HostMapping<'a> {
    /// Wrap already mapped memory.
    pub fn from_slice(bytes: &'a mut [u8]) -> Self {
        Self { bytes }
    }

    /// Mapped length in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Copy `data` into the mapping at `offset`.
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        let range = self.range(offset, data.len())?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Copy bytes out of the mapping at `offset`.
    pub fn read_bytes(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let range = self.range(offset, out.len())?;
        out.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    /// Write a slice of plain-old-data values at the start of the mapping.
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    fn range(&self, offset: u64, len: usize) -> Result<std::ops::Range<usize>> {
        let start = usize::try_from(offset)
            .map_err(|_| GpuError::InvalidConfiguration("Offset overflow".to_string()))?;
        let end = start
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| {
                GpuError::InvalidConfiguration(format!(
                    "Range {start}..{} exceeds mapped size {}",
                    start.saturating_add(len),
                    self.bytes.len()
                ))
            })?;
        Ok(start..end)
    }
}

/// A GPU buffer with its allocation.
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub allocation: Option<Allocation>,
    pub size: u64,
    pub element_count: u64,
    pub kind: BufferKind,
    pub name: String,
    mapped: bool,
}

impl GpuBuffer {
    /// Whether the buffer has already been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.buffer == vk::Buffer::null()
    }

    /// Whether a host mapping is currently marked active.
    pub const fn is_mapped(&self) -> bool {
        self.mapped
    }

    /// Whether the memory is accessible from the CPU.
    pub fn is_host_visible(&self) -> bool {
        self.mapped_ptr().is_some()
    }

    fn mapped_ptr(&self) -> Option<*mut u8> {
        self.allocation
            .as_ref()
            .and_then(Allocation::mapped_ptr)
            .map(|p| p.as_ptr().cast::<u8>())
    }

    fn host_region(&self) -> Result<(*mut u8, usize)> {
        let ptr = self.mapped_ptr().ok_or_else(|| {
            GpuError::InvalidConfiguration(format!("Buffer '{}' is not host-visible", self.name))
        })?;
        let len = usize::try_from(self.size)
            .map_err(|_| GpuError::InvalidConfiguration("Buffer too large to map".into()))?;
        Ok((ptr, len))
    }

    fn host_slice(&mut self) -> Result<&mut [u8]> {
        let (ptr, len) = self.host_region()?;
        // gpu-allocator keeps host-visible blocks persistently mapped for the allocation's lifetime
        Ok(unsafe { std::slice::from_raw_parts_mut(ptr, len) })
    }

    /// Map the buffer memory for CPU access and mark the mapping active.
    pub fn map(&mut self) -> Result<HostMapping<'_>> {
        self.host_region()?;
        self.mapped = true;
        Ok(HostMapping::from_slice(self.host_slice()?))
    }

    /// Mark the host mapping inactive.
    pub fn unmap(&mut self) {
        self.mapped = false;
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        HostMapping::from_slice(self.host_slice()?).write_bytes(offset, data)
    }

    /// Read raw bytes at the given offset (must be host-visible).
    pub fn read_bytes(&mut self, offset: u64, out: &mut [u8]) -> Result<()> {
        HostMapping::from_slice(self.host_slice()?).read_bytes(offset, out)
    }

    /// Write plain-old-data values at the start of the buffer (must be host-visible).
    pub fn write<T: bytemuck::Pod>(&mut self, data: &[T]) -> Result<()> {
        self.write_bytes(0, bytemuck::cast_slice(data))
    }

    /// Detach the handle and allocation for destruction.
    ///
    /// Returns `None` when the buffer was already destroyed.
    pub fn take_for_destroy(&mut self) -> Result<Option<(vk::Buffer, Option<Allocation>)>> {
        if self.is_destroyed() {
            return Ok(None);
        }
        if self.mapped {
            return Err(GpuError::BufferStillMapped(self.name.clone()));
        }

        let handle = std::mem::replace(&mut self.buffer, vk::Buffer::null());
        Ok(Some((handle, self.allocation.take())))
    }
}

/// A GPU image with its allocation, view and optional sampler.
pub struct GpuImage {
    pub image: vk::Image,
    pub allocation: Option<Allocation>,
    pub view: vk::ImageView,
    pub sampler: Option<vk::Sampler>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub aspect: vk::ImageAspectFlags,
    /// Layout the image is known to be in.
    pub layout: vk::ImageLayout,
}

impl GpuImage {
    /// Whether the image has already been destroyed.
    pub fn is_destroyed(&self) -> bool {
        self.image == vk::Image::null()
    }

    /// Size in bytes of tightly packed texel data covering the whole image.
    pub fn packed_size(&self) -> Option<u64> {
        bytes_per_texel(self.format).map(|bpt| {
            u64::from(self.extent.width) * u64::from(self.extent.height) * u64::from(bpt)
        })
    }
}

/// Subresource range covering the single mip level and layer of an image.
pub fn subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Bytes per texel for the formats uploads support.
pub const fn bytes_per_texel(format: vk::Format) -> Option<u32> {
    match format {
        vk::Format::R8_UNORM => Some(1),
        vk::Format::R8G8_UNORM => Some(2),
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT => Some(4),
        vk::Format::R32G32B32A32_SFLOAT => Some(16),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn memory_properties(flags: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: flags.len() as u32,
            ..Default::default()
        };
        for (slot, &property_flags) in props.memory_types.iter_mut().zip(flags) {
            slot.property_flags = property_flags;
        }
        props
    }

    fn unallocated_buffer(name: &str) -> GpuBuffer {
        GpuBuffer {
            buffer: vk::Buffer::from_raw(1),
            allocation: None,
            size: 64,
            element_count: 16,
            kind: BufferKind::Storage,
            name: name.to_string(),
            mapped: false,
        }
    }

    #[test]
    fn memory_type_respects_mask_and_flags() {
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL, host, host]);

        assert_eq!(
            find_memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
        // Type 1 is masked out
        assert_eq!(
            find_memory_type_index(&props, 0b101, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            2
        );
        assert_eq!(
            find_memory_type_index(&props, 0b111, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            0
        );
    }

    #[test]
    fn memory_type_reports_exhaustion() {
        let props = memory_properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let err = find_memory_type_index(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE)
            .unwrap_err();
        assert!(matches!(
            err,
            GpuError::NoSuitableMemoryType { type_bits: 0b1, .. }
        ));

        // Bits beyond memory_type_count are ignored
        assert!(find_memory_type_index(&props, 0b10, vk::MemoryPropertyFlags::empty()).is_err());
    }

    #[test]
    fn location_follows_host_visibility() {
        assert_eq!(
            location_for_properties(
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
            ),
            MemoryLocation::CpuToGpu
        );
        assert_eq!(
            location_for_properties(vk::MemoryPropertyFlags::DEVICE_LOCAL),
            MemoryLocation::GpuOnly
        );
    }

    #[test]
    fn destroy_is_idempotent() {
        let mut buffer = unallocated_buffer("points");

        let first = buffer.take_for_destroy().unwrap();
        assert!(first.is_some());
        assert!(buffer.is_destroyed());

        assert!(buffer.take_for_destroy().unwrap().is_none());
    }

    #[test]
    fn handle_is_destroyed_even_when_free_fails() {
        let order = std::cell::RefCell::new(Vec::new());

        let result = destroy_then_free(
            || order.borrow_mut().push("destroy"),
            Some(7u32),
            |allocation| {
                order.borrow_mut().push("free");
                assert_eq!(allocation, 7);
                Err(GpuError::AllocationFailed("allocator gone".to_string()))
            },
        );

        assert!(matches!(result, Err(GpuError::AllocationFailed(_))));
        assert_eq!(order.into_inner(), ["destroy", "free"]);
    }

    #[test]
    fn handle_without_allocation_is_destroyed() {
        let mut destroyed = false;
        destroy_then_free(|| destroyed = true, None::<u32>, |_| unreachable!()).unwrap();
        assert!(destroyed);
    }

    #[test]
    fn destroying_mapped_buffer_is_rejected() {
        let mut buffer = unallocated_buffer("uniforms");
        buffer.mapped = true;

        let err = buffer.take_for_destroy().unwrap_err();
        assert!(matches!(err, GpuError::BufferStillMapped(ref name) if name == "uniforms"));
        assert!(err.is_fatal());
        assert!(!buffer.is_destroyed());

        buffer.unmap();
        assert!(buffer.take_for_destroy().unwrap().is_some());
    }

    #[test]
    fn unallocated_buffer_is_not_host_visible() {
        let mut buffer = unallocated_buffer("device-only");
        assert!(!buffer.is_host_visible());
        assert!(matches!(
            buffer.write_bytes(0, &[1, 2, 3]),
            Err(GpuError::InvalidConfiguration(_))
        ));
        assert!(buffer.map().is_err());
        assert!(!buffer.is_mapped());
    }

    #[test]
    fn host_mirror_round_trip() {
        let source: Vec<u8> = (0..=255).collect();
        let mut mirror = vec![0u8; 256];

        let mut mapping = HostMapping::from_slice(&mut mirror);
        mapping.write_bytes(0, &source).unwrap();

        let mut readback = vec![0u8; 256];
        mapping.read_bytes(0, &mut readback).unwrap();
        assert_eq!(readback, source);
    }

    #[test]
    fn host_mapping_bounds() {
        let mut backing = vec![0u8; 8];
        let mut mapping = HostMapping::from_slice(&mut backing);

        mapping.write_bytes(4, &[9, 9, 9, 9]).unwrap();
        assert!(mapping.write_bytes(5, &[0; 4]).is_err());
        assert!(mapping.write_bytes(u64::MAX, &[0]).is_err());

        mapping.write(&[0x0403_0201u32]).unwrap();
        assert_eq!(backing, [1, 2, 3, 4, 9, 9, 9, 9]);
    }

    #[test]
    fn packed_image_size() {
        let image = GpuImage {
            image: vk::Image::null(),
            allocation: None,
            view: vk::ImageView::null(),
            sampler: None,
            format: vk::Format::R8G8B8A8_SRGB,
            extent: vk::Extent2D {
                width: 4,
                height: 3,
            },
            aspect: vk::ImageAspectFlags::COLOR,
            layout: vk::ImageLayout::UNDEFINED,
        };
        assert_eq!(image.packed_size(), Some(48));
        assert!(image.is_destroyed());
        assert_eq!(bytes_per_texel(vk::Format::D32_SFLOAT), None);
    }
}
