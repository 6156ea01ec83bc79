//! Descriptor set management.
//!
//! All descriptor sets come from one fixed-capacity pool. The arena keeps
//! running per-kind tallies so that when the pool runs dry the log shows
//! exactly what was asked for against what was reserved. The pool never
//! grows and individual sets are never freed; [`DescriptorArena::reset`]
//! releases everything at once.

use crate::error::{GpuError, Result};
use ash::vk;
use std::collections::BTreeMap;
use std::fmt;

/// Descriptor counts keyed by descriptor type.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorCounts(BTreeMap<i32, u32>);

impl DescriptorCounts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `count` descriptors of `kind`.
    pub fn add(&mut self, kind: vk::DescriptorType, count: u32) {
        *self.0.entry(kind.as_raw()).or_insert(0) += count;
    }

    /// Builder-style [`Self::add`].
    #[must_use]
    pub fn with(mut self, kind: vk::DescriptorType, count: u32) -> Self {
        self.add(kind, count);
        self
    }

    pub fn get(&self, kind: vk::DescriptorType) -> u32 {
        self.0.get(&kind.as_raw()).copied().unwrap_or(0)
    }

    /// Add every count in `other`.
    pub fn accumulate(&mut self, other: &Self) {
        for (kind, count) in other.iter() {
            self.add(kind, count);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (vk::DescriptorType, u32)> + '_ {
        self.0
            .iter()
            .map(|(&raw, &count)| (vk::DescriptorType::from_raw(raw), count))
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// Pool sizes for creating a descriptor pool.
    pub fn pool_sizes(&self) -> Vec<vk::DescriptorPoolSize> {
        self.iter()
            .filter(|&(_, count)| count > 0)
            .map(|(ty, descriptor_count)| vk::DescriptorPoolSize {
                ty,
                descriptor_count,
            })
            .collect()
    }
}

/// Fixed capacity of a descriptor pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorCapacity {
    pub max_sets: u32,
    pub per_kind: DescriptorCounts,
}

impl DescriptorCapacity {
    pub fn new(max_sets: u32) -> Self {
        Self {
            max_sets,
            per_kind: DescriptorCounts::new(),
        }
    }

    /// Reserve `count` descriptors of `kind`.
    #[must_use]
    pub fn with(mut self, kind: vk::DescriptorType, count: u32) -> Self {
        self.per_kind.add(kind, count);
        self
    }
}

/// Running allocation tallies of an arena.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptorUsage {
    pub sets: u32,
    pub per_kind: DescriptorCounts,
}

impl DescriptorUsage {
    /// Render the usage against a capacity as a multi-line table.
    pub fn table(&self, capacity: &DescriptorCapacity) -> String {
        let mut kinds = capacity.per_kind.clone();
        for (kind, _) in self.per_kind.iter() {
            kinds.add(kind, 0);
        }

        let mut table = format!(
            "{:<28} {:>8} {:>8}\n{:<28} {:>8} {:>8}",
            "kind", "used", "capacity", "sets", self.sets, capacity.max_sets
        );
        for (kind, _) in kinds.iter() {
            table.push_str(&format!(
                "\n{:<28} {:>8} {:>8}",
                format!("{kind:?}"),
                self.per_kind.get(kind),
                capacity.per_kind.get(kind)
            ));
        }
        table
    }
}

impl fmt::Display for DescriptorUsage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} sets", self.sets)?;
        for (kind, count) in self.per_kind.iter() {
            write!(f, ", {count} {kind:?}")?;
        }
        Ok(())
    }
}

/// A descriptor set layout with the descriptor counts one set consumes.
#[derive(Debug, Clone)]
pub struct DescriptorLayout {
    pub layout: vk::DescriptorSetLayout,
    pub counts: DescriptorCounts,
}

impl DescriptorLayout {
    /// Destroy the layout.
    ///
    /// # Safety
    /// The device must be valid and the layout must not be in use.
    pub unsafe fn destroy(&self, device: &ash::Device) {
        unsafe { device.destroy_descriptor_set_layout(self.layout, None) };
    }
}

/// Descriptor set layout builder.
pub struct DescriptorSetLayoutBuilder<'a> {
    bindings: Vec<vk::DescriptorSetLayoutBinding<'a>>,
    counts: DescriptorCounts,
}

impl<'a> DescriptorSetLayoutBuilder<'a> {
    /// Create a new builder.
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            counts: DescriptorCounts::new(),
        }
    }

    /// Add a binding.
    #[must_use]
    pub fn binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        count: u32,
        stage_flags: vk::ShaderStageFlags,
    ) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(descriptor_type)
                .descriptor_count(count)
                .stage_flags(stage_flags),
        );
        self.counts.add(descriptor_type, count);
        self
    }

    #[must_use]
    pub fn uniform_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::UNIFORM_BUFFER, 1, stage_flags)
    }

    #[must_use]
    pub fn storage_buffer(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_BUFFER, 1, stage_flags)
    }

    #[must_use]
    pub fn storage_image(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(binding, vk::DescriptorType::STORAGE_IMAGE, 1, stage_flags)
    }

    #[must_use]
    pub fn combined_image_sampler(self, binding: u32, stage_flags: vk::ShaderStageFlags) -> Self {
        self.binding(
            binding,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            1,
            stage_flags,
        )
    }

    /// Counts one set of this layout consumes.
    pub const fn counts(&self) -> &DescriptorCounts {
        &self.counts
    }

    /// Build the descriptor set layout.
    ///
    /// # Safety
    /// The device must be valid.
    pub unsafe fn build(self, device: &ash::Device) -> Result<DescriptorLayout> {
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&self.bindings);

        let layout = unsafe { device.create_descriptor_set_layout(&layout_info, None)? };
        Ok(DescriptorLayout {
            layout,
            counts: self.counts,
        })
    }
}

impl Default for DescriptorSetLayoutBuilder<'_> {
    fn default() -> Self {
        Self::new()
    }
}

/// Where descriptor sets actually come from.
pub trait DescriptorSetSource {
    /// Allocate one set with the given layout.
    fn allocate(
        &mut self,
        layout: &DescriptorLayout,
    ) -> std::result::Result<vk::DescriptorSet, vk::Result>;

    /// Release every set at once.
    fn reset(&mut self) -> std::result::Result<(), vk::Result>;

    /// Destroy the backing pool. Must be safe to call more than once.
    fn destroy(&mut self);
}

/// Descriptor pool backed by the Vulkan device.
pub struct VulkanDescriptorPool {
    device: ash::Device,
    pool: vk::DescriptorPool,
}

impl VulkanDescriptorPool {
    /// Create a pool with exactly the given capacity.
    ///
    /// # Safety
    /// The device must be valid and outlive the pool.
    pub unsafe fn new(device: &ash::Device, capacity: &DescriptorCapacity) -> Result<Self> {
        if capacity.max_sets == 0 {
            return Err(GpuError::InvalidConfiguration(
                "Descriptor pool needs at least one set".to_string(),
            ));
        }
        let pool_sizes = capacity.per_kind.pool_sizes();

        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(capacity.max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { device.create_descriptor_pool(&create_info, None)? };
        Ok(Self {
            device: device.clone(),
            pool,
        })
    }

    /// Get the raw pool handle.
    pub const fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }
}

impl DescriptorSetSource for VulkanDescriptorPool {
    fn allocate(
        &mut self,
        layout: &DescriptorLayout,
    ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
        let layouts = [layout.layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        sets.into_iter()
            .next()
            .ok_or(vk::Result::ERROR_OUT_OF_POOL_MEMORY)
    }

    fn reset(&mut self) -> std::result::Result<(), vk::Result> {
        unsafe {
            self.device
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())
        }
    }

    fn destroy(&mut self) {
        if self.pool != vk::DescriptorPool::null() {
            unsafe { self.device.destroy_descriptor_pool(self.pool, None) };
            self.pool = vk::DescriptorPool::null();
        }
    }
}

impl Drop for VulkanDescriptorPool {
    fn drop(&mut self) {
        DescriptorSetSource::destroy(self);
    }
}

/// Fixed-capacity descriptor set arena with usage accounting.
///
/// The pool is destroyed on drop if [`DescriptorArena::destroy`] was not
/// called first, so the device must outlive the arena.
pub struct DescriptorArena<S: DescriptorSetSource = VulkanDescriptorPool> {
    source: S,
    capacity: DescriptorCapacity,
    usage: DescriptorUsage,
}

impl DescriptorArena<VulkanDescriptorPool> {
    /// Create an arena over a new Vulkan descriptor pool.
    ///
    /// # Safety
    /// The device must be valid and outlive the arena.
    pub unsafe fn new(device: &ash::Device, capacity: DescriptorCapacity) -> Result<Self> {
        let pool = unsafe { VulkanDescriptorPool::new(device, &capacity)? };
        Ok(Self::with_source(pool, capacity))
    }
}

impl<S: DescriptorSetSource> DescriptorArena<S> {
    /// Create an arena over any descriptor set source.
    pub fn with_source(source: S, capacity: DescriptorCapacity) -> Self {
        Self {
            source,
            capacity,
            usage: DescriptorUsage::default(),
        }
    }

    /// Allocate one descriptor set.
    ///
    /// The tallies include this request even when it fails, so the reported
    /// usage shows the demand that overflowed the pool.
    pub fn alloc_set(&mut self, layout: &DescriptorLayout) -> Result<vk::DescriptorSet> {
        self.usage.sets += 1;
        self.usage.per_kind.accumulate(&layout.counts);

        match self.source.allocate(layout) {
            Ok(set) => Ok(set),
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                tracing::error!(
                    "Descriptor pool exhausted:\n{}",
                    self.usage.table(&self.capacity)
                );
                Err(GpuError::DescriptorPoolExhausted {
                    usage: self.usage.clone(),
                })
            }
            Err(e) => Err(GpuError::Vulkan(e)),
        }
    }

    /// Release every set and zero the tallies.
    pub fn reset(&mut self) -> Result<()> {
        self.source.reset()?;
        self.usage = DescriptorUsage::default();
        Ok(())
    }

    /// Destroy the pool.
    pub fn destroy(&mut self) {
        self.source.destroy();
        self.usage = DescriptorUsage::default();
    }

    pub const fn usage(&self) -> &DescriptorUsage {
        &self.usage
    }

    pub const fn capacity(&self) -> &DescriptorCapacity {
        &self.capacity
    }
}

impl<S: DescriptorSetSource> Drop for DescriptorArena<S> {
    fn drop(&mut self) {
        self.source.destroy();
    }
}

/// Write a uniform buffer descriptor.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_uniform_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: u64,
) {
    unsafe {
        write_buffer(
            device,
            dst_set,
            binding,
            vk::DescriptorType::UNIFORM_BUFFER,
            buffer,
            range,
        );
    }
}

/// Write a storage buffer descriptor.
///
/// # Safety
/// Device and buffer must be valid.
pub unsafe fn write_storage_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    buffer: vk::Buffer,
    range: u64,
) {
    unsafe {
        write_buffer(
            device,
            dst_set,
            binding,
            vk::DescriptorType::STORAGE_BUFFER,
            buffer,
            range,
        );
    }
}

unsafe fn write_buffer(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    descriptor_type: vk::DescriptorType,
    buffer: vk::Buffer,
    range: u64,
) {
    let buffer_info = vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(0)
        .range(range);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(descriptor_type)
        .buffer_info(std::slice::from_ref(&buffer_info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

/// Write a storage image descriptor.
///
/// # Safety
/// Device and image view must be valid.
pub unsafe fn write_storage_image(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    image_view: vk::ImageView,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .image_layout(vk::ImageLayout::GENERAL);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
        .image_info(std::slice::from_ref(&image_info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

/// Write a combined image sampler descriptor for a shader-read-only image.
///
/// # Safety
/// Device, image view and sampler must be valid.
pub unsafe fn write_combined_image_sampler(
    device: &ash::Device,
    dst_set: vk::DescriptorSet,
    binding: u32,
    image_view: vk::ImageView,
    sampler: vk::Sampler,
) {
    let image_info = vk::DescriptorImageInfo::default()
        .image_view(image_view)
        .sampler(sampler)
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

    let write = vk::WriteDescriptorSet::default()
        .dst_set(dst_set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(std::slice::from_ref(&image_info));

    unsafe { device.update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;
    use parking_lot::Mutex;
    use std::cell::Cell;
    use std::io;
    use std::rc::Rc;
    use std::sync::Arc;

    /// In-memory pool enforcing the same limits a Vulkan pool would.
    struct CountingPool {
        capacity: DescriptorCapacity,
        sets: u32,
        used: DescriptorCounts,
        resets: u32,
        destroys: Rc<Cell<u32>>,
    }

    impl CountingPool {
        fn new(capacity: &DescriptorCapacity) -> Self {
            Self {
                capacity: capacity.clone(),
                sets: 0,
                used: DescriptorCounts::new(),
                resets: 0,
                destroys: Rc::new(Cell::new(0)),
            }
        }
    }

    impl DescriptorSetSource for CountingPool {
        fn allocate(
            &mut self,
            layout: &DescriptorLayout,
        ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
            if self.sets >= self.capacity.max_sets {
                return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
            }
            for (kind, count) in layout.counts.iter() {
                if self.used.get(kind) + count > self.capacity.per_kind.get(kind) {
                    return Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY);
                }
            }
            self.used.accumulate(&layout.counts);
            self.sets += 1;
            Ok(vk::DescriptorSet::from_raw(u64::from(self.sets)))
        }

        fn reset(&mut self) -> std::result::Result<(), vk::Result> {
            self.sets = 0;
            self.used.clear();
            self.resets += 1;
            Ok(())
        }

        fn destroy(&mut self) {
            self.destroys.set(self.destroys.get() + 1);
        }
    }

    /// Log output collected from a scoped `tracing` subscriber.
    #[derive(Clone, Default)]
    struct CapturedLog(Arc<Mutex<Vec<u8>>>);

    impl CapturedLog {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    impl io::Write for CapturedLog {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    /// Columns of the usage-table row whose first column is `name`.
    fn table_row(log: &str, name: &str) -> Vec<String> {
        log.lines()
            .map(|line| line.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .find(|columns| columns.first().is_some_and(|first| first == name))
            .unwrap_or_else(|| panic!("no {name} row in:\n{log}"))
    }

    fn material_layout() -> DescriptorLayout {
        DescriptorLayout {
            layout: vk::DescriptorSetLayout::null(),
            counts: DescriptorCounts::new()
                .with(vk::DescriptorType::UNIFORM_BUFFER, 1)
                .with(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2),
        }
    }

    fn small_capacity() -> DescriptorCapacity {
        DescriptorCapacity::new(3)
            .with(vk::DescriptorType::UNIFORM_BUFFER, 3)
            .with(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 6)
    }

    #[test]
    fn fourth_set_exhausts_pool() {
        let capacity = small_capacity();
        let mut arena = DescriptorArena::with_source(CountingPool::new(&capacity), capacity);
        let layout = material_layout();

        for _ in 0..3 {
            arena.alloc_set(&layout).unwrap();
        }

        let err = arena.alloc_set(&layout).unwrap_err();
        let GpuError::DescriptorPoolExhausted { usage } = &err else {
            panic!("unexpected error: {err}");
        };
        assert_eq!(usage.sets, 4);
        assert_eq!(usage.per_kind.get(vk::DescriptorType::UNIFORM_BUFFER), 4);
        assert_eq!(
            usage.per_kind.get(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
            8
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn exhaustion_logs_usage_table() {
        let log = CapturedLog::default();
        let writer = log.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .without_time()
            .finish();

        let capacity = small_capacity();
        let mut arena = DescriptorArena::with_source(CountingPool::new(&capacity), capacity);
        let layout = material_layout();

        tracing::subscriber::with_default(subscriber, || {
            for _ in 0..3 {
                arena.alloc_set(&layout).unwrap();
            }
            assert!(arena.alloc_set(&layout).is_err());
        });

        let text = log.text();
        assert!(text.contains("ERROR"));
        assert!(text.contains("Descriptor pool exhausted"));
        // name, used, capacity
        assert_eq!(table_row(&text, "sets"), ["sets", "4", "3"]);
        assert_eq!(table_row(&text, "UNIFORM_BUFFER"), ["UNIFORM_BUFFER", "4", "3"]);
        assert_eq!(
            table_row(&text, "COMBINED_IMAGE_SAMPLER"),
            ["COMBINED_IMAGE_SAMPLER", "8", "6"]
        );
    }

    #[test]
    fn dropping_arena_destroys_pool() {
        let capacity = small_capacity();
        let pool = CountingPool::new(&capacity);
        let destroys = Rc::clone(&pool.destroys);

        let arena = DescriptorArena::with_source(pool, capacity);
        drop(arena);
        assert_eq!(destroys.get(), 1);

        // An explicit destroy followed by drop reaches the source twice; the
        // source treats the second call as a no-op
        let pool = CountingPool::new(&small_capacity());
        let destroys = Rc::clone(&pool.destroys);
        let mut arena = DescriptorArena::with_source(pool, small_capacity());
        arena.destroy();
        drop(arena);
        assert_eq!(destroys.get(), 2);
    }

    #[test]
    fn reset_zeroes_tallies() {
        let capacity = small_capacity();
        let mut arena = DescriptorArena::with_source(CountingPool::new(&capacity), capacity);
        let layout = material_layout();

        for _ in 0..3 {
            arena.alloc_set(&layout).unwrap();
        }
        arena.reset().unwrap();
        assert_eq!(arena.usage(), &DescriptorUsage::default());
        assert_eq!(arena.source.resets, 1);

        // Full capacity is available again
        for _ in 0..3 {
            arena.alloc_set(&layout).unwrap();
        }
        assert_eq!(arena.usage().sets, 3);
    }

    #[test]
    fn other_failures_are_not_exhaustion() {
        struct Lost;
        impl DescriptorSetSource for Lost {
            fn allocate(
                &mut self,
                _: &DescriptorLayout,
            ) -> std::result::Result<vk::DescriptorSet, vk::Result> {
                Err(vk::Result::ERROR_DEVICE_LOST)
            }
            fn reset(&mut self) -> std::result::Result<(), vk::Result> {
                Ok(())
            }
            fn destroy(&mut self) {}
        }

        let mut arena = DescriptorArena::with_source(Lost, small_capacity());
        let err = arena.alloc_set(&material_layout()).unwrap_err();
        assert!(matches!(err, GpuError::Vulkan(vk::Result::ERROR_DEVICE_LOST)));
        assert!(err.is_fatal());
    }

    #[test]
    fn usage_table_lists_every_kind() {
        let capacity = small_capacity();
        let usage = DescriptorUsage {
            sets: 4,
            per_kind: DescriptorCounts::new()
                .with(vk::DescriptorType::UNIFORM_BUFFER, 4)
                .with(vk::DescriptorType::STORAGE_IMAGE, 1),
        };

        let table = usage.table(&capacity);
        assert!(table.contains("UNIFORM_BUFFER"));
        assert!(table.contains("COMBINED_IMAGE_SAMPLER"));
        assert!(table.contains("STORAGE_IMAGE"));
        assert_eq!(table.lines().count(), 5);

        assert!(usage.to_string().starts_with("4 sets"));
    }

    #[test]
    fn pool_sizes_skip_empty_kinds() {
        let counts = DescriptorCounts::new()
            .with(vk::DescriptorType::STORAGE_BUFFER, 2)
            .with(vk::DescriptorType::UNIFORM_BUFFER, 0);
        let sizes = counts.pool_sizes();
        assert_eq!(sizes.len(), 1);
        assert_eq!(sizes[0].ty, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 2);
    }
}
