//! Descriptor set layouts, writes, and the growable pool allocator

use ash::vk;

use crate::render::api::{DescriptorWrite, GpuDevice, VulkanError, VulkanResult};

/// Hard cap on the number of sets a single pool is sized for
pub const MAX_SETS_PER_POOL: u32 = 4092;

/// Builds a descriptor set layout one binding at a time
#[derive(Debug, Default)]
pub struct DescriptorLayoutBuilder {
    bindings: Vec<vk::DescriptorSetLayoutBinding>,
}

impl DescriptorLayoutBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a single-descriptor binding; stages are applied at build time
    pub fn add_binding(mut self, binding: u32, ty: vk::DescriptorType) -> Self {
        self.bindings.push(
            vk::DescriptorSetLayoutBinding::builder()
                .binding(binding)
                .descriptor_type(ty)
                .descriptor_count(1)
                .build(),
        );
        self
    }

    /// Drop every binding added so far
    pub fn clear(&mut self) {
        self.bindings.clear();
    }

    /// Create the layout with every binding visible to `stages`
    pub fn build<D: GpuDevice>(
        &self,
        device: &mut D,
        stages: vk::ShaderStageFlags,
    ) -> VulkanResult<vk::DescriptorSetLayout> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = self
            .bindings
            .iter()
            .map(|binding| {
                let mut binding = *binding;
                binding.stage_flags |= stages;
                binding
            })
            .collect();

        device.create_descriptor_set_layout(&bindings)
    }
}

/// Accumulates descriptor writes and applies them to a set in one call
#[derive(Debug, Default)]
pub struct DescriptorWriter {
    writes: Vec<DescriptorWrite>,
}

impl DescriptorWriter {
    /// Create an empty writer
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue an image binding
    pub fn write_image(
        &mut self,
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
        layout: vk::ImageLayout,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(DescriptorWrite::Image { binding, ty, view, sampler, layout });
        self
    }

    /// Queue a buffer binding
    pub fn write_buffer(
        &mut self,
        binding: u32,
        buffer: vk::Buffer,
        size: vk::DeviceSize,
        offset: vk::DeviceSize,
        ty: vk::DescriptorType,
    ) -> &mut Self {
        self.writes.push(DescriptorWrite::Buffer { binding, ty, buffer, offset, range: size });
        self
    }

    /// Forget queued writes
    pub fn clear(&mut self) {
        self.writes.clear();
    }

    /// Apply every queued write to `set`
    pub fn update_set<D: GpuDevice>(&self, device: &mut D, set: vk::DescriptorSet) {
        device.update_descriptor_set(set, &self.writes);
    }
}

/// Share of a pool reserved for one descriptor type, per set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolSizeRatio {
    /// Descriptor type
    pub ty: vk::DescriptorType,
    /// Descriptors of this type per set
    pub ratio: f32,
}

impl PoolSizeRatio {
    /// Create a ratio entry
    pub const fn new(ty: vk::DescriptorType, ratio: f32) -> Self {
        Self { ty, ratio }
    }
}

/// Next pool target: at least 1.5x the current one, capped
fn grow_target(sets: u32) -> u32 {
    sets.saturating_add(sets / 2 + sets % 2).min(MAX_SETS_PER_POOL)
}

fn create_pool<D: GpuDevice>(
    device: &mut D,
    set_count: u32,
    ratios: &[PoolSizeRatio],
) -> VulkanResult<vk::DescriptorPool> {
    let sizes: Vec<vk::DescriptorPoolSize> = ratios
        .iter()
        .map(|ratio| vk::DescriptorPoolSize {
            ty: ratio.ty,
            descriptor_count: ((ratio.ratio * set_count as f32) as u32).max(1),
        })
        .collect();

    log::debug!("Creating descriptor pool for {} sets", set_count);
    device.create_descriptor_pool(set_count, &sizes)
}

/// Descriptor allocator that adds pools as existing ones fill up
///
/// Pools that report exhaustion move to the full list and come back on
/// [`clear`](Self::clear). Each new pool is sized larger than the last, up to
/// [`MAX_SETS_PER_POOL`].
#[derive(Debug)]
pub struct DescriptorAllocatorGrowable {
    ratios: Vec<PoolSizeRatio>,
    ready_pools: Vec<vk::DescriptorPool>,
    full_pools: Vec<vk::DescriptorPool>,
    sets_per_pool: u32,
}

impl DescriptorAllocatorGrowable {
    /// Create the allocator with one pool sized for `initial_sets`
    pub fn new<D: GpuDevice>(
        device: &mut D,
        initial_sets: u32,
        ratios: &[PoolSizeRatio],
    ) -> VulkanResult<Self> {
        let pool = create_pool(device, initial_sets, ratios)?;

        Ok(Self {
            ratios: ratios.to_vec(),
            ready_pools: vec![pool],
            full_pools: Vec::new(),
            sets_per_pool: grow_target(initial_sets),
        })
    }

    fn get_pool<D: GpuDevice>(&mut self, device: &mut D) -> VulkanResult<vk::DescriptorPool> {
        if let Some(pool) = self.ready_pools.pop() {
            return Ok(pool);
        }

        let pool = create_pool(device, self.sets_per_pool, &self.ratios)?;
        self.sets_per_pool = grow_target(self.sets_per_pool);
        Ok(pool)
    }

    /// Allocate one set with `layout`.
    ///
    /// A full pool is retired and the allocation retried once on a fresh
    /// pool; failing again means the pools are misconfigured and yields
    /// [`VulkanError::DescriptorPoolExhausted`].
    pub fn allocate<D: GpuDevice>(
        &mut self,
        device: &mut D,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let pool = self.get_pool(device)?;

        match device.allocate_descriptor_set(pool, layout) {
            Ok(set) => {
                self.ready_pools.push(pool);
                Ok(set)
            }
            Err(err) if err.is_pool_full() => {
                log::debug!("Descriptor pool full, retrying on a fresh pool");
                self.full_pools.push(pool);
                self.allocate_retry(device, layout)
            }
            Err(err) => {
                self.ready_pools.push(pool);
                Err(err)
            }
        }
    }

    fn allocate_retry<D: GpuDevice>(
        &mut self,
        device: &mut D,
        layout: vk::DescriptorSetLayout,
    ) -> VulkanResult<vk::DescriptorSet> {
        let pool = self.get_pool(device)?;

        match device.allocate_descriptor_set(pool, layout) {
            Ok(set) => {
                self.ready_pools.push(pool);
                Ok(set)
            }
            Err(err) if err.is_pool_full() => {
                self.full_pools.push(pool);
                log::error!("[descriptors] allocation failed on a fresh pool: {}", err);
                Err(VulkanError::DescriptorPoolExhausted)
            }
            Err(err) => {
                self.ready_pools.push(pool);
                Err(err)
            }
        }
    }

    /// Reset every pool and make all of them ready again.
    ///
    /// A failed reset does not stop the others; every pool stays owned by
    /// the allocator and the first error is returned.
    pub fn clear<D: GpuDevice>(&mut self, device: &mut D) -> VulkanResult<()> {
        let mut first_error = None;
        let mut reset = |device: &mut D, pool: vk::DescriptorPool| {
            if let Err(e) = device.reset_descriptor_pool(pool) {
                log::warn!("Failed to reset descriptor pool {:?}: {}", pool, e);
                first_error.get_or_insert(e);
            }
        };

        for pool in &self.ready_pools {
            reset(device, *pool);
        }
        for pool in self.full_pools.drain(..) {
            reset(device, pool);
            self.ready_pools.push(pool);
        }

        first_error.map_or(Ok(()), Err)
    }

    /// Destroy every pool, ready and full
    pub fn destroy<D: GpuDevice>(&mut self, device: &mut D) {
        for pool in self.ready_pools.drain(..).chain(self.full_pools.drain(..)) {
            device.destroy_descriptor_pool(pool);
        }
    }

    /// Sets the next newly created pool will be sized for
    pub fn sets_per_pool(&self) -> u32 {
        self.sets_per_pool
    }

    /// Pools available for allocation
    pub fn ready_pool_count(&self) -> usize {
        self.ready_pools.len()
    }

    /// Pools that reported exhaustion since the last clear
    pub fn full_pool_count(&self) -> usize {
        self.full_pools.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::api::ResourceKind;
    use crate::render::testing::{DeviceCall, MockDevice};
    use ash::vk::Handle;

    fn ratios() -> Vec<PoolSizeRatio> {
        vec![
            PoolSizeRatio::new(vk::DescriptorType::UNIFORM_BUFFER, 3.0),
            PoolSizeRatio::new(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 4.0),
        ]
    }

    fn created_pool_sizes(device: &MockDevice) -> Vec<u32> {
        device
            .calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::CreateDescriptorPool { max_sets, .. } => Some(*max_sets),
                _ => None,
            })
            .collect()
    }

    fn created_pools(device: &MockDevice) -> Vec<vk::DescriptorPool> {
        device
            .calls
            .iter()
            .filter_map(|call| match call {
                DeviceCall::CreateDescriptorPool { pool, .. } => Some(*pool),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_target_is_one_and_a_half_capacity() {
        let mut device = MockDevice::new();
        let mut allocator = DescriptorAllocatorGrowable::new(&mut device, 10, &ratios()).unwrap();
        assert_eq!(allocator.sets_per_pool(), 15);
        assert_eq!(allocator.ready_pool_count(), 1);
        allocator.destroy(&mut device);
    }

    #[test]
    fn test_growth_saturates_at_the_cap() {
        assert_eq!(grow_target(1), 2);
        assert_eq!(grow_target(3), 5);
        assert_eq!(grow_target(MAX_SETS_PER_POOL - 1), MAX_SETS_PER_POOL);
        assert_eq!(grow_target(u32::MAX), MAX_SETS_PER_POOL);
    }

    #[test]
    fn test_pool_growth_is_monotonic_and_capped() {
        let mut device = MockDevice::new();
        let layout = vk::DescriptorSetLayout::from_raw(99);
        let mut allocator = DescriptorAllocatorGrowable::new(&mut device, 1000, &ratios()).unwrap();

        let mut previous_target = allocator.sets_per_pool();
        for _ in 0..40_000 {
            allocator.allocate(&mut device, layout).unwrap();
            let target = allocator.sets_per_pool();
            assert!(target >= previous_target);
            assert!(target <= MAX_SETS_PER_POOL);
            previous_target = target;
        }

        let sizes = created_pool_sizes(&device);
        assert!(sizes.len() > 3);
        for pair in sizes.windows(2) {
            let expected = ((pair[0] as f32) * 1.5).min(MAX_SETS_PER_POOL as f32);
            assert!(pair[1] as f32 >= expected.floor(), "{:?}", pair);
            assert!(pair[1] <= MAX_SETS_PER_POOL);
        }
        assert_eq!(*sizes.last().unwrap(), MAX_SETS_PER_POOL);
        assert_eq!(allocator.sets_per_pool(), MAX_SETS_PER_POOL);

        allocator.destroy(&mut device);
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 0);
    }

    #[test]
    fn test_full_pool_moves_to_full_list_and_retry_succeeds() {
        let mut device = MockDevice::new();
        let layout = vk::DescriptorSetLayout::from_raw(99);
        let mut allocator = DescriptorAllocatorGrowable::new(&mut device, 2, &ratios()).unwrap();

        for _ in 0..2 {
            allocator.allocate(&mut device, layout).unwrap();
        }
        assert_eq!(allocator.full_pool_count(), 0);

        allocator.allocate(&mut device, layout).unwrap();
        assert_eq!(allocator.full_pool_count(), 1);
        assert_eq!(allocator.ready_pool_count(), 1);

        allocator.destroy(&mut device);
    }

    #[test]
    fn test_clear_returns_full_pools_to_ready() {
        let mut device = MockDevice::new();
        let layout = vk::DescriptorSetLayout::from_raw(99);
        let mut allocator = DescriptorAllocatorGrowable::new(&mut device, 1, &ratios()).unwrap();

        for _ in 0..6 {
            allocator.allocate(&mut device, layout).unwrap();
        }
        let total = allocator.ready_pool_count() + allocator.full_pool_count();
        assert!(allocator.full_pool_count() > 0);

        allocator.clear(&mut device).unwrap();
        assert_eq!(allocator.full_pool_count(), 0);
        assert_eq!(allocator.ready_pool_count(), total);

        let target = allocator.sets_per_pool();
        allocator.allocate(&mut device, layout).unwrap();
        assert_eq!(allocator.sets_per_pool(), target);

        allocator.destroy(&mut device);
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 0);
    }

    #[test]
    fn test_failed_reset_still_recycles_every_pool() {
        let mut device = MockDevice::new();
        let layout = vk::DescriptorSetLayout::from_raw(99);
        let mut allocator = DescriptorAllocatorGrowable::new(&mut device, 1, &ratios()).unwrap();

        for _ in 0..6 {
            allocator.allocate(&mut device, layout).unwrap();
        }
        let pools = created_pools(&device);
        let total = allocator.ready_pool_count() + allocator.full_pool_count();
        assert_eq!(pools.len(), total);
        assert!(allocator.full_pool_count() > 1);

        // the first pool filled up first, so it heads the full list
        device.fail_pool_reset(pools[0]);
        let err = allocator.clear(&mut device).unwrap_err();
        assert!(matches!(err, VulkanError::Api(_)));

        assert_eq!(allocator.full_pool_count(), 0);
        assert_eq!(allocator.ready_pool_count(), total);
        for pool in &pools {
            assert!(device.calls.contains(&DeviceCall::ResetDescriptorPool(*pool)), "{:?} not reset", pool);
        }

        allocator.destroy(&mut device);
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 0);
    }

    #[test]
    fn test_second_failure_is_fatal() {
        let mut device = MockDevice::new();
        let layout = vk::DescriptorSetLayout::from_raw(99);
        device.override_pool_capacity(Some(0));
        let mut allocator = DescriptorAllocatorGrowable::new(&mut device, 4, &ratios()).unwrap();

        let err = allocator.allocate(&mut device, layout).unwrap_err();
        assert!(matches!(err, VulkanError::DescriptorPoolExhausted));
        assert_eq!(allocator.full_pool_count(), 2);

        allocator.destroy(&mut device);
        assert_eq!(device.live_count(ResourceKind::DescriptorPool), 0);
    }

    #[test]
    fn test_layout_builder_applies_stages() {
        let mut device = MockDevice::new();
        let builder = DescriptorLayoutBuilder::new()
            .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER)
            .add_binding(1, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
        assert_eq!(builder.bindings.len(), 2);

        let layout = builder
            .build(&mut device, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .unwrap();
        assert_ne!(layout, vk::DescriptorSetLayout::null());
    }

    #[test]
    fn test_writer_collects_writes_in_order() {
        let mut device = MockDevice::new();
        let set = vk::DescriptorSet::from_raw(7);
        let mut writer = DescriptorWriter::new();
        writer
            .write_buffer(0, vk::Buffer::from_raw(1), 256, 0, vk::DescriptorType::UNIFORM_BUFFER)
            .write_image(
                1,
                vk::ImageView::from_raw(2),
                vk::Sampler::from_raw(3),
                vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            );
        writer.update_set(&mut device, set);

        match &device.calls[0] {
            DeviceCall::UpdateDescriptorSet(target, writes) => {
                assert_eq!(*target, set);
                assert_eq!(writes.len(), 2);
                assert!(matches!(writes[0], DescriptorWrite::Buffer { binding: 0, range: 256, .. }));
            }
            other => panic!("unexpected call {:?}", other),
        }
    }
}
