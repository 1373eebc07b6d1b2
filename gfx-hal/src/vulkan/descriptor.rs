//! Descriptor set layout dedup, per-layout descriptor set caches, and the
//! uniform-buffer-as-dynamic-offset slab pool.

use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use crate::DeviceError;

/// One binding slot in a descriptor set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BindingDescriptor {
    pub descriptor_type: vk::DescriptorType,
    pub count: u32,
    pub stage_flags: vk::ShaderStageFlags,
}

/// Dedup key for descriptor-set layouts: `(descriptor_type, binding_count,
/// stage_flag)` per binding.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LayoutKey {
    pub bindings: Vec<BindingDescriptor>,
}

pub struct DescriptorSetLayoutEntry {
    pub raw: vk::DescriptorSetLayout,
    pub desc_count: gpu_descriptor::DescriptorTotalCount,
    pub bindings: Vec<BindingDescriptor>,
}

pub struct BindGroupLayout {
    pub entry: Arc<DescriptorSetLayoutEntry>,
}

pub struct BindGroup {
    pub set: gpu_descriptor::DescriptorSet<vk::DescriptorSet>,
}

/// Adapter implementing `gpu_descriptor::DescriptorDevice` over a plain
/// `ash::Device`, so `gpu_descriptor::DescriptorAllocator` can drive pool
/// creation/destruction without this crate hand-rolling pool growth.
pub(crate) struct AshDescriptorDevice<'a>(pub &'a ash::Device);

impl<'a> gpu_descriptor::DescriptorDevice<vk::DescriptorSetLayout, vk::DescriptorPool, vk::DescriptorSet>
    for AshDescriptorDevice<'a>
{
    unsafe fn create_descriptor_pool(
        &self,
        descriptor_count: &gpu_descriptor::DescriptorTotalCount,
        max_sets: u32,
        flags: gpu_descriptor::DescriptorPoolCreateFlags,
    ) -> Result<vk::DescriptorPool, gpu_descriptor::CreatePoolError> {
        let mut sizes = Vec::new();
        let mut push = |ty: vk::DescriptorType, count: u32| {
            if count > 0 {
                sizes.push(vk::DescriptorPoolSize {
                    ty,
                    descriptor_count: count,
                });
            }
        };
        push(vk::DescriptorType::SAMPLER, descriptor_count.sampler);
        push(
            vk::DescriptorType::SAMPLED_IMAGE,
            descriptor_count.sampled_image,
        );
        push(
            vk::DescriptorType::STORAGE_IMAGE,
            descriptor_count.storage_image,
        );
        push(
            vk::DescriptorType::UNIFORM_BUFFER,
            descriptor_count.uniform_buffer,
        );
        push(
            vk::DescriptorType::STORAGE_BUFFER,
            descriptor_count.storage_buffer,
        );
        push(
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            descriptor_count.uniform_buffer_dynamic,
        );
        push(
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
            descriptor_count.storage_buffer_dynamic,
        );

        let mut create_flags = vk::DescriptorPoolCreateFlags::empty();
        if flags.contains(gpu_descriptor::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND) {
            create_flags |= vk::DescriptorPoolCreateFlags::UPDATE_AFTER_BIND;
        }
        let info = vk::DescriptorPoolCreateInfo::builder()
            .max_sets(max_sets)
            .pool_sizes(&sizes)
            .flags(create_flags);
        self.0
            .create_descriptor_pool(&info, None)
            .map_err(|err| match err {
                vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
                    gpu_descriptor::CreatePoolError::OutOfDeviceMemory
                }
                vk::Result::ERROR_FRAGMENTATION => gpu_descriptor::CreatePoolError::Fragmentation,
                _ => gpu_descriptor::CreatePoolError::OutOfDeviceMemory,
            })
    }

    unsafe fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        self.0.destroy_descriptor_pool(pool, None);
    }

    unsafe fn alloc_descriptor_sets<'b>(
        &self,
        pool: &mut vk::DescriptorPool,
        layouts: impl ExactSizeIterator<Item = &'b vk::DescriptorSetLayout>,
        sets: &mut impl Extend<vk::DescriptorSet>,
    ) -> Result<(), gpu_descriptor::DeviceAllocationError> {
        let layouts: Vec<_> = layouts.copied().collect();
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(*pool)
            .set_layouts(&layouts);
        let allocated = self.0.allocate_descriptor_sets(&info).map_err(|err| match err {
            vk::Result::ERROR_OUT_OF_POOL_MEMORY => {
                gpu_descriptor::DeviceAllocationError::OutOfPoolMemory
            }
            vk::Result::ERROR_FRAGMENTED_POOL => {
                gpu_descriptor::DeviceAllocationError::FragmentedPool
            }
            _ => gpu_descriptor::DeviceAllocationError::OutOfDeviceMemory,
        })?;
        sets.extend(allocated);
        Ok(())
    }

    unsafe fn dealloc_descriptor_sets<'b>(
        &self,
        pool: &mut vk::DescriptorPool,
        sets: impl Iterator<Item = vk::DescriptorSet>,
    ) {
        let sets: Vec<_> = sets.collect();
        let _ = self.0.free_descriptor_sets(*pool, &sets);
    }
}

/// Per-layout cache of native descriptor sets: a free list of
/// previously-allocated, now-inactive sets is drained before falling
/// through to `gpu_descriptor::DescriptorAllocator`, which itself grows its
/// backing pools by doubling once exhausted.
pub struct DescriptorSetCache {
    layout: vk::DescriptorSetLayout,
    desc_count: gpu_descriptor::DescriptorTotalCount,
    free: Vec<gpu_descriptor::DescriptorSet<vk::DescriptorSet>>,
}

impl DescriptorSetCache {
    pub fn new(layout: vk::DescriptorSetLayout, desc_count: gpu_descriptor::DescriptorTotalCount) -> Self {
        Self {
            layout,
            desc_count,
            free: Vec::new(),
        }
    }

    pub unsafe fn acquire(
        &mut self,
        device: &ash::Device,
        allocator: &mut gpu_descriptor::DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>,
    ) -> Result<gpu_descriptor::DescriptorSet<vk::DescriptorSet>, DeviceError> {
        if let Some(set) = self.free.pop() {
            return Ok(set);
        }
        let wrapper = AshDescriptorDevice(device);
        let mut sets = allocator
            .allocate(
                &wrapper,
                &self.layout,
                gpu_descriptor::DescriptorSetLayoutCreateFlags::empty(),
                &self.desc_count,
                1,
            )
            .map_err(DeviceError::from)?;
        Ok(sets.remove(0))
    }

    pub fn release(&mut self, set: gpu_descriptor::DescriptorSet<vk::DescriptorSet>) {
        self.free.push(set);
    }
}

/// A fixed-size (≈1 MiB), persistently-mapped, host-visible buffer used as
/// a dynamic-offset uniform binding. Subdivided into slab sections of at most 4 KiB, each aligned to
/// the device's `minUniformBufferOffsetAlignment`.
pub struct UniformBuffer {
    pub raw: vk::Buffer,
    pub mapped_ptr: std::ptr::NonNull<u8>,
    pub descriptor_set: gpu_descriptor::DescriptorSet<vk::DescriptorSet>,
    pub capacity: u64,
    pub bump_offset: u64,
}

unsafe impl Send for UniformBuffer {}

pub const UNIFORM_BUFFER_CAPACITY: u64 = 1024 * 1024;
pub const MAX_SLAB_SECTION_SIZE: u64 = 4 * 1024;

impl UniformBuffer {
    /// Reserve `size` bytes (rounded up to `alignment`) from the bump
    /// offset, or `None` if the buffer is exhausted and the caller should
    /// acquire another one from the pool.
    pub fn try_reserve(&mut self, size: u64, alignment: u64) -> Option<u64> {
        let size = size.min(MAX_SLAB_SECTION_SIZE);
        let aligned = align_up(self.bump_offset, alignment);
        if aligned + size > self.capacity {
            return None;
        }
        self.bump_offset = aligned + size;
        Some(aligned)
    }

    pub fn reset(&mut self) {
        self.bump_offset = 0;
    }
}

fn align_up(offset: u64, alignment: u64) -> u64 {
    if alignment == 0 {
        return offset;
    }
    (offset + alignment - 1) / alignment * alignment
}

/// Which shader stage a uniform buffer slab belongs to, matching the
/// per-stage pools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UniformStage {
    Vertex,
    Fragment,
    Compute,
}

/// Per-stage list of [`UniformBuffer`]s plus its own descriptor pool.
/// A new buffer is acquired whenever the
/// current one in a stage's list can't satisfy a reservation.
pub struct UniformBufferPool {
    stages: [Vec<UniformBuffer>; 3],
    alignment: u64,
}

impl UniformBufferPool {
    pub fn new(alignment: u64) -> Self {
        Self {
            stages: [Vec::new(), Vec::new(), Vec::new()],
            alignment,
        }
    }

    fn stage_index(stage: UniformStage) -> usize {
        match stage {
            UniformStage::Vertex => 0,
            UniformStage::Fragment => 1,
            UniformStage::Compute => 2,
        }
    }

    /// Reserve a slab section in `stage`'s pool, acquiring a new backing
    /// buffer via `acquire_new` if every existing buffer is exhausted.
    pub fn reserve(
        &mut self,
        stage: UniformStage,
        size: u64,
        mut acquire_new: impl FnMut() -> Result<UniformBuffer, DeviceError>,
    ) -> Result<(usize, u64), DeviceError> {
        let list = &mut self.stages[Self::stage_index(stage)];
        for (index, buffer) in list.iter_mut().enumerate() {
            if let Some(offset) = buffer.try_reserve(size, self.alignment) {
                return Ok((index, offset));
            }
        }
        let mut fresh = acquire_new()?;
        let offset = fresh
            .try_reserve(size, self.alignment)
            .expect("a freshly acquired uniform buffer must fit one slab section");
        list.push(fresh);
        Ok((list.len() - 1, offset))
    }

    /// The buffer `reserve` placed a slab section in, by stage and index.
    pub fn stage_buffer(&self, stage: UniformStage, index: usize) -> &UniformBuffer {
        &self.stages[Self::stage_index(stage)][index]
    }

    /// Reset every buffer's bump offset back to zero (called once per
    /// frame, after the previous frame's submission has retired).
    pub fn reset_all(&mut self) {
        for list in &mut self.stages {
            for buffer in list {
                buffer.reset();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_rounds_to_the_next_multiple() {
        assert_eq!(align_up(10, 16), 16);
        assert_eq!(align_up(16, 16), 16);
        assert_eq!(align_up(0, 256), 0);
    }
}
