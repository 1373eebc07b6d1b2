//! Resource creation/destruction on the logical device. This is the
//! HAL-level surface the `gfx` crate's dispatch
//! layer drives; it owns the allocators and the render-pass/framebuffer/
//! descriptor-set-layout/pipeline-layout caches declared on [`DeviceShared`].

use std::sync::Arc;

use ash::vk;
use gfxt::{BufferUsages, TextureFormat, TextureUsages};

use super::allocator::{BindPreferences, UsedRegion};
use super::descriptor::{
    BindGroup, BindingDescriptor, DescriptorSetCache, DescriptorSetLayoutEntry, LayoutKey,
    UniformBuffer, UniformStage, MAX_SLAB_SECTION_SIZE, UNIFORM_BUFFER_CAPACITY,
};
use super::fence::{CommandFencePool, Fence};
use super::pipeline::{PipelineLayout, PipelineLayoutKey, ShaderModule};
use super::render_pass::{FramebufferKey, RenderPassKey};
use super::resource::{
    Buffer, BufferHandle, OcclusionQuery, Sampler, Texture, TextureHandle, TextureSlice,
    TextureView,
};
use super::{command, conv, Device, DeviceShared};
use crate::DeviceError;

pub struct BufferDescriptor<'a> {
    pub size: u64,
    pub usage: BufferUsages,
    pub require_host_visible: bool,
    pub prefer_host_local: bool,
    pub prefer_device_local: bool,
    pub preserve_on_defrag: bool,
    pub name: Option<&'a str>,
}

pub struct TextureDescriptor<'a> {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub layer_count: u32,
    pub level_count: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsages,
    pub name: Option<&'a str>,
}

impl Device {
    pub fn raw(&self) -> &ash::Device {
        &self.shared.raw
    }

    pub(crate) fn shared(&self) -> &Arc<DeviceShared> {
        &self.shared
    }

    fn map_usage_to_vk_buffer(usage: BufferUsages) -> vk::BufferUsageFlags {
        conv::map_buffer_usage(usage)
    }

    /// `CreateBuffer`: allocates and binds via the device's
    /// [`super::allocator::DeviceAllocator`], honoring the host/device
    /// locality preferences the caller supplied.
    pub unsafe fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> Result<Buffer, DeviceError> {
        let handle = self.allocate_buffer_handle(desc)?;
        Ok(Buffer::new(handle))
    }

    /// Shared by `create_buffer` and the cycling replacement path in
    /// `set_transfer_data`: creates and binds a `BufferHandle` without
    /// wrapping it in a `Buffer` container.
    unsafe fn allocate_buffer_handle(&self, desc: &BufferDescriptor<'_>) -> Result<BufferHandle, DeviceError> {
        let vk_usage = Self::map_usage_to_vk_buffer(desc.usage)
            | vk::BufferUsageFlags::TRANSFER_SRC
            | vk::BufferUsageFlags::TRANSFER_DST;
        let info = vk::BufferCreateInfo::builder()
            .size(desc.size)
            .usage(vk_usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let raw = self.shared.raw.create_buffer(&info, None)?;
        let requirements = self.shared.raw.get_buffer_memory_requirements(raw);

        let prefs = BindPreferences {
            prefer_host_local: desc.prefer_host_local,
            prefer_device_local: desc.prefer_device_local,
            require_host_visible: desc.require_host_visible,
        };
        let (region, memory_type_index) = {
            let mut allocator = self.mem_allocator.lock();
            match allocator.bind(&self.shared.raw, requirements, prefs, true) {
                Ok(result) => result,
                Err(err) => {
                    self.shared.raw.destroy_buffer(raw, None);
                    return Err(err);
                }
            }
        };
        self.bind_buffer_memory(raw, memory_type_index, &region)?;

        let mut handle = BufferHandle::new(raw, desc.size, desc.usage, memory_type_index, region);
        handle.require_host_visible = desc.require_host_visible;
        handle.prefer_host_local = desc.prefer_host_local;
        handle.prefer_device_local = desc.prefer_device_local;
        handle.preserve_on_defrag = desc.preserve_on_defrag;
        handle.name = desc.name.map(str::to_owned);
        self.maybe_set_debug_name(raw, desc.name);
        Ok(handle)
    }

    unsafe fn bind_buffer_memory(
        &self,
        raw: vk::Buffer,
        memory_type_index: u32,
        region: &UsedRegion,
    ) -> Result<(), DeviceError> {
        let allocator = self.mem_allocator.lock();
        let memory = allocator.native_memory(memory_type_index, region.page);
        self.shared
            .raw
            .bind_buffer_memory(raw, memory, region.resource_offset)?;
        Ok(())
    }

    pub unsafe fn destroy_buffer(&self, buffer: Buffer) {
        let active = buffer.active();
        self.shared.raw.destroy_buffer(active.raw, None);
        self.mem_allocator.lock().release(active.memory_type_index, &active.region);
    }

    /// `CreateTexture`: builds the default view plus one view per
    /// `(layer, level)` slice up front, since the barrier engine addresses
    /// slices individually.
    pub unsafe fn create_texture(&self, desc: &TextureDescriptor<'_>) -> Result<Texture, DeviceError> {
        let format = conv::map_texture_format(desc.format);
        let image_info = vk::ImageCreateInfo::builder()
            .image_type(if desc.depth > 1 {
                vk::ImageType::TYPE_3D
            } else {
                vk::ImageType::TYPE_2D
            })
            .format(format)
            .extent(vk::Extent3D {
                width: desc.width,
                height: desc.height,
                depth: desc.depth,
            })
            .mip_levels(desc.level_count)
            .array_layers(desc.layer_count)
            .samples(conv::map_sample_count(desc.sample_count))
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(conv::map_texture_usage(desc.usage))
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let raw = self.shared.raw.create_image(&image_info, None)?;
        let requirements = self.shared.raw.get_image_memory_requirements(raw);

        let (region, memory_type_index) = {
            let mut allocator = self.mem_allocator.lock();
            let prefs = BindPreferences {
                prefer_host_local: false,
                prefer_device_local: true,
                require_host_visible: false,
            };
            match allocator.bind(&self.shared.raw, requirements, prefs, false) {
                Ok(result) => result,
                Err(err) => {
                    self.shared.raw.destroy_image(raw, None);
                    return Err(err);
                }
            }
        };
        {
            let allocator = self.mem_allocator.lock();
            let memory = allocator.native_memory(memory_type_index, region.page);
            self.shared.raw.bind_image_memory(raw, memory, region.resource_offset)?;
        }

        let aspect = gfxt::depth_stencil_aspect(desc.format);
        let aspect_mask = conv::map_aspect(aspect);
        let default_view = self.create_image_view(raw, format, aspect_mask, 0, desc.level_count, 0, desc.layer_count)?;

        let mut slices = Vec::with_capacity((desc.layer_count * desc.level_count) as usize);
        for layer in 0..desc.layer_count {
            for level in 0..desc.level_count {
                let view = self.create_image_view(raw, format, aspect_mask, level, 1, layer, 1)?;
                slices.push(TextureSlice::new(layer, level, view));
            }
        }

        self.maybe_set_debug_name(raw, desc.name);
        let handle = TextureHandle {
            raw,
            default_view,
            width: desc.width,
            height: desc.height,
            depth: desc.depth,
            layer_count: desc.layer_count,
            level_count: desc.level_count,
            sample_count: desc.sample_count,
            format: desc.format,
            usage: desc.usage,
            aspect,
            memory_type_index: Some(memory_type_index),
            region: Some(region),
            slices,
            name: desc.name.map(str::to_owned),
        };
        Ok(Texture::new(handle, true))
    }

    unsafe fn create_image_view(
        &self,
        image: vk::Image,
        format: vk::Format,
        aspect_mask: vk::ImageAspectFlags,
        base_mip_level: u32,
        level_count: u32,
        base_array_layer: u32,
        layer_count: u32,
    ) -> Result<vk::ImageView, DeviceError> {
        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask,
                base_mip_level,
                level_count,
                base_array_layer,
                layer_count,
            });
        Ok(self.shared.raw.create_image_view(&info, None)?)
    }

    pub unsafe fn destroy_texture(&self, texture: Texture) {
        let active = texture.active();
        for slice in &active.slices {
            self.shared.raw.destroy_image_view(slice.view, None);
        }
        self.shared.raw.destroy_image_view(active.default_view, None);
        self.shared.raw.destroy_image(active.raw, None);
        if let (Some(region), Some(memory_type_index)) = (&active.region, active.memory_type_index) {
            self.mem_allocator.lock().release(memory_type_index, region);
        }
    }

    pub unsafe fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> Result<Sampler, DeviceError> {
        let raw = self.shared.raw.create_sampler(info, None)?;
        Ok(Sampler { raw })
    }

    pub unsafe fn destroy_sampler(&self, sampler: Sampler) {
        self.shared.raw.destroy_sampler(sampler.raw, None);
    }

    pub unsafe fn create_texture_view(&self, view: vk::ImageView, layers: std::num::NonZeroU32) -> TextureView {
        TextureView { raw: view, layers }
    }

    /// `CreateShaderModule`: SPIR-V only, matching ash's native entry point.
    pub unsafe fn create_shader_module(&self, spirv: &[u32]) -> Result<ShaderModule, DeviceError> {
        let info = vk::ShaderModuleCreateInfo::builder().code(spirv);
        let raw = self.shared.raw.create_shader_module(&info, None)?;
        Ok(ShaderModule::Raw(raw))
    }

    pub unsafe fn destroy_shader_module(&self, module: ShaderModule) {
        let ShaderModule::Raw(raw) = module;
        self.shared.raw.destroy_shader_module(raw, None);
    }

    /// Looks up or creates the descriptor set layout for `bindings`, keyed
    /// by a global `(type, binding_count, stage_flag)` hash table.
    pub unsafe fn get_or_create_descriptor_set_layout(
        &self,
        bindings: Vec<BindingDescriptor>,
    ) -> Result<Arc<DescriptorSetLayoutEntry>, DeviceError> {
        let key = LayoutKey { bindings: bindings.clone() };
        if let Some(entry) = self.shared.descriptor_set_layouts.lock().get(&key) {
            return Ok(entry.clone());
        }

        let vk_bindings: Vec<_> = bindings
            .iter()
            .enumerate()
            .map(|(i, b)| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(i as u32)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stage_flags)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&vk_bindings);
        let raw = self.shared.raw.create_descriptor_set_layout(&info, None)?;

        let mut desc_count = gpu_descriptor::DescriptorTotalCount::default();
        for binding in &bindings {
            match binding.descriptor_type {
                vk::DescriptorType::SAMPLER => desc_count.sampler += binding.count,
                vk::DescriptorType::SAMPLED_IMAGE => desc_count.sampled_image += binding.count,
                vk::DescriptorType::STORAGE_IMAGE => desc_count.storage_image += binding.count,
                vk::DescriptorType::UNIFORM_BUFFER => desc_count.uniform_buffer += binding.count,
                vk::DescriptorType::STORAGE_BUFFER => desc_count.storage_buffer += binding.count,
                vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC => {
                    desc_count.uniform_buffer_dynamic += binding.count
                }
                vk::DescriptorType::STORAGE_BUFFER_DYNAMIC => {
                    desc_count.storage_buffer_dynamic += binding.count
                }
                _ => {}
            }
        }

        let entry = Arc::new(DescriptorSetLayoutEntry {
            raw,
            desc_count,
            bindings,
        });
        self.shared
            .descriptor_set_layouts
            .lock()
            .insert(key, entry.clone());
        Ok(entry)
    }

    /// `CreatePipelineLayout`: deduplicated by the identity of its
    /// (up to four) descriptor-set-layout slots.
    pub unsafe fn get_or_create_pipeline_layout(
        &self,
        set_layouts: [Arc<DescriptorSetLayoutEntry>; crate::MAX_BIND_GROUPS],
    ) -> Result<PipelineLayout, DeviceError> {
        let key = PipelineLayoutKey {
            set_layouts: std::array::from_fn(|i| set_layouts[i].raw),
        };
        let raw = {
            let mut cache = self.shared.pipeline_layouts.lock();
            if let Some(raw) = cache.get(&key) {
                *raw
            } else {
                let raws: Vec<_> = set_layouts.iter().map(|e| e.raw).collect();
                let info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&raws);
                let raw = self.shared.raw.create_pipeline_layout(&info, None)?;
                cache.insert(key, raw);
                raw
            }
        };

        let descriptor_caches = set_layouts
            .iter()
            .map(|entry| DescriptorSetCache::new(entry.raw, entry.desc_count))
            .collect();

        Ok(PipelineLayout {
            raw,
            set_layouts,
            descriptor_caches,
            uniform_block_size: 0,
        })
    }

    /// Looks up or builds the cached render pass for `key`.
    pub unsafe fn get_or_create_render_pass(&self, key: &RenderPassKey) -> Result<vk::RenderPass, DeviceError> {
        if let Some(raw) = self.shared.render_passes.lock().get(key) {
            return Ok(*raw);
        }
        let raw = super::render_pass::create_render_pass(&self.shared.raw, key)?;
        self.shared.render_passes.lock().insert(key.clone(), raw);
        Ok(raw)
    }

    /// Looks up or builds the cached framebuffer for `key`.
    pub unsafe fn get_or_create_framebuffer(
        &self,
        render_pass: vk::RenderPass,
        key: &FramebufferKey,
    ) -> Result<vk::Framebuffer, DeviceError> {
        if let Some(raw) = self.shared.framebuffers.lock().get(key) {
            return Ok(*raw);
        }
        let raw = super::render_pass::create_framebuffer(&self.shared.raw, render_pass, key)?;
        self.shared.framebuffers.lock().insert(key.clone(), raw);
        Ok(raw)
    }

    /// Thin `CreateBuffer` wrapper for the public `CreateTransferBuffer` op:
    /// always host-visible, never device-local-preferred, so the
    /// caller can map it directly.
    pub unsafe fn create_transfer_buffer(
        &self,
        size: u64,
        name: Option<&str>,
    ) -> Result<Buffer, DeviceError> {
        self.create_buffer(&BufferDescriptor {
            size,
            usage: gfxt::BufferUsages::empty(),
            require_host_visible: true,
            prefer_host_local: true,
            prefer_device_local: false,
            preserve_on_defrag: false,
            name,
        })
    }

    /// `MapTransferBuffer`: the sub-allocator keeps host-visible
    /// pages mapped persistently, so this is just an offset lookup.
    pub unsafe fn map_transfer_buffer(&self, buffer: &Buffer) -> Option<std::ptr::NonNull<u8>> {
        let active = buffer.active();
        self.mem_allocator
            .lock()
            .mapped_ptr(active.memory_type_index, &active.region)
    }

    /// `UnmapTransferBuffer`: a no-op since the mapping is persistent, kept
    /// for symmetry with the public API surface.
    pub unsafe fn unmap_transfer_buffer(&self, _buffer: &Buffer) {}

    /// `SetTransferData`: copies `data` into the mapped region at
    /// `dst_offset`, honoring `cycle` the same way a write-intent cycling
    /// buffer op would. When cycling, the replacement buffer is
    /// allocated up front (fallibly) since `prepare_for_write`'s
    /// `make_replacement` callback has no way to propagate an error.
    pub unsafe fn set_transfer_data(
        &self,
        buffer: &mut Buffer,
        data: &[u8],
        dst_offset: u64,
        cycle: bool,
    ) -> Result<(), DeviceError> {
        let write_option = if cycle {
            super::resource::WriteOption::Cycle
        } else {
            super::resource::WriteOption::Safe
        };
        let mut replacement = if cycle {
            let old = buffer.active().clone();
            Some(self.allocate_buffer_handle(&BufferDescriptor {
                size: old.size,
                usage: old.usage,
                require_host_visible: true,
                prefer_host_local: true,
                prefer_device_local: false,
                preserve_on_defrag: old.preserve_on_defrag,
                name: old.name.as_deref(),
            })?)
        } else {
            None
        };
        buffer.prepare_for_write(write_option, gfxt::AccessIntent::HostWrite, |_old| {
            replacement
                .take()
                .expect("make_replacement is only invoked when write_option is Cycle")
        });
        let Some(ptr) = self.map_transfer_buffer(buffer) else {
            return Err(DeviceError::ResourceCreationFailed);
        };
        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                ptr.as_ptr().wrapping_add(dst_offset as usize),
                data.len(),
            );
        }
        Ok(())
    }

    /// `GetTransferData`: reads `dst.len()` bytes back out of the
    /// mapped region starting at `src_offset`.
    pub unsafe fn get_transfer_data(&self, buffer: &Buffer, src_offset: u64, dst: &mut [u8]) {
        let Some(ptr) = self.map_transfer_buffer(buffer) else {
            return;
        };
        unsafe {
            std::ptr::copy_nonoverlapping(
                ptr.as_ptr().wrapping_add(src_offset as usize),
                dst.as_mut_ptr(),
                dst.len(),
            );
        }
    }

    /// `CreateOcclusionQuery`: sentinel-only, no `VkQueryPool`.
    pub unsafe fn create_occlusion_query(&self) -> OcclusionQuery {
        use std::sync::atomic::{AtomicU64, Ordering};
        static NEXT_SENTINEL: AtomicU64 = AtomicU64::new(1);
        OcclusionQuery {
            sentinel: NEXT_SENTINEL.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub unsafe fn release_occlusion_query(&self, query: OcclusionQuery) {
        log::trace!("occlusion query {} released (no-op backend)", query.sentinel);
    }

    pub unsafe fn create_command_encoder(&self) -> command::CommandEncoder {
        command::CommandEncoder::new(self.shared.family_index)
    }

    pub fn limits(&self) -> gfxt::DeviceLimits {
        self.shared.private_caps.device_limits()
    }

    pub unsafe fn wait_idle(&self) -> Result<(), DeviceError> {
        Ok(self.shared.raw.device_wait_idle()?)
    }

    /// `SetBufferName`.
    pub unsafe fn set_buffer_name(&self, buffer: &Buffer, name: &str) {
        self.maybe_set_debug_name(buffer.active().raw, Some(name));
    }

    /// `SetTextureName`.
    pub unsafe fn set_texture_name(&self, texture: &Texture, name: &str) {
        self.maybe_set_debug_name(texture.active().raw, Some(name));
    }

    /// `SetStringMarker`: inserts a `VK_EXT_debug_utils` label
    /// into the command buffer, a no-op when the extension isn't enabled.
    pub unsafe fn set_string_marker(&self, cmd: vk::CommandBuffer, marker: &str) {
        let Some(debug_utils) = self.shared.instance.debug_utils.as_ref() else {
            return;
        };
        let Ok(c_marker) = std::ffi::CString::new(marker) else {
            return;
        };
        let info = vk::DebugUtilsLabelEXT::builder().label_name(&c_marker);
        debug_utils.extension.cmd_insert_debug_utils_label(cmd, &info);
    }

    unsafe fn maybe_set_debug_name<H: vk::Handle>(&self, handle: H, name: Option<&str>) {
        let (Some(name), Some(debug_utils)) = (name, self.shared.instance.debug_utils.as_ref()) else {
            return;
        };
        let Ok(c_name) = std::ffi::CString::new(name) else {
            return;
        };
        let info = vk::DebugUtilsObjectNameInfoEXT::builder()
            .object_type(H::TYPE)
            .object_handle(handle.as_raw())
            .object_name(&c_name);
        let _ = debug_utils.extension.set_debug_utils_object_name(self.shared.raw.handle(), &info);
    }

    /// Layout for the single dynamic-offset uniform slot every stage's
    /// slab buffers expose, serving as this backend's equivalent to push
    /// constants.
    fn uniform_layout_bindings() -> Vec<BindingDescriptor> {
        vec![BindingDescriptor {
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
            count: 1,
            stage_flags: vk::ShaderStageFlags::ALL,
        }]
    }

    unsafe fn acquire_uniform_buffer(&self, entry: &DescriptorSetLayoutEntry) -> Result<UniformBuffer, DeviceError> {
        let handle = self.allocate_buffer_handle(&BufferDescriptor {
            size: UNIFORM_BUFFER_CAPACITY,
            usage: gfxt::BufferUsages::UNIFORM,
            require_host_visible: true,
            prefer_host_local: true,
            prefer_device_local: false,
            preserve_on_defrag: false,
            name: Some("uniform slab"),
        })?;
        let mapped_ptr = self
            .mem_allocator
            .lock()
            .mapped_ptr(handle.memory_type_index, &handle.region)
            .ok_or(DeviceError::ResourceCreationFailed)?;

        let descriptor_set = {
            let mut desc_allocator = self.desc_allocator.lock();
            let wrapper = super::descriptor::AshDescriptorDevice(&self.shared.raw);
            let mut sets = desc_allocator
                .allocate(
                    &wrapper,
                    &entry.raw,
                    gpu_descriptor::DescriptorSetLayoutCreateFlags::empty(),
                    &entry.desc_count,
                    1,
                )
                .map_err(DeviceError::from)?;
            sets.remove(0)
        };

        let buffer_info = vk::DescriptorBufferInfo::builder()
            .buffer(handle.raw)
            .offset(0)
            .range(MAX_SLAB_SECTION_SIZE);
        let write = vk::WriteDescriptorSet::builder()
            .dst_set(*descriptor_set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(std::slice::from_ref(&buffer_info));
        self.shared.raw.update_descriptor_sets(&[write.build()], &[]);

        Ok(UniformBuffer {
            raw: handle.raw,
            mapped_ptr,
            descriptor_set,
            capacity: handle.size,
            bump_offset: 0,
        })
    }

    /// `PushVertex/Fragment/ComputeUniformData(slot, bytes)`: copies
    /// `data` into a slab section of the stage's uniform buffer
    /// pool, acquiring a fresh backing buffer when every existing one in
    /// that stage is exhausted, and returns the descriptor set plus
    /// dynamic offset the caller binds into the draw/dispatch call.
    pub unsafe fn push_uniform_data(
        &self,
        stage: UniformStage,
        data: &[u8],
    ) -> Result<(vk::DescriptorSet, u32), DeviceError> {
        let entry = self.get_or_create_descriptor_set_layout(Self::uniform_layout_bindings())?;
        let mut uniform_pool = self.uniform_pool.lock();
        let (index, offset) = uniform_pool.reserve(stage, data.len() as u64, || {
            self.acquire_uniform_buffer(&entry)
        })?;
        let buffer = &uniform_pool.stage_buffer(stage, index);
        std::ptr::copy_nonoverlapping(
            data.as_ptr(),
            buffer.mapped_ptr.as_ptr().wrapping_add(offset as usize),
            data.len(),
        );
        Ok((*buffer.descriptor_set, offset as u32))
    }

    /// `SubmitAndAcquireFence`'s counterpart to the internal per-queue
    /// ordering [`Fence`]: the backing strategy (timeline semaphore
    /// vs. pool) is chosen once here and hidden from callers after that.
    pub unsafe fn create_ordering_fence(&self) -> Result<Fence, DeviceError> {
        if self.shared.private_caps.timeline_semaphores {
            let mut type_info = vk::SemaphoreTypeCreateInfo::builder()
                .semaphore_type(vk::SemaphoreType::TIMELINE)
                .initial_value(0);
            let info = vk::SemaphoreCreateInfo::builder().push_next(&mut type_info);
            let raw = self.shared.raw.create_semaphore(&info, None)?;
            Ok(Fence::new_timeline(raw))
        } else {
            Ok(Fence::new_pool())
        }
    }

    pub unsafe fn fence_value(&self, fence: &Fence) -> Result<crate::FenceValue, DeviceError> {
        fence.get_latest(
            &self.shared.raw,
            self.shared.extension_fns.timeline_semaphore.as_ref(),
        )
    }

    pub unsafe fn maintain_fence(&self, fence: &mut Fence) -> Result<(), DeviceError> {
        fence.maintain(&self.shared.raw)
    }

    pub unsafe fn new_command_fence_pool(&self) -> CommandFencePool {
        CommandFencePool::new()
    }

    /// `BindVertexStorageTextures`/`BindFragmentSamplers`/etc.: allocate
    /// a fresh descriptor set for `layout` and let the caller fill it in,
    /// since the binding shape (sampler vs. sampled/storage image vs.
    /// storage buffer) varies by call site. No per-layout free list backs
    /// this path the way the render-pass/framebuffer caches are backed;
    /// every bind group is freed back to the allocator on release rather
    /// than recycled, trading a little allocator churn for not needing a
    /// second cache keyed the same way `PipelineLayout::descriptor_caches`
    /// already is.
    pub unsafe fn create_bind_group(
        &self,
        layout: &Arc<DescriptorSetLayoutEntry>,
        build_writes: impl FnOnce(vk::DescriptorSet) -> Vec<vk::WriteDescriptorSet>,
    ) -> Result<BindGroup, DeviceError> {
        let wrapper = super::descriptor::AshDescriptorDevice(&self.shared.raw);
        let set = {
            let mut desc_allocator = self.desc_allocator.lock();
            let mut sets = desc_allocator
                .allocate(
                    &wrapper,
                    &layout.raw,
                    gpu_descriptor::DescriptorSetLayoutCreateFlags::empty(),
                    &layout.desc_count,
                    1,
                )
                .map_err(DeviceError::from)?;
            sets.remove(0)
        };
        let writes = build_writes(*set);
        self.shared.raw.update_descriptor_sets(&writes, &[]);
        Ok(BindGroup { set })
    }

    pub unsafe fn release_bind_group(&self, group: BindGroup) {
        let wrapper = super::descriptor::AshDescriptorDevice(&self.shared.raw);
        self.desc_allocator.lock().free(&wrapper, Some(group.set));
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            let _ = self.shared.raw.device_wait_idle();
            for (_, raw) in self.shared.render_passes.lock().drain() {
                self.shared.raw.destroy_render_pass(raw, None);
            }
            for (_, raw) in self.shared.framebuffers.lock().drain() {
                self.shared.raw.destroy_framebuffer(raw, None);
            }
            for (_, raw) in self.shared.pipeline_layouts.lock().drain() {
                self.shared.raw.destroy_pipeline_layout(raw, None);
            }
            for (_, entry) in self.shared.descriptor_set_layouts.lock().drain() {
                self.shared.raw.destroy_descriptor_set_layout(entry.raw, None);
            }
            self.shared.raw.destroy_device(None);
        }
    }
}
