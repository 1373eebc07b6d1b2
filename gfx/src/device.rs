//! Device facade: owns the Vulkan instance, the adapter
//! it was opened from, the `hal` device/queue pair, the command-buffer
//! dispatch plumbing, the client-visible submission-fence pool, and the
//! claimed-window registry. Every method here converts `hal`'s internal
//! `Result` plumbing into this crate's null/zero/logged-warning contract
//! -- nothing panics on a recoverable driver condition.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

use gfxt::{Backend, DeviceLimits, TextureFormat, TextureUsages};
use hal::vulkan;
use hal::{DeviceError, FenceValue, SurfaceError};

use crate::dispatch::{select_backend, BackendPreference};
use crate::error::{log_create_failure, log_misuse, log_surface_failure, FenceState};

pub use hal::vulkan::{
    BindGroup, BindingDescriptor, Buffer, BufferDescriptor, ColorTargetState, ComputePipeline,
    DescriptorSetLayoutEntry, GraphicsPipelineDescriptor, OcclusionQuery, PrimitiveTopology,
    RenderPipeline, Sampler, ShaderModule, Texture, TextureDescriptor, TextureView, UniformStage,
    VertexAttribute, VertexBufferLayout,
};

/// Opaque handle for a window claimed via [`Device::claim_window`]. Stable
/// across `SetSwapchainParameters` reconfiguration of the same window.
pub type WindowId = u64;

struct ClaimedWindow {
    surface: Arc<vulkan::Surface>,
    format: TextureFormat,
    usage: TextureUsages,
    present_mode: vk::PresentModeKHR,
}

/// `Device`: process-wide handle owning physical/logical device,
/// queue, allocator, caches, pools, and claimed-window list.
pub struct Device {
    instance: vulkan::Instance,
    hal: vulkan::Device,
    queue: Mutex<vulkan::Queue>,
    encoder: vulkan::CommandEncoder,
    fence_pool: Mutex<vulkan::CommandFencePool>,
    windows: Mutex<HashMap<WindowId, ClaimedWindow>>,
    next_window_id: AtomicU64,
    backend: Backend,
    limits: DeviceLimits,
}

impl Device {
    /// `CreateDevice(preferred_backends_mask, debug_mode)`:
    /// selects a backend (honoring `REFRESH_HINT_BACKEND`), creates the
    /// `VkInstance`, enumerates adapters in discrete-GPU-first order, and
    /// opens the first one that reports a working driver.
    pub fn create_device(preferred: BackendPreference, debug_mode: bool) -> Option<Self> {
        let backend = match select_backend(preferred) {
            Ok(backend) => backend,
            Err(err) => {
                log_create_failure("create_device: backend selection", err);
                return None;
            }
        };
        debug_assert_eq!(backend, Backend::Vulkan, "only the Vulkan backend is implemented");

        unsafe {
            let instance = match vulkan::Instance::new("gfx", debug_mode) {
                Ok(instance) => instance,
                Err(err) => {
                    log_create_failure("create_device: instance creation", err);
                    return None;
                }
            };
            let adapters = match instance.enumerate_adapters() {
                Ok(adapters) => adapters,
                Err(err) => {
                    log_create_failure("create_device: adapter enumeration", err);
                    return None;
                }
            };
            let adapter = adapters
                .into_iter()
                .find(|adapter| unsafe { adapter.is_viable() });
            let Some(adapter) = adapter else {
                log_misuse("create_device", "no adapter reported a working driver");
                return None;
            };
            let limits = adapter.private_capabilities().device_limits();
            let (hal, queue) = match adapter.open(debug_mode) {
                Ok(pair) => pair,
                Err(err) => {
                    log_create_failure("create_device: logical device creation", err);
                    return None;
                }
            };
            let encoder = hal.create_command_encoder();

            Some(Self {
                instance,
                hal,
                queue: Mutex::new(queue),
                encoder,
                fence_pool: Mutex::new(vulkan::CommandFencePool::new()),
                windows: Mutex::new(HashMap::new()),
                next_window_id: AtomicU64::new(1),
                backend,
                limits,
            })
        }
    }

    pub fn get_backend(&self) -> Backend {
        self.backend
    }

    pub(crate) fn hal(&self) -> &vulkan::Device {
        &self.hal
    }

    pub(crate) fn queue(&self) -> &Mutex<vulkan::Queue> {
        &self.queue
    }

    pub(crate) fn encoder(&self) -> &vulkan::CommandEncoder {
        &self.encoder
    }

    pub(crate) fn fence_pool(&self) -> &Mutex<vulkan::CommandFencePool> {
        &self.fence_pool
    }

    /// `Wait`: blocks until every submitted command buffer retires.
    pub fn wait(&self) -> bool {
        match unsafe { self.hal.wait_idle() } {
            Ok(()) => true,
            Err(err) => {
                log_create_failure("wait", err);
                false
            }
        }
    }

    /// `QueryFence`: tri-state rather than a bare bool so a driver
    /// error doesn't read the same as "not yet signaled".
    pub fn query_fence(&self, fence: &vulkan::Fence, target: FenceValue) -> FenceState {
        FenceState::from_query(unsafe { self.hal.fence_value(fence) }.map(|value| value >= target))
    }

    /// `WaitForFences`: polls [`hal::vulkan::Device::maintain_fence`] until
    /// every fence's latest completed value reaches `value`, or `timeout`
    /// elapses.
    pub fn wait_for_fences(
        &self,
        fences: &mut [(&mut vulkan::Fence, FenceValue)],
        timeout: std::time::Duration,
    ) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        loop {
            let mut all_done = true;
            for (fence, target) in fences.iter_mut() {
                unsafe {
                    if let Err(err) = self.hal.maintain_fence(fence) {
                        log_create_failure("wait_for_fences", err);
                        return false;
                    }
                    match self.hal.fence_value(fence) {
                        Ok(value) if value >= *target => {}
                        Ok(_) => all_done = false,
                        Err(err) => {
                            log_create_failure("wait_for_fences", err);
                            return false;
                        }
                    }
                }
            }
            if all_done {
                return true;
            }
            if std::time::Instant::now() >= deadline {
                return false;
            }
            std::thread::yield_now();
        }
    }

    /// `ReleaseFence`: hands a client-visible `VkFence` obtained from
    /// `SubmitAndAcquireFence` back to the pool it was drawn from.
    pub fn release_fence(&self, fence: vk::Fence) {
        self.fence_pool.lock().release(fence);
    }

    // ---- Resources (Create*/Release*/Set*Name) ----

    pub fn create_buffer(&self, desc: &BufferDescriptor<'_>) -> Option<Buffer> {
        match unsafe { self.hal.create_buffer(desc) } {
            Ok(buffer) => Some(buffer),
            Err(err) => {
                log_create_failure("create_buffer", err);
                None
            }
        }
    }

    pub fn release_buffer(&self, buffer: Buffer) {
        unsafe { self.hal.destroy_buffer(buffer) }
    }

    pub fn create_transfer_buffer(&self, size: u64, name: Option<&str>) -> Option<Buffer> {
        match unsafe { self.hal.create_transfer_buffer(size, name) } {
            Ok(buffer) => Some(buffer),
            Err(err) => {
                log_create_failure("create_transfer_buffer", err);
                None
            }
        }
    }

    pub fn create_texture(&self, desc: &TextureDescriptor<'_>) -> Option<Texture> {
        match unsafe { self.hal.create_texture(desc) } {
            Ok(texture) => Some(texture),
            Err(err) => {
                log_create_failure("create_texture", err);
                None
            }
        }
    }

    pub fn release_texture(&self, texture: Texture) {
        unsafe { self.hal.destroy_texture(texture) }
    }

    pub fn create_sampler(&self, info: &vk::SamplerCreateInfo) -> Option<Sampler> {
        match unsafe { self.hal.create_sampler(info) } {
            Ok(sampler) => Some(sampler),
            Err(err) => {
                log_create_failure("create_sampler", err);
                None
            }
        }
    }

    pub fn release_sampler(&self, sampler: Sampler) {
        unsafe { self.hal.destroy_sampler(sampler) }
    }

    /// `CreateShader`: SPIR-V only, same as the underlying HAL entry
    /// point -- this crate never cross-compiles shaders itself; that's a
    /// frontend-only concern.
    pub fn create_shader(&self, spirv: &[u32]) -> Option<ShaderModule> {
        match unsafe { self.hal.create_shader_module(spirv) } {
            Ok(module) => Some(module),
            Err(err) => {
                log_create_failure("create_shader", err);
                None
            }
        }
    }

    pub fn release_shader(&self, module: ShaderModule) {
        unsafe { self.hal.destroy_shader_module(module) }
    }

    fn get_or_create_pipeline_layout(
        &self,
        bindings: Vec<BindingDescriptor>,
    ) -> Result<vulkan::PipelineLayout, DeviceError> {
        let entry = unsafe { self.hal.get_or_create_descriptor_set_layout(bindings)? };
        let empty = unsafe {
            self.hal
                .get_or_create_descriptor_set_layout(Vec::new())?
        };
        let set_layouts = std::array::from_fn(|i| if i == 0 { entry.clone() } else { empty.clone() });
        unsafe { self.hal.get_or_create_pipeline_layout(set_layouts) }
    }

    /// `CreateGraphicsPipeline`. `bindings` describes the one
    /// resource-binding slot this crate's simplified binding model supports
    /// per pipeline (see [`Self::create_bind_group`]); the per-stage
    /// uniform-block size comes from the device's minimum UBO alignment.
    pub fn create_graphics_pipeline(
        &self,
        bindings: Vec<BindingDescriptor>,
        desc: &GraphicsPipelineDescriptor<'_>,
    ) -> Option<RenderPipeline> {
        let layout = match self.get_or_create_pipeline_layout(bindings) {
            Ok(layout) => layout,
            Err(err) => {
                log_create_failure("create_graphics_pipeline: layout", err);
                return None;
            }
        };
        let mut desc = GraphicsPipelineDescriptor {
            layout: layout.raw,
            uniform_block_size: self.limits.align_uniform_offset(desc.uniform_block_size),
            ..*desc
        };
        desc.layout = layout.raw;
        match unsafe { hal::vulkan::create_graphics_pipeline(self.hal.raw(), &desc) } {
            Ok(pipeline) => Some(pipeline),
            Err(err) => {
                log_create_failure("create_graphics_pipeline", err);
                None
            }
        }
    }

    pub fn create_compute_pipeline(
        &self,
        bindings: Vec<BindingDescriptor>,
        module: &ShaderModule,
        entry_point: &std::ffi::CStr,
        uniform_block_size: u64,
    ) -> Option<ComputePipeline> {
        let layout = match self.get_or_create_pipeline_layout(bindings) {
            Ok(layout) => layout,
            Err(err) => {
                log_create_failure("create_compute_pipeline: layout", err);
                return None;
            }
        };
        let raw_module = match module {
            hal::vulkan::ShaderModule::Raw(raw) => *raw,
        };
        match unsafe {
            hal::vulkan::create_compute_pipeline(
                self.hal.raw(),
                layout.raw,
                raw_module,
                entry_point,
                self.limits.align_uniform_offset(uniform_block_size),
            )
        } {
            Ok(pipeline) => Some(pipeline),
            Err(err) => {
                log_create_failure("create_compute_pipeline", err);
                None
            }
        }
    }

    pub fn create_occlusion_query(&self) -> OcclusionQuery {
        unsafe { self.hal.create_occlusion_query() }
    }

    pub fn release_occlusion_query(&self, query: OcclusionQuery) {
        unsafe { self.hal.release_occlusion_query(query) }
    }

    pub fn set_buffer_name(&self, buffer: &Buffer, name: &str) {
        unsafe { self.hal.set_buffer_name(buffer, name) }
    }

    pub fn set_texture_name(&self, texture: &Texture, name: &str) {
        unsafe { self.hal.set_texture_name(texture, name) }
    }

    pub fn set_string_marker(&self, cmd: &vulkan::CommandBuffer, marker: &str) {
        unsafe { self.hal.set_string_marker(cmd.raw(), marker) }
    }

    /// Resource-binding entry point for the simplified single-dynamic-slot
    /// model this crate exposes per pipeline (a `BindGroup`/`BindGroupLayout`
    /// scoped down from the full sampler/storage-texture/storage-buffer
    /// binding surface of the `Bind*StorageTextures`/`Bind*StorageBuffers`
    /// family, which a future binding-model expansion would restore).
    pub fn create_bind_group(
        &self,
        layout: &Arc<DescriptorSetLayoutEntry>,
        build_writes: impl FnOnce(vk::DescriptorSet) -> Vec<vk::WriteDescriptorSet>,
    ) -> Option<BindGroup> {
        match unsafe { self.hal.create_bind_group(layout, build_writes) } {
            Ok(group) => Some(group),
            Err(err) => {
                log_create_failure("create_bind_group", err);
                None
            }
        }
    }

    pub fn release_bind_group(&self, group: BindGroup) {
        unsafe { self.hal.release_bind_group(group) }
    }

    // ---- Transfer ----

    pub fn map_transfer_buffer(&self, buffer: &Buffer) -> Option<std::ptr::NonNull<u8>> {
        unsafe { self.hal.map_transfer_buffer(buffer) }
    }

    pub fn unmap_transfer_buffer(&self, buffer: &Buffer) {
        unsafe { self.hal.unmap_transfer_buffer(buffer) }
    }

    pub fn set_transfer_data(&self, buffer: &mut Buffer, data: &[u8], dst_offset: u64, cycle: bool) -> bool {
        match unsafe { self.hal.set_transfer_data(buffer, data, dst_offset, cycle) } {
            Ok(()) => true,
            Err(err) => {
                log_create_failure("set_transfer_data", err);
                false
            }
        }
    }

    pub fn get_transfer_data(&self, buffer: &Buffer, src_offset: u64, dst: &mut [u8]) {
        unsafe { self.hal.get_transfer_data(buffer, src_offset, dst) }
    }

    // ---- Command recording ----

    /// `AcquireCommandBuffer`: fetches (creating on first use) the
    /// calling thread's pool, via `FetchCommandPool`.
    pub fn acquire_command_buffer(&self) -> Option<vulkan::CommandBuffer> {
        match unsafe { self.encoder.acquire(self.hal.raw()) } {
            Ok(buffer) => Some(buffer),
            Err(err) => {
                log_create_failure("acquire_command_buffer", err);
                None
            }
        }
    }

    pub fn push_uniform_data(
        &self,
        stage: UniformStage,
        data: &[u8],
    ) -> Option<(vk::DescriptorSet, u32)> {
        match unsafe { self.hal.push_uniform_data(stage, data) } {
            Ok(result) => Some(result),
            Err(err) => {
                log_create_failure("push_uniform_data", err);
                None
            }
        }
    }

    /// `Submit`: ends recording, submits, and tracks the buffer for
    /// later cleanup. Retired swapchains are told their in-flight frame
    /// finished.
    pub fn submit(&self, command_buffer: vulkan::CommandBuffer, surface_textures: &[&vulkan::SurfaceTexture]) -> bool {
        let queue = self.queue.lock();
        let mut fence_pool = self.fence_pool.lock();
        let result = unsafe {
            self.encoder.with_current_pool(self.hal.raw(), |pool| {
                queue.submit_and_track(command_buffer, surface_textures, &mut fence_pool, pool)
            })
        };
        match result {
            Ok(()) => {
                self.retire_presented_windows();
                true
            }
            Err(err) => {
                log_create_failure("submit", err);
                false
            }
        }
    }

    /// `SubmitAndAcquireFence → Fence`: as [`Self::submit`], but hands
    /// the client-visible `VkFence` back instead of auto-releasing it.
    pub fn submit_and_acquire_fence(
        &self,
        command_buffer: vulkan::CommandBuffer,
        surface_textures: &[&vulkan::SurfaceTexture],
    ) -> Option<vk::Fence> {
        let queue = self.queue.lock();
        let mut fence_pool = self.fence_pool.lock();
        let result = unsafe {
            self.encoder.with_current_pool(self.hal.raw(), |pool| {
                queue.submit_and_acquire_fence(command_buffer, surface_textures, &mut fence_pool, pool)
            })
        };
        match result {
            Ok(fence) => {
                self.retire_presented_windows();
                Some(fence)
            }
            Err(err) => {
                log_create_failure("submit_and_acquire_fence", err);
                None
            }
        }
    }

    fn retire_presented_windows(&self) {
        for window in self.windows.lock().values() {
            window.surface.note_frame_retired();
        }
    }

    // ---- Windows ----

    pub fn supports_swapchain_composition(&self, _format: TextureFormat) -> bool {
        true
    }

    pub fn supports_present_mode(&self, present_mode: vk::PresentModeKHR) -> bool {
        matches!(
            present_mode,
            vk::PresentModeKHR::FIFO | vk::PresentModeKHR::IMMEDIATE | vk::PresentModeKHR::MAILBOX
        )
    }

    /// `ClaimWindow(window, composition, present_mode)`: creates the
    /// native surface via the windowing-system collaborator and configures
    /// its first swapchain.
    pub fn claim_window(
        &self,
        window: &(impl HasWindowHandle + HasDisplayHandle),
        format: TextureFormat,
        usage: TextureUsages,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
    ) -> Option<WindowId> {
        let display_handle = window.display_handle().ok()?.as_raw();
        let window_handle = window.window_handle().ok()?.as_raw();
        let surface = unsafe {
            match self.instance.create_surface(display_handle, window_handle) {
                Ok(raw) => {
                    let functor = ash::extensions::khr::Surface::new(self.instance.entry(), self.instance.raw());
                    vulkan::Surface::new(raw, functor)
                }
                Err(err) => {
                    log_create_failure("claim_window: surface creation", err);
                    return None;
                }
            }
        };

        if let Err(err) = self.configure_swapchain(&surface, format, usage, present_mode, extent) {
            log_surface_failure("claim_window: swapchain configuration", err);
            return None;
        }

        let id = self.next_window_id.fetch_add(1, Ordering::Relaxed);
        self.windows.lock().insert(
            id,
            ClaimedWindow {
                surface,
                format,
                usage,
                present_mode,
            },
        );
        Some(id)
    }

    pub fn unclaim_window(&self, window: WindowId) {
        if let Some(claimed) = self.windows.lock().remove(&window) {
            unsafe { claimed.surface.unconfigure(self.hal.raw()) };
        }
    }

    /// `SetSwapchainParameters`: reconfigures an already-claimed
    /// window's swapchain in place (format/usage/present-mode/extent
    /// change, e.g. after a window resize).
    pub fn set_swapchain_parameters(
        &self,
        window: WindowId,
        format: TextureFormat,
        usage: TextureUsages,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
    ) -> bool {
        let mut windows = self.windows.lock();
        let Some(claimed) = windows.get_mut(&window) else {
            log_misuse("set_swapchain_parameters", "window was not claimed");
            return false;
        };
        match self.configure_swapchain(&claimed.surface, format, usage, present_mode, extent) {
            Ok(()) => {
                claimed.format = format;
                claimed.usage = usage;
                claimed.present_mode = present_mode;
                true
            }
            Err(err) => {
                log_surface_failure("set_swapchain_parameters", err);
                false
            }
        }
    }

    fn configure_swapchain(
        &self,
        surface: &vulkan::Surface,
        format: TextureFormat,
        usage: TextureUsages,
        present_mode: vk::PresentModeKHR,
        extent: vk::Extent2D,
    ) -> Result<(), SurfaceError> {
        let vk_format = hal::vulkan::conv::map_texture_format(format);
        let vk_usage = hal::vulkan::conv::map_texture_usage(usage);
        let swapchain_ext = ash::extensions::khr::Swapchain::new(self.instance.raw(), self.hal.raw());
        unsafe {
            surface.configure(self.hal.raw(), |old| {
                let old_raw = old.as_ref().map(vulkan::Swapchain::raw).unwrap_or(vk::SwapchainKHR::null());
                let info = vk::SwapchainCreateInfoKHR::builder()
                    .surface(surface.raw())
                    .min_image_count(hal::vulkan::MAX_FRAMES_IN_FLIGHT)
                    .image_format(vk_format)
                    .image_color_space(vk::ColorSpaceKHR::SRGB_NONLINEAR)
                    .image_extent(extent)
                    .image_array_layers(1)
                    .image_usage(vk_usage)
                    .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
                    .pre_transform(vk::SurfaceTransformFlagsKHR::IDENTITY)
                    .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
                    .present_mode(present_mode)
                    .clipped(true)
                    .old_swapchain(old_raw);
                let raw = swapchain_ext.create_swapchain(&info, None)?;
                let images = swapchain_ext.get_swapchain_images(raw)?;
                let mut image_views = Vec::with_capacity(images.len());
                for &image in &images {
                    let view_info = vk::ImageViewCreateInfo::builder()
                        .image(image)
                        .view_type(vk::ImageViewType::TYPE_2D)
                        .format(vk_format)
                        .subresource_range(vk::ImageSubresourceRange {
                            aspect_mask: vk::ImageAspectFlags::COLOR,
                            base_mip_level: 0,
                            level_count: 1,
                            base_array_layer: 0,
                            layer_count: 1,
                        });
                    image_views.push(self.hal.raw().create_image_view(&view_info, None)?);
                }
                let config = vulkan::SwapchainConfig {
                    extent,
                    format,
                    usage,
                    present_mode,
                    image_count: images.len() as u32,
                };
                vulkan::Swapchain::new(swapchain_ext.clone(), raw, images, image_views, &config, self.hal.raw())
            })
        }
    }

    pub fn get_swapchain_texture_format(&self, window: WindowId) -> Option<TextureFormat> {
        self.windows.lock().get(&window).map(|claimed| claimed.format)
    }

    /// `AcquireSwapchainTexture(cmd, window, &w, &h)`: attaches the
    /// acquire/render-finished semaphores to `cmd` so the subsequent
    /// `Submit` waits on and signals them, and a following `present` call
    /// (driven by the caller's `Queue`, via [`Self::present_window`]) can
    /// find the acquired swapchain.
    pub fn acquire_swapchain_texture(
        &self,
        cmd: &mut vulkan::CommandBuffer,
        window: WindowId,
    ) -> Option<(vulkan::SurfaceTexture, u32, u32)> {
        let windows = self.windows.lock();
        let claimed = windows.get(&window)?;
        match unsafe { claimed.surface.acquire_texture(self.hal.raw(), None) } {
            Ok(Some(texture)) => {
                cmd.attach_swapchain_acquire(texture.wait_semaphore, texture.render_finished_semaphore);
                let active = texture.container.active();
                let (width, height) = (active.width, active.height);
                Some((texture, width, height))
            }
            Ok(None) => None,
            Err(err) => {
                log_surface_failure("acquire_swapchain_texture", err);
                None
            }
        }
    }

    pub fn present_window(&self, window: WindowId, texture: vulkan::SurfaceTexture) -> bool {
        let windows = self.windows.lock();
        let Some(claimed) = windows.get(&window) else {
            log_misuse("present_window", "window was not claimed");
            return false;
        };
        match unsafe { self.queue.lock().present(&claimed.surface, texture) } {
            Ok(()) => true,
            Err(err) => {
                log_surface_failure("present_window", err);
                false
            }
        }
    }

    // ---- Capabilities ----

    pub fn is_texture_format_supported(&self, format: TextureFormat) -> bool {
        match format {
            TextureFormat::Depth24Plus => self.limits.texture_d24_supported,
            TextureFormat::Depth24PlusStencil8 => self.limits.texture_d24_s8_supported,
            TextureFormat::Depth32Float => self.limits.texture_d32_supported,
            TextureFormat::Depth32FloatStencil8 => self.limits.texture_d32_s8_supported,
            _ => true,
        }
    }

    pub fn get_best_sample_count(&self, desired: u32) -> u32 {
        desired.min(8).next_power_of_two().clamp(1, 8)
    }

    pub fn texture_format_texel_block_size(&self, format: TextureFormat) -> u32 {
        format.texel_block_size()
    }

    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        for (_, claimed) in self.windows.get_mut().drain() {
            unsafe { claimed.surface.unconfigure(self.hal.raw()) };
        }
    }
}
