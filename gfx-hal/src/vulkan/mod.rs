//! Vulkan backend internals.
//!
//! ## Stack memory
//!
//! Ash expects slices, which call sites don't generally have lying around.
//! We cope with this by a combination of: temporarily heap-allocating a
//! `Vec` where the overhead is acceptable, growing scratch storage kept on
//! `Temp`, and `ArrayVec`/`SmallVec` where the bound is known up front.
//!
//! ## Framebuffers and render passes
//!
//! Render passes are cached on the device and kept forever: the
//! format/op/sample-count/layout tuple space is small relative to frame
//! count. Framebuffers are cached too, but evicted whenever one of their
//! image views is destroyed.
//!
//! ## Fences
//!
//! If timeline semaphores are available they're used 1:1 with [`Fence`].
//! Otherwise a pool of `VkFence` objects sits behind each `Fence`.
//!
//! Only one backend is in scope here, so unlike the multi-backend workspace
//! this crate's conventions descend from, there's no `Api` trait threading
//! associated types through every call site -- `Instance`, `Adapter`,
//! `Device`, `Queue` and friends are concrete types used directly.

mod adapter;
mod allocator;
mod barrier;
mod command;
pub mod conv;
mod defrag;
mod descriptor;
mod device;
mod fence;
mod instance;
mod pipeline;
mod queue;
mod render_pass;
mod resource;
mod surface;

use std::ffi::CStr;
use std::sync::atomic::AtomicIsize;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

pub use allocator::{BindPreferences, DeviceAllocator};
pub use command::{CommandBuffer, CommandEncoder, CommandPool};
pub use descriptor::{
    BindGroup, BindGroupLayout, BindingDescriptor, DescriptorSetCache, DescriptorSetLayoutEntry,
    UniformBufferPool, UniformStage,
};
pub use device::{BufferDescriptor, TextureDescriptor};
pub use fence::{CommandFencePool, Fence};
pub use pipeline::{
    create_compute_pipeline, create_graphics_pipeline, ColorTargetState, ComputePipeline,
    GraphicsPipelineDescriptor, PipelineLayout, PrimitiveTopology, RenderPipeline, ShaderModule,
    VertexAttribute, VertexBufferLayout,
};
pub use render_pass::{FramebufferKey, RenderPassKey};
pub use resource::{Buffer, OcclusionQuery, QuerySet, Sampler, Texture, TextureSlice, TextureView};
pub use surface::{Surface, SurfaceTexture, Swapchain, SwapchainConfig, MAX_FRAMES_IN_FLIGHT};

pub(crate) const MAX_TOTAL_ATTACHMENTS: usize = crate::MAX_COLOR_ATTACHMENTS * 2 + 1;

struct DebugUtils {
    extension: ash::extensions::ext::DebugUtils,
    messenger: vk::DebugUtilsMessengerEXT,
}

pub struct InstanceShared {
    raw: ash::Instance,
    entry: ash::Entry,
    extensions: Vec<&'static CStr>,
    debug_utils: Option<DebugUtils>,
    instance_api_version: u32,
}

impl Drop for InstanceShared {
    fn drop(&mut self) {
        unsafe {
            if let Some(du) = self.debug_utils.take() {
                du.extension
                    .destroy_debug_utils_messenger(du.messenger, None);
            }
            self.raw.destroy_instance(None);
        }
    }
}

pub struct Instance {
    shared: Arc<InstanceShared>,
}

/// Set of internal capabilities that don't show up in the exposed device
/// geometry but affect which code paths get taken: depth-format
/// autopromotion and the device limits reported to the caller.
#[derive(Clone, Debug, Default)]
pub struct PrivateCapabilities {
    pub imageless_framebuffers: bool,
    pub timeline_semaphores: bool,
    pub texture_d24: bool,
    pub texture_d24_s8: bool,
    pub texture_d32: bool,
    pub texture_d32_s8: bool,
    pub non_coherent_atom_size: u64,
    pub min_uniform_buffer_offset_alignment: u64,
    pub max_color_attachments: u32,
    pub timestamp_period: f32,
}

impl PrivateCapabilities {
    pub fn device_limits(&self) -> gfxt::DeviceLimits {
        gfxt::DeviceLimits {
            min_uniform_buffer_offset_alignment: self.min_uniform_buffer_offset_alignment,
            non_coherent_atom_size: self.non_coherent_atom_size,
            max_color_attachments: self.max_color_attachments,
            timestamp_period: self.timestamp_period,
            texture_d24_supported: self.texture_d24,
            texture_d24_s8_supported: self.texture_d24_s8,
            texture_d32_supported: self.texture_d32,
            texture_d32_s8_supported: self.texture_d32_s8,
        }
    }
}

pub struct Adapter {
    raw: vk::PhysicalDevice,
    instance: Arc<InstanceShared>,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
    queue_family_index: u32,
    private_caps: PrivateCapabilities,
}

struct DeviceExtensionFunctions {
    timeline_semaphore: Option<ash::extensions::khr::TimelineSemaphore>,
}

pub(crate) struct DeviceShared {
    raw: ash::Device,
    family_index: u32,
    queue_index: u32,
    raw_queue: vk::Queue,
    instance: Arc<InstanceShared>,
    physical_device: vk::PhysicalDevice,
    extension_fns: DeviceExtensionFunctions,
    private_caps: PrivateCapabilities,
    render_passes: Mutex<crate::FastHashMap<RenderPassKey, vk::RenderPass>>,
    framebuffers: Mutex<crate::FastHashMap<FramebufferKey, vk::Framebuffer>>,
    descriptor_set_layouts:
        Mutex<crate::FastHashMap<descriptor::LayoutKey, Arc<descriptor::DescriptorSetLayoutEntry>>>,
    pipeline_layouts: Mutex<crate::FastHashMap<pipeline::PipelineLayoutKey, vk::PipelineLayout>>,
}

/// Public device handle. The memory and descriptor allocators sit
/// behind their own mutexes, separate from the render-pass/framebuffer
/// caches on `DeviceShared`, since they're mutated far more often and from
/// more call sites (every resource create/destroy) than the caches are.
pub struct Device {
    shared: Arc<DeviceShared>,
    mem_allocator: Mutex<DeviceAllocator>,
    desc_allocator:
        Mutex<gpu_descriptor::DescriptorAllocator<vk::DescriptorPool, vk::DescriptorSet>>,
    uniform_pool: Mutex<UniformBufferPool>,
}

pub struct Queue {
    raw: vk::Queue,
    swapchain_fn: ash::extensions::khr::Swapchain,
    device: Arc<DeviceShared>,
    family_index: u32,
    /// A chain of two semaphores relays the signal from a submission to the
    /// following present, since reusing a single semaphore both ways hangs
    /// on some drivers.
    relay_semaphores: [vk::Semaphore; 2],
    relay_index: AtomicIsize,
}

/// Scratch allocation recycling pool threaded through one [`CommandEncoder`].
/// Cleared and reused across passes instead of reallocating.
#[derive(Default)]
pub(crate) struct Temp {
    marker: Vec<u8>,
    buffer_barriers: Vec<vk::BufferMemoryBarrier>,
    image_barriers: Vec<vk::ImageMemoryBarrier>,
}

unsafe impl Send for Temp {}
unsafe impl Sync for Temp {}

impl Temp {
    fn clear(&mut self) {
        self.marker.clear();
        self.buffer_barriers.clear();
        self.image_barriers.clear();
    }

    fn make_c_str(&mut self, name: &str) -> &CStr {
        self.marker.clear();
        self.marker.extend_from_slice(name.as_bytes());
        self.marker.push(0);
        unsafe { CStr::from_bytes_with_nul_unchecked(&self.marker) }
    }
}
