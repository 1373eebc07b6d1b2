/*!
# Vulkan GPU abstraction frontend.

This crate is the public facade over `hal`'s Vulkan backend: device
creation and backend selection, resource creation/release, pipeline and
bind-group creation, command buffer acquisition and submission, and
claimed-window/swapchain management. Every entry point here trades `hal`'s
`Result`-based error plumbing for a null/zero/bool/logged-warning contract,
so nothing panics on a recoverable driver condition.

## Layering

`device` owns the `Device` facade and re-exports the resource/pipeline
types callers construct against it from `hal::vulkan`. `dispatch` picks
which backend `Device::create_device` opens. `error` holds the shared
logging/conversion helpers both of those modules use to turn a `DeviceError`
into the public contract.
!*/

mod device;
mod dispatch;
mod error;

pub use device::{
    BindGroup, BindingDescriptor, Buffer, BufferDescriptor, ColorTargetState, ComputePipeline,
    DescriptorSetLayoutEntry, Device, GraphicsPipelineDescriptor, OcclusionQuery,
    PrimitiveTopology, RenderPipeline, Sampler, ShaderModule, Texture, TextureDescriptor,
    TextureView, UniformStage, VertexAttribute, VertexBufferLayout, WindowId,
};
pub use dispatch::{BackendPreference, BACKEND_OVERRIDE_ENV};
pub use error::FenceState;
