//! Conversions between the backend-agnostic `gfxt` types and their native
//! `ash::vk` counterparts. Kept as a single table-lookup module so every
//! other file in `vulkan/` converts through one place instead of growing
//! ad-hoc `match` arms at each call site.

use ash::vk;
use gfxt::{
    AccessIntent, BufferUsages, ImageLayout, PipelineStages, SampleCount, TextureAspect,
    TextureFormat, TextureUsages,
};

pub fn map_texture_format(format: TextureFormat) -> vk::Format {
    use TextureFormat as Tf;
    match format {
        Tf::R8Unorm => vk::Format::R8_UNORM,
        Tf::Rg8Unorm => vk::Format::R8G8_UNORM,
        Tf::Rgba8Unorm => vk::Format::R8G8B8A8_UNORM,
        Tf::Rgba8UnormSrgb => vk::Format::R8G8B8A8_SRGB,
        Tf::Bgra8Unorm => vk::Format::B8G8R8A8_UNORM,
        Tf::Bgra8UnormSrgb => vk::Format::B8G8R8A8_SRGB,
        Tf::R16Float => vk::Format::R16_SFLOAT,
        Tf::Rg16Float => vk::Format::R16G16_SFLOAT,
        Tf::Rgba16Float => vk::Format::R16G16B16A16_SFLOAT,
        Tf::R32Float => vk::Format::R32_SFLOAT,
        Tf::Rg32Float => vk::Format::R32G32_SFLOAT,
        Tf::Rgba32Float => vk::Format::R32G32B32A32_SFLOAT,
        Tf::R32Uint => vk::Format::R32_UINT,
        Tf::Rgba32Uint => vk::Format::R32G32B32A32_UINT,
        Tf::Depth16Unorm => vk::Format::D16_UNORM,
        Tf::Depth24Plus => vk::Format::X8_D24_UNORM_PACK32,
        Tf::Depth24PlusStencil8 => vk::Format::D24_UNORM_S8_UINT,
        Tf::Depth32Float => vk::Format::D32_SFLOAT,
        Tf::Depth32FloatStencil8 => vk::Format::D32_SFLOAT_S8_UINT,
    }
}

pub fn map_aspect(aspect: TextureAspect) -> vk::ImageAspectFlags {
    match aspect {
        TextureAspect::Color => vk::ImageAspectFlags::COLOR,
        TextureAspect::Depth => vk::ImageAspectFlags::DEPTH,
        TextureAspect::Stencil => vk::ImageAspectFlags::STENCIL,
        TextureAspect::DepthStencil => vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL,
    }
}

pub fn map_sample_count(count: SampleCount) -> vk::SampleCountFlags {
    match count {
        SampleCount::X1 => vk::SampleCountFlags::TYPE_1,
        SampleCount::X2 => vk::SampleCountFlags::TYPE_2,
        SampleCount::X4 => vk::SampleCountFlags::TYPE_4,
        SampleCount::X8 => vk::SampleCountFlags::TYPE_8,
    }
}

pub fn map_buffer_usage(usage: BufferUsages) -> vk::BufferUsageFlags {
    let mut flags = vk::BufferUsageFlags::empty();
    if usage.contains(BufferUsages::VERTEX) {
        flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
    }
    if usage.contains(BufferUsages::INDEX) {
        flags |= vk::BufferUsageFlags::INDEX_BUFFER;
    }
    if usage.contains(BufferUsages::INDIRECT) {
        flags |= vk::BufferUsageFlags::INDIRECT_BUFFER;
    }
    if usage.contains(BufferUsages::UNIFORM) {
        flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
    }
    if usage.intersects(BufferUsages::GRAPHICS_STORAGE_READ | BufferUsages::COMPUTE_STORAGE_READ)
    {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsages::COMPUTE_STORAGE_WRITE) {
        flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
    }
    if usage.contains(BufferUsages::TRANSFER_SRC) {
        flags |= vk::BufferUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(BufferUsages::TRANSFER_DST) {
        flags |= vk::BufferUsageFlags::TRANSFER_DST;
    }
    flags
}

pub fn map_texture_usage(usage: TextureUsages) -> vk::ImageUsageFlags {
    let mut flags = vk::ImageUsageFlags::empty();
    if usage.contains(TextureUsages::SAMPLER) {
        flags |= vk::ImageUsageFlags::SAMPLED;
    }
    if usage.contains(TextureUsages::COLOR_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
    }
    if usage.contains(TextureUsages::DEPTH_STENCIL_ATTACHMENT) {
        flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
    }
    if usage.intersects(
        TextureUsages::GRAPHICS_STORAGE_READ
            | TextureUsages::COMPUTE_STORAGE_READ
            | TextureUsages::COMPUTE_STORAGE_WRITE
            | TextureUsages::COMPUTE_STORAGE_SIMULTANEOUS_READ_WRITE,
    ) {
        flags |= vk::ImageUsageFlags::STORAGE;
    }
    if usage.contains(TextureUsages::TRANSFER_SRC) {
        flags |= vk::ImageUsageFlags::TRANSFER_SRC;
    }
    if usage.contains(TextureUsages::TRANSFER_DST) {
        flags |= vk::ImageUsageFlags::TRANSFER_DST;
    }
    flags
}

pub fn map_stage_mask(stages: PipelineStages) -> vk::PipelineStageFlags {
    let mut flags = vk::PipelineStageFlags::empty();
    if stages.contains(PipelineStages::TOP_OF_PIPE) {
        flags |= vk::PipelineStageFlags::TOP_OF_PIPE;
    }
    if stages.contains(PipelineStages::DRAW_INDIRECT) {
        flags |= vk::PipelineStageFlags::DRAW_INDIRECT;
    }
    if stages.contains(PipelineStages::VERTEX_INPUT) {
        flags |= vk::PipelineStageFlags::VERTEX_INPUT;
    }
    if stages.contains(PipelineStages::VERTEX_SHADER) {
        flags |= vk::PipelineStageFlags::VERTEX_SHADER;
    }
    if stages.contains(PipelineStages::FRAGMENT_SHADER) {
        flags |= vk::PipelineStageFlags::FRAGMENT_SHADER;
    }
    if stages.contains(PipelineStages::EARLY_FRAGMENT_TESTS) {
        flags |= vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS;
    }
    if stages.contains(PipelineStages::LATE_FRAGMENT_TESTS) {
        flags |= vk::PipelineStageFlags::LATE_FRAGMENT_TESTS;
    }
    if stages.contains(PipelineStages::COLOR_ATTACHMENT_OUTPUT) {
        flags |= vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT;
    }
    if stages.contains(PipelineStages::COMPUTE_SHADER) {
        flags |= vk::PipelineStageFlags::COMPUTE_SHADER;
    }
    if stages.contains(PipelineStages::TRANSFER) {
        flags |= vk::PipelineStageFlags::TRANSFER;
    }
    if stages.contains(PipelineStages::HOST) {
        flags |= vk::PipelineStageFlags::HOST;
    }
    if stages.contains(PipelineStages::BOTTOM_OF_PIPE) {
        flags |= vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }
    flags
}

pub fn map_access_mask(access: gfxt::AccessFlags) -> vk::AccessFlags {
    use gfxt::AccessFlags as A;
    let mut flags = vk::AccessFlags::empty();
    let table: &[(A, vk::AccessFlags)] = &[
        (A::INDIRECT_COMMAND_READ, vk::AccessFlags::INDIRECT_COMMAND_READ),
        (A::INDEX_READ, vk::AccessFlags::INDEX_READ),
        (A::VERTEX_ATTRIBUTE_READ, vk::AccessFlags::VERTEX_ATTRIBUTE_READ),
        (A::UNIFORM_READ, vk::AccessFlags::UNIFORM_READ),
        (A::SHADER_READ, vk::AccessFlags::SHADER_READ),
        (A::SHADER_WRITE, vk::AccessFlags::SHADER_WRITE),
        (
            A::COLOR_ATTACHMENT_READ,
            vk::AccessFlags::COLOR_ATTACHMENT_READ,
        ),
        (
            A::COLOR_ATTACHMENT_WRITE,
            vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ),
        (
            A::DEPTH_STENCIL_ATTACHMENT_READ,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ),
        (
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (A::TRANSFER_READ, vk::AccessFlags::TRANSFER_READ),
        (A::TRANSFER_WRITE, vk::AccessFlags::TRANSFER_WRITE),
        (A::HOST_READ, vk::AccessFlags::HOST_READ),
        (A::HOST_WRITE, vk::AccessFlags::HOST_WRITE),
    ];
    for &(bit, vk_bit) in table {
        if access.contains(bit) {
            flags |= vk_bit;
        }
    }
    flags
}

pub fn map_image_layout(layout: ImageLayout) -> vk::ImageLayout {
    match layout {
        ImageLayout::Undefined => vk::ImageLayout::UNDEFINED,
        ImageLayout::General => vk::ImageLayout::GENERAL,
        ImageLayout::ColorAttachmentOptimal => vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        ImageLayout::DepthStencilAttachmentOptimal => {
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        }
        ImageLayout::DepthStencilReadOnlyOptimal => {
            vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL
        }
        ImageLayout::ShaderReadOnlyOptimal => vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        ImageLayout::TransferSrcOptimal => vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        ImageLayout::TransferDstOptimal => vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        ImageLayout::PresentSrc => vk::ImageLayout::PRESENT_SRC_KHR,
    }
}

/// Everything `barrier.rs` needs to build one `VkImageMemoryBarrier` or
/// `VkBufferMemoryBarrier` leg, converted from the dense `AccessIntent`
/// table in one shot.
pub struct NativeAccess {
    pub stage_mask: vk::PipelineStageFlags,
    pub access_mask: vk::AccessFlags,
    pub image_layout: vk::ImageLayout,
}

pub fn map_intent(intent: AccessIntent) -> NativeAccess {
    let row = intent.row();
    NativeAccess {
        stage_mask: map_stage_mask(row.stage),
        access_mask: map_access_mask(row.access),
        image_layout: map_image_layout(row.layout),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rgba8_unorm_round_trips_to_the_expected_vk_format() {
        assert_eq!(
            map_texture_format(TextureFormat::Rgba8Unorm),
            vk::Format::R8G8B8A8_UNORM
        );
    }

    #[test]
    fn storage_read_and_write_both_map_to_vk_storage_buffer() {
        let read = map_buffer_usage(BufferUsages::COMPUTE_STORAGE_READ);
        let write = map_buffer_usage(BufferUsages::COMPUTE_STORAGE_WRITE);
        assert!(read.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(write.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
    }

    #[test]
    fn present_intent_maps_to_present_src_layout() {
        let native = map_intent(AccessIntent::Present);
        assert_eq!(native.image_layout, vk::ImageLayout::PRESENT_SRC_KHR);
    }
}
