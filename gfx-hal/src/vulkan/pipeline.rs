//! Pipeline layouts, shader modules, and graphics/compute pipelines.
//!
//! A `PipelineLayout` (graphics/compute) is deduplicated via a hash on its
//! contained descriptor-set-layout identities and owns per-stage
//! descriptor-set caches. The per-stage uniform-block size is ABI-aligned
//! to the device's minimum UBO alignment, and an empty-layout sentinel lets
//! the hot draw path bind all four descriptor set slots unconditionally
//! instead of branching per pipeline.

use std::sync::Arc;

use ash::vk;

use super::descriptor::{DescriptorSetCache, DescriptorSetLayoutEntry};

/// Dedup key for pipeline layouts: the identities (pointer-stable native
/// handles) of each of the four descriptor-set-layout slots, with unbound
/// slots filled by the empty-layout sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PipelineLayoutKey {
    pub set_layouts: [vk::DescriptorSetLayout; crate::MAX_BIND_GROUPS],
}

pub struct PipelineLayout {
    pub raw: vk::PipelineLayout,
    pub set_layouts: [Arc<DescriptorSetLayoutEntry>; crate::MAX_BIND_GROUPS],
    /// Per-stage descriptor-set caches, one per occupied slot.
    pub descriptor_caches: Vec<DescriptorSetCache>,
    /// Per-stage uniform-block size, aligned to `minUniformBufferOffsetAlignment`.
    pub uniform_block_size: u64,
}

#[derive(Debug)]
#[allow(clippy::large_enum_variant)]
pub enum ShaderModule {
    Raw(vk::ShaderModule),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

impl PrimitiveTopology {
    pub fn to_vk(self) -> vk::PrimitiveTopology {
        match self {
            PrimitiveTopology::PointList => vk::PrimitiveTopology::POINT_LIST,
            PrimitiveTopology::LineList => vk::PrimitiveTopology::LINE_LIST,
            PrimitiveTopology::LineStrip => vk::PrimitiveTopology::LINE_STRIP,
            PrimitiveTopology::TriangleList => vk::PrimitiveTopology::TRIANGLE_LIST,
            PrimitiveTopology::TriangleStrip => vk::PrimitiveTopology::TRIANGLE_STRIP,
        }
    }
}

#[derive(Debug)]
pub struct RenderPipeline {
    pub raw: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub topology: PrimitiveTopology,
    pub uniform_block_size: u64,
}

#[derive(Debug)]
pub struct ComputePipeline {
    pub raw: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub uniform_block_size: u64,
}

/// Vertex input description for [`create_graphics_pipeline`]: one binding
/// per buffer, attributes addressed by `(location, format, offset)`.
pub struct VertexAttribute {
    pub location: u32,
    pub format: vk::Format,
    pub offset: u32,
}

pub struct VertexBufferLayout<'a> {
    pub stride: u32,
    pub attributes: &'a [VertexAttribute],
}

pub struct ColorTargetState {
    pub format: vk::Format,
    pub blend: bool,
}

pub struct GraphicsPipelineDescriptor<'a> {
    pub layout: vk::PipelineLayout,
    pub vertex_module: vk::ShaderModule,
    pub vertex_entry_point: &'a std::ffi::CStr,
    pub fragment_module: vk::ShaderModule,
    pub fragment_entry_point: &'a std::ffi::CStr,
    pub vertex_buffers: &'a [VertexBufferLayout<'a>],
    pub topology: PrimitiveTopology,
    pub color_targets: &'a [ColorTargetState],
    pub depth_format: Option<vk::Format>,
    pub sample_count: vk::SampleCountFlags,
    pub render_pass: vk::RenderPass,
    pub uniform_block_size: u64,
}

/// `CreateGraphicsPipeline`: fixed-function state mirrors wgpu's
/// own defaults (counter-clockwise front face, back-face culling off,
/// depth test+write on whenever a depth attachment is present, dynamic
/// viewport/scissor so `CommandBuffer::begin_render_pass` can resize them
/// per framebuffer without rebuilding the pipeline).
pub unsafe fn create_graphics_pipeline(
    device: &ash::Device,
    desc: &GraphicsPipelineDescriptor<'_>,
) -> Result<RenderPipeline, crate::DeviceError> {
    let stages = [
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::VERTEX)
            .module(desc.vertex_module)
            .name(desc.vertex_entry_point)
            .build(),
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::FRAGMENT)
            .module(desc.fragment_module)
            .name(desc.fragment_entry_point)
            .build(),
    ];

    let mut bindings = Vec::with_capacity(desc.vertex_buffers.len());
    let mut attributes = Vec::new();
    for (binding, layout) in desc.vertex_buffers.iter().enumerate() {
        bindings.push(vk::VertexInputBindingDescription {
            binding: binding as u32,
            stride: layout.stride,
            input_rate: vk::VertexInputRate::VERTEX,
        });
        for attr in layout.attributes {
            attributes.push(vk::VertexInputAttributeDescription {
                location: attr.location,
                binding: binding as u32,
                format: attr.format,
                offset: attr.offset,
            });
        }
    }
    let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
        .vertex_binding_descriptions(&bindings)
        .vertex_attribute_descriptions(&attributes);

    let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
        .topology(desc.topology.to_vk());

    let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
        .viewport_count(1)
        .scissor_count(1);

    let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
        .polygon_mode(vk::PolygonMode::FILL)
        .cull_mode(vk::CullModeFlags::NONE)
        .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
        .line_width(1.0);

    let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
        .rasterization_samples(desc.sample_count);

    let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
        .depth_test_enable(desc.depth_format.is_some())
        .depth_write_enable(desc.depth_format.is_some())
        .depth_compare_op(vk::CompareOp::LESS);

    let attachments: Vec<_> = desc
        .color_targets
        .iter()
        .map(|target| {
            vk::PipelineColorBlendAttachmentState::builder()
                .color_write_mask(vk::ColorComponentFlags::RGBA)
                .blend_enable(target.blend)
                .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
                .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
                .color_blend_op(vk::BlendOp::ADD)
                .src_alpha_blend_factor(vk::BlendFactor::ONE)
                .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
                .alpha_blend_op(vk::BlendOp::ADD)
                .build()
        })
        .collect();
    let color_blend = vk::PipelineColorBlendStateCreateInfo::builder().attachments(&attachments);

    let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
    let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

    let info = vk::GraphicsPipelineCreateInfo::builder()
        .stages(&stages)
        .vertex_input_state(&vertex_input)
        .input_assembly_state(&input_assembly)
        .viewport_state(&viewport_state)
        .rasterization_state(&rasterization)
        .multisample_state(&multisample)
        .depth_stencil_state(&depth_stencil)
        .color_blend_state(&color_blend)
        .dynamic_state(&dynamic_state)
        .layout(desc.layout)
        .render_pass(desc.render_pass)
        .subpass(0);

    let raw = device
        .create_graphics_pipelines(vk::PipelineCache::null(), &[info.build()], None)
        .map_err(|(_, err)| crate::DeviceError::from(err))?[0];

    Ok(RenderPipeline {
        raw,
        layout: desc.layout,
        topology: desc.topology,
        uniform_block_size: desc.uniform_block_size,
    })
}

/// `CreateComputePipeline`.
pub unsafe fn create_compute_pipeline(
    device: &ash::Device,
    layout: vk::PipelineLayout,
    module: vk::ShaderModule,
    entry_point: &std::ffi::CStr,
    uniform_block_size: u64,
) -> Result<ComputePipeline, crate::DeviceError> {
    let stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::COMPUTE)
        .module(module)
        .name(entry_point);
    let info = vk::ComputePipelineCreateInfo::builder()
        .stage(stage.build())
        .layout(layout);
    let raw = device
        .create_compute_pipelines(vk::PipelineCache::null(), &[info.build()], None)
        .map_err(|(_, err)| crate::DeviceError::from(err))?[0];
    Ok(ComputePipeline {
        raw,
        layout,
        uniform_block_size,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_layout_key_hashes_by_slot_identity() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let key_a = PipelineLayoutKey {
            set_layouts: [vk::DescriptorSetLayout::null(); crate::MAX_BIND_GROUPS],
        };
        let key_b = PipelineLayoutKey {
            set_layouts: [vk::DescriptorSetLayout::null(); crate::MAX_BIND_GROUPS],
        };
        let mut hasher_a = DefaultHasher::new();
        let mut hasher_b = DefaultHasher::new();
        key_a.hash(&mut hasher_a);
        key_b.hash(&mut hasher_b);
        assert_eq!(hasher_a.finish(), hasher_b.finish());
        assert_eq!(key_a, key_b);
    }
}
