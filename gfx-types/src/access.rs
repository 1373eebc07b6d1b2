bitflags::bitflags! {
    /// Backend-agnostic mirror of `VkPipelineStageFlags`. `gfx-hal::vulkan::conv`
    /// converts these 1:1 to `ash::vk::PipelineStageFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct PipelineStages: u32 {
        const TOP_OF_PIPE = 1 << 0;
        const BOTTOM_OF_PIPE = 1 << 1;
        const DRAW_INDIRECT = 1 << 2;
        const VERTEX_INPUT = 1 << 3;
        const VERTEX_SHADER = 1 << 4;
        const FRAGMENT_SHADER = 1 << 5;
        const EARLY_FRAGMENT_TESTS = 1 << 6;
        const LATE_FRAGMENT_TESTS = 1 << 7;
        const COLOR_ATTACHMENT_OUTPUT = 1 << 8;
        const COMPUTE_SHADER = 1 << 9;
        const TRANSFER = 1 << 10;
        const HOST = 1 << 11;
    }
}

bitflags::bitflags! {
    /// Backend-agnostic mirror of `VkAccessFlags`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct AccessFlags: u32 {
        const INDIRECT_COMMAND_READ = 1 << 0;
        const INDEX_READ = 1 << 1;
        const VERTEX_ATTRIBUTE_READ = 1 << 2;
        const UNIFORM_READ = 1 << 3;
        const SHADER_READ = 1 << 4;
        const SHADER_WRITE = 1 << 5;
        const COLOR_ATTACHMENT_READ = 1 << 6;
        const COLOR_ATTACHMENT_WRITE = 1 << 7;
        const DEPTH_STENCIL_ATTACHMENT_READ = 1 << 8;
        const DEPTH_STENCIL_ATTACHMENT_WRITE = 1 << 9;
        const TRANSFER_READ = 1 << 10;
        const TRANSFER_WRITE = 1 << 11;
        const HOST_READ = 1 << 12;
        const HOST_WRITE = 1 << 13;
    }
}

/// Backend-agnostic mirror of `VkImageLayout`, restricted to the layouts
/// this design ever transitions an image through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageLayout {
    Undefined,
    General,
    ColorAttachmentOptimal,
    DepthStencilAttachmentOptimal,
    DepthStencilReadOnlyOptimal,
    ShaderReadOnlyOptimal,
    TransferSrcOptimal,
    TransferDstOptimal,
    PresentSrc,
}

/// One row of the dense access-intent table: the pipeline stage(s),
/// access mask, and image layout a resource sits in
/// while used for a given [`AccessIntent`], plus whether that use counts
/// as a write for the purposes of barrier source-access suppression.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageAccessLayout {
    pub stage: PipelineStages,
    pub access: AccessFlags,
    pub layout: ImageLayout,
    pub is_write: bool,
}

/// The closed, ~30-variant enumeration of access intents. This is the
/// single vocabulary the barrier engine (gfx-hal::vulkan::barrier) and
/// resource cycling (gfx-hal::vulkan::resource) operate on; nothing else
/// in the crate constructs a `vk::AccessFlags`/`vk::ImageLayout` pair by
/// hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum AccessIntent {
    /// Never written; the resource's layout is whatever Vulkan gives a
    /// freshly-created image/buffer. Only valid as an "old" intent.
    Initial,
    VertexBufferRead,
    IndexBufferRead,
    IndirectBufferRead,
    VertexShaderReadUniformBuffer,
    VertexShaderReadSampledImage,
    VertexShaderReadStorageBuffer,
    VertexShaderReadStorageImage,
    VertexShaderWriteStorageBuffer,
    VertexShaderWriteStorageImage,
    FragmentShaderReadUniformBuffer,
    FragmentShaderReadSampledImage,
    FragmentShaderReadStorageBuffer,
    FragmentShaderReadStorageImage,
    FragmentShaderWriteStorageBuffer,
    FragmentShaderWriteStorageImage,
    ColorAttachmentRead,
    ColorAttachmentWrite,
    DepthStencilAttachmentRead,
    DepthStencilAttachmentWrite,
    ComputeShaderReadUniformBuffer,
    ComputeShaderReadSampledImage,
    ComputeShaderReadStorageBuffer,
    ComputeShaderReadStorageImage,
    ComputeShaderWriteStorageBuffer,
    ComputeShaderWriteStorageImage,
    TransferRead,
    TransferWrite,
    HostRead,
    HostWrite,
    Present,
}

impl AccessIntent {
    /// Look up this intent's `(stage, access, layout, is_write)` row.
    ///
    /// This is the single source of truth: keep it a dense table rather
    /// than constructing barriers ad hoc at each call site. Every barrier
    /// emitted anywhere in the crate goes through this table.
    pub const fn row(self) -> StageAccessLayout {
        use AccessFlags as A;
        use AccessIntent::*;
        use ImageLayout as L;
        use PipelineStages as S;

        match self {
            Initial => StageAccessLayout {
                stage: S::empty(),
                access: A::empty(),
                layout: L::Undefined,
                is_write: false,
            },
            VertexBufferRead => StageAccessLayout {
                stage: S::VERTEX_INPUT,
                access: A::VERTEX_ATTRIBUTE_READ,
                layout: L::Undefined,
                is_write: false,
            },
            IndexBufferRead => StageAccessLayout {
                stage: S::VERTEX_INPUT,
                access: A::INDEX_READ,
                layout: L::Undefined,
                is_write: false,
            },
            IndirectBufferRead => StageAccessLayout {
                stage: S::DRAW_INDIRECT,
                access: A::INDIRECT_COMMAND_READ,
                layout: L::Undefined,
                is_write: false,
            },
            VertexShaderReadUniformBuffer => StageAccessLayout {
                stage: S::VERTEX_SHADER,
                access: A::UNIFORM_READ,
                layout: L::Undefined,
                is_write: false,
            },
            VertexShaderReadSampledImage => StageAccessLayout {
                stage: S::VERTEX_SHADER,
                access: A::SHADER_READ,
                layout: L::ShaderReadOnlyOptimal,
                is_write: false,
            },
            VertexShaderReadStorageBuffer => StageAccessLayout {
                stage: S::VERTEX_SHADER,
                access: A::SHADER_READ,
                layout: L::Undefined,
                is_write: false,
            },
            VertexShaderReadStorageImage => StageAccessLayout {
                stage: S::VERTEX_SHADER,
                access: A::SHADER_READ,
                layout: L::General,
                is_write: false,
            },
            VertexShaderWriteStorageBuffer => StageAccessLayout {
                stage: S::VERTEX_SHADER,
                access: A::SHADER_WRITE,
                layout: L::Undefined,
                is_write: true,
            },
            VertexShaderWriteStorageImage => StageAccessLayout {
                stage: S::VERTEX_SHADER,
                access: A::SHADER_WRITE,
                layout: L::General,
                is_write: true,
            },
            FragmentShaderReadUniformBuffer => StageAccessLayout {
                stage: S::FRAGMENT_SHADER,
                access: A::UNIFORM_READ,
                layout: L::Undefined,
                is_write: false,
            },
            FragmentShaderReadSampledImage => StageAccessLayout {
                stage: S::FRAGMENT_SHADER,
                access: A::SHADER_READ,
                layout: L::ShaderReadOnlyOptimal,
                is_write: false,
            },
            FragmentShaderReadStorageBuffer => StageAccessLayout {
                stage: S::FRAGMENT_SHADER,
                access: A::SHADER_READ,
                layout: L::Undefined,
                is_write: false,
            },
            FragmentShaderReadStorageImage => StageAccessLayout {
                stage: S::FRAGMENT_SHADER,
                access: A::SHADER_READ,
                layout: L::General,
                is_write: false,
            },
            FragmentShaderWriteStorageBuffer => StageAccessLayout {
                stage: S::FRAGMENT_SHADER,
                access: A::SHADER_WRITE,
                layout: L::Undefined,
                is_write: true,
            },
            FragmentShaderWriteStorageImage => StageAccessLayout {
                stage: S::FRAGMENT_SHADER,
                access: A::SHADER_WRITE,
                layout: L::General,
                is_write: true,
            },
            ColorAttachmentRead => StageAccessLayout {
                stage: S::COLOR_ATTACHMENT_OUTPUT,
                access: A::COLOR_ATTACHMENT_READ,
                layout: L::ColorAttachmentOptimal,
                is_write: false,
            },
            ColorAttachmentWrite => StageAccessLayout {
                stage: S::COLOR_ATTACHMENT_OUTPUT,
                access: A::COLOR_ATTACHMENT_WRITE,
                layout: L::ColorAttachmentOptimal,
                is_write: true,
            },
            DepthStencilAttachmentRead => StageAccessLayout {
                stage: S::EARLY_FRAGMENT_TESTS.union(S::LATE_FRAGMENT_TESTS),
                access: A::DEPTH_STENCIL_ATTACHMENT_READ,
                layout: L::DepthStencilReadOnlyOptimal,
                is_write: false,
            },
            DepthStencilAttachmentWrite => StageAccessLayout {
                stage: S::EARLY_FRAGMENT_TESTS.union(S::LATE_FRAGMENT_TESTS),
                access: A::DEPTH_STENCIL_ATTACHMENT_WRITE,
                layout: L::DepthStencilAttachmentOptimal,
                is_write: true,
            },
            ComputeShaderReadUniformBuffer => StageAccessLayout {
                stage: S::COMPUTE_SHADER,
                access: A::UNIFORM_READ,
                layout: L::Undefined,
                is_write: false,
            },
            ComputeShaderReadSampledImage => StageAccessLayout {
                stage: S::COMPUTE_SHADER,
                access: A::SHADER_READ,
                layout: L::ShaderReadOnlyOptimal,
                is_write: false,
            },
            ComputeShaderReadStorageBuffer => StageAccessLayout {
                stage: S::COMPUTE_SHADER,
                access: A::SHADER_READ,
                layout: L::Undefined,
                is_write: false,
            },
            ComputeShaderReadStorageImage => StageAccessLayout {
                stage: S::COMPUTE_SHADER,
                access: A::SHADER_READ,
                layout: L::General,
                is_write: false,
            },
            ComputeShaderWriteStorageBuffer => StageAccessLayout {
                stage: S::COMPUTE_SHADER,
                access: A::SHADER_WRITE,
                layout: L::Undefined,
                is_write: true,
            },
            ComputeShaderWriteStorageImage => StageAccessLayout {
                stage: S::COMPUTE_SHADER,
                access: A::SHADER_WRITE,
                layout: L::General,
                is_write: true,
            },
            TransferRead => StageAccessLayout {
                stage: S::TRANSFER,
                access: A::TRANSFER_READ,
                layout: L::TransferSrcOptimal,
                is_write: false,
            },
            TransferWrite => StageAccessLayout {
                stage: S::TRANSFER,
                access: A::TRANSFER_WRITE,
                layout: L::TransferDstOptimal,
                is_write: true,
            },
            HostRead => StageAccessLayout {
                stage: S::HOST,
                access: A::HOST_READ,
                layout: L::General,
                is_write: false,
            },
            HostWrite => StageAccessLayout {
                stage: S::HOST,
                access: A::HOST_WRITE,
                layout: L::General,
                is_write: true,
            },
            Present => StageAccessLayout {
                stage: S::BOTTOM_OF_PIPE,
                access: A::empty(),
                layout: L::PresentSrc,
                is_write: false,
            },
        }
    }

    /// True if this intent can ever apply to an image (as opposed to a
    /// pure buffer intent like `IndexBufferRead`). Used by
    /// `gfx-hal::vulkan::barrier` to decide whether to skip the layout
    /// transition for buffer-only barriers.
    pub const fn is_image_capable(self) -> bool {
        !matches!(
            self,
            AccessIntent::VertexBufferRead
                | AccessIntent::IndexBufferRead
                | AccessIntent::IndirectBufferRead
                | AccessIntent::VertexShaderReadUniformBuffer
                | AccessIntent::VertexShaderReadStorageBuffer
                | AccessIntent::VertexShaderWriteStorageBuffer
                | AccessIntent::FragmentShaderReadUniformBuffer
                | AccessIntent::FragmentShaderReadStorageBuffer
                | AccessIntent::FragmentShaderWriteStorageBuffer
                | AccessIntent::ComputeShaderReadUniformBuffer
                | AccessIntent::ComputeShaderReadStorageBuffer
                | AccessIntent::ComputeShaderWriteStorageBuffer
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_has_no_stage_or_access() {
        let row = AccessIntent::Initial.row();
        assert!(row.stage.is_empty());
        assert!(row.access.is_empty());
        assert!(!row.is_write);
    }

    #[test]
    fn writes_are_flagged() {
        assert!(AccessIntent::ColorAttachmentWrite.row().is_write);
        assert!(!AccessIntent::ColorAttachmentRead.row().is_write);
        assert!(AccessIntent::TransferWrite.row().is_write);
    }

    #[test]
    fn buffer_only_intents_are_not_image_capable() {
        assert!(!AccessIntent::IndexBufferRead.is_image_capable());
        assert!(AccessIntent::ColorAttachmentWrite.is_image_capable());
        assert!(AccessIntent::TransferRead.is_image_capable());
    }
}
