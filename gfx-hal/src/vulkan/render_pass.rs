//! Render-pass and framebuffer structural-hash caches.
//!
//! Render passes are cached on the device and kept forever: the space of
//! distinct `(format, ops, sample count, layout)` tuples is small relative
//! to frame count. Framebuffers are cached too, but keyed on the concrete
//! attachment views, so they're evicted whenever one of those views is
//! destroyed (the cache itself doesn't own that lifetime -- callers must
//! invalidate on view destruction).

use std::num::NonZeroU32;

use arrayvec::ArrayVec;
use ash::vk;

use gfxt::TextureFormat;

use super::MAX_TOTAL_ATTACHMENTS;

/// Load/store op pair applied to one attachment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentOps {
    pub load: vk::AttachmentLoadOp,
    pub store: vk::AttachmentStoreOp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachmentKey {
    pub format: vk::Format,
    pub layout: vk::ImageLayout,
    pub ops: AttachmentOps,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColorAttachmentKey {
    pub base: AttachmentKey,
    pub resolve: Option<AttachmentKey>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DepthStencilAttachmentKey {
    pub base: AttachmentKey,
    pub stencil_ops: AttachmentOps,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RenderPassKey {
    pub colors: ArrayVec<Option<ColorAttachmentKey>, { crate::MAX_COLOR_ATTACHMENTS }>,
    pub depth_stencil: Option<DepthStencilAttachmentKey>,
    pub sample_count: u32,
    pub multiview: Option<NonZeroU32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferAttachment {
    pub raw: vk::ImageView,
    pub view_format: TextureFormat,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FramebufferKey {
    pub attachments: ArrayVec<FramebufferAttachment, { MAX_TOTAL_ATTACHMENTS }>,
    pub width: u32,
    pub height: u32,
    pub sample_count: u32,
}

/// Builds the attachment description / reference arrays and creates a
/// `VkRenderPass` for a cache miss. Pure construction; the caller
/// (`Device`) owns the `render_passes` map and does the lookup-or-insert.
pub unsafe fn create_render_pass(
    device: &ash::Device,
    key: &RenderPassKey,
) -> Result<vk::RenderPass, crate::DeviceError> {
    let mut attachments = Vec::new();
    let mut color_refs = Vec::new();
    let mut resolve_refs = Vec::new();
    let mut has_resolve = false;

    for color in key.colors.iter().flatten() {
        let index = attachments.len() as u32;
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(color.base.format)
                .samples(sample_count_flags(key.sample_count))
                .load_op(color.base.ops.load)
                .store_op(color.base.ops.store)
                .initial_layout(color.base.layout)
                .final_layout(color.base.layout)
                .build(),
        );
        color_refs.push(vk::AttachmentReference {
            attachment: index,
            layout: color.base.layout,
        });
        if let Some(resolve) = &color.resolve {
            has_resolve = true;
            let resolve_index = attachments.len() as u32;
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(resolve.format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(resolve.ops.load)
                    .store_op(resolve.ops.store)
                    .initial_layout(resolve.layout)
                    .final_layout(resolve.layout)
                    .build(),
            );
            resolve_refs.push(vk::AttachmentReference {
                attachment: resolve_index,
                layout: resolve.layout,
            });
        } else {
            resolve_refs.push(vk::AttachmentReference {
                attachment: vk::ATTACHMENT_UNUSED,
                layout: vk::ImageLayout::UNDEFINED,
            });
        }
    }

    let depth_ref = key.depth_stencil.as_ref().map(|ds| {
        let index = attachments.len() as u32;
        attachments.push(
            vk::AttachmentDescription::builder()
                .format(ds.base.format)
                .samples(sample_count_flags(key.sample_count))
                .load_op(ds.base.ops.load)
                .store_op(ds.base.ops.store)
                .stencil_load_op(ds.stencil_ops.load)
                .stencil_store_op(ds.stencil_ops.store)
                .initial_layout(ds.base.layout)
                .final_layout(ds.base.layout)
                .build(),
        );
        vk::AttachmentReference {
            attachment: index,
            layout: ds.base.layout,
        }
    });

    let mut subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(&color_refs);
    if has_resolve {
        subpass = subpass.resolve_attachments(&resolve_refs);
    }
    if let Some(depth_ref) = depth_ref.as_ref() {
        subpass = subpass.depth_stencil_attachment(depth_ref);
    }
    let subpasses = [subpass.build()];

    let mut create_info = vk::RenderPassCreateInfo::builder()
        .attachments(&attachments)
        .subpasses(&subpasses);
    let multiview_masks;
    let mut multiview_info;
    if let Some(view_count) = key.multiview {
        multiview_masks = [(1u32 << view_count.get()) - 1];
        multiview_info = vk::RenderPassMultiviewCreateInfo::builder()
            .view_masks(&multiview_masks)
            .correlation_masks(&multiview_masks);
        create_info = create_info.push_next(&mut multiview_info);
    }

    device
        .create_render_pass(&create_info, None)
        .map_err(crate::DeviceError::from)
}

fn sample_count_flags(count: u32) -> vk::SampleCountFlags {
    vk::SampleCountFlags::from_raw(count)
}

pub unsafe fn create_framebuffer(
    device: &ash::Device,
    render_pass: vk::RenderPass,
    key: &FramebufferKey,
) -> Result<vk::Framebuffer, crate::DeviceError> {
    let views: Vec<_> = key.attachments.iter().map(|a| a.raw).collect();
    let info = vk::FramebufferCreateInfo::builder()
        .render_pass(render_pass)
        .attachments(&views)
        .width(key.width)
        .height(key.height)
        .layers(1);
    device
        .create_framebuffer(&info, None)
        .map_err(crate::DeviceError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_attachment_shapes_hash_equal() {
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let key = |layout| RenderPassKey {
            colors: ArrayVec::from_iter([Some(ColorAttachmentKey {
                base: AttachmentKey {
                    format: vk::Format::R8G8B8A8_UNORM,
                    layout,
                    ops: AttachmentOps {
                        load: vk::AttachmentLoadOp::CLEAR,
                        store: vk::AttachmentStoreOp::STORE,
                    },
                },
                resolve: None,
            })]),
            depth_stencil: None,
            sample_count: 1,
            multiview: None,
        };
        let a = key(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let b = key(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        let c = key(vk::ImageLayout::GENERAL);

        let hash_of = |k: &RenderPassKey| {
            let mut hasher = DefaultHasher::new();
            k.hash(&mut hasher);
            hasher.finish()
        };
        assert_eq!(a, b);
        assert_eq!(hash_of(&a), hash_of(&b));
        assert_ne!(a, c);
    }
}
