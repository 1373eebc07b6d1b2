//! Automatic barrier inference.
//!
//! Every barrier this crate ever emits is built from an `(old, new)` pair
//! of `gfxt::AccessIntent`s, looked up through `AccessIntent::row()` --
//! never by constructing a `vk::AccessFlags`/`vk::ImageLayout` pair by
//! hand at the call site; `AccessIntent::row` is the single source of
//! truth. The rule set:
//!
//! - source stage = old.stage, substituting `TOP_OF_PIPE` if empty
//! - destination stage = new.stage, substituting `BOTTOM_OF_PIPE` if empty
//! - source access = old.access, but only if old was a write
//! - destination access = new.access, suppressed when neither side writes
//!   (a read-after-unwritten transition has nothing to make visible)
//! - image layout transitions always apply for image barriers

use ash::vk;
use gfxt::AccessIntent;

use super::conv;

pub struct BufferBarrierRequest {
    pub buffer: vk::Buffer,
    pub offset: u64,
    pub size: u64,
    pub before: AccessIntent,
    pub after: AccessIntent,
}

pub struct ImageBarrierRequest {
    pub image: vk::Image,
    pub aspect_mask: vk::ImageAspectFlags,
    pub base_mip_level: u32,
    pub level_count: u32,
    pub base_array_layer: u32,
    pub layer_count: u32,
    pub before: AccessIntent,
    pub after: AccessIntent,
}

/// A resolved barrier pair ready to hand to `vkCmdPipelineBarrier`. Source
/// and destination stage masks accumulate across every barrier in one call,
/// since pass recording batches barriers instead of issuing one call per
/// resource, so callers union these into the `Temp` scratch vectors.
pub struct ResolvedBuffer {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub barrier: vk::BufferMemoryBarrier,
}

pub struct ResolvedImage {
    pub src_stage: vk::PipelineStageFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub barrier: vk::ImageMemoryBarrier,
}

struct Masks {
    src_stage: vk::PipelineStageFlags,
    dst_stage: vk::PipelineStageFlags,
    src_access: vk::AccessFlags,
    dst_access: vk::AccessFlags,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
}

fn resolve_masks(before: AccessIntent, after: AccessIntent) -> Masks {
    let before_row = before.row();
    let after_row = after.row();
    let src = conv::map_intent(before);
    let dst = conv::map_intent(after);

    let src_stage = if src.stage_mask.is_empty() {
        vk::PipelineStageFlags::TOP_OF_PIPE
    } else {
        src.stage_mask
    };
    let dst_stage = if dst.stage_mask.is_empty() {
        vk::PipelineStageFlags::BOTTOM_OF_PIPE
    } else {
        dst.stage_mask
    };
    let src_access = if before_row.is_write {
        src.access_mask
    } else {
        vk::AccessFlags::empty()
    };
    let dst_access = if before_row.is_write || after_row.is_write {
        dst.access_mask
    } else {
        vk::AccessFlags::empty()
    };

    Masks {
        src_stage,
        dst_stage,
        src_access,
        dst_access,
        old_layout: src.image_layout,
        new_layout: dst.image_layout,
    }
}

/// A pure read-to-read transition with no layout change needs no
/// synchronization beyond the execution order the API already provides.
fn needs_barrier(before: AccessIntent, after: AccessIntent) -> bool {
    let before_row = before.row();
    let after_row = after.row();
    before_row.is_write || after_row.is_write || before_row.layout != after_row.layout
}

pub fn resolve_buffer_barrier(request: &BufferBarrierRequest) -> Option<ResolvedBuffer> {
    if !needs_barrier(request.before, request.after) {
        return None;
    }
    let masks = resolve_masks(request.before, request.after);
    let barrier = vk::BufferMemoryBarrier::builder()
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(request.buffer)
        .offset(request.offset)
        .size(request.size)
        .build();
    Some(ResolvedBuffer {
        src_stage: masks.src_stage,
        dst_stage: masks.dst_stage,
        barrier,
    })
}

pub fn resolve_image_barrier(request: &ImageBarrierRequest) -> Option<ResolvedImage> {
    if !needs_barrier(request.before, request.after) {
        return None;
    }
    let masks = resolve_masks(request.before, request.after);
    let subresource_range = vk::ImageSubresourceRange {
        aspect_mask: request.aspect_mask,
        base_mip_level: request.base_mip_level,
        level_count: request.level_count,
        base_array_layer: request.base_array_layer,
        layer_count: request.layer_count,
    };
    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access)
        .old_layout(masks.old_layout)
        .new_layout(masks.new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(request.image)
        .subresource_range(subresource_range)
        .build();
    Some(ResolvedImage {
        src_stage: masks.src_stage,
        dst_stage: masks.dst_stage,
        barrier,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_to_read_with_unchanged_layout_needs_no_barrier() {
        assert!(!needs_barrier(
            AccessIntent::FragmentShaderReadUniformBuffer,
            AccessIntent::VertexShaderReadUniformBuffer
        ));
    }

    #[test]
    fn write_always_needs_a_barrier() {
        assert!(needs_barrier(
            AccessIntent::ColorAttachmentWrite,
            AccessIntent::ColorAttachmentWrite
        ));
    }

    #[test]
    fn layout_change_needs_a_barrier_even_without_a_write() {
        assert!(needs_barrier(
            AccessIntent::TransferRead,
            AccessIntent::FragmentShaderReadSampledImage
        ));
    }

    #[test]
    fn read_after_unwritten_suppresses_destination_access() {
        let masks =
            resolve_masks(AccessIntent::Initial, AccessIntent::FragmentShaderReadSampledImage);
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_access, vk::AccessFlags::empty());
    }

    #[test]
    fn source_access_is_suppressed_when_old_intent_did_not_write() {
        let masks = resolve_masks(
            AccessIntent::FragmentShaderReadSampledImage,
            AccessIntent::ColorAttachmentWrite,
        );
        assert_eq!(masks.src_access, vk::AccessFlags::empty());
        assert_eq!(masks.dst_access, vk::AccessFlags::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn empty_stage_masks_substitute_top_and_bottom_of_pipe() {
        let masks = resolve_masks(AccessIntent::Initial, AccessIntent::Present);
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn buffer_barrier_resolves_stage_and_access_from_the_intent_table() {
        let request = BufferBarrierRequest {
            buffer: vk::Buffer::null(),
            offset: 0,
            size: 256,
            before: AccessIntent::TransferWrite,
            after: AccessIntent::VertexShaderReadUniformBuffer,
        };
        let resolved = resolve_buffer_barrier(&request).expect("write source needs a barrier");
        assert_eq!(resolved.src_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(resolved.dst_stage, vk::PipelineStageFlags::VERTEX_SHADER);
        assert_eq!(
            resolved.barrier.dst_access_mask,
            vk::AccessFlags::UNIFORM_READ
        );
    }
}
