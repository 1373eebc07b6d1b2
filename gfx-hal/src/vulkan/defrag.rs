//! Defragmentation cycle.
//!
//! After submission cleanup, any page the allocator marked fragmented
//! (`DeviceAllocator::take_pending_defrag`) is drained one at a time: each
//! resource bound to that page gets a same-shaped replacement allocation
//! with transfer src/dst usage, a barrier-copy-barrier round trip, and the
//! container is re-pointed at the new resource. The old resource is queued
//! for destroy rather than returned to history, since nothing should cycle
//! back onto a page being evacuated.
//!
//! This module doesn't own the registry of which resource lives on which
//! page -- that's the device's job -- so it's expressed against the
//! [`DefragHost`] trait, which supplies the set of candidates for one page
//! and lets the caller allocate the replacement with the real device.

use ash::vk;
use gfxt::AccessIntent;

use super::allocator::{PageId, UsedRegion};
use super::barrier::{self, BufferBarrierRequest, ImageBarrierRequest};
use super::resource::{BufferContainer, BufferHandle, TextureContainer, TextureHandle};
use crate::DeviceError;

/// One buffer container bound (in whole or in part) to the page being
/// evacuated, named so the defrag pass can allocate its replacement with
/// the same shape.
pub struct DefragBufferCandidate<'a> {
    pub container: &'a mut BufferContainer,
}

pub struct DefragTextureCandidate<'a> {
    pub container: &'a mut TextureContainer,
}

/// Supplies the live resources bound to a page and lets the defrag pass
/// allocate their replacements through the real allocator/device.
pub trait DefragHost {
    fn buffers_on_page(&mut self, memory_type_index: u32, page: PageId) -> Vec<DefragBufferCandidate<'_>>;
    fn textures_on_page(&mut self, memory_type_index: u32, page: PageId) -> Vec<DefragTextureCandidate<'_>>;

    /// Allocates a same-size region with transfer-src/dst usage enabled,
    /// for the replacement buffer/texture.
    unsafe fn allocate_replacement_region(
        &mut self,
        memory_type_index: u32,
        size: u64,
        alignment: u64,
        is_buffer: bool,
    ) -> Result<UsedRegion, DeviceError>;

    unsafe fn create_replacement_buffer(
        &mut self,
        size: u64,
        region: UsedRegion,
    ) -> Result<vk::Buffer, DeviceError>;

    unsafe fn create_replacement_image(
        &mut self,
        like: &TextureHandle,
        region: UsedRegion,
    ) -> Result<(vk::Image, vk::ImageView), DeviceError>;

    unsafe fn queue_destroy_buffer(&mut self, handle: std::sync::Arc<BufferHandle>);
    unsafe fn queue_destroy_texture(&mut self, handle: std::sync::Arc<TextureHandle>);
}

/// Runs one page's worth of the defrag cycle against `host`, recording the
/// barrier/copy/barrier sequence into `cmd` and `device`. Buffers only move
/// if `preserve_on_defrag` is set and their
/// current intent isn't `Initial`; textures move per-slice under the same
/// condition, transitioning the destination to shader-read afterward if the
/// parent is sampler-capable.
pub unsafe fn defragment_page(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    host: &mut dyn DefragHost,
    memory_type_index: u32,
    page: PageId,
) -> Result<(), DeviceError> {
    for candidate in host.buffers_on_page(memory_type_index, page) {
        defragment_buffer(device, cmd, host, candidate)?;
    }
    for candidate in host.textures_on_page(memory_type_index, page) {
        defragment_texture(device, cmd, host, candidate)?;
    }
    Ok(())
}

unsafe fn defragment_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    host: &mut dyn DefragHost,
    candidate: DefragBufferCandidate<'_>,
) -> Result<(), DeviceError> {
    let original = candidate.container.active().clone();
    if !original.preserve_on_defrag || original.current_intent() == AccessIntent::Initial {
        // Nothing worth preserving; drop the old allocation and let the
        // caller create a fresh handle lazily on next use.
        host.queue_destroy_buffer(original);
        return Ok(());
    }
    original.set_defrag_in_progress(true);

    let region = host.allocate_replacement_region(
        original.memory_type_index,
        original.region.resource_size,
        original.region.alignment,
        true,
    )?;
    let new_raw = host.create_replacement_buffer(original.size, region)?;

    emit_buffer_barrier(device, cmd, original.raw, original.size, original.current_intent(), AccessIntent::TransferRead);
    emit_buffer_barrier(device, cmd, new_raw, original.size, AccessIntent::Initial, AccessIntent::TransferWrite);
    let copy = vk::BufferCopy {
        src_offset: 0,
        dst_offset: 0,
        size: original.size,
    };
    device.cmd_copy_buffer(cmd, original.raw, new_raw, &[copy]);
    let natural_intent = original.current_intent();
    emit_buffer_barrier(device, cmd, new_raw, original.size, AccessIntent::TransferWrite, natural_intent);

    let mut replacement = BufferHandle::new(
        new_raw,
        original.size,
        original.usage,
        original.memory_type_index,
        region,
    );
    replacement.preserve_on_defrag = true;
    let retired = candidate.container.replace_active_for_defrag(replacement);
    host.queue_destroy_buffer(retired);
    Ok(())
}

unsafe fn defragment_texture(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    host: &mut dyn DefragHost,
    candidate: DefragTextureCandidate<'_>,
) -> Result<(), DeviceError> {
    let original = candidate.container.active().clone();
    let region = match original.region {
        Some(region) => region,
        None => return Ok(()),
    };

    let has_preserved_slice = original
        .slices
        .iter()
        .any(|slice| slice.current_intent() != AccessIntent::Initial);
    if !has_preserved_slice {
        host.queue_destroy_texture(original);
        return Ok(());
    }
    for slice in &original.slices {
        slice.set_defrag_in_progress(true);
    }

    let new_region = host.allocate_replacement_region(
        original.memory_type_index.unwrap_or(0),
        region.resource_size,
        region.alignment,
        false,
    )?;
    let (new_image, new_default_view) = host.create_replacement_image(&original, new_region)?;

    let aspect_mask = super::conv::map_aspect(original.aspect);
    let sampler_capable = original.usage.contains(gfxt::TextureUsages::SAMPLER);

    for slice in &original.slices {
        let before = slice.current_intent();
        if before == AccessIntent::Initial {
            continue;
        }
        emit_image_barrier(device, cmd, original.raw, aspect_mask, slice.level, slice.layer, before, AccessIntent::TransferRead);
        emit_image_barrier(device, cmd, new_image, aspect_mask, slice.level, slice.layer, AccessIntent::Initial, AccessIntent::TransferWrite);

        let copy = vk::ImageCopy {
            src_subresource: vk::ImageSubresourceLayers {
                aspect_mask,
                mip_level: slice.level,
                base_array_layer: slice.layer,
                layer_count: 1,
            },
            src_offset: vk::Offset3D::default(),
            dst_subresource: vk::ImageSubresourceLayers {
                aspect_mask,
                mip_level: slice.level,
                base_array_layer: slice.layer,
                layer_count: 1,
            },
            dst_offset: vk::Offset3D::default(),
            extent: vk::Extent3D {
                width: original.width >> slice.level,
                height: original.height >> slice.level,
                depth: 1,
            },
        };
        device.cmd_copy_image(
            cmd,
            original.raw,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            new_image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[copy],
        );

        let dest_intent = if sampler_capable {
            AccessIntent::FragmentShaderReadSampledImage
        } else {
            before
        };
        emit_image_barrier(device, cmd, new_image, aspect_mask, slice.level, slice.layer, AccessIntent::TransferWrite, dest_intent);
    }

    let mut replacement = TextureHandle {
        raw: new_image,
        default_view: new_default_view,
        width: original.width,
        height: original.height,
        depth: original.depth,
        layer_count: original.layer_count,
        level_count: original.level_count,
        sample_count: original.sample_count,
        format: original.format,
        usage: original.usage,
        aspect: original.aspect,
        memory_type_index: original.memory_type_index,
        region: Some(new_region),
        slices: Vec::new(),
        name: original.name.clone(),
    };
    replacement.slices = original
        .slices
        .iter()
        .map(|s| super::resource::TextureSlice::new(s.layer, s.level, s.view))
        .collect();

    let retired = candidate.container.replace_active_for_defrag(replacement);
    host.queue_destroy_texture(retired);
    Ok(())
}

unsafe fn emit_buffer_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    buffer: vk::Buffer,
    size: u64,
    before: AccessIntent,
    after: AccessIntent,
) {
    if let Some(resolved) = barrier::resolve_buffer_barrier(&BufferBarrierRequest {
        buffer,
        offset: 0,
        size,
        before,
        after,
    }) {
        device.cmd_pipeline_barrier(
            cmd,
            resolved.src_stage,
            resolved.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[resolved.barrier],
            &[],
        );
    }
}

unsafe fn emit_image_barrier(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    level: u32,
    layer: u32,
    before: AccessIntent,
    after: AccessIntent,
) {
    if let Some(resolved) = barrier::resolve_image_barrier(&ImageBarrierRequest {
        image,
        aspect_mask,
        base_mip_level: level,
        level_count: 1,
        base_array_layer: layer,
        layer_count: 1,
        before,
        after,
    }) {
        device.cmd_pipeline_barrier(
            cmd,
            resolved.src_stage,
            resolved.dst_stage,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &[resolved.barrier],
        );
    }
}
