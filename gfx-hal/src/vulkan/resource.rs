//! Buffers, textures, and the container/cycling model. A `Container<H>` is
//! the client-visible handle; it owns an
//! `active` resource plus a `history` of previously-active ones kept
//! around for potential reuse. Command buffers that have a resource
//! in flight hold their own `Arc` clone of the handle, so "is anyone still
//! using this handle" is just `Arc::strong_count(&handle) > 1` -- the
//! container itself always holds exactly one of the counted references.
//! The natural `Buffer -> Handle -> Container -> Handle` cycle is broken
//! here by the container never holding a back-pointer to itself.

use std::num::NonZeroU32;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use gfxt::{AccessIntent, BufferUsages, TextureAspect, TextureFormat, TextureUsages};

use super::allocator::UsedRegion;
use super::barrier::{self, BufferBarrierRequest, ImageBarrierRequest, ResolvedBuffer, ResolvedImage};

/// How a write should be made safe against concurrent GPU reads of the
/// resource's previous contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOption {
    /// Always emit a barrier to the requested intent.
    Safe,
    /// Rotate to an unreferenced handle when one is in flight; never emits
    /// a barrier, since the write lands on a handle nobody else can see.
    Cycle,
    /// Assign the intent with no barrier. The caller vouches there's no
    /// hazard (e.g. it already synchronized externally).
    Unsafe,
}

fn is_externally_referenced<T>(handle: &Arc<T>) -> bool {
    Arc::strong_count(handle) > 1
}

/// One native buffer plus its memory binding and mutable tracking state.
pub struct BufferHandle {
    pub raw: vk::Buffer,
    pub size: u64,
    pub usage: BufferUsages,
    pub memory_type_index: u32,
    pub region: UsedRegion,
    pub require_host_visible: bool,
    pub prefer_host_local: bool,
    pub prefer_device_local: bool,
    pub preserve_on_defrag: bool,
    pub name: Option<String>,
    current_intent: Mutex<AccessIntent>,
    defrag_in_progress: std::sync::atomic::AtomicBool,
}

impl BufferHandle {
    pub fn new(
        raw: vk::Buffer,
        size: u64,
        usage: BufferUsages,
        memory_type_index: u32,
        region: UsedRegion,
    ) -> Self {
        Self {
            raw,
            size,
            usage,
            memory_type_index,
            region,
            require_host_visible: false,
            prefer_host_local: false,
            prefer_device_local: false,
            preserve_on_defrag: false,
            name: None,
            current_intent: Mutex::new(AccessIntent::Initial),
            defrag_in_progress: std::sync::atomic::AtomicBool::new(false),
        }
    }

    pub fn current_intent(&self) -> AccessIntent {
        *self.current_intent.lock()
    }

    pub fn is_defrag_in_progress(&self) -> bool {
        self.defrag_in_progress.load(std::sync::atomic::Ordering::Acquire)
    }

    pub fn set_defrag_in_progress(&self, value: bool) {
        self.defrag_in_progress
            .store(value, std::sync::atomic::Ordering::Release);
    }
}

/// Public client handle owning an ordered set of [`BufferHandle`]s plus the
/// one currently active.
pub struct BufferContainer {
    active: Arc<BufferHandle>,
    history: Vec<Arc<BufferHandle>>,
}

impl BufferContainer {
    pub fn new(handle: BufferHandle) -> Self {
        Self {
            active: Arc::new(handle),
            history: Vec::new(),
        }
    }

    pub fn active(&self) -> &Arc<BufferHandle> {
        &self.active
    }

    /// `PrepareBufferForWrite`. `make_replacement` is called only
    /// when a fresh handle must be created (no reusable unreferenced prior
    /// handle exists); it receives the handle being cycled away from so
    /// the caller can inherit size/usage/host flags and name.
    pub fn prepare_for_write(
        &mut self,
        write_option: WriteOption,
        next_intent: AccessIntent,
        make_replacement: impl FnOnce(&BufferHandle) -> BufferHandle,
    ) -> Option<ResolvedBuffer> {
        let force_safe = self.active.is_defrag_in_progress();
        match write_option {
            WriteOption::Safe => {
                let barrier = self.emit_barrier(next_intent);
                *self.active.current_intent.lock() = next_intent;
                barrier
            }
            WriteOption::Cycle if force_safe => {
                let barrier = self.emit_barrier(next_intent);
                *self.active.current_intent.lock() = next_intent;
                barrier
            }
            WriteOption::Cycle => {
                if is_externally_referenced(&self.active) {
                    self.cycle(make_replacement);
                }
                *self.active.current_intent.lock() = next_intent;
                None
            }
            WriteOption::Unsafe => {
                *self.active.current_intent.lock() = next_intent;
                None
            }
        }
    }

    fn emit_barrier(&self, next_intent: AccessIntent) -> Option<ResolvedBuffer> {
        let before = self.active.current_intent();
        barrier::resolve_buffer_barrier(&BufferBarrierRequest {
            buffer: self.active.raw,
            offset: 0,
            size: self.active.size,
            before,
            after: next_intent,
        })
    }

    /// Unconditionally re-points the container at `replacement`, as the
    /// defragmenter does when it gives a resource a new backing
    /// allocation. Returns the retired handle so the caller can queue
    /// it for destroy instead of keeping it around for reuse.
    pub fn replace_active_for_defrag(&mut self, replacement: BufferHandle) -> Arc<BufferHandle> {
        std::mem::replace(&mut self.active, Arc::new(replacement))
    }

    /// Reuse the first unreferenced prior handle, or create and append a
    /// new one, and make it active.
    fn cycle(&mut self, make_replacement: impl FnOnce(&BufferHandle) -> BufferHandle) {
        if let Some(pos) = self
            .history
            .iter()
            .position(|h| !is_externally_referenced(h))
        {
            let reused = self.history.remove(pos);
            let retired = std::mem::replace(&mut self.active, reused);
            self.history.push(retired);
        } else {
            let fresh = Arc::new(make_replacement(&self.active));
            let retired = std::mem::replace(&mut self.active, fresh);
            self.history.push(retired);
        }
    }
}

/// `(layer, level)` addressable subresource of a [`Texture`].
pub struct TextureSlice {
    pub layer: u32,
    pub level: u32,
    pub view: vk::ImageView,
    current_intent: Mutex<AccessIntent>,
    defrag_in_progress: std::sync::atomic::AtomicBool,
    /// Dedicated MSAA companion texture resolved into this slice, if the
    /// owning texture was created with a sample count above 1.
    pub msaa_companion: Option<vk::Image>,
}

impl TextureSlice {
    pub fn new(layer: u32, level: u32, view: vk::ImageView) -> Self {
        Self {
            layer,
            level,
            view,
            current_intent: Mutex::new(AccessIntent::Initial),
            defrag_in_progress: std::sync::atomic::AtomicBool::new(false),
            msaa_companion: None,
        }
    }

    pub fn current_intent(&self) -> AccessIntent {
        *self.current_intent.lock()
    }

    pub fn set_defrag_in_progress(&self, value: bool) {
        self.defrag_in_progress
            .store(value, std::sync::atomic::Ordering::Release);
    }
}

/// Slice index within a texture's `slices` array: `layer * level_count + level`.
pub fn slice_index(layer: u32, level: u32, level_count: u32) -> usize {
    (layer * level_count + level) as usize
}

pub struct TextureHandle {
    pub raw: vk::Image,
    pub default_view: vk::ImageView,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
    pub layer_count: u32,
    pub level_count: u32,
    pub sample_count: u32,
    pub format: TextureFormat,
    pub usage: TextureUsages,
    pub aspect: TextureAspect,
    pub memory_type_index: Option<u32>,
    pub region: Option<UsedRegion>,
    pub slices: Vec<TextureSlice>,
    pub name: Option<String>,
}

impl TextureHandle {
    pub fn slice(&self, layer: u32, level: u32) -> &TextureSlice {
        &self.slices[slice_index(layer, level, self.level_count)]
    }
}

/// Mirrors [`BufferContainer`]; `can_be_cycled` is false for swapchain-owned
/// textures, which must always present the same `VkImage` the presentation
/// engine handed back.
pub struct TextureContainer {
    active: Arc<TextureHandle>,
    history: Vec<Arc<TextureHandle>>,
    can_be_cycled: bool,
}

impl TextureContainer {
    pub fn new(handle: TextureHandle, can_be_cycled: bool) -> Self {
        Self {
            active: Arc::new(handle),
            history: Vec::new(),
            can_be_cycled,
        }
    }

    pub fn active(&self) -> &Arc<TextureHandle> {
        &self.active
    }

    /// `PrepareSliceForWrite`: cycling happens first if eligible,
    /// then a barrier is always emitted (layout transitions mandate it).
    pub fn prepare_slice_for_write(
        &mut self,
        layer: u32,
        level: u32,
        write_option: WriteOption,
        next_intent: AccessIntent,
        make_replacement: impl FnOnce(&TextureHandle) -> TextureHandle,
    ) -> Option<ResolvedImage> {
        let slice_refcounted = is_externally_referenced(&self.active);
        let slice_defragging = self
            .active
            .slice(layer, level)
            .defrag_in_progress
            .load(std::sync::atomic::Ordering::Acquire);

        if write_option == WriteOption::Cycle
            && self.can_be_cycled
            && !slice_defragging
            && slice_refcounted
        {
            self.cycle(make_replacement);
        }

        let slice = self.active.slice(layer, level);
        let before = slice.current_intent();
        let barrier = barrier::resolve_image_barrier(&ImageBarrierRequest {
            image: self.active.raw,
            aspect_mask: super::conv::map_aspect(self.active.aspect),
            base_mip_level: level,
            level_count: 1,
            base_array_layer: layer,
            layer_count: 1,
            before,
            after: next_intent,
        });
        *slice.current_intent.lock() = next_intent;
        barrier
    }

    /// As [`BufferContainer::replace_active_for_defrag`], for textures.
    pub fn replace_active_for_defrag(&mut self, replacement: TextureHandle) -> Arc<TextureHandle> {
        std::mem::replace(&mut self.active, Arc::new(replacement))
    }

    fn cycle(&mut self, make_replacement: impl FnOnce(&TextureHandle) -> TextureHandle) {
        if let Some(pos) = self
            .history
            .iter()
            .position(|h| !is_externally_referenced(h))
        {
            let reused = self.history.remove(pos);
            let retired = std::mem::replace(&mut self.active, reused);
            self.history.push(retired);
        } else {
            let fresh = Arc::new(make_replacement(&self.active));
            let retired = std::mem::replace(&mut self.active, fresh);
            self.history.push(retired);
        }
    }
}

#[derive(Debug)]
pub struct Sampler {
    pub raw: vk::Sampler,
}

#[derive(Debug)]
pub struct TextureView {
    pub raw: vk::ImageView,
    pub layers: NonZeroU32,
}

/// The occlusion query surface exists end-to-end but is a documented no-op
/// on this backend -- no `VkQueryPool` is ever created.
#[derive(Debug, Clone, Copy)]
pub struct OcclusionQuery {
    pub sentinel: u64,
}

impl OcclusionQuery {
    pub fn begin(&self) {
        log::trace!("occlusion query {} begin (no-op backend)", self.sentinel);
    }

    pub fn end(&self) {
        log::trace!("occlusion query {} end (no-op backend)", self.sentinel);
    }

    pub fn resolve(&self) -> u64 {
        log::trace!("occlusion query {} resolve (no-op backend)", self.sentinel);
        0
    }
}

#[derive(Debug)]
pub struct QuerySet {
    raw: Option<vk::QueryPool>,
}

/// Public resource names: clients hold a `Buffer`/`Texture`, which is
/// just the container wrapping the currently-active native handle.
pub type Buffer = BufferContainer;
pub type Texture = TextureContainer;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vulkan::allocator::UsedRegion;

    fn dummy_region() -> UsedRegion {
        UsedRegion {
            page: 0,
            offset: 0,
            size: 256,
            resource_offset: 0,
            resource_size: 256,
            alignment: 1,
            is_buffer: true,
        }
    }

    fn dummy_buffer() -> BufferContainer {
        BufferContainer::new(BufferHandle::new(
            vk::Buffer::null(),
            256,
            BufferUsages::UNIFORM,
            0,
            dummy_region(),
        ))
    }

    #[test]
    fn cycle_reuses_active_handle_when_unreferenced() {
        let mut container = dummy_buffer();
        let before = container.active().raw;
        container.prepare_for_write(WriteOption::Cycle, AccessIntent::TransferWrite, |h| {
            BufferHandle::new(vk::Buffer::null(), h.size, h.usage, h.memory_type_index, dummy_region())
        });
        // Nothing externally references the handle, so it keeps using the
        // same one rather than cycling.
        assert_eq!(container.active().raw, before);
        assert!(container.history.is_empty());
    }

    #[test]
    fn cycle_allocates_new_handle_when_referenced() {
        let mut container = dummy_buffer();
        let kept_alive = Arc::clone(container.active());
        container.prepare_for_write(WriteOption::Cycle, AccessIntent::TransferWrite, |h| {
            BufferHandle::new(vk::Buffer::null(), h.size, h.usage, h.memory_type_index, dummy_region())
        });
        assert_eq!(container.history.len(), 1);
        assert!(Arc::ptr_eq(&container.history[0], &kept_alive));
        assert!(!Arc::ptr_eq(container.active(), &kept_alive));
    }

    #[test]
    fn cycle_reuses_history_entry_once_it_is_unreferenced() {
        let mut container = dummy_buffer();
        {
            let kept_alive = Arc::clone(container.active());
            container.prepare_for_write(WriteOption::Cycle, AccessIntent::TransferWrite, |h| {
                BufferHandle::new(vk::Buffer::null(), h.size, h.usage, h.memory_type_index, dummy_region())
            });
            drop(kept_alive);
        }
        // The old handle in history is now unreferenced; an external ref on
        // the NEW active handle should force reuse of that history entry
        // rather than allocating a third handle.
        let kept_alive_new = Arc::clone(container.active());
        container.prepare_for_write(WriteOption::Cycle, AccessIntent::TransferWrite, |h| {
            BufferHandle::new(vk::Buffer::null(), h.size, h.usage, h.memory_type_index, dummy_region())
        });
        assert_eq!(container.history.len(), 1);
        assert!(Arc::ptr_eq(&container.history[0], &kept_alive_new));
    }

    #[test]
    fn safe_write_option_always_updates_intent_without_cycling() {
        let mut container = dummy_buffer();
        let before = container.active().raw;
        let _kept_alive = Arc::clone(container.active());
        container.prepare_for_write(WriteOption::Safe, AccessIntent::TransferWrite, |h| {
            BufferHandle::new(vk::Buffer::null(), h.size, h.usage, h.memory_type_index, dummy_region())
        });
        assert_eq!(container.active().raw, before);
        assert_eq!(container.active().current_intent(), AccessIntent::TransferWrite);
    }
}
