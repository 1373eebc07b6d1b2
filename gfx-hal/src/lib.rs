/*!
# Vulkan backend internals.

This crate is the single backend in scope for this design: the GPU
memory suballocator with defragmentation, resource-lifetime
and reference-tracking machinery, automatic barrier inference, descriptor
set caching, render-pass/framebuffer caching, swapchain lifecycle, the
uniform buffer pool, and the command-buffer submission/fencing/cleanup
pipeline.

## Stack memory

Ash expects slices, which we don't generally have available. We cope with
this by a combination of: temporarily allocating a `Vec` on the heap where
the overhead is acceptable, growing temporary local storage (`Temp`), and
using `ArrayVec`/`SmallVec` for the common small-N case.

## Framebuffers and render passes

Render passes are cached on the device and kept forever. Framebuffers are
also cached, but removed when any of the image views they reference is
destroyed.

## Fences

If timeline semaphores are available, they are used 1:1 with our fences.
Otherwise a pool of `VkFence` objects is managed behind each `Fence`.
!*/

mod error;
pub mod vulkan;

pub use error::{DeviceError, SurfaceError};

/// The index of a queue submission. Fences are counted by these, not by
/// Vulkan's native two-state fence semantics, so timeline semaphores and
/// fence pools can share one API (see `vulkan::fence`).
pub type FenceValue = u64;

pub const MAX_COLOR_ATTACHMENTS: usize = 4;
pub const MAX_BIND_GROUPS: usize = 4;
pub const MAX_VERTEX_BUFFERS: usize = 8;

/// Fast hash map used internally for caches keyed on structural hashes
/// (render passes, framebuffers, descriptor set layouts).
pub(crate) type FastHashMap<K, V> = rustc_hash::FxHashMap<K, V>;

/// An opaque drop guard a caller can attach to a resource so that, when the
/// resource is destroyed, some owning allocation (e.g. a borrowed
/// swapchain image) is kept alive exactly as long as needed.
pub type DropGuard = Box<dyn std::any::Any + Send + Sync>;
