//! Shared types for the `gfx` Vulkan GPU abstraction.
//!
//! This crate has no Vulkan dependency of its own; it exists so that both
//! the backend (`gfx-hal`) and the frontend (`gfx`) agree on the same
//! format/usage/access vocabulary without either depending on the other.

mod access;
mod extent;
mod format;
mod limits;
mod usage;

pub use access::{AccessFlags, AccessIntent, ImageLayout, PipelineStages, StageAccessLayout};
pub use extent::{CopyExtent, Extent3d, SampleCount};
pub use format::{depth_stencil_aspect, promote_depth_format, TextureAspect, TextureFormat};
pub use limits::DeviceLimits;
pub use usage::{BufferUsages, TextureUsages};

/// Backend identifier. Only [`Backend::Vulkan`] has a working implementation
/// in this repository; the others exist so the backend-selection machinery
/// in `gfx::dispatch` has a real slice to iterate instead of a single
/// hard-coded case.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Backend {
    Vulkan,
    Metal,
    Dx12,
    Gl,
}

impl Backend {
    pub fn name(self) -> &'static str {
        match self {
            Backend::Vulkan => "vulkan",
            Backend::Metal => "metal",
            Backend::Dx12 => "dx12",
            Backend::Gl => "gl",
        }
    }
}
