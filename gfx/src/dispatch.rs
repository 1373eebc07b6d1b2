//! Backend probing and selection.
//!
//! Rather than special-casing "no other backends exist", the
//! probing/override/preference-mask logic is implemented generically over a
//! `&[BackendDescriptor]` slice that today contains exactly one Vulkan
//! entry, so the dispatch code has no dead branches to later delete.

use gfxt::Backend;
use hal::DeviceError;

/// Overrides the preference mask entirely when set, matched
/// case-insensitively against [`Backend::name`] (`REFRESH_HINT_BACKEND`).
pub const BACKEND_OVERRIDE_ENV: &str = "REFRESH_HINT_BACKEND";

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BackendPreference: u32 {
        const VULKAN = 1 << 0;
        const METAL = 1 << 1;
        const DX12 = 1 << 2;
        const GL = 1 << 3;
    }
}

impl BackendPreference {
    pub fn all() -> Self {
        Self::VULKAN | Self::METAL | Self::DX12 | Self::GL
    }

    fn contains_backend(self, backend: Backend) -> bool {
        match backend {
            Backend::Vulkan => self.contains(Self::VULKAN),
            Backend::Metal => self.contains(Self::METAL),
            Backend::Dx12 => self.contains(Self::DX12),
            Backend::Gl => self.contains(Self::GL),
        }
    }
}

/// One entry in the compile-time-ordered backend list. `is_viable` mirrors
/// `PrepareDriver`: a cheap probe that doesn't create anything.
pub struct BackendDescriptor {
    pub backend: Backend,
    pub is_viable: fn() -> bool,
}

/// Vulkan is the only backend with a working implementation in this
/// repository. The slice is intentionally generic-shaped so a second
/// backend would be a one-line addition here, not a rewrite of
/// [`select_backend`].
pub fn backend_list() -> &'static [BackendDescriptor] {
    &[BackendDescriptor {
        backend: Backend::Vulkan,
        is_viable: vulkan_is_viable,
    }]
}

fn vulkan_is_viable() -> bool {
    // A real probe (`VkInstance` creation + required-extension check) is
    // performed by `hal::vulkan::Adapter::is_viable` once an instance
    // exists; at the list-selection stage before any instance is created,
    // Vulkan is assumed present on every platform this crate targets.
    true
}

/// `CreateDevice(preferred_backends_mask, debug_mode)`'s backend-selection
/// half: honor `REFRESH_HINT_BACKEND` first, then the caller's
/// preference mask, then the first viable entry in compile-time order.
pub fn select_backend(preferred: BackendPreference) -> Result<Backend, DeviceError> {
    if let Ok(name) = std::env::var(BACKEND_OVERRIDE_ENV) {
        let wanted = name.trim().to_lowercase();
        if let Some(entry) = backend_list()
            .iter()
            .find(|entry| entry.backend.name() == wanted)
        {
            if (entry.is_viable)() {
                log::info!("{BACKEND_OVERRIDE_ENV} selected backend {}", entry.backend.name());
                return Ok(entry.backend);
            }
            log::warn!(
                "{BACKEND_OVERRIDE_ENV}={name} named a backend with no working driver; falling back"
            );
        } else {
            log::warn!("{BACKEND_OVERRIDE_ENV}={name} does not name a known backend; falling back");
        }
    }

    for entry in backend_list() {
        if preferred.contains_backend(entry.backend) && (entry.is_viable)() {
            return Ok(entry.backend);
        }
    }

    for entry in backend_list() {
        if (entry.is_viable)() {
            log::info!(
                "no preferred backend had a working driver; falling back to {}",
                entry.backend.name()
            );
            return Ok(entry.backend);
        }
    }

    Err(DeviceError::Lost)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_preference_still_falls_back_to_the_first_viable_backend() {
        let chosen = select_backend(BackendPreference::empty());
        assert_eq!(chosen.unwrap(), Backend::Vulkan);
    }

    #[test]
    fn preference_mask_matching_vulkan_selects_it() {
        let chosen = select_backend(BackendPreference::VULKAN);
        assert_eq!(chosen.unwrap(), Backend::Vulkan);
    }
}
