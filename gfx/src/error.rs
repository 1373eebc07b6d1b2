//! Converts the internal `Result<T, hal::DeviceError>` plumbing into the
//! null/zero/bool/logged-warning contract every public entry point in this
//! crate exposes: nothing here ever throws or
//! panics on a recoverable driver condition.

use hal::{DeviceError, SurfaceError};

/// Tri-state fence result: signaled, unsignaled, or erroneous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FenceState {
    Unsignaled = 0,
    Signaled = 1,
    Erroneous = -1,
}

impl FenceState {
    pub fn from_query(result: Result<bool, DeviceError>) -> Self {
        match result {
            Ok(true) => Self::Signaled,
            Ok(false) => Self::Unsignaled,
            Err(err) => {
                log::warn!("fence query failed: {err}");
                Self::Erroneous
            }
        }
    }
}

/// Logs `err` at the level its kind deserves and discards it, for a
/// `Create*` entry point that must hand the caller `None` rather than an
/// `Err`.
pub fn log_create_failure(what: &str, err: DeviceError) {
    match err {
        DeviceError::OutOfMemory => log::warn!("{what}: out of memory"),
        DeviceError::Lost => log::error!("{what}: device lost"),
        DeviceError::ResourceCreationFailed => log::warn!("{what}: resource creation failed"),
    }
}

pub fn log_surface_failure(what: &str, err: SurfaceError) {
    match err {
        SurfaceError::Lost => log::error!("{what}: surface lost"),
        SurfaceError::Outdated => log::warn!("{what}: swapchain out of date"),
        SurfaceError::Device(inner) => log_create_failure(what, inner),
    }
}

/// Logs a misuse condition: logged and an early return, not fatal.
pub fn log_misuse(what: &str, detail: impl std::fmt::Display) {
    log::warn!("{what}: {detail}");
}
