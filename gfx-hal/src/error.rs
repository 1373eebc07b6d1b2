use thiserror::Error;

/// Fatal vs. soft out-of-memory, device loss, and the catch-all "something
/// the driver didn't like" bucket. Callers translate these into the
/// null/zero/logged-warning contract; they never propagate as a thrown
/// exception across the public API boundary.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeviceError {
    #[error("out of memory")]
    OutOfMemory,
    #[error("device lost")]
    Lost,
    #[error("resource creation would exceed device limits")]
    ResourceCreationFailed,
}

impl From<ash::vk::Result> for DeviceError {
    fn from(result: ash::vk::Result) -> Self {
        use ash::vk::Result as R;
        match result {
            R::ERROR_OUT_OF_HOST_MEMORY | R::ERROR_OUT_OF_DEVICE_MEMORY => {
                log::warn!("Vulkan call returned {result:?}");
                Self::OutOfMemory
            }
            R::ERROR_DEVICE_LOST => Self::Lost,
            other => {
                log::warn!("Unrecognized device error {other:?}");
                Self::Lost
            }
        }
    }
}

impl From<gpu_descriptor::CreatePoolError> for DeviceError {
    fn from(err: gpu_descriptor::CreatePoolError) -> Self {
        log::warn!("gpu-descriptor pool creation failed: {err}");
        Self::OutOfMemory
    }
}

impl From<gpu_descriptor::DeviceAllocationError> for DeviceError {
    fn from(err: gpu_descriptor::DeviceAllocationError) -> Self {
        log::warn!("gpu-descriptor allocation failed: {err}");
        Self::OutOfMemory
    }
}

/// Surface/swapchain failure modes: recovered locally by recreating
/// the swapchain and reattempting acquisition once.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum SurfaceError {
    #[error("surface lost")]
    Lost,
    #[error("swapchain is out of date and must be reconfigured")]
    Outdated,
    #[error(transparent)]
    Device(#[from] DeviceError),
}
