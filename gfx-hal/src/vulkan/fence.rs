//! Fences, following `wgpu-hal::vulkan::fence`: prefer
//! `VK_KHR_timeline_semaphore` when the device reports it, falling back to a
//! `Vec<(FenceValue, vk::Fence)>` pool otherwise. Both are hidden behind one
//! `Fence` enum so the rest of the crate never branches on which strategy is
//! active.

use ash::vk;

use crate::FenceValue;

/// A single logical fence, backed by either a timeline semaphore or a pool
/// of plain `VkFence`s depending on what [`super::PrivateCapabilities`]
/// reported at device creation.
#[derive(Debug)]
pub enum Fence {
    TimelineSemaphore(vk::Semaphore),
    FencePool {
        last_completed: FenceValue,
        /// Ascending by `FenceValue`.
        active: Vec<(FenceValue, vk::Fence)>,
        free: Vec<vk::Fence>,
    },
}

impl Fence {
    pub fn new_timeline(raw: vk::Semaphore) -> Self {
        Self::TimelineSemaphore(raw)
    }

    pub fn new_pool() -> Self {
        Self::FencePool {
            last_completed: 0,
            active: Vec::new(),
            free: Vec::new(),
        }
    }

    fn check_active(
        device: &ash::Device,
        mut last_completed: FenceValue,
        active: &[(FenceValue, vk::Fence)],
    ) -> Result<FenceValue, crate::DeviceError> {
        for &(value, raw) in active {
            unsafe {
                if value > last_completed && device.get_fence_status(raw)? {
                    last_completed = value;
                }
            }
        }
        Ok(last_completed)
    }

    pub(super) fn get_latest(
        &self,
        device: &ash::Device,
        timeline_semaphore_ext: Option<&ash::extensions::khr::TimelineSemaphore>,
    ) -> Result<FenceValue, crate::DeviceError> {
        match *self {
            Self::TimelineSemaphore(raw) => unsafe {
                let value = match timeline_semaphore_ext {
                    Some(ext) => ext.get_semaphore_counter_value(raw)?,
                    None => device.get_semaphore_counter_value(raw)?,
                };
                Ok(value)
            },
            Self::FencePool {
                last_completed,
                ref active,
                free: _,
            } => Self::check_active(device, last_completed, active),
        }
    }

    /// Recycles any now-signaled pool fences. A no-op for the timeline
    /// variant. Call periodically (after submission cleanup) so a
    /// `FencePool` doesn't grow without bound.
    pub(super) fn maintain(&mut self, device: &ash::Device) -> Result<(), crate::DeviceError> {
        match *self {
            Self::TimelineSemaphore(_) => {}
            Self::FencePool {
                ref mut last_completed,
                ref mut active,
                ref mut free,
            } => {
                let latest = Self::check_active(device, *last_completed, active)?;
                let base_free = free.len();
                for &(value, raw) in active.iter() {
                    if value <= latest {
                        free.push(raw);
                    }
                }
                if free.len() != base_free {
                    active.retain(|&(value, _)| value > latest);
                    unsafe {
                        device.reset_fences(&free[base_free..])?;
                    }
                }
                *last_completed = latest;
            }
        }
        Ok(())
    }
}

/// Plain-`VkFence` recycling pool backing one [`super::command::CommandBuffer`]
/// submission each: draws a fresh fence from the fence pool. Distinct
/// from the per-queue [`Fence`] enum above, which tracks submission order
/// rather than individual command-buffer completion.
#[derive(Default)]
pub struct CommandFencePool {
    free: Vec<vk::Fence>,
}

impl CommandFencePool {
    pub fn new() -> Self {
        Self::default()
    }

    pub unsafe fn acquire(&mut self, device: &ash::Device) -> Result<vk::Fence, crate::DeviceError> {
        if let Some(fence) = self.free.pop() {
            device.reset_fences(&[fence])?;
            return Ok(fence);
        }
        let info = vk::FenceCreateInfo::builder();
        Ok(device.create_fence(&info, None)?)
    }

    pub fn release(&mut self, fence: vk::Fence) {
        self.free.push(fence);
    }

    pub unsafe fn destroy(&mut self, device: &ash::Device) {
        for fence in self.free.drain(..) {
            device.destroy_fence(fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fence_pool_variant_tracks_highest_signaled_free_value() {
        // check_active is exercised indirectly through get_latest in
        // integration paths; this just pins the invariant that an empty
        // active list leaves last_completed untouched.
        let fence = Fence::FencePool {
            last_completed: 3,
            active: Vec::new(),
            free: Vec::new(),
        };
        match fence {
            Fence::FencePool { last_completed, .. } => assert_eq!(last_completed, 3),
            _ => unreachable!(),
        }
    }

    #[test]
    fn released_fence_is_reused_before_creating_a_new_one() {
        let mut pool = CommandFencePool::new();
        pool.release(vk::Fence::from_raw(42));
        assert_eq!(pool.free.len(), 1);
    }
}
