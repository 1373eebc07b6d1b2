//! Queue submission and presentation.
//!
//! A chain of two semaphores relays the signal from one submission to the
//! following present: reusing a single semaphore both ways hangs on some
//! drivers, so `Queue::relay_semaphores` ping-pongs between the pair.

use std::sync::atomic::Ordering;

use arrayvec::ArrayVec;
use ash::vk;

use super::command::CommandBuffer;
use super::fence::{CommandFencePool, Fence};
use super::surface::{Surface, SurfaceTexture};
use crate::{DeviceError, FenceValue, SurfaceError};

impl super::Queue {
    /// Low-level submit: collects wait semaphores from any attached
    /// swapchain acquires plus the previous submission's relay semaphore,
    /// signals the next relay semaphore, and optionally bumps an explicit
    /// client-owned [`Fence`] to `value` via a timeline semaphore signal or
    /// a pool fence, matching whichever strategy the device is using.
    pub unsafe fn submit(
        &self,
        command_buffers: &[&CommandBuffer],
        surface_textures: &[&SurfaceTexture],
        signal_fence: Option<(&mut Fence, FenceValue)>,
    ) -> Result<vk::Fence, DeviceError> {
        self.submit_with_native_fence(command_buffers, surface_textures, signal_fence, vk::Fence::null())
    }

    /// As [`Self::submit`], but the caller supplies the native `VkFence`
    /// that `vkQueueSubmit` signals (used by [`Self::submit_and_track`] to
    /// hand in a fence drawn from a [`CommandFencePool`] instead of one
    /// derived from an explicit client [`Fence`]).
    unsafe fn submit_with_native_fence(
        &self,
        command_buffers: &[&CommandBuffer],
        surface_textures: &[&SurfaceTexture],
        signal_fence: Option<(&mut Fence, FenceValue)>,
        mut fence_raw: vk::Fence,
    ) -> Result<vk::Fence, DeviceError> {
        let mut wait_stage_masks = Vec::new();
        let mut wait_semaphores = Vec::new();
        let mut signal_semaphores = ArrayVec::<_, 2>::new();
        let mut signal_values = ArrayVec::<_, 2>::new();

        for surface_texture in surface_textures {
            wait_stage_masks.push(vk::PipelineStageFlags::TOP_OF_PIPE);
            wait_semaphores.push(surface_texture.wait_semaphore);
        }
        for cmd in command_buffers {
            for &(semaphore, stage) in &cmd.wait_semaphores {
                wait_stage_masks.push(stage);
                wait_semaphores.push(semaphore);
            }
        }

        let old_index = self.relay_index.load(Ordering::Relaxed);
        let sem_index = if old_index >= 0 {
            wait_stage_masks.push(vk::PipelineStageFlags::TOP_OF_PIPE);
            wait_semaphores.push(self.relay_semaphores[old_index as usize]);
            (old_index as usize + 1) % self.relay_semaphores.len()
        } else {
            0
        };
        signal_semaphores.push(self.relay_semaphores[sem_index]);
        self.relay_index.store(sem_index as isize, Ordering::Relaxed);

        for cmd in command_buffers {
            for &semaphore in &cmd.signal_semaphores {
                signal_semaphores.push(semaphore);
            }
        }

        if let Some((fence, value)) = signal_fence {
            fence.maintain(&self.device.raw)?;
            match fence {
                Fence::TimelineSemaphore(raw) => {
                    signal_semaphores.push(*raw);
                    signal_values.push(!0);
                    signal_values.push(value);
                }
                Fence::FencePool { active, free, .. } => {
                    fence_raw = match free.pop() {
                        Some(raw) => raw,
                        None => self.device.raw.create_fence(&vk::FenceCreateInfo::builder(), None)?,
                    };
                    active.push((value, fence_raw));
                }
            }
        }

        let vk_cmd_buffers: Vec<_> = command_buffers.iter().map(|cmd| cmd.raw).collect();
        let mut vk_info = vk::SubmitInfo::builder()
            .command_buffers(&vk_cmd_buffers)
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stage_masks)
            .signal_semaphores(&signal_semaphores);

        let mut vk_timeline_info;
        if !signal_values.is_empty() {
            vk_timeline_info =
                vk::TimelineSemaphoreSubmitInfo::builder().signal_semaphore_values(&signal_values);
            vk_info = vk_info.push_next(&mut vk_timeline_info);
        }

        profiling::scope!("vkQueueSubmit");
        self.device.raw.queue_submit(self.raw, &[vk_info.build()], fence_raw)?;
        Ok(fence_raw)
    }

    /// Submits one command buffer end-to-end: draws a fresh per-submission
    /// fence, ends native recording, submits,
    /// and tracks the buffer for later cleanup.
    pub unsafe fn submit_and_track(
        &self,
        mut command_buffer: CommandBuffer,
        surface_textures: &[&SurfaceTexture],
        fence_pool: &mut CommandFencePool,
        pool: &mut super::command::CommandPool,
    ) -> Result<(), DeviceError> {
        self.device.raw.end_command_buffer(command_buffer.raw)?;
        let fence = fence_pool.acquire(&self.device.raw)?;
        command_buffer.fence = Some(fence);

        let buffers = [&command_buffer];
        self.submit_with_native_fence(&buffers, surface_textures, None, fence)?;

        pool.track_submitted(command_buffer);
        Ok(())
    }

    /// As [`Self::submit_and_track`], but leaves the drawn fence's
    /// auto-release flag unset and hands the raw `VkFence` back to the
    /// caller (`SubmitAndAcquireFence`): the client queries or waits on
    /// it directly and must eventually hand it back via
    /// [`CommandFencePool::release`] (`ReleaseFence`) instead of having
    /// [`CommandPool::clean_submitted`] recycle it silently.
    pub unsafe fn submit_and_acquire_fence(
        &self,
        mut command_buffer: CommandBuffer,
        surface_textures: &[&SurfaceTexture],
        fence_pool: &mut CommandFencePool,
        pool: &mut super::command::CommandPool,
    ) -> Result<vk::Fence, DeviceError> {
        command_buffer.set_auto_release_fence(false);
        self.device.raw.end_command_buffer(command_buffer.raw)?;
        let fence = fence_pool.acquire(&self.device.raw)?;
        command_buffer.fence = Some(fence);

        let buffers = [&command_buffer];
        self.submit_with_native_fence(&buffers, surface_textures, None, fence)?;

        pool.track_submitted(command_buffer);
        Ok(fence)
    }

    /// Presents a previously acquired swapchain texture, waiting on the
    /// relay semaphore left over from the most recent submission.
    pub unsafe fn present(&self, surface: &Surface, texture: SurfaceTexture) -> Result<(), SurfaceError> {
        let swapchains = [texture.swapchain_raw];
        let image_indices = [texture.index];

        let old_index = self.relay_index.swap(-1, Ordering::Relaxed);
        let wait_semaphores: &[vk::Semaphore] = if old_index >= 0 {
            &self.relay_semaphores[old_index as usize..old_index as usize + 1]
        } else {
            &[]
        };

        let info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        profiling::scope!("vkQueuePresentKHR");
        let suboptimal = self
            .swapchain_fn
            .queue_present(self.raw, &info)
            .map_err(|error| match error {
                vk::Result::ERROR_OUT_OF_DATE_KHR => SurfaceError::Outdated,
                vk::Result::ERROR_SURFACE_LOST_KHR => SurfaceError::Lost,
                other => DeviceError::from(other).into(),
            })?;
        if suboptimal {
            log::warn!("suboptimal present of frame {}", texture.index);
        }
        // The in-flight counter is decremented later, from
        // `CommandPool::clean_submitted`, once this present's fence signals
        // -- not here, since the GPU hasn't necessarily retired the frame
        // the moment `vkQueuePresentKHR` returns.
        let _ = surface;
        Ok(())
    }

    pub unsafe fn get_timestamp_period(&self) -> f32 {
        self.device.private_caps.timestamp_period
    }
}
