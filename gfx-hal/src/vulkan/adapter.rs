//! Logical device creation from a selected [`Adapter`] (`CreateDevice(debug)`).

use std::ffi::CStr;
use std::sync::atomic::AtomicIsize;
use std::sync::Arc;

use ash::vk;
use parking_lot::Mutex;

use super::{Adapter, Device, DeviceExtensionFunctions, DeviceShared, Queue};
use crate::DeviceError;

const REQUIRED_DEVICE_EXTENSIONS: &[&CStr] = &[
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_KHR_swapchain\0") },
];
const TIMELINE_SEMAPHORE_EXTENSION: &CStr =
    unsafe { CStr::from_bytes_with_nul_unchecked(b"VK_KHR_timeline_semaphore\0") };

/// Descriptor pool growth step handed to `gpu_descriptor::DescriptorAllocator::new`.
const DESCRIPTOR_POOL_GROWTH: u32 = 128;

impl Adapter {
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    pub fn private_capabilities(&self) -> &super::PrivateCapabilities {
        &self.private_caps
    }

    /// `PrepareDriver`: probes the extensions a working driver needs
    /// without creating anything.
    pub unsafe fn is_viable(&self) -> bool {
        let available = self
            .instance
            .raw
            .enumerate_device_extension_properties(self.raw)
            .unwrap_or_default();
        REQUIRED_DEVICE_EXTENSIONS.iter().all(|required| {
            available.iter().any(|ext| {
                CStr::from_ptr(ext.extension_name.as_ptr()) == *required
            })
        })
    }

    /// `CreateDevice(debug)`: creates the logical device and single
    /// graphics/compute/present queue this crate operates on, enabling
    /// `VK_KHR_timeline_semaphore` when the adapter reports it.
    pub unsafe fn open(&self, debug: bool) -> Result<(Device, Queue), DeviceError> {
        let _ = debug;
        let queue_priorities = [1.0f32];
        let queue_create_info = vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(self.queue_family_index)
            .queue_priorities(&queue_priorities);
        let queue_create_infos = [queue_create_info.build()];

        let mut extension_names: Vec<*const std::os::raw::c_char> = REQUIRED_DEVICE_EXTENSIONS
            .iter()
            .map(|name| name.as_ptr())
            .collect();
        if self.private_caps.timeline_semaphores {
            extension_names.push(TIMELINE_SEMAPHORE_EXTENSION.as_ptr());
        }

        let mut timeline_features =
            vk::PhysicalDeviceTimelineSemaphoreFeatures::builder().timeline_semaphore(true);

        let mut create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names);
        if self.private_caps.timeline_semaphores {
            create_info = create_info.push_next(&mut timeline_features);
        }

        let raw = self
            .instance
            .raw
            .create_device(self.raw, &create_info, None)?;

        let timeline_semaphore_fn = if self.private_caps.timeline_semaphores {
            Some(ash::extensions::khr::TimelineSemaphore::new(
                &self.instance.raw,
                &raw,
            ))
        } else {
            None
        };

        let raw_queue = raw.get_device_queue(self.queue_family_index, 0);

        let shared = Arc::new(DeviceShared {
            raw,
            family_index: self.queue_family_index,
            queue_index: 0,
            raw_queue,
            instance: self.instance.clone(),
            physical_device: self.raw,
            extension_fns: DeviceExtensionFunctions {
                timeline_semaphore: timeline_semaphore_fn,
            },
            private_caps: self.private_caps.clone(),
            render_passes: Mutex::new(crate::FastHashMap::default()),
            framebuffers: Mutex::new(crate::FastHashMap::default()),
            descriptor_set_layouts: Mutex::new(crate::FastHashMap::default()),
            pipeline_layouts: Mutex::new(crate::FastHashMap::default()),
        });

        let mem_allocator =
            super::allocator::DeviceAllocator::new(self.memory_properties);
        let desc_allocator = gpu_descriptor::DescriptorAllocator::new(DESCRIPTOR_POOL_GROWTH);
        let uniform_pool = super::descriptor::UniformBufferPool::new(
            self.private_caps.min_uniform_buffer_offset_alignment,
        );

        let device = Device {
            shared: shared.clone(),
            mem_allocator: Mutex::new(mem_allocator),
            desc_allocator: Mutex::new(desc_allocator),
            uniform_pool: Mutex::new(uniform_pool),
        };

        let swapchain_fn = ash::extensions::khr::Swapchain::new(&self.instance.raw, &shared.raw);
        let relay_semaphores = [
            shared.raw.create_semaphore(&vk::SemaphoreCreateInfo::builder(), None)?,
            shared.raw.create_semaphore(&vk::SemaphoreCreateInfo::builder(), None)?,
        ];
        let queue = Queue {
            raw: raw_queue,
            swapchain_fn,
            device: shared,
            family_index: self.queue_family_index,
            relay_semaphores,
            relay_index: AtomicIsize::new(-1),
        };

        Ok((device, queue))
    }
}
