//! Instance creation and adapter enumeration.
//!
//! Grounded on the same create-instance / enable-debug-callback /
//! enumerate-physical-devices shape used throughout the corpus's Vulkan
//! backends, expressed with `ash` 0.38's entry-loading and builder API
//! rather than the raw struct-literal style of the older `ash` used in
//! some of the reference material.

use std::ffi::{CStr, CString};

use ash::vk;

use super::{Adapter, DebugUtils, Instance, InstanceShared, PrivateCapabilities};

const ENGINE_NAME: &CStr = unsafe { CStr::from_bytes_with_nul_unchecked(b"gfx\0") };

unsafe extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _types: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    let message = CStr::from_ptr((*data).p_message).to_string_lossy();
    if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        log::error!("{message}");
    } else if severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::WARNING) {
        log::warn!("{message}");
    } else {
        log::debug!("{message}");
    }
    vk::FALSE
}

impl Instance {
    /// Creates a `VkInstance` with the surface extensions needed for
    /// `raw-window-handle`-driven presentation, plus `VK_EXT_debug_utils`
    /// when `enable_validation` is set.
    pub unsafe fn new(app_name: &str, enable_validation: bool) -> Result<Self, crate::DeviceError> {
        let entry = ash::Entry::linked();

        let app_name_c = CString::new(app_name).unwrap_or_default();
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name_c)
            .engine_name(ENGINE_NAME)
            .api_version(vk::API_VERSION_1_2);

        let mut extension_names = ash_window_extensions();
        if enable_validation {
            extension_names.push(ash::extensions::ext::DebugUtils::name());
        }
        let extension_names_raw: Vec<_> = extension_names.iter().map(|e| e.as_ptr()).collect();

        let layer_name = CStr::from_bytes_with_nul(b"VK_LAYER_KHRONOS_validation\0").unwrap();
        let layers_raw = if enable_validation {
            vec![layer_name.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extension_names_raw)
            .enabled_layer_names(&layers_raw);

        let raw = entry
            .create_instance(&create_info, None)
            .map_err(|_| crate::DeviceError::ResourceCreationFailed)?;

        let debug_utils = if enable_validation {
            let extension = ash::extensions::ext::DebugUtils::new(&entry, &raw);
            let messenger_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
                .message_severity(
                    vk::DebugUtilsMessageSeverityFlagsEXT::ERROR
                        | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                        | vk::DebugUtilsMessageSeverityFlagsEXT::INFO,
                )
                .message_type(
                    vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                        | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                        | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
                )
                .pfn_user_callback(Some(debug_callback));
            let messenger = extension
                .create_debug_utils_messenger(&messenger_info, None)
                .map_err(|_| crate::DeviceError::ResourceCreationFailed)?;
            Some(DebugUtils {
                extension,
                messenger,
            })
        } else {
            None
        };

        Ok(Self {
            shared: std::sync::Arc::new(InstanceShared {
                raw,
                entry,
                extensions: extension_names,
                debug_utils,
                instance_api_version: vk::API_VERSION_1_2,
            }),
        })
    }

    pub fn entry(&self) -> &ash::Entry {
        &self.shared.entry
    }

    pub fn raw(&self) -> &ash::Instance {
        &self.shared.raw
    }

    /// Creates a native `VkSurfaceKHR` for a windowing-system handle
    /// backing `ClaimWindow`'s collaborator obligation to create a native
    /// surface for a window handle.
    /// `ash-window` supplies the per-platform `vkCreate*SurfaceKHR` dispatch
    /// so this crate doesn't hand-roll Xlib/Wayland/Win32/Metal FFI itself.
    pub unsafe fn create_surface(
        &self,
        display_handle: raw_window_handle::RawDisplayHandle,
        window_handle: raw_window_handle::RawWindowHandle,
    ) -> Result<vk::SurfaceKHR, crate::DeviceError> {
        ash_window::create_surface(
            &self.shared.entry,
            &self.shared.raw,
            display_handle,
            window_handle,
            None,
        )
        .map_err(crate::DeviceError::from)
    }

    /// Enumerates every adapter that reports a working graphics+compute
    /// queue family, preferring discrete GPUs when more than one exists
    /// (picks the first that reports a working driver, applied
    /// after sorting by device type).
    pub unsafe fn enumerate_adapters(&self) -> Result<Vec<Adapter>, crate::DeviceError> {
        let physical_devices = self
            .shared
            .raw
            .enumerate_physical_devices()
            .map_err(crate::DeviceError::from)?;

        let mut adapters: Vec<Adapter> = physical_devices
            .into_iter()
            .filter_map(|raw| self.inspect_adapter(raw))
            .collect();
        adapters.sort_by_key(|adapter| match adapter_device_type(&self.shared, adapter.raw) {
            vk::PhysicalDeviceType::DISCRETE_GPU => 0,
            vk::PhysicalDeviceType::INTEGRATED_GPU => 1,
            _ => 2,
        });
        Ok(adapters)
    }

    unsafe fn inspect_adapter(&self, raw: vk::PhysicalDevice) -> Option<Adapter> {
        let queue_families = self.shared.raw.get_physical_device_queue_family_properties(raw);
        let queue_family_index = queue_families.iter().position(|family| {
            family.queue_flags.contains(vk::QueueFlags::GRAPHICS)
                && family.queue_flags.contains(vk::QueueFlags::COMPUTE)
        })? as u32;

        let memory_properties = self.shared.raw.get_physical_device_memory_properties(raw);
        let limits = self.shared.raw.get_physical_device_properties(raw).limits;
        let features12 = {
            let mut f12 = vk::PhysicalDeviceVulkan12Features::default();
            let mut features = vk::PhysicalDeviceFeatures2::builder().push_next(&mut f12);
            self.shared
                .raw
                .get_physical_device_features2(raw, &mut features);
            f12
        };

        let private_caps = PrivateCapabilities {
            imageless_framebuffers: false,
            timeline_semaphores: features12.timeline_semaphore == vk::TRUE,
            texture_d24: format_supported(&self.shared.raw, raw, vk::Format::X8_D24_UNORM_PACK32),
            texture_d24_s8: format_supported(&self.shared.raw, raw, vk::Format::D24_UNORM_S8_UINT),
            texture_d32: format_supported(&self.shared.raw, raw, vk::Format::D32_SFLOAT),
            texture_d32_s8: format_supported(&self.shared.raw, raw, vk::Format::D32_SFLOAT_S8_UINT),
            non_coherent_atom_size: limits.non_coherent_atom_size,
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment,
            max_color_attachments: limits.max_color_attachments,
            timestamp_period: limits.timestamp_period,
        };

        Some(Adapter {
            raw,
            instance: self.shared.clone(),
            memory_properties,
            queue_family_index,
            private_caps,
        })
    }
}

fn adapter_device_type(instance: &InstanceShared, raw: vk::PhysicalDevice) -> vk::PhysicalDeviceType {
    unsafe { instance.raw.get_physical_device_properties(raw).device_type }
}

fn format_supported(instance: &ash::Instance, raw: vk::PhysicalDevice, format: vk::Format) -> bool {
    let props = unsafe { instance.get_physical_device_format_properties(raw, format) };
    props
        .optimal_tiling_features
        .contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT)
}

#[cfg(all(unix, not(target_os = "android"), not(target_os = "macos")))]
fn ash_window_extensions() -> Vec<&'static CStr> {
    vec![
        ash::extensions::khr::Surface::name(),
        ash::extensions::khr::XlibSurface::name(),
        ash::extensions::khr::WaylandSurface::name(),
    ]
}

#[cfg(target_os = "android")]
fn ash_window_extensions() -> Vec<&'static CStr> {
    vec![
        ash::extensions::khr::Surface::name(),
        ash::extensions::khr::AndroidSurface::name(),
    ]
}

#[cfg(target_os = "macos")]
fn ash_window_extensions() -> Vec<&'static CStr> {
    vec![
        ash::extensions::khr::Surface::name(),
        ash::extensions::ext::MetalSurface::name(),
    ]
}

#[cfg(windows)]
fn ash_window_extensions() -> Vec<&'static CStr> {
    vec![
        ash::extensions::khr::Surface::name(),
        ash::extensions::khr::Win32Surface::name(),
    ]
}
