/// The subset of `VkPhysicalDeviceLimits`/`VkPhysicalDeviceProperties` the
/// rest of the crate needs. Grounded on the fields
/// `wgpu-hal::vulkan::adapter::PhysicalDeviceProperties` and
/// `PrivateCapabilities` actually consume (timestamp period, UBO
/// alignment, depth-format support bits).
#[derive(Debug, Clone, Copy)]
pub struct DeviceLimits {
    /// `minUniformBufferOffsetAlignment`. Every dynamic-offset slab
    /// section is rounded up to this.
    pub min_uniform_buffer_offset_alignment: u64,
    /// `nonCoherentAtomSize`, used to align host-visible flush ranges.
    pub non_coherent_atom_size: u64,
    pub max_color_attachments: u32,
    pub timestamp_period: f32,
    pub texture_d24_supported: bool,
    pub texture_d24_s8_supported: bool,
    pub texture_d32_supported: bool,
    pub texture_d32_s8_supported: bool,
}

impl DeviceLimits {
    /// Round `offset` up to the next multiple of
    /// `min_uniform_buffer_offset_alignment`.
    pub fn align_uniform_offset(&self, offset: u64) -> u64 {
        let align = self.min_uniform_buffer_offset_alignment.max(1);
        (offset + align - 1) / align * align
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligns_up_to_ubo_alignment() {
        let limits = DeviceLimits {
            min_uniform_buffer_offset_alignment: 256,
            non_coherent_atom_size: 64,
            max_color_attachments: 8,
            timestamp_period: 1.0,
            texture_d24_supported: true,
            texture_d24_s8_supported: true,
            texture_d32_supported: true,
            texture_d32_s8_supported: true,
        };
        assert_eq!(limits.align_uniform_offset(0), 0);
        assert_eq!(limits.align_uniform_offset(1), 256);
        assert_eq!(limits.align_uniform_offset(256), 256);
        assert_eq!(limits.align_uniform_offset(257), 512);
    }
}
