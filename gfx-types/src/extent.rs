#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Extent3d {
    pub width: u32,
    pub height: u32,
    pub depth_or_array_layers: u32,
}

impl Extent3d {
    /// Dimensions of mip level `level` of a texture with this base extent:
    /// `max(1, base_dim >> level)` in width/height (depth/array layers
    /// don't shrink with mip level here; layers are addressed per-slice
    /// and 3D depth mipping isn't in scope).
    pub fn mip_level_size(self, level: u32) -> Extent3d {
        Extent3d {
            width: (self.width >> level).max(1),
            height: (self.height >> level).max(1),
            depth_or_array_layers: self.depth_or_array_layers,
        }
    }
}

/// The source extent/offset for a copy or blit, always 3D even for 2D
/// textures (depth = 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CopyExtent {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// MSAA sample count. Vulkan only allows power-of-two counts up to the
/// device's reported maximum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SampleCount {
    X1,
    X2,
    X4,
    X8,
}

impl SampleCount {
    pub const fn as_u32(self) -> u32 {
        match self {
            SampleCount::X1 => 1,
            SampleCount::X2 => 2,
            SampleCount::X4 => 4,
            SampleCount::X8 => 8,
        }
    }

    /// Largest supported count <= `desired`, given a bitmask of supported
    /// counts (bit `n` set means `2^n` samples supported). Backs
    /// `GetBestSampleCount`.
    pub fn best_supported(desired: SampleCount, supported_mask: u32) -> SampleCount {
        let candidates = [
            SampleCount::X8,
            SampleCount::X4,
            SampleCount::X2,
            SampleCount::X1,
        ];
        for &candidate in &candidates {
            if candidate > desired {
                continue;
            }
            let bit = match candidate {
                SampleCount::X1 => 0,
                SampleCount::X2 => 1,
                SampleCount::X4 => 2,
                SampleCount::X8 => 3,
            };
            if supported_mask & (1 << bit) != 0 {
                return candidate;
            }
        }
        SampleCount::X1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_level_size_floors_at_one() {
        let base = Extent3d {
            width: 256,
            height: 256,
            depth_or_array_layers: 1,
        };
        assert_eq!(base.mip_level_size(0).width, 256);
        assert_eq!(base.mip_level_size(8).width, 1);
        assert_eq!(base.mip_level_size(9).width, 1);
    }

    #[test]
    fn best_supported_falls_back_to_lower_count() {
        // only X1 and X4 supported
        let mask = 0b0101;
        assert_eq!(
            SampleCount::best_supported(SampleCount::X8, mask),
            SampleCount::X4
        );
        assert_eq!(
            SampleCount::best_supported(SampleCount::X2, mask),
            SampleCount::X1
        );
    }
}
