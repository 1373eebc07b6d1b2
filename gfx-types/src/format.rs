/// A texture's pixel layout.
///
/// Only the subset of formats the Vulkan core needs to reason about
/// (texel block size, depth/stencil promotion, sampler/storage
/// compatibility) is modeled; this is not a shader-reflection surface.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TextureFormat {
    R8Unorm,
    Rg8Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    R16Float,
    Rg16Float,
    Rgba16Float,
    R32Float,
    Rg32Float,
    Rgba32Float,
    R32Uint,
    Rgba32Uint,
    Depth16Unorm,
    Depth24Plus,
    Depth24PlusStencil8,
    Depth32Float,
    Depth32FloatStencil8,
}

impl TextureFormat {
    /// Size in bytes of one texel block. All formats modeled here are
    /// single-texel (uncompressed), so this is just the pixel size.
    pub fn texel_block_size(self) -> u32 {
        use TextureFormat::*;
        match self {
            R8Unorm => 1,
            Rg8Unorm => 2,
            Rgba8Unorm | Rgba8UnormSrgb | Bgra8Unorm | Bgra8UnormSrgb => 4,
            R16Float => 2,
            Rg16Float => 4,
            Rgba16Float => 8,
            R32Float | R32Uint => 4,
            Rg32Float => 8,
            Rgba32Float | Rgba32Uint => 16,
            Depth16Unorm => 2,
            Depth24Plus => 4,
            Depth24PlusStencil8 => 4,
            Depth32Float => 4,
            Depth32FloatStencil8 => 8,
        }
    }

    pub fn is_depth(self) -> bool {
        matches!(
            self,
            TextureFormat::Depth16Unorm
                | TextureFormat::Depth24Plus
                | TextureFormat::Depth24PlusStencil8
                | TextureFormat::Depth32Float
                | TextureFormat::Depth32FloatStencil8
        )
    }

    pub fn has_stencil(self) -> bool {
        matches!(
            self,
            TextureFormat::Depth24PlusStencil8 | TextureFormat::Depth32FloatStencil8
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureAspect {
    Color,
    Depth,
    Stencil,
    DepthStencil,
}

pub fn depth_stencil_aspect(format: TextureFormat) -> TextureAspect {
    match (format.is_depth(), format.has_stencil()) {
        (true, true) => TextureAspect::DepthStencil,
        (true, false) => TextureAspect::Depth,
        _ => TextureAspect::Color,
    }
}

/// Depth-format autopromotion: when the physical device doesn't support
/// the requested depth format, swap D24<->D32 and D24_S8<->D32_S8,
/// falling through to D16 if neither variant is supported. `is_supported`
/// is a caller-supplied probe (typically
/// `vkGetPhysicalDeviceFormatProperties` against `optimalTilingFeatures`
/// and `DEPTH_STENCIL_ATTACHMENT_BIT`).
///
/// Returns `None` if `format` isn't a depth format at all -- promotion
/// only applies to depth/depth-stencil formats; a non-depth unsupported
/// format is the caller's problem, and a capability query on it just
/// returns false.
pub fn promote_depth_format(
    format: TextureFormat,
    mut is_supported: impl FnMut(TextureFormat) -> bool,
) -> Option<TextureFormat> {
    if !format.is_depth() {
        return None;
    }
    if is_supported(format) {
        return Some(format);
    }
    let swapped = match format {
        TextureFormat::Depth24Plus => TextureFormat::Depth32Float,
        TextureFormat::Depth32Float => TextureFormat::Depth24Plus,
        TextureFormat::Depth24PlusStencil8 => TextureFormat::Depth32FloatStencil8,
        TextureFormat::Depth32FloatStencil8 => TextureFormat::Depth24PlusStencil8,
        other => other,
    };
    if is_supported(swapped) {
        return Some(swapped);
    }
    if is_supported(TextureFormat::Depth16Unorm) {
        return Some(TextureFormat::Depth16Unorm);
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texel_block_sizes() {
        assert_eq!(TextureFormat::Rgba8Unorm.texel_block_size(), 4);
        assert_eq!(TextureFormat::Rgba32Float.texel_block_size(), 16);
        assert_eq!(TextureFormat::Depth32FloatStencil8.texel_block_size(), 8);
    }

    #[test]
    fn promotes_d24_to_d32_when_unsupported() {
        let promoted = promote_depth_format(TextureFormat::Depth24Plus, |f| {
            f == TextureFormat::Depth32Float
        });
        assert_eq!(promoted, Some(TextureFormat::Depth32Float));
    }

    #[test]
    fn falls_through_to_d16() {
        let promoted =
            promote_depth_format(TextureFormat::Depth24PlusStencil8, |f| {
                f == TextureFormat::Depth16Unorm
            });
        assert_eq!(promoted, Some(TextureFormat::Depth16Unorm));
    }

    #[test]
    fn non_depth_format_is_not_promoted() {
        assert_eq!(
            promote_depth_format(TextureFormat::Rgba8Unorm, |_| false),
            None
        );
    }
}
