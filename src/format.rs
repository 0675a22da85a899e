//! Closed pixel-format table for the readback decode path.
//!
//! Every format a render target can be read back in is enumerated here
//! with its byte size and classification. Adding a GPU format requires
//! a new entry *and* a new decode branch in [`crate::decode`] — the
//! decode logic is format-specific bit manipulation, so this is a
//! closed enumeration rather than a plugin table.

/// GPU pixel formats supported by the readback decoder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Single 8-bit unorm channel.
    R8Unorm,
    /// 16-bit typeless, read as unorm16 (shadow-depth style targets).
    R16Typeless,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Bgra8UnormSrgb,
    /// Packed 10-10-10-2 unorm.
    Rgb10A2Unorm,
    /// Packed 11-11-10 small-float HDR format (no sign bits).
    Rg11B10Float,
    Rg16Unorm,
    Rgba16Unorm,
    Rgba16Float,
    Rgba32Float,
    /// 24-bit depth + 8-bit stencil packed into one 32-bit word
    /// (R24G8 typeless).
    Depth24Stencil8,
    /// 32-bit float depth + 8-bit stencil + 24 unused bits
    /// (R32G8X24 typeless, used where 32-bit depth is required).
    Depth32Stencil8,
}

impl PixelFormat {
    pub const fn bytes_per_pixel(self) -> u32 {
        match self {
            Self::R8Unorm => 1,
            Self::R16Typeless => 2,
            Self::Rgba8Unorm
            | Self::Rgba8UnormSrgb
            | Self::Bgra8Unorm
            | Self::Bgra8UnormSrgb
            | Self::Rgb10A2Unorm
            | Self::Rg11B10Float
            | Self::Rg16Unorm
            | Self::Depth24Stencil8 => 4,
            Self::Rgba16Unorm | Self::Rgba16Float | Self::Depth32Stencil8 => 8,
            Self::Rgba32Float => 16,
        }
    }

    /// Formats whose bit layout is fixed but whose numeric
    /// interpretation is supplied at view-creation time.
    pub const fn is_typeless(self) -> bool {
        matches!(
            self,
            Self::R16Typeless | Self::Depth24Stencil8 | Self::Depth32Stencil8
        )
    }

    pub const fn is_depth_stencil(self) -> bool {
        matches!(self, Self::Depth24Stencil8 | Self::Depth32Stencil8)
    }

    /// Formats carrying floating-point components. These take the
    /// two-pass min/max normalization path when quantized to 8 bits.
    pub const fn has_float_components(self) -> bool {
        matches!(self, Self::Rg11B10Float | Self::Rgba16Float | Self::Rgba32Float)
    }

    pub const fn name(self) -> &'static str {
        match self {
            Self::R8Unorm => "R8_UNORM",
            Self::R16Typeless => "R16_TYPELESS",
            Self::Rgba8Unorm => "R8G8B8A8_UNORM",
            Self::Rgba8UnormSrgb => "R8G8B8A8_UNORM_SRGB",
            Self::Bgra8Unorm => "B8G8R8A8_UNORM",
            Self::Bgra8UnormSrgb => "B8G8R8A8_UNORM_SRGB",
            Self::Rgb10A2Unorm => "R10G10B10A2_UNORM",
            Self::Rg11B10Float => "R11G11B10_FLOAT",
            Self::Rg16Unorm => "R16G16_UNORM",
            Self::Rgba16Unorm => "R16G16B16A16_UNORM",
            Self::Rgba16Float => "R16G16B16A16_FLOAT",
            Self::Rgba32Float => "R32G32B32A32_FLOAT",
            Self::Depth24Stencil8 => "R24G8_TYPELESS",
            Self::Depth32Stencil8 => "R32G8X24_TYPELESS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_sizes_match_packed_layouts() {
        assert_eq!(PixelFormat::R8Unorm.bytes_per_pixel(), 1);
        assert_eq!(PixelFormat::R16Typeless.bytes_per_pixel(), 2);
        assert_eq!(PixelFormat::Bgra8Unorm.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rg11B10Float.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Depth24Stencil8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgba16Float.bytes_per_pixel(), 8);
        assert_eq!(PixelFormat::Depth32Stencil8.bytes_per_pixel(), 8);
        assert_eq!(PixelFormat::Rgba32Float.bytes_per_pixel(), 16);
    }

    #[test]
    fn depth_formats_are_typeless_depth_stencil() {
        for format in [PixelFormat::Depth24Stencil8, PixelFormat::Depth32Stencil8] {
            assert!(format.is_typeless());
            assert!(format.is_depth_stencil());
            assert!(!format.has_float_components());
        }
    }

    #[test]
    fn every_format_has_a_stable_name() {
        for format in [
            PixelFormat::R8Unorm,
            PixelFormat::Rgb10A2Unorm,
            PixelFormat::Depth32Stencil8,
        ] {
            assert!(!format.name().is_empty());
        }
    }
}
