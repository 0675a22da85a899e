//! Read rectangles, subresource selection, and conversion flags.
//!
//! [`ReadRegion`] describes the texture-space rectangle to read;
//! [`ReadFlags`] controls how raw pixels are converted to the
//! canonical output (depth linearization, stencil output, gamma,
//! range compression, MSAA sample selection).

use crate::backend::TextureDesc;
use crate::error::{ReadbackError, ReadbackResult};

/// A rectangle in texture space. Edges are exclusive: the region covers
/// `x0..x1` by `y0..y1`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReadRegion {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl ReadRegion {
    pub const fn new(x0: u32, y0: u32, x1: u32, y1: u32) -> Self {
        Self { x0, y0, x1, y1 }
    }

    /// The full extent of mip 0 of `desc`.
    pub fn full(desc: &TextureDesc) -> Self {
        Self::new(0, 0, desc.width, desc.height)
    }

    pub const fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub const fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    /// Validate `0 <= x0 < x1 <= mip width` (and the same for y)
    /// against the selected mip of `desc`.
    pub fn validate(&self, desc: &TextureDesc, mip_level: u32) -> ReadbackResult<()> {
        if mip_level >= desc.mip_levels {
            return Err(ReadbackError::InvalidRegion(format!(
                "mip {mip_level} out of range (texture has {} mips)",
                desc.mip_levels
            )));
        }
        let (mip_width, mip_height, _) = desc.mip_extent(mip_level);
        if self.x0 >= self.x1 || self.y0 >= self.y1 {
            return Err(ReadbackError::InvalidRegion(format!(
                "empty region {self:?}"
            )));
        }
        if self.x1 > mip_width || self.y1 > mip_height {
            return Err(ReadbackError::InvalidRegion(format!(
                "{self:?} exceeds {mip_width}x{mip_height} (mip {mip_level})"
            )));
        }
        Ok(())
    }

    /// Whether this region covers the full extent of mip 0.
    pub fn covers(&self, desc: &TextureDesc) -> bool {
        self.x0 == 0 && self.y0 == 0 && self.x1 == desc.width && self.y1 == desc.height
    }
}

/// Depth-slice range for volume texture reads. Exclusive upper bound.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ZRange {
    pub z0: u32,
    pub z1: u32,
}

impl ZRange {
    pub const fn new(z0: u32, z1: u32) -> Self {
        Self { z0, z1 }
    }

    pub const fn depth(&self) -> u32 {
        self.z1 - self.z0
    }

    pub fn validate(&self, desc: &TextureDesc, mip_level: u32) -> ReadbackResult<()> {
        let (_, _, mip_depth) = desc.mip_extent(mip_level);
        if self.z0 >= self.z1 || self.z1 > mip_depth {
            return Err(ReadbackError::InvalidRegion(format!(
                "{self:?} exceeds depth {mip_depth} (mip {mip_level})"
            )));
        }
        Ok(())
    }
}

/// Cube map face selector, in the conventional +X/-X/+Y/-Y/+Z/-Z
/// array-slice order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CubeFace {
    PosX,
    NegX,
    PosY,
    NegY,
    PosZ,
    NegZ,
}

impl CubeFace {
    pub const fn array_slice(self) -> u32 {
        match self {
            Self::PosX => 0,
            Self::NegX => 1,
            Self::PosY => 2,
            Self::NegY => 3,
            Self::PosZ => 4,
            Self::NegZ => 5,
        }
    }
}

/// Which mip/slice/face of the texture the read targets.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SubresourceSelector {
    pub mip_level: u32,
    pub array_slice: u32,
    /// When set, overrides `array_slice` with the face's slice index.
    pub cube_face: Option<CubeFace>,
}

impl SubresourceSelector {
    pub fn effective_array_slice(&self) -> u32 {
        match self.cube_face {
            Some(face) => face.array_slice(),
            None => self.array_slice,
        }
    }

    pub fn validate(&self, desc: &TextureDesc) -> ReadbackResult<()> {
        let slice = self.effective_array_slice();
        if slice >= desc.array_size {
            return Err(ReadbackError::InvalidRegion(format!(
                "array slice {slice} out of range (array size {})",
                desc.array_size
            )));
        }
        Ok(())
    }
}

/// How float-format pixels are mapped into 8-bit output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RangeCompression {
    /// Two-pass per-channel min/max scan over the whole requested
    /// region, seeded with [0, 1] so in-range data quantizes exactly
    /// as a fixed [0, 1] mapping would. HDR values outside [0, 1]
    /// expand the scan bounds instead of clipping.
    #[default]
    MinMaxNorm,
    /// Plain clamp to [0, 1] before quantization.
    Clamp,
}

/// Near/far parameters for reconstructing linear depth from a
/// perspective device-Z value.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DepthLinearization {
    pub near_plane: f32,
    pub far_plane: f32,
}

impl DepthLinearization {
    /// Map a device-Z value in [0, 1] to eye-space depth normalized by
    /// the far plane, clamped to [0, 1]. Device Z 1.0 maps to exactly
    /// 1.0; device Z 0.0 maps to `near / far`.
    pub fn normalize(&self, device_z: f32) -> f32 {
        let device_z = device_z.clamp(0.0, 1.0);
        let denom = self.far_plane - device_z * (self.far_plane - self.near_plane);
        if denom <= 0.0 {
            return 1.0;
        }
        let eye_z = self.near_plane * self.far_plane / denom;
        (eye_z / self.far_plane).clamp(0.0, 1.0)
    }
}

/// Conversion flags honored by the readback decoder.
#[derive(Clone, Copy, Debug, Default)]
pub struct ReadFlags {
    /// For depth/stencil formats: output the raw stencil byte
    /// replicated across RGB instead of depth.
    pub output_stencil: bool,

    /// For depth/stencil formats: reconstruct linear depth with the
    /// given near/far planes. When `None`, raw device Z is quantized
    /// directly.
    pub depth: Option<DepthLinearization>,

    /// Apply the IEC 61966-2-1 sRGB encoding when quantizing float
    /// sources to 8 bits. Exact-format (unorm) sources pass through
    /// byte-for-byte regardless of this flag.
    pub linear_to_gamma: bool,

    pub range: RangeCompression,

    /// Read a single MSAA sample plane instead of all samples.
    pub sample_index: Option<u32>,

    pub subresource: SubresourceSelector,
}
