use std::any::Any;

use crate::buffer::ReadbackStats;
use crate::error::{ReadbackError, ReadbackResult};
use crate::format::PixelFormat;
use crate::region::{ReadFlags, ReadRegion};
use crate::resolve::{ResolveParams, ResolveStrategy};

/// How the texture may be bound on the GPU side.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TextureUsage {
    pub render_target: bool,
    pub depth_stencil: bool,
    pub shader_resource: bool,
    /// Allocated in a CPU-visible readback heap/pool. Such textures
    /// can be mapped directly without a staging copy.
    pub cpu_readback: bool,
}

/// Shape and format of a GPU texture. The readback core only borrows
/// texture handles; lifetime is owned by the rendering system.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    /// Volume depth; 1 for 2D textures.
    pub depth: u32,
    /// Array length; 6 for cube maps.
    pub array_size: u32,
    pub mip_levels: u32,
    pub sample_count: u32,
    pub format: PixelFormat,
    pub usage: TextureUsage,
}

impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            width,
            height,
            depth: 1,
            array_size: 1,
            mip_levels: 1,
            sample_count: 1,
            format,
            usage: TextureUsage::default(),
        }
    }

    pub const fn is_multisampled(&self) -> bool {
        self.sample_count > 1
    }

    /// Extent of the given mip, clamped to 1 per axis.
    pub fn mip_extent(&self, mip_level: u32) -> (u32, u32, u32) {
        (
            (self.width >> mip_level).max(1),
            (self.height >> mip_level).max(1),
            (self.depth >> mip_level).max(1),
        )
    }

    /// D3D-style subresource index: `mip + slice * mip_levels`.
    pub fn subresource_index(&self, mip_level: u32, array_slice: u32) -> u32 {
        mip_level + array_slice * self.mip_levels
    }
}

/// Opaque handle to a GPU-resident texture. Backend implementations
/// downcast via [`as_any`](Self::as_any) to their concrete resource
/// type; handing a texture to a backend that did not create it is an
/// `InvalidConfig` error, not UB.
pub trait GpuTexture: Send + Sync {
    fn desc(&self) -> &TextureDesc;
    fn as_any(&self) -> &dyn Any;
}

/// View of a mapped staging resource.
///
/// `row_pitch` is the byte stride between rows and may exceed
/// `width * bytes_per_pixel` (D3D12 aligns rows to 256 bytes);
/// `slice_pitch` is the stride between depth slices. Decoders must
/// advance by pitch, never by logical row size.
#[derive(Clone, Copy, Debug)]
pub struct MappedSurface<'a> {
    pub data: &'a [u8],
    pub row_pitch: usize,
    pub slice_pitch: usize,
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

/// A CPU-mappable resource holding pixel data for one read operation.
///
/// Exactly one mapping may be outstanding per read call; `unmap` (or
/// drop) releases it.
pub trait StagingSurface: Send {
    fn map(&mut self) -> ReadbackResult<MappedSurface<'_>>;
    fn unmap(&mut self);
}

/// Result of [`ReadbackBackend::acquire_staging`].
pub struct AcquiredStaging {
    pub surface: Box<dyn StagingSurface>,
    /// Where the requested rectangle landed inside the staging
    /// resource. `(0, 0)`-based after a copy; the original rectangle
    /// when the source was returned directly.
    pub region: ReadRegion,
    /// The source texture was already CPU-visible and is being mapped
    /// in place, with no staging allocation or GPU copy.
    pub direct: bool,
}

/// Backend capability set: staging provision, resolve execution, and
/// the sync gate. One implementation per graphics API; the decoder and
/// format table are shared and live outside this trait.
pub trait ReadbackBackend: Send {
    fn kind(&self) -> ReadbackBackendKind;

    /// Whether the device has been lost. Once true, every operation
    /// short-circuits with [`ReadbackError::DeviceRemoved`].
    fn device_removed(&self) -> bool;

    /// Guarantee all GPU commands writing `texture` have retired
    /// before the CPU maps anything derived from it. Submits the open
    /// command list if necessary and blocks on the fence with a
    /// bounded wait. This stalls the calling thread; it must never sit
    /// on a hot per-frame path.
    fn wait_for_writes(
        &mut self,
        texture: &dyn GpuTexture,
        stats: &mut ReadbackStats,
    ) -> ReadbackResult<()>;

    /// Produce a CPU-mappable resource containing the pixel data for
    /// the requested region, either by returning the CPU-visible
    /// source directly or by copying into a staging resource.
    fn acquire_staging(
        &mut self,
        texture: &dyn GpuTexture,
        region: &ReadRegion,
        flags: &ReadFlags,
        stats: &mut ReadbackStats,
    ) -> ReadbackResult<AcquiredStaging>;

    /// Collapse `src` (multisampled) into `dst` (single-sample) using
    /// the chosen strategy. Destination content outside the dest rect
    /// is preserved unless `params.clear_dest` requests a
    /// full-coverage clear.
    fn resolve(
        &mut self,
        src: &dyn GpuTexture,
        dst: &dyn GpuTexture,
        strategy: ResolveStrategy,
        params: &ResolveParams,
        stats: &mut ReadbackStats,
    ) -> ReadbackResult<()>;

    /// Allocate a transient single-sample texture used as the
    /// destination of per-sample MSAA extraction.
    fn create_resolve_target(&mut self, desc: &TextureDesc) -> ReadbackResult<Box<dyn GpuTexture>>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadbackBackendKind {
    Auto,
    D3d12,
    D3d11,
}

impl ReadbackBackendKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::D3d12 => "d3d12",
            Self::D3d11 => "d3d11",
        }
    }
}

/// Probe order used when the caller asks for `Auto`.
#[derive(Clone, Debug)]
pub struct AutoBackendPolicy {
    pub priority: Vec<ReadbackBackendKind>,
}

impl AutoBackendPolicy {
    pub fn normalized_priority(&self) -> Vec<ReadbackBackendKind> {
        let mut normalized = Vec::new();
        for kind in &self.priority {
            if *kind == ReadbackBackendKind::Auto {
                continue;
            }
            if !normalized.contains(kind) {
                normalized.push(*kind);
            }
        }
        if normalized.is_empty() {
            normalized.extend(DEFAULT_AUTO_BACKEND_PRIORITY);
        }
        normalized
    }
}

impl Default for AutoBackendPolicy {
    fn default() -> Self {
        Self {
            priority: DEFAULT_AUTO_BACKEND_PRIORITY.to_vec(),
        }
    }
}

pub const DEFAULT_AUTO_BACKEND_PRIORITY: [ReadbackBackendKind; 2] =
    [ReadbackBackendKind::D3d12, ReadbackBackendKind::D3d11];

pub fn default_backend() -> ReadbackResult<Box<dyn ReadbackBackend>> {
    backend_for_kind_with_auto_policy(ReadbackBackendKind::Auto, AutoBackendPolicy::default())
}

pub fn backend_for_kind(kind: ReadbackBackendKind) -> ReadbackResult<Box<dyn ReadbackBackend>> {
    backend_for_kind_with_auto_policy(kind, AutoBackendPolicy::default())
}

pub fn backend_for_kind_with_auto_policy(
    kind: ReadbackBackendKind,
    auto_policy: AutoBackendPolicy,
) -> ReadbackResult<Box<dyn ReadbackBackend>> {
    crate::platform::build_backend(kind, auto_policy)
}

/// Downcast helper for backend implementations.
pub(crate) fn expect_texture<'a, T: 'static>(
    texture: &'a dyn GpuTexture,
    backend: ReadbackBackendKind,
) -> ReadbackResult<&'a T> {
    texture.as_any().downcast_ref::<T>().ok_or_else(|| {
        ReadbackError::InvalidConfig(format!(
            "texture was not created by the {} backend",
            backend.as_str()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_policy_dedups_and_drops_auto() {
        let policy = AutoBackendPolicy {
            priority: vec![
                ReadbackBackendKind::Auto,
                ReadbackBackendKind::D3d11,
                ReadbackBackendKind::D3d11,
                ReadbackBackendKind::D3d12,
            ],
        };
        assert_eq!(
            policy.normalized_priority(),
            vec![ReadbackBackendKind::D3d11, ReadbackBackendKind::D3d12]
        );
    }

    #[test]
    fn empty_policy_falls_back_to_default_order() {
        let policy = AutoBackendPolicy {
            priority: vec![ReadbackBackendKind::Auto],
        };
        assert_eq!(
            policy.normalized_priority(),
            DEFAULT_AUTO_BACKEND_PRIORITY.to_vec()
        );
    }

    #[test]
    fn mip_extent_clamps_to_one() {
        let desc = TextureDesc {
            width: 64,
            height: 4,
            ..TextureDesc::new_2d(64, 4, PixelFormat::Rgba8Unorm)
        };
        assert_eq!(desc.mip_extent(0), (64, 4, 1));
        assert_eq!(desc.mip_extent(3), (8, 1, 1));
        assert_eq!(desc.mip_extent(8), (1, 1, 1));
    }

    #[test]
    fn subresource_index_is_mip_major() {
        let mut desc = TextureDesc::new_2d(16, 16, PixelFormat::Rgba8Unorm);
        desc.mip_levels = 4;
        desc.array_size = 6;
        assert_eq!(desc.subresource_index(0, 0), 0);
        assert_eq!(desc.subresource_index(2, 0), 2);
        assert_eq!(desc.subresource_index(1, 3), 13);
    }
}
