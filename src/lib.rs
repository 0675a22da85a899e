//! Render-target resolve and CPU readback for D3D11/D3D12.
//!
//! One backend-neutral pipeline — sync gate, MSAA resolve, staging
//! copy, map, decode — shared by both backends, with the pure-CPU
//! pixel decoder and format table living entirely outside the
//! platform layer. Readback blocks the calling thread until the GPU
//! work producing the pixels has retired; it is a deliberate pipeline
//! stall and does not belong on a hot per-frame path.
//!
//! ```no_run
//! use snow_readback::{ReadFlags, ReadRegion, ReadbackSession};
//! # fn demo(texture: &dyn snow_readback::GpuTexture) -> Result<(), Box<dyn std::error::Error>> {
//! let mut session = ReadbackSession::new()?;
//! let region = ReadRegion::new(0, 0, 256, 256);
//! let pixels = session.read_surface(texture, region, ReadFlags::default())?;
//! assert_eq!(pixels.as_bytes().len(), 256 * 256 * 4);
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod buffer;
pub mod decode;
pub(crate) mod env_config;
pub mod error;
pub mod format;
mod platform;
pub mod readback;
pub mod region;
pub mod resolve;
pub mod sync;

pub use backend::{
    AcquiredStaging, AutoBackendPolicy, GpuTexture, MappedSurface, ReadbackBackend,
    ReadbackBackendKind, StagingSurface, TextureDesc, TextureUsage,
};
pub use buffer::{ColorBuffer, FloatColorBuffer, ReadbackStats};
pub use error::{ReadbackError, ReadbackErrorClass, ReadbackResult};
pub use format::PixelFormat;
pub use readback::{MappedStaging, ReadbackSession};
pub use region::{
    CubeFace, DepthLinearization, RangeCompression, ReadFlags, ReadRegion, SubresourceSelector,
    ZRange,
};
pub use resolve::{ResolveParams, ResolveStrategy};

#[cfg(target_os = "windows")]
pub use platform::windows::{
    D3d11Backend, D3d11Texture, D3d12Backend, D3d12Texture, ReadbackLayout,
};
