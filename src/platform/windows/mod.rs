pub(crate) mod d3d11;
pub(crate) mod d3d12;
mod d3d12_resolve;
mod resolve_shader;

pub use d3d11::{D3d11Backend, D3d11Texture};
pub use d3d12::{D3d12Backend, D3d12Texture, ReadbackLayout};

use windows::Win32::Graphics::Dxgi::Common::{
    DXGI_FORMAT, DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
    DXGI_FORMAT_D24_UNORM_S8_UINT, DXGI_FORMAT_D32_FLOAT_S8X24_UINT, DXGI_FORMAT_R8_UNORM,
    DXGI_FORMAT_R8G8B8A8_UNORM, DXGI_FORMAT_R8G8B8A8_UNORM_SRGB, DXGI_FORMAT_R10G10B10A2_UNORM,
    DXGI_FORMAT_R11G11B10_FLOAT, DXGI_FORMAT_R16_TYPELESS, DXGI_FORMAT_R16_UNORM,
    DXGI_FORMAT_R16G16_UNORM, DXGI_FORMAT_R16G16B16A16_FLOAT, DXGI_FORMAT_R16G16B16A16_UNORM,
    DXGI_FORMAT_R24_UNORM_X8_TYPELESS, DXGI_FORMAT_R24G8_TYPELESS, DXGI_FORMAT_R32G8X24_TYPELESS,
    DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS, DXGI_FORMAT_R32G32B32A32_FLOAT,
};

use crate::backend::{AutoBackendPolicy, ReadbackBackend, ReadbackBackendKind};
use crate::env_config::define_env_flag;
use crate::error::{ReadbackError, ReadbackResult};
use crate::format::PixelFormat;

define_env_flag!(enabled_unless(
    direct_map_enabled,
    "SNOW_READBACK_DISABLE_DIRECT_MAP"
));

pub(crate) fn build_backend(
    kind: ReadbackBackendKind,
    auto_policy: AutoBackendPolicy,
) -> ReadbackResult<Box<dyn ReadbackBackend>> {
    let candidates = match kind {
        ReadbackBackendKind::Auto => auto_policy.normalized_priority(),
        explicit => vec![explicit],
    };

    let mut failures = Vec::new();
    for candidate in candidates {
        let result: ReadbackResult<Box<dyn ReadbackBackend>> = match candidate {
            ReadbackBackendKind::D3d12 => {
                d3d12::D3d12Backend::new().map(|b| Box::new(b) as Box<dyn ReadbackBackend>)
            }
            ReadbackBackendKind::D3d11 => {
                d3d11::D3d11Backend::new().map(|b| Box::new(b) as Box<dyn ReadbackBackend>)
            }
            ReadbackBackendKind::Auto => continue,
        };
        match result {
            Ok(backend) => return Ok(backend),
            Err(err) => failures.push(format!("{}: {err}", candidate.as_str())),
        }
    }

    Err(ReadbackError::BackendUnavailable(failures.join("; ")))
}

/// DXGI format for creating resources of a readback-table format.
pub(crate) fn dxgi_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::R8Unorm => DXGI_FORMAT_R8_UNORM,
        PixelFormat::R16Typeless => DXGI_FORMAT_R16_TYPELESS,
        PixelFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        PixelFormat::Rgba8UnormSrgb => DXGI_FORMAT_R8G8B8A8_UNORM_SRGB,
        PixelFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        PixelFormat::Bgra8UnormSrgb => DXGI_FORMAT_B8G8R8A8_UNORM_SRGB,
        PixelFormat::Rgb10A2Unorm => DXGI_FORMAT_R10G10B10A2_UNORM,
        PixelFormat::Rg11B10Float => DXGI_FORMAT_R11G11B10_FLOAT,
        PixelFormat::Rg16Unorm => DXGI_FORMAT_R16G16_UNORM,
        PixelFormat::Rgba16Unorm => DXGI_FORMAT_R16G16B16A16_UNORM,
        PixelFormat::Rgba16Float => DXGI_FORMAT_R16G16B16A16_FLOAT,
        PixelFormat::Rgba32Float => DXGI_FORMAT_R32G32B32A32_FLOAT,
        PixelFormat::Depth24Stencil8 => DXGI_FORMAT_R24G8_TYPELESS,
        PixelFormat::Depth32Stencil8 => DXGI_FORMAT_R32G8X24_TYPELESS,
    }
}

/// Map a DXGI format to the readback table. Accepts both the typeless
/// parents and the typed depth variants callers commonly hold.
pub(crate) fn pixel_format_from_dxgi(format: DXGI_FORMAT) -> ReadbackResult<PixelFormat> {
    let mapped = match format {
        DXGI_FORMAT_R8_UNORM => PixelFormat::R8Unorm,
        DXGI_FORMAT_R16_TYPELESS | DXGI_FORMAT_R16_UNORM => PixelFormat::R16Typeless,
        DXGI_FORMAT_R8G8B8A8_UNORM => PixelFormat::Rgba8Unorm,
        DXGI_FORMAT_R8G8B8A8_UNORM_SRGB => PixelFormat::Rgba8UnormSrgb,
        DXGI_FORMAT_B8G8R8A8_UNORM => PixelFormat::Bgra8Unorm,
        DXGI_FORMAT_B8G8R8A8_UNORM_SRGB => PixelFormat::Bgra8UnormSrgb,
        DXGI_FORMAT_R10G10B10A2_UNORM => PixelFormat::Rgb10A2Unorm,
        DXGI_FORMAT_R11G11B10_FLOAT => PixelFormat::Rg11B10Float,
        DXGI_FORMAT_R16G16_UNORM => PixelFormat::Rg16Unorm,
        DXGI_FORMAT_R16G16B16A16_UNORM => PixelFormat::Rgba16Unorm,
        DXGI_FORMAT_R16G16B16A16_FLOAT => PixelFormat::Rgba16Float,
        DXGI_FORMAT_R32G32B32A32_FLOAT => PixelFormat::Rgba32Float,
        DXGI_FORMAT_R24G8_TYPELESS | DXGI_FORMAT_D24_UNORM_S8_UINT => {
            PixelFormat::Depth24Stencil8
        }
        DXGI_FORMAT_R32G8X24_TYPELESS | DXGI_FORMAT_D32_FLOAT_S8X24_UINT => {
            PixelFormat::Depth32Stencil8
        }
        other => {
            return Err(ReadbackError::UnsupportedFormat(format!("{other:?}")));
        }
    };
    Ok(mapped)
}

/// Typed view format for binding a readback-table format as a shader
/// resource or render target. Typeless formats resolve to the view the
/// decode path expects (depth-as-red for depth/stencil).
pub(crate) fn shader_view_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::R16Typeless => DXGI_FORMAT_R16_UNORM,
        PixelFormat::Depth24Stencil8 => DXGI_FORMAT_R24_UNORM_X8_TYPELESS,
        PixelFormat::Depth32Stencil8 => DXGI_FORMAT_R32_FLOAT_X8X24_TYPELESS,
        other => dxgi_format(other),
    }
}

/// Typed depth-stencil view format for the depth resolve targets.
pub(crate) fn depth_view_format(format: PixelFormat) -> DXGI_FORMAT {
    match format {
        PixelFormat::Depth32Stencil8 => DXGI_FORMAT_D32_FLOAT_S8X24_UINT,
        _ => DXGI_FORMAT_D24_UNORM_S8_UINT,
    }
}

/// Format passed to the hardware `ResolveSubresource` call; must not
/// be typeless.
pub(crate) fn resolve_dest_format(format: PixelFormat) -> DXGI_FORMAT {
    shader_view_format(format)
}
