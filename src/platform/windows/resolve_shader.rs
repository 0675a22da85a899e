use anyhow::Context;
use std::sync::OnceLock;
use windows::Win32::Graphics::Direct3D::D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST;
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_CONSTANT_BUFFER, D3D11_BUFFER_DESC, D3D11_CLEAR_DEPTH, D3D11_CLEAR_STENCIL,
    D3D11_COMPARISON_ALWAYS, D3D11_CPU_ACCESS_WRITE, D3D11_CULL_NONE, D3D11_DEPTH_STENCIL_DESC,
    D3D11_DEPTH_STENCIL_VIEW_DESC, D3D11_DEPTH_WRITE_MASK_ALL, D3D11_FILL_SOLID,
    D3D11_MAP_WRITE_DISCARD, D3D11_MAPPED_SUBRESOURCE, D3D11_RASTERIZER_DESC,
    D3D11_RENDER_TARGET_VIEW_DESC, D3D11_RENDER_TARGET_VIEW_DESC_0, D3D11_RTV_DIMENSION_TEXTURE2D,
    D3D11_SHADER_RESOURCE_VIEW_DESC, D3D11_SHADER_RESOURCE_VIEW_DESC_0, D3D11_SRV_DIMENSION_TEXTURE2D,
    D3D11_SRV_DIMENSION_TEXTURE2DMS, D3D11_TEX2D_DSV, D3D11_TEX2D_RTV, D3D11_TEX2D_SRV,
    D3D11_TEX2DMS_SRV, D3D11_USAGE_DYNAMIC, D3D11_VIEWPORT, D3D11_DEPTH_STENCIL_VIEW_DESC_0,
    D3D11_DSV_DIMENSION_TEXTURE2D, ID3D11Buffer, ID3D11DepthStencilState, ID3D11DepthStencilView,
    ID3D11Device, ID3D11DeviceContext, ID3D11PixelShader, ID3D11RasterizerState,
    ID3D11RenderTargetView, ID3D11Resource, ID3D11ShaderResourceView, ID3D11VertexShader,
};

use crate::backend::TextureDesc;
use crate::buffer::ReadbackStats;
use crate::error::{ReadbackError, ReadbackResult};
use crate::region::ReadRegion;
use crate::resolve::{ResolveParams, ResolveStrategy};

use super::{depth_view_format, shader_view_format};

// Try to use pre-compiled shader bytecode from build.rs (fxc.exe at build time).
// Falls back to runtime D3DCompile if the build-time compilation was skipped.

#[cfg(has_precompiled_resolve_vs)]
const PRECOMPILED_VS_CSO: &[u8] = include_bytes!(env!("RESOLVE_VS_CSO_PATH"));

#[cfg(has_precompiled_resolve_extract)]
const PRECOMPILED_EXTRACT_CSO: &[u8] = include_bytes!(env!("RESOLVE_EXTRACT_CSO_PATH"));

#[cfg(has_precompiled_resolve_depth)]
const PRECOMPILED_DEPTH_CSO: &[u8] = include_bytes!(env!("RESOLVE_DEPTH_CSO_PATH"));

#[cfg(has_precompiled_resolve_depth_ss)]
const PRECOMPILED_DEPTH_SS_CSO: &[u8] = include_bytes!(env!("RESOLVE_DEPTH_SS_CSO_PATH"));

fn cached_bytecode_vs() -> &'static ReadbackResult<Vec<u8>> {
    static BYTECODE: OnceLock<ReadbackResult<Vec<u8>>> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_resolve_vs)]
        {
            Ok(PRECOMPILED_VS_CSO.to_vec())
        }
        #[cfg(not(has_precompiled_resolve_vs))]
        {
            compile_shader_runtime(b"main_vs\0", b"vs_5_0\0")
        }
    })
}

fn cached_bytecode_extract() -> &'static ReadbackResult<Vec<u8>> {
    static BYTECODE: OnceLock<ReadbackResult<Vec<u8>>> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_resolve_extract)]
        {
            Ok(PRECOMPILED_EXTRACT_CSO.to_vec())
        }
        #[cfg(not(has_precompiled_resolve_extract))]
        {
            compile_shader_runtime(b"main_extract\0", b"ps_5_0\0")
        }
    })
}

fn cached_bytecode_depth() -> &'static ReadbackResult<Vec<u8>> {
    static BYTECODE: OnceLock<ReadbackResult<Vec<u8>>> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_resolve_depth)]
        {
            Ok(PRECOMPILED_DEPTH_CSO.to_vec())
        }
        #[cfg(not(has_precompiled_resolve_depth))]
        {
            compile_shader_runtime(b"main_depth\0", b"ps_5_0\0")
        }
    })
}

fn cached_bytecode_depth_ss() -> &'static ReadbackResult<Vec<u8>> {
    static BYTECODE: OnceLock<ReadbackResult<Vec<u8>>> = OnceLock::new();
    BYTECODE.get_or_init(|| {
        #[cfg(has_precompiled_resolve_depth_ss)]
        {
            Ok(PRECOMPILED_DEPTH_SS_CSO.to_vec())
        }
        #[cfg(not(has_precompiled_resolve_depth_ss))]
        {
            compile_shader_runtime(b"main_depth_ss\0", b"ps_5_0\0")
        }
    })
}

/// Bytecode accessors for the D3D12 backend, which builds its own
/// pipeline state from the same DXBC blobs.
pub(crate) fn bytecode_vs() -> ReadbackResult<&'static [u8]> {
    bytecode_slice(cached_bytecode_vs())
}

pub(crate) fn bytecode_extract() -> ReadbackResult<&'static [u8]> {
    bytecode_slice(cached_bytecode_extract())
}

pub(crate) fn bytecode_depth() -> ReadbackResult<&'static [u8]> {
    bytecode_slice(cached_bytecode_depth())
}

pub(crate) fn bytecode_depth_ss() -> ReadbackResult<&'static [u8]> {
    bytecode_slice(cached_bytecode_depth_ss())
}

fn bytecode_slice(cached: &'static ReadbackResult<Vec<u8>>) -> ReadbackResult<&'static [u8]> {
    match cached {
        Ok(bytes) => Ok(bytes.as_slice()),
        Err(e) => Err(ReadbackError::Platform(anyhow::anyhow!(
            "resolve shader compilation failed: {e}"
        ))),
    }
}

#[cfg(any(
    not(has_precompiled_resolve_vs),
    not(has_precompiled_resolve_extract),
    not(has_precompiled_resolve_depth),
    not(has_precompiled_resolve_depth_ss),
))]
fn compile_shader_runtime(entry: &[u8], target: &[u8]) -> ReadbackResult<Vec<u8>> {
    use windows::Win32::Graphics::Direct3D::Fxc::D3DCompile;
    use windows::core::PCSTR;

    let source = include_str!("resolve.hlsl").as_bytes();
    let entry_pcstr = PCSTR::from_raw(entry.as_ptr());
    let target_pcstr = PCSTR::from_raw(target.as_ptr());
    let mut blob = None;
    let mut errors = None;

    let hr = unsafe {
        D3DCompile(
            source.as_ptr() as *const _,
            source.len(),
            None,
            None,
            None,
            entry_pcstr,
            target_pcstr,
            0,
            0,
            &mut blob,
            Some(&mut errors),
        )
    };

    if let Err(e) = hr {
        let msg = errors
            .map(|b| {
                let ptr = unsafe { b.GetBufferPointer() } as *const u8;
                let len = unsafe { b.GetBufferSize() };
                let slice = unsafe { std::slice::from_raw_parts(ptr, len) };
                String::from_utf8_lossy(slice).to_string()
            })
            .unwrap_or_default();
        return Err(ReadbackError::Platform(
            anyhow::anyhow!("HLSL compile failed: {msg}").context(e.to_string()),
        ));
    }

    let blob = blob.ok_or_else(|| {
        ReadbackError::Platform(anyhow::anyhow!("D3DCompile returned no blob"))
    })?;
    let ptr = unsafe { blob.GetBufferPointer() } as *const u8;
    let len = unsafe { blob.GetBufferSize() };
    Ok(unsafe { std::slice::from_raw_parts(ptr, len) }.to_vec())
}

#[repr(C)]
#[derive(Clone, Copy)]
struct ResolveConstants {
    src_offset_x: i32,
    src_offset_y: i32,
    sample_index: u32,
    _pad: u32,
}

/// Full-screen resolve pass: one vertex shader emitting a full-screen
/// triangle and one pixel shader per resolve strategy. Used whenever
/// the hardware `ResolveSubresource` cannot express the operation
/// (per-sample extraction, depth formats).
pub(crate) struct ResolvePass {
    vs: ID3D11VertexShader,
    ps_extract: ID3D11PixelShader,
    ps_depth: ID3D11PixelShader,
    ps_depth_ss: ID3D11PixelShader,
    cbuf: ID3D11Buffer,
    raster: ID3D11RasterizerState,
    /// Depth writes with an always-pass compare, used by the depth
    /// resolve strategies.
    depth_write_always: ID3D11DepthStencilState,
}

impl ResolvePass {
    pub(crate) fn new(device: &ID3D11Device) -> ReadbackResult<Self> {
        let vs_bytes = bytecode_vs()?;
        let mut vs: Option<ID3D11VertexShader> = None;
        unsafe { device.CreateVertexShader(vs_bytes, None, Some(&mut vs)) }
            .context("CreateVertexShader (resolve) failed")
            .map_err(ReadbackError::Platform)?;
        let vs = vs
            .context("CreateVertexShader (resolve) returned None")
            .map_err(ReadbackError::Platform)?;

        let ps_extract = create_pixel_shader(device, bytecode_extract()?, "extract")?;
        let ps_depth = create_pixel_shader(device, bytecode_depth()?, "depth")?;
        let ps_depth_ss = create_pixel_shader(device, bytecode_depth_ss()?, "depth_ss")?;

        let cbuf_desc = D3D11_BUFFER_DESC {
            ByteWidth: std::mem::size_of::<ResolveConstants>() as u32,
            Usage: D3D11_USAGE_DYNAMIC,
            BindFlags: D3D11_BIND_CONSTANT_BUFFER.0 as u32,
            CPUAccessFlags: D3D11_CPU_ACCESS_WRITE.0 as u32,
            ..Default::default()
        };
        let mut cbuf: Option<ID3D11Buffer> = None;
        unsafe { device.CreateBuffer(&cbuf_desc, None, Some(&mut cbuf)) }
            .context("CreateBuffer for resolve constants failed")
            .map_err(ReadbackError::Platform)?;
        let cbuf = cbuf
            .context("CreateBuffer for resolve constants returned None")
            .map_err(ReadbackError::Platform)?;

        let raster_desc = D3D11_RASTERIZER_DESC {
            FillMode: D3D11_FILL_SOLID,
            CullMode: D3D11_CULL_NONE,
            DepthClipEnable: true.into(),
            ..Default::default()
        };
        let mut raster: Option<ID3D11RasterizerState> = None;
        unsafe { device.CreateRasterizerState(&raster_desc, Some(&mut raster)) }
            .context("CreateRasterizerState (resolve) failed")
            .map_err(ReadbackError::Platform)?;
        let raster = raster
            .context("CreateRasterizerState (resolve) returned None")
            .map_err(ReadbackError::Platform)?;

        let depth_desc = D3D11_DEPTH_STENCIL_DESC {
            DepthEnable: true.into(),
            DepthWriteMask: D3D11_DEPTH_WRITE_MASK_ALL,
            DepthFunc: D3D11_COMPARISON_ALWAYS,
            StencilEnable: false.into(),
            ..Default::default()
        };
        let mut depth_write_always: Option<ID3D11DepthStencilState> = None;
        unsafe { device.CreateDepthStencilState(&depth_desc, Some(&mut depth_write_always)) }
            .context("CreateDepthStencilState (resolve) failed")
            .map_err(ReadbackError::Platform)?;
        let depth_write_always = depth_write_always
            .context("CreateDepthStencilState (resolve) returned None")
            .map_err(ReadbackError::Platform)?;

        Ok(Self {
            vs,
            ps_extract,
            ps_depth,
            ps_depth_ss,
            cbuf,
            raster,
            depth_write_always,
        })
    }

    /// Runs the full-screen resolve draw. `strategy` must be one of
    /// the shader strategies.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn resolve(
        &self,
        device: &ID3D11Device,
        context: &ID3D11DeviceContext,
        src: &ID3D11Resource,
        src_desc: &TextureDesc,
        dst: &ID3D11Resource,
        dst_desc: &TextureDesc,
        strategy: ResolveStrategy,
        params: &ResolveParams,
        stats: &mut ReadbackStats,
    ) -> ReadbackResult<()> {
        let dest_rect = params
            .dest_rect
            .unwrap_or(ReadRegion::new(0, 0, dst_desc.width, dst_desc.height));
        let source_rect = params
            .source_rect
            .unwrap_or(ReadRegion::new(0, 0, src_desc.width, src_desc.height));

        let constants = ResolveConstants {
            src_offset_x: source_rect.x0 as i32 - dest_rect.x0 as i32,
            src_offset_y: source_rect.y0 as i32 - dest_rect.y0 as i32,
            sample_index: params.sample_index.unwrap_or(0),
            _pad: 0,
        };
        self.update_cbuf(context, &constants)?;

        let (ps, srv_slot) = match strategy {
            ResolveStrategy::ShaderSingleSample => (&self.ps_extract, 0u32),
            ResolveStrategy::ShaderDepth => (&self.ps_depth, 1u32),
            ResolveStrategy::ShaderDepthNonMs => (&self.ps_depth_ss, 2u32),
            ResolveStrategy::Copy | ResolveStrategy::HardwareBox => {
                return Err(ReadbackError::InvalidConfig(
                    "copy strategies do not use the shader resolve pass".into(),
                ));
            }
        };

        let srv = create_source_view(device, src, src_desc, strategy)?;
        let viewport = D3D11_VIEWPORT {
            TopLeftX: dest_rect.x0 as f32,
            TopLeftY: dest_rect.y0 as f32,
            Width: dest_rect.width() as f32,
            Height: dest_rect.height() as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };

        unsafe {
            context.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            context.IASetInputLayout(None);
            context.VSSetShader(&self.vs, None);
            context.PSSetShader(ps, None);
            context.PSSetConstantBuffers(0, Some(&[Some(self.cbuf.clone())]));
            context.PSSetShaderResources(srv_slot, Some(&[Some(srv.clone())]));
            context.RSSetState(&self.raster);
            context.RSSetViewports(Some(&[viewport]));
        }

        if dst_desc.format.is_depth_stencil() {
            let dsv = create_depth_view(device, dst, dst_desc)?;
            unsafe {
                if params.clear_dest {
                    context.ClearDepthStencilView(
                        &dsv,
                        (D3D11_CLEAR_DEPTH.0 | D3D11_CLEAR_STENCIL.0) as u32,
                        0.0,
                        0,
                    );
                    stats.clears += 1;
                }
                context.OMSetDepthStencilState(&self.depth_write_always, 0);
                context.OMSetRenderTargets(None, &dsv);
                context.Draw(3, 0);
            }
        } else {
            let rtv = create_target_view(device, dst, dst_desc)?;
            unsafe {
                if params.clear_dest {
                    context.ClearRenderTargetView(&rtv, &[0.0, 0.0, 0.0, 0.0]);
                    stats.clears += 1;
                }
                context.OMSetDepthStencilState(None, 0);
                context.OMSetRenderTargets(Some(&[Some(rtv.clone())]), None);
                context.Draw(3, 0);
            }
        }

        // Unbind so the destination can immediately be used as a copy
        // source and the source texture can be rebound elsewhere.
        unsafe {
            let no_srv: Option<ID3D11ShaderResourceView> = None;
            context.PSSetShaderResources(srv_slot, Some(&[no_srv]));
            context.OMSetRenderTargets(Some(&[None]), None);
        }

        Ok(())
    }

    fn update_cbuf(
        &self,
        context: &ID3D11DeviceContext,
        constants: &ResolveConstants,
    ) -> ReadbackResult<()> {
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        unsafe { context.Map(&self.cbuf, 0, D3D11_MAP_WRITE_DISCARD, 0, Some(&mut mapped)) }
            .context("Map resolve constant buffer failed")
            .map_err(ReadbackError::Platform)?;
        unsafe {
            std::ptr::copy_nonoverlapping(
                constants as *const ResolveConstants as *const u8,
                mapped.pData as *mut u8,
                std::mem::size_of::<ResolveConstants>(),
            );
            context.Unmap(&self.cbuf, 0);
        }
        Ok(())
    }
}

fn create_pixel_shader(
    device: &ID3D11Device,
    bytecode: &[u8],
    label: &str,
) -> ReadbackResult<ID3D11PixelShader> {
    let mut ps: Option<ID3D11PixelShader> = None;
    unsafe { device.CreatePixelShader(bytecode, None, Some(&mut ps)) }
        .context(format!("CreatePixelShader ({label}) failed"))
        .map_err(ReadbackError::Platform)?;
    ps.context(format!("CreatePixelShader ({label}) returned None"))
        .map_err(ReadbackError::Platform)
}

/// SRV over the resolve source. Typeless formats need an explicit
/// typed view format; multisampled sources need the MS view dimension.
fn create_source_view(
    device: &ID3D11Device,
    src: &ID3D11Resource,
    src_desc: &TextureDesc,
    strategy: ResolveStrategy,
) -> ReadbackResult<ID3D11ShaderResourceView> {
    let format = shader_view_format(src_desc.format);
    let multisampled = matches!(
        strategy,
        ResolveStrategy::ShaderSingleSample | ResolveStrategy::ShaderDepth
    );

    let desc = if multisampled {
        D3D11_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            ViewDimension: D3D11_SRV_DIMENSION_TEXTURE2DMS,
            Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DMS: D3D11_TEX2DMS_SRV {
                    UnusedField_NothingToDefine: 0,
                },
            },
        }
    } else {
        D3D11_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            ViewDimension: D3D11_SRV_DIMENSION_TEXTURE2D,
            Anonymous: D3D11_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D11_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                },
            },
        }
    };

    let mut srv: Option<ID3D11ShaderResourceView> = None;
    unsafe { device.CreateShaderResourceView(src, Some(&desc), Some(&mut srv)) }
        .context("CreateShaderResourceView for resolve source failed")
        .map_err(ReadbackError::Platform)?;
    srv.context("CreateShaderResourceView returned None")
        .map_err(ReadbackError::Platform)
}

fn create_target_view(
    device: &ID3D11Device,
    dst: &ID3D11Resource,
    dst_desc: &TextureDesc,
) -> ReadbackResult<ID3D11RenderTargetView> {
    let desc = D3D11_RENDER_TARGET_VIEW_DESC {
        Format: shader_view_format(dst_desc.format),
        ViewDimension: D3D11_RTV_DIMENSION_TEXTURE2D,
        Anonymous: D3D11_RENDER_TARGET_VIEW_DESC_0 {
            Texture2D: D3D11_TEX2D_RTV { MipSlice: 0 },
        },
    };
    let mut rtv: Option<ID3D11RenderTargetView> = None;
    unsafe { device.CreateRenderTargetView(dst, Some(&desc), Some(&mut rtv)) }
        .context("CreateRenderTargetView for resolve target failed")
        .map_err(ReadbackError::Platform)?;
    rtv.context("CreateRenderTargetView returned None")
        .map_err(ReadbackError::Platform)
}

fn create_depth_view(
    device: &ID3D11Device,
    dst: &ID3D11Resource,
    dst_desc: &TextureDesc,
) -> ReadbackResult<ID3D11DepthStencilView> {
    let desc = D3D11_DEPTH_STENCIL_VIEW_DESC {
        Format: depth_view_format(dst_desc.format),
        ViewDimension: D3D11_DSV_DIMENSION_TEXTURE2D,
        Flags: 0,
        Anonymous: D3D11_DEPTH_STENCIL_VIEW_DESC_0 {
            Texture2D: D3D11_TEX2D_DSV { MipSlice: 0 },
        },
    };
    let mut dsv: Option<ID3D11DepthStencilView> = None;
    unsafe { device.CreateDepthStencilView(dst, Some(&desc), Some(&mut dsv)) }
        .context("CreateDepthStencilView for resolve target failed")
        .map_err(ReadbackError::Platform)?;
    dsv.context("CreateDepthStencilView returned None")
        .map_err(ReadbackError::Platform)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_constants_match_cbuffer_layout() {
        // The HLSL cbuffer packs int2 + uint + pad into one 16-byte
        // register.
        assert_eq!(std::mem::size_of::<ResolveConstants>(), 16);
    }
}
