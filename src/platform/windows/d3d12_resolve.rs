//! D3D12 shader-resolve pass.
//!
//! Builds graphics pipeline state from the same DXBC blobs as the
//! D3D11 pass: a SV_VertexID full-screen triangle, root constants for
//! the source offset and sample index, and one SRV table covering the
//! three source texture slots. Pipeline states are cached per
//! (strategy, destination format).

use std::mem::ManuallyDrop;

use anyhow::Context;
use rustc_hash::FxHashMap;
use windows::Win32::Graphics::Direct3D::{
    D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST, D3D_ROOT_SIGNATURE_VERSION_1,
};
use windows::Win32::Foundation::RECT;
use windows::Win32::Graphics::Direct3D12::{
    D3D12_COMPARISON_FUNC_ALWAYS, D3D12_CPU_DESCRIPTOR_HANDLE, D3D12_CULL_MODE_NONE,
    D3D12_DEPTH_STENCIL_DESC, D3D12_DEPTH_STENCIL_VIEW_DESC, D3D12_DEPTH_STENCIL_VIEW_DESC_0,
    D3D12_DEPTH_STENCILOP_DESC, D3D12_DEPTH_WRITE_MASK_ALL, D3D12_DESCRIPTOR_HEAP_DESC,
    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE, D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
    D3D12_DESCRIPTOR_HEAP_TYPE_DSV, D3D12_DESCRIPTOR_HEAP_TYPE_RTV, D3D12_DESCRIPTOR_RANGE,
    D3D12_DESCRIPTOR_RANGE_TYPE_SRV, D3D12_DSV_DIMENSION_TEXTURE2D, D3D12_DSV_FLAG_NONE,
    D3D12_FILL_MODE_SOLID, D3D12_GRAPHICS_PIPELINE_STATE_DESC, D3D12_RASTERIZER_DESC,
    D3D12_RENDER_TARGET_VIEW_DESC, D3D12_RENDER_TARGET_VIEW_DESC_0,
    D3D12_ROOT_CONSTANTS, D3D12_ROOT_DESCRIPTOR_TABLE, D3D12_ROOT_PARAMETER,
    D3D12_ROOT_PARAMETER_0, D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
    D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE, D3D12_ROOT_SIGNATURE_DESC,
    D3D12_ROOT_SIGNATURE_FLAG_NONE, D3D12_RTV_DIMENSION_TEXTURE2D, D3D12_SHADER_BYTECODE,
    D3D12_SHADER_RESOURCE_VIEW_DESC, D3D12_SHADER_RESOURCE_VIEW_DESC_0,
    D3D12_SHADER_VISIBILITY_PIXEL, D3D12_SRV_DIMENSION_TEXTURE2D,
    D3D12_SRV_DIMENSION_TEXTURE2DMS, D3D12_STATIC_SAMPLER_DESC, D3D12_TEX2D_DSV, D3D12_TEX2D_RTV,
    D3D12_TEX2D_SRV, D3D12_TEX2DMS_SRV, D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
    D3D12SerializeRootSignature, ID3D12DescriptorHeap, ID3D12Device, ID3D12GraphicsCommandList,
    ID3D12PipelineState, ID3D12Resource, ID3D12RootSignature,
    D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING, D3D12_BLEND_DESC, D3D12_RENDER_TARGET_BLEND_DESC,
    D3D12_COLOR_WRITE_ENABLE_ALL, D3D12_VIEWPORT,
};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT, DXGI_SAMPLE_DESC};

use crate::backend::TextureDesc;
use crate::error::{ReadbackError, ReadbackResult};
use crate::format::PixelFormat;
use crate::region::ReadRegion;
use crate::resolve::{ResolveParams, ResolveStrategy};

use super::resolve_shader;
use super::{depth_view_format, shader_view_format};

/// SRV table layout: t0 = color MS, t1 = depth MS, t2 = depth SS.
const SRV_TABLE_SIZE: u32 = 3;

pub(crate) struct D3d12ResolvePass {
    root_signature: ID3D12RootSignature,
    pipelines: FxHashMap<(ResolveStrategy, PixelFormat), ID3D12PipelineState>,
    srv_heap: ID3D12DescriptorHeap,
    rtv_heap: ID3D12DescriptorHeap,
    dsv_heap: ID3D12DescriptorHeap,
    srv_descriptor_size: u32,
}

impl D3d12ResolvePass {
    pub(crate) fn new(device: &ID3D12Device) -> ReadbackResult<Self> {
        let root_signature = create_root_signature(device)?;
        let srv_heap = create_heap(
            device,
            D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
            SRV_TABLE_SIZE,
            true,
        )?;
        let rtv_heap = create_heap(device, D3D12_DESCRIPTOR_HEAP_TYPE_RTV, 1, false)?;
        let dsv_heap = create_heap(device, D3D12_DESCRIPTOR_HEAP_TYPE_DSV, 1, false)?;
        let srv_descriptor_size =
            unsafe { device.GetDescriptorHandleIncrementSize(D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV) };
        Ok(Self {
            root_signature,
            pipelines: FxHashMap::default(),
            srv_heap,
            rtv_heap,
            dsv_heap,
            srv_descriptor_size,
        })
    }

    /// Record the full-screen resolve draw into an open command list.
    /// Resource state transitions are the caller's responsibility.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn record(
        &mut self,
        device: &ID3D12Device,
        list: &ID3D12GraphicsCommandList,
        src: &ID3D12Resource,
        src_desc: &TextureDesc,
        dst: &ID3D12Resource,
        dst_desc: &TextureDesc,
        strategy: ResolveStrategy,
        params: &ResolveParams,
        clears: &mut u32,
    ) -> ReadbackResult<()> {
        let dest_rect = params
            .dest_rect
            .unwrap_or(ReadRegion::new(0, 0, dst_desc.width, dst_desc.height));
        let source_rect = params
            .source_rect
            .unwrap_or(ReadRegion::new(0, 0, src_desc.width, src_desc.height));

        let pipeline = self.pipeline_for(device, strategy, dst_desc.format)?.clone();
        self.write_source_views(device, src, src_desc, strategy);

        let constants = [
            (source_rect.x0 as i32 - dest_rect.x0 as i32) as u32,
            (source_rect.y0 as i32 - dest_rect.y0 as i32) as u32,
            params.sample_index.unwrap_or(0),
            0,
        ];

        let viewport = D3D12_VIEWPORT {
            TopLeftX: dest_rect.x0 as f32,
            TopLeftY: dest_rect.y0 as f32,
            Width: dest_rect.width() as f32,
            Height: dest_rect.height() as f32,
            MinDepth: 0.0,
            MaxDepth: 1.0,
        };
        let scissor = RECT {
            left: dest_rect.x0 as i32,
            top: dest_rect.y0 as i32,
            right: dest_rect.x1 as i32,
            bottom: dest_rect.y1 as i32,
        };

        unsafe {
            list.SetPipelineState(&pipeline);
            list.SetGraphicsRootSignature(&self.root_signature);
            list.SetDescriptorHeaps(&[Some(self.srv_heap.clone())]);
            list.SetGraphicsRoot32BitConstants(0, constants.len() as u32, constants.as_ptr() as *const _, 0);
            list.SetGraphicsRootDescriptorTable(
                1,
                self.srv_heap.GetGPUDescriptorHandleForHeapStart(),
            );
            list.IASetPrimitiveTopology(D3D_PRIMITIVE_TOPOLOGY_TRIANGLELIST);
            list.RSSetViewports(&[viewport]);
            list.RSSetScissorRects(&[scissor]);

            if dst_desc.format.is_depth_stencil() {
                let dsv = self.dsv_heap.GetCPUDescriptorHandleForHeapStart();
                // Typeless depth resources need an explicit typed view.
                let dsv_desc = D3D12_DEPTH_STENCIL_VIEW_DESC {
                    Format: depth_view_format(dst_desc.format),
                    ViewDimension: D3D12_DSV_DIMENSION_TEXTURE2D,
                    Flags: D3D12_DSV_FLAG_NONE,
                    Anonymous: D3D12_DEPTH_STENCIL_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_DSV { MipSlice: 0 },
                    },
                };
                device.CreateDepthStencilView(dst, Some(&dsv_desc), dsv);
                if params.clear_dest {
                    use windows::Win32::Graphics::Direct3D12::{
                        D3D12_CLEAR_FLAG_DEPTH, D3D12_CLEAR_FLAG_STENCIL,
                    };
                    list.ClearDepthStencilView(
                        dsv,
                        D3D12_CLEAR_FLAG_DEPTH | D3D12_CLEAR_FLAG_STENCIL,
                        0.0,
                        0,
                        None,
                    );
                    *clears += 1;
                }
                list.OMSetRenderTargets(0, None, false, Some(&dsv));
            } else {
                let rtv = self.rtv_heap.GetCPUDescriptorHandleForHeapStart();
                let rtv_desc = D3D12_RENDER_TARGET_VIEW_DESC {
                    Format: shader_view_format(dst_desc.format),
                    ViewDimension: D3D12_RTV_DIMENSION_TEXTURE2D,
                    Anonymous: D3D12_RENDER_TARGET_VIEW_DESC_0 {
                        Texture2D: D3D12_TEX2D_RTV {
                            MipSlice: 0,
                            PlaneSlice: 0,
                        },
                    },
                };
                device.CreateRenderTargetView(dst, Some(&rtv_desc), rtv);
                if params.clear_dest {
                    list.ClearRenderTargetView(rtv, &[0.0, 0.0, 0.0, 0.0], None);
                    *clears += 1;
                }
                list.OMSetRenderTargets(1, Some(&rtv), false, None);
            }

            list.DrawInstanced(3, 1, 0, 0);
        }

        Ok(())
    }

    fn pipeline_for(
        &mut self,
        device: &ID3D12Device,
        strategy: ResolveStrategy,
        format: PixelFormat,
    ) -> ReadbackResult<&ID3D12PipelineState> {
        if !self.pipelines.contains_key(&(strategy, format)) {
            let pipeline = create_pipeline(device, &self.root_signature, strategy, format)?;
            self.pipelines.insert((strategy, format), pipeline);
        }
        Ok(self.pipelines.get(&(strategy, format)).unwrap())
    }

    /// Fill the SRV table. The slot the chosen shader reads gets the
    /// real view; the other two get null views so the table is fully
    /// initialized.
    fn write_source_views(
        &self,
        device: &ID3D12Device,
        src: &ID3D12Resource,
        src_desc: &TextureDesc,
        strategy: ResolveStrategy,
    ) {
        let base: D3D12_CPU_DESCRIPTOR_HANDLE =
            unsafe { self.srv_heap.GetCPUDescriptorHandleForHeapStart() };
        let handle = |slot: u32| D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: base.ptr + (slot * self.srv_descriptor_size) as usize,
        };

        let live_slot = match strategy {
            ResolveStrategy::ShaderSingleSample => 0,
            ResolveStrategy::ShaderDepth => 1,
            _ => 2,
        };

        for slot in 0..SRV_TABLE_SIZE {
            let multisampled = slot != 2;
            let format = if slot == live_slot {
                shader_view_format(src_desc.format)
            } else {
                // Null descriptor; any valid typed format will do.
                windows::Win32::Graphics::Dxgi::Common::DXGI_FORMAT_R8G8B8A8_UNORM
            };
            let desc = srv_desc(format, multisampled);
            let resource = (slot == live_slot).then_some(src);
            unsafe {
                device.CreateShaderResourceView(resource, Some(&desc), handle(slot));
            }
        }
    }
}

fn srv_desc(format: DXGI_FORMAT, multisampled: bool) -> D3D12_SHADER_RESOURCE_VIEW_DESC {
    if multisampled {
        D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2DMS,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2DMS: D3D12_TEX2DMS_SRV {
                    UnusedField_NothingToDefine: 0,
                },
            },
        }
    } else {
        D3D12_SHADER_RESOURCE_VIEW_DESC {
            Format: format,
            ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
            Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
            Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                Texture2D: D3D12_TEX2D_SRV {
                    MostDetailedMip: 0,
                    MipLevels: 1,
                    PlaneSlice: 0,
                    ResourceMinLODClamp: 0.0,
                },
            },
        }
    }
}

fn create_heap(
    device: &ID3D12Device,
    heap_type: windows::Win32::Graphics::Direct3D12::D3D12_DESCRIPTOR_HEAP_TYPE,
    count: u32,
    shader_visible: bool,
) -> ReadbackResult<ID3D12DescriptorHeap> {
    let desc = D3D12_DESCRIPTOR_HEAP_DESC {
        Type: heap_type,
        NumDescriptors: count,
        Flags: if shader_visible {
            D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
        } else {
            Default::default()
        },
        NodeMask: 0,
    };
    unsafe { device.CreateDescriptorHeap(&desc) }
        .context("CreateDescriptorHeap for resolve pass failed")
        .map_err(ReadbackError::Platform)
}

fn create_root_signature(device: &ID3D12Device) -> ReadbackResult<ID3D12RootSignature> {
    let srv_range = D3D12_DESCRIPTOR_RANGE {
        RangeType: D3D12_DESCRIPTOR_RANGE_TYPE_SRV,
        NumDescriptors: SRV_TABLE_SIZE,
        BaseShaderRegister: 0,
        RegisterSpace: 0,
        OffsetInDescriptorsFromTableStart: 0,
    };
    let parameters = [
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                Constants: D3D12_ROOT_CONSTANTS {
                    ShaderRegister: 0,
                    RegisterSpace: 0,
                    Num32BitValues: 4,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        },
        D3D12_ROOT_PARAMETER {
            ParameterType: D3D12_ROOT_PARAMETER_TYPE_DESCRIPTOR_TABLE,
            Anonymous: D3D12_ROOT_PARAMETER_0 {
                DescriptorTable: D3D12_ROOT_DESCRIPTOR_TABLE {
                    NumDescriptorRanges: 1,
                    pDescriptorRanges: &srv_range,
                },
            },
            ShaderVisibility: D3D12_SHADER_VISIBILITY_PIXEL,
        },
    ];

    let desc = D3D12_ROOT_SIGNATURE_DESC {
        NumParameters: parameters.len() as u32,
        pParameters: parameters.as_ptr(),
        NumStaticSamplers: 0,
        pStaticSamplers: std::ptr::null::<D3D12_STATIC_SAMPLER_DESC>(),
        Flags: D3D12_ROOT_SIGNATURE_FLAG_NONE,
    };

    let mut signature = None;
    let mut error = None;
    unsafe {
        D3D12SerializeRootSignature(
            &desc,
            D3D_ROOT_SIGNATURE_VERSION_1,
            &mut signature,
            Some(&mut error),
        )
    }
    .context("D3D12SerializeRootSignature failed")
    .map_err(ReadbackError::Platform)?;

    let signature = signature
        .context("root signature serialization returned no blob")
        .map_err(ReadbackError::Platform)?;
    let blob = unsafe {
        std::slice::from_raw_parts(
            signature.GetBufferPointer() as *const u8,
            signature.GetBufferSize(),
        )
    };
    unsafe { device.CreateRootSignature(0, blob) }
        .context("CreateRootSignature failed")
        .map_err(ReadbackError::Platform)
}

fn create_pipeline(
    device: &ID3D12Device,
    root_signature: &ID3D12RootSignature,
    strategy: ResolveStrategy,
    format: PixelFormat,
) -> ReadbackResult<ID3D12PipelineState> {
    let vs = resolve_shader::bytecode_vs()?;
    let ps = match strategy {
        ResolveStrategy::ShaderSingleSample => resolve_shader::bytecode_extract()?,
        ResolveStrategy::ShaderDepth => resolve_shader::bytecode_depth()?,
        ResolveStrategy::ShaderDepthNonMs => resolve_shader::bytecode_depth_ss()?,
        ResolveStrategy::Copy | ResolveStrategy::HardwareBox => {
            return Err(ReadbackError::InvalidConfig(
                "copy strategies do not use the shader resolve pass".into(),
            ));
        }
    };

    let is_depth = format.is_depth_stencil();
    let mut desc = D3D12_GRAPHICS_PIPELINE_STATE_DESC {
        pRootSignature: ManuallyDrop::new(Some(root_signature.clone())),
        VS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: vs.as_ptr() as *const _,
            BytecodeLength: vs.len(),
        },
        PS: D3D12_SHADER_BYTECODE {
            pShaderBytecode: ps.as_ptr() as *const _,
            BytecodeLength: ps.len(),
        },
        BlendState: D3D12_BLEND_DESC {
            RenderTarget: [
                D3D12_RENDER_TARGET_BLEND_DESC {
                    RenderTargetWriteMask: D3D12_COLOR_WRITE_ENABLE_ALL.0 as u8,
                    ..Default::default()
                },
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
                Default::default(),
            ],
            ..Default::default()
        },
        SampleMask: u32::MAX,
        RasterizerState: D3D12_RASTERIZER_DESC {
            FillMode: D3D12_FILL_MODE_SOLID,
            CullMode: D3D12_CULL_MODE_NONE,
            DepthClipEnable: true.into(),
            ..Default::default()
        },
        PrimitiveTopologyType: D3D12_PRIMITIVE_TOPOLOGY_TYPE_TRIANGLE,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        ..Default::default()
    };

    if is_depth {
        desc.DepthStencilState = D3D12_DEPTH_STENCIL_DESC {
            DepthEnable: true.into(),
            DepthWriteMask: D3D12_DEPTH_WRITE_MASK_ALL,
            DepthFunc: D3D12_COMPARISON_FUNC_ALWAYS,
            StencilEnable: false.into(),
            FrontFace: D3D12_DEPTH_STENCILOP_DESC::default(),
            BackFace: D3D12_DEPTH_STENCILOP_DESC::default(),
            ..Default::default()
        };
        desc.NumRenderTargets = 0;
        desc.DSVFormat = depth_view_format(format);
    } else {
        desc.NumRenderTargets = 1;
        desc.RTVFormats[0] = shader_view_format(format);
    }

    unsafe { device.CreateGraphicsPipelineState(&desc) }
        .context("CreateGraphicsPipelineState for resolve failed")
        .map_err(ReadbackError::Platform)
}
