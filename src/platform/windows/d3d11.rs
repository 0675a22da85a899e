use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::Context;
use windows::Win32::Graphics::Direct3D::{D3D_DRIVER_TYPE_HARDWARE, D3D_FEATURE_LEVEL_11_0};
use windows::Win32::Graphics::Direct3D11::{
    D3D11_BIND_DEPTH_STENCIL, D3D11_BIND_RENDER_TARGET, D3D11_BIND_SHADER_RESOURCE, D3D11_BOX,
    D3D11_CPU_ACCESS_READ, D3D11_CREATE_DEVICE_BGRA_SUPPORT, D3D11_CREATE_DEVICE_SINGLETHREADED,
    D3D11_MAP_READ, D3D11_MAPPED_SUBRESOURCE, D3D11_SDK_VERSION, D3D11_TEXTURE2D_DESC,
    D3D11_TEXTURE3D_DESC, D3D11_USAGE_DEFAULT, D3D11_USAGE_STAGING, D3D11CreateDevice,
    ID3D11Device, ID3D11DeviceContext, ID3D11Resource, ID3D11Texture2D, ID3D11Texture3D,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;
use windows::Win32::Graphics::Dxgi::{
    DXGI_ERROR_DEVICE_REMOVED, DXGI_ERROR_DEVICE_RESET, DXGI_ERROR_WAS_STILL_DRAWING,
};
use windows::core::Interface;

use crate::backend::{
    self, AcquiredStaging, GpuTexture, MappedSurface, ReadbackBackend, ReadbackBackendKind,
    StagingSurface, TextureDesc, TextureUsage,
};
use crate::buffer::ReadbackStats;
use crate::env_config;
use crate::error::{ReadbackError, ReadbackResult};
use crate::format::PixelFormat;
use crate::region::{ReadFlags, ReadRegion};
use crate::resolve::{ResolveParams, ResolveStrategy};

use super::resolve_shader::ResolvePass;
use super::{direct_map_enabled, dxgi_format, pixel_format_from_dxgi, resolve_dest_format};

/// Create a D3D11 device on the default hardware adapter.
///
/// Readback sessions only touch the device from the calling thread, so
/// `D3D11_CREATE_DEVICE_SINGLETHREADED` is used to drop internal
/// driver locking overhead. Callers that share the device with other
/// threads must construct the backend from their own device via
/// [`D3d11Backend::from_device`].
fn create_d3d11_device() -> anyhow::Result<(ID3D11Device, ID3D11DeviceContext)> {
    let mut device: Option<ID3D11Device> = None;
    let mut context: Option<ID3D11DeviceContext> = None;
    let feature_levels = [D3D_FEATURE_LEVEL_11_0];

    let flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT | D3D11_CREATE_DEVICE_SINGLETHREADED;

    unsafe {
        D3D11CreateDevice(
            None,
            D3D_DRIVER_TYPE_HARDWARE,
            None,
            flags,
            Some(&feature_levels),
            D3D11_SDK_VERSION,
            Some(&mut device),
            None,
            Some(&mut context),
        )
    }
    .context("D3D11CreateDevice failed")?;

    let device = device.context("D3D11CreateDevice did not return a device")?;
    let context = context.context("D3D11CreateDevice did not return a device context")?;
    Ok((device, context))
}

/// A D3D11 texture registered with the readback backend. Holds the
/// base resource interface so 2D and volume textures go through the
/// same path.
pub struct D3d11Texture {
    resource: ID3D11Resource,
    desc: TextureDesc,
}

impl D3d11Texture {
    /// Wrap an existing 2D texture whose shape the caller already
    /// knows.
    pub fn new(texture: ID3D11Texture2D, desc: TextureDesc) -> ReadbackResult<Self> {
        let resource = texture
            .cast::<ID3D11Resource>()
            .context("failed to cast texture to ID3D11Resource")
            .map_err(ReadbackError::Platform)?;
        Ok(Self { resource, desc })
    }

    /// Wrap an existing volume texture.
    pub fn new_3d(texture: ID3D11Texture3D, desc: TextureDesc) -> ReadbackResult<Self> {
        let resource = texture
            .cast::<ID3D11Resource>()
            .context("failed to cast texture to ID3D11Resource")
            .map_err(ReadbackError::Platform)?;
        Ok(Self { resource, desc })
    }

    /// Wrap an existing 2D texture, deriving the descriptor from the
    /// resource itself. Fails for formats outside the readback table.
    pub fn from_texture(texture: ID3D11Texture2D) -> ReadbackResult<Self> {
        let mut raw = D3D11_TEXTURE2D_DESC::default();
        unsafe { texture.GetDesc(&mut raw) };
        let format = pixel_format_from_dxgi(raw.Format)?;
        let desc = TextureDesc {
            width: raw.Width,
            height: raw.Height,
            depth: 1,
            array_size: raw.ArraySize.max(1),
            mip_levels: raw.MipLevels.max(1),
            sample_count: raw.SampleDesc.Count.max(1),
            format,
            usage: TextureUsage {
                render_target: raw.BindFlags & D3D11_BIND_RENDER_TARGET.0 as u32 != 0,
                depth_stencil: raw.BindFlags & D3D11_BIND_DEPTH_STENCIL.0 as u32 != 0,
                shader_resource: raw.BindFlags & D3D11_BIND_SHADER_RESOURCE.0 as u32 != 0,
                cpu_readback: raw.Usage == D3D11_USAGE_STAGING
                    && raw.CPUAccessFlags & D3D11_CPU_ACCESS_READ.0 as u32 != 0,
            },
        };
        Self::new(texture, desc)
    }

    pub fn resource(&self) -> &ID3D11Resource {
        &self.resource
    }
}

impl GpuTexture for D3d11Texture {
    fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

struct D3d11Staging {
    context: ID3D11DeviceContext,
    device: ID3D11Device,
    resource: ID3D11Resource,
    subresource: u32,
    width: u32,
    height: u32,
    depth: u32,
    mapped: bool,
    removed: Arc<AtomicBool>,
}

impl D3d11Staging {
    /// Classify a Map failure, marking the shared device state when the
    /// driver reports removal.
    fn map_error(&self, err: windows::core::Error) -> ReadbackError {
        if err.code() == DXGI_ERROR_DEVICE_REMOVED || err.code() == DXGI_ERROR_DEVICE_RESET {
            self.removed.store(true, Ordering::SeqCst);
            return ReadbackError::DeviceRemoved;
        }
        if unsafe { self.device.GetDeviceRemovedReason() }.is_err() {
            self.removed.store(true, Ordering::SeqCst);
            return ReadbackError::DeviceRemoved;
        }
        ReadbackError::MapFailed(format!("{err}"))
    }
}

impl StagingSurface for D3d11Staging {
    fn map(&mut self) -> ReadbackResult<MappedSurface<'_>> {
        if self.removed.load(Ordering::SeqCst) {
            return Err(ReadbackError::DeviceRemoved);
        }

        // Probe with DO_NOT_WAIT inside the fence deadline so a hung
        // GPU surfaces as Timeout instead of blocking forever inside
        // the driver.
        // D3D11_MAP_FLAG_DO_NOT_WAIT = 0x100000
        const DO_NOT_WAIT: u32 = 0x100000;
        let deadline = Instant::now() + Duration::from_millis(env_config::fence_timeout_ms());
        let mut mapped = D3D11_MAPPED_SUBRESOURCE::default();
        loop {
            let probe = unsafe {
                self.context.Map(
                    &self.resource,
                    self.subresource,
                    D3D11_MAP_READ,
                    DO_NOT_WAIT,
                    Some(&mut mapped),
                )
            };
            match probe {
                Ok(()) => break,
                Err(err) => {
                    // WAS_STILL_DRAWING: the copy hasn't retired yet.
                    if err.code() != DXGI_ERROR_WAS_STILL_DRAWING {
                        return Err(self.map_error(err));
                    }
                    if Instant::now() >= deadline {
                        return Err(ReadbackError::Timeout);
                    }
                    std::hint::spin_loop();
                    std::thread::yield_now();
                }
            }
        }

        self.mapped = true;
        let row_pitch = mapped.RowPitch as usize;
        // DepthPitch is only meaningful for volume textures.
        let slice_pitch = if self.depth > 1 && mapped.DepthPitch != 0 {
            mapped.DepthPitch as usize
        } else {
            row_pitch * self.height as usize
        };
        let len = slice_pitch
            .checked_mul(self.depth as usize)
            .ok_or(ReadbackError::BufferOverflow)?;
        let data = unsafe { std::slice::from_raw_parts(mapped.pData as *const u8, len) };
        Ok(MappedSurface {
            data,
            row_pitch,
            slice_pitch,
            width: self.width,
            height: self.height,
            depth: self.depth,
        })
    }

    fn unmap(&mut self) {
        if self.mapped {
            unsafe { self.context.Unmap(&self.resource, self.subresource) };
            self.mapped = false;
        }
    }
}

impl Drop for D3d11Staging {
    fn drop(&mut self) {
        self.unmap();
    }
}

/// Key describing the shape of the cached staging resource.
#[derive(Clone, Copy, PartialEq, Eq)]
struct StagingShape {
    width: u32,
    height: u32,
    depth: u32,
    format: PixelFormat,
}

/// D3D11 backend: staging textures with `CopySubresourceRegion`,
/// hardware `ResolveSubresource`, and a full-screen draw for the
/// shader resolve strategies.
pub struct D3d11Backend {
    device: ID3D11Device,
    context: ID3D11DeviceContext,
    /// One cached staging resource, reused while the source shape
    /// stays the same and recreated when it changes.
    staging: Option<(ID3D11Resource, StagingShape)>,
    resolve_pass: Option<ResolvePass>,
    removed: Arc<AtomicBool>,
}

impl D3d11Backend {
    pub fn new() -> ReadbackResult<Self> {
        let (device, context) = create_d3d11_device().map_err(ReadbackError::Platform)?;
        Ok(Self::from_device(device, context))
    }

    pub fn from_device(device: ID3D11Device, context: ID3D11DeviceContext) -> Self {
        Self {
            device,
            context,
            staging: None,
            resolve_pass: None,
            removed: Arc::new(AtomicBool::new(false)),
        }
    }

    fn check_device(&self) -> ReadbackResult<()> {
        if self.removed.load(Ordering::SeqCst) {
            return Err(ReadbackError::DeviceRemoved);
        }
        Ok(())
    }

    fn note_device_state(&self) -> ReadbackResult<()> {
        if unsafe { self.device.GetDeviceRemovedReason() }.is_err() {
            self.removed.store(true, Ordering::SeqCst);
            return Err(ReadbackError::DeviceRemoved);
        }
        Ok(())
    }

    /// Reuse or (re)create the cached staging resource for the given
    /// source shape. Staging always covers the full mip extent; many
    /// drivers only copy at subresource granularity cheaply.
    fn ensure_staging(&mut self, shape: StagingShape) -> ReadbackResult<ID3D11Resource> {
        if let Some((resource, cached)) = &self.staging
            && *cached == shape
        {
            return Ok(resource.clone());
        }

        let resource = if shape.depth > 1 {
            let desc = D3D11_TEXTURE3D_DESC {
                Width: shape.width,
                Height: shape.height,
                Depth: shape.depth,
                MipLevels: 1,
                Format: dxgi_format(shape.format),
                Usage: D3D11_USAGE_STAGING,
                BindFlags: 0,
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: 0,
            };
            let mut texture: Option<ID3D11Texture3D> = None;
            unsafe { self.device.CreateTexture3D(&desc, None, Some(&mut texture)) }
                .context("CreateTexture3D for readback staging failed")
                .map_err(ReadbackError::Platform)?;
            texture
                .context("CreateTexture3D returned None")
                .map_err(ReadbackError::Platform)?
                .cast::<ID3D11Resource>()
                .context("staging texture cast failed")
                .map_err(ReadbackError::Platform)?
        } else {
            let desc = D3D11_TEXTURE2D_DESC {
                Width: shape.width,
                Height: shape.height,
                MipLevels: 1,
                ArraySize: 1,
                Format: dxgi_format(shape.format),
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    Quality: 0,
                },
                Usage: D3D11_USAGE_STAGING,
                BindFlags: Default::default(),
                CPUAccessFlags: D3D11_CPU_ACCESS_READ.0 as u32,
                MiscFlags: Default::default(),
            };
            let mut texture: Option<ID3D11Texture2D> = None;
            unsafe { self.device.CreateTexture2D(&desc, None, Some(&mut texture)) }
                .context("CreateTexture2D for readback staging failed")
                .map_err(ReadbackError::Platform)?;
            texture
                .context("CreateTexture2D returned None")
                .map_err(ReadbackError::Platform)?
                .cast::<ID3D11Resource>()
                .context("staging texture cast failed")
                .map_err(ReadbackError::Platform)?
        };

        self.staging = Some((resource.clone(), shape));
        Ok(resource)
    }

    fn staging_surface(
        &self,
        resource: ID3D11Resource,
        subresource: u32,
        width: u32,
        height: u32,
        depth: u32,
    ) -> D3d11Staging {
        D3d11Staging {
            context: self.context.clone(),
            device: self.device.clone(),
            resource,
            subresource,
            width,
            height,
            depth,
            mapped: false,
            removed: Arc::clone(&self.removed),
        }
    }
}

impl ReadbackBackend for D3d11Backend {
    fn kind(&self) -> ReadbackBackendKind {
        ReadbackBackendKind::D3d11
    }

    fn device_removed(&self) -> bool {
        self.removed.load(Ordering::SeqCst)
    }

    fn wait_for_writes(
        &mut self,
        _texture: &dyn GpuTexture,
        stats: &mut ReadbackStats,
    ) -> ReadbackResult<()> {
        self.check_device()?;
        // Submitting the open command stream here interrupts normal
        // command buffering; the actual blocking wait happens in the
        // bounded Map probe once the staging copy is in flight.
        unsafe { self.context.Flush() };
        self.note_device_state()?;
        stats.fence_waits += 1;
        Ok(())
    }

    fn acquire_staging(
        &mut self,
        texture: &dyn GpuTexture,
        region: &ReadRegion,
        flags: &ReadFlags,
        stats: &mut ReadbackStats,
    ) -> ReadbackResult<AcquiredStaging> {
        self.check_device()?;
        let texture = backend::expect_texture::<D3d11Texture>(texture, self.kind())?;
        let desc = texture.desc;
        let mip = flags.subresource.mip_level;
        let slice = flags.subresource.effective_array_slice();
        let subresource = desc.subresource_index(mip, slice);
        let (mip_width, mip_height, mip_depth) = desc.mip_extent(mip);

        // Fast path: a texture allocated for CPU readback maps
        // directly. Re-copying here would double GPU pipeline latency.
        if desc.usage.cpu_readback && desc.sample_count == 1 && direct_map_enabled() {
            stats.direct_maps += 1;
            return Ok(AcquiredStaging {
                surface: Box::new(self.staging_surface(
                    texture.resource.clone(),
                    subresource,
                    mip_width,
                    mip_height,
                    mip_depth,
                )),
                region: *region,
                direct: true,
            });
        }

        let staging = self.ensure_staging(StagingShape {
            width: mip_width,
            height: mip_height,
            depth: mip_depth,
            format: desc.format,
        })?;

        let source_box = D3D11_BOX {
            left: region.x0,
            top: region.y0,
            front: 0,
            right: region.x1,
            bottom: region.y1,
            back: mip_depth,
        };
        unsafe {
            self.context.CopySubresourceRegion(
                &staging,
                0,
                0,
                0,
                0,
                &texture.resource,
                subresource,
                Some(&source_box),
            );
        }
        self.note_device_state()?;
        stats.staging_copies += 1;

        Ok(AcquiredStaging {
            surface: Box::new(self.staging_surface(
                staging,
                0,
                region.width(),
                region.height(),
                mip_depth,
            )),
            region: ReadRegion::new(0, 0, region.width(), region.height()),
            direct: false,
        })
    }

    fn resolve(
        &mut self,
        src: &dyn GpuTexture,
        dst: &dyn GpuTexture,
        strategy: ResolveStrategy,
        params: &ResolveParams,
        stats: &mut ReadbackStats,
    ) -> ReadbackResult<()> {
        self.check_device()?;
        let src = backend::expect_texture::<D3d11Texture>(src, self.kind())?;
        let dst = backend::expect_texture::<D3d11Texture>(dst, self.kind())?;

        match strategy {
            ResolveStrategy::Copy => {
                let rect = params.source_rect.unwrap_or(ReadRegion::full(&src.desc));
                let dest = params.dest_rect.unwrap_or(ReadRegion::full(&dst.desc));
                let source_box = D3D11_BOX {
                    left: rect.x0,
                    top: rect.y0,
                    front: 0,
                    right: rect.x1,
                    bottom: rect.y1,
                    back: 1,
                };
                unsafe {
                    self.context.CopySubresourceRegion(
                        &dst.resource,
                        0,
                        dest.x0,
                        dest.y0,
                        0,
                        &src.resource,
                        0,
                        Some(&source_box),
                    );
                }
            }
            ResolveStrategy::HardwareBox => {
                unsafe {
                    self.context.ResolveSubresource(
                        &dst.resource,
                        0,
                        &src.resource,
                        0,
                        resolve_dest_format(dst.desc.format),
                    );
                }
            }
            ResolveStrategy::ShaderDepth
            | ResolveStrategy::ShaderDepthNonMs
            | ResolveStrategy::ShaderSingleSample => {
                if self.resolve_pass.is_none() {
                    self.resolve_pass = Some(ResolvePass::new(&self.device)?);
                }
                let pass = self.resolve_pass.as_ref().unwrap();
                pass.resolve(
                    &self.device,
                    &self.context,
                    &src.resource,
                    &src.desc,
                    &dst.resource,
                    &dst.desc,
                    strategy,
                    params,
                    stats,
                )?;
            }
        }
        self.note_device_state()?;
        stats.resolves += 1;
        Ok(())
    }

    fn create_resolve_target(&mut self, desc: &TextureDesc) -> ReadbackResult<Box<dyn GpuTexture>> {
        self.check_device()?;
        let bind = if desc.format.is_depth_stencil() {
            D3D11_BIND_DEPTH_STENCIL
        } else {
            D3D11_BIND_RENDER_TARGET
        };
        let raw = D3D11_TEXTURE2D_DESC {
            Width: desc.width,
            Height: desc.height,
            MipLevels: 1,
            ArraySize: 1,
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Usage: D3D11_USAGE_DEFAULT,
            BindFlags: bind.0 as u32,
            CPUAccessFlags: 0,
            MiscFlags: 0,
        };
        let mut texture: Option<ID3D11Texture2D> = None;
        unsafe { self.device.CreateTexture2D(&raw, None, Some(&mut texture)) }
            .context("CreateTexture2D for resolve target failed")
            .map_err(ReadbackError::Platform)?;
        let texture = texture
            .context("CreateTexture2D for resolve target returned None")
            .map_err(ReadbackError::Platform)?;
        Ok(Box::new(D3d11Texture::new(texture, *desc)?))
    }
}
