use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use anyhow::Context;
use windows::Win32::Foundation::{CloseHandle, HANDLE, WAIT_OBJECT_0, WAIT_TIMEOUT};
use windows::Win32::Graphics::Direct3D::D3D_FEATURE_LEVEL_11_0;
use windows::Win32::Graphics::Direct3D12::{
    D3D12_BOX, D3D12_COMMAND_LIST_TYPE_DIRECT, D3D12_COMMAND_QUEUE_DESC, D3D12_FENCE_FLAG_NONE,
    D3D12_HEAP_FLAG_NONE, D3D12_HEAP_PROPERTIES, D3D12_HEAP_TYPE_DEFAULT, D3D12_HEAP_TYPE_READBACK,
    D3D12_PLACED_SUBRESOURCE_FOOTPRINT, D3D12_RESOURCE_BARRIER, D3D12_RESOURCE_BARRIER_0,
    D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES, D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
    D3D12_RESOURCE_DESC, D3D12_RESOURCE_DIMENSION_BUFFER, D3D12_RESOURCE_DIMENSION_TEXTURE2D,
    D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL, D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
    D3D12_RESOURCE_STATE_COPY_DEST, D3D12_RESOURCE_STATE_COPY_SOURCE,
    D3D12_RESOURCE_STATE_DEPTH_WRITE, D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
    D3D12_RESOURCE_STATE_RENDER_TARGET, D3D12_RESOURCE_STATE_RESOLVE_DEST,
    D3D12_RESOURCE_STATE_RESOLVE_SOURCE, D3D12_RESOURCE_STATES,
    D3D12_RESOURCE_TRANSITION_BARRIER, D3D12_TEXTURE_COPY_LOCATION, D3D12_TEXTURE_COPY_LOCATION_0,
    D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT, D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
    D3D12_TEXTURE_LAYOUT_ROW_MAJOR, D3D12CreateDevice, ID3D12CommandAllocator, ID3D12CommandList,
    ID3D12CommandQueue, ID3D12Device, ID3D12Fence, ID3D12GraphicsCommandList,
    ID3D12PipelineState, ID3D12Resource,
};
use windows::Win32::Graphics::Dxgi::Common::DXGI_SAMPLE_DESC;
use windows::Win32::System::Threading::{CreateEventW, WaitForSingleObject};
use windows::core::Interface;

use crate::backend::{
    self, AcquiredStaging, GpuTexture, MappedSurface, ReadbackBackend, ReadbackBackendKind,
    StagingSurface, TextureDesc, TextureUsage,
};
use crate::buffer::ReadbackStats;
use crate::env_config;
use crate::error::{ReadbackError, ReadbackResult};
use crate::region::{ReadFlags, ReadRegion};
use crate::resolve::{ResolveParams, ResolveStrategy};
use crate::sync::FenceTimeline;

use super::d3d12_resolve::D3d12ResolvePass;
use super::{direct_map_enabled, dxgi_format, resolve_dest_format};

/// Pitch layout of a CPU-visible readback buffer holding texture rows.
#[derive(Clone, Copy, Debug)]
pub struct ReadbackLayout {
    pub row_pitch: usize,
    pub slice_pitch: usize,
}

/// A D3D12 resource registered with the readback backend.
///
/// D3D12 resources carry explicit states; the backend transitions the
/// resource from `state` to what each operation needs and back, so
/// `state` must be the state the owning renderer leaves the resource
/// in between frames.
pub struct D3d12Texture {
    resource: ID3D12Resource,
    desc: TextureDesc,
    state: AtomicI32,
    /// Present when the resource is a CPU-visible readback buffer
    /// laid out in texture rows (usage `cpu_readback`).
    readback_layout: Option<ReadbackLayout>,
}

impl D3d12Texture {
    pub fn new(resource: ID3D12Resource, desc: TextureDesc, state: D3D12_RESOURCE_STATES) -> Self {
        Self {
            resource,
            desc,
            state: AtomicI32::new(state.0),
            readback_layout: None,
        }
    }

    /// Wrap a readback-heap buffer that already holds texture rows.
    pub fn new_readback(
        resource: ID3D12Resource,
        desc: TextureDesc,
        layout: ReadbackLayout,
    ) -> Self {
        Self {
            resource,
            desc,
            state: AtomicI32::new(D3D12_RESOURCE_STATE_COPY_DEST.0),
            readback_layout: Some(layout),
        }
    }

    pub fn resource(&self) -> &ID3D12Resource {
        &self.resource
    }

    fn state(&self) -> D3D12_RESOURCE_STATES {
        D3D12_RESOURCE_STATES(self.state.load(Ordering::SeqCst))
    }
}

impl GpuTexture for D3d12Texture {
    fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

fn transition(
    list: &ID3D12GraphicsCommandList,
    resource: &ID3D12Resource,
    from: D3D12_RESOURCE_STATES,
    to: D3D12_RESOURCE_STATES,
) {
    if from == to {
        return;
    }
    let mut barrier = D3D12_RESOURCE_BARRIER {
        Type: D3D12_RESOURCE_BARRIER_TYPE_TRANSITION,
        Flags: Default::default(),
        Anonymous: D3D12_RESOURCE_BARRIER_0 {
            Transition: ManuallyDrop::new(D3D12_RESOURCE_TRANSITION_BARRIER {
                pResource: ManuallyDrop::new(Some(resource.clone())),
                Subresource: D3D12_RESOURCE_BARRIER_ALL_SUBRESOURCES,
                StateBefore: from,
                StateAfter: to,
            }),
        },
    };
    unsafe {
        list.ResourceBarrier(std::slice::from_ref(&barrier));
        // Release the refcount the ManuallyDrop wrappers would leak.
        let mut inner = ManuallyDrop::take(&mut barrier.Anonymous.Transition);
        ManuallyDrop::drop(&mut inner.pResource);
    }
}

/// Drop the COM reference a `D3D12_TEXTURE_COPY_LOCATION` holds; the
/// FFI struct wraps it in `ManuallyDrop`, so it leaks otherwise.
fn release_copy_location(location: &mut D3D12_TEXTURE_COPY_LOCATION) {
    unsafe {
        ManuallyDrop::drop(&mut location.pResource);
    }
}

struct D3d12Staging {
    resource: ID3D12Resource,
    device: ID3D12Device,
    row_pitch: usize,
    slice_pitch: usize,
    total_bytes: usize,
    width: u32,
    height: u32,
    depth: u32,
    mapped: bool,
    removed: Arc<AtomicBool>,
}

impl StagingSurface for D3d12Staging {
    fn map(&mut self) -> ReadbackResult<MappedSurface<'_>> {
        if self.removed.load(Ordering::SeqCst) {
            return Err(ReadbackError::DeviceRemoved);
        }
        let mut ptr: *mut std::ffi::c_void = std::ptr::null_mut();
        if let Err(err) = unsafe { self.resource.Map(0, None, Some(&mut ptr)) } {
            if unsafe { self.device.GetDeviceRemovedReason() }.is_err() {
                self.removed.store(true, Ordering::SeqCst);
                return Err(ReadbackError::DeviceRemoved);
            }
            return Err(ReadbackError::MapFailed(format!("{err}")));
        }
        if ptr.is_null() {
            return Err(ReadbackError::MapFailed(
                "Map returned a null pointer".into(),
            ));
        }
        self.mapped = true;
        let data = unsafe { std::slice::from_raw_parts(ptr as *const u8, self.total_bytes) };
        Ok(MappedSurface {
            data,
            row_pitch: self.row_pitch,
            slice_pitch: self.slice_pitch,
            width: self.width,
            height: self.height,
            depth: self.depth,
        })
    }

    fn unmap(&mut self) {
        if self.mapped {
            unsafe { self.resource.Unmap(0, None) };
            self.mapped = false;
        }
    }
}

impl Drop for D3d12Staging {
    fn drop(&mut self) {
        self.unmap();
    }
}

/// D3D12 backend: readback-heap buffers with placed-footprint copies,
/// an explicit fence for the sync gate, and a graphics pipeline for
/// the shader resolve strategies.
pub struct D3d12Backend {
    device: ID3D12Device,
    queue: ID3D12CommandQueue,
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
    fence: ID3D12Fence,
    fence_event: HANDLE,
    timeline: FenceTimeline,
    list_open: bool,
    resolve_pass: Option<D3d12ResolvePass>,
    removed: Arc<AtomicBool>,
}

impl D3d12Backend {
    pub fn new() -> ReadbackResult<Self> {
        let mut device: Option<ID3D12Device> = None;
        unsafe { D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device) }
            .context("D3D12CreateDevice failed")
            .map_err(ReadbackError::Platform)?;
        let device = device
            .context("D3D12CreateDevice did not return a device")
            .map_err(ReadbackError::Platform)?;
        Self::from_device(device)
    }

    pub fn from_device(device: ID3D12Device) -> ReadbackResult<Self> {
        let queue_desc = D3D12_COMMAND_QUEUE_DESC {
            Type: D3D12_COMMAND_LIST_TYPE_DIRECT,
            ..Default::default()
        };
        let queue: ID3D12CommandQueue = unsafe { device.CreateCommandQueue(&queue_desc) }
            .context("CreateCommandQueue failed")
            .map_err(ReadbackError::Platform)?;
        let allocator: ID3D12CommandAllocator =
            unsafe { device.CreateCommandAllocator(D3D12_COMMAND_LIST_TYPE_DIRECT) }
                .context("CreateCommandAllocator failed")
                .map_err(ReadbackError::Platform)?;
        let list: ID3D12GraphicsCommandList = unsafe {
            device.CreateCommandList(
                0,
                D3D12_COMMAND_LIST_TYPE_DIRECT,
                &allocator,
                None::<&ID3D12PipelineState>,
            )
        }
        .context("CreateCommandList failed")
        .map_err(ReadbackError::Platform)?;
        // Lists are created open; start closed so the first operation
        // resets cleanly.
        unsafe { list.Close() }
            .context("closing initial command list failed")
            .map_err(ReadbackError::Platform)?;

        let fence: ID3D12Fence = unsafe { device.CreateFence(0, D3D12_FENCE_FLAG_NONE) }
            .context("CreateFence failed")
            .map_err(ReadbackError::Platform)?;
        let fence_event = unsafe { CreateEventW(None, false, false, None) }
            .context("CreateEventW for fence wait failed")
            .map_err(ReadbackError::Platform)?;

        Ok(Self {
            device,
            queue,
            allocator,
            list,
            fence,
            fence_event,
            timeline: FenceTimeline::new(),
            list_open: false,
            resolve_pass: None,
            removed: Arc::new(AtomicBool::new(false)),
        })
    }

    fn check_device(&self) -> ReadbackResult<()> {
        if self.removed.load(Ordering::SeqCst) {
            return Err(ReadbackError::DeviceRemoved);
        }
        Ok(())
    }

    fn mark_removed_if_lost(&self, err: windows::core::Error) -> ReadbackError {
        if unsafe { self.device.GetDeviceRemovedReason() }.is_err() {
            self.removed.store(true, Ordering::SeqCst);
            return ReadbackError::DeviceRemoved;
        }
        ReadbackError::Platform(anyhow::anyhow!("{err}"))
    }

    fn ensure_open(&mut self) -> ReadbackResult<()> {
        if self.list_open {
            return Ok(());
        }
        unsafe { self.allocator.Reset() }.map_err(|e| self.mark_removed_if_lost(e))?;
        unsafe { self.list.Reset(&self.allocator, None) }
            .map_err(|e| self.mark_removed_if_lost(e))?;
        self.list_open = true;
        Ok(())
    }

    /// Close and execute the open list, then block until the fence
    /// signals, with the bounded deadline from the env config.
    fn submit_and_wait(&mut self, stats: &mut ReadbackStats) -> ReadbackResult<()> {
        if self.list_open {
            unsafe { self.list.Close() }.map_err(|e| self.mark_removed_if_lost(e))?;
            let lists = [Some(
                self.list
                    .cast::<ID3D12CommandList>()
                    .context("command list cast failed")
                    .map_err(ReadbackError::Platform)?,
            )];
            unsafe { self.queue.ExecuteCommandLists(&lists) };
            self.list_open = false;
        }

        let fence_value = self.timeline.submit();
        if self.timeline.pending_submitted().is_some() {
            unsafe { self.queue.Signal(&self.fence, fence_value) }
                .map_err(|e| self.mark_removed_if_lost(e))?;
            if unsafe { self.fence.GetCompletedValue() } < fence_value {
                unsafe {
                    self.fence
                        .SetEventOnCompletion(fence_value, self.fence_event)
                }
                .map_err(|e| self.mark_removed_if_lost(e))?;
                let timeout_ms = env_config::fence_timeout_ms().min(u32::MAX as u64) as u32;
                let wait = unsafe { WaitForSingleObject(self.fence_event, timeout_ms) };
                if wait == WAIT_TIMEOUT {
                    return Err(ReadbackError::Timeout);
                }
                if wait != WAIT_OBJECT_0 {
                    return Err(ReadbackError::Platform(anyhow::anyhow!(
                        "fence wait failed: {wait:?}"
                    )));
                }
            }
            if unsafe { self.device.GetDeviceRemovedReason() }.is_err() {
                self.removed.store(true, Ordering::SeqCst);
                return Err(ReadbackError::DeviceRemoved);
            }
            self.timeline.complete_to(fence_value);
            stats.fence_waits += 1;
        }
        Ok(())
    }

    fn create_readback_buffer(&self, size: u64) -> ReadbackResult<ID3D12Resource> {
        let heap = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_READBACK,
            ..Default::default()
        };
        let desc = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_BUFFER,
            Width: size,
            Height: 1,
            DepthOrArraySize: 1,
            MipLevels: 1,
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Layout: D3D12_TEXTURE_LAYOUT_ROW_MAJOR,
            ..Default::default()
        };
        let mut buffer: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap,
                D3D12_HEAP_FLAG_NONE,
                &desc,
                D3D12_RESOURCE_STATE_COPY_DEST,
                None,
                &mut buffer,
            )
        }
        .context("CreateCommittedResource for readback buffer failed")
        .map_err(ReadbackError::Platform)?;
        buffer
            .context("CreateCommittedResource returned no buffer")
            .map_err(ReadbackError::Platform)
    }

    fn staging_surface(
        &self,
        resource: ID3D12Resource,
        layout: ReadbackLayout,
        total_bytes: usize,
        width: u32,
        height: u32,
        depth: u32,
    ) -> D3d12Staging {
        D3d12Staging {
            resource,
            device: self.device.clone(),
            row_pitch: layout.row_pitch,
            slice_pitch: layout.slice_pitch,
            total_bytes,
            width,
            height,
            depth,
            mapped: false,
            removed: Arc::clone(&self.removed),
        }
    }
}

impl Drop for D3d12Backend {
    fn drop(&mut self) {
        if !self.fence_event.is_invalid() {
            unsafe {
                let _ = CloseHandle(self.fence_event);
            }
        }
    }
}

impl ReadbackBackend for D3d12Backend {
    fn kind(&self) -> ReadbackBackendKind {
        ReadbackBackendKind::D3d12
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
        self.submit_and_wait(stats)
    }

    fn acquire_staging(
        &mut self,
        texture: &dyn GpuTexture,
        region: &ReadRegion,
        flags: &ReadFlags,
        stats: &mut ReadbackStats,
    ) -> ReadbackResult<AcquiredStaging> {
        self.check_device()?;
        let texture = backend::expect_texture::<D3d12Texture>(texture, self.kind())?;
        let desc = texture.desc;
        let mip = flags.subresource.mip_level;
        let slice = flags.subresource.effective_array_slice();
        let subresource = desc.subresource_index(mip, slice);
        let (mip_width, mip_height, mip_depth) = desc.mip_extent(mip);

        // Fast path: a readback-heap buffer already holds the rows;
        // map it in place instead of doubling pipeline latency with a
        // second copy.
        if let Some(layout) = texture.readback_layout
            && desc.usage.cpu_readback
            && direct_map_enabled()
        {
            stats.direct_maps += 1;
            let total = layout
                .slice_pitch
                .checked_mul(mip_depth as usize)
                .ok_or(ReadbackError::BufferOverflow)?;
            return Ok(AcquiredStaging {
                surface: Box::new(self.staging_surface(
                    texture.resource.clone(),
                    layout,
                    total,
                    mip_width,
                    mip_height,
                    mip_depth,
                )),
                region: *region,
                direct: true,
            });
        }

        // Footprint of the whole subresource; the hardware requires
        // 256-byte row alignment on buffer copies, so the row pitch
        // here generally exceeds width × bytes-per-pixel.
        let resource_desc = unsafe { texture.resource.GetDesc() };
        let mut footprint = D3D12_PLACED_SUBRESOURCE_FOOTPRINT::default();
        let mut num_rows = 0u32;
        let mut row_size_bytes = 0u64;
        let mut total_bytes = 0u64;
        unsafe {
            self.device.GetCopyableFootprints(
                &resource_desc,
                subresource,
                1,
                0,
                Some(&mut footprint),
                Some(&mut num_rows),
                Some(&mut row_size_bytes),
                Some(&mut total_bytes),
            );
        }

        let buffer = self.create_readback_buffer(total_bytes)?;

        self.ensure_open()?;
        let state = texture.state();
        transition(&self.list, &texture.resource, state, D3D12_RESOURCE_STATE_COPY_SOURCE);

        let mut dst_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: ManuallyDrop::new(Some(buffer.clone())),
            Type: D3D12_TEXTURE_COPY_TYPE_PLACED_FOOTPRINT,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                PlacedFootprint: footprint,
            },
        };
        let mut src_location = D3D12_TEXTURE_COPY_LOCATION {
            pResource: ManuallyDrop::new(Some(texture.resource.clone())),
            Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
            Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                SubresourceIndex: subresource,
            },
        };
        let source_box = D3D12_BOX {
            left: region.x0,
            top: region.y0,
            front: 0,
            right: region.x1,
            bottom: region.y1,
            back: mip_depth,
        };
        unsafe {
            self.list
                .CopyTextureRegion(&dst_location, 0, 0, 0, &src_location, Some(&source_box));
        }
        release_copy_location(&mut dst_location);
        release_copy_location(&mut src_location);
        transition(&self.list, &texture.resource, D3D12_RESOURCE_STATE_COPY_SOURCE, state);
        self.timeline.record();
        stats.staging_copies += 1;

        // The mapping that follows reads this copy's results, so drain
        // the queue now.
        self.submit_and_wait(stats)?;

        // NumRows is per slice; depth lives in the footprint itself.
        let row_pitch = footprint.Footprint.RowPitch as usize;
        debug_assert!(row_size_bytes <= footprint.Footprint.RowPitch as u64);
        let layout = ReadbackLayout {
            row_pitch,
            slice_pitch: row_pitch * num_rows.max(1) as usize,
        };
        Ok(AcquiredStaging {
            surface: Box::new(self.staging_surface(
                buffer,
                layout,
                total_bytes as usize,
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
        let src = backend::expect_texture::<D3d12Texture>(src, self.kind())?;
        let dst = backend::expect_texture::<D3d12Texture>(dst, self.kind())?;
        let src_state = src.state();
        let dst_state = dst.state();

        self.ensure_open()?;
        match strategy {
            ResolveStrategy::Copy => {
                let rect = params.source_rect.unwrap_or(ReadRegion::full(&src.desc));
                let dest = params.dest_rect.unwrap_or(ReadRegion::full(&dst.desc));
                transition(&self.list, &src.resource, src_state, D3D12_RESOURCE_STATE_COPY_SOURCE);
                transition(&self.list, &dst.resource, dst_state, D3D12_RESOURCE_STATE_COPY_DEST);
                let mut dst_location = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: ManuallyDrop::new(Some(dst.resource.clone())),
                    Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        SubresourceIndex: 0,
                    },
                };
                let mut src_location = D3D12_TEXTURE_COPY_LOCATION {
                    pResource: ManuallyDrop::new(Some(src.resource.clone())),
                    Type: D3D12_TEXTURE_COPY_TYPE_SUBRESOURCE_INDEX,
                    Anonymous: D3D12_TEXTURE_COPY_LOCATION_0 {
                        SubresourceIndex: 0,
                    },
                };
                let source_box = D3D12_BOX {
                    left: rect.x0,
                    top: rect.y0,
                    front: 0,
                    right: rect.x1,
                    bottom: rect.y1,
                    back: 1,
                };
                unsafe {
                    self.list.CopyTextureRegion(
                        &dst_location,
                        dest.x0,
                        dest.y0,
                        0,
                        &src_location,
                        Some(&source_box),
                    );
                }
                release_copy_location(&mut dst_location);
                release_copy_location(&mut src_location);
                transition(&self.list, &src.resource, D3D12_RESOURCE_STATE_COPY_SOURCE, src_state);
                transition(&self.list, &dst.resource, D3D12_RESOURCE_STATE_COPY_DEST, dst_state);
            }
            ResolveStrategy::HardwareBox => {
                transition(
                    &self.list,
                    &src.resource,
                    src_state,
                    D3D12_RESOURCE_STATE_RESOLVE_SOURCE,
                );
                transition(
                    &self.list,
                    &dst.resource,
                    dst_state,
                    D3D12_RESOURCE_STATE_RESOLVE_DEST,
                );
                unsafe {
                    self.list.ResolveSubresource(
                        &dst.resource,
                        0,
                        &src.resource,
                        0,
                        resolve_dest_format(dst.desc.format),
                    );
                }
                transition(
                    &self.list,
                    &src.resource,
                    D3D12_RESOURCE_STATE_RESOLVE_SOURCE,
                    src_state,
                );
                transition(
                    &self.list,
                    &dst.resource,
                    D3D12_RESOURCE_STATE_RESOLVE_DEST,
                    dst_state,
                );
            }
            ResolveStrategy::ShaderDepth
            | ResolveStrategy::ShaderDepthNonMs
            | ResolveStrategy::ShaderSingleSample => {
                if self.resolve_pass.is_none() {
                    self.resolve_pass = Some(D3d12ResolvePass::new(&self.device)?);
                }
                let target_state = if dst.desc.format.is_depth_stencil() {
                    D3D12_RESOURCE_STATE_DEPTH_WRITE
                } else {
                    D3D12_RESOURCE_STATE_RENDER_TARGET
                };
                transition(
                    &self.list,
                    &src.resource,
                    src_state,
                    D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
                );
                transition(&self.list, &dst.resource, dst_state, target_state);
                let pass = self.resolve_pass.as_mut().unwrap();
                pass.record(
                    &self.device,
                    &self.list,
                    &src.resource,
                    &src.desc,
                    &dst.resource,
                    &dst.desc,
                    strategy,
                    params,
                    &mut stats.clears,
                )?;
                transition(
                    &self.list,
                    &src.resource,
                    D3D12_RESOURCE_STATE_PIXEL_SHADER_RESOURCE,
                    src_state,
                );
                transition(&self.list, &dst.resource, target_state, dst_state);
            }
        }
        self.timeline.record();
        stats.resolves += 1;
        Ok(())
    }

    fn create_resolve_target(&mut self, desc: &TextureDesc) -> ReadbackResult<Box<dyn GpuTexture>> {
        self.check_device()?;
        let is_depth = desc.format.is_depth_stencil();
        let heap = D3D12_HEAP_PROPERTIES {
            Type: D3D12_HEAP_TYPE_DEFAULT,
            ..Default::default()
        };
        let raw = D3D12_RESOURCE_DESC {
            Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
            Width: desc.width as u64,
            Height: desc.height,
            DepthOrArraySize: 1,
            MipLevels: 1,
            Format: dxgi_format(desc.format),
            SampleDesc: DXGI_SAMPLE_DESC {
                Count: 1,
                Quality: 0,
            },
            Flags: if is_depth {
                D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL
            } else {
                D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET
            },
            ..Default::default()
        };
        let state = if is_depth {
            D3D12_RESOURCE_STATE_DEPTH_WRITE
        } else {
            D3D12_RESOURCE_STATE_RENDER_TARGET
        };
        let mut resource: Option<ID3D12Resource> = None;
        unsafe {
            self.device.CreateCommittedResource(
                &heap,
                D3D12_HEAP_FLAG_NONE,
                &raw,
                state,
                None,
                &mut resource,
            )
        }
        .context("CreateCommittedResource for resolve target failed")
        .map_err(ReadbackError::Platform)?;
        let resource = resource
            .context("CreateCommittedResource returned no resource")
            .map_err(ReadbackError::Platform)?;

        let mut texture_desc = *desc;
        texture_desc.usage = TextureUsage {
            render_target: !is_depth,
            depth_stencil: is_depth,
            shader_resource: false,
            cpu_readback: false,
        };
        Ok(Box::new(D3d12Texture::new(resource, texture_desc, state)))
    }
}
