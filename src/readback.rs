//! Blocking readback session over a backend capability set.
//!
//! The session owns the backend and drives the shared pipeline:
//! sync gate → resolve (for MSAA sources) → staging acquisition →
//! map → decode → unmap. Every public operation blocks the calling
//! thread until the GPU work it depends on has retired; readback is a
//! stall-the-pipeline operation and must stay off hot per-frame paths.

use crate::backend::{
    self, AcquiredStaging, GpuTexture, MappedSurface, ReadbackBackend, ReadbackBackendKind,
    StagingSurface, TextureDesc, TextureUsage,
};
use crate::buffer::{ColorBuffer, FloatColorBuffer, ReadbackStats};
use crate::decode;
use crate::error::{ReadbackError, ReadbackResult};
use crate::region::{ReadFlags, ReadRegion, ZRange};
use crate::resolve::{self, ResolveParams};

pub struct ReadbackSession {
    backend: Box<dyn ReadbackBackend>,
}

impl ReadbackSession {
    /// Open a session on the default backend for this platform.
    pub fn new() -> ReadbackResult<Self> {
        Ok(Self {
            backend: backend::default_backend()?,
        })
    }

    pub fn for_kind(kind: ReadbackBackendKind) -> ReadbackResult<Self> {
        Ok(Self {
            backend: backend::backend_for_kind(kind)?,
        })
    }

    pub fn with_backend(backend: Box<dyn ReadbackBackend>) -> Self {
        Self { backend }
    }

    pub fn backend_kind(&self) -> ReadbackBackendKind {
        self.backend.kind()
    }

    /// Read a rectangle of `texture` as RGBA8.
    ///
    /// Multisampled sources are read per sample plane: with
    /// `flags.sample_index` set, only that plane; otherwise every
    /// plane, laid out side by side per row (output width is
    /// `region width × sample count`), one resolve pass per sample.
    pub fn read_surface(
        &mut self,
        texture: &dyn GpuTexture,
        region: ReadRegion,
        flags: ReadFlags,
    ) -> ReadbackResult<ColorBuffer> {
        let desc = *texture.desc();
        region.validate(&desc, flags.subresource.mip_level)?;
        flags.subresource.validate(&desc)?;
        self.ensure_device()?;

        let mut stats = ReadbackStats::default();
        let mut buffer = if desc.is_multisampled() {
            self.read_surface_msaa(texture, &desc, region, &flags, &mut stats)?
        } else {
            self.read_single_sample(texture, region, &flags, &mut stats)?
        };
        buffer.stats = stats;
        Ok(buffer)
    }

    /// Read a rectangle of an RGBA16F texture as raw float16 pixels.
    /// No min/max scan or range compression occurs on this path.
    pub fn read_surface_float(
        &mut self,
        texture: &dyn GpuTexture,
        region: ReadRegion,
        flags: ReadFlags,
    ) -> ReadbackResult<FloatColorBuffer> {
        let desc = *texture.desc();
        region.validate(&desc, flags.subresource.mip_level)?;
        flags.subresource.validate(&desc)?;
        if desc.is_multisampled() {
            return Err(ReadbackError::InvalidConfig(
                "float readback of multisampled textures is not supported; resolve first".into(),
            ));
        }
        self.ensure_device()?;

        let mut stats = ReadbackStats::default();
        self.backend.wait_for_writes(texture, &mut stats)?;
        let mut acquired = self
            .backend
            .acquire_staging(texture, &region, &flags, &mut stats)?;
        let result = {
            let mapped = acquired.surface.map()?;
            decode::decode_to_rgba16f(desc.format, &mapped, acquired.region, ZRange::new(0, 1))
        };
        acquired.surface.unmap();
        let mut buffer = result?;
        buffer.stats = stats;
        Ok(buffer)
    }

    /// Read a box of a volume RGBA16F texture, honoring the staging
    /// slice pitch.
    pub fn read_3d_surface_float(
        &mut self,
        texture: &dyn GpuTexture,
        region: ReadRegion,
        z: ZRange,
    ) -> ReadbackResult<FloatColorBuffer> {
        let desc = *texture.desc();
        let flags = ReadFlags::default();
        region.validate(&desc, 0)?;
        z.validate(&desc, 0)?;
        self.ensure_device()?;

        let mut stats = ReadbackStats::default();
        self.backend.wait_for_writes(texture, &mut stats)?;
        let mut acquired = self
            .backend
            .acquire_staging(texture, &region, &flags, &mut stats)?;
        let result = {
            let mapped = acquired.surface.map()?;
            decode::decode_to_rgba16f(desc.format, &mapped, acquired.region, z)
        };
        acquired.surface.unmap();
        let mut buffer = result?;
        buffer.stats = stats;
        Ok(buffer)
    }

    /// Resolve `src` into `dst` (hardware box filter or shader pass,
    /// chosen by format/capability). Destination content outside the
    /// dest rect is preserved.
    pub fn copy_to_resolve_target(
        &mut self,
        src: &dyn GpuTexture,
        dst: &dyn GpuTexture,
        params: &ResolveParams,
    ) -> ReadbackResult<ReadbackStats> {
        self.ensure_device()?;
        let strategy = resolve::choose_strategy(src.desc(), dst.desc(), params)?;
        let mut stats = ReadbackStats::default();
        self.backend.resolve(src, dst, strategy, params, &mut stats)?;
        Ok(stats)
    }

    /// Map `texture`'s pixels for direct CPU access, leaving the
    /// resource mapped until the returned guard is dropped or
    /// [`MappedStaging::unmap`] is called.
    pub fn map_staging(&mut self, texture: &dyn GpuTexture) -> ReadbackResult<MappedStaging> {
        let desc = *texture.desc();
        self.ensure_device()?;

        let mut stats = ReadbackStats::default();
        self.backend.wait_for_writes(texture, &mut stats)?;
        let region = ReadRegion::full(&desc);
        let flags = ReadFlags::default();
        let acquired = self
            .backend
            .acquire_staging(texture, &region, &flags, &mut stats)?;
        MappedStaging::new(acquired, stats)
    }

    fn ensure_device(&self) -> ReadbackResult<()> {
        if self.backend.device_removed() {
            return Err(ReadbackError::DeviceRemoved);
        }
        Ok(())
    }

    fn read_single_sample(
        &mut self,
        texture: &dyn GpuTexture,
        region: ReadRegion,
        flags: &ReadFlags,
        stats: &mut ReadbackStats,
    ) -> ReadbackResult<ColorBuffer> {
        let format = texture.desc().format;
        self.backend.wait_for_writes(texture, stats)?;
        let mut acquired = self.backend.acquire_staging(texture, &region, flags, stats)?;
        let result = {
            let mapped = acquired.surface.map()?;
            decode::decode_to_rgba8(format, &mapped, acquired.region, flags)
        };
        acquired.surface.unmap();
        result
    }

    /// Per-sample MSAA readback: one resolve per sample index into a
    /// transient single-sample target, raw bytes gathered side by side
    /// per row, then a single decode over the combined surface so
    /// min/max normalization scans all samples jointly.
    fn read_surface_msaa(
        &mut self,
        texture: &dyn GpuTexture,
        desc: &TextureDesc,
        region: ReadRegion,
        flags: &ReadFlags,
        stats: &mut ReadbackStats,
    ) -> ReadbackResult<ColorBuffer> {
        let samples: Vec<u32> = match flags.sample_index {
            Some(sample) => {
                if sample >= desc.sample_count {
                    return Err(ReadbackError::InvalidConfig(format!(
                        "sample index {sample} out of range (sample count {})",
                        desc.sample_count
                    )));
                }
                vec![sample]
            }
            None => (0..desc.sample_count).collect(),
        };

        self.backend.wait_for_writes(texture, stats)?;

        let mut target_desc = *desc;
        target_desc.sample_count = 1;
        target_desc.mip_levels = 1;
        target_desc.array_size = 1;
        target_desc.usage = TextureUsage {
            render_target: !desc.format.is_depth_stencil(),
            depth_stencil: desc.format.is_depth_stencil(),
            shader_resource: false,
            cpu_readback: false,
        };

        let bpp = desc.format.bytes_per_pixel() as usize;
        let width = region.width() as usize;
        let height = region.height() as usize;
        let combined_row = width
            .checked_mul(samples.len())
            .and_then(|w| w.checked_mul(bpp))
            .ok_or(ReadbackError::BufferOverflow)?;
        let combined_len = combined_row
            .checked_mul(height)
            .ok_or(ReadbackError::BufferOverflow)?;
        let mut combined = vec![0u8; combined_len];

        for (plane, sample) in samples.iter().enumerate() {
            let target = self.backend.create_resolve_target(&target_desc)?;
            let params = ResolveParams {
                sample_index: Some(*sample),
                ..Default::default()
            };
            let strategy = resolve::choose_strategy(desc, &target_desc, &params)?;
            self.backend
                .resolve(texture, target.as_ref(), strategy, &params, stats)?;
            self.backend.wait_for_writes(target.as_ref(), stats)?;

            let mut acquired =
                self.backend
                    .acquire_staging(target.as_ref(), &region, flags, stats)?;
            let result = {
                let mapped = acquired.surface.map()?;
                gather_plane(&mapped, acquired.region, bpp, &mut combined, combined_row, plane)
            };
            acquired.surface.unmap();
            result?;
        }

        let combined_surface = MappedSurface {
            data: &combined,
            row_pitch: combined_row,
            slice_pitch: combined_len,
            width: (width * samples.len()) as u32,
            height: height as u32,
            depth: 1,
        };
        let full = ReadRegion::new(0, 0, (width * samples.len()) as u32, height as u32);
        decode::decode_to_rgba8(desc.format, &combined_surface, full, flags)
    }
}

impl std::fmt::Debug for ReadbackSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadbackSession")
            .field("backend", &self.backend.kind().as_str())
            .field("device_removed", &self.backend.device_removed())
            .finish()
    }
}

/// Copy one resolved sample plane's raw rows into its column of the
/// combined row-interleaved buffer.
fn gather_plane(
    mapped: &MappedSurface<'_>,
    region: ReadRegion,
    bpp: usize,
    combined: &mut [u8],
    combined_row: usize,
    plane: usize,
) -> ReadbackResult<()> {
    let width = region.width() as usize;
    let height = region.height() as usize;
    let row_bytes = width * bpp;
    let base = region.y0 as usize * mapped.row_pitch + region.x0 as usize * bpp;
    let needed = base + (height - 1) * mapped.row_pitch + row_bytes;
    if needed > mapped.data.len() {
        return Err(ReadbackError::InvalidRegion(format!(
            "sample plane needs {needed} bytes but only {} are mapped",
            mapped.data.len()
        )));
    }
    for row in 0..height {
        let src = &mapped.data[base + row * mapped.row_pitch..][..row_bytes];
        let dst_off = row * combined_row + plane * row_bytes;
        combined[dst_off..dst_off + row_bytes].copy_from_slice(src);
    }
    Ok(())
}

/// A staging mapping held open on the caller's behalf.
///
/// Returned by [`ReadbackSession::map_staging`]; the underlying
/// resource stays mapped until this guard is dropped.
pub struct MappedStaging {
    // Field order matters: the surface must outlive the raw view.
    ptr: *const u8,
    len: usize,
    row_pitch: usize,
    slice_pitch: usize,
    width: u32,
    height: u32,
    depth: u32,
    surface: Box<dyn StagingSurface>,
    stats: ReadbackStats,
}

impl MappedStaging {
    fn new(mut acquired: AcquiredStaging, stats: ReadbackStats) -> ReadbackResult<Self> {
        let (ptr, len, row_pitch, slice_pitch, width, height, depth) = {
            let mapped = acquired.surface.map()?;
            (
                mapped.data.as_ptr(),
                mapped.data.len(),
                mapped.row_pitch,
                mapped.slice_pitch,
                mapped.width,
                mapped.height,
                mapped.depth,
            )
        };
        Ok(Self {
            ptr,
            len,
            row_pitch,
            slice_pitch,
            width,
            height,
            depth,
            surface: acquired.surface,
            stats,
        })
    }

    /// The mapped bytes. Valid for the lifetime of the guard; the
    /// owned surface keeps the mapping alive until drop.
    pub fn data(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }

    pub fn row_pitch(&self) -> usize {
        self.row_pitch
    }

    pub fn slice_pitch(&self) -> usize {
        self.slice_pitch
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn stats(&self) -> ReadbackStats {
        self.stats
    }

    /// Explicit unmap; equivalent to dropping the guard.
    pub fn unmap(self) {}
}

impl Drop for MappedStaging {
    fn drop(&mut self) {
        self.surface.unmap();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::AcquiredStaging;
    use crate::format::PixelFormat;
    use crate::region::RangeCompression;
    use std::any::Any;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    /// Shared observable state so tests can inspect the backend after
    /// it has been moved into the session.
    #[derive(Default)]
    struct MockState {
        removed: AtomicBool,
        gpu_calls: AtomicU32,
        staging_allocations: AtomicU32,
        unmaps: AtomicU32,
        last_acquire_direct: AtomicBool,
    }

    struct MockTexture {
        desc: TextureDesc,
        /// One byte plane per MSAA sample; single-sample textures have
        /// exactly one. Tight row pitch.
        planes: Mutex<Vec<Vec<u8>>>,
    }

    impl MockTexture {
        fn single(desc: TextureDesc, data: Vec<u8>) -> Self {
            Self {
                desc,
                planes: Mutex::new(vec![data]),
            }
        }
    }

    impl GpuTexture for MockTexture {
        fn desc(&self) -> &TextureDesc {
            &self.desc
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    enum MapFailure {
        None,
        DeviceRemoved,
    }

    struct MockStaging {
        data: Vec<u8>,
        row_pitch: usize,
        width: u32,
        height: u32,
        depth: u32,
        state: Arc<MockState>,
        fail: MapFailure,
    }

    impl StagingSurface for MockStaging {
        fn map(&mut self) -> ReadbackResult<MappedSurface<'_>> {
            match self.fail {
                MapFailure::DeviceRemoved => {
                    // A real backend sees DXGI_ERROR_DEVICE_REMOVED here
                    // and marks the device unusable before surfacing it.
                    self.state.removed.store(true, Ordering::SeqCst);
                    Err(ReadbackError::DeviceRemoved)
                }
                MapFailure::None => Ok(MappedSurface {
                    data: &self.data,
                    row_pitch: self.row_pitch,
                    slice_pitch: self.row_pitch * self.height as usize,
                    width: self.width,
                    height: self.height,
                    depth: self.depth,
                }),
            }
        }

        fn unmap(&mut self) {
            self.state.unmaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct MockBackend {
        state: Arc<MockState>,
        /// Extra bytes appended to each staging row to emulate
        /// hardware row-pitch alignment.
        staging_row_padding: usize,
        fail_next_map: bool,
    }

    impl MockBackend {
        fn new() -> (Self, Arc<MockState>) {
            let state = Arc::new(MockState::default());
            (
                Self {
                    state: Arc::clone(&state),
                    staging_row_padding: 0,
                    fail_next_map: false,
                },
                state,
            )
        }

        fn check_device(&self) -> ReadbackResult<()> {
            if self.state.removed.load(Ordering::SeqCst) {
                return Err(ReadbackError::DeviceRemoved);
            }
            Ok(())
        }
    }

    impl ReadbackBackend for MockBackend {
        fn kind(&self) -> ReadbackBackendKind {
            ReadbackBackendKind::Auto
        }

        fn device_removed(&self) -> bool {
            self.state.removed.load(Ordering::SeqCst)
        }

        fn wait_for_writes(
            &mut self,
            _texture: &dyn GpuTexture,
            stats: &mut ReadbackStats,
        ) -> ReadbackResult<()> {
            self.check_device()?;
            self.state.gpu_calls.fetch_add(1, Ordering::SeqCst);
            stats.fence_waits += 1;
            Ok(())
        }

        fn acquire_staging(
            &mut self,
            texture: &dyn GpuTexture,
            region: &ReadRegion,
            _flags: &ReadFlags,
            stats: &mut ReadbackStats,
        ) -> ReadbackResult<AcquiredStaging> {
            self.check_device()?;
            self.state.gpu_calls.fetch_add(1, Ordering::SeqCst);
            let texture = backend::expect_texture::<MockTexture>(texture, self.kind())?;
            let desc = texture.desc;
            let bpp = desc.format.bytes_per_pixel() as usize;
            let tight_pitch = desc.width as usize * bpp;
            let fail = if self.fail_next_map {
                self.fail_next_map = false;
                MapFailure::DeviceRemoved
            } else {
                MapFailure::None
            };

            if desc.usage.cpu_readback {
                // Direct path: the source's own bytes, original region.
                self.state.last_acquire_direct.store(true, Ordering::SeqCst);
                stats.direct_maps += 1;
                let data = texture.planes.lock().unwrap()[0].clone();
                return Ok(AcquiredStaging {
                    surface: Box::new(MockStaging {
                        data,
                        row_pitch: tight_pitch,
                        width: desc.width,
                        height: desc.height,
                        depth: desc.depth,
                        state: Arc::clone(&self.state),
                        fail,
                    }),
                    region: *region,
                    direct: true,
                });
            }

            self.state.last_acquire_direct.store(false, Ordering::SeqCst);
            self.state.staging_allocations.fetch_add(1, Ordering::SeqCst);
            stats.staging_copies += 1;

            let width = region.width() as usize;
            let region_rows = region.height() as usize;
            let total_rows = region_rows * desc.depth as usize;
            let staging_pitch = width * bpp + self.staging_row_padding;
            let mut data = vec![0u8; staging_pitch * total_rows];
            let planes = texture.planes.lock().unwrap();
            for row in 0..total_rows {
                let slice = row / region_rows;
                let row_in_slice = row % region_rows;
                let src_off = (slice * desc.height as usize
                    + region.y0 as usize
                    + row_in_slice)
                    * tight_pitch
                    + region.x0 as usize * bpp;
                let dst_off = row * staging_pitch;
                data[dst_off..dst_off + width * bpp]
                    .copy_from_slice(&planes[0][src_off..src_off + width * bpp]);
            }

            Ok(AcquiredStaging {
                surface: Box::new(MockStaging {
                    data,
                    row_pitch: staging_pitch,
                    width: region.width(),
                    height: region.height(),
                    depth: desc.depth,
                    state: Arc::clone(&self.state),
                    fail,
                }),
                region: ReadRegion::new(0, 0, region.width(), region.height()),
                direct: false,
            })
        }

        fn resolve(
            &mut self,
            src: &dyn GpuTexture,
            dst: &dyn GpuTexture,
            _strategy: crate::resolve::ResolveStrategy,
            params: &ResolveParams,
            stats: &mut ReadbackStats,
        ) -> ReadbackResult<()> {
            self.check_device()?;
            self.state.gpu_calls.fetch_add(1, Ordering::SeqCst);
            stats.resolves += 1;
            let src = backend::expect_texture::<MockTexture>(src, self.kind())?;
            let dst = backend::expect_texture::<MockTexture>(dst, self.kind())?;
            let sample = params.sample_index.unwrap_or(0) as usize;
            let plane = src.planes.lock().unwrap()[sample].clone();
            dst.planes.lock().unwrap()[0] = plane;
            Ok(())
        }

        fn create_resolve_target(
            &mut self,
            desc: &TextureDesc,
        ) -> ReadbackResult<Box<dyn GpuTexture>> {
            self.check_device()?;
            let bpp = desc.format.bytes_per_pixel() as usize;
            let len = desc.width as usize * desc.height as usize * bpp;
            Ok(Box::new(MockTexture::single(*desc, vec![0u8; len])))
        }
    }

    fn bgra_desc(width: u32, height: u32) -> TextureDesc {
        TextureDesc::new_2d(width, height, PixelFormat::Bgra8Unorm)
    }

    fn gradient_bgra(width: u32, height: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity((width * height * 4) as usize);
        for i in 0..width * height {
            let v = (i % 7) as u8;
            data.extend_from_slice(&[v, v.wrapping_add(1), v.wrapping_add(2), 255]);
        }
        data
    }

    #[test]
    fn staging_copy_pipeline_decodes_and_reports_stats() {
        let (backend, state) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));
        let texture = MockTexture::single(bgra_desc(4, 2), gradient_bgra(4, 2));

        let out = session
            .read_surface(&texture, ReadRegion::new(0, 0, 4, 2), ReadFlags::default())
            .unwrap();

        assert_eq!(out.width(), 4);
        assert_eq!(out.height(), 2);
        // BGRA source byte 0 is blue; canonical output stores it last.
        assert_eq!(out.pixel(0, 0, 0), [2, 1, 0, 255]);
        assert_eq!(out.stats.staging_copies, 1);
        assert_eq!(out.stats.direct_maps, 0);
        assert!(out.stats.fence_waits >= 1);
        assert_eq!(state.staging_allocations.load(Ordering::SeqCst), 1);
        // The single mapping was released.
        assert_eq!(state.unmaps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn staging_row_padding_does_not_change_pixels() {
        let data = gradient_bgra(5, 3);
        let region = ReadRegion::new(0, 0, 5, 3);

        let (backend, _) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));
        let texture = MockTexture::single(bgra_desc(5, 3), data.clone());
        let tight = session
            .read_surface(&texture, region, ReadFlags::default())
            .unwrap();

        let (mut backend, _) = MockBackend::new();
        backend.staging_row_padding = 236; // emulate 256-byte row alignment
        let mut session = ReadbackSession::with_backend(Box::new(backend));
        let texture = MockTexture::single(bgra_desc(5, 3), data);
        let padded = session
            .read_surface(&texture, region, ReadFlags::default())
            .unwrap();

        assert_eq!(tight.as_bytes(), padded.as_bytes());
    }

    #[test]
    fn cpu_visible_source_is_returned_directly() {
        let (backend, state) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));
        let mut desc = bgra_desc(4, 4);
        desc.usage.cpu_readback = true;
        let texture = MockTexture::single(desc, gradient_bgra(4, 4));

        let out = session
            .read_surface(&texture, ReadRegion::new(1, 1, 3, 3), ReadFlags::default())
            .unwrap();

        // No staging allocation, no copy: the source itself was mapped
        // and the original (non-rebased) region decoded.
        assert_eq!(state.staging_allocations.load(Ordering::SeqCst), 0);
        assert!(state.last_acquire_direct.load(Ordering::SeqCst));
        assert_eq!(out.stats.direct_maps, 1);
        assert_eq!(out.stats.staging_copies, 0);
        assert_eq!(out.width(), 2);
        // Pixel (1,1) of the source: index 5 → v = 5.
        assert_eq!(out.pixel(0, 0, 0), [7, 6, 5, 255]);
    }

    #[test]
    fn device_removed_during_map_marks_device_and_short_circuits() {
        let (mut backend, state) = MockBackend::new();
        backend.fail_next_map = true;
        let mut session = ReadbackSession::with_backend(Box::new(backend));
        let texture = MockTexture::single(bgra_desc(2, 2), gradient_bgra(2, 2));

        let err = session
            .read_surface(&texture, ReadRegion::new(0, 0, 2, 2), ReadFlags::default())
            .unwrap_err();
        assert!(matches!(err, ReadbackError::DeviceRemoved));
        assert!(state.removed.load(Ordering::SeqCst));

        // Subsequent calls fail fast without touching the backend.
        let calls_before = state.gpu_calls.load(Ordering::SeqCst);
        let err = session
            .read_surface(&texture, ReadRegion::new(0, 0, 2, 2), ReadFlags::default())
            .unwrap_err();
        assert!(matches!(err, ReadbackError::DeviceRemoved));
        assert_eq!(state.gpu_calls.load(Ordering::SeqCst), calls_before);
    }

    #[test]
    fn invalid_region_is_rejected_before_any_gpu_work() {
        let (backend, state) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));
        let texture = MockTexture::single(bgra_desc(2, 2), gradient_bgra(2, 2));

        let err = session
            .read_surface(&texture, ReadRegion::new(0, 0, 3, 2), ReadFlags::default())
            .unwrap_err();
        assert!(matches!(err, ReadbackError::InvalidRegion(_)));
        assert_eq!(state.gpu_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn msaa_read_extracts_every_sample_plane() {
        let (backend, _) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));

        let mut desc = TextureDesc::new_2d(2, 1, PixelFormat::Rgba8Unorm);
        desc.sample_count = 2;
        let texture = MockTexture {
            desc,
            planes: Mutex::new(vec![
                vec![200, 0, 0, 255, 201, 0, 0, 255], // sample 0: reds
                vec![0, 90, 0, 255, 0, 91, 0, 255],   // sample 1: greens
            ]),
        };

        let out = session
            .read_surface(&texture, ReadRegion::new(0, 0, 2, 1), ReadFlags::default())
            .unwrap();

        // Two planes side by side per row.
        assert_eq!(out.width(), 4);
        assert_eq!(out.height(), 1);
        assert_eq!(out.pixel(0, 0, 0), [200, 0, 0, 255]);
        assert_eq!(out.pixel(1, 0, 0), [201, 0, 0, 255]);
        assert_eq!(out.pixel(2, 0, 0), [0, 90, 0, 255]);
        assert_eq!(out.pixel(3, 0, 0), [0, 91, 0, 255]);
        assert_eq!(out.stats.resolves, 2);
    }

    #[test]
    fn msaa_sample_index_reads_one_plane() {
        let (backend, _) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));

        let mut desc = TextureDesc::new_2d(1, 1, PixelFormat::Rgba8Unorm);
        desc.sample_count = 4;
        let texture = MockTexture {
            desc,
            planes: Mutex::new(vec![
                vec![10, 0, 0, 255],
                vec![20, 0, 0, 255],
                vec![30, 0, 0, 255],
                vec![40, 0, 0, 255],
            ]),
        };

        let flags = ReadFlags {
            sample_index: Some(2),
            ..Default::default()
        };
        let out = session
            .read_surface(&texture, ReadRegion::new(0, 0, 1, 1), flags)
            .unwrap();
        assert_eq!(out.width(), 1);
        assert_eq!(out.pixel(0, 0, 0), [30, 0, 0, 255]);
        assert_eq!(out.stats.resolves, 1);
    }

    #[test]
    fn float_read_passes_raw_half_floats_through() {
        use half::f16;
        let (backend, _) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));

        let values = [2.5f32, 0.25, -1.0, 1.0];
        let data: Vec<u8> = values
            .iter()
            .flat_map(|v| f16::from_f32(*v).to_bits().to_le_bytes())
            .collect();
        let texture = MockTexture::single(
            TextureDesc::new_2d(1, 1, PixelFormat::Rgba16Float),
            data,
        );

        let out = session
            .read_surface_float(&texture, ReadRegion::new(0, 0, 1, 1), ReadFlags::default())
            .unwrap();
        let px = out.pixel(0, 0, 0);
        assert_eq!(px[0].to_f32(), 2.5);
        assert_eq!(px[1].to_f32(), 0.25);
        assert_eq!(px[2].to_f32(), -1.0);
    }

    #[test]
    fn float_read_of_unorm_format_fails_closed() {
        let (backend, _) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));
        let texture = MockTexture::single(bgra_desc(1, 1), vec![0u8; 4]);

        let err = session
            .read_surface_float(&texture, ReadRegion::new(0, 0, 1, 1), ReadFlags::default())
            .unwrap_err();
        assert!(matches!(err, ReadbackError::UnsupportedFormat(_)));
    }

    #[test]
    fn volume_float_read_walks_slices() {
        use half::f16;
        let (backend, _) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));

        let mut desc = TextureDesc::new_2d(1, 1, PixelFormat::Rgba16Float);
        desc.depth = 2;
        let mut data = Vec::new();
        for v in [1.0f32, 0.0, 0.0, 1.0, 3.0, 0.0, 0.0, 1.0] {
            data.extend_from_slice(&f16::from_f32(v).to_bits().to_le_bytes());
        }
        let texture = MockTexture::single(desc, data);

        let out = session
            .read_3d_surface_float(&texture, ReadRegion::new(0, 0, 1, 1), ZRange::new(0, 2))
            .unwrap();
        assert_eq!(out.depth(), 2);
        assert_eq!(out.pixel(0, 0, 0)[0].to_f32(), 1.0);
        assert_eq!(out.pixel(0, 0, 1)[0].to_f32(), 3.0);
    }

    #[test]
    fn map_staging_guard_releases_mapping_on_drop() {
        let (backend, state) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));
        let mut desc = bgra_desc(2, 2);
        desc.usage.cpu_readback = true;
        let texture = MockTexture::single(desc, gradient_bgra(2, 2));

        let guard = session.map_staging(&texture).unwrap();
        assert_eq!(guard.width(), 2);
        assert_eq!(guard.row_pitch(), 8);
        assert_eq!(guard.data().len(), 16);
        assert_eq!(guard.stats().direct_maps, 1);
        assert_eq!(state.unmaps.load(Ordering::SeqCst), 0);

        guard.unmap();
        assert_eq!(state.unmaps.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn resolve_to_target_reports_one_resolve() {
        let (backend, _) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));

        let mut src_desc = TextureDesc::new_2d(2, 2, PixelFormat::Rgba8Unorm);
        src_desc.sample_count = 4;
        let src = MockTexture {
            desc: src_desc,
            planes: Mutex::new(vec![vec![0u8; 16]; 4]),
        };
        let dst = MockTexture::single(
            TextureDesc::new_2d(2, 2, PixelFormat::Rgba8Unorm),
            vec![0u8; 16],
        );

        let stats = session
            .copy_to_resolve_target(&src, &dst, &ResolveParams::default())
            .unwrap();
        assert_eq!(stats.resolves, 1);
    }

    #[test]
    fn minmax_normalization_spans_all_msaa_samples() {
        use half::f16;
        // Sample 0 holds 2.0 in red, sample 1 holds 0.5: a joint scan
        // must map them to 255 and 64, not normalize per plane.
        let (backend, _) = MockBackend::new();
        let mut session = ReadbackSession::with_backend(Box::new(backend));

        let mut desc = TextureDesc::new_2d(1, 1, PixelFormat::Rgba16Float);
        desc.sample_count = 2;
        let plane = |r: f32| -> Vec<u8> {
            [r, 0.0, 0.0, 1.0]
                .iter()
                .flat_map(|v| f16::from_f32(*v).to_bits().to_le_bytes())
                .collect()
        };
        let texture = MockTexture {
            desc,
            planes: Mutex::new(vec![plane(2.0), plane(0.5)]),
        };

        let flags = ReadFlags {
            range: RangeCompression::MinMaxNorm,
            ..Default::default()
        };
        let out = session
            .read_surface(&texture, ReadRegion::new(0, 0, 1, 1), flags)
            .unwrap();
        assert_eq!(out.width(), 2);
        assert_eq!(out.pixel(0, 0, 0)[0], 255);
        assert_eq!(out.pixel(1, 0, 0)[0], 64);
    }
}
