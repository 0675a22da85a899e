//! Pure-CPU readback decoder.
//!
//! Walks a mapped staging surface scanline by scanline — always
//! advancing by the mapped row/slice pitch, never by the logical row
//! size — and converts each supported pixel format into canonical
//! RGBA8 or RGBA16F. Backend-agnostic: both D3D backends feed the same
//! code, and the tests drive it with plain byte slices.

mod f16;
mod packed;
mod parallel;
mod scalar;

use crate::backend::MappedSurface;
use crate::buffer::{ColorBuffer, FloatColorBuffer};
use crate::error::{ReadbackError, ReadbackResult};
use crate::format::PixelFormat;
use crate::region::{RangeCompression, ReadFlags, ReadRegion, ZRange};

use f16::{f16_from_le, linear_to_srgb_u8, quantize_unorm8};
use parallel::{install_decode_pool, parallel_chunk_pixels, should_parallelize};

type PixelKernel = unsafe fn(*const u8, *mut u8, usize);

const EXACT_PARALLEL_MIN_PIXELS: usize = 262_144;
const EXACT_PARALLEL_MIN_CHUNK_PIXELS: usize = 65_536;
const EXACT_PARALLEL_MAX_WORKERS: usize = 8;

/// Pre-initialize the decode thread pool so the first large readback
/// doesn't pay the pool-creation cost. Safe to call multiple times.
pub fn warmup() {
    install_decode_pool(EXACT_PARALLEL_MAX_WORKERS, || {});
}

/// Decode the `region` window of a mapped surface into RGBA8.
pub fn decode_to_rgba8(
    format: PixelFormat,
    mapped: &MappedSurface<'_>,
    region: ReadRegion,
    flags: &ReadFlags,
) -> ReadbackResult<ColorBuffer> {
    let width = region.width();
    let height = region.height();
    let bpp = format.bytes_per_pixel() as usize;
    let base = validate_window(mapped, region, bpp, None)?;
    let mut out = ColorBuffer::with_dimensions(width, height, 1)?;

    match format {
        PixelFormat::Rgba8Unorm | PixelFormat::Rgba8UnormSrgb => {
            run_exact_rows(mapped, base, &mut out, scalar::copy_rgba_unchecked);
        }
        PixelFormat::Bgra8Unorm | PixelFormat::Bgra8UnormSrgb => {
            run_exact_rows(mapped, base, &mut out, scalar::convert_bgra_to_rgba_unchecked);
        }
        PixelFormat::R8Unorm => {
            for_each_texel(mapped, base, width, height, bpp, out.as_mut_bytes(), |px, dst| {
                let v = px[0];
                *dst = [v, v, v, 255];
            });
        }
        PixelFormat::R16Typeless => {
            for_each_texel(mapped, base, width, height, bpp, out.as_mut_bytes(), |px, dst| {
                let v = (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8;
                *dst = [v, v, v, 255];
            });
        }
        PixelFormat::Rg16Unorm => {
            for_each_texel(mapped, base, width, height, bpp, out.as_mut_bytes(), |px, dst| {
                let r = (u16::from_le_bytes([px[0], px[1]]) >> 8) as u8;
                let g = (u16::from_le_bytes([px[2], px[3]]) >> 8) as u8;
                *dst = [r, g, 0, 255];
            });
        }
        PixelFormat::Rgba16Unorm => {
            for_each_texel(mapped, base, width, height, bpp, out.as_mut_bytes(), |px, dst| {
                *dst = [px[1], px[3], px[5], px[7]];
            });
        }
        PixelFormat::Rgb10A2Unorm => {
            for_each_texel(mapped, base, width, height, bpp, out.as_mut_bytes(), |px, dst| {
                let word = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
                *dst = packed::decode_r10g10b10a2_unorm(word);
            });
        }
        PixelFormat::Rg11B10Float => {
            decode_float_region(mapped, base, width, height, bpp, flags, &mut out, |px| {
                let word = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
                let [r, g, b] = packed::decode_r11g11b10(word);
                [r, g, b, 1.0]
            });
        }
        PixelFormat::Rgba16Float => {
            decode_float_region(mapped, base, width, height, bpp, flags, &mut out, |px| {
                [
                    f16_from_le(&px[0..2]),
                    f16_from_le(&px[2..4]),
                    f16_from_le(&px[4..6]),
                    f16_from_le(&px[6..8]),
                ]
            });
        }
        PixelFormat::Rgba32Float => {
            decode_float_region(mapped, base, width, height, bpp, flags, &mut out, |px| {
                [
                    f32::from_le_bytes([px[0], px[1], px[2], px[3]]),
                    f32::from_le_bytes([px[4], px[5], px[6], px[7]]),
                    f32::from_le_bytes([px[8], px[9], px[10], px[11]]),
                    f32::from_le_bytes([px[12], px[13], px[14], px[15]]),
                ]
            });
        }
        PixelFormat::Depth24Stencil8 => {
            decode_depth_region(mapped, base, width, height, bpp, flags, &mut out, |px| {
                let word = u32::from_le_bytes([px[0], px[1], px[2], px[3]]);
                packed::decode_d24s8(word)
            });
        }
        PixelFormat::Depth32Stencil8 => {
            decode_depth_region(mapped, base, width, height, bpp, flags, &mut out, |px| {
                packed::decode_d32s8x24(px)
            });
        }
    }

    Ok(out)
}

/// Decode the `region` window (and `z` slice range) of a mapped
/// surface into raw RGBA16F. No range compression is applied: float16
/// source bits pass through unmodified.
pub fn decode_to_rgba16f(
    format: PixelFormat,
    mapped: &MappedSurface<'_>,
    region: ReadRegion,
    z: ZRange,
) -> ReadbackResult<FloatColorBuffer> {
    if format != PixelFormat::Rgba16Float {
        return Err(ReadbackError::UnsupportedFormat(format!(
            "{} cannot be read as RGBA16F",
            format.name()
        )));
    }

    let width = region.width();
    let height = region.height();
    let depth = z.depth();
    let bpp = format.bytes_per_pixel() as usize;
    let base = validate_window(mapped, region, bpp, Some(z))?;
    let mut out = FloatColorBuffer::with_dimensions(width, height, depth)?;

    let components = out.as_mut_components();
    let mut write = 0usize;
    for slice in 0..depth as usize {
        let slice_base = base + slice * mapped.slice_pitch;
        for row in 0..height as usize {
            let src_row = &mapped.data[slice_base + row * mapped.row_pitch..];
            for x in 0..width as usize {
                let px = &src_row[x * bpp..x * bpp + bpp];
                components[write] = half::f16::from_bits(u16::from_le_bytes([px[0], px[1]]));
                components[write + 1] = half::f16::from_bits(u16::from_le_bytes([px[2], px[3]]));
                components[write + 2] = half::f16::from_bits(u16::from_le_bytes([px[4], px[5]]));
                components[write + 3] = half::f16::from_bits(u16::from_le_bytes([px[6], px[7]]));
                write += 4;
            }
        }
    }

    Ok(out)
}

/// Byte offset of the window's first texel, after checking that the
/// whole window (last row included, padding excluded) fits inside the
/// mapped data.
fn validate_window(
    mapped: &MappedSurface<'_>,
    region: ReadRegion,
    bpp: usize,
    z: Option<ZRange>,
) -> ReadbackResult<usize> {
    if region.x0 >= region.x1 || region.y0 >= region.y1 {
        return Err(ReadbackError::InvalidRegion(format!("empty region {region:?}")));
    }
    let (z0, z1) = match z {
        Some(range) => (range.z0 as usize, range.z1 as usize),
        None => (0, 1),
    };
    if z0 >= z1 {
        return Err(ReadbackError::InvalidRegion("empty z range".into()));
    }
    let width = region.width() as usize;
    let height = region.height() as usize;

    let base = (region.y0 as usize)
        .checked_mul(mapped.row_pitch)
        .and_then(|v| v.checked_add((region.x0 as usize).checked_mul(bpp)?))
        .and_then(|v| v.checked_add(z0.checked_mul(mapped.slice_pitch)?))
        .ok_or(ReadbackError::BufferOverflow)?;

    let row_bytes = width.checked_mul(bpp).ok_or(ReadbackError::BufferOverflow)?;
    let end = (height - 1)
        .checked_mul(mapped.row_pitch)
        .and_then(|v| v.checked_add(row_bytes))
        .and_then(|v| v.checked_add((z1 - z0 - 1).checked_mul(mapped.slice_pitch)?))
        .and_then(|v| v.checked_add(base))
        .ok_or(ReadbackError::BufferOverflow)?;

    if end > mapped.data.len() {
        return Err(ReadbackError::InvalidRegion(format!(
            "window needs {end} bytes but only {} are mapped",
            mapped.data.len()
        )));
    }
    Ok(base)
}

#[derive(Clone, Copy)]
struct SurfaceLayout {
    src: *const u8,
    src_pitch: usize,
    dst: *mut u8,
    dst_pitch: usize,
    width: usize,
    height: usize,
}

/// Row-driver for formats whose decode is a per-row kernel (RGBA copy,
/// BGRA swizzle). Large surfaces fan rows out across the decode pool.
fn run_exact_rows(
    mapped: &MappedSurface<'_>,
    base: usize,
    out: &mut ColorBuffer,
    kernel: PixelKernel,
) {
    let width = out.width() as usize;
    let height = out.height() as usize;
    if width == 0 || height == 0 {
        return;
    }
    let layout = SurfaceLayout {
        src: mapped.data[base..].as_ptr(),
        src_pitch: mapped.row_pitch,
        dst: out.as_mut_bytes().as_mut_ptr(),
        dst_pitch: width * 4,
        width,
        height,
    };
    let total_pixels = width * height;

    let parallel_ok = !parallel::ranges_overlap(
        layout.src,
        layout.src_pitch * height,
        layout.dst,
        layout.dst_pitch * height,
    );
    if parallel_ok
        && should_parallelize(
            total_pixels,
            EXACT_PARALLEL_MIN_PIXELS,
            EXACT_PARALLEL_MIN_CHUNK_PIXELS,
            EXACT_PARALLEL_MAX_WORKERS,
        )
        && let Some(chunk_pixels) = parallel_chunk_pixels(
            total_pixels,
            EXACT_PARALLEL_MIN_CHUNK_PIXELS,
            EXACT_PARALLEL_MAX_WORKERS,
        )
    {
        let chunk_rows = (chunk_pixels / width).max(1);
        let chunk_count = height.div_ceil(chunk_rows);
        let src_addr = layout.src as usize;
        let dst_addr = layout.dst as usize;

        use rayon::prelude::*;
        install_decode_pool(EXACT_PARALLEL_MAX_WORKERS, || {
            (0..chunk_count).into_par_iter().for_each(|chunk_idx| {
                let start_row = chunk_idx * chunk_rows;
                let rows = (layout.height - start_row).min(chunk_rows);
                for row_offset in 0..rows {
                    let row = start_row + row_offset;
                    unsafe {
                        kernel(
                            (src_addr + row * layout.src_pitch) as *const u8,
                            (dst_addr + row * layout.dst_pitch) as *mut u8,
                            layout.width,
                        );
                    }
                }
            });
        });
        return;
    }

    for row in 0..height {
        unsafe {
            kernel(
                layout.src.add(row * layout.src_pitch),
                layout.dst.add(row * layout.dst_pitch),
                layout.width,
            );
        }
    }
}

/// Serial texel walk for the low-rate editor/debug formats.
fn for_each_texel(
    mapped: &MappedSurface<'_>,
    base: usize,
    width: u32,
    height: u32,
    bpp: usize,
    out: &mut [u8],
    mut texel: impl FnMut(&[u8], &mut [u8; 4]),
) {
    let width = width as usize;
    for row in 0..height as usize {
        let src_row = &mapped.data[base + row * mapped.row_pitch..];
        let dst_row = &mut out[row * width * 4..];
        for x in 0..width {
            let px = &src_row[x * bpp..x * bpp + bpp];
            let mut rgba = [0u8; 4];
            texel(px, &mut rgba);
            dst_row[x * 4..x * 4 + 4].copy_from_slice(&rgba);
        }
    }
}

/// Float-format quantization to RGBA8.
///
/// GPU float buffers routinely exceed [0, 1] (HDR scene color), so a
/// fixed scale would clip or waste precision. With
/// [`RangeCompression::MinMaxNorm`] a first pass computes the
/// per-channel min/max over the *entire requested region*, seeded with
/// [0, 1] so in-range data is unaffected; a second pass remaps each
/// channel linearly from [min, max] to [0, 1] before quantizing.
#[allow(clippy::too_many_arguments)]
fn decode_float_region(
    mapped: &MappedSurface<'_>,
    base: usize,
    width: u32,
    height: u32,
    bpp: usize,
    flags: &ReadFlags,
    out: &mut ColorBuffer,
    decode_px: impl Fn(&[u8]) -> [f32; 4],
) {
    let (min, max) = match flags.range {
        RangeCompression::MinMaxNorm => {
            let mut min = [0.0f32; 4];
            let mut max = [1.0f32; 4];
            for row in 0..height as usize {
                let src_row = &mapped.data[base + row * mapped.row_pitch..];
                for x in 0..width as usize {
                    let value = decode_px(&src_row[x * bpp..x * bpp + bpp]);
                    for c in 0..4 {
                        min[c] = min[c].min(value[c]);
                        max[c] = max[c].max(value[c]);
                    }
                }
            }
            (min, max)
        }
        RangeCompression::Clamp => ([0.0f32; 4], [1.0f32; 4]),
    };

    // Seeding guarantees max - min >= 1, so the divide is safe.
    let scale = [
        max[0] - min[0],
        max[1] - min[1],
        max[2] - min[2],
        max[3] - min[3],
    ];
    let gamma = flags.linear_to_gamma;

    for_each_texel(mapped, base, width, height, bpp, out.as_mut_bytes(), |px, dst| {
        let value = decode_px(px);
        let mut remapped = [0.0f32; 4];
        for c in 0..4 {
            remapped[c] = ((value[c] - min[c]) / scale[c]).clamp(0.0, 1.0);
        }
        // Gamma encoding applies to color channels only; alpha stays
        // linear.
        if gamma {
            *dst = [
                linear_to_srgb_u8(remapped[0]),
                linear_to_srgb_u8(remapped[1]),
                linear_to_srgb_u8(remapped[2]),
                quantize_unorm8(remapped[3]),
            ];
        } else {
            *dst = [
                quantize_unorm8(remapped[0]),
                quantize_unorm8(remapped[1]),
                quantize_unorm8(remapped[2]),
                quantize_unorm8(remapped[3]),
            ];
        }
    });
}

/// Depth/stencil decode: either the stencil byte replicated across
/// RGB, or device Z (optionally linearized) as grayscale.
#[allow(clippy::too_many_arguments)]
fn decode_depth_region(
    mapped: &MappedSurface<'_>,
    base: usize,
    width: u32,
    height: u32,
    bpp: usize,
    flags: &ReadFlags,
    out: &mut ColorBuffer,
    decode_px: impl Fn(&[u8]) -> (f32, u8),
) {
    let output_stencil = flags.output_stencil;
    let linearize = flags.depth;
    for_each_texel(mapped, base, width, height, bpp, out.as_mut_bytes(), |px, dst| {
        let (device_z, stencil) = decode_px(px);
        if output_stencil {
            *dst = [stencil, stencil, stencil, 255];
        } else {
            let value = match linearize {
                Some(lin) => lin.normalize(device_z),
                None => device_z,
            };
            let byte = quantize_unorm8(value);
            *dst = [byte, byte, byte, 255];
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::DepthLinearization;
    use half::f16 as h16;

    fn mapped(data: &[u8], row_pitch: usize, width: u32, height: u32) -> MappedSurface<'_> {
        MappedSurface {
            data,
            row_pitch,
            slice_pitch: row_pitch * height as usize,
            width,
            height,
            depth: 1,
        }
    }

    fn f16_bytes(values: &[f32]) -> Vec<u8> {
        values
            .iter()
            .flat_map(|v| h16::from_f32(*v).to_bits().to_le_bytes())
            .collect()
    }

    fn f32_bytes(values: &[f32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn rgba8_roundtrip_is_byte_exact() {
        let data: Vec<u8> = (0u8..32).collect();
        let surface = mapped(&data, 16, 4, 2);
        let out = decode_to_rgba8(
            PixelFormat::Rgba8Unorm,
            &surface,
            ReadRegion::new(0, 0, 4, 2),
            &ReadFlags::default(),
        )
        .unwrap();
        assert_eq!(out.as_bytes(), &data[..]);
    }

    #[test]
    fn bgra8_swizzles_to_canonical_order() {
        // One BGRA pixel: B=1 G=2 R=3 A=4.
        let data = [1u8, 2, 3, 4];
        let surface = mapped(&data, 4, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::Bgra8Unorm,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &ReadFlags::default(),
        )
        .unwrap();
        assert_eq!(out.pixel(0, 0, 0), [3, 2, 1, 4]);
    }

    #[test]
    fn row_pitch_padding_is_never_read() {
        // Same 3x2 BGRA image twice: tight pitch, and a 256-byte pitch
        // with poisoned padding. Decodes must be identical.
        let logical_row = 3 * 4;
        let mut tight = Vec::new();
        for i in 0..2 * logical_row {
            tight.push(i as u8);
        }
        let mut padded = vec![0xEEu8; 256 * 2];
        for row in 0..2 {
            padded[row * 256..row * 256 + logical_row]
                .copy_from_slice(&tight[row * logical_row..(row + 1) * logical_row]);
        }

        let flags = ReadFlags::default();
        let region = ReadRegion::new(0, 0, 3, 2);
        let from_tight = decode_to_rgba8(
            PixelFormat::Bgra8Unorm,
            &mapped(&tight, logical_row, 3, 2),
            region,
            &flags,
        )
        .unwrap();
        let from_padded = decode_to_rgba8(
            PixelFormat::Bgra8Unorm,
            &mapped(&padded, 256, 3, 2),
            region,
            &flags,
        )
        .unwrap();
        assert_eq!(from_tight.as_bytes(), from_padded.as_bytes());
    }

    #[test]
    fn sub_rectangle_reads_offset_pixels() {
        // 4x1 BGRA row; read only x = 2..4.
        let data = [
            10u8, 0, 0, 255, 20, 0, 0, 255, 30, 0, 0, 255, 40, 0, 0, 255,
        ];
        let surface = mapped(&data, 16, 4, 1);
        let out = decode_to_rgba8(
            PixelFormat::Bgra8Unorm,
            &surface,
            ReadRegion::new(2, 0, 4, 1),
            &ReadFlags::default(),
        )
        .unwrap();
        assert_eq!(out.width(), 2);
        assert_eq!(out.pixel(0, 0, 0), [0, 0, 30, 255]);
        assert_eq!(out.pixel(1, 0, 0), [0, 0, 40, 255]);
    }

    #[test]
    fn minmax_in_range_matches_fixed_quantization() {
        let values = [0.0f32, 0.25, 0.5, 1.0, 0.75, 0.1, 0.9, 1.0];
        let data = f16_bytes(&values);
        let surface = mapped(&data, 16, 2, 1);
        let region = ReadRegion::new(0, 0, 2, 1);

        let minmax = decode_to_rgba8(
            PixelFormat::Rgba16Float,
            &surface,
            region,
            &ReadFlags {
                range: RangeCompression::MinMaxNorm,
                ..Default::default()
            },
        )
        .unwrap();
        let clamped = decode_to_rgba8(
            PixelFormat::Rgba16Float,
            &surface,
            region,
            &ReadFlags {
                range: RangeCompression::Clamp,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(minmax.as_bytes(), clamped.as_bytes());
    }

    #[test]
    fn minmax_rescales_out_of_range_channel() {
        // Red channel spans [0, 2]: the scan must find max = 2.0 and
        // remap 2.0 → 255, 0.0 → 0, while 0.5 on the other channels
        // (inside the seeded [0, 1] bounds) stays at 128.
        let values = [2.0f32, 0.5, 0.5, 0.5, 0.0, 0.5, 0.5, 0.5];
        let data = f32_bytes(&values);
        let surface = mapped(&data, 32, 2, 1);
        let out = decode_to_rgba8(
            PixelFormat::Rgba32Float,
            &surface,
            ReadRegion::new(0, 0, 2, 1),
            &ReadFlags::default(),
        )
        .unwrap();
        assert_eq!(out.pixel(0, 0, 0), [255, 128, 128, 128]);
        assert_eq!(out.pixel(1, 0, 0), [0, 128, 128, 128]);
    }

    #[test]
    fn gamma_flag_encodes_srgb() {
        let data = f16_bytes(&[0.5, 0.5, 0.5, 0.5]);
        let surface = mapped(&data, 8, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::Rgba16Float,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &ReadFlags {
                linear_to_gamma: true,
                ..Default::default()
            },
        )
        .unwrap();
        // sRGB(0.5) → 188; alpha stays linear → 128.
        assert_eq!(out.pixel(0, 0, 0), [188, 188, 188, 128]);
    }

    #[test]
    fn r11g11b10_minmax_is_per_channel() {
        // R = 1.0, G = 2.0, B = 0.5. Only green exceeds the seeded
        // bounds, so red and blue quantize against [0, 1].
        let word: u32 = (15 << 6) | ((16 << 6) << 11) | ((14 << 5) << 22);
        let data = word.to_le_bytes();
        let surface = mapped(&data, 4, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::Rg11B10Float,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &ReadFlags::default(),
        )
        .unwrap();
        assert_eq!(out.pixel(0, 0, 0), [255, 255, 128, 255]);
    }

    #[test]
    fn depth_boundaries_linearize_cleanly() {
        let flags = ReadFlags {
            depth: Some(DepthLinearization {
                near_plane: 0.1,
                far_plane: 1000.0,
            }),
            ..Default::default()
        };
        let max_depth = 0x00FF_FFFFu32.to_le_bytes();
        let surface = mapped(&max_depth, 4, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::Depth24Stencil8,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &flags,
        )
        .unwrap();
        assert_eq!(out.pixel(0, 0, 0), [255, 255, 255, 255]);

        let zero_depth = 0u32.to_le_bytes();
        let surface = mapped(&zero_depth, 4, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::Depth24Stencil8,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &flags,
        )
        .unwrap();
        // near/far = 0.0001 quantizes to 0 — but never negative or NaN.
        assert_eq!(out.pixel(0, 0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn stencil_output_replicates_stencil_byte() {
        let word = 0x3D00_0000u32.to_le_bytes();
        let surface = mapped(&word, 4, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::Depth24Stencil8,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &ReadFlags {
                output_stencil: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(out.pixel(0, 0, 0), [0x3D, 0x3D, 0x3D, 255]);
    }

    #[test]
    fn d32s8x24_reads_float_depth() {
        let mut texel = [0u8; 8];
        texel[..4].copy_from_slice(&1.0f32.to_le_bytes());
        texel[4] = 9;
        let surface = mapped(&texel, 8, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::Depth32Stencil8,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &ReadFlags::default(),
        )
        .unwrap();
        assert_eq!(out.pixel(0, 0, 0), [255, 255, 255, 255]);
    }

    #[test]
    fn float_output_requires_float_format() {
        let data = [0u8; 4];
        let surface = mapped(&data, 4, 1, 1);
        let result = decode_to_rgba16f(
            PixelFormat::Bgra8Unorm,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            ZRange::new(0, 1),
        );
        assert!(matches!(result, Err(ReadbackError::UnsupportedFormat(_))));
    }

    #[test]
    fn float_passthrough_preserves_out_of_range_values() {
        // 2.0 must survive untouched: no min/max scan on the float
        // output path.
        let data = f16_bytes(&[2.0, 0.5, -1.0, 1.0]);
        let surface = mapped(&data, 8, 1, 1);
        let out = decode_to_rgba16f(
            PixelFormat::Rgba16Float,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            ZRange::new(0, 1),
        )
        .unwrap();
        let px = out.pixel(0, 0, 0);
        assert_eq!(px[0].to_f32(), 2.0);
        assert_eq!(px[1].to_f32(), 0.5);
        assert_eq!(px[2].to_f32(), -1.0);
        assert_eq!(px[3].to_f32(), 1.0);
    }

    #[test]
    fn volume_read_honors_slice_pitch() {
        // 1x1x2 volume with padded rows and slices. Slice 0 holds 1.0,
        // slice 1 holds 2.0 in the red channel.
        let row_pitch = 32;
        let slice_pitch = 64;
        let mut data = vec![0u8; slice_pitch * 2];
        data[..8].copy_from_slice(&f16_bytes(&[1.0, 0.0, 0.0, 1.0]));
        data[slice_pitch..slice_pitch + 8].copy_from_slice(&f16_bytes(&[2.0, 0.0, 0.0, 1.0]));

        let surface = MappedSurface {
            data: &data,
            row_pitch,
            slice_pitch,
            width: 1,
            height: 1,
            depth: 2,
        };
        let out = decode_to_rgba16f(
            PixelFormat::Rgba16Float,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            ZRange::new(0, 2),
        )
        .unwrap();
        assert_eq!(out.depth(), 2);
        assert_eq!(out.pixel(0, 0, 0)[0].to_f32(), 1.0);
        assert_eq!(out.pixel(0, 0, 1)[0].to_f32(), 2.0);
    }

    #[test]
    fn window_larger_than_mapping_is_rejected() {
        let data = [0u8; 16];
        let surface = mapped(&data, 16, 4, 1);
        let result = decode_to_rgba8(
            PixelFormat::Rgba8Unorm,
            &surface,
            ReadRegion::new(0, 0, 4, 2),
            &ReadFlags::default(),
        );
        assert!(matches!(result, Err(ReadbackError::InvalidRegion(_))));
    }

    #[test]
    fn grayscale_formats_replicate_into_rgb() {
        let surface_data = [0x80u8];
        let surface = mapped(&surface_data, 1, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::R8Unorm,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &ReadFlags::default(),
        )
        .unwrap();
        assert_eq!(out.pixel(0, 0, 0), [0x80, 0x80, 0x80, 255]);

        let surface_data = 0xBEEFu16.to_le_bytes();
        let surface = mapped(&surface_data, 2, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::R16Typeless,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &ReadFlags::default(),
        )
        .unwrap();
        assert_eq!(out.pixel(0, 0, 0), [0xBE, 0xBE, 0xBE, 255]);
    }

    #[test]
    fn rg16_and_rgba16_take_high_bytes() {
        let mut data = Vec::new();
        data.extend_from_slice(&0x1200u16.to_le_bytes());
        data.extend_from_slice(&0x3400u16.to_le_bytes());
        let surface = mapped(&data, 4, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::Rg16Unorm,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &ReadFlags::default(),
        )
        .unwrap();
        assert_eq!(out.pixel(0, 0, 0), [0x12, 0x34, 0, 255]);
    }

    #[test]
    fn r10g10b10a2_packs_to_rgba8() {
        let word: u32 = 1023 | (511 << 10) | (0 << 20) | (3u32 << 30);
        let data = word.to_le_bytes();
        let surface = mapped(&data, 4, 1, 1);
        let out = decode_to_rgba8(
            PixelFormat::Rgb10A2Unorm,
            &surface,
            ReadRegion::new(0, 0, 1, 1),
            &ReadFlags::default(),
        )
        .unwrap();
        let px = out.pixel(0, 0, 0);
        assert_eq!(px[0], 255);
        assert_eq!(px[1], 127);
        assert_eq!(px[2], 0);
        assert_eq!(px[3], 255);
    }
}
