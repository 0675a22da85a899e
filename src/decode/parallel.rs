use std::sync::OnceLock;

/// Chunks are aligned down to this many pixels so adjacent workers
/// never split a cache line of output.
const PARALLEL_CHUNK_ALIGNMENT_PIXELS: usize = 256;

#[inline(always)]
pub(crate) fn should_parallelize(
    pixel_count: usize,
    min_pixels: usize,
    min_chunk_pixels: usize,
    max_workers: usize,
) -> bool {
    let workers = decode_workers(max_workers);
    if workers <= 1 {
        return false;
    }
    let min_chunk_total = min_chunk_pixels.saturating_mul(workers);
    pixel_count >= min_pixels.max(min_chunk_total)
}

#[inline(always)]
pub(crate) fn parallel_chunk_pixels(
    pixel_count: usize,
    min_chunk_pixels: usize,
    max_workers: usize,
) -> Option<usize> {
    let alignment = PARALLEL_CHUNK_ALIGNMENT_PIXELS.max(1);
    let workers = decode_workers(max_workers);
    let mut chunk_pixels = pixel_count / workers;

    if chunk_pixels < min_chunk_pixels {
        return None;
    }

    chunk_pixels -= chunk_pixels % alignment;
    if chunk_pixels == 0 || pixel_count.div_ceil(chunk_pixels) < 2 {
        return None;
    }

    Some(chunk_pixels)
}

#[inline(always)]
pub(crate) fn ranges_overlap(src: *const u8, src_len: usize, dst: *mut u8, dst_len: usize) -> bool {
    let src_start = src as usize;
    let dst_start = dst as usize;

    let Some(src_end) = src_start.checked_add(src_len) else {
        return true;
    };
    let Some(dst_end) = dst_start.checked_add(dst_len) else {
        return true;
    };

    src_start < dst_end && dst_start < src_end
}

#[inline]
pub(crate) fn decode_workers(max_workers: usize) -> usize {
    static WORKERS: OnceLock<usize> = OnceLock::new();
    (*WORKERS.get_or_init(|| {
        std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
    }))
    .min(max_workers.max(1))
}

/// Runs `job` inside the shared decode thread pool, or inline when the
/// machine has no parallelism to offer. The pool is created once with
/// the first caller's worker bound.
#[inline]
pub(crate) fn install_decode_pool<F>(max_workers: usize, job: F)
where
    F: FnOnce() + Send,
{
    static POOL: OnceLock<Option<rayon::ThreadPool>> = OnceLock::new();
    if let Some(pool) = POOL
        .get_or_init(|| {
            let workers = decode_workers(max_workers);
            if workers <= 1 {
                return None;
            }
            rayon::ThreadPoolBuilder::new()
                .num_threads(workers)
                .build()
                .ok()
        })
        .as_ref()
    {
        pool.install(job);
    } else {
        job();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tiny_surfaces_never_parallelize() {
        assert!(!should_parallelize(1024, 262_144, 65_536, 8));
    }

    #[test]
    fn chunk_plan_requires_at_least_two_chunks() {
        // A surface barely above the chunk minimum still has to split
        // into two pieces to be worth scheduling.
        if decode_workers(8) > 1 {
            assert_eq!(parallel_chunk_pixels(1_000, 65_536, 8), None);
        }
    }

    #[test]
    fn overlap_detection_is_inclusive() {
        let buf = vec![0u8; 64];
        let ptr = buf.as_ptr();
        assert!(ranges_overlap(ptr, 64, ptr as *mut u8, 64));
        assert!(!ranges_overlap(ptr, 16, unsafe { ptr.add(16) } as *mut u8, 16));
    }
}
