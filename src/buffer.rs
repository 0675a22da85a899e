use half::f16;

use crate::error::{ReadbackError, ReadbackResult};

/// Per-call profiling counters, returned alongside the pixel data.
///
/// The reference design kept these as ambient globals on the device
/// context; here every read operation starts from zero and reports
/// exactly what it did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReadbackStats {
    /// GPU copy commands issued into staging resources.
    pub staging_copies: u32,
    /// MSAA resolve passes issued (hardware or shader).
    pub resolves: u32,
    /// Destination clears issued by resolve operations.
    pub clears: u32,
    /// Blocking fence/flush waits performed.
    pub fence_waits: u32,
    /// Reads satisfied by mapping the source directly (no copy).
    pub direct_maps: u32,
}

impl ReadbackStats {
    pub fn merge(&mut self, other: &ReadbackStats) {
        self.staging_copies += other.staging_copies;
        self.resolves += other.resolves;
        self.clears += other.clears;
        self.fence_waits += other.fence_waits;
        self.direct_maps += other.direct_maps;
    }
}

/// Decoded RGBA8 pixels, row-major, top-to-bottom. 4 bytes per pixel
/// in R, G, B, A channel order.
pub struct ColorBuffer {
    data: Vec<u8>,
    width: u32,
    height: u32,
    depth: u32,
    /// What the producing read operation did on the GPU.
    pub stats: ReadbackStats,
}

impl ColorBuffer {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
            depth: 1,
            stats: ReadbackStats::default(),
        }
    }

    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> ReadbackResult<Self> {
        let expected = component_len(width, height, 1)?;
        if data.len() != expected {
            return Err(ReadbackError::InvalidConfig(format!(
                "RGBA pixel data length mismatch: got {}, expected {} for {}x{}",
                data.len(),
                expected,
                width,
                height
            )));
        }
        Ok(Self {
            data,
            width,
            height,
            depth: 1,
            stats: ReadbackStats::default(),
        })
    }

    pub(crate) fn with_dimensions(width: u32, height: u32, depth: u32) -> ReadbackResult<Self> {
        let len = component_len(width, height, depth)?;
        Ok(Self {
            data: vec![0u8; len],
            width,
            height,
            depth,
            stats: ReadbackStats::default(),
        })
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

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub(crate) fn as_mut_bytes(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// The RGBA bytes of pixel (x, y) in slice z.
    pub fn pixel(&self, x: u32, y: u32, z: u32) -> [u8; 4] {
        let idx = (((z as usize * self.height as usize) + y as usize) * self.width as usize
            + x as usize)
            * 4;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }
}

impl std::fmt::Debug for ColorBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("depth", &self.depth)
            .field("data_len", &self.data.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Decoded RGBA16F pixels, row-major, top-to-bottom. Four `f16`
/// components per pixel in R, G, B, A order, raw float values with no
/// range compression applied.
pub struct FloatColorBuffer {
    data: Vec<f16>,
    width: u32,
    height: u32,
    depth: u32,
    pub stats: ReadbackStats,
}

impl FloatColorBuffer {
    pub fn empty() -> Self {
        Self {
            data: Vec::new(),
            width: 0,
            height: 0,
            depth: 1,
            stats: ReadbackStats::default(),
        }
    }

    pub(crate) fn with_dimensions(width: u32, height: u32, depth: u32) -> ReadbackResult<Self> {
        let len = component_len(width, height, depth)?;
        Ok(Self {
            data: vec![f16::ZERO; len],
            width,
            height,
            depth,
            stats: ReadbackStats::default(),
        })
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

    /// All components, 4 per pixel.
    pub fn as_components(&self) -> &[f16] {
        &self.data
    }

    pub(crate) fn as_mut_components(&mut self) -> &mut [f16] {
        &mut self.data
    }

    pub fn pixel(&self, x: u32, y: u32, z: u32) -> [f16; 4] {
        let idx = (((z as usize * self.height as usize) + y as usize) * self.width as usize
            + x as usize)
            * 4;
        [
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ]
    }
}

impl std::fmt::Debug for FloatColorBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FloatColorBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("depth", &self.depth)
            .field("data_len", &self.data.len())
            .field("stats", &self.stats)
            .finish()
    }
}

/// Checked component count (4 per pixel) for a w × h × d buffer.
fn component_len(width: u32, height: u32, depth: u32) -> ReadbackResult<usize> {
    let w = usize::try_from(width).map_err(|_| ReadbackError::BufferOverflow)?;
    let h = usize::try_from(height).map_err(|_| ReadbackError::BufferOverflow)?;
    let d = usize::try_from(depth).map_err(|_| ReadbackError::BufferOverflow)?;
    w.checked_mul(h)
        .and_then(|px| px.checked_mul(d))
        .and_then(|px| px.checked_mul(4))
        .ok_or(ReadbackError::BufferOverflow)
}
