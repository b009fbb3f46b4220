// HTFE - helpers module

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{HtfeError, Result};

// --- Constants ---

pub const LIMIT_SMALL: f32 = 0.000001;

pub const RAND_SUBSEED_OFFSET: u64 = 12345;

const PCG_MULTIPLIER: u64 = 6364136223846793005;
const PCG_INCREMENT: u64 = 1442695040888963407;
pub const RAND_MAX: u32 = 0x00ffffff;

// --- Type aliases ---

pub type FloatBuffer = Vec<f32>;

// --- Vector types ---

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash)]
pub struct Int2 {
    pub x: i32,
    pub y: i32,
}

impl Int2 {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Number of sites in a map of this size.
    pub fn area(self) -> usize {
        self.x.max(0) as usize * self.y.max(0) as usize
    }

    /// Like [`area`](Int2::area) but `None` when the product overflows.
    pub fn checked_area(self) -> Option<usize> {
        (self.x.max(0) as usize).checked_mul(self.y.max(0) as usize)
    }
}

#[derive(Clone, Copy, Default, Debug, PartialEq, Eq, Hash)]
pub struct Int3 {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl Int3 {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// Two packed floats. Used both as a ratio between map sizes and as the
/// element type of two-channel maps (state + duty cycle, weight + delta).
#[derive(Clone, Copy, Default, Debug, PartialEq)]
pub struct Float2 {
    pub x: f32,
    pub y: f32,
}

impl Float2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

// --- Math helpers ---

pub fn sigmoidf(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Logistic derivative expressed through the output, clamped from below so
/// saturated units keep learning.
pub fn sigmoid_derivf(y: f32, min_derivative: f32) -> f32 {
    (y * (1.0 - y)).max(min_derivative)
}

/// Scale that maps positions in a map of size `from` onto a map of size `to`.
pub fn size_ratio(from: Int2, to: Int2) -> Float2 {
    Float2::new(to.x as f32 / from.x as f32, to.y as f32 / from.y as f32)
}

// --- Bounds checking ---

pub fn in_bounds0(pos: Int2, upper_bound: Int2) -> bool {
    pos.x >= 0 && pos.x < upper_bound.x && pos.y >= 0 && pos.y < upper_bound.y
}

// --- Projections ---

pub fn project(pos: Int2, to_scalars: Float2) -> Int2 {
    Int2::new(
        ((pos.x as f32 + 0.5) * to_scalars.x) as i32,
        ((pos.y as f32 + 0.5) * to_scalars.y) as i32,
    )
}

// --- Addressing (row-major, matching image layout) ---

pub fn address2(pos: Int2, dims: Int2) -> usize {
    (pos.x + pos.y * dims.x) as usize
}

pub fn address3(pos: Int3, dims: Int3) -> usize {
    (pos.z + dims.z * (pos.x + dims.x * pos.y)) as usize
}

pub fn site_position(index: usize, dims: Int2) -> Int2 {
    Int2::new((index % dims.x as usize) as i32, (index / dims.x as usize) as i32)
}

// --- PCG32 RNG ---

pub fn rand_get_state(seed: u64) -> u64 {
    let state = seed.wrapping_add(PCG_INCREMENT);
    state.wrapping_mul(PCG_MULTIPLIER).wrapping_add(PCG_INCREMENT)
}

#[inline]
fn rotr32(x: u32, r: u32) -> u32 {
    x >> r | x << (r.wrapping_neg() & 31)
}

pub fn rand_step(state: &mut u64) -> u32 {
    let x = *state;
    let count = (x >> 59) as u32;
    *state = x.wrapping_mul(PCG_MULTIPLIER).wrapping_add(PCG_INCREMENT);
    let x = x ^ (x >> 18);
    rotr32((x >> 27) as u32, count)
}

pub fn randf_step(state: &mut u64) -> f32 {
    (rand_step(state) % RAND_MAX) as f32 / RAND_MAX as f32
}

pub fn randf_range_step(low: f32, high: f32, state: &mut u64) -> f32 {
    low + (high - low) * randf_step(state)
}

// --- Index pairs ---

/// Borrow `data[write]` mutably and `data[read]` immutably at the same time.
///
/// # Panics
/// Panics if the two indices are equal.
pub fn split_pair_mut<T>(data: &mut [T], write: usize, read: usize) -> (&mut T, &T) {
    assert_ne!(write, read, "cannot split a slot against itself");
    if write < read {
        let (lo, hi) = data.split_at_mut(read);
        (&mut lo[write], &hi[0])
    } else {
        let (lo, hi) = data.split_at_mut(write);
        (&mut hi[0], &lo[read])
    }
}

// --- Serialization traits ---

pub trait StreamWriter {
    fn write_bytes(&mut self, data: &[u8]);

    fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_f32(&mut self, v: f32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_f32_slice(&mut self, slice: &[f32]) {
        for &v in slice {
            self.write_f32(v);
        }
    }

    fn write_float2_slice(&mut self, slice: &[Float2]) {
        for v in slice {
            self.write_f32(v.x);
            self.write_f32(v.y);
        }
    }

    fn write_int2(&mut self, v: Int2) {
        self.write_i32(v.x);
        self.write_i32(v.y);
    }
}

pub trait StreamReader {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    fn read_i32(&mut self) -> Result<i32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let mut buf = [0u8; 8];
        self.read_bytes(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    fn read_f32(&mut self) -> Result<f32> {
        let mut buf = [0u8; 4];
        self.read_bytes(&mut buf)?;
        Ok(f32::from_le_bytes(buf))
    }

    fn read_f32_slice(&mut self, slice: &mut [f32]) -> Result<()> {
        for v in slice.iter_mut() {
            *v = self.read_f32()?;
        }
        Ok(())
    }

    fn read_float2_slice(&mut self, slice: &mut [Float2]) -> Result<()> {
        for v in slice.iter_mut() {
            v.x = self.read_f32()?;
            v.y = self.read_f32()?;
        }
        Ok(())
    }

    fn read_int2(&mut self) -> Result<Int2> {
        let x = self.read_i32()?;
        let y = self.read_i32()?;
        Ok(Int2::new(x, y))
    }
}

// --- Vec-based stream implementations ---

pub struct VecWriter {
    pub data: Vec<u8>,
}

impl VecWriter {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }
}

impl Default for VecWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamWriter for VecWriter {
    fn write_bytes(&mut self, data: &[u8]) {
        self.data.extend_from_slice(data);
    }
}

pub struct SliceReader<'a> {
    pub data: &'a [u8],
    pub pos: usize,
}

impl<'a> SliceReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }
}

impl<'a> StreamReader for SliceReader<'a> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        let end = self.pos + buf.len();
        if end > self.data.len() {
            return Err(HtfeError::Serialization(format!(
                "unexpected end of stream: needed {} bytes at offset {}, {} available",
                buf.len(),
                self.pos,
                self.data.len() - self.pos
            )));
        }
        buf.copy_from_slice(&self.data[self.pos..end]);
        self.pos = end;
        Ok(())
    }
}

// --- Thread pool size ---

static NUM_THREADS: AtomicUsize = AtomicUsize::new(0);

pub fn set_num_threads(n: usize) {
    NUM_THREADS.store(n, Ordering::Relaxed);
    if rayon::ThreadPoolBuilder::new()
        .num_threads(n)
        .build_global()
        .is_err()
    {
        log::warn!("global thread pool already initialised; keeping its size");
    }
}

pub fn get_num_threads() -> usize {
    NUM_THREADS.load(Ordering::Relaxed)
}
