//! Deterministic PRNG for reproducible randomized invariant checks.

/// xorshift64 generator. A fixed seed gives identical sequences on every run.
pub struct Xorshift64(u64);

impl Xorshift64 {
    /// Zero is a fixed point of xorshift, so it is replaced by a constant.
    #[must_use]
    pub fn new(seed: u64) -> Self {
        Self(if seed == 0 { 0x9E37_79B9_7F4A_7C15 } else { seed })
    }

    pub fn next_u64(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }

    /// Returns `u64` in `[min, max)`; `min` when the range is empty.
    pub fn range_u64(&mut self, min: u64, max: u64) -> u64 {
        if max <= min {
            return min;
        }
        min + self.next_u64() % (max - min)
    }

    /// Returns `usize` in `[min, max)`; `min` when the range is empty.
    pub fn range_usize(&mut self, min: usize, max: usize) -> usize {
        self.range_u64(min as u64, max as u64) as usize
    }

    /// Returns `i64` in `[-bound, bound]`.
    pub fn signed(&mut self, bound: u64) -> i64 {
        self.range_u64(0, 2 * bound + 1) as i64 - bound as i64
    }

    pub fn chance(&mut self, percent: u64) -> bool {
        self.range_u64(0, 100) < percent
    }

    /// `len` pseudo-random bytes.
    pub fn bytes(&mut self, len: usize) -> Vec<u8> {
        (0..len).map(|_| self.next_u64() as u8).collect()
    }
}
