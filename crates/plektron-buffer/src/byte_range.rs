//! Sliding-window byte buffer.

use std::collections::VecDeque;

use bytes::Bytes;
use tracing::trace;

/// Bidirectional sliding window over a sequential byte stream.
///
/// Appended chunks are kept in order. A cursor splits the buffered bytes into
/// a *backward* region (already read) and a *forward* region (not yet read).
///
/// - `backward_bytes <= backward_capacity` holds after every mutating call;
///   the oldest bytes are evicted to restore it.
/// - `forward_bytes` may exceed `forward_capacity`. [`append`](Self::append)
///   only advises the caller to stop.
/// - Changing a capacity never evicts by itself; it takes effect on the next
///   read or seek.
#[derive(Debug)]
pub struct ByteRangeCache {
    chunks: VecDeque<Bytes>,
    /// Index of the chunk holding the cursor; `chunks.len()` when at the end.
    current_chunk: usize,
    /// Cursor offset inside `chunks[current_chunk]`.
    chunk_offset: usize,
    forward_bytes: usize,
    backward_bytes: usize,
    forward_capacity: usize,
    backward_capacity: usize,
}

impl ByteRangeCache {
    #[must_use]
    pub fn new(backward_capacity: usize, forward_capacity: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            current_chunk: 0,
            chunk_offset: 0,
            forward_bytes: 0,
            backward_bytes: 0,
            forward_capacity,
            backward_capacity,
        }
    }

    /// Append `data` to the forward region.
    ///
    /// Returns `false` once the forward region holds at least
    /// `forward_capacity` bytes; the data is stored either way.
    pub fn append(&mut self, data: Bytes) -> bool {
        if !data.is_empty() {
            self.forward_bytes += data.len();
            self.chunks.push_back(data);
        }
        self.forward_bytes < self.forward_capacity
    }

    /// Copying variant of [`append`](Self::append).
    pub fn append_slice(&mut self, data: &[u8]) -> bool {
        self.append(Bytes::copy_from_slice(data))
    }

    /// Copy up to `dst.len()` forward bytes into `dst` and advance the cursor.
    pub fn read(&mut self, dst: &mut [u8]) -> usize {
        let copied = self.copy_forward(0, dst);
        self.advance(copied);
        copied
    }

    /// Copy forward bytes starting `forward_offset` past the cursor, without
    /// moving it.
    pub fn peek(&self, dst: &mut [u8], forward_offset: usize) -> usize {
        self.copy_forward(forward_offset, dst)
    }

    /// Move the cursor by `offset` bytes in either direction.
    ///
    /// Returns `false` and leaves the cursor untouched when fewer than
    /// `|offset|` bytes are buffered in that direction.
    pub fn seek(&mut self, offset: i64) -> bool {
        let distance = offset.unsigned_abs();
        if offset >= 0 {
            let Ok(distance) = usize::try_from(distance) else {
                return false;
            };
            if distance > self.forward_bytes {
                return false;
            }
            self.advance(distance);
            true
        } else {
            let Ok(distance) = usize::try_from(distance) else {
                return false;
            };
            if distance > self.backward_bytes {
                return false;
            }
            self.rewind(distance);
            true
        }
    }

    /// Drop every buffered byte. Capacities are kept.
    pub fn clear(&mut self) {
        self.chunks.clear();
        self.current_chunk = 0;
        self.chunk_offset = 0;
        self.forward_bytes = 0;
        self.backward_bytes = 0;
    }

    pub fn forward_bytes(&self) -> usize {
        self.forward_bytes
    }

    pub fn backward_bytes(&self) -> usize {
        self.backward_bytes
    }

    pub fn forward_capacity(&self) -> usize {
        self.forward_capacity
    }

    pub fn backward_capacity(&self) -> usize {
        self.backward_capacity
    }

    pub fn set_forward_capacity(&mut self, capacity: usize) {
        self.forward_capacity = capacity;
    }

    pub fn set_backward_capacity(&mut self, capacity: usize) {
        self.backward_capacity = capacity;
    }

    fn copy_forward(&self, skip: usize, dst: &mut [u8]) -> usize {
        if skip >= self.forward_bytes || dst.is_empty() {
            return 0;
        }

        let mut skip = skip;
        let mut offset = self.chunk_offset;
        let mut copied = 0;
        for chunk in self.chunks.iter().skip(self.current_chunk) {
            let available = &chunk[offset.min(chunk.len())..];
            offset = 0;
            if skip >= available.len() {
                skip -= available.len();
                continue;
            }
            let available = &available[skip..];
            skip = 0;

            let n = available.len().min(dst.len() - copied);
            dst[copied..copied + n].copy_from_slice(&available[..n]);
            copied += n;
            if copied == dst.len() {
                break;
            }
        }
        copied
    }

    /// Move the cursor forward; caller guarantees `n <= forward_bytes`.
    fn advance(&mut self, n: usize) {
        let mut remaining = n;
        while remaining > 0 {
            let Some(chunk) = self.chunks.get(self.current_chunk) else {
                break;
            };
            let step = (chunk.len() - self.chunk_offset).min(remaining);
            self.chunk_offset += step;
            remaining -= step;
            if self.chunk_offset == chunk.len() {
                self.current_chunk += 1;
                self.chunk_offset = 0;
            }
        }

        let moved = n - remaining;
        self.forward_bytes -= moved;
        self.backward_bytes += moved;
        self.evict_backward();
    }

    /// Move the cursor backward; caller guarantees `n <= backward_bytes`.
    fn rewind(&mut self, n: usize) {
        let mut remaining = n;
        while remaining > 0 {
            if self.chunk_offset >= remaining {
                self.chunk_offset -= remaining;
                remaining = 0;
            } else if self.current_chunk == 0 {
                break;
            } else {
                remaining -= self.chunk_offset;
                self.current_chunk -= 1;
                self.chunk_offset = self.chunks[self.current_chunk].len();
            }
        }

        let moved = n - remaining;
        self.backward_bytes -= moved;
        self.forward_bytes += moved;
    }

    /// Trim the oldest bytes until `backward_bytes <= backward_capacity`.
    fn evict_backward(&mut self) {
        while self.backward_bytes > self.backward_capacity {
            let excess = self.backward_bytes - self.backward_capacity;
            let Some(front) = self.chunks.front_mut() else {
                break;
            };
            let behind = if self.current_chunk == 0 {
                self.chunk_offset
            } else {
                front.len()
            };
            let cut = excess.min(behind);

            if cut == front.len() {
                self.chunks.pop_front();
                if self.current_chunk > 0 {
                    self.current_chunk -= 1;
                } else {
                    self.chunk_offset = 0;
                }
            } else {
                *front = front.slice(cut..);
                if self.current_chunk == 0 {
                    self.chunk_offset -= cut;
                }
            }
            self.backward_bytes -= cut;
        }
        trace!(
            backward = self.backward_bytes,
            forward = self.forward_bytes,
            chunks = self.chunks.len(),
            "byte window trimmed"
        );
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn filled(backward: usize, forward: usize, len: u8) -> ByteRangeCache {
        let mut cache = ByteRangeCache::new(backward, forward);
        cache.append_slice(&(0..len).collect::<Vec<u8>>());
        cache
    }

    #[test]
    fn read_evicts_backward_excess_byte_granular() {
        let mut cache = filled(4, 10, 10);
        let mut dst = [0u8; 6];
        assert_eq!(cache.read(&mut dst), 6);
        assert_eq!(dst, [0, 1, 2, 3, 4, 5]);
        assert_eq!(cache.backward_bytes(), 4);
        assert_eq!(cache.forward_bytes(), 4);

        assert!(!cache.seek(-5));
        assert_eq!(cache.backward_bytes(), 4);
        assert!(cache.seek(-4));

        let mut dst = [0u8; 4];
        assert_eq!(cache.read(&mut dst), 4);
        assert_eq!(dst, [2, 3, 4, 5]);
    }

    #[rstest]
    #[case::below(5, 3, true)]
    #[case::at_capacity(5, 5, false)]
    #[case::above(5, 8, false)]
    fn append_reports_capacity(#[case] capacity: usize, #[case] len: usize, #[case] ok: bool) {
        let mut cache = ByteRangeCache::new(0, capacity);
        assert_eq!(cache.append_slice(&vec![7; len]), ok);
        assert_eq!(cache.forward_bytes(), len);
    }

    #[test]
    fn peek_does_not_move_cursor() {
        let mut cache = ByteRangeCache::new(8, 8);
        cache.append_slice(&[0, 1, 2]);
        cache.append_slice(&[3, 4]);
        cache.append_slice(&[5, 6, 7]);

        let mut dst = [0u8; 4];
        assert_eq!(cache.peek(&mut dst, 2), 4);
        assert_eq!(dst, [2, 3, 4, 5]);
        assert_eq!(cache.forward_bytes(), 8);
        assert_eq!(cache.peek(&mut dst, 8), 0);
    }

    #[test]
    fn read_spans_chunks_and_stops_at_end() {
        let mut cache = ByteRangeCache::new(0, 16);
        cache.append_slice(&[1, 2]);
        cache.append_slice(&[3]);
        let mut dst = [0u8; 8];
        assert_eq!(cache.read(&mut dst), 3);
        assert_eq!(&dst[..3], &[1, 2, 3]);
        assert_eq!(cache.read(&mut dst), 0);
        assert_eq!(cache.backward_bytes(), 0);
    }

    #[test]
    fn shrinking_capacity_is_lazy() {
        let mut cache = filled(10, 10, 10);
        assert!(cache.seek(8));
        assert_eq!(cache.backward_bytes(), 8);

        cache.set_backward_capacity(2);
        assert_eq!(cache.backward_bytes(), 8);

        assert!(cache.seek(1));
        assert_eq!(cache.backward_bytes(), 2);
        assert!(!cache.seek(-3));
    }

    #[test]
    fn seek_forward_past_end_fails() {
        let mut cache = filled(4, 4, 6);
        assert!(!cache.seek(7));
        assert_eq!(cache.forward_bytes(), 6);
        assert!(cache.seek(6));
        assert_eq!(cache.forward_bytes(), 0);
        assert!(cache.seek(0));
    }

    #[test]
    fn rewind_crosses_chunk_boundaries() {
        let mut cache = ByteRangeCache::new(16, 16);
        for chunk in [[0u8, 1, 2], [3, 4, 5], [6, 7, 8]] {
            cache.append_slice(&chunk);
        }
        assert!(cache.seek(8));
        assert!(cache.seek(-7));
        let mut dst = [0u8; 3];
        assert_eq!(cache.read(&mut dst), 3);
        assert_eq!(dst, [1, 2, 3]);
    }

    #[test]
    fn clear_resets_regions() {
        let mut cache = filled(4, 4, 6);
        assert!(cache.seek(3));
        cache.clear();
        assert_eq!(cache.forward_bytes(), 0);
        assert_eq!(cache.backward_bytes(), 0);
        assert_eq!(cache.forward_capacity(), 4);
        assert!(cache.append_slice(&[9]));
        let mut dst = [0u8; 1];
        assert_eq!(cache.read(&mut dst), 1);
        assert_eq!(dst, [9]);
    }
}
