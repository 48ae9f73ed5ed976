//! Packet cache for writes at arbitrary offsets.

use tracing::debug;

/// Largest packet the cache builds before starting a new one.
pub const DEFAULT_PACKET_MAX: usize = 3 * 1024 * 1024;

/// Packet count above which [`IntervalCache::evict`] drops packets.
pub const DEFAULT_EVICT_THRESHOLD: usize = 3;

/// A contiguous run of bytes at an absolute offset.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Packet {
    start: u64,
    data: Vec<u8>,
}

impl Packet {
    fn new(start: u64, data: &[u8]) -> Self {
        Self {
            start,
            data: data.to_vec(),
        }
    }

    pub fn start(&self) -> u64 {
        self.start
    }

    /// Exclusive end offset.
    pub fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// Sorted arena of non-overlapping packets.
///
/// Packets never overlap and are never empty. Two packets touch only when
/// their combined length exceeds the packet maximum, so every run of
/// touching packets is as coalesced as the cap allows.
#[derive(Debug)]
pub struct IntervalCache {
    packets: Vec<Packet>,
    packet_max: usize,
    evict_threshold: usize,
}

impl IntervalCache {
    #[must_use]
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_PACKET_MAX, DEFAULT_EVICT_THRESHOLD)
    }

    /// `packet_max` is clamped to at least one byte.
    #[must_use]
    pub fn with_limits(packet_max: usize, evict_threshold: usize) -> Self {
        Self {
            packets: Vec::new(),
            packet_max: packet_max.max(1),
            evict_threshold,
        }
    }

    /// Store `data` at absolute offset `pos`.
    ///
    /// Bytes already covered are left as they are. New bytes extend a
    /// touching packet while it has room, are prepended to the following
    /// packet when the result fits, and otherwise become a new packet.
    pub fn append(&mut self, pos: u64, data: &[u8]) {
        let mut pos = pos;
        let mut data = data;

        while !data.is_empty() {
            // First packet ending after `pos`.
            let i = self.packets.partition_point(|p| p.end() <= pos);

            if let Some(p) = self.packets.get(i)
                && p.start <= pos
            {
                let covered = usize::try_from(p.end() - pos)
                    .unwrap_or(usize::MAX)
                    .min(data.len());
                pos += covered as u64;
                data = &data[covered..];
                continue;
            }

            let gap = self.packets.get(i).map_or(u64::MAX, |next| next.start - pos);
            let take = usize::try_from(gap).unwrap_or(usize::MAX).min(data.len());

            if i > 0 {
                let left = &mut self.packets[i - 1];
                if left.end() == pos && left.len() < self.packet_max {
                    let n = take.min(self.packet_max - left.len());
                    left.data.extend_from_slice(&data[..n]);
                    pos += n as u64;
                    data = &data[n..];
                    self.coalesce(i - 1);
                    continue;
                }
            }

            if let Some(next) = self.packets.get_mut(i)
                && take as u64 == gap
                && take + next.len() <= self.packet_max
            {
                let mut merged = Vec::with_capacity(take + next.len());
                merged.extend_from_slice(&data[..take]);
                merged.extend_from_slice(&next.data);
                *next = Packet {
                    start: pos,
                    data: merged,
                };
                pos += take as u64;
                data = &data[take..];
                continue;
            }

            let n = take.min(self.packet_max);
            self.packets.insert(i, Packet::new(pos, &data[..n]));
            pos += n as u64;
            data = &data[n..];
        }
    }

    /// Copy `[pos, pos + dst.len())` into `dst`.
    ///
    /// Returns `false` without touching `dst` when any byte of the range is
    /// missing.
    pub fn read(&self, pos: u64, dst: &mut [u8]) -> bool {
        if !self.contains(pos, dst.len() as u64) {
            return false;
        }

        let end = pos + dst.len() as u64;
        let mut cur = pos;
        let mut i = self.packets.partition_point(|p| p.end() <= pos);
        while cur < end {
            let p = &self.packets[i];
            let from = (cur - p.start) as usize;
            let n = (p.end().min(end) - cur) as usize;
            let at = (cur - pos) as usize;
            dst[at..at + n].copy_from_slice(&p.data[from..from + n]);
            cur += n as u64;
            i += 1;
        }
        true
    }

    /// Whether every byte of `[pos, pos + len)` is cached.
    pub fn contains(&self, pos: u64, len: u64) -> bool {
        let end = pos.saturating_add(len);
        let mut cur = pos;
        let mut i = self.packets.partition_point(|p| p.end() <= pos);
        while cur < end {
            match self.packets.get(i) {
                Some(p) if p.start <= cur => {
                    cur = p.end();
                    i += 1;
                }
                _ => return false,
            }
        }
        true
    }

    /// When more than the eviction threshold of packets exist, keep only the
    /// packet containing `pos`.
    pub fn evict(&mut self, pos: u64) {
        if self.packets.len() <= self.evict_threshold {
            return;
        }
        let before = self.packets.len();
        self.packets.retain(|p| p.start <= pos && pos < p.end());
        debug!(pos, before, after = self.packets.len(), "interval cache evicted");
    }

    pub fn clear(&mut self) {
        self.packets.clear();
    }

    pub fn packets(&self) -> &[Packet] {
        &self.packets
    }

    pub fn packet_max(&self) -> usize {
        self.packet_max
    }

    /// Total cached bytes.
    pub fn len(&self) -> usize {
        self.packets.iter().map(Packet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Merge `packets[k + 1]` into `packets[k]` when they touch and fit.
    fn coalesce(&mut self, k: usize) {
        let fits = match (self.packets.get(k), self.packets.get(k + 1)) {
            (Some(left), Some(right)) => {
                left.end() == right.start && left.len() + right.len() <= self.packet_max
            }
            _ => false,
        };
        if fits {
            let right = self.packets.remove(k + 1);
            self.packets[k].data.extend_from_slice(&right.data);
        }
    }
}

impl Default for IntervalCache {
    fn default() -> Self {
        Self::new()
    }
}
