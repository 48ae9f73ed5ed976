//! Randomized invariant checks against simple reference models.

use plektron_buffer::{ByteRangeCache, IntervalCache};
use plektron_test_utils::{Xorshift64, pattern};
use rstest::*;

/// Reference model: the whole stream plus `[lo, hi)` retained and cursor `c`.
struct WindowModel {
    stream: Vec<u8>,
    lo: usize,
    c: usize,
    backward_capacity: usize,
}

impl WindowModel {
    fn hi(&self) -> usize {
        self.stream.len()
    }

    fn advanced(&mut self, n: usize) {
        self.c += n;
        self.lo = self.lo.max(self.c.saturating_sub(self.backward_capacity));
    }
}

#[rstest]
#[case(1)]
#[case(42)]
#[case(0xDEAD_BEEF)]
fn byte_range_cache_matches_model(#[case] seed: u64) {
    let mut rng = Xorshift64::new(seed);
    let mut cache = ByteRangeCache::new(64, 128);
    let mut model = WindowModel {
        stream: Vec::new(),
        lo: 0,
        c: 0,
        backward_capacity: 64,
    };

    for _ in 0..2_000 {
        match rng.range_u64(0, 5) {
            0 => {
                let len = rng.range_usize(0, 48);
                let chunk = rng.bytes(len);
                model.stream.extend_from_slice(&chunk);
                let ok = cache.append_slice(&chunk);
                assert_eq!(ok, model.hi() - model.c < cache.forward_capacity());
            }
            1 => {
                let mut dst = vec![0u8; rng.range_usize(0, 64)];
                let n = cache.read(&mut dst);
                assert_eq!(n, dst.len().min(model.hi() - model.c));
                assert_eq!(&dst[..n], &model.stream[model.c..model.c + n]);
                model.advanced(n);
            }
            2 => {
                let offset = rng.signed(80);
                let ok = cache.seek(offset);
                let target = model.c as i64 + offset;
                let expected = target >= model.lo as i64 && target <= model.hi() as i64;
                assert_eq!(ok, expected, "seek {offset} from {}", model.c);
                if ok {
                    if offset >= 0 {
                        model.advanced(offset as usize);
                    } else {
                        model.c = target as usize;
                    }
                }
            }
            3 => {
                let skip = rng.range_usize(0, 32);
                let mut dst = vec![0u8; rng.range_usize(1, 32)];
                let n = cache.peek(&mut dst, skip);
                let start = (model.c + skip).min(model.hi());
                let expected = dst.len().min(model.hi() - start);
                assert_eq!(n, expected);
                assert_eq!(&dst[..n], &model.stream[start..start + n]);
            }
            _ => {
                // Capacity changes apply lazily on the next move.
                let capacity = rng.range_usize(8, 96);
                cache.set_backward_capacity(capacity);
                model.backward_capacity = capacity;
                cache.set_forward_capacity(rng.range_usize(16, 256));
                continue;
            }
        }

        assert_eq!(cache.forward_bytes(), model.hi() - model.c);
        assert_eq!(cache.backward_bytes(), model.c - model.lo);
    }
}

#[test]
fn example_window_scenario() {
    let mut cache = ByteRangeCache::new(4, 10);
    cache.append_slice(&(0u8..10).collect::<Vec<_>>());

    let mut dst = [0u8; 6];
    assert_eq!(cache.read(&mut dst), 6);
    assert_eq!(dst, [0, 1, 2, 3, 4, 5]);
    assert_eq!(cache.backward_bytes(), 4);

    assert!(!cache.seek(-5));
    assert_eq!(cache.forward_bytes(), 4);
    assert!(cache.seek(-4));
    let mut retained = [0u8; 4];
    assert_eq!(cache.peek(&mut retained, 0), 4);
    assert_eq!(retained, [2, 3, 4, 5]);
}

fn assert_packets_well_formed(cache: &IntervalCache) {
    let packets = cache.packets();
    for p in packets {
        assert!(!p.is_empty());
        assert!(p.len() <= cache.packet_max());
    }
    for pair in packets.windows(2) {
        assert!(pair[0].end() <= pair[1].start(), "packets overlap");
        if pair[0].end() == pair[1].start() {
            assert!(
                pair[0].len() + pair[1].len() > cache.packet_max(),
                "touching packets fit in one"
            );
        }
    }
}

#[rstest]
#[case(3)]
#[case(77)]
#[case(0x1234_5678)]
fn interval_cache_matches_model(#[case] seed: u64) {
    const SPACE: usize = 4096;
    let source = pattern(SPACE);
    let mut rng = Xorshift64::new(seed);
    let mut cache = IntervalCache::with_limits(256, usize::MAX);
    let mut covered = vec![false; SPACE];

    for _ in 0..500 {
        let pos = rng.range_usize(0, SPACE - 1);
        let len = rng.range_usize(1, (SPACE - pos).min(400) + 1);
        cache.append(pos as u64, &source[pos..pos + len]);
        covered[pos..pos + len].fill(true);
        assert_packets_well_formed(&cache);

        let q = rng.range_usize(0, SPACE - 1);
        let q_len = rng.range_usize(1, (SPACE - q).min(600) + 1);
        let mut dst = vec![0u8; q_len];
        let expected = covered[q..q + q_len].iter().all(|&c| c);
        assert_eq!(cache.read(q as u64, &mut dst), expected);
        if expected {
            assert_eq!(dst, &source[q..q + q_len]);
        }
    }
    assert_eq!(cache.len(), covered.iter().filter(|&&c| c).count());
}

#[rstest]
#[case::single(vec![(100, 50)])]
#[case::overlapping(vec![(0, 300), (200, 300), (50, 10)])]
#[case::capped_run(vec![(0, 1000), (1000, 5)])]
fn interval_append_is_idempotent(#[case] writes: Vec<(u64, usize)>) {
    let source = pattern(2048);
    let mut once = IntervalCache::with_limits(256, usize::MAX);
    let mut twice = IntervalCache::with_limits(256, usize::MAX);
    for &(pos, len) in &writes {
        let bytes = &source[pos as usize..pos as usize + len];
        once.append(pos, bytes);
        twice.append(pos, bytes);
        twice.append(pos, bytes);
    }
    assert_eq!(once.packets(), twice.packets());
}

#[test]
fn gap_between_covered_endpoints_fails_read() {
    let mut cache = IntervalCache::new();
    cache.append(0, &[1; 100]);
    cache.append(101, &[1; 100]);
    assert!(cache.contains(0, 100));
    assert!(cache.contains(101, 100));

    let mut dst = [0u8; 150];
    assert!(!cache.read(25, &mut dst));
    assert!(!cache.contains(100, 1));
}
