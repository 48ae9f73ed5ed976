#![forbid(unsafe_code)]

//! `plektron-buffer`
//!
//! In-memory byte storage for plektron sources:
//! - [`ByteRangeCache`]: a bidirectional sliding window over a sequential
//!   byte stream, with a read cursor and advisory forward/backward capacities.
//! - [`IntervalCache`]: non-overlapping packets built from writes at
//!   arbitrary offsets, merged on overlap and coalesced on adjacency.
//!
//! Neither type knows about networking or threads; both are owned by exactly
//! one source and mutated from its control task. Boundary violations are
//! reported as `false` or zero-length results, never as errors.

mod byte_range;
mod interval;

pub use byte_range::ByteRangeCache;
pub use interval::{DEFAULT_EVICT_THRESHOLD, DEFAULT_PACKET_MAX, IntervalCache, Packet};
