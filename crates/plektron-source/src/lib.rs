#![forbid(unsafe_code)]

//! `plektron-source`
//!
//! Byte sources a media demuxer reads from:
//! - [`StreamingSource`]: one sliding-window range loader, restarted at the
//!   read position when a read cannot be served
//! - [`PrefetchSource`]: over-fetching transfers into a packet cache
//!
//! Both run an actor task per instance and publish
//! [`SourceEvent`](plektron_events::SourceEvent)s on their bus.

mod config;
mod error;
mod prefetch;
mod shared;
mod streaming;

pub use config::{PrefetchConfig, Preload, SourceConfig};
pub use error::{InitError, ReadError, SourceResult};
pub use prefetch::PrefetchSource;
pub use streaming::StreamingSource;
