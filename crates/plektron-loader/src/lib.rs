#![forbid(unsafe_code)]

//! `plektron-loader`
//!
//! [`RangeLoader`] runs one HTTP byte-range transfer into a sliding
//! [`ByteRangeCache`](plektron_buffer::ByteRangeCache) window:
//! - validates `206`/`200` responses and `Content-Range`
//! - pauses the transfer according to a [`DeferStrategy`]
//! - sizes its window from bitrate and playback rate ([`buffer_window`])
//! - answers reads from the window, waits for nearby bytes, or reports a
//!   cache miss so the owner can reissue

mod cacheability;
mod content_range;
mod defer;
mod error;
mod loader;
mod options;
mod transfer;
mod window;

pub use cacheability::{UncacheableReason, UncacheableReasons, uncacheable_reasons};
pub use content_range::{ContentRange, parse_content_range};
pub use defer::DeferStrategy;
pub use error::{LoadStatus, LoaderError, LoaderResult};
pub use loader::{LoaderNotice, LoaderParams, RangeLoader, ReadOutcome, ReadResult};
pub use options::LoaderOptions;
pub use plektron_events::LoadingState;
pub use transfer::{RangeFetch, ResponseHead, SharedNet, TransferEvent};
pub use window::{BufferWindow, buffer_window};
