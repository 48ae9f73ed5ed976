#![forbid(unsafe_code)]

//! Host notifications for plektron sources.
//!
//! Sources publish [`SourceEvent`]s on a shared [`EventBus`]; the host
//! (player, UI, tests) subscribes to learn total size, buffered extents and
//! network activity.

mod bus;
mod event;

pub use bus::EventBus;
pub use event::{LoadingState, SourceEvent};
