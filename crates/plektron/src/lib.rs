#![forbid(unsafe_code)]

//! # Plektron
//!
//! Byte sources that feed a media demuxer from a URL, built on HTTP range
//! requests with bounded in-memory buffering.
//!
//! ## Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use plektron::prelude::*;
//!
//! let net = Arc::new(HttpClient::new(NetOptions::default())?);
//! let source = StreamingSource::new(SourceConfig::new(url), net, LiveRegistry::shared());
//! source.initialize().await?;
//! let head = source.read(0, 4096).await?;
//! ```

// ── Re-export sub-crates ────────────────────────────────────────────────

pub mod buffer {
    pub use plektron_buffer::*;
}

pub mod core {
    pub use plektron_core::*;
}

pub mod events {
    pub use plektron_events::*;
}

pub mod loader {
    pub use plektron_loader::*;
}

pub mod net {
    pub use plektron_net::*;
}

pub mod source {
    pub use plektron_source::*;
}

// ── Prelude ─────────────────────────────────────────────────────────────

pub mod prelude {
    pub use plektron_core::{LifetimeGuard, LiveRegistry, OwnerId, SharedGuard};
    pub use plektron_events::{EventBus, LoadingState, SourceEvent};
    pub use plektron_loader::{LoaderOptions, SharedNet};
    pub use plektron_net::{CorsMode, HttpClient, Net, NetError, NetExt, NetOptions};
    pub use plektron_source::{
        InitError, PrefetchConfig, PrefetchSource, Preload, ReadError, SourceConfig,
        StreamingSource,
    };
}
