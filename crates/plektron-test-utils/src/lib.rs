#![forbid(unsafe_code)]
#![expect(
    clippy::unwrap_used,
    reason = "test utility crate: unwraps are acceptable"
)]
#![expect(
    clippy::expect_used,
    reason = "test utility crate: expects are acceptable"
)]

//! Shared test utilities for the plektron workspace.

pub mod http_server;
pub mod rng;
pub mod scripted_net;

pub use http_server::{MediaRoute, TestHttpServer};
pub use rng::*;
pub use scripted_net::{BodySender, ScriptedBody, ScriptedNet, ScriptedResponse};

/// Deterministic test payload: byte `i` is `i % 251`.
///
/// 251 is prime, so the pattern does not line up with power-of-two chunk
/// sizes and offset mistakes show up as wrong bytes.
#[must_use]
pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

/// Install a `tracing` subscriber for test output (idempotent).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
