#![forbid(unsafe_code)]

//! `plektron-core`
//!
//! Owner identities and the liveness guard shared by every plektron facade.
//!
//! Asynchronous continuations (transfer events, retry timers) may outlive the
//! facade that scheduled them. Each facade registers an [`OwnerId`] with a
//! [`LifetimeGuard`] at construction and unregisters it on teardown; every
//! continuation re-checks [`LifetimeGuard::is_live`] before touching its owner.
//!
//! The guard is injected, never global: tests substitute a deterministic fake.

mod guard;
mod owner;

pub use guard::{Guarded, LifetimeGuard, LiveRegistry, SharedGuard};
#[cfg(any(test, feature = "test-utils"))]
pub use guard::LifetimeGuardMock;
pub use owner::{OwnerId, Registration};
