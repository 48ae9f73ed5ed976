#![forbid(unsafe_code)]

use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
};

use crate::guard::SharedGuard;

static NEXT_OWNER_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identity of an object that schedules asynchronous continuations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OwnerId(u64);

impl OwnerId {
    /// Allocate a fresh identity. Identities are never reused within a process.
    #[must_use]
    pub fn next() -> Self {
        Self(NEXT_OWNER_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn as_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OwnerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "owner#{}", self.0)
    }
}

/// RAII registration of an owner with a guard.
///
/// Registers on construction, unregisters on drop. A facade stores this next
/// to its command channel so that dropping the facade makes every in-flight
/// continuation a no-op.
pub struct Registration {
    id: OwnerId,
    guard: SharedGuard,
}

impl Registration {
    #[must_use]
    pub fn new(guard: SharedGuard) -> Self {
        let id = OwnerId::next();
        guard.register(id);
        Self { id, guard }
    }

    #[must_use]
    pub fn id(&self) -> OwnerId {
        self.id
    }

    #[must_use]
    pub fn guard(&self) -> &SharedGuard {
        &self.guard
    }
}

impl fmt::Debug for Registration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registration").field("id", &self.id).finish()
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.guard.unregister(self.id);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{LifetimeGuard, LiveRegistry};

    #[test]
    fn ids_are_unique() {
        let a = OwnerId::next();
        let b = OwnerId::next();
        assert_ne!(a, b);
        assert!(b.as_raw() > a.as_raw());
    }

    #[test]
    fn registration_is_live_until_dropped() {
        let registry = Arc::new(LiveRegistry::new());
        let registration = Registration::new(registry.clone());
        let id = registration.id();

        assert!(registry.is_live(id));
        drop(registration);
        assert!(!registry.is_live(id));
    }

    #[test]
    fn display_includes_raw_value() {
        assert_eq!(OwnerId::from_raw(7).to_string(), "owner#7");
    }
}
