#![forbid(unsafe_code)]

use std::{collections::HashSet, sync::Arc};

use parking_lot::Mutex;
use tracing::trace;

use crate::owner::OwnerId;

/// Registry of live owner identities.
///
/// Every continuation posted across a task boundary must call
/// [`is_live`](Self::is_live) for its owner before doing anything else.
#[cfg_attr(
    any(test, feature = "test-utils"),
    unimock::unimock(api = LifetimeGuardMock)
)]
pub trait LifetimeGuard: Send + Sync {
    /// Mark `id` as live.
    fn register(&self, id: OwnerId);

    /// Mark `id` as destroyed. Unregistering an unknown id is a no-op.
    fn unregister(&self, id: OwnerId);

    /// Whether `id` is currently registered.
    fn is_live(&self, id: OwnerId) -> bool;
}

/// Guard handle passed to facades at construction.
pub type SharedGuard = Arc<dyn LifetimeGuard>;

/// Default [`LifetimeGuard`]: a mutex-protected set of ids.
#[derive(Debug, Default)]
pub struct LiveRegistry {
    live: Mutex<HashSet<OwnerId>>,
}

impl LiveRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor returning the registry as a [`SharedGuard`].
    #[must_use]
    pub fn shared() -> SharedGuard {
        Arc::new(Self::new())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.live.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.live.lock().is_empty()
    }
}

impl LifetimeGuard for LiveRegistry {
    fn register(&self, id: OwnerId) {
        self.live.lock().insert(id);
    }

    fn unregister(&self, id: OwnerId) {
        self.live.lock().remove(&id);
    }

    fn is_live(&self, id: OwnerId) -> bool {
        self.live.lock().contains(&id)
    }
}

/// A continuation bound to an owner.
///
/// [`run`](Self::run) checks liveness first and drops the closure untouched
/// when the owner is gone.
pub struct Guarded<F> {
    guard: SharedGuard,
    owner: OwnerId,
    f: F,
}

impl<F, R> Guarded<F>
where
    F: FnOnce() -> R,
{
    pub fn new(guard: SharedGuard, owner: OwnerId, f: F) -> Self {
        Self { guard, owner, f }
    }

    /// Run the continuation if the owner is still live.
    ///
    /// Returns `None` without calling the closure otherwise.
    pub fn run(self) -> Option<R> {
        if !self.guard.is_live(self.owner) {
            trace!(owner = %self.owner, "dropping continuation for dead owner");
            return None;
        }
        Some((self.f)())
    }

    #[must_use]
    pub fn owner(&self) -> OwnerId {
        self.owner
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use rstest::rstest;
    use unimock::{MockFn, Unimock, matching};

    use super::*;

    #[test]
    fn register_and_unregister() {
        let registry = LiveRegistry::new();
        let id = OwnerId::next();

        assert!(!registry.is_live(id));
        registry.register(id);
        assert!(registry.is_live(id));
        assert_eq!(registry.len(), 1);

        registry.unregister(id);
        assert!(!registry.is_live(id));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_unknown_is_noop() {
        let registry = LiveRegistry::new();
        registry.unregister(OwnerId::next());
        assert!(registry.is_empty());
    }

    #[rstest]
    #[case::live(true, Some(42))]
    #[case::dead(false, None)]
    fn guarded_runs_only_for_live_owner(#[case] live: bool, #[case] expected: Option<u32>) {
        let registry = LiveRegistry::shared();
        let id = OwnerId::next();
        registry.register(id);
        if !live {
            registry.unregister(id);
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let continuation = Guarded::new(registry, id, move || {
            counter.fetch_add(1, Ordering::SeqCst);
            42
        });

        assert_eq!(continuation.run(), expected);
        assert_eq!(calls.load(Ordering::SeqCst), usize::from(live));
    }

    #[test]
    fn guarded_consults_guard_exactly_once() {
        let id = OwnerId::from_raw(99);
        let mock = Unimock::new(
            LifetimeGuardMock::is_live
                .next_call(matching!(_))
                .returns(false),
        );
        let guard: SharedGuard = Arc::new(mock);

        let continuation = Guarded::new(guard, id, || -> u32 { panic!("must not run") });
        assert!(continuation.run().is_none());
    }
}
