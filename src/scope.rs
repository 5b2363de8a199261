use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Weak,
};

use crate::context::Context;

/// Liveness handle owning the lifetime of cached instances.
///
/// Cache entries recorded under a scope stay reusable while the scope is
/// alive. A scope dies when [`Scope::release`] is called or when the last
/// handle is dropped; either way the next [`crate::Kernel::prune`] pass
/// removes and deactivates the scope's entries. The cache interprets neither
/// the scope's meaning nor its owner, only its identity and liveness.
#[derive(Clone, Default)]
pub struct Scope {
    core: Arc<ScopeCore>,
}

#[derive(Default)]
pub(crate) struct ScopeCore {
    released: AtomicBool,
}

impl Scope {
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the scope dead, independent of remaining handles.
    pub fn release(&self) {
        self.core.released.store(true, Ordering::Release);
    }

    #[must_use]
    pub fn is_released(&self) -> bool {
        self.core.released.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.core) as usize
    }

    #[inline]
    #[must_use]
    pub(crate) fn downgrade(&self) -> ScopeRef {
        ScopeRef {
            core: Arc::downgrade(&self.core),
            id: self.id(),
        }
    }
}

/// Weak, liveness-checkable key stored by the scope cache.
#[derive(Clone)]
pub struct ScopeRef {
    core: Weak<ScopeCore>,
    id: usize,
}

impl ScopeRef {
    #[inline]
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.core
            .upgrade()
            .is_some_and(|core| !core.released.load(Ordering::Acquire))
    }
}

/// Picks the scope owning a resolved instance; `None` means transient,
/// i.e. the instance is never cached.
pub type ScopeSelector = Arc<dyn Fn(&Context) -> Option<Scope> + Send + Sync>;

/// Never cached; every resolution constructs anew.
#[must_use]
pub fn transient() -> ScopeSelector {
    Arc::new(|_| None)
}

/// One instance per kernel, owned by the kernel's root scope.
#[must_use]
pub fn singleton() -> ScopeSelector {
    Arc::new(|context| Some(context.kernel().root_scope()))
}

/// One instance per calling thread. The scope dies with the thread.
#[must_use]
pub fn per_thread() -> ScopeSelector {
    std::thread_local! {
        static THREAD_SCOPE: Scope = Scope::new();
    }

    Arc::new(|_| Some(THREAD_SCOPE.with(Scope::clone)))
}

/// Caller-owned scope; the caller decides when it dies.
#[must_use]
pub fn within(scope: &Scope) -> ScopeSelector {
    let scope = scope.clone();
    Arc::new(move |_| Some(scope.clone()))
}

#[cfg(test)]
mod tests {
    use super::Scope;

    #[test]
    fn test_alive_until_released() {
        let scope = Scope::new();
        let scope_ref = scope.downgrade();

        assert!(scope_ref.is_alive());
        scope.release();
        assert!(!scope_ref.is_alive());
    }

    #[test]
    fn test_dead_after_last_handle_dropped() {
        let scope = Scope::new();
        let scope_ref = scope.downgrade();
        let second = scope.clone();

        drop(scope);
        assert!(scope_ref.is_alive());
        drop(second);
        assert!(!scope_ref.is_alive());
    }

    #[test]
    fn test_identity_shared_between_handles() {
        let scope = Scope::new();

        assert_eq!(scope.id(), scope.clone().id());
        assert_eq!(scope.id(), scope.downgrade().id());
        assert_ne!(scope.id(), Scope::new().id());
    }
}
