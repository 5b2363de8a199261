use std::sync::{Arc, OnceLock, Weak};

use crate::{
    binding::Binding,
    kernel::{Kernel, KernelInner},
    parameter::Parameter,
    pipeline::ActivationCache,
    plan::Plan,
    request::Request,
    scope::ScopeRef,
};

/// Resolution-time pairing of a [`Request`] with its chosen [`Binding`].
///
/// Contexts form a tree mirroring the object graph under construction and
/// live for the duration of one top-level kernel operation; cache entries
/// keep a context alive past that so deactivation sees the same state.
#[derive(Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    kernel: Weak<KernelInner>,
    request: Request,
    binding: Binding,
    plan: OnceLock<Arc<Plan>>,
    scope: OnceLock<Option<ScopeRef>>,
    session: Session,
}

impl Context {
    #[must_use]
    pub(crate) fn new(kernel: &Kernel, request: Request, binding: Binding, session: Session) -> Self {
        Self {
            inner: Arc::new(ContextInner {
                kernel: kernel.downgrade(),
                request,
                binding,
                plan: OnceLock::new(),
                scope: OnceLock::new(),
                session,
            }),
        }
    }

    /// The kernel this context resolves against.
    ///
    /// # Panics
    /// Panics if the kernel has been dropped; contexts only reach user code
    /// while a kernel operation is on the stack, so this cannot happen there.
    #[must_use]
    pub fn kernel(&self) -> Kernel {
        Kernel::from_inner(self.inner.kernel.upgrade().expect("kernel dropped while its context is in use"))
    }

    #[inline]
    #[must_use]
    pub fn request(&self) -> &Request {
        &self.inner.request
    }

    #[inline]
    #[must_use]
    pub fn binding(&self) -> &Binding {
        &self.inner.binding
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<&Context> {
        self.inner.request.parent()
    }

    /// The plan driving construction, once the provider has looked it up.
    #[must_use]
    pub fn plan(&self) -> Option<Arc<Plan>> {
        self.inner.plan.get().cloned()
    }

    pub(crate) fn set_plan(&self, plan: Arc<Plan>) {
        let _ = self.inner.plan.set(plan);
    }

    /// The scope resolved for this context, `None` meaning transient.
    #[must_use]
    pub fn scope(&self) -> Option<ScopeRef> {
        self.inner.scope.get().cloned().flatten()
    }

    pub(crate) fn set_scope(&self, scope: Option<ScopeRef>) {
        let _ = self.inner.scope.set(scope);
    }

    /// The activation cache of the pass this context belongs to. Lets a
    /// strategy or callback ask whether the at-most-once guarantee has
    /// already been satisfied for an instance.
    #[must_use]
    pub fn activation_cache(&self) -> &ActivationCache {
        self.inner.session.activation_cache()
    }

    /// Request parameters followed by binding parameters, in that order.
    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.inner
            .request
            .parameters()
            .iter()
            .chain(self.inner.binding.parameters())
    }

    #[inline]
    #[must_use]
    pub(crate) fn session(&self) -> &Session {
        &self.inner.session
    }
}

/// State shared by every context of one top-level resolution pass: the
/// activation half of the cycle-dedup cache. A fresh session per pass keeps
/// the identity sets bounded and isolated from unrelated concurrent passes.
#[derive(Clone)]
pub(crate) struct Session {
    activation: Arc<ActivationCache>,
}

impl Session {
    #[must_use]
    pub(crate) fn new() -> Self {
        Self {
            activation: Arc::new(ActivationCache::new()),
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn activation_cache(&self) -> &ActivationCache {
        &self.activation
    }
}
