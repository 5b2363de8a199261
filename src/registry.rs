use core::any::TypeId;
use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{binding::Binding, kernel::Kernel, request::Request, resolvers::MissingBindingResolver};

/// Ranks a binding against a request; the top-score group survives.
pub type PrecedenceFn = Arc<dyn Fn(&Binding, &Request) -> u8 + Send + Sync>;

/// The declared binding table plus the memo of bindings synthesized by the
/// missing-binding resolver chain. The declared table is immutable after the
/// kernel is built; the memo gives synthesized bindings stable identity so
/// their instances cache correctly.
pub(crate) struct BindingRegistry {
    declared: BTreeMap<TypeId, Vec<Binding>>,
    implicit: Mutex<BTreeMap<TypeId, Vec<Binding>>>,
    resolvers: Vec<Arc<dyn MissingBindingResolver>>,
    precedence: PrecedenceFn,
}

impl BindingRegistry {
    #[must_use]
    pub(crate) fn new(
        bindings: Vec<Binding>,
        resolvers: Vec<Arc<dyn MissingBindingResolver>>,
        precedence: PrecedenceFn,
    ) -> Self {
        let mut declared: BTreeMap<TypeId, Vec<Binding>> = BTreeMap::new();
        for binding in bindings {
            declared.entry(binding.service().id).or_default().push(binding);
        }

        Self {
            declared,
            implicit: Mutex::new(BTreeMap::new()),
            resolvers,
            precedence,
        }
    }

    #[must_use]
    pub(crate) fn declared_for(&self, service: &TypeId) -> Vec<Binding> {
        self.declared.get(service).cloned().unwrap_or_default()
    }

    fn known_matching(&self, request: &Request, include_implicit: bool) -> Vec<Binding> {
        let service = request.service().id;
        let mut found: Vec<Binding> = self
            .declared
            .get(&service)
            .map(|bindings| bindings.iter().filter(|binding| matches(binding, request)).cloned().collect())
            .unwrap_or_default();

        if include_implicit {
            if let Some(bindings) = self.implicit.lock().get(&service) {
                found.extend(bindings.iter().filter(|binding| matches(binding, request)).cloned());
            }
        }
        found
    }

    /// Candidates surviving condition/constraint filtering and precedence
    /// ranking. The resolver chain runs only when nothing known matches;
    /// its additions are re-checked under the memo lock so two concurrent
    /// misses cannot register duplicates.
    #[must_use]
    pub(crate) fn candidates(&self, kernel: &Kernel, request: &Request) -> Vec<Binding> {
        let mut found = self.known_matching(request, true);

        if found.is_empty() {
            let additions = self.run_resolver_chain(kernel, request);
            if !additions.is_empty() {
                let mut memo = self.implicit.lock();
                let known = memo.entry(request.service().id).or_default();
                if !known.iter().any(|binding| matches(binding, request)) {
                    known.extend(additions);
                }
                drop(memo);

                found = self.known_matching(request, true);
            }
        }

        if found.len() > 1 {
            let best = found
                .iter()
                .map(|binding| (self.precedence)(binding, request))
                .max()
                .expect("candidate list is non-empty");
            found.retain(|binding| (self.precedence)(binding, request) == best);
        }
        found
    }

    #[must_use]
    pub(crate) fn can_resolve(&self, kernel: &Kernel, request: &Request, ignore_implicit: bool) -> bool {
        if ignore_implicit {
            return !self.known_matching(request, false).is_empty();
        }
        !self.candidates(kernel, request).is_empty()
    }

    fn run_resolver_chain(&self, kernel: &Kernel, request: &Request) -> Vec<Binding> {
        for resolver in &self.resolvers {
            let additions = resolver.resolve(kernel, request);
            if !additions.is_empty() {
                debug!(service = request.service().name, count = additions.len(), "Bindings synthesized");
                return additions;
            }
        }
        Vec::new()
    }
}

fn matches(binding: &Binding, request: &Request) -> bool {
    binding.matches(request) && request.matches_constraint(binding.metadata())
}

/// Default precedence: a named binding matched by a constrained request
/// outranks a conditional one, which outranks a plain explicit one, which
/// outranks anything synthesized.
#[must_use]
pub(crate) fn default_precedence() -> PrecedenceFn {
    Arc::new(|binding, request| {
        let mut score = 0;
        if request.is_constrained() && binding.metadata().name().is_some() {
            score += 4;
        }
        if binding.is_conditional() {
            score += 2;
        }
        if !binding.is_implicit() {
            score += 1;
        }
        score
    })
}
