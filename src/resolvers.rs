use crate::{binding::Binding, kernel::Kernel, request::Request, target::Target};

/// Supplies candidates for a request that no declared binding satisfies.
/// Resolvers run in their configured order; the first non-empty result wins
/// and results are never merged across resolvers.
pub trait MissingBindingResolver: Send + Sync {
    fn resolve(&self, kernel: &Kernel, request: &Request) -> Vec<Binding>;
}

/// Closes bindings declared under a generic-definition token over the
/// concrete service a request names, e.g. a binding for the `Repository<T>`
/// definition reified to `Repository<Sword>` on demand.
pub struct OpenGenericResolver;

impl MissingBindingResolver for OpenGenericResolver {
    fn resolve(&self, kernel: &Kernel, request: &Request) -> Vec<Binding> {
        let Some(generic) = request.generic() else {
            return Vec::new();
        };

        kernel
            .declared_bindings(&generic.definition.id)
            .iter()
            .map(|definition| definition.reified_for(request.service()))
            .collect()
    }
}

/// Synthesizes a transient self-binding when the requested type is concrete,
/// i.e. a construction plan is registered for it.
pub struct SelfBindingResolver;

impl MissingBindingResolver for SelfBindingResolver {
    fn resolve(&self, kernel: &Kernel, request: &Request) -> Vec<Binding> {
        let service = request.service();
        if !kernel.is_planned(&service.id) {
            return Vec::new();
        }

        vec![Binding::to_self(service).implicit().build()]
    }
}

/// Serves the declared default of an injection target when nothing else
/// matches. The synthesized binding re-checks "the target declares a
/// default" as its condition, so the memoized copy never answers requests
/// without one.
pub struct DefaultValueResolver;

impl MissingBindingResolver for DefaultValueResolver {
    fn resolve(&self, _kernel: &Kernel, request: &Request) -> Vec<Binding> {
        if !request.target().is_some_and(Target::has_default) {
            return Vec::new();
        }

        let binding = Binding::to_method(request.service(), |context| {
            Ok(context.request().target().and_then(Target::default_value))
        })
        .when(|request| request.target().is_some_and(Target::has_default))
        .implicit()
        .build();

        vec![binding]
    }
}
