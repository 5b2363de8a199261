use core::any::TypeId;
use std::{
    collections::BTreeMap,
    sync::{Arc, Weak},
};

use tracing::{debug, error, info_span};

use crate::{
    any::{SharedAny, TypeInfo},
    binding::Binding,
    cache::{CacheEntry, ScopeCache},
    config::Settings,
    context::{Context, Session},
    errors::{InstantiateErrorKind, PlanErrorKind, ResolveErrorKind},
    parameter::Parameter,
    pipeline::{
        ActivationCache, ActivationStrategy, BindingActivators, BindingDeactivators, BindingInitializers,
        DeactivationStrategy, InitializationStrategy, InstanceRef, MethodInjection, Pipeline, PropertyInjection,
    },
    plan::{Plan, PlanFactory, Planner},
    provider::ConstantProvider,
    registry::{default_precedence, BindingRegistry, PrecedenceFn},
    request::{Request, RequestBuilder},
    resolvers::{DefaultValueResolver, MissingBindingResolver, OpenGenericResolver, SelfBindingResolver},
    scope::Scope,
    target::Target,
};

/// The inversion-of-control runtime. Cheap to clone and safe to share
/// between threads; all state lives behind one shared inner.
///
/// Dropping the last kernel handle releases the root scope and deactivates
/// every instance still held by the scope cache, newest first.
#[derive(Clone)]
pub struct Kernel {
    inner: Arc<KernelInner>,
}

pub(crate) struct KernelInner {
    registry: BindingRegistry,
    planner: Planner,
    pipeline: Pipeline,
    cache: ScopeCache,
    settings: Settings,
    root_scope: Scope,
}

impl Kernel {
    #[inline]
    #[must_use]
    pub fn builder() -> KernelBuilder {
        KernelBuilder::new()
    }

    #[inline]
    #[must_use]
    pub(crate) fn from_inner(inner: Arc<KernelInner>) -> Self {
        Self { inner }
    }

    #[inline]
    #[must_use]
    pub(crate) fn downgrade(&self) -> Weak<KernelInner> {
        Arc::downgrade(&self.inner)
    }

    #[inline]
    #[must_use]
    pub fn settings(&self) -> Settings {
        self.inner.settings
    }

    /// The scope backing singleton bindings; lives as long as the kernel.
    #[inline]
    #[must_use]
    pub fn root_scope(&self) -> Scope {
        self.inner.root_scope.clone()
    }

    /// Collaborator-facing request factory.
    #[inline]
    #[must_use]
    pub fn create_request(&self, service: TypeInfo) -> RequestBuilder {
        Request::build(service)
    }

    /// Resolves `request` into a lazy, finite, non-restartable sequence of
    /// activated instances. Candidate selection happens eagerly: an empty,
    /// non-optional result fails here, as does a unique request matched by
    /// more than one binding of top precedence. Construction and activation
    /// happen per item on iteration.
    pub fn resolve(&self, request: Request) -> Result<ResolveIter, ResolveErrorKind> {
        let span = info_span!("resolve", service = request.service().name);
        let _guard = span.enter();

        let candidates = self.inner.registry.candidates(self, &request);
        if candidates.is_empty() && !request.is_optional() {
            let err = ResolveErrorKind::Unresolved {
                service: request.service(),
            };
            error!("{}", err);
            return Err(err);
        }
        if request.is_unique() && candidates.len() > 1 {
            let err = ResolveErrorKind::Ambiguous {
                service: request.service(),
                count: candidates.len(),
            };
            error!("{}", err);
            return Err(err);
        }

        Ok(ResolveIter {
            kernel: self.clone(),
            session: Session::new(),
            request,
            candidates: candidates.into_iter(),
        })
    }

    /// Resolves `request` to a single instance.
    pub fn resolve_one(&self, request: Request) -> Result<SharedAny, ResolveErrorKind> {
        let service = request.service();
        let mut resolved = self.resolve(request)?;
        match resolved.next() {
            Some(result) => result,
            None => Err(ResolveErrorKind::Unresolved { service }),
        }
    }

    /// Whether at least one binding would survive filtering for `request`.
    /// With `ignore_implicit`, synthesized bindings are disregarded.
    #[must_use]
    pub fn can_resolve(&self, request: &Request, ignore_implicit: bool) -> bool {
        self.inner.registry.can_resolve(self, request, ignore_implicit)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Result<Arc<T>, ResolveErrorKind> {
        downcast(self.resolve_one(Request::build(TypeInfo::of::<T>()).finish())?)
    }

    pub fn get_named<T: Send + Sync + 'static>(&self, name: &'static str) -> Result<Arc<T>, ResolveErrorKind> {
        downcast(self.resolve_one(Request::build(TypeInfo::of::<T>()).named(name).finish())?)
    }

    pub fn get_with<T: Send + Sync + 'static>(
        &self,
        parameters: impl IntoIterator<Item = Parameter>,
    ) -> Result<Arc<T>, ResolveErrorKind> {
        downcast(self.resolve_one(Request::build(TypeInfo::of::<T>()).with_parameters(parameters).finish())?)
    }

    /// Resolves `T` if a binding survives, `Ok(None)` otherwise.
    pub fn try_get<T: Send + Sync + 'static>(&self) -> Result<Option<Arc<T>>, ResolveErrorKind> {
        let mut resolved = self.resolve(Request::build(TypeInfo::of::<T>()).optional().finish())?;
        match resolved.next() {
            Some(result) => downcast(result?).map(Some),
            None => Ok(None),
        }
    }

    /// Every instance of the top-precedence binding group for `T`.
    pub fn get_all<T: Send + Sync + 'static>(&self) -> Result<Vec<Arc<T>>, ResolveErrorKind> {
        let resolved = self.resolve(Request::build(TypeInfo::of::<T>()).all().optional().finish())?;
        resolved.map(|result| downcast(result?)).collect()
    }

    /// Runs initialization and activation over an externally supplied
    /// instance: property and method injection driven by the registered plan
    /// for `T`, then the activation strategies.
    pub fn inject<T: Send + Sync + 'static>(
        &self,
        instance: Arc<T>,
        parameters: impl IntoIterator<Item = Parameter>,
    ) -> Result<(), ResolveErrorKind> {
        let service = TypeInfo::of::<T>();
        let span = info_span!("inject", service = service.name);
        let _guard = span.enter();

        let shared: SharedAny = instance;
        let binding = Binding::to_provider(service, ConstantProvider::new(service, shared.clone()))
            .implicit()
            .build();
        let request = Request::build(service).with_parameters(parameters).finish();
        let session = Session::new();
        let context = Context::new(self, request, binding, session.clone());
        context.set_scope(None);

        let reference = InstanceRef::new(shared);
        self.inner.pipeline.initialize(&context, &reference)?;
        self.inner.pipeline.activate(&context, &reference, session.activation_cache())?;
        Ok(())
    }

    /// Removes the instance's cache entry, wherever its scope bucket is, and
    /// deactivates it immediately. Returns `false` when the instance is not
    /// tracked, including on a repeated release of the same instance.
    pub fn release<T: Send + Sync + 'static>(&self, instance: &Arc<T>) -> bool {
        let span = info_span!("release", service = core::any::type_name::<T>());
        let _guard = span.enter();

        let identity = Arc::as_ptr(instance) as *const () as usize;
        match self.inner.cache.release(identity) {
            Some(entry) => {
                let cache = ActivationCache::new();
                self.deactivate_entry(&entry, &cache);
                true
            }
            None => {
                debug!("Not tracked");
                false
            }
        }
    }

    /// Removes every bucket whose scope has died and deactivates its entries
    /// exactly once, newest first. Safe to call concurrently with resolution
    /// and with other prune passes.
    pub fn prune(&self) {
        let span = info_span!("prune");
        let _guard = span.enter();

        let removed = self.inner.cache.sweep_dead();
        let cache = ActivationCache::new();
        for entry in &removed {
            self.deactivate_entry(entry, &cache);
        }
    }

    fn deactivate_entry(&self, entry: &CacheEntry, cache: &ActivationCache) {
        if let Err(err) = self.inner.pipeline.deactivate(&entry.context, &entry.instance, cache) {
            error!("{}", err);
        }
    }
}

impl Kernel {
    /// Resolves one injection target through a child request. `Ok(None)`
    /// means the target was optional and nothing satisfied it.
    pub(crate) fn resolve_target_in(&self, parent: &Context, target: &Target) -> Result<Option<SharedAny>, ResolveErrorKind> {
        let request = Request::child(target.clone(), parent);

        if request.depth() > self.inner.settings.max_depth {
            let err = ResolveErrorKind::DepthExceeded {
                service: request.service(),
                limit: self.inner.settings.max_depth,
            };
            error!("{}", err);
            return Err(err);
        }

        let candidates = self.inner.registry.candidates(self, &request);
        if candidates.is_empty() {
            if request.is_optional() {
                return Ok(None);
            }
            let err = ResolveErrorKind::Unresolved {
                service: request.service(),
            };
            error!("{}", err);
            return Err(err);
        }
        if candidates.len() > 1 {
            let err = ResolveErrorKind::Ambiguous {
                service: request.service(),
                count: candidates.len(),
            };
            error!("{}", err);
            return Err(err);
        }

        let binding = candidates.into_iter().next().expect("exactly one candidate remains");
        self.activate_binding(&binding, request, parent.session().clone())
    }

    #[must_use]
    pub(crate) fn can_resolve_target(&self, parent: &Context, target: &Target) -> bool {
        let request = Request::child(target.clone(), parent);
        self.can_resolve(&request, false)
    }

    /// Drives one binding through construction, caching and the pipeline.
    ///
    /// The instance is remembered under its scope *before* initialization
    /// runs: property injection may re-enter the kernel through a dependency
    /// cycle, and the mid-construction cache hit is what terminates it. The
    /// cache stores the [`InstanceRef`] cell, so an initialization strategy
    /// replacing the value is still observed by later lookups.
    fn activate_binding(
        &self,
        binding: &Binding,
        request: Request,
        session: Session,
    ) -> Result<Option<SharedAny>, ResolveErrorKind> {
        let context = Context::new(self, request, binding.clone(), session.clone());

        let scope = (binding.scope_selector())(&context);
        context.set_scope(scope.as_ref().map(Scope::downgrade));

        if let Some(scope) = &scope {
            if let Some(hit) = self.inner.cache.try_get(binding.id(), binding.service().id, scope) {
                debug!("Found in cache");
                return Ok(Some(hit));
            }
        }

        if self.inner.settings.detect_cycles {
            let mut chain = vec![binding.service()];
            for ancestor in context.request().ancestors() {
                chain.push(ancestor.binding().service());
                if ancestor.binding().id() == binding.id() {
                    chain.reverse();
                    let err = ResolveErrorKind::CyclicDependency { chain };
                    error!("{}", err);
                    return Err(err);
                }
            }
        }

        let created = binding.provider().create(&context).map_err(|err| {
            error!("{}", err);
            ResolveErrorKind::Instantiator(err)
        })?;
        let Some(instance) = created else {
            if self.inner.settings.allow_none {
                debug!("Provider yielded nothing");
                return Ok(None);
            }
            let err = ResolveErrorKind::Instantiator(InstantiateErrorKind::NoneInstance);
            error!("{}", err);
            return Err(err);
        };

        let reference = InstanceRef::new(instance);
        if let Some(scope) = &scope {
            self.inner.cache.remember(context.clone(), scope, reference.clone());
        }

        self.inner.pipeline.initialize(&context, &reference)?;
        self.inner.pipeline.activate(&context, &reference, session.activation_cache())?;

        Ok(Some(reference.get()))
    }

    #[must_use]
    pub(crate) fn declared_bindings(&self, service: &TypeId) -> Vec<Binding> {
        self.inner.registry.declared_for(service)
    }

    #[must_use]
    pub(crate) fn is_planned(&self, implementation: &TypeId) -> bool {
        self.inner.planner.is_planned(implementation)
    }

    pub(crate) fn plan_for(&self, implementation: TypeInfo) -> Result<Arc<Plan>, PlanErrorKind> {
        self.inner.planner.plan_for(implementation)
    }

    #[must_use]
    pub(crate) fn plan_if_registered(&self, implementation: &TypeId) -> Option<Arc<Plan>> {
        self.inner.planner.plan_if_registered(implementation)
    }

    #[cfg(test)]
    #[must_use]
    pub(crate) fn cached_entry_count(&self) -> usize {
        self.inner.cache.entry_count()
    }
}

impl Drop for KernelInner {
    fn drop(&mut self) {
        self.root_scope.release();

        let removed = self.cache.drain();
        let cache = ActivationCache::new();
        for entry in &removed {
            if let Err(err) = self.pipeline.deactivate(&entry.context, &entry.instance, &cache) {
                error!("{}", err);
            }
        }
        debug!("Kernel closed on drop");
    }
}

fn downcast<T: Send + Sync + 'static>(instance: SharedAny) -> Result<Arc<T>, ResolveErrorKind> {
    instance.downcast().map_err(|instance: SharedAny| ResolveErrorKind::IncorrectType {
        expected: TypeInfo::of::<T>(),
        actual: (*instance).type_id(),
    })
}

/// Lazy sequence of activated instances for one resolution. All items share
/// one session, so activation dedup spans the whole pass.
pub struct ResolveIter {
    kernel: Kernel,
    session: Session,
    request: Request,
    candidates: std::vec::IntoIter<Binding>,
}

impl Iterator for ResolveIter {
    type Item = Result<SharedAny, ResolveErrorKind>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let binding = self.candidates.next()?;
            match self.kernel.activate_binding(&binding, self.request.clone(), self.session.clone()) {
                Ok(Some(instance)) => return Some(Ok(instance)),
                Ok(None) => continue,
                Err(err) => return Some(Err(err)),
            }
        }
    }
}

/// Assembles the immutable inputs of a [`Kernel`]: bindings, plan
/// factories, the missing-binding resolver chain, the precedence function,
/// pipeline strategies and settings.
pub struct KernelBuilder {
    bindings: Vec<Binding>,
    plans: BTreeMap<TypeId, PlanFactory>,
    resolvers: Vec<Arc<dyn MissingBindingResolver>>,
    precedence: PrecedenceFn,
    initialization: Vec<Arc<dyn InitializationStrategy>>,
    activation: Vec<Arc<dyn ActivationStrategy>>,
    deactivation: Vec<Arc<dyn DeactivationStrategy>>,
    settings: Settings,
}

impl Default for KernelBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl KernelBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bindings: Vec::new(),
            plans: BTreeMap::new(),
            resolvers: vec![
                Arc::new(OpenGenericResolver),
                Arc::new(SelfBindingResolver),
                Arc::new(DefaultValueResolver),
            ],
            precedence: default_precedence(),
            initialization: Vec::new(),
            activation: Vec::new(),
            deactivation: Vec::new(),
            settings: Settings::default(),
        }
    }

    #[must_use]
    pub fn bind(mut self, binding: Binding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Registers the construction plan for implementation type `T`, built
    /// lazily at most once.
    #[must_use]
    pub fn register_plan<T: 'static>(mut self, factory: impl Fn() -> Plan + Send + Sync + 'static) -> Self {
        self.plans.insert(TypeId::of::<T>(), Box::new(factory));
        self
    }

    /// Replaces the missing-binding resolver chain. Order matters: the first
    /// resolver returning a non-empty result wins.
    #[must_use]
    pub fn with_missing_binding_resolvers(mut self, resolvers: Vec<Arc<dyn MissingBindingResolver>>) -> Self {
        self.resolvers = resolvers;
        self
    }

    #[must_use]
    pub fn with_precedence(mut self, precedence: impl Fn(&Binding, &Request) -> u8 + Send + Sync + 'static) -> Self {
        self.precedence = Arc::new(precedence);
        self
    }

    #[must_use]
    pub fn add_initialization_strategy(mut self, strategy: impl InitializationStrategy + 'static) -> Self {
        self.initialization.push(Arc::new(strategy));
        self
    }

    #[must_use]
    pub fn add_activation_strategy(mut self, strategy: impl ActivationStrategy + 'static) -> Self {
        self.activation.push(Arc::new(strategy));
        self
    }

    #[must_use]
    pub fn add_deactivation_strategy(mut self, strategy: impl DeactivationStrategy + 'static) -> Self {
        self.deactivation.push(Arc::new(strategy));
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    #[must_use]
    pub fn build(self) -> Kernel {
        let mut initialization: Vec<Arc<dyn InitializationStrategy>> =
            vec![Arc::new(PropertyInjection), Arc::new(MethodInjection), Arc::new(BindingInitializers)];
        initialization.extend(self.initialization);

        let mut activation: Vec<Arc<dyn ActivationStrategy>> = vec![Arc::new(BindingActivators)];
        activation.extend(self.activation);

        let mut deactivation: Vec<Arc<dyn DeactivationStrategy>> = vec![Arc::new(BindingDeactivators)];
        deactivation.extend(self.deactivation);

        Kernel {
            inner: Arc::new(KernelInner {
                registry: BindingRegistry::new(self.bindings, self.resolvers, self.precedence),
                planner: Planner::new(self.plans),
                pipeline: Pipeline::new(initialization, activation, deactivation),
                cache: ScopeCache::new(),
                settings: self.settings,
                root_scope: Scope::new(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use core::{
        marker::PhantomData,
        sync::atomic::{AtomicU8, Ordering},
    };
    use std::sync::Arc;

    use parking_lot::Mutex;
    use tracing_test::traced_test;

    use super::Kernel;
    use crate::{
        any::{BoxedAny, TypeInfo},
        binding::Binding,
        config::{ConstructorSelection, Settings},
        context::Context,
        errors::{ActivationErrorKind, InstantiateErrorKind, PlanErrorKind, ResolveErrorKind},
        parameter::Parameter,
        pipeline::{ActivationStrategy, InstanceRef},
        plan::{ConstructorDirective, MethodDirective, Plan, PropertyDirective, ScoreHint},
        request::{GenericService, Request},
        scope::{self, Scope},
        target::Target,
    };

    struct Sword;

    fn sword_plan() -> Plan {
        Plan::new(TypeInfo::of::<Sword>()).with_constructor(ConstructorDirective::new(|_, _| Ok(Box::new(Sword) as BoxedAny)))
    }

    fn root_cause(mut err: ResolveErrorKind) -> ResolveErrorKind {
        loop {
            match err {
                ResolveErrorKind::Instantiator(InstantiateErrorKind::Dependency { source, .. }) => err = *source,
                other => return other,
            }
        }
    }

    #[test]
    #[traced_test]
    fn test_singleton_identity() {
        let kernel = Kernel::builder()
            .bind(
                Binding::to_type(TypeInfo::of::<Sword>(), TypeInfo::of::<Sword>())
                    .in_scope(scope::singleton())
                    .build(),
            )
            .register_plan::<Sword>(sword_plan)
            .build();

        let first = kernel.get::<Sword>().unwrap();
        let second = kernel.get::<Sword>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(kernel.cached_entry_count(), 1);
    }

    #[test]
    #[traced_test]
    fn test_transient_distinctness() {
        let kernel = Kernel::builder()
            .bind(Binding::to_type(TypeInfo::of::<Sword>(), TypeInfo::of::<Sword>()).build())
            .register_plan::<Sword>(sword_plan)
            .build();

        let first = kernel.get::<Sword>().unwrap();
        let second = kernel.get::<Sword>().unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(kernel.cached_entry_count(), 0);
    }

    struct Coin(u8);

    #[test]
    #[traced_test]
    fn test_precedence() {
        let kernel = Kernel::builder()
            .bind(
                Binding::to_method(TypeInfo::of::<Coin>(), |_| Ok(Some(Box::new(Coin(1)) as BoxedAny)))
                    .named("fine")
                    .build(),
            )
            .bind(
                Binding::to_method(TypeInfo::of::<Coin>(), |_| Ok(Some(Box::new(Coin(2)) as BoxedAny)))
                    .when(|_| true)
                    .build(),
            )
            .bind(Binding::to_method(TypeInfo::of::<Coin>(), |_| Ok(Some(Box::new(Coin(3)) as BoxedAny))).build())
            .build();

        // A name constraint narrows the field to the named binding.
        assert_eq!(kernel.get_named::<Coin>("fine").unwrap().0, 1);
        // Without a constraint the conditional binding outranks the rest.
        assert_eq!(kernel.get::<Coin>().unwrap().0, 2);
    }

    #[test]
    #[traced_test]
    fn test_equal_precedence_is_ambiguous_for_unique_requests() {
        let kernel = Kernel::builder()
            .bind(Binding::to_method(TypeInfo::of::<Coin>(), |_| Ok(Some(Box::new(Coin(1)) as BoxedAny))).build())
            .bind(Binding::to_method(TypeInfo::of::<Coin>(), |_| Ok(Some(Box::new(Coin(2)) as BoxedAny))).build())
            .build();

        assert!(matches!(
            kernel.get::<Coin>(),
            Err(ResolveErrorKind::Ambiguous { count: 2, .. })
        ));

        let mut values: Vec<u8> = kernel.get_all::<Coin>().unwrap().iter().map(|coin| coin.0).collect();
        values.sort_unstable();
        assert_eq!(values, [1, 2]);
    }

    struct Gear {
        motor: Mutex<Option<Arc<Motor>>>,
    }
    struct Motor {
        gear: Mutex<Option<Arc<Gear>>>,
    }

    #[test]
    #[traced_test]
    fn test_cycle_dedup() {
        let gear_activations = Arc::new(AtomicU8::new(0));
        let motor_activations = Arc::new(AtomicU8::new(0));

        let kernel = Kernel::builder()
            .bind(
                Binding::to_constant(TypeInfo::of::<Gear>(), Gear { motor: Mutex::new(None) })
                    .on_activation({
                        let gear_activations = gear_activations.clone();
                        move |_, _| {
                            gear_activations.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .build(),
            )
            .bind(
                Binding::to_constant(TypeInfo::of::<Motor>(), Motor { gear: Mutex::new(None) })
                    .on_activation({
                        let motor_activations = motor_activations.clone();
                        move |_, _| {
                            motor_activations.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .build(),
            )
            .register_plan::<Gear>(|| {
                Plan::new(TypeInfo::of::<Gear>()).with_property(PropertyDirective::setter::<Gear, Motor>(
                    "motor",
                    |gear, motor| {
                        *gear.motor.lock() = Some(motor);
                    },
                ))
            })
            .register_plan::<Motor>(|| {
                Plan::new(TypeInfo::of::<Motor>()).with_property(PropertyDirective::setter::<Motor, Gear>(
                    "gear",
                    |motor, gear| {
                        *motor.gear.lock() = Some(gear);
                    },
                ))
            })
            .build();

        let gear = kernel.get::<Gear>().unwrap();

        assert_eq!(gear_activations.load(Ordering::SeqCst), 1);
        assert_eq!(motor_activations.load(Ordering::SeqCst), 1);
        assert!(gear.motor.lock().is_some());

        let motor = kernel.get::<Motor>().unwrap();
        assert!(motor.gear.lock().as_ref().is_some_and(|wired| Arc::ptr_eq(wired, &gear)));

        // Cache hits do not re-run activation.
        assert_eq!(gear_activations.load(Ordering::SeqCst), 1);
        assert_eq!(motor_activations.load(Ordering::SeqCst), 1);
        assert_eq!(kernel.cached_entry_count(), 2);
    }

    struct Conn;

    #[test]
    #[traced_test]
    fn test_scope_pruning() {
        let deactivations = Arc::new(AtomicU8::new(0));
        let request_scope = Scope::new();

        let kernel = Kernel::builder()
            .bind(
                Binding::to_method(TypeInfo::of::<Conn>(), |_| Ok(Some(Box::new(Conn) as BoxedAny)))
                    .in_scope(scope::within(&request_scope))
                    .on_deactivation({
                        let deactivations = deactivations.clone();
                        move |_, _| {
                            deactivations.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .build(),
            )
            .build();

        let first = kernel.get::<Conn>().unwrap();
        let second = kernel.get::<Conn>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(kernel.cached_entry_count(), 1);

        // The scope is still alive; nothing to prune.
        kernel.prune();
        assert_eq!(deactivations.load(Ordering::SeqCst), 0);
        assert_eq!(kernel.cached_entry_count(), 1);

        request_scope.release();
        kernel.prune();
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
        assert_eq!(kernel.cached_entry_count(), 0);

        kernel.prune();
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn test_release_round_trip() {
        let deactivations = Arc::new(AtomicU8::new(0));

        let kernel = Kernel::builder()
            .bind(
                Binding::to_type(TypeInfo::of::<Sword>(), TypeInfo::of::<Sword>())
                    .in_scope(scope::singleton())
                    .on_deactivation({
                        let deactivations = deactivations.clone();
                        move |_, _| {
                            deactivations.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .build(),
            )
            .register_plan::<Sword>(sword_plan)
            .build();

        let sword = kernel.get::<Sword>().unwrap();
        assert_eq!(kernel.cached_entry_count(), 1);

        assert!(kernel.release(&sword));
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
        assert_eq!(kernel.cached_entry_count(), 0);

        assert!(!kernel.release(&sword));
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
    }

    struct Widget {
        tag: Mutex<Option<Arc<u8>>>,
        size: Mutex<Option<Arc<u32>>>,
    }

    fn widget_plan() -> Plan {
        Plan::new(TypeInfo::of::<Widget>())
            .with_property(PropertyDirective::setter::<Widget, u8>("tag", |widget, tag| {
                *widget.tag.lock() = Some(tag);
            }))
            .with_property(PropertyDirective::setter::<Widget, u32>("size", |widget, size| {
                *widget.size.lock() = Some(size);
            }))
    }

    fn widget_kernel() -> Kernel {
        Kernel::builder()
            .bind(Binding::to_method(TypeInfo::of::<u32>(), |_| Ok(Some(Box::new(7u32) as BoxedAny))).build())
            .bind(Binding::to_method(TypeInfo::of::<u8>(), |_| Ok(Some(Box::new(0u8) as BoxedAny))).build())
            .register_plan::<Widget>(widget_plan)
            .build()
    }

    #[test]
    #[traced_test]
    fn test_property_value_conflict() {
        let kernel = widget_kernel();
        let widget = Arc::new(Widget {
            tag: Mutex::new(None),
            size: Mutex::new(None),
        });

        let err = kernel
            .inject(
                widget.clone(),
                [
                    Parameter::property_value("tag", 1u8),
                    Parameter::property_value("tag", 2u8),
                ],
            )
            .unwrap_err();

        assert!(matches!(
            err,
            ResolveErrorKind::Activation(ActivationErrorKind::Injection(inner))
                if matches!(*inner, InstantiateErrorKind::AmbiguousPropertyValue { property: "tag", count: 2 })
        ));
        // No injector ran for the conflicted property, unrelated ones did.
        assert!(widget.tag.lock().is_none());
        assert_eq!(widget.size.lock().as_deref().copied(), Some(7));
    }

    #[test]
    #[traced_test]
    fn test_unmatched_property_value() {
        let kernel = widget_kernel();
        let widget = Arc::new(Widget {
            tag: Mutex::new(None),
            size: Mutex::new(None),
        });

        let err = kernel
            .inject(widget.clone(), [Parameter::property_value("bogus", 1u8)])
            .unwrap_err();

        assert!(matches!(
            err,
            ResolveErrorKind::Activation(ActivationErrorKind::Injection(inner))
                if matches!(*inner, InstantiateErrorKind::UnmatchedPropertyValue { parameter: "bogus" })
        ));
    }

    #[test]
    #[traced_test]
    fn test_inject_supplied_property_value() {
        let kernel = widget_kernel();
        let widget = Arc::new(Widget {
            tag: Mutex::new(None),
            size: Mutex::new(None),
        });

        kernel.inject(widget.clone(), [Parameter::property_value("tag", 4u8)]).unwrap();

        assert_eq!(widget.tag.lock().as_deref().copied(), Some(4));
        assert_eq!(widget.size.lock().as_deref().copied(), Some(7));
    }

    struct Blade;
    #[derive(Debug)]
    struct Forge {
        grade: u8,
    }

    fn forge_plan(hint: ScoreHint) -> Plan {
        Plan::new(TypeInfo::of::<Forge>())
            .with_constructor(ConstructorDirective::new(|_, _| Ok(Box::new(Forge { grade: 0 }) as BoxedAny)))
            .with_constructor(
                ConstructorDirective::new(|_, args| {
                    args.get::<Blade>(0)?;
                    Ok(Box::new(Forge { grade: 1 }) as BoxedAny)
                })
                .with_target(Target::parameter::<Blade>("blade"))
                .with_hint(hint),
            )
    }

    #[test]
    #[traced_test]
    fn test_constructor_scoring_prefers_satisfiable_targets() {
        let kernel = Kernel::builder()
            .bind(Binding::to_method(TypeInfo::of::<Blade>(), |_| Ok(Some(Box::new(Blade) as BoxedAny))).build())
            .bind(Binding::to_type(TypeInfo::of::<Forge>(), TypeInfo::of::<Forge>()).build())
            .register_plan::<Forge>(|| forge_plan(ScoreHint::Neutral))
            .build();

        assert_eq!(kernel.get::<Forge>().unwrap().grade, 1);
    }

    #[test]
    #[traced_test]
    fn test_constructor_scoring_tie_is_ambiguous() {
        let kernel = Kernel::builder()
            .bind(Binding::to_type(TypeInfo::of::<Forge>(), TypeInfo::of::<Forge>()).build())
            .register_plan::<Forge>(|| forge_plan(ScoreHint::Neutral))
            .build();

        let err = kernel.get::<Forge>().unwrap_err();
        assert!(matches!(
            err,
            ResolveErrorKind::Instantiator(InstantiateErrorKind::Plan(PlanErrorKind::AmbiguousConstructor {
                count: 2,
                score: 0,
                ..
            }))
        ));
    }

    #[test]
    #[traced_test]
    fn test_constructor_score_hint() {
        let kernel = Kernel::builder()
            .bind(Binding::to_type(TypeInfo::of::<Forge>(), TypeInfo::of::<Forge>()).build())
            .register_plan::<Forge>(|| forge_plan(ScoreHint::Lowest))
            .build();

        assert_eq!(kernel.get::<Forge>().unwrap().grade, 0);
    }

    #[test]
    #[traced_test]
    fn test_unique_constructor_selection_requires_one_directive() {
        let kernel = Kernel::builder()
            .bind(Binding::to_type(TypeInfo::of::<Forge>(), TypeInfo::of::<Forge>()).build())
            .register_plan::<Forge>(|| forge_plan(ScoreHint::Neutral))
            .with_settings(Settings {
                constructor_selection: ConstructorSelection::Unique,
                ..Settings::default()
            })
            .build();

        let err = kernel.get::<Forge>().unwrap_err();
        assert!(matches!(
            err,
            ResolveErrorKind::Instantiator(InstantiateErrorKind::Plan(PlanErrorKind::MultipleConstructors {
                count: 2,
                ..
            }))
        ));
    }

    struct RepositoryDef;
    struct Repository<T>(PhantomData<T>);

    #[test]
    #[traced_test]
    fn test_open_generic_reification() {
        let kernel = Kernel::builder()
            .bind(
                Binding::to_method(TypeInfo::of::<RepositoryDef>(), |context| {
                    let generic = context.request().generic().expect("closed requests carry generic info");
                    if generic.arguments.first() == Some(&TypeInfo::of::<Sword>()) {
                        Ok(Some(Box::new(Repository::<Sword>(PhantomData)) as BoxedAny))
                    } else {
                        Ok(None)
                    }
                })
                .build(),
            )
            .with_settings(Settings {
                allow_none: true,
                ..Settings::default()
            })
            .build();

        let request = kernel
            .create_request(TypeInfo::of::<Repository<Sword>>())
            .with_generic(GenericService {
                definition: TypeInfo::of::<RepositoryDef>(),
                arguments: vec![TypeInfo::of::<Sword>()],
            })
            .finish();
        let instance = kernel.resolve_one(request).unwrap();
        assert!(instance.downcast::<Repository<Sword>>().is_ok());

        // The reified binding is memoized and synthesized bindings stay
        // invisible to `can_resolve(_, true)`.
        let request = kernel
            .create_request(TypeInfo::of::<Repository<Sword>>())
            .with_generic(GenericService {
                definition: TypeInfo::of::<RepositoryDef>(),
                arguments: vec![TypeInfo::of::<Sword>()],
            })
            .finish();
        assert!(kernel.can_resolve(&request, false));
        assert!(!kernel.can_resolve(&request, true));
        assert!(kernel.resolve_one(request).is_ok());
    }

    struct Hammer;

    #[test]
    #[traced_test]
    fn test_self_binding_for_planned_types() {
        let kernel = Kernel::builder()
            .register_plan::<Hammer>(|| {
                Plan::new(TypeInfo::of::<Hammer>())
                    .with_constructor(ConstructorDirective::new(|_, _| Ok(Box::new(Hammer) as BoxedAny)))
            })
            .build();

        let first = kernel.get::<Hammer>().unwrap();
        let second = kernel.get::<Hammer>().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));

        let request = Request::build(TypeInfo::of::<Hammer>()).finish();
        assert!(kernel.can_resolve(&request, false));
        assert!(!kernel.can_resolve(&request, true));

        let unplanned = Request::build(TypeInfo::of::<Conn>()).finish();
        assert!(!kernel.can_resolve(&unplanned, false));
    }

    struct Piston(u8);
    struct Engine {
        piston: Arc<Piston>,
    }

    #[test]
    #[traced_test]
    fn test_default_value_fallback() {
        let kernel = Kernel::builder()
            .bind(Binding::to_type(TypeInfo::of::<Engine>(), TypeInfo::of::<Engine>()).build())
            .register_plan::<Engine>(|| {
                Plan::new(TypeInfo::of::<Engine>()).with_constructor(
                    ConstructorDirective::new(|_, args| {
                        Ok(Box::new(Engine {
                            piston: args.get::<Piston>(0)?,
                        }) as BoxedAny)
                    })
                    .with_target(Target::parameter::<Piston>("piston").with_default(|| Box::new(Piston(9)))),
                )
            })
            .build();

        assert_eq!(kernel.get::<Engine>().unwrap().piston.0, 9);
    }

    #[derive(Debug)]
    struct Part;
    #[derive(Debug)]
    struct Assembly {
        parts: Mutex<Vec<Arc<Part>>>,
    }

    fn assembly_plan(installs: Arc<AtomicU8>) -> Plan {
        Plan::new(TypeInfo::of::<Assembly>())
            .with_constructor(ConstructorDirective::new(|_, _| {
                Ok(Box::new(Assembly {
                    parts: Mutex::new(Vec::new()),
                }) as BoxedAny)
            }))
            .with_method(
                MethodDirective::new("install", move |instance, args| {
                    installs.fetch_add(1, Ordering::SeqCst);
                    let assembly = instance
                        .downcast_ref::<Assembly>()
                        .ok_or_else(|| anyhow::anyhow!("install received a foreign instance"))?;
                    assembly.parts.lock().push(args.get::<Part>(0)?);
                    Ok(())
                })
                .with_target(Target::method_parameter::<Part>("part")),
            )
    }

    #[test]
    #[traced_test]
    fn test_method_injection() {
        let installs = Arc::new(AtomicU8::new(0));

        let kernel = Kernel::builder()
            .bind(Binding::to_method(TypeInfo::of::<Part>(), |_| Ok(Some(Box::new(Part) as BoxedAny))).build())
            .bind(Binding::to_type(TypeInfo::of::<Assembly>(), TypeInfo::of::<Assembly>()).build())
            .register_plan::<Assembly>({
                let installs = installs.clone();
                move || assembly_plan(installs.clone())
            })
            .build();

        let assembly = kernel.get::<Assembly>().unwrap();
        assert_eq!(assembly.parts.lock().len(), 1);
        assert_eq!(installs.load(Ordering::SeqCst), 1);
    }

    #[test]
    #[traced_test]
    fn test_method_injection_is_all_or_nothing() {
        let installs = Arc::new(AtomicU8::new(0));

        let kernel = Kernel::builder()
            .bind(Binding::to_type(TypeInfo::of::<Assembly>(), TypeInfo::of::<Assembly>()).build())
            .register_plan::<Assembly>({
                let installs = installs.clone();
                move || assembly_plan(installs.clone())
            })
            .build();

        let err = kernel.get::<Assembly>().unwrap_err();
        assert!(matches!(err, ResolveErrorKind::Activation(_)));
        // The injector never ran: its targets could not all be resolved.
        assert_eq!(installs.load(Ordering::SeqCst), 0);
    }

    #[derive(Debug)]
    struct Ouroboros {
        _inner: Arc<Ouroboros>,
    }

    fn ouroboros_kernel(settings: Settings) -> Kernel {
        Kernel::builder()
            .bind(Binding::to_type(TypeInfo::of::<Ouroboros>(), TypeInfo::of::<Ouroboros>()).build())
            .register_plan::<Ouroboros>(|| {
                Plan::new(TypeInfo::of::<Ouroboros>()).with_constructor(
                    ConstructorDirective::new(|_, args| {
                        Ok(Box::new(Ouroboros {
                            _inner: args.get::<Ouroboros>(0)?,
                        }) as BoxedAny)
                    })
                    .with_target(Target::parameter::<Ouroboros>("inner")),
                )
            })
            .with_settings(settings)
            .build()
    }

    #[test]
    #[traced_test]
    fn test_depth_bound_stops_runaway_recursion() {
        let kernel = ouroboros_kernel(Settings {
            max_depth: 4,
            ..Settings::default()
        });

        let err = root_cause(kernel.get::<Ouroboros>().unwrap_err());
        assert!(matches!(err, ResolveErrorKind::DepthExceeded { limit: 4, .. }));
    }

    #[test]
    #[traced_test]
    fn test_cycle_detection_when_enabled() {
        let kernel = ouroboros_kernel(Settings {
            detect_cycles: true,
            ..Settings::default()
        });

        let err = root_cause(kernel.get::<Ouroboros>().unwrap_err());
        assert!(matches!(err, ResolveErrorKind::CyclicDependency { chain } if chain.len() == 2));
    }

    #[derive(Debug)]
    struct Nail;

    #[test]
    #[traced_test]
    fn test_constructor_arguments_for_zero_argument_constructor() {
        let kernel = Kernel::builder()
            .bind(Binding::to_type(TypeInfo::of::<Nail>(), TypeInfo::of::<Nail>()).build())
            .register_plan::<Nail>(|| {
                Plan::new(TypeInfo::of::<Nail>()).with_constructor(ConstructorDirective::new(|_, _| Ok(Box::new(Nail) as BoxedAny)))
            })
            .build();

        let err = kernel
            .get_with::<Nail>([Parameter::constructor_argument("length", 3u8)])
            .unwrap_err();
        assert!(matches!(
            err,
            ResolveErrorKind::Instantiator(InstantiateErrorKind::UnexpectedConstructorArguments { .. })
        ));
    }

    #[derive(Debug)]
    struct Ghost;

    #[test]
    #[traced_test]
    fn test_optional_request_yields_nothing() {
        let kernel = Kernel::builder().build();

        assert!(kernel.try_get::<Ghost>().unwrap().is_none());
        assert!(matches!(
            kernel.get::<Ghost>(),
            Err(ResolveErrorKind::Unresolved { .. })
        ));
    }

    struct Socket(u8);
    struct Lamp {
        socket: Arc<Socket>,
    }

    #[test]
    #[traced_test]
    fn test_inherited_parameter_flows_to_dependencies() {
        let kernel = Kernel::builder()
            .bind(Binding::to_type(TypeInfo::of::<Socket>(), TypeInfo::of::<Socket>()).build())
            .bind(Binding::to_type(TypeInfo::of::<Lamp>(), TypeInfo::of::<Lamp>()).build())
            .register_plan::<Socket>(|| {
                Plan::new(TypeInfo::of::<Socket>()).with_constructor(
                    ConstructorDirective::new(|_, args| Ok(Box::new(Socket(*args.get::<u8>(0)?)) as BoxedAny))
                        .with_target(Target::parameter::<u8>("voltage")),
                )
            })
            .register_plan::<Lamp>(|| {
                Plan::new(TypeInfo::of::<Lamp>()).with_constructor(
                    ConstructorDirective::new(|_, args| {
                        Ok(Box::new(Lamp {
                            socket: args.get::<Socket>(0)?,
                        }) as BoxedAny)
                    })
                    .with_target(Target::parameter::<Socket>("socket")),
                )
            })
            .build();

        let lamp = kernel
            .get_with::<Lamp>([Parameter::constructor_argument("voltage", 5u8).inherited()])
            .unwrap();
        assert_eq!(lamp.socket.0, 5);
    }

    #[test]
    #[traced_test]
    fn test_none_provider_result() {
        let kernel = Kernel::builder()
            .bind(Binding::to_method(TypeInfo::of::<Ghost>(), |_| Ok(None)).build())
            .build();
        assert!(matches!(
            kernel.get::<Ghost>(),
            Err(ResolveErrorKind::Instantiator(InstantiateErrorKind::NoneInstance))
        ));

        let permissive = Kernel::builder()
            .bind(Binding::to_method(TypeInfo::of::<Ghost>(), |_| Ok(None)).build())
            .with_settings(Settings {
                allow_none: true,
                ..Settings::default()
            })
            .build();
        assert!(matches!(
            permissive.get::<Ghost>(),
            Err(ResolveErrorKind::Unresolved { .. })
        ));
    }

    #[test]
    #[traced_test]
    fn test_provider_failure_propagates() {
        let kernel = Kernel::builder()
            .bind(
                Binding::to_method(TypeInfo::of::<Ghost>(), |_| {
                    Err(InstantiateErrorKind::Custom(anyhow::anyhow!("forge is cold")))
                })
                .build(),
            )
            .build();

        let err = kernel.get::<Ghost>().unwrap_err();
        assert!(matches!(
            err,
            ResolveErrorKind::Instantiator(InstantiateErrorKind::Custom(_))
        ));
    }

    #[test]
    #[traced_test]
    fn test_initialization_callback_replaces_instance() {
        let kernel = Kernel::builder()
            .bind(
                Binding::to_method(TypeInfo::of::<Coin>(), |_| Ok(Some(Box::new(Coin(1)) as BoxedAny)))
                    .in_scope(scope::singleton())
                    .on_initialization(|_, _| Arc::new(Coin(9)))
                    .build(),
            )
            .build();

        assert_eq!(kernel.get::<Coin>().unwrap().0, 9);
        // The cache observed the replacement through the shared cell.
        assert_eq!(kernel.get::<Coin>().unwrap().0, 9);
    }

    struct OrderedStrategy {
        label: &'static str,
        log: Arc<Mutex<Vec<&'static str>>>,
    }

    impl ActivationStrategy for OrderedStrategy {
        fn activate(&self, _context: &Context, _instance: &InstanceRef) -> Result<(), ActivationErrorKind> {
            self.log.lock().push(self.label);
            Ok(())
        }
    }

    #[test]
    #[traced_test]
    fn test_activation_strategy_order() {
        let log = Arc::new(Mutex::new(Vec::new()));

        let kernel = Kernel::builder()
            .bind(
                Binding::to_method(TypeInfo::of::<Coin>(), |_| Ok(Some(Box::new(Coin(1)) as BoxedAny)))
                    .on_activation({
                        let log = log.clone();
                        move |_, _| log.lock().push("binding")
                    })
                    .build(),
            )
            .add_activation_strategy(OrderedStrategy {
                label: "first",
                log: log.clone(),
            })
            .add_activation_strategy(OrderedStrategy {
                label: "second",
                log: log.clone(),
            })
            .build();

        kernel.get::<Coin>().unwrap();
        assert_eq!(*log.lock(), ["binding", "first", "second"]);
    }

    #[test]
    #[traced_test]
    fn test_thread_safe() {
        fn impl_bounds<T: Send + Sync + 'static>() {}
        impl_bounds::<Kernel>();

        let kernel = Kernel::builder()
            .bind(
                Binding::to_type(TypeInfo::of::<Sword>(), TypeInfo::of::<Sword>())
                    .in_scope(scope::singleton())
                    .build(),
            )
            .register_plan::<Sword>(sword_plan)
            .build();

        let handle = std::thread::spawn({
            let kernel = kernel.clone();
            move || kernel.get::<Sword>().unwrap()
        });
        let local = kernel.get::<Sword>().unwrap();
        let remote = handle.join().unwrap();

        assert!(Arc::ptr_eq(&local, &remote));
    }

    struct Torch;

    #[test]
    #[traced_test]
    fn test_per_thread_scope() {
        let kernel = Kernel::builder()
            .bind(
                Binding::to_method(TypeInfo::of::<Torch>(), |_| Ok(Some(Box::new(Torch) as BoxedAny)))
                    .in_scope(scope::per_thread())
                    .build(),
            )
            .build();

        let first = kernel.get::<Torch>().unwrap();
        let second = kernel.get::<Torch>().unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let remote = std::thread::spawn({
            let kernel = kernel.clone();
            move || kernel.get::<Torch>().unwrap()
        })
        .join()
        .unwrap();
        assert!(!Arc::ptr_eq(&first, &remote));
        assert_eq!(kernel.cached_entry_count(), 2);

        // The worker thread died and took its scope with it.
        kernel.prune();
        assert_eq!(kernel.cached_entry_count(), 1);
    }

    #[test]
    #[traced_test]
    fn test_kernel_drop_deactivates_cached_instances() {
        let deactivations = Arc::new(AtomicU8::new(0));

        let kernel = Kernel::builder()
            .bind(
                Binding::to_type(TypeInfo::of::<Sword>(), TypeInfo::of::<Sword>())
                    .in_scope(scope::singleton())
                    .on_deactivation({
                        let deactivations = deactivations.clone();
                        move |_, _| {
                            deactivations.fetch_add(1, Ordering::SeqCst);
                        }
                    })
                    .build(),
            )
            .register_plan::<Sword>(sword_plan)
            .build();

        let _sword = kernel.get::<Sword>().unwrap();
        assert_eq!(deactivations.load(Ordering::SeqCst), 0);

        drop(kernel);
        assert_eq!(deactivations.load(Ordering::SeqCst), 1);
    }
}
