use std::{collections::BTreeMap, sync::Arc};

use crate::{
    any::{BoxedAny, SharedAny, TypeInfo},
    context::Context,
    errors::InstantiateErrorKind,
    parameter::Parameter,
    provider::{CallbackProvider, ConstantProvider, Provider, StandardProvider},
    request::Request,
    scope::{self, ScopeSelector},
};

/// What a binding routes construction to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BindingTarget {
    /// A plan-driven implementation type.
    Type,
    /// A pre-existing value.
    Constant,
    /// A factory callback.
    Method,
    /// A caller-supplied provider.
    Provider,
    /// The service type constructing itself.
    SelfBinding,
}

/// Name and arbitrary key/value pairs attached to a binding, inspected by
/// request constraints and condition predicates.
#[derive(Clone, Default)]
pub struct BindingMetadata {
    name: Option<&'static str>,
    extras: BTreeMap<&'static str, SharedAny>,
}

impl BindingMetadata {
    #[inline]
    #[must_use]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    #[must_use]
    pub fn has(&self, key: &str) -> bool {
        self.extras.contains_key(key)
    }

    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<Arc<T>> {
        self.extras.get(key).and_then(|value| value.clone().downcast().ok())
    }
}

pub(crate) type Condition = Arc<dyn Fn(&Request) -> bool + Send + Sync>;
pub(crate) type ActivationAction = Arc<dyn Fn(&Context, &SharedAny) + Send + Sync>;
pub(crate) type InitializationAction = Arc<dyn Fn(&Context, SharedAny) -> SharedAny + Send + Sync>;

/// Declarative rule mapping a service type to a construction strategy and a
/// scope. Immutable once built; identity follows the shared configuration,
/// so clones of one binding cache under the same key.
#[derive(Clone)]
pub struct Binding {
    service: TypeInfo,
    config: Arc<BindingConfig>,
}

#[derive(Clone)]
pub(crate) struct BindingConfig {
    provider: Arc<dyn Provider>,
    scope: ScopeSelector,
    target: BindingTarget,
    condition: Option<Condition>,
    metadata: BindingMetadata,
    parameters: Vec<Parameter>,
    on_activation: Vec<ActivationAction>,
    on_deactivation: Vec<ActivationAction>,
    on_initialization: Vec<InitializationAction>,
    implicit: bool,
}

impl Binding {
    /// Binds `service` to a plan-driven `implementation` type.
    #[must_use]
    pub fn to_type(service: TypeInfo, implementation: TypeInfo) -> BindingBuilder {
        BindingBuilder::new(service, BindingTarget::Type, Arc::new(StandardProvider::new(implementation)))
    }

    /// Binds a concrete service type to itself.
    #[must_use]
    pub fn to_self(service: TypeInfo) -> BindingBuilder {
        BindingBuilder::new(service, BindingTarget::SelfBinding, Arc::new(StandardProvider::new(service)))
    }

    /// Binds `service` to a value created outside the kernel.
    /// Constants default to singleton scope; everything else is transient.
    #[must_use]
    pub fn to_constant<T: Send + Sync + 'static>(service: TypeInfo, value: T) -> BindingBuilder {
        let provider = ConstantProvider::new(TypeInfo::of::<T>(), Arc::new(value));
        let mut builder = BindingBuilder::new(service, BindingTarget::Constant, Arc::new(provider));
        builder.scope = scope::singleton();
        builder
    }

    /// Binds `service` to a factory callback.
    #[must_use]
    pub fn to_method(
        service: TypeInfo,
        method: impl Fn(&Context) -> Result<Option<BoxedAny>, InstantiateErrorKind> + Send + Sync + 'static,
    ) -> BindingBuilder {
        let provider = CallbackProvider::new(service, method);
        BindingBuilder::new(service, BindingTarget::Method, Arc::new(provider))
    }

    /// Binds `service` to a caller-supplied provider.
    #[must_use]
    pub fn to_provider(service: TypeInfo, provider: impl Provider + 'static) -> BindingBuilder {
        BindingBuilder::new(service, BindingTarget::Provider, Arc::new(provider))
    }

    #[inline]
    #[must_use]
    pub fn service(&self) -> TypeInfo {
        self.service
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> BindingTarget {
        self.config.target
    }

    #[inline]
    #[must_use]
    pub fn metadata(&self) -> &BindingMetadata {
        &self.config.metadata
    }

    #[inline]
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn Provider> {
        &self.config.provider
    }

    #[inline]
    #[must_use]
    pub fn scope_selector(&self) -> &ScopeSelector {
        &self.config.scope
    }

    #[inline]
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.config.parameters
    }

    #[inline]
    #[must_use]
    pub fn is_conditional(&self) -> bool {
        self.config.condition.is_some()
    }

    #[inline]
    #[must_use]
    pub fn is_implicit(&self) -> bool {
        self.config.implicit
    }

    /// Whether the condition predicate, if any, accepts `request`.
    #[must_use]
    pub fn matches(&self, request: &Request) -> bool {
        self.config.condition.as_ref().map_or(true, |condition| condition(request))
    }

    #[inline]
    #[must_use]
    pub(crate) fn id(&self) -> usize {
        Arc::as_ptr(&self.config) as usize
    }

    #[inline]
    pub(crate) fn on_activation(&self) -> &[ActivationAction] {
        &self.config.on_activation
    }

    #[inline]
    pub(crate) fn on_deactivation(&self) -> &[ActivationAction] {
        &self.config.on_deactivation
    }

    #[inline]
    pub(crate) fn on_initialization(&self) -> &[InitializationAction] {
        &self.config.on_initialization
    }

    /// A copy of this binding serving `service`, marked implicit. Used by
    /// the open-generic resolver to close a definition binding over the
    /// requested service; the copy gets its own identity so reified services
    /// cache separately from each other.
    #[must_use]
    pub(crate) fn reified_for(&self, service: TypeInfo) -> Binding {
        let mut config = (*self.config).clone();
        config.implicit = true;
        Binding {
            service,
            config: Arc::new(config),
        }
    }
}

/// Assembles an immutable [`Binding`]. This is the data-model boundary the
/// configuration layer talks to, not a fluent DSL.
pub struct BindingBuilder {
    service: TypeInfo,
    target: BindingTarget,
    provider: Arc<dyn Provider>,
    scope: ScopeSelector,
    condition: Option<Condition>,
    metadata: BindingMetadata,
    parameters: Vec<Parameter>,
    on_activation: Vec<ActivationAction>,
    on_deactivation: Vec<ActivationAction>,
    on_initialization: Vec<InitializationAction>,
    implicit: bool,
}

impl BindingBuilder {
    fn new(service: TypeInfo, target: BindingTarget, provider: Arc<dyn Provider>) -> Self {
        Self {
            service,
            target,
            provider,
            scope: scope::transient(),
            condition: None,
            metadata: BindingMetadata::default(),
            parameters: Vec::new(),
            on_activation: Vec::new(),
            on_deactivation: Vec::new(),
            on_initialization: Vec::new(),
            implicit: false,
        }
    }

    #[must_use]
    pub fn in_scope(mut self, scope: ScopeSelector) -> Self {
        self.scope = scope;
        self
    }

    #[must_use]
    pub fn named(mut self, name: &'static str) -> Self {
        self.metadata.name = Some(name);
        self
    }

    #[must_use]
    pub fn with_metadata<T: Send + Sync + 'static>(mut self, key: &'static str, value: T) -> Self {
        self.metadata.extras.insert(key, Arc::new(value));
        self
    }

    /// Restricts the binding to requests accepted by `condition`. Conditions
    /// may inspect the target member, the ancestor chain and ancestor
    /// binding metadata through the request.
    #[must_use]
    pub fn when(mut self, condition: impl Fn(&Request) -> bool + Send + Sync + 'static) -> Self {
        self.condition = Some(Arc::new(condition));
        self
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    #[must_use]
    pub fn on_activation(mut self, action: impl Fn(&Context, &SharedAny) + Send + Sync + 'static) -> Self {
        self.on_activation.push(Arc::new(action));
        self
    }

    #[must_use]
    pub fn on_deactivation(mut self, action: impl Fn(&Context, &SharedAny) + Send + Sync + 'static) -> Self {
        self.on_deactivation.push(Arc::new(action));
        self
    }

    /// Runs at construction time; may replace the instance, e.g. to wrap it.
    #[must_use]
    pub fn on_initialization(mut self, action: impl Fn(&Context, SharedAny) -> SharedAny + Send + Sync + 'static) -> Self {
        self.on_initialization.push(Arc::new(action));
        self
    }

    #[must_use]
    pub(crate) fn implicit(mut self) -> Self {
        self.implicit = true;
        self
    }

    #[must_use]
    pub fn build(self) -> Binding {
        Binding {
            service: self.service,
            config: Arc::new(BindingConfig {
                provider: self.provider,
                scope: self.scope,
                target: self.target,
                condition: self.condition,
                metadata: self.metadata,
                parameters: self.parameters,
                on_activation: self.on_activation,
                on_deactivation: self.on_deactivation,
                on_initialization: self.on_initialization,
                implicit: self.implicit,
            }),
        }
    }
}
