use core::any::TypeId;
use std::{collections::BTreeMap, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    any::{BoxedAny, SharedAny, TypeInfo},
    context::Context,
    errors::{InstantiateErrorKind, PlanErrorKind},
    target::Target,
};

/// Values resolved for a constructor or method directive, positionally
/// aligned with its targets. `None` marks an optional target that resolved
/// to nothing.
pub struct Args<'a>(pub(crate) &'a [Option<SharedAny>]);

impl Args<'_> {
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The value at `index`, required to be present and of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self, index: usize) -> Result<Arc<T>, InstantiateErrorKind> {
        match self.0.get(index) {
            Some(Some(value)) => value.clone().downcast().map_err(|_| InstantiateErrorKind::IncorrectArgument {
                index,
                expected: TypeInfo::of::<T>(),
            }),
            _ => Err(InstantiateErrorKind::MissingArgument {
                index,
                expected: TypeInfo::of::<T>(),
            }),
        }
    }

    /// The value at `index` if one was resolved.
    pub fn opt<T: Send + Sync + 'static>(&self, index: usize) -> Result<Option<Arc<T>>, InstantiateErrorKind> {
        match self.0.get(index) {
            Some(Some(value)) => value
                .clone()
                .downcast()
                .map(Some)
                .map_err(|_| InstantiateErrorKind::IncorrectArgument {
                    index,
                    expected: TypeInfo::of::<T>(),
                }),
            _ => Ok(None),
        }
    }
}

pub type ConstructorInjector = Arc<dyn Fn(&Context, Args<'_>) -> Result<BoxedAny, InstantiateErrorKind> + Send + Sync>;
pub type PropertyInjector = Arc<dyn Fn(&SharedAny, SharedAny) -> Result<(), InstantiateErrorKind> + Send + Sync>;
pub type MethodInjector = Arc<dyn Fn(&SharedAny, Args<'_>) -> Result<(), InstantiateErrorKind> + Send + Sync>;

/// Overrides the satisfiability score of a constructor directive.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ScoreHint {
    #[default]
    Neutral,
    Highest,
    Lowest,
}

pub struct ConstructorDirective {
    targets: Vec<Target>,
    injector: ConstructorInjector,
    hint: ScoreHint,
}

impl ConstructorDirective {
    #[must_use]
    pub fn new(injector: impl Fn(&Context, Args<'_>) -> Result<BoxedAny, InstantiateErrorKind> + Send + Sync + 'static) -> Self {
        Self {
            targets: Vec::new(),
            injector: Arc::new(injector),
            hint: ScoreHint::default(),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    #[must_use]
    pub fn with_hint(mut self, hint: ScoreHint) -> Self {
        self.hint = hint;
        self
    }

    #[inline]
    #[must_use]
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    #[inline]
    #[must_use]
    pub fn hint(&self) -> ScoreHint {
        self.hint
    }

    pub(crate) fn invoke(&self, context: &Context, values: &[Option<SharedAny>]) -> Result<BoxedAny, InstantiateErrorKind> {
        (self.injector)(context, Args(values))
    }
}

pub struct PropertyDirective {
    target: Target,
    injector: PropertyInjector,
}

impl PropertyDirective {
    #[must_use]
    pub fn new(target: Target, injector: impl Fn(&SharedAny, SharedAny) -> Result<(), InstantiateErrorKind> + Send + Sync + 'static) -> Self {
        Self {
            target,
            injector: Arc::new(injector),
        }
    }

    /// Typed shorthand: a property named `name` of value type `V` on
    /// instances of `T`, written through `setter`. Post-construction wiring
    /// goes through `&T`, so cyclic properties use interior mutability.
    #[must_use]
    pub fn setter<T, V>(name: &'static str, setter: impl Fn(&T, Arc<V>) + Send + Sync + 'static) -> Self
    where
        T: Send + Sync + 'static,
        V: Send + Sync + 'static,
    {
        Self::new(Target::property::<V>(name), move |instance, value| {
            let instance = instance
                .downcast_ref::<T>()
                .ok_or_else(|| anyhow::anyhow!("property `{name}` injector received a foreign instance"))?;
            let value = value
                .downcast::<V>()
                .map_err(|_| anyhow::anyhow!("property `{name}` received a value of the wrong type"))?;
            setter(instance, value);
            Ok(())
        })
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> &Target {
        &self.target
    }

    pub(crate) fn inject(&self, instance: &SharedAny, value: SharedAny) -> Result<(), InstantiateErrorKind> {
        (self.injector)(instance, value)
    }
}

pub struct MethodDirective {
    name: &'static str,
    targets: Vec<Target>,
    injector: MethodInjector,
}

impl MethodDirective {
    #[must_use]
    pub fn new(
        name: &'static str,
        injector: impl Fn(&SharedAny, Args<'_>) -> Result<(), InstantiateErrorKind> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name,
            targets: Vec::new(),
            injector: Arc::new(injector),
        }
    }

    #[must_use]
    pub fn with_target(mut self, target: Target) -> Self {
        self.targets.push(target);
        self
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    #[must_use]
    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub(crate) fn invoke(&self, instance: &SharedAny, values: &[Option<SharedAny>]) -> Result<(), InstantiateErrorKind> {
        (self.injector)(instance, Args(values))
    }
}

/// Cached, per-type description of how to construct and inject an instance:
/// the explicit capability descriptor that stands in for runtime reflection.
/// Built at most once per implementation type, then shared read-only.
pub struct Plan {
    implementation: TypeInfo,
    constructors: Vec<ConstructorDirective>,
    properties: Vec<PropertyDirective>,
    methods: Vec<MethodDirective>,
}

impl Plan {
    #[must_use]
    pub fn new(implementation: TypeInfo) -> Self {
        Self {
            implementation,
            constructors: Vec::new(),
            properties: Vec::new(),
            methods: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_constructor(mut self, directive: ConstructorDirective) -> Self {
        self.constructors.push(directive);
        self
    }

    #[must_use]
    pub fn with_property(mut self, directive: PropertyDirective) -> Self {
        self.properties.push(directive);
        self
    }

    #[must_use]
    pub fn with_method(mut self, directive: MethodDirective) -> Self {
        self.methods.push(directive);
        self
    }

    #[inline]
    #[must_use]
    pub fn implementation(&self) -> TypeInfo {
        self.implementation
    }

    #[inline]
    #[must_use]
    pub fn constructors(&self) -> &[ConstructorDirective] {
        &self.constructors
    }

    #[inline]
    #[must_use]
    pub fn properties(&self) -> &[PropertyDirective] {
        &self.properties
    }

    #[inline]
    #[must_use]
    pub fn methods(&self) -> &[MethodDirective] {
        &self.methods
    }
}

pub type PlanFactory = Box<dyn Fn() -> Plan + Send + Sync>;

/// Lazily builds plans from registered factories, at most once per type.
/// The factory runs under the cache lock: competing threads block and then
/// observe the one built plan.
pub(crate) struct Planner {
    factories: BTreeMap<TypeId, PlanFactory>,
    built: Mutex<BTreeMap<TypeId, Arc<Plan>>>,
}

impl Planner {
    #[must_use]
    pub(crate) fn new(factories: BTreeMap<TypeId, PlanFactory>) -> Self {
        Self {
            factories,
            built: Mutex::new(BTreeMap::new()),
        }
    }

    #[inline]
    #[must_use]
    pub(crate) fn is_planned(&self, id: &TypeId) -> bool {
        self.factories.contains_key(id)
    }

    pub(crate) fn plan_for(&self, implementation: TypeInfo) -> Result<Arc<Plan>, PlanErrorKind> {
        self.plan_if_registered(&implementation.id)
            .ok_or(PlanErrorKind::MissingPlan { implementation })
    }

    pub(crate) fn plan_if_registered(&self, id: &TypeId) -> Option<Arc<Plan>> {
        let mut built = self.built.lock();
        if let Some(plan) = built.get(id) {
            return Some(plan.clone());
        }

        let factory = self.factories.get(id)?;
        let plan = Arc::new(factory());
        debug!(implementation = plan.implementation().name, "Plan built");
        built.insert(*id, plan.clone());
        Some(plan)
    }
}
