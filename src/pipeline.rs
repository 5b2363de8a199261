use core::any::Any;
use std::{collections::BTreeSet, sync::Arc};

use parking_lot::Mutex;
use tracing::debug;

use crate::{
    any::{identity, SharedAny},
    context::Context,
    errors::{ActivationErrorKind, InstantiateErrorKind},
    parameter::ParameterKind,
    plan::Plan,
    provider::resolve_targets,
};

/// Mutable cell wrapping the instance currently moving through the pipeline.
/// The scope cache stores the same cell, so a strategy replacing the value
/// is observed by later lookups.
#[derive(Clone)]
pub struct InstanceRef {
    cell: Arc<Mutex<SharedAny>>,
}

impl InstanceRef {
    #[must_use]
    pub(crate) fn new(instance: SharedAny) -> Self {
        Self {
            cell: Arc::new(Mutex::new(instance)),
        }
    }

    #[must_use]
    pub fn get(&self) -> SharedAny {
        self.cell.lock().clone()
    }

    /// Replaces the wrapped instance, e.g. with a decorated form of it.
    pub fn set(&self, instance: SharedAny) {
        *self.cell.lock() = instance;
    }

    /// Identity of the currently wrapped instance.
    #[must_use]
    pub fn identity(&self) -> usize {
        identity(&self.cell.lock())
    }
}

/// Identity sets guaranteeing at-most-once activation and deactivation of
/// any instance within one pass. This is what breaks object-graph cycles:
/// two mutually referencing instances are each processed exactly once even
/// though each appears as a dependency of the other. One cache lives for a
/// single top-level resolution (activation side) or a single release/prune
/// pass (deactivation side), so the sets never grow unbounded and never
/// leak across unrelated concurrent passes.
pub struct ActivationCache {
    activated: Mutex<BTreeSet<usize>>,
    deactivated: Mutex<BTreeSet<usize>>,
}

impl ActivationCache {
    #[must_use]
    pub fn new() -> Self {
        Self {
            activated: Mutex::new(BTreeSet::new()),
            deactivated: Mutex::new(BTreeSet::new()),
        }
    }

    /// Returns `false` if the instance was already marked.
    pub(crate) fn mark_activated(&self, instance: usize) -> bool {
        self.activated.lock().insert(instance)
    }

    pub(crate) fn mark_deactivated(&self, instance: usize) -> bool {
        self.deactivated.lock().insert(instance)
    }

    #[must_use]
    pub fn is_activated(&self, instance: &SharedAny) -> bool {
        self.activated.lock().contains(&identity(instance))
    }

    #[must_use]
    pub fn is_deactivated(&self, instance: &SharedAny) -> bool {
        self.deactivated.lock().contains(&identity(instance))
    }
}

impl Default for ActivationCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs once per construction, before the instance reaches any caller; may
/// replace the wrapped instance.
pub trait InitializationStrategy: Send + Sync {
    fn initialize(&self, context: &Context, instance: &InstanceRef) -> Result<(), ActivationErrorKind>;
}

pub trait ActivationStrategy: Send + Sync {
    fn activate(&self, context: &Context, instance: &InstanceRef) -> Result<(), ActivationErrorKind>;
}

pub trait DeactivationStrategy: Send + Sync {
    fn deactivate(&self, context: &Context, instance: &InstanceRef) -> Result<(), ActivationErrorKind>;
}

/// Three independently ordered strategy lists. Initialization runs exactly
/// once per construction and is not deduplicated; activation and
/// deactivation mark the instance before running, so re-entry through a
/// graph cycle is a no-op. Strategy failures propagate unwrapped.
pub(crate) struct Pipeline {
    initialization: Vec<Arc<dyn InitializationStrategy>>,
    activation: Vec<Arc<dyn ActivationStrategy>>,
    deactivation: Vec<Arc<dyn DeactivationStrategy>>,
}

impl Pipeline {
    #[must_use]
    pub(crate) fn new(
        initialization: Vec<Arc<dyn InitializationStrategy>>,
        activation: Vec<Arc<dyn ActivationStrategy>>,
        deactivation: Vec<Arc<dyn DeactivationStrategy>>,
    ) -> Self {
        Self {
            initialization,
            activation,
            deactivation,
        }
    }

    pub(crate) fn initialize(&self, context: &Context, instance: &InstanceRef) -> Result<(), ActivationErrorKind> {
        for strategy in &self.initialization {
            strategy.initialize(context, instance)?;
        }
        Ok(())
    }

    pub(crate) fn activate(
        &self,
        context: &Context,
        instance: &InstanceRef,
        cache: &ActivationCache,
    ) -> Result<(), ActivationErrorKind> {
        if !cache.mark_activated(instance.identity()) {
            debug!("Already activated");
            return Ok(());
        }

        for strategy in &self.activation {
            strategy.activate(context, instance)?;
        }
        Ok(())
    }

    pub(crate) fn deactivate(
        &self,
        context: &Context,
        instance: &InstanceRef,
        cache: &ActivationCache,
    ) -> Result<(), ActivationErrorKind> {
        if !cache.mark_deactivated(instance.identity()) {
            debug!("Already deactivated");
            return Ok(());
        }

        for strategy in &self.deactivation {
            strategy.deactivate(context, instance)?;
        }
        Ok(())
    }
}

/// The plan guiding injection of `instance`: the one the provider already
/// looked up, or the registered plan for the instance's concrete type (the
/// latter covers constants and externally supplied instances).
fn plan_for_instance(context: &Context, instance: &SharedAny) -> Option<Arc<Plan>> {
    context
        .plan()
        .or_else(|| context.kernel().plan_if_registered(&(**instance).type_id()))
}

/// Built-in initialization strategy performing property injection with the
/// explicit-value conflict policy.
pub(crate) struct PropertyInjection;

impl InitializationStrategy for PropertyInjection {
    fn initialize(&self, context: &Context, instance: &InstanceRef) -> Result<(), ActivationErrorKind> {
        let instance = instance.get();
        let plan = plan_for_instance(context, &instance);
        let properties = plan.as_deref().map_or(&[][..], Plan::properties);

        let parameters: Vec<_> = context
            .parameters()
            .filter(|parameter| parameter.kind() == ParameterKind::PropertyValue)
            .collect();
        let mut parameter_used = vec![false; parameters.len()];

        // The first policy failure is reported, but only after every other
        // property had its chance to be injected.
        let mut failure: Option<InstantiateErrorKind> = None;
        let mut fail = |err: InstantiateErrorKind| {
            if failure.is_none() {
                failure = Some(err);
            }
        };

        for directive in properties {
            let target = directive.target();
            let applicable: Vec<usize> = parameters
                .iter()
                .enumerate()
                .filter(|(_, parameter)| parameter.applies_to(target))
                .map(|(index, _)| index)
                .collect();

            match applicable.as_slice() {
                [] => match context.kernel().resolve_target_in(context, target) {
                    Ok(Some(value)) => directive.inject(&instance, value)?,
                    Ok(None) => {}
                    Err(err) => fail(InstantiateErrorKind::Property {
                        property: target.name(),
                        source: Box::new(err),
                    }),
                },
                [index] => {
                    parameter_used[*index] = true;
                    match parameters[*index].value(context, target) {
                        Ok(Some(value)) => directive.inject(&instance, SharedAny::from(value))?,
                        Ok(None) => {
                            if !target.is_optional() && !context.kernel().settings().allow_none {
                                fail(InstantiateErrorKind::NoneInstance);
                            }
                        }
                        Err(err) => fail(err),
                    }
                }
                conflict => fail(InstantiateErrorKind::AmbiguousPropertyValue {
                    property: target.name(),
                    count: conflict.len(),
                }),
            }
        }

        for (index, parameter) in parameters.iter().enumerate() {
            if !parameter_used[index] && !properties.iter().any(|directive| parameter.applies_to(directive.target())) {
                fail(InstantiateErrorKind::UnmatchedPropertyValue {
                    parameter: parameter.name(),
                });
            }
        }

        match failure {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}

/// Built-in initialization strategy performing method injection. Each
/// directive resolves all of its targets before its injector runs; a
/// resolution failure aborts without invoking the injector.
pub(crate) struct MethodInjection;

impl InitializationStrategy for MethodInjection {
    fn initialize(&self, context: &Context, instance: &InstanceRef) -> Result<(), ActivationErrorKind> {
        let instance = instance.get();
        let Some(plan) = plan_for_instance(context, &instance) else {
            return Ok(());
        };

        for directive in plan.methods() {
            let values = resolve_targets(context, directive.targets())?;
            directive.invoke(&instance, &values)?;
            debug!(method = directive.name(), "Method injected");
        }
        Ok(())
    }
}

/// Runs the binding's initialization callbacks; each may replace the value.
pub(crate) struct BindingInitializers;

impl InitializationStrategy for BindingInitializers {
    fn initialize(&self, context: &Context, instance: &InstanceRef) -> Result<(), ActivationErrorKind> {
        for action in context.binding().on_initialization() {
            let replaced = action(context, instance.get());
            instance.set(replaced);
        }
        Ok(())
    }
}

/// Runs the binding's activation callbacks in declared order.
pub(crate) struct BindingActivators;

impl ActivationStrategy for BindingActivators {
    fn activate(&self, context: &Context, instance: &InstanceRef) -> Result<(), ActivationErrorKind> {
        let value = instance.get();
        for action in context.binding().on_activation() {
            action(context, &value);
        }
        Ok(())
    }
}

/// Runs the binding's deactivation callbacks in declared order.
pub(crate) struct BindingDeactivators;

impl DeactivationStrategy for BindingDeactivators {
    fn deactivate(&self, context: &Context, instance: &InstanceRef) -> Result<(), ActivationErrorKind> {
        let value = instance.get();
        for action in context.binding().on_deactivation() {
            action(context, &value);
        }
        Ok(())
    }
}
