use std::sync::Arc;

use tracing::debug;

use crate::{
    any::{BoxedAny, SharedAny, TypeInfo},
    config::ConstructorSelection,
    context::Context,
    errors::{InstantiateErrorKind, PlanErrorKind},
    parameter::ParameterKind,
    plan::{ConstructorDirective, Plan, ScoreHint},
    target::Target,
};

/// Creates instances for a binding. `None` from [`Provider::create`] means
/// the provider deliberately yielded no value; whether that is an error is
/// decided by [`crate::Settings::allow_none`].
pub trait Provider: Send + Sync {
    /// The implementation type this provider yields, used for plan lookup
    /// and diagnostics.
    fn provides(&self) -> TypeInfo;

    fn create(&self, context: &Context) -> Result<Option<SharedAny>, InstantiateErrorKind>;
}

/// Plan-driven construction: selects a constructor directive, resolves its
/// targets and invokes the injector.
pub struct StandardProvider {
    implementation: TypeInfo,
}

impl StandardProvider {
    #[must_use]
    pub fn new(implementation: TypeInfo) -> Self {
        Self { implementation }
    }
}

impl Provider for StandardProvider {
    fn provides(&self) -> TypeInfo {
        self.implementation
    }

    fn create(&self, context: &Context) -> Result<Option<SharedAny>, InstantiateErrorKind> {
        let kernel = context.kernel();
        let plan = kernel.plan_for(self.implementation)?;
        context.set_plan(plan.clone());

        let directive = select_constructor(&plan, context, kernel.settings().constructor_selection)?;
        if directive.targets().is_empty()
            && context
                .parameters()
                .any(|parameter| parameter.kind() == ParameterKind::ConstructorArgument)
        {
            return Err(InstantiateErrorKind::UnexpectedConstructorArguments {
                implementation: self.implementation,
            });
        }

        let values = resolve_targets(context, directive.targets())?;
        let instance = directive.invoke(context, &values)?;
        debug!(implementation = self.implementation.name, "Constructed");

        Ok(Some(Arc::from(instance)))
    }
}

/// Serves a value created outside the kernel. Every resolution observes the
/// same instance.
pub struct ConstantProvider {
    provides: TypeInfo,
    value: SharedAny,
}

impl ConstantProvider {
    #[must_use]
    pub fn new(provides: TypeInfo, value: SharedAny) -> Self {
        Self { provides, value }
    }
}

impl Provider for ConstantProvider {
    fn provides(&self) -> TypeInfo {
        self.provides
    }

    fn create(&self, _context: &Context) -> Result<Option<SharedAny>, InstantiateErrorKind> {
        Ok(Some(self.value.clone()))
    }
}

type Callback = Box<dyn Fn(&Context) -> Result<Option<BoxedAny>, InstantiateErrorKind> + Send + Sync>;

/// Delegates construction to a factory callback.
pub struct CallbackProvider {
    provides: TypeInfo,
    callback: Callback,
}

impl CallbackProvider {
    #[must_use]
    pub fn new(
        provides: TypeInfo,
        callback: impl Fn(&Context) -> Result<Option<BoxedAny>, InstantiateErrorKind> + Send + Sync + 'static,
    ) -> Self {
        Self {
            provides,
            callback: Box::new(callback),
        }
    }
}

impl Provider for CallbackProvider {
    fn provides(&self) -> TypeInfo {
        self.provides
    }

    fn create(&self, context: &Context) -> Result<Option<SharedAny>, InstantiateErrorKind> {
        Ok((self.callback)(context)?.map(SharedAny::from))
    }
}

fn select_constructor<'p>(
    plan: &'p Plan,
    context: &Context,
    mode: ConstructorSelection,
) -> Result<&'p ConstructorDirective, InstantiateErrorKind> {
    let implementation = plan.implementation();
    let directives = plan.constructors();

    match mode {
        ConstructorSelection::Unique => match directives {
            [directive] => Ok(directive),
            [] => Err(PlanErrorKind::NoConstructor { implementation }.into()),
            _ => Err(PlanErrorKind::MultipleConstructors {
                implementation,
                count: directives.len(),
            }
            .into()),
        },
        ConstructorSelection::Scored => {
            if directives.is_empty() {
                return Err(PlanErrorKind::NoConstructor { implementation }.into());
            }

            let scores: Vec<i64> = directives.iter().map(|directive| score(context, directive)).collect();
            let best = *scores.iter().max().expect("at least one directive was scored");
            let at_best = scores.iter().filter(|candidate| **candidate == best).count();
            if at_best > 1 {
                return Err(PlanErrorKind::AmbiguousConstructor {
                    implementation,
                    count: at_best,
                    score: best,
                }
                .into());
            }

            let winner = scores.iter().position(|candidate| *candidate == best).expect("best score exists");
            Ok(&directives[winner])
        }
    }
}

fn score(context: &Context, directive: &ConstructorDirective) -> i64 {
    match directive.hint() {
        ScoreHint::Highest => i64::MAX,
        ScoreHint::Lowest => i64::MIN,
        ScoreHint::Neutral => directive
            .targets()
            .iter()
            .filter(|target| satisfiable(context, target))
            .count() as i64,
    }
}

fn satisfiable(context: &Context, target: &Target) -> bool {
    if context.parameters().any(|parameter| parameter.applies_to(target)) {
        return true;
    }
    if target.is_optional() || target.has_default() {
        return true;
    }
    context.kernel().can_resolve_target(context, target)
}

/// Resolves every target of a directive, positionally. Shared by constructor
/// and method injection.
pub(crate) fn resolve_targets(context: &Context, targets: &[Target]) -> Result<Vec<Option<SharedAny>>, InstantiateErrorKind> {
    let mut values = Vec::with_capacity(targets.len());
    for target in targets {
        values.push(resolve_target(context, target)?);
    }
    Ok(values)
}

/// Resolves one target: the first applicable explicit override wins,
/// otherwise the target's type is resolved through a child request.
pub(crate) fn resolve_target(context: &Context, target: &Target) -> Result<Option<SharedAny>, InstantiateErrorKind> {
    for parameter in context.parameters() {
        if parameter.kind() != ParameterKind::ConstructorArgument || !parameter.applies_to(target) {
            continue;
        }

        return match parameter.value(context, target)? {
            Some(value) => Ok(Some(SharedAny::from(value))),
            None if target.is_optional() || context.kernel().settings().allow_none => Ok(None),
            None => Err(InstantiateErrorKind::NoneInstance),
        };
    }

    context
        .kernel()
        .resolve_target_in(context, target)
        .map_err(|err| InstantiateErrorKind::Dependency {
            target: target.name(),
            source: Box::new(err),
        })
}
