use std::sync::Arc;

use crate::{
    any::BoxedAny,
    context::Context,
    errors::InstantiateErrorKind,
    target::{MemberKind, Target},
};

/// Kind of injection target a parameter overrides.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ParameterKind {
    /// Applies to constructor and method parameters.
    ConstructorArgument,
    /// Applies to properties.
    PropertyValue,
}

type ValueFactory = Arc<dyn Fn(&Context, &Target) -> Result<Option<BoxedAny>, InstantiateErrorKind> + Send + Sync>;
type TargetPredicate = Arc<dyn Fn(&Target) -> bool + Send + Sync>;

/// Explicit per-request value override. When a parameter applies to an
/// injection target, its value factory is used instead of resolving the
/// target through the binding registry.
#[derive(Clone)]
pub struct Parameter {
    kind: ParameterKind,
    name: &'static str,
    factory: ValueFactory,
    applies: Option<TargetPredicate>,
    inherited: bool,
}

impl Parameter {
    #[must_use]
    pub fn constructor_argument<T>(name: &'static str, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::from_factory(ParameterKind::ConstructorArgument, name, move |_, _| {
            Ok(Some(Box::new(value.clone()) as BoxedAny))
        })
    }

    #[must_use]
    pub fn property_value<T>(name: &'static str, value: T) -> Self
    where
        T: Clone + Send + Sync + 'static,
    {
        Self::from_factory(ParameterKind::PropertyValue, name, move |_, _| {
            Ok(Some(Box::new(value.clone()) as BoxedAny))
        })
    }

    /// A parameter whose value is computed on use, with access to the
    /// resolution context and the target being injected.
    #[must_use]
    pub fn from_factory(
        kind: ParameterKind,
        name: &'static str,
        factory: impl Fn(&Context, &Target) -> Result<Option<BoxedAny>, InstantiateErrorKind> + Send + Sync + 'static,
    ) -> Self {
        Self {
            kind,
            name,
            factory: Arc::new(factory),
            applies: None,
            inherited: false,
        }
    }

    /// Replaces the default "member kind and name match" applicability test.
    #[must_use]
    pub fn when(mut self, applies: impl Fn(&Target) -> bool + Send + Sync + 'static) -> Self {
        self.applies = Some(Arc::new(applies));
        self
    }

    /// Propagates the parameter into child requests, so it also overrides
    /// targets of dependencies resolved further down the graph.
    #[must_use]
    pub fn inherited(mut self) -> Self {
        self.inherited = true;
        self
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> ParameterKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    #[must_use]
    pub fn is_inherited(&self) -> bool {
        self.inherited
    }

    #[must_use]
    pub fn applies_to(&self, target: &Target) -> bool {
        if let Some(applies) = &self.applies {
            return applies(target);
        }

        let member_matches = match self.kind {
            ParameterKind::ConstructorArgument => {
                matches!(target.member(), MemberKind::ConstructorParameter | MemberKind::MethodParameter)
            }
            ParameterKind::PropertyValue => target.member() == MemberKind::Property,
        };
        member_matches && self.name == target.name()
    }

    pub(crate) fn value(&self, context: &Context, target: &Target) -> Result<Option<BoxedAny>, InstantiateErrorKind> {
        (self.factory)(context, target)
    }
}
