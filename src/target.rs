use std::sync::Arc;

use crate::{
    any::{BoxedAny, TypeInfo},
    request::GenericService,
};

/// Kind of member an injection target belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemberKind {
    ConstructorParameter,
    Property,
    MethodParameter,
}

pub(crate) type DefaultValue = Arc<dyn Fn() -> BoxedAny + Send + Sync>;

/// A single injection point: a constructor or method parameter, or a
/// property. Carried by plan directives and attached to child requests so
/// conditions and parameters can inspect where a value is headed.
#[derive(Clone)]
pub struct Target {
    name: &'static str,
    service: TypeInfo,
    member: MemberKind,
    optional: bool,
    default: Option<DefaultValue>,
    generic: Option<GenericService>,
}

impl Target {
    #[must_use]
    pub fn parameter<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new::<T>(name, MemberKind::ConstructorParameter)
    }

    #[must_use]
    pub fn property<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new::<T>(name, MemberKind::Property)
    }

    #[must_use]
    pub fn method_parameter<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self::new::<T>(name, MemberKind::MethodParameter)
    }

    fn new<T: ?Sized + 'static>(name: &'static str, member: MemberKind) -> Self {
        Self {
            name,
            service: TypeInfo::of::<T>(),
            member,
            optional: false,
            default: None,
            generic: None,
        }
    }

    /// Marks the target as satisfiable by nothing: resolution failures for it
    /// inject no value instead of aborting construction.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Declares a fallback value, served by the default-value resolver when
    /// no binding satisfies the target.
    #[must_use]
    pub fn with_default(mut self, default: impl Fn() -> BoxedAny + Send + Sync + 'static) -> Self {
        self.default = Some(Arc::new(default));
        self
    }

    /// Declares the target type as a closed generic so the open-generic
    /// resolver can reify a binding registered under `definition`.
    #[must_use]
    pub fn with_generic(mut self, generic: GenericService) -> Self {
        self.generic = Some(generic);
        self
    }

    #[inline]
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    #[inline]
    #[must_use]
    pub fn service(&self) -> TypeInfo {
        self.service
    }

    #[inline]
    #[must_use]
    pub fn member(&self) -> MemberKind {
        self.member
    }

    #[inline]
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    #[inline]
    #[must_use]
    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    #[must_use]
    pub fn default_value(&self) -> Option<BoxedAny> {
        self.default.as_ref().map(|produce| produce())
    }

    #[inline]
    #[must_use]
    pub(crate) fn generic(&self) -> Option<&GenericService> {
        self.generic.as_ref()
    }
}
