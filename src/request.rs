use std::sync::Arc;

use crate::{
    any::TypeInfo,
    binding::BindingMetadata,
    context::Context,
    parameter::Parameter,
    target::Target,
};

/// Describes a closed generic service in terms of the open definition it was
/// declared under, so the open-generic resolver can reify a binding for it.
#[derive(Clone)]
pub struct GenericService {
    pub definition: TypeInfo,
    pub arguments: Vec<TypeInfo>,
}

pub(crate) type Constraint = Arc<dyn Fn(&BindingMetadata) -> bool + Send + Sync>;

/// One resolution attempt. Requests for injection targets chain to the
/// context that spawned them; the chain is produced by call nesting and is
/// therefore acyclic even when the object graph itself is not.
#[derive(Clone)]
pub struct Request {
    inner: Arc<RequestInner>,
}

struct RequestInner {
    service: TypeInfo,
    generic: Option<GenericService>,
    constraint: Option<Constraint>,
    parameters: Vec<Parameter>,
    target: Option<Target>,
    parent: Option<Context>,
    optional: bool,
    unique: bool,
    depth: usize,
}

impl Request {
    #[must_use]
    pub fn build(service: TypeInfo) -> RequestBuilder {
        RequestBuilder {
            service,
            generic: None,
            constraint: None,
            parameters: Vec::new(),
            optional: false,
            unique: true,
        }
    }

    /// Child request for an injection target, spawned while constructing the
    /// instance `parent` describes. Inherited parameters flow down.
    #[must_use]
    pub(crate) fn child(target: Target, parent: &Context) -> Self {
        let parameters = parent
            .request()
            .parameters()
            .iter()
            .filter(|parameter| parameter.is_inherited())
            .cloned()
            .collect();

        Self {
            inner: Arc::new(RequestInner {
                service: target.service(),
                generic: target.generic().cloned(),
                constraint: None,
                parameters,
                optional: target.is_optional(),
                unique: true,
                depth: parent.request().depth() + 1,
                target: Some(target),
                parent: Some(parent.clone()),
            }),
        }
    }

    #[inline]
    #[must_use]
    pub fn service(&self) -> TypeInfo {
        self.inner.service
    }

    #[inline]
    #[must_use]
    pub fn generic(&self) -> Option<&GenericService> {
        self.inner.generic.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn parameters(&self) -> &[Parameter] {
        &self.inner.parameters
    }

    #[inline]
    #[must_use]
    pub fn target(&self) -> Option<&Target> {
        self.inner.target.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<&Context> {
        self.inner.parent.as_ref()
    }

    /// Walks the contexts this request was spawned under, nearest first.
    #[must_use]
    pub fn ancestors(&self) -> Ancestors<'_> {
        Ancestors {
            next: self.parent(),
        }
    }

    #[inline]
    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.inner.optional
    }

    #[inline]
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.inner.unique
    }

    #[inline]
    #[must_use]
    pub fn depth(&self) -> usize {
        self.inner.depth
    }

    pub(crate) fn matches_constraint(&self, metadata: &BindingMetadata) -> bool {
        self.inner.constraint.as_ref().map_or(true, |constraint| constraint(metadata))
    }

    #[inline]
    #[must_use]
    pub(crate) fn is_constrained(&self) -> bool {
        self.inner.constraint.is_some()
    }
}

pub struct Ancestors<'a> {
    next: Option<&'a Context>,
}

impl<'a> Iterator for Ancestors<'a> {
    type Item = &'a Context;

    fn next(&mut self) -> Option<Self::Item> {
        let current = self.next?;
        self.next = current.request().parent();
        Some(current)
    }
}

/// The collaborator-facing request factory.
pub struct RequestBuilder {
    service: TypeInfo,
    generic: Option<GenericService>,
    constraint: Option<Constraint>,
    parameters: Vec<Parameter>,
    optional: bool,
    unique: bool,
}

impl RequestBuilder {
    /// Restricts candidates to bindings whose metadata satisfies `constraint`.
    #[must_use]
    pub fn constrained(mut self, constraint: impl Fn(&BindingMetadata) -> bool + Send + Sync + 'static) -> Self {
        self.constraint = Some(Arc::new(constraint));
        self
    }

    /// Restricts candidates to the binding registered under `name`.
    #[must_use]
    pub fn named(self, name: &'static str) -> Self {
        self.constrained(move |metadata| metadata.name() == Some(name))
    }

    #[must_use]
    pub fn with_parameter(mut self, parameter: Parameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    #[must_use]
    pub fn with_parameters(mut self, parameters: impl IntoIterator<Item = Parameter>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    #[must_use]
    pub fn with_generic(mut self, generic: GenericService) -> Self {
        self.generic = Some(generic);
        self
    }

    /// An optional request yields nothing instead of failing as unresolved.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// A non-unique request may yield every binding of top precedence
    /// instead of requiring exactly one.
    #[must_use]
    pub fn all(mut self) -> Self {
        self.unique = false;
        self
    }

    #[must_use]
    pub fn finish(self) -> Request {
        Request {
            inner: Arc::new(RequestInner {
                service: self.service,
                generic: self.generic,
                constraint: self.constraint,
                parameters: self.parameters,
                target: None,
                parent: None,
                optional: self.optional,
                unique: self.unique,
                depth: 0,
            }),
        }
    }
}
