//! A plan-driven inversion-of-control runtime: bindings map service types to
//! providers, providers construct instances from explicit per-type plans,
//! instances flow through an ordered activation/deactivation pipeline, and a
//! scope-keyed cache owns their lifetimes until their scope dies.

pub(crate) mod any;
pub(crate) mod binding;
pub(crate) mod cache;
pub(crate) mod config;
pub(crate) mod context;
pub(crate) mod errors;
pub(crate) mod kernel;
pub(crate) mod parameter;
pub(crate) mod pipeline;
pub(crate) mod plan;
pub(crate) mod provider;
pub(crate) mod registry;
pub(crate) mod request;
pub(crate) mod resolvers;
pub mod scope;
pub(crate) mod target;

pub use any::{BoxedAny, SharedAny, TypeInfo};
pub use binding::{Binding, BindingBuilder, BindingMetadata, BindingTarget};
pub use config::{ConstructorSelection, Settings};
pub use context::Context;
pub use errors::{ActivationErrorKind, InstantiateErrorKind, PlanErrorKind, ResolveErrorKind};
pub use kernel::{Kernel, KernelBuilder, ResolveIter};
pub use parameter::{Parameter, ParameterKind};
pub use pipeline::{ActivationCache, ActivationStrategy, DeactivationStrategy, InitializationStrategy, InstanceRef};
pub use plan::{
    Args, ConstructorDirective, ConstructorInjector, MethodDirective, MethodInjector, Plan, PlanFactory,
    PropertyDirective, PropertyInjector, ScoreHint,
};
pub use provider::{CallbackProvider, ConstantProvider, Provider, StandardProvider};
pub use registry::PrecedenceFn;
pub use request::{GenericService, Request, RequestBuilder};
pub use resolvers::{DefaultValueResolver, MissingBindingResolver, OpenGenericResolver, SelfBindingResolver};
pub use scope::{Scope, ScopeRef, ScopeSelector};
pub use target::{MemberKind, Target};
