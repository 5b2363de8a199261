use super::{plan::PlanErrorKind, resolve::ResolveErrorKind};
use crate::any::TypeInfo;

#[derive(thiserror::Error, Debug)]
pub enum InstantiateErrorKind {
    #[error(transparent)]
    Plan(#[from] PlanErrorKind),
    #[error("Could not resolve dependency for target `{target}`: {source}")]
    Dependency {
        target: &'static str,
        #[source]
        source: Box<ResolveErrorKind>,
    },
    #[error("Provider yielded no instance and none values are disabled")]
    NoneInstance,
    #[error("Explicit constructor arguments were supplied but the selected constructor of {implementation} takes none")]
    UnexpectedConstructorArguments { implementation: TypeInfo },
    #[error("{count} property value parameters apply to property `{property}`")]
    AmbiguousPropertyValue { property: &'static str, count: usize },
    #[error("Property value parameter `{parameter}` matches no property directive")]
    UnmatchedPropertyValue { parameter: &'static str },
    #[error("Could not resolve property `{property}`: {source}")]
    Property {
        property: &'static str,
        #[source]
        source: Box<ResolveErrorKind>,
    },
    #[error("Argument {index} of type {expected} was not supplied")]
    MissingArgument { index: usize, expected: TypeInfo },
    #[error("Argument {index} is not of the expected type {expected}")]
    IncorrectArgument { index: usize, expected: TypeInfo },
    #[error(transparent)]
    Custom(#[from] anyhow::Error),
}
