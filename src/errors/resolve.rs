use core::any::TypeId;

use super::{ActivationErrorKind, InstantiateErrorKind, PlanErrorKind};
use crate::any::TypeInfo;

#[derive(thiserror::Error, Debug)]
pub enum ResolveErrorKind {
    #[error("No binding satisfies the request for {service}")]
    Unresolved { service: TypeInfo },
    #[error("{count} bindings of equal precedence match the request for {service}")]
    Ambiguous { service: TypeInfo, count: usize },
    #[error("Resolution depth limit ({limit}) exceeded while resolving {service}")]
    DepthExceeded { service: TypeInfo, limit: usize },
    #[error("Cyclic dependency detected: {}", render_chain(.chain))]
    CyclicDependency { chain: Vec<TypeInfo> },
    #[error("Requested {expected} but the binding produced {actual:?}")]
    IncorrectType { expected: TypeInfo, actual: TypeId },
    #[error(transparent)]
    Instantiator(InstantiateErrorKind),
    #[error(transparent)]
    Activation(#[from] ActivationErrorKind),
    #[error(transparent)]
    Plan(#[from] PlanErrorKind),
}

fn render_chain(chain: &[TypeInfo]) -> String {
    let mut out = String::new();
    for (position, service) in chain.iter().enumerate() {
        if position > 0 {
            out.push_str(" -> ");
        }
        out.push_str(service.short_name());
    }
    out
}
