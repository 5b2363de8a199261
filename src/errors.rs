mod activation;
mod instantiate;
mod plan;
mod resolve;

pub use activation::ActivationErrorKind;
pub use instantiate::InstantiateErrorKind;
pub use plan::PlanErrorKind;
pub use resolve::ResolveErrorKind;
