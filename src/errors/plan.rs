use crate::any::TypeInfo;

#[derive(thiserror::Error, Debug)]
pub enum PlanErrorKind {
    #[error("No construction plan is registered for {implementation}")]
    MissingPlan { implementation: TypeInfo },
    #[error("The plan for {implementation} declares no constructor directive")]
    NoConstructor { implementation: TypeInfo },
    #[error("Expected exactly one constructor directive for {implementation}, found {count}")]
    MultipleConstructors { implementation: TypeInfo, count: usize },
    #[error("{count} constructor directives of {implementation} are tied at the best score ({score})")]
    AmbiguousConstructor {
        implementation: TypeInfo,
        count: usize,
        score: i64,
    },
}
