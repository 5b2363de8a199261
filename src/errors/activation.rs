use super::instantiate::InstantiateErrorKind;

#[derive(thiserror::Error, Debug)]
pub enum ActivationErrorKind {
    #[error(transparent)]
    Injection(Box<InstantiateErrorKind>),
    #[error(transparent)]
    Strategy(#[from] anyhow::Error),
}

impl From<InstantiateErrorKind> for ActivationErrorKind {
    fn from(err: InstantiateErrorKind) -> Self {
        Self::Injection(Box::new(err))
    }
}
