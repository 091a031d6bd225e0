use thiserror::Error;

use crate::params::KernelKind;

pub type KernelResult<T> = Result<T, KernelError>;
pub type SelectorResult<T> = Result<T, SelectorError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum KernelError {
    #[error("no kernel source registered under `{name}`")]
    SourceNotFound { name: String },
    #[error("kernel source `{name}` is ambiguous: {count} entries")]
    AmbiguousSource { name: String, count: usize },
}

impl KernelError {
    pub fn source_not_found(name: impl Into<String>) -> Self {
        KernelError::SourceNotFound { name: name.into() }
    }
}

#[derive(Debug, Error)]
pub enum SelectorError {
    #[error(transparent)]
    Kernel(#[from] KernelError),
    #[error("no eligible {kind} kernel for layer `{layer_id}`")]
    NoEligibleKernel { kind: KernelKind, layer_id: String },
    #[error("{kind} selector has no variant named `{name}`")]
    UnknownVariant { kind: KernelKind, name: String },
    #[error("variant `{name}` is a {variant} kernel, selector expects {selector}")]
    KindMismatch {
        name: &'static str,
        variant: KernelKind,
        selector: KernelKind,
    },
    #[error("tuning table error: {0}")]
    Tuning(String),
}

impl SelectorError {
    pub fn tuning(message: impl Into<String>) -> Self {
        SelectorError::Tuning(message.into())
    }
}
