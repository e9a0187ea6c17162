use thiserror::Error;

use super::diagnostics::DiagnosticsCollection;
use crate::types::TypeError;

/// A violated compiler invariant. These are bugs, not user errors, and
/// abort compilation immediately.
#[derive(Debug, Clone, Error)]
pub enum InternalError {
    #[error("layout of a type that is not fully resolved: {0}")]
    Layout(#[from] TypeError),

    #[error("struct `{name}` expects {expected} type arguments, got {got}")]
    TemplateArgumentCount {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("{0}")]
    Invariant(String),
}

impl InternalError {
    pub fn invariant(msg: impl Into<String>) -> Self {
        InternalError::Invariant(msg.into())
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    /// User errors, surfaced in batch at the end of the pass.
    #[error("compilation failed with {} error(s)\n{}", .0.error_count(), .0)]
    Diagnostics(DiagnosticsCollection),

    #[error("internal compiler error: {0}")]
    Internal(#[from] InternalError),
}

impl CompileError {
    pub fn diagnostics(&self) -> Option<&DiagnosticsCollection> {
        match self {
            CompileError::Diagnostics(diagnostics) => Some(diagnostics),
            CompileError::Internal(_) => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(self, CompileError::Internal(_))
    }
}

/// Why lowering of one node stopped.
#[derive(Debug)]
pub(crate) enum Failure {
    /// A diagnostic was recorded; skip the node and keep going.
    Reported,
    Internal(InternalError),
}

impl From<InternalError> for Failure {
    fn from(error: InternalError) -> Self {
        Failure::Internal(error)
    }
}

pub(crate) type Lower<T> = Result<T, Failure>;

/// Turns a reported failure into `None` so the caller can move on to the
/// next node; internal errors keep propagating.
pub(crate) fn recover<T>(result: Lower<T>) -> Result<Option<T>, InternalError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(Failure::Reported) => Ok(None),
        Err(Failure::Internal(error)) => Err(error),
    }
}
