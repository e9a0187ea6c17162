use thiserror::Error;

use crate::lang::Location;
use crate::types::TypeError;

use super::verify::VerifyError;

#[derive(Debug, Clone, Error)]
pub enum GenerateError {
    /// A construct that type-checks but has no instruction sequence
    #[error("{location}: cannot generate code for {what}\n  hint: {hint}")]
    Unsupported {
        what: String,
        hint: String,
        location: Location,
    },
    /// Layout failed on a type the compiler already accepted
    #[error("generate error: layout: {0}")]
    Layout(#[from] TypeError),
    #[error("generate error: {0}")]
    Verify(#[from] VerifyError),
    /// Internal generator error (shouldn't happen in normal use)
    #[error("generate error: internal error: {0}")]
    Internal(String),
}

impl GenerateError {
    /// Taking the address of a host function: it has no instruction offset
    pub fn external_address(name: &str, location: &Location) -> Self {
        GenerateError::Unsupported {
            what: format!("the address of external function `{}`", name),
            hint: "call the function directly or wrap it in a regular function".to_string(),
            location: location.clone(),
        }
    }

    pub fn pointer_size(compiled: u32, layout: u32) -> Self {
        GenerateError::Internal(format!(
            "program was compiled for {}-byte pointers but the memory layout uses {}",
            compiled, layout
        ))
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        GenerateError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_address_display() {
        let err = GenerateError::external_address("print", &Location::new("main.cin", 4, 9));

        let msg = err.to_string();
        assert!(msg.starts_with("main.cin:4:9: cannot generate code for"));
        assert!(msg.contains("`print`"));
        assert!(msg.contains("hint"));
    }

    #[test]
    fn test_internal_error_display() {
        let err = GenerateError::internal("something went wrong");

        assert_eq!(
            err.to_string(),
            "generate error: internal error: something went wrong"
        );
    }

    #[test]
    fn test_layout_error_converts() {
        let err: GenerateError = TypeError::GenericSize("T".to_string()).into();
        assert!(matches!(err, GenerateError::Layout(_)));
        assert!(err.to_string().starts_with("generate error: layout:"));
    }

    #[test]
    fn test_error_implements_std_error() {
        let err = GenerateError::pointer_size(8, 4);
        let _: &dyn std::error::Error = &err;
        assert!(err.to_string().contains("8-byte pointers"));
    }
}
