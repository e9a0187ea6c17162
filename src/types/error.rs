use thiserror::Error;

/// Failures of size, layout and substitution queries.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TypeError {
    #[error("type `{0}` has no size")]
    Unsized(String),

    /// A generic parameter reached layout. Always a compiler bug.
    #[error("generic type `{0}` has no size; it must be resolved before layout")]
    GenericSize(String),

    #[error("array of `{0}` has no compile-time length")]
    UnknownLength(String),

    #[error("Type argument not found: `{0}`")]
    TypeArgumentNotFound(String),

    #[error("field `{field}` not found in `{ty}`")]
    FieldNotFound { ty: String, field: String },

    #[error("type `{0}` does not fit in a register")]
    NoBitWidth(String),

    #[error("type `{0}` contains itself by value")]
    Recursive(String),

    #[error("type `{0}` is too large")]
    TooLarge(String),
}

impl TypeError {
    pub fn unsized_type(name: impl Into<String>) -> Self {
        TypeError::Unsized(name.into())
    }

    pub fn too_large(name: impl Into<String>) -> Self {
        TypeError::TooLarge(name.into())
    }

    pub fn field_not_found(ty: impl Into<String>, field: impl Into<String>) -> Self {
        TypeError::FieldNotFound {
            ty: ty.into(),
            field: field.into(),
        }
    }

    /// Internal-consistency failures abort compilation instead of
    /// becoming a user diagnostic.
    pub fn is_internal(&self) -> bool {
        matches!(self, TypeError::GenericSize(_))
    }
}
