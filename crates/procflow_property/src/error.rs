use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyError {
    #[error("property identifier \"{0}\" is already used by this owner")]
    DuplicateIdentifier(String),

    #[error("property not found: {0}")]
    NotFound(String),

    #[error("property \"{0}\" is read-only")]
    ReadOnly(String),

    #[error("property \"{identifier}\" holds {expected} values, got {found}")]
    TypeMismatch {
        identifier: String,
        expected: &'static str,
        found: &'static str,
    },

    #[error("property \"{0}\" does not hold a value")]
    NotAValue(String),

    #[error("property \"{0}\" is not a composite")]
    NotAComposite(String),

    #[error("property identifier \"{0}\" must not contain '.'")]
    InvalidIdentifier(String),

    #[error("property identifier must not be empty")]
    EmptyIdentifier,
}
