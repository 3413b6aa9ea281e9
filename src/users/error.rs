use thiserror::Error;

pub type Result<T> = std::result::Result<T, UserError>;

#[derive(Debug, Error)]
pub enum UserError {
    /// A required parameter was absent. Carries the caller-facing field name.
    #[error("missing {0}")]
    MissingField(&'static str),

    /// Store failures are surfaced untouched.
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Unwrap a required parameter or name it in a [`UserError::MissingField`].
pub(crate) fn require<T>(value: Option<T>, field: &'static str) -> Result<T> {
    value.ok_or(UserError::MissingField(field))
}
