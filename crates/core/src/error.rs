use serde::Serialize;

/// A single field-level problem with an input.
///
/// `field` is a short machine-readable key (for example `dob` or `email`) and `message` is the
/// text shown to the person who submitted the input.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, utoipa::ToSchema)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised by the user and measurement store collaborators.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A uniqueness constraint (email, NHS number or professional ID) was violated.
    #[error("a user with this {field} already exists")]
    Conflict { field: &'static str },
    #[error("record not found")]
    NotFound,
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Outcome taxonomy for every decision the core makes.
///
/// All variants are expected outcomes that adapters translate into a response. Only
/// [`CkdError::Contract`] and [`CkdError::Store`] indicate a caller bug or an infrastructure
/// fault rather than a user-facing rejection.
#[derive(Debug, thiserror::Error)]
pub enum CkdError {
    #[error("user is not logged in")]
    Unauthenticated,
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("validation failed: {}", format_field_errors(.0))]
    ValidationFailed(Vec<FieldError>),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
    #[error("malformed request: {0}")]
    Contract(&'static str),
    #[error("store error: {0}")]
    Store(#[source] StoreError),
}

impl CkdError {
    pub fn forbidden(reason: impl Into<String>) -> Self {
        Self::Forbidden(reason.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Shorthand for a `ValidationFailed` carrying one field error.
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ValidationFailed(vec![FieldError::new(field, message)])
    }
}

impl From<StoreError> for CkdError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Conflict { field } => {
                CkdError::Conflict(format!("a user with this {field} already exists"))
            }
            other => CkdError::Store(other),
        }
    }
}

fn format_field_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field, e.message))
        .collect::<Vec<_>>()
        .join("; ")
}

pub type CkdResult<T> = std::result::Result<T, CkdError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_conflict_becomes_conflict_outcome() {
        let err: CkdError = StoreError::Conflict { field: "email" }.into();
        assert!(matches!(err, CkdError::Conflict(ref m) if m.contains("email")));
    }

    #[test]
    fn store_unavailable_stays_a_store_fault() {
        let err: CkdError = StoreError::Unavailable("disk".into()).into();
        assert!(matches!(err, CkdError::Store(StoreError::Unavailable(_))));
    }

    #[test]
    fn validation_message_lists_every_field() {
        let err = CkdError::ValidationFailed(vec![
            FieldError::new("dob", "too young"),
            FieldError::new("email", "bad"),
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: dob: too young; email: bad"
        );
    }
}
