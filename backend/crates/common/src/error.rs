use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("validation error: {0}")]
    Validation(String),

    /// Carries no detail.
    #[error("unauthorized")]
    Unauthorized,

    #[error("precondition failed: {0}")]
    Precondition(String),

    #[error("external system error: {0}")]
    External(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Stable machine-readable code, used in API bodies and sync error entries.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::Database(_) => "DATABASE_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Precondition(_) => "PRECONDITION_FAILED",
            Self::External(_) => "EXTERNAL_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type RelayResult<T> = Result<T, RelayError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_message_has_no_detail() {
        assert_eq!(RelayError::Unauthorized.to_string(), "unauthorized");
    }

    #[test]
    fn codes_are_distinct_per_variant() {
        let codes = [
            RelayError::Config(String::new()).code(),
            RelayError::Database(String::new()).code(),
            RelayError::NotFound(String::new()).code(),
            RelayError::Validation(String::new()).code(),
            RelayError::Unauthorized.code(),
            RelayError::Precondition(String::new()).code(),
            RelayError::External(String::new()).code(),
            RelayError::Internal(String::new()).code(),
        ];
        let mut unique = codes.to_vec();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), codes.len());
    }
}
