use std::future::Future;
use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ModerationError>;

#[derive(Debug, Error)]
pub enum ModerationError {
    /// Malformed input; the caller's fault.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    /// A concurrent mutation won, or the record is no longer in a state that allows this.
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("user is not banned or suspended")]
    NotEligible,

    #[error("user has no active ban")]
    NoActiveBan,

    #[error("user already has a pending appeal")]
    DuplicateAppeal,

    /// A dependency is unavailable or too slow; safe to retry.
    #[error("dependency unavailable: {0}")]
    Transient(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ModerationError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::NotEligible => "NOT_ELIGIBLE",
            Self::NoActiveBan => "NO_ACTIVE_BAN",
            Self::DuplicateAppeal => "DUPLICATE_APPEAL",
            Self::Transient(_) => "TRANSIENT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Bound a store call. Elapsing is reported as `Transient` so callers can retry.
pub async fn with_timeout<F, T>(limit: Duration, what: &str, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(ModerationError::Transient(format!(
            "{} timed out after {}ms",
            what,
            limit.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn slow_calls_become_transient() {
        let result: Result<()> = with_timeout(Duration::from_millis(10), "slow call", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        })
        .await;

        let err = result.unwrap_err();
        assert!(err.is_transient());
        assert!(err.to_string().contains("slow call"));
    }

    #[test]
    fn business_errors_have_distinct_codes() {
        let codes = [
            ModerationError::NotEligible.code(),
            ModerationError::NoActiveBan.code(),
            ModerationError::DuplicateAppeal.code(),
        ];
        assert_eq!(codes, ["NOT_ELIGIBLE", "NO_ACTIVE_BAN", "DUPLICATE_APPEAL"]);
    }
}
