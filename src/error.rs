use axum::response::{IntoResponse, Response};
use thiserror::Error;

use crate::responses::JsonResponse;

/// How many times an idempotent read is attempted before the failure is
/// surfaced. Mutations are never auto-retried.
pub const READ_RETRY_ATTEMPTS: u32 = 3;

/// Failure taxonomy of the core. `Forbidden` and `NotFound` deliberately
/// carry no detail: a caller outside a scope must not learn whether the
/// resource exists.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("You do not have access to this resource")]
    Forbidden,
    #[error("Not found")]
    NotFound,
    #[error("No user registered with email {0}")]
    UserNotFound(String),
    #[error("This user is already a member of the organization")]
    AlreadyMember,
    #[error("An organization must keep at least one admin")]
    LastAdminViolation,
    #[error("A notebook's scope cannot be changed after creation")]
    ScopeImmutable,
    #[error("store error: {0}")]
    Store(#[from] sqlx::Error),
}

impl IntoResponse for CoreError {
    fn into_response(self) -> Response {
        match self {
            CoreError::Forbidden => JsonResponse::forbidden(&self.to_string()).into_response(),
            CoreError::NotFound => JsonResponse::not_found(&self.to_string()).into_response(),
            CoreError::UserNotFound(_) => {
                JsonResponse::not_found(&self.to_string()).into_response()
            }
            CoreError::AlreadyMember => JsonResponse::conflict(&self.to_string()).into_response(),
            CoreError::LastAdminViolation => {
                JsonResponse::conflict_with_code(&self.to_string(), "last_admin").into_response()
            }
            CoreError::ScopeImmutable => {
                JsonResponse::bad_request(&self.to_string()).into_response()
            }
            CoreError::Store(err) => {
                tracing::error!(?err, "store failure reached the API surface");
                JsonResponse::server_error("Something went wrong").into_response()
            }
        }
    }
}

/// Transient store failures worth one more try on a read path.
pub fn is_transient(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Io(_) | sqlx::Error::PoolTimedOut)
}

/// Bounded retry for idempotent reads. The operation is retried only on
/// transient failures and at most `READ_RETRY_ATTEMPTS` times in total.
pub async fn retry_read<T, Fut>(mut op: impl FnMut() -> Fut) -> Result<T, sqlx::Error>
where
    Fut: std::future::Future<Output = Result<T, sqlx::Error>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Err(err) if attempt < READ_RETRY_ATTEMPTS && is_transient(&err) => {
                tracing::warn!(?err, attempt, "transient store failure on read, retrying");
                attempt += 1;
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn io_error() -> sqlx::Error {
        sqlx::Error::Io(std::io::Error::new(std::io::ErrorKind::Other, "boom"))
    }

    #[tokio::test]
    async fn retries_transient_read_failures() {
        let calls = AtomicU32::new(0);
        let result = retry_read(|| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(io_error())
                } else {
                    Ok(42)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_bounded_attempts() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_read(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(io_error()) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), READ_RETRY_ATTEMPTS);
    }

    #[tokio::test]
    async fn does_not_retry_non_transient_failures() {
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = retry_read(|| {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(sqlx::Error::RowNotFound) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
