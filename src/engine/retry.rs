use std::future::Future;

use tracing::debug;

use super::EngineError;

/// Run `op` again while it fails with [`EngineError::VersionConflict`], up to
/// `max_retries` extra attempts. Every other outcome is returned as is.
///
/// `op` must reload what it modifies on each call; replaying a stale
/// `Modified` value only conflicts again.
pub async fn retry_on_version_conflict<T, F, Fut>(
    max_retries: u32,
    mut op: F,
) -> Result<T, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, EngineError>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Err(e @ EngineError::VersionConflict { .. }) if attempt < max_retries => {
                attempt += 1;
                debug!("{e}; retrying ({attempt}/{max_retries})");
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use ulid::Ulid;

    use super::*;
    use crate::model::EntityKind;

    fn conflict() -> EngineError {
        EngineError::VersionConflict {
            kind: EntityKind::Room,
            id: Ulid::nil(),
            expected: 1,
        }
    }

    #[tokio::test]
    async fn succeeds_after_conflicts() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result = retry_on_version_conflict(3, move || async move {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(conflict())
            } else {
                Ok(7)
            }
        })
        .await;
        assert_eq!(result, Ok(7));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_retries() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_on_version_conflict(2, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        })
        .await;
        assert_eq!(result, Err(conflict()));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let result: Result<(), _> = retry_on_version_conflict(5, move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(EngineError::Validation("bad".into()))
        })
        .await;
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn zero_retries_runs_once() {
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let attempt = move || async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(conflict())
        };
        let result: Result<(), _> = tokio_test::block_on(retry_on_version_conflict(0, attempt));
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
