// Retry logic with exponential backoff
//
// Only transient failures are retried; the last failure past the cap is
// promoted to fatal so the loop can settle.

use std::time::Duration;
use tokio::time::sleep;

use crate::config::constants::BRAIN_MAX_RETRIES;
use crate::errors::BrainError;

const BASE_DELAY_MS: u64 = 1000;

/// Execute `f` with exponential backoff on transient Brain failures.
pub async fn with_retry<F, Fut, T>(f: F) -> Result<T, BrainError>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = Result<T, BrainError>>,
{
    let mut last_error = None;

    for attempt in 0..BRAIN_MAX_RETRIES {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_transient() && attempt < BRAIN_MAX_RETRIES - 1 => {
                let delay = Duration::from_millis(BASE_DELAY_MS * 2u64.pow(attempt));
                tracing::warn!(
                    "Brain request failed (attempt {}/{}), retrying in {:?}: {e}",
                    attempt + 1,
                    BRAIN_MAX_RETRIES,
                    delay
                );
                sleep(delay).await;
                last_error = Some(e);
            }
            Err(e) => {
                last_error = Some(e);
                break;
            }
        }
    }

    match last_error.expect("retry loop ran at least once") {
        BrainError::Transient(msg) => Err(BrainError::Fatal(format!(
            "gave up after {BRAIN_MAX_RETRIES} transient failures: {msg}"
        ))),
        other => Err(other),
    }
}
