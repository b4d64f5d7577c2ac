//! Bounded timeout-and-retry wrapper for external collaborator calls.
//!
//! Every outbound call (search, classification, geocoding) goes through
//! `call_with_budget` — no silent infinite retry loops, no unbounded waits.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

/// Outcome of a budgeted collaborator call.
#[derive(Debug)]
pub enum CallOutcome<T> {
    Ok(T),
    /// Every attempt exceeded the time budget.
    TimedOut,
    /// Every attempt failed with a provider error. Carries the last error.
    Failed(anyhow::Error),
}

/// Run `f` with a per-attempt timeout and up to `retries` retries after the
/// first failure, doubling `backoff` between attempts.
pub async fn call_with_budget<T, F, Fut>(
    operation: &str,
    timeout: Duration,
    retries: u32,
    backoff: Duration,
    mut f: F,
) -> CallOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    let attempts = retries + 1;
    let mut timed_out = false;
    let mut last_error: Option<anyhow::Error> = None;

    for attempt in 0..attempts {
        if attempt > 0 {
            let delay = backoff * 2u32.saturating_pow(attempt - 1);
            tokio::time::sleep(delay).await;
        }

        match tokio::time::timeout(timeout, f()).await {
            Ok(Ok(value)) => return CallOutcome::Ok(value),
            Ok(Err(e)) => {
                warn!(operation, attempt, error = %e, "Collaborator call failed");
                timed_out = false;
                last_error = Some(e);
            }
            Err(_) => {
                warn!(operation, attempt, timeout_ms = timeout.as_millis() as u64, "Collaborator call timed out");
                timed_out = true;
            }
        }
    }

    if timed_out {
        CallOutcome::TimedOut
    } else {
        CallOutcome::Failed(
            last_error.unwrap_or_else(|| anyhow::anyhow!("collaborator call failed")),
        )
    }
}
