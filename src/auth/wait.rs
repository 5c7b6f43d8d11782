use std::time::Duration;

use tokio_util::sync::CancellationToken;

/// How often and how long to re-check for launch data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WaitError {
    #[error("nothing found after {attempts} checks")]
    TimedOut { attempts: u32 },
    #[error("cancelled")]
    Cancelled,
}

/// Sleep for `duration` unless `cancel` fires first.
pub async fn sleep_or_cancel(duration: Duration, cancel: &CancellationToken) -> Result<(), WaitError> {
    if cancel.is_cancelled() {
        return Err(WaitError::Cancelled);
    }
    if duration.is_zero() {
        return Ok(());
    }
    tokio::select! {
        _ = cancel.cancelled() => Err(WaitError::Cancelled),
        _ = tokio::time::sleep(duration) => Ok(()),
    }
}

/// Call `probe` up to `policy.attempts` times, `policy.interval` apart,
/// returning the first `Some`.
pub async fn wait_for<T, F>(
    mut probe: F,
    policy: PollPolicy,
    cancel: &CancellationToken,
) -> Result<T, WaitError>
where
    F: FnMut() -> Option<T>,
{
    let attempts = policy.attempts.max(1);
    for attempt in 1..=attempts {
        if cancel.is_cancelled() {
            return Err(WaitError::Cancelled);
        }
        if let Some(found) = probe() {
            log::debug!("wait: found on check {}/{}", attempt, attempts);
            return Ok(found);
        }
        if attempt <= 5 || attempt % 10 == 0 {
            log::debug!("wait: check {}/{} found nothing", attempt, attempts);
        }
        if attempt < attempts {
            sleep_or_cancel(policy.interval, cancel).await?;
        }
    }
    Err(WaitError::TimedOut { attempts })
}
