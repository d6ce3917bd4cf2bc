// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Polling monitor for long-running remote jobs.
//!
//! [`poll_until`] calls a status check at a fixed interval until it reports
//! completion, the cancellation token fires, or the maximum duration
//! elapses. Cancellation is observed both between checks and while a check
//! is in flight, so a dismissed job stops within one poll interval.

use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Timing of a polling loop.
#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    /// Delay between checks.
    pub interval: Duration,
    /// Give up after this long.
    pub max_duration: Duration,
}

impl MonitorConfig {
    /// Create a monitor configuration.
    pub fn new(interval: Duration, max_duration: Duration) -> Self {
        Self {
            interval,
            max_duration,
        }
    }
}

/// Why a polling loop ended without a result.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError<E> {
    /// The cancellation token fired.
    #[error("monitoring cancelled")]
    Cancelled,
    /// The maximum duration elapsed.
    #[error("monitoring exceeded {}s", .0.as_secs())]
    Exceeded(Duration),
    /// The check itself failed.
    #[error(transparent)]
    Check(E),
}

/// Poll `check` until it breaks with a value.
///
/// `check` receives the 1-based attempt number. The first check runs
/// immediately.
pub async fn poll_until<T, E, F, Fut>(
    config: MonitorConfig,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, MonitorError<E>>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<ControlFlow<T>, E>>,
{
    let deadline = Instant::now() + config.max_duration;
    let mut attempt = 0u32;

    loop {
        if cancel.is_cancelled() {
            return Err(MonitorError::Cancelled);
        }
        if Instant::now() >= deadline {
            return Err(MonitorError::Exceeded(config.max_duration));
        }

        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            outcome = check(attempt) => outcome,
        };
        match outcome {
            Ok(ControlFlow::Break(value)) => return Ok(value),
            Ok(ControlFlow::Continue(())) => {
                debug!(attempt = attempt, "Job still in progress");
            }
            Err(e) => return Err(MonitorError::Check(e)),
        }

        let wait = config
            .interval
            .min(deadline.saturating_duration_since(Instant::now()));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(MonitorError::Cancelled),
            _ = tokio::time::sleep(wait) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn config() -> MonitorConfig {
        MonitorConfig::new(Duration::from_millis(10), Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_returns_when_check_breaks() {
        let token = CancellationToken::new();
        let result: Result<u32, MonitorError<()>> = poll_until(config(), &token, |attempt| async move {
            Ok(if attempt == 3 {
                ControlFlow::Break(attempt)
            } else {
                ControlFlow::Continue(())
            })
        })
        .await;
        assert_eq!(result.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_check_error_stops_polling() {
        let token = CancellationToken::new();
        let result: Result<(), MonitorError<&str>> =
            poll_until(config(), &token, |_| async { Err("unreachable") }).await;
        assert!(matches!(result, Err(MonitorError::Check("unreachable"))));
    }

    #[tokio::test]
    async fn test_cancellation_observed_between_checks() {
        let token = CancellationToken::new();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let result: Result<(), MonitorError<()>> = poll_until(
            MonitorConfig::new(Duration::from_millis(20), Duration::from_secs(60)),
            &token,
            move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Ok(ControlFlow::Continue(())) }
            },
        )
        .await;
        assert!(matches!(result, Err(MonitorError::Cancelled)));
        assert!(calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_inflight_check() {
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            canceller.cancel();
        });

        let result: Result<(), MonitorError<()>> = poll_until(config(), &token, |_| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(ControlFlow::Continue(()))
        })
        .await;
        assert!(matches!(result, Err(MonitorError::Cancelled)));
    }

    #[tokio::test]
    async fn test_max_duration() {
        let token = CancellationToken::new();
        let result: Result<(), MonitorError<()>> = poll_until(
            MonitorConfig::new(Duration::from_millis(10), Duration::from_millis(50)),
            &token,
            |_| async { Ok(ControlFlow::Continue(())) },
        )
        .await;
        assert!(matches!(result, Err(MonitorError::Exceeded(_))));
    }
}
