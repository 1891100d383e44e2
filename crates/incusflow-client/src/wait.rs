//! Sleep-based polling with a deadline and a cancellation token
//!
//! Every wait in the crate (asynchronous operations, guest agent
//! readiness, cloud-init completion) goes through [`poll_until`].

use crate::error::{ClientError, Result};
use std::future::Future;
use std::ops::ControlFlow;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

/// Deadline and poll interval for a wait loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub timeout: Duration,
    pub interval: Duration,
}

impl WaitPolicy {
    pub const fn new(timeout: Duration, interval: Duration) -> Self {
        Self { timeout, interval }
    }

    /// Asynchronous operations: 300s, polled every second
    pub const fn operation() -> Self {
        Self::new(Duration::from_secs(300), Duration::from_secs(1))
    }

    /// Image transfers: 600s, polled every second
    pub const fn image_transfer() -> Self {
        Self::new(Duration::from_secs(600), Duration::from_secs(1))
    }

    /// Guest agent readiness: 300s, polled every 2s
    pub const fn agent_ready() -> Self {
        Self::new(Duration::from_secs(300), Duration::from_secs(2))
    }

    /// cloud-init completion: 600s, polled every 5s
    pub const fn cloud_init() -> Self {
        Self::new(Duration::from_secs(600), Duration::from_secs(5))
    }

    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self { timeout, ..self }
    }

    pub fn with_interval(self, interval: Duration) -> Self {
        Self { interval, ..self }
    }
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self::operation()
    }
}

/// Run `probe` until it breaks, fails, the deadline passes or `cancel` fires.
///
/// The deadline is measured from the first call. `probe` is never invoked
/// once the deadline has passed, and the loop always sleeps `interval`
/// between two probes.
pub async fn poll_until<T, F, Fut>(
    policy: WaitPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut probe: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<ControlFlow<T>>>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled(what.to_string()));
        }
        if started.elapsed() >= policy.timeout {
            tracing::warn!(
                "gave up waiting for {} after {} attempts ({:?})",
                what,
                attempt,
                started.elapsed()
            );
            return Err(ClientError::Timeout {
                what: what.to_string(),
                after: policy.timeout,
            });
        }

        attempt += 1;
        if let ControlFlow::Break(value) = probe().await? {
            tracing::debug!("{} finished after {} attempts", what, attempt);
            return Ok(value);
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(ClientError::Cancelled(what.to_string()));
            }
            _ = sleep(policy.interval) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn test_breaks_on_third_probe() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = WaitPolicy::new(Duration::from_secs(10), Duration::from_secs(1));

        let value = poll_until(policy, &CancellationToken::new(), "counter", move || async move {
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(if n == 3 {
                ControlFlow::Break(n)
            } else {
                ControlFlow::Continue(())
            })
        })
        .await
        .unwrap();

        assert_eq!(value, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_without_busy_polling() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let policy = WaitPolicy::new(Duration::from_secs(5), Duration::from_secs(1));
        let started = Instant::now();

        let result: Result<()> = poll_until(policy, &CancellationToken::new(), "never", move || async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(ControlFlow::Continue(()))
        })
        .await;

        assert!(matches!(result, Err(ClientError::Timeout { .. })));
        // t = 0,1,2,3,4 probe; t = 5 deadline reached
        assert_eq!(calls.load(Ordering::SeqCst), 5);
        assert!(started.elapsed() >= Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_stops_the_loop() {
        let calls = AtomicU32::new(0);
        let counter = &calls;
        let result: Result<()> = poll_until(
            WaitPolicy::operation(),
            &CancellationToken::new(),
            "failing",
            move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Err(ClientError::Validation("boom".to_string()))
            },
        )
        .await;

        assert!(matches!(result, Err(ClientError::Validation(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        tokio::spawn(async move {
            sleep(Duration::from_millis(2500)).await;
            trigger.cancel();
        });

        let result: Result<()> = poll_until(WaitPolicy::operation(), &cancel, "cancelled", || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(ControlFlow::Continue(()))
            }
        })
        .await;

        assert!(matches!(result, Err(ClientError::Cancelled(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
