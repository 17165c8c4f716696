use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Health checker trait for editor instances
#[async_trait]
pub trait HealthChecker: Send + Sync {
    /// Check if the instance is accepting connections
    async fn check(&self) -> Result<bool>;

    /// Get the timeout of a single probe
    fn timeout(&self) -> Duration;
}

/// Outcome of [`wait_until_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    TimedOut,
    /// The watched process went away before it became ready
    Exited(String),
}

/// Probe `checker` every `interval` until it passes or `budget` runs out.
///
/// The interval is fixed, without backoff. `exited` is polled before each
/// probe and ends the wait early when it reports a reason.
pub async fn wait_until_ready<C, F>(
    checker: &C,
    budget: Duration,
    interval: Duration,
    mut exited: F,
) -> Readiness
where
    C: HealthChecker + ?Sized,
    F: FnMut() -> Option<String> + Send,
{
    let deadline = Instant::now() + budget;

    loop {
        if let Some(reason) = exited() {
            return Readiness::Exited(reason);
        }

        if let Ok(true) = checker.check().await {
            return Readiness::Ready;
        }

        let now = Instant::now();
        if now >= deadline {
            return Readiness::TimedOut;
        }
        sleep(interval.min(deadline - now)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingChecker {
        calls: AtomicUsize,
        ready_after: usize,
    }

    #[async_trait]
    impl HealthChecker for CountingChecker {
        async fn check(&self) -> Result<bool> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(n >= self.ready_after)
        }

        fn timeout(&self) -> Duration {
            Duration::from_millis(10)
        }
    }

    #[tokio::test]
    async fn test_ready_after_a_few_probes() {
        let checker = CountingChecker {
            calls: AtomicUsize::new(0),
            ready_after: 3,
        };
        let outcome = wait_until_ready(
            &checker,
            Duration::from_secs(5),
            Duration::from_millis(5),
            || None,
        )
        .await;
        assert_eq!(outcome, Readiness::Ready);
        assert_eq!(checker.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_times_out_within_budget() {
        let checker = CountingChecker {
            calls: AtomicUsize::new(0),
            ready_after: usize::MAX,
        };
        let started = std::time::Instant::now();
        let outcome = wait_until_ready(
            &checker,
            Duration::from_millis(100),
            Duration::from_millis(20),
            || None,
        )
        .await;
        assert_eq!(outcome, Readiness::TimedOut);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_exit_ends_wait_early() {
        let checker = CountingChecker {
            calls: AtomicUsize::new(0),
            ready_after: usize::MAX,
        };
        let mut polls = 0;
        let outcome = wait_until_ready(
            &checker,
            Duration::from_secs(30),
            Duration::from_millis(5),
            || {
                polls += 1;
                (polls > 2).then(|| "exit status: 1".to_string())
            },
        )
        .await;
        assert_eq!(outcome, Readiness::Exited("exit status: 1".to_string()));
    }
}
