//! Poll-with-deadline primitive shared by every eventual-consistency check
//!
//! Higher layers never write their own polling loops. They hand a predicate
//! to [`wait_until`] and get back `Ok(())`, a timeout carrying the last
//! observed state, or the first fatal error.
//!
//! # Example
//!
//! ```ignore
//! use kogito_bdd::wait::{wait_until, PollError};
//! use std::time::Duration;
//!
//! wait_until("operator kogito-operator running", Duration::from_secs(300), || async {
//!     let running = olm.is_running(&ns, "kogito-operator", &catalog).await?;
//!     Ok(running)
//! })
//! .interval(Duration::from_secs(10))
//! .cancel_on(token.clone())
//! .await_condition()
//! .await?;
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Poll interval used when the caller does not set one
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(10);

/// Error returned by a wait predicate
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PollError {
    /// Logged and swallowed until the deadline
    #[error("{0}")]
    Transient(String),

    /// Aborts the wait immediately
    #[error("{0}")]
    Fatal(String),
}

impl PollError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Fatal(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Outcome of a wait that did not succeed
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("{0}")]
    Timeout(#[from] WaitError),

    #[error("{description} failed: {reason}")]
    Failed { description: String, reason: String },

    #[error("{0}: cancelled")]
    Cancelled(String),
}

impl ConditionError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Rich error context for a wait that ran out of time
#[derive(Debug, Clone)]
pub struct WaitError {
    /// What was being waited for
    pub description: String,
    /// Last transient error or state reported by the predicate
    pub last_state: String,
    pub elapsed: Duration,
    pub timeout: Duration,
    pub attempts: u32,
}

impl WaitError {
    pub fn new(description: impl Into<String>, timeout: Duration, elapsed: Duration) -> Self {
        Self {
            description: description.into(),
            last_state: "condition not met".to_string(),
            elapsed,
            timeout,
            attempts: 0,
        }
    }

    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.last_state = state.into();
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }
}

impl fmt::Display for WaitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "timeout waiting for {}", self.description)?;
        writeln!(f, "├─ Last state: {}", self.last_state)?;
        writeln!(f, "├─ Attempts: {}", self.attempts)?;
        writeln!(f, "├─ Elapsed: {:?}", self.elapsed)?;
        write!(f, "└─ Timeout: {:?}", self.timeout)
    }
}

impl std::error::Error for WaitError {}

/// Builder for a bounded poll, created by [`wait_until`]
#[must_use = "a wait does nothing until `await_condition` is awaited"]
pub struct WaitUntil<F> {
    description: String,
    predicate: F,
    timeout: Duration,
    interval: Duration,
    eager: bool,
    cancel: Option<CancellationToken>,
}

/// Poll `predicate` until it reports done, fails fatally, or `timeout` elapses
///
/// The first evaluation happens one interval after the start unless
/// [`WaitUntil::eager`] is set. A last evaluation always happens at the
/// deadline, so a timeout is reported no later than one interval after it.
pub fn wait_until<F, Fut>(description: impl Into<String>, timeout: Duration, predicate: F) -> WaitUntil<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, PollError>>,
{
    WaitUntil {
        description: description.into(),
        predicate,
        timeout,
        interval: DEFAULT_POLL_INTERVAL,
        eager: false,
        cancel: None,
    }
}

impl<F, Fut> WaitUntil<F>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, PollError>>,
{
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Evaluate the predicate immediately instead of after one interval
    pub fn eager(mut self) -> Self {
        self.eager = true;
        self
    }

    pub fn eager_if(mut self, eager: bool) -> Self {
        self.eager = eager;
        self
    }

    pub fn cancel_on(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub async fn await_condition(mut self) -> Result<(), ConditionError> {
        let token = self.cancel.take().unwrap_or_default();
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut next = if self.eager {
            start
        } else {
            (start + self.interval).min(deadline)
        };
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;

        info!(description = %self.description, timeout = ?self.timeout, "Waiting");

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(ConditionError::Cancelled(self.description));
                }
                _ = sleep_until(next) => {}
            }

            attempts += 1;
            let outcome = tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return Err(ConditionError::Cancelled(self.description));
                }
                outcome = (self.predicate)() => outcome,
            };

            match outcome {
                Ok(true) => {
                    info!(
                        description = %self.description,
                        attempts,
                        elapsed = ?start.elapsed(),
                        "Condition met"
                    );
                    return Ok(());
                }
                Ok(false) => {
                    debug!(description = %self.description, attempts, "Condition not met yet");
                }
                Err(PollError::Transient(message)) => {
                    debug!(description = %self.description, attempts, error = %message, "Transient error while polling");
                    last_error = Some(message);
                }
                Err(PollError::Fatal(reason)) => {
                    warn!(description = %self.description, attempts, error = %reason, "Condition failed");
                    return Err(ConditionError::Failed {
                        description: self.description,
                        reason,
                    });
                }
            }

            let now = Instant::now();
            if now >= deadline {
                let elapsed = now - start;
                warn!(description = %self.description, attempts, elapsed = ?elapsed, "Wait timed out");
                let mut err = WaitError::new(self.description, self.timeout, elapsed)
                    .with_attempts(attempts);
                if let Some(message) = last_error {
                    err = err.with_state(message);
                }
                return Err(ConditionError::Timeout(err));
            }
            next = (now + self.interval).min(deadline);
        }
    }
}

/// One-line state of an object, reported as the last state of a wait
pub trait ResourceState {
    /// Get a human-readable description of the resource's current state
    fn state_description(&self) -> String;
}

impl ResourceState for k8s_openapi::api::core::v1::Pod {
    fn state_description(&self) -> String {
        let name = self.metadata.name.as_deref().unwrap_or("?");
        let phase = self
            .status
            .as_ref()
            .and_then(|s| s.phase.as_deref())
            .unwrap_or("Unknown");

        let containers = self
            .status
            .as_ref()
            .and_then(|s| s.container_statuses.as_ref());

        match containers {
            Some(statuses) => {
                let total = statuses.len();
                let ready = statuses.iter().filter(|c| c.ready).count();
                let waiting_reasons: Vec<&str> = statuses
                    .iter()
                    .filter_map(|c| {
                        c.state
                            .as_ref()
                            .and_then(|s| s.waiting.as_ref())
                            .and_then(|w| w.reason.as_deref())
                    })
                    .collect();

                if waiting_reasons.is_empty() {
                    format!("{name}: phase={phase}, containers {ready}/{total} ready")
                } else {
                    format!(
                        "{name}: phase={phase}, containers {ready}/{total} ready, waiting: {}",
                        waiting_reasons.join(", ")
                    )
                }
            }
            None => format!("{name}: phase={phase}, no container status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_secs(10);

    #[tokio::test(start_paused = true)]
    async fn test_first_evaluation_waits_one_interval() {
        let start = Instant::now();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen_clone = seen.clone();

        wait_until("first poll", Duration::from_secs(60), move || {
            let seen = seen_clone.clone();
            async move {
                seen.lock().unwrap().get_or_insert(Instant::now());
                Ok(true)
            }
        })
        .interval(INTERVAL)
        .await_condition()
        .await
        .unwrap();

        let first = seen.lock().unwrap().unwrap();
        assert_eq!(first - start, INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eager_evaluates_immediately() {
        let start = Instant::now();
        wait_until("eager", Duration::from_secs(60), || async { Ok(true) })
            .interval(INTERVAL)
            .eager()
            .await_condition()
            .await
            .unwrap();

        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_returns_within_one_interval_of_becoming_true() {
        for becomes_true in [Duration::from_secs(1), Duration::from_secs(25), Duration::from_secs(40)] {
            let start = Instant::now();
            let result = wait_until("bounded", Duration::from_secs(120), move || async move {
                Ok(start.elapsed() >= becomes_true)
            })
            .interval(INTERVAL)
            .await_condition()
            .await;

            assert!(result.is_ok());
            let elapsed = start.elapsed();
            assert!(elapsed >= becomes_true, "{elapsed:?} < {becomes_true:?}");
            assert!(elapsed < becomes_true + INTERVAL, "{elapsed:?} too late for {becomes_true:?}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_times_out_within_one_interval_of_deadline() {
        for timeout in [Duration::from_secs(30), Duration::from_secs(35), Duration::from_secs(3)] {
            let start = Instant::now();
            let result = wait_until("never", timeout, || async { Ok(false) })
                .interval(INTERVAL)
                .await_condition()
                .await;

            let elapsed = start.elapsed();
            assert!(matches!(result, Err(ConditionError::Timeout(_))));
            assert!(elapsed >= timeout);
            assert!(elapsed < timeout + INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_swallowed_and_attached_on_timeout() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = wait_until("flaky", Duration::from_secs(30), move || {
            let c = counter_clone.clone();
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                Err(PollError::transient(format!("attempt {n} saw 503")))
            }
        })
        .interval(INTERVAL)
        .await_condition()
        .await;

        match result {
            Err(ConditionError::Timeout(err)) => {
                assert!(err.last_state.contains("saw 503"));
                assert_eq!(err.attempts, counter.load(Ordering::SeqCst));
                assert!(err.to_string().contains("flaky"));
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_then_success() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = counter.clone();

        let result = wait_until("recovers", Duration::from_secs(60), move || {
            let c = counter_clone.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(PollError::transient("connection reset"))
                } else {
                    Ok(true)
                }
            }
        })
        .interval(INTERVAL)
        .await_condition()
        .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_returns_at_once() {
        let start = Instant::now();
        let result = wait_until("build", Duration::from_secs(600), || async {
            Err(PollError::fatal("build failed"))
        })
        .interval(INTERVAL)
        .eager()
        .await_condition()
        .await;

        assert!(matches!(result, Err(ConditionError::Failed { ref reason, .. }) if reason == "build failed"));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_interrupts_sleep() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = wait_until("cancelled", Duration::from_secs(600), || async { Ok(false) })
            .interval(INTERVAL)
            .cancel_on(token)
            .await_condition()
            .await;

        assert!(matches!(result, Err(ConditionError::Cancelled(_))));
        assert!(start.elapsed() < Duration::from_secs(20));
    }

    #[test]
    fn test_wait_error_display() {
        let err = WaitError::new("runtime dmn pods", Duration::from_secs(60), Duration::from_secs(60))
            .with_state("0/1 pods running")
            .with_attempts(6);

        let output = err.to_string();
        assert!(output.contains("timeout waiting for runtime dmn pods"));
        assert!(output.contains("0/1 pods running"));
        assert!(output.contains("60s"));
    }

    #[test]
    fn test_pod_state_description() {
        use k8s_openapi::api::core::v1::{
            ContainerState, ContainerStateWaiting, ContainerStatus, Pod, PodStatus,
        };

        let pod = Pod {
            status: Some(PodStatus {
                phase: Some("Pending".to_string()),
                container_statuses: Some(vec![ContainerStatus {
                    name: "main".to_string(),
                    ready: false,
                    state: Some(ContainerState {
                        waiting: Some(ContainerStateWaiting {
                            reason: Some("ImagePullBackOff".to_string()),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let state = pod.state_description();
        assert!(state.contains("phase=Pending"));
        assert!(state.contains("0/1 ready"));
        assert!(state.contains("ImagePullBackOff"));
    }
}
