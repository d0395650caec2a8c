use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

/// Tuning knobs for the reconnect backoff.
#[derive(Debug, Clone, Copy)]
pub struct BackoffOptions {
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub factor: f64,
    /// `None` means retry forever.
    pub max_retries: Option<u32>,
}

impl Default for BackoffOptions {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            factor: 2.0,
            max_retries: None,
        }
    }
}

/// Whether a retry timer is pending, tracked separately from the attempt
/// count so that two failure events observed before the timer fires cannot
/// arm a second timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Idle,
    Armed,
    Firing,
}

/// Exponential backoff with a single owned retry timer.
///
/// Delay for the Nth retry is `min(base_delay * factor^N, max_delay)` with
/// N counted from zero, so the first retry waits `base_delay`.
pub struct BackoffPolicy {
    opts: BackoffOptions,
    attempt_count: u32,
    phase: Arc<Mutex<RetryPhase>>,
    timer: Option<JoinHandle<()>>,
}

impl BackoffPolicy {
    pub fn new(opts: BackoffOptions) -> Self {
        Self {
            opts,
            attempt_count: 0,
            phase: Arc::new(Mutex::new(RetryPhase::Idle)),
            timer: None,
        }
    }

    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let delay = self.opts.base_delay.as_millis() as f64 * self.opts.factor.powi(attempt as i32);
        Duration::from_millis(delay.min(self.opts.max_delay.as_millis() as f64) as u64)
    }

    /// Arm the retry timer, invoking `callback` once after the computed delay.
    ///
    /// Returns `false` without arming when a retry is already pending or the
    /// `max_retries` ceiling is reached; the caller treats the latter as
    /// "give up".
    pub fn schedule_retry<F>(&mut self, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if *self.phase.lock().unwrap() != RetryPhase::Idle {
            return false;
        }
        if let Some(max) = self.opts.max_retries {
            if self.attempt_count >= max {
                return false;
            }
        }

        let delay = self.delay_for_attempt(self.attempt_count);
        self.attempt_count += 1;
        *self.phase.lock().unwrap() = RetryPhase::Armed;

        let phase = self.phase.clone();
        self.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            *phase.lock().unwrap() = RetryPhase::Firing;
            callback();
            *phase.lock().unwrap() = RetryPhase::Idle;
        }));
        true
    }

    /// Zero the attempt count and cancel any pending timer. Idempotent.
    pub fn reset(&mut self) {
        self.attempt_count = 0;
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
        *self.phase.lock().unwrap() = RetryPhase::Idle;
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn phase(&self) -> RetryPhase {
        *self.phase.lock().unwrap()
    }

    pub fn is_armed(&self) -> bool {
        self.phase() != RetryPhase::Idle
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(BackoffOptions::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[test]
    fn delays_grow_exponentially_and_cap() {
        let policy = BackoffPolicy::default();
        let expected = [1000u64, 2000, 4000, 8000, 16000, 30000, 30000];
        for (attempt, ms) in expected.iter().enumerate() {
            assert_eq!(
                policy.delay_for_attempt(attempt as u32),
                Duration::from_millis(*ms),
                "attempt {attempt}"
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn schedule_arms_once_and_fires() {
        let mut policy = BackoffPolicy::default();
        let fired = Arc::new(AtomicU32::new(0));

        let f = fired.clone();
        assert!(policy.schedule_retry(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(policy.attempt_count(), 1);
        assert_eq!(policy.phase(), RetryPhase::Armed);

        // A second call before the timer fires must not arm another timer.
        let f = fired.clone();
        assert!(!policy.schedule_retry(move || {
            f.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(policy.attempt_count(), 1);

        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(policy.phase(), RetryPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn reset_cancels_pending_timer() {
        let mut policy = BackoffPolicy::default();
        let fired = Arc::new(AtomicBool::new(false));

        let f = fired.clone();
        policy.schedule_retry(move || {
            f.store(true, Ordering::SeqCst);
        });
        policy.reset();

        assert_eq!(policy.attempt_count(), 0);
        assert_eq!(policy.phase(), RetryPhase::Idle);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(!fired.load(Ordering::SeqCst), "cancelled timer must not fire");
    }

    #[tokio::test(start_paused = true)]
    async fn reset_is_idempotent() {
        let mut policy = BackoffPolicy::default();
        policy.reset();
        policy.reset();
        assert_eq!(policy.attempt_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn max_retries_ceiling_refuses_further_scheduling() {
        let mut policy = BackoffPolicy::new(BackoffOptions {
            max_retries: Some(2),
            ..Default::default()
        });

        for expected_attempt in 1..=2u32 {
            assert!(policy.schedule_retry(|| {}));
            assert_eq!(policy.attempt_count(), expected_attempt);
            // Let the timer fire so the phase returns to idle.
            tokio::time::sleep(Duration::from_secs(35)).await;
            assert_eq!(policy.phase(), RetryPhase::Idle);
        }

        assert!(!policy.schedule_retry(|| {}), "ceiling reached, must no-op");
        assert_eq!(policy.attempt_count(), 2);
    }
}
