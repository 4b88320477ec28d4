//! Cycle-wide cancellation and deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, sleep_until, timeout};
use tokio_util::sync::CancellationToken;

use crate::core::types::StopReason;

/// Why a collaborator call did not finish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("cycle deadline elapsed")]
    Deadline,
    #[error("cycle cancelled")]
    Cancelled,
}

impl Interrupted {
    pub fn stop_reason(self) -> StopReason {
        match self {
            Interrupted::Deadline => StopReason::CtxTimeout,
            Interrupted::Cancelled => StopReason::NaturalStop,
        }
    }
}

/// Cancellation token plus the deadline for the running cycle.
#[derive(Debug, Clone)]
pub struct CycleContext {
    token: CancellationToken,
    deadline: Instant,
}

impl CycleContext {
    pub fn new(max_duration: Duration) -> Self {
        Self::with_token(CancellationToken::new(), max_duration)
    }

    /// Context driven by a caller-owned token (e.g. a shutdown signal).
    pub fn with_token(token: CancellationToken, max_duration: Duration) -> Self {
        Self {
            token,
            deadline: Instant::now() + max_duration,
        }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// `Err` once the token is cancelled or the deadline passed.
    pub fn check(&self) -> Result<(), Interrupted> {
        if self.token.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        if Instant::now() >= self.deadline {
            return Err(Interrupted::Deadline);
        }
        Ok(())
    }

    /// Race `fut` against cancellation and the deadline.
    ///
    /// The future is dropped when either fires.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Interrupted> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.token.cancelled() => Err(Interrupted::Cancelled),
            _ = sleep_until(self.deadline) => Err(Interrupted::Deadline),
            out = fut => Ok(out),
        }
    }

    /// Like [`CycleContext::run`] with an additional per-call limit.
    ///
    /// `Ok(None)` means the call limit elapsed while the cycle was still live.
    pub async fn run_limited<F: Future>(
        &self,
        limit: Duration,
        fut: F,
    ) -> Result<Option<F::Output>, Interrupted> {
        let out = self.run(timeout(limit, fut)).await?;
        Ok(out.ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn run_returns_output_before_deadline() {
        let ctx = CycleContext::new(Duration::from_secs(5));
        assert_eq!(ctx.run(async { 7 }).await, Ok(7));
        assert_eq!(ctx.check(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_interrupts_slow_calls() {
        let ctx = CycleContext::new(Duration::from_secs(1));
        let slow = tokio::time::sleep(Duration::from_secs(10));
        assert_eq!(ctx.run(slow).await, Err(Interrupted::Deadline));
        assert_eq!(ctx.check(), Err(Interrupted::Deadline));
    }

    /// Verifies an external cancel wins over the deadline and maps to a natural stop.
    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_and_maps_to_natural_stop() {
        let token = CancellationToken::new();
        let ctx = CycleContext::with_token(token.clone(), Duration::from_secs(60));
        token.cancel();
        let result = ctx.run(async { 1 }).await;
        assert_eq!(result, Err(Interrupted::Cancelled));
        assert_eq!(Interrupted::Cancelled.stop_reason(), StopReason::NaturalStop);
        assert_eq!(Interrupted::Deadline.stop_reason(), StopReason::CtxTimeout);
    }

    #[tokio::test(start_paused = true)]
    async fn call_limit_elapses_without_ending_cycle() {
        let ctx = CycleContext::new(Duration::from_secs(60));
        let slow = tokio::time::sleep(Duration::from_secs(10));
        assert_eq!(ctx.run_limited(Duration::from_secs(1), slow).await, Ok(None));
        assert_eq!(ctx.check(), Ok(()));
    }
}
