//! Per-call context threaded alongside the request through every policy.
//!
//! Carries the caller's deadline, a cancellation token, and the attempt
//! number assigned by the retry policy. Cheap to clone; the retry policy
//! derives one child per attempt.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancellation: CancellationToken,
    attempt: u32,
    call: Arc<CallState>,
}

/// State shared by every attempt of one logical call.
#[derive(Debug, Default)]
struct CallState {
    reauthenticated: AtomicBool,
    caller_request_id: OnceLock<bool>,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set an absolute deadline.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        self
    }

    /// Set a deadline relative to now.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Attach a caller-owned cancellation token.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Fresh per-call state; the pipeline derives one per `send`.
    pub fn for_call(&self) -> Self {
        let mut ctx = self.clone();
        ctx.call = Arc::default();
        ctx.attempt = 0;
        ctx
    }

    /// Claim the single 401-driven re-authentication of this call.
    /// Returns false if an earlier attempt already used it.
    pub fn claim_reauthentication(&self) -> bool {
        !self.call.reauthenticated.swap(true, Ordering::AcqRel)
    }

    /// Whether the caller supplied the request id, decided by the first
    /// attempt that asks and fixed for the rest of the call.
    pub(crate) fn caller_request_id(&self, present: impl FnOnce() -> bool) -> bool {
        *self.call.caller_request_id.get_or_init(present)
    }

    pub fn with_attempt(&self, attempt: u32) -> Self {
        let mut ctx = self.clone();
        ctx.attempt = attempt;
        ctx
    }

    /// Zero-based attempt number; 0 outside of retries.
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Time left before the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    /// Fail if cancelled or past the deadline.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if matches!(self.remaining(), Some(left) if left.is_zero()) {
            return Err(Error::DeadlineExceeded);
        }
        Ok(())
    }

    /// Drive `fut` until it completes, the caller cancels, or the deadline
    /// elapses. Dropping `fut` on the losing branches aborts any I/O it owns.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check()?;
        let deadline = self.deadline;
        let expiry = async move {
            match deadline {
                Some(d) => tokio::time::sleep_until(d).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancellation.cancelled() => Err(Error::Cancelled),
            _ = expiry => Err(Error::DeadlineExceeded),
            out = fut => out,
        }
    }

    /// Cancellable sleep used for retry backoff.
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(duration).await;
            Ok(())
        })
        .await
    }
}
