//! Cancellation and deadlines for exchange operations.
//!
//! Every dial, handshake step, queued send and response wait takes a
//! [`Context`]. A context is done once it is cancelled or its deadline passes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{ExchangeError, Result};

/// A cancellation token paired with an optional deadline.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// A context that is never done unless cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// A child context that also expires after `timeout`.
    ///
    /// The child's deadline never extends past the parent's.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let deadline = Instant::now() + timeout;
        Self {
            token: self.token.child_token(),
            deadline: Some(match self.deadline {
                Some(parent) if parent < deadline => parent,
                _ => deadline,
            }),
        }
    }

    /// A child context: cancelling it leaves the parent untouched.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Whether the context is cancelled or past its deadline.
    pub fn is_done(&self) -> bool {
        self.token.is_cancelled() || self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// The reason the context is done, if it is.
    pub fn err(&self) -> Option<ExchangeError> {
        if self.token.is_cancelled() {
            Some(ExchangeError::Cancelled)
        } else if self.deadline.is_some_and(|d| Instant::now() >= d) {
            Some(ExchangeError::Timeout)
        } else {
            None
        }
    }

    /// Resolves once the context is done, with the reason.
    pub async fn done(&self) -> ExchangeError {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => ExchangeError::Cancelled,
                    _ = tokio::time::sleep_until(deadline) => ExchangeError::Timeout,
                }
            }
            None => {
                self.token.cancelled().await;
                ExchangeError::Cancelled
            }
        }
    }

    /// Run a future until it completes or the context is done.
    pub async fn run<F, T>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = T>,
    {
        if let Some(err) = self.err() {
            return Err(err);
        }
        tokio::select! {
            biased;
            err = self.done() => Err(err),
            value = fut => Ok(value),
        }
    }
}
