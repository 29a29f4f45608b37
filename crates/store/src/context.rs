//! Operation context: cooperative cancellation plus deadlines.
//!
//! Every suspending store call takes an [`OpContext`]. The context carries a
//! caller-supplied [`CancellationToken`] and an optional deadline; when the
//! caller sets no deadline, a per-store default of 30 seconds applies. Stores
//! check liveness before dispatch and wrap each network suspension point in
//! [`OpContext::run`], which loses the race to cancellation or the deadline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use umbra_error::{Result, UmbraError};

/// Default timeout applied when the caller supplies no deadline.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Cancellation and deadline scope for one logical operation.
#[derive(Debug, Clone)]
pub struct OpContext {
    cancel: CancellationToken,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context with no deadline (stores still apply [`DEFAULT_TIMEOUT`]).
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: None,
        }
    }

    /// A context that times out `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    /// A context driven by an external cancellation token.
    pub fn with_cancellation(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            deadline: None,
        }
    }

    /// A child context: cancelling the child never cancels the parent,
    /// cancelling the parent cancels the child. The deadline is inherited.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancel this context (and its children).
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// The underlying token, for integrating with `select!` loops.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Time remaining until the effective deadline.
    pub fn remaining(&self) -> Duration {
        match self.deadline {
            Some(deadline) => deadline.saturating_duration_since(Instant::now()),
            None => DEFAULT_TIMEOUT,
        }
    }

    /// Fail fast when already cancelled or past the deadline.
    ///
    /// Called before dispatching work; `operation` names the caller for the
    /// error message.
    pub fn ensure_live(&self, operation: &str) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(UmbraError::cancelled(operation));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(UmbraError::timeout(operation, Duration::ZERO));
            }
        }
        Ok(())
    }

    /// Race `fut` against cancellation and the deadline.
    ///
    /// The losing future is dropped, which aborts in-flight I/O.
    pub async fn run<F, T>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.ensure_live(operation)?;
        let timeout = self.remaining();
        tokio::select! {
            () = self.cancel.cancelled() => Err(UmbraError::cancelled(operation)),
            () = tokio::time::sleep(timeout) => Err(UmbraError::timeout(operation, timeout)),
            result = fut => result,
        }
    }
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new()
    }
}
