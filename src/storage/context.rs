use std::time::Instant;

use thiserror::Error;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture, WaitForCancellationFutureOwned};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextError {
    #[error("context cancelled")]
    Cancelled,
    #[error("context deadline exceeded")]
    DeadlineExceeded
}

/// Cancellation signal plus an optional deadline, handed to every storage
/// call. Cloning shares the same signal.
#[derive(Debug, Clone, Default)]
pub struct TransferContext {
    token: CancellationToken,
    deadline: Option<Instant>
}

impl TransferContext {
    pub fn new() -> TransferContext {
        TransferContext::default()
    }

    pub fn with_deadline(deadline: Instant) -> TransferContext {
        TransferContext {
            token: CancellationToken::new(),
            deadline: Some(deadline)
        }
    }

    /// A context that is cancelled with this one but can also be cancelled
    /// on its own without affecting the parent.
    pub fn child(&self) -> TransferContext {
        TransferContext {
            token: self.token.child_token(),
            deadline: self.deadline
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }

    pub fn cancelled_owned(&self) -> WaitForCancellationFutureOwned {
        self.token.clone().cancelled_owned()
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    pub fn err(&self) -> Option<ContextError> {
        if self.token.is_cancelled() {
            return Some(ContextError::Cancelled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None
        }
    }

    pub fn check(&self) -> Result<(), ContextError> {
        match self.err() {
            Some(error) => Err(error),
            None => Ok(())
        }
    }
}
