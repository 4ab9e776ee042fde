//! Request contexts carrying cancellation and deadline signals.
//!
//! A [`Context`] is handed to every blocking admission call. It fires either
//! when one of its cancellation handles is triggered or when its deadline
//! passes, and reports which of the two happened.

use std::time::Duration;

use futures::future;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::error::RateLimitError;

/// A cloneable cancellation/deadline signal.
///
/// Contexts are derived from each other: a child keeps all of its parent's
/// cancellation handles and can only tighten the deadline.
#[derive(Debug, Clone, Default)]
pub struct Context {
    /// Cancellation channels inherited from every ancestor
    cancel: Vec<watch::Receiver<bool>>,
    /// Earliest deadline across the ancestry
    deadline: Option<Instant>,
}

/// Triggers cancellation of the contexts created alongside it.
///
/// Dropping the handle does not cancel anything.
#[derive(Debug)]
pub struct CancelHandle {
    sender: watch::Sender<bool>,
}

impl CancelHandle {
    /// Fire the cancellation signal.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    /// Whether [`cancel`](Self::cancel) has been called.
    pub fn is_canceled(&self) -> bool {
        *self.sender.borrow()
    }
}

impl Context {
    /// A context that never fires.
    pub fn background() -> Self {
        Self::default()
    }

    /// Derive a context that can be canceled through the returned handle.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let (sender, receiver) = watch::channel(false);
        let mut ctx = self.clone();
        ctx.cancel.push(receiver);
        (ctx, CancelHandle { sender })
    }

    /// Derive a context that expires after `timeout`.
    pub fn with_timeout(&self, timeout: Duration) -> Context {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Derive a context that expires at `deadline`, or at the parent's
    /// deadline if that is earlier.
    pub fn with_deadline(&self, deadline: Instant) -> Context {
        let mut ctx = self.clone();
        ctx.deadline = Some(match self.deadline {
            Some(existing) => existing.min(deadline),
            None => deadline,
        });
        ctx
    }

    /// The deadline, if one is set.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Report why the context has fired, if it has.
    ///
    /// Cancellation takes precedence over an expired deadline.
    pub fn err(&self) -> Option<RateLimitError> {
        if self.cancel.iter().any(|rx| *rx.borrow()) {
            return Some(RateLimitError::Canceled);
        }

        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(RateLimitError::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolve once the context fires, yielding the reason.
    ///
    /// A context without handles or deadline never resolves.
    pub async fn done(&self) -> RateLimitError {
        let canceled = async {
            if self.cancel.is_empty() {
                future::pending::<()>().await;
            }
            let waits = self
                .cancel
                .iter()
                .cloned()
                .map(|rx| Box::pin(wait_canceled(rx)));
            future::select_all(waits).await;
        };

        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = canceled => RateLimitError::Canceled,
            _ = expired => RateLimitError::DeadlineExceeded,
        }
    }
}

async fn wait_canceled(mut rx: watch::Receiver<bool>) {
    let closed = rx.wait_for(|canceled| *canceled).await.is_err();
    if closed {
        // Handle dropped without canceling.
        future::pending::<()>().await;
    }
}
