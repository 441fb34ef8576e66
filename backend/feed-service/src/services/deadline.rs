//! Request deadline and caller cancellation for store/cache calls
//!
//! Every dependency call made on behalf of a feed request goes through
//! [`Deadline::run`]. When the budget is spent or the caller cancels, the call
//! resolves to `AppError::Aborted`, never to a store or cache error.

use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{timeout, Instant};

use crate::error::{AppError, Result};

/// Handle the caller keeps to cancel an in-flight request.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancelled: Option<watch::Receiver<bool>>,
}

impl Deadline {
    /// Deadline `budget` from now, not cancellable.
    pub fn after(budget: Duration) -> Self {
        Self {
            at: Instant::now() + budget,
            cancelled: None,
        }
    }

    /// Deadline `budget` from now that the returned handle can cancel early.
    pub fn cancellable(budget: Duration) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let deadline = Self {
            at: Instant::now() + budget,
            cancelled: Some(rx),
        };
        (deadline, CancelHandle { tx })
    }

    pub fn remaining(&self) -> Option<Duration> {
        self.at
            .checked_duration_since(Instant::now())
            .filter(|d| !d.is_zero())
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or(false)
    }

    /// Run `fut` within what is left of the deadline.
    pub async fn run<F, T>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(AppError::Aborted(format!("{} cancelled by caller", op)));
        }
        let remaining = self
            .remaining()
            .ok_or_else(|| AppError::Aborted(format!("deadline elapsed before {}", op)))?;

        let mut cancelled = self.cancelled.clone();
        tokio::select! {
            res = timeout(remaining, fut) => match res {
                Ok(result) => result,
                Err(_) => Err(AppError::Aborted(format!("{} exceeded request deadline", op))),
            },
            _ = wait_cancelled(&mut cancelled) => {
                Err(AppError::Aborted(format!("{} cancelled by caller", op)))
            }
        }
    }
}

async fn wait_cancelled(rx: &mut Option<watch::Receiver<bool>>) {
    let Some(rx) = rx else {
        return std::future::pending().await;
    };
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            // Handle dropped without cancelling
            return std::future::pending().await;
        }
    }
}
