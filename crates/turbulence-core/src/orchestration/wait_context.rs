use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::orchestration::Signal;

#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    signal: Arc<Signal>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.signal.fire();
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_fired()
    }

    pub async fn cancelled(&self) {
        self.signal.wait().await;
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitInterrupt {
    DeadlineExceeded,
    Cancelled,
}

/// Bounds a blocking hub call with an optional deadline and a cancellation token.
#[derive(Clone, Debug, Default)]
pub struct WaitContext {
    deadline: Option<Instant>,
    cancellation: CancellationToken,
}

impl WaitContext {
    /// No deadline; only an explicit cancel ends the wait early.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            cancellation: CancellationToken::new(),
        }
    }

    pub fn with_optional_timeout(timeout: Option<Duration>) -> Self {
        match timeout {
            Some(timeout) => Self::with_timeout(timeout),
            None => Self::background(),
        }
    }

    pub fn cancellable_by(mut self, cancellation: CancellationToken) -> Self {
        self.cancellation = cancellation;
        self
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    /// Drives `future` until it completes, the deadline passes or the context is cancelled.
    /// A future that is ready wins over a simultaneous interrupt.
    pub async fn run<F: Future>(&self, future: F) -> Result<F::Output, WaitInterrupt> {
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            output = future => Ok(output),
            () = self.cancellation.cancelled() => Err(WaitInterrupt::Cancelled),
            () = deadline => Err(WaitInterrupt::DeadlineExceeded),
        }
    }
}
