//! Progress reporting and cooperative cancellation
//!
//! The pipeline reports a 0-100 value through a plain callback and checks a
//! [`CancellationToken`] at every checkpoint. Cancellation surfaces as the
//! dedicated [`Cancelled`] error, which callers treat as "not completed".

use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Build was cancelled at a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Build cancelled")]
pub struct Cancelled;

type Sink = Arc<dyn Fn(f64) + Send + Sync>;

/// Progress sink plus cancellation flag
#[derive(Clone)]
pub struct Progress {
    sink: Sink,
    cancel: CancellationToken,
    start: f64,
    span: f64,
}

impl fmt::Debug for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Progress")
            .field("start", &self.start)
            .field("span", &self.span)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

impl Progress {
    pub fn new(sink: impl Fn(f64) + Send + Sync + 'static, cancel: CancellationToken) -> Self {
        Self {
            sink: Arc::new(sink),
            cancel,
            start: 0.0,
            span: 100.0,
        }
    }

    /// Progress that reports nowhere and is never cancelled
    pub fn silent() -> Self {
        Self::new(|_| {}, CancellationToken::new())
    }

    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Sub-range `[from, to]` of this range, both given in this range's 0-100 scale
    pub fn scoped(&self, from: f64, to: f64) -> Self {
        let from = from.clamp(0.0, 100.0);
        let to = to.clamp(from, 100.0);
        Self {
            sink: Arc::clone(&self.sink),
            cancel: self.cancel.clone(),
            start: self.start + self.span * from / 100.0,
            span: self.span * (to - from) / 100.0,
        }
    }

    /// Report `percent` (0-100 within this range), then check for cancellation
    pub fn checkpoint(&self, percent: f64) -> Result<(), Cancelled> {
        let overall = self.start + self.span * percent.clamp(0.0, 100.0) / 100.0;
        (self.sink)(overall);
        if self.cancel.is_cancelled() {
            return Err(Cancelled);
        }
        Ok(())
    }

    /// Report `done` of `total` steps within this range
    pub fn step(&self, done: usize, total: usize) -> Result<(), Cancelled> {
        let percent = if total == 0 {
            100.0
        } else {
            done as f64 / total as f64 * 100.0
        };
        self.checkpoint(percent)
    }
}
