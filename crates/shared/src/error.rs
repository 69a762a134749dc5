use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt::Display;

/// Coarse error classification shared by the queue engine (fail vs. dead)
/// and the rate/latency controllers (congestion observation).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
  /// Malformed payload, unknown entity type, missing required config.
  /// Non-retryable: the queue dead-letters after a single attempt.
  Validation,
  /// 429, timeout, network error, 5xx, or an explicit empty-output signal.
  /// Retried per queue policy; observed by the rate/latency controllers.
  RetryableTransient,
  /// Warehouse lookup miss (e.g. chat_identifier not yet present).
  /// Retried for a few attempts in case a later ETL run creates the row.
  DataMapping,
  /// Transaction/commit failure.
  Persistence,
  /// Source DB corruption, missing disk access, etc. Stops the worker.
  Fatal,
}

impl ErrorKind {
  /// Whether an error of this kind should observably count as
  /// "congestion" to the auto-RPM and latency controllers.
  #[must_use]
  pub const fn is_congestion_signal(self) -> bool {
    matches!(self, Self::RetryableTransient)
  }
}

#[derive(Debug)]
pub struct AppError {
  err: anyhow::Error,
  kind: ErrorKind,
}

impl AppError {
  /// Create a `RetryableTransient` error — the common case for I/O failures.
  pub fn new<E: Into<anyhow::Error>>(err: E) -> Self {
    Self {
      err: err.into(),
      kind: ErrorKind::RetryableTransient,
    }
  }

  /// Create with an explicit classification.
  pub fn with_kind<E: Into<anyhow::Error>>(kind: ErrorKind, err: E) -> Self {
    Self { err: err.into(), kind }
  }

  #[must_use]
  pub const fn kind(&self) -> ErrorKind {
    self.kind
  }

  /// Get backtrace from anyhow (requires `RUST_BACKTRACE=1` to capture)
  pub fn backtrace(&self) -> &Backtrace {
    self.err.backtrace()
  }

  /// Downcast into a concrete error type anywhere in the wrapped chain, for
  /// callers that need to classify the underlying cause (e.g. the congestion
  /// controllers distinguishing a rate-limit response from a timeout).
  pub fn downcast_ref<E: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static>(&self) -> Option<&E> {
    self.err.downcast_ref::<E>()
  }
}

impl Display for AppError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let bt = self.err.backtrace();
    if bt.status() == BacktraceStatus::Captured {
      write!(f, "[{:?}] {}\nBacktrace:\n{}", self.kind, self.err, bt)
    } else {
      write!(f, "[{:?}] {}", self.kind, self.err)
    }
  }
}

impl std::error::Error for AppError {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    self.err.source()
  }
}

impl<E> From<E> for AppError
where
  E: Into<anyhow::Error>,
{
  fn from(err: E) -> Self {
    Self::new(err)
  }
}
