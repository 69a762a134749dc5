//! Run-time-adjustable concurrency gate used as the shared RPM budget for
//! both the auto-RPM controller and the latency controller: neither needs
//! to know about the other, because whichever last called `set_limit` with
//! the lower value is the one that is actually felt by acquirers.

use std::sync::atomic::{AtomicI64, Ordering};

use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use mw_shared::{AppError, ErrorKind};

/// A counting semaphore whose capacity (`limit`) can be changed while
/// acquirers are waiting. Unlike `tokio::sync::Semaphore`, permits are not
/// pre-allocated tokens — `in_flight` is compared against `limit` on every
/// acquire attempt, so shrinking the limit takes effect immediately for the
/// next waiter without having to claw back already-issued permits.
pub struct AdaptiveSemaphore {
  limit: AtomicI64,
  in_flight: AtomicI64,
  notify: Notify,
}

impl AdaptiveSemaphore {
  #[must_use]
  pub fn new(initial_limit: i64) -> Self {
    Self {
      limit: AtomicI64::new(initial_limit.max(1)),
      in_flight: AtomicI64::new(0),
      notify: Notify::new(),
    }
  }

  #[must_use]
  pub fn limit(&self) -> i64 {
    self.limit.load(Ordering::Acquire)
  }

  #[must_use]
  pub fn in_flight(&self) -> i64 {
    self.in_flight.load(Ordering::Acquire)
  }

  /// Sets a new capacity. Wakes every waiter when the limit rises so they
  /// can race for the newly available headroom; a shrinking limit simply
  /// lets in-flight work drain naturally; no preemption.
  pub fn set_limit(&self, n: i64) {
    let n = n.max(1);
    let old = self.limit.swap(n, Ordering::AcqRel);
    if n > old {
      self.notify.notify_waiters();
    }
  }

  /// Blocks until a slot is free, then reserves it. Cancelling `cancel`
  /// while waiting returns a `RetryableTransient` error rather than a
  /// permit.
  pub async fn acquire(&self, cancel: &CancellationToken) -> Result<SemaphorePermit<'_>, AppError> {
    loop {
      let limit = self.limit.load(Ordering::Acquire);
      let current = self.in_flight.load(Ordering::Acquire);
      if current < limit
        && self
          .in_flight
          .compare_exchange(current, current + 1, Ordering::AcqRel, Ordering::Acquire)
          .is_ok()
      {
        return Ok(SemaphorePermit { semaphore: self });
      }

      let notified = self.notify.notified();
      tokio::select! {
        () = notified => {}
        () = cancel.cancelled() => {
          return Err(AppError::with_kind(ErrorKind::RetryableTransient, anyhow::anyhow!("semaphore acquire cancelled")));
        }
      }
    }
  }

  fn release(&self) {
    self.in_flight.fetch_sub(1, Ordering::AcqRel);
    self.notify.notify_waiters();
  }
}

/// Releases its slot on drop. Holding a permit across an `.await` is the
/// whole point: it marks the request as in-flight for as long as the
/// handler is waiting on the provider.
pub struct SemaphorePermit<'a> {
  semaphore: &'a AdaptiveSemaphore,
}

impl Drop for SemaphorePermit<'_> {
  fn drop(&mut self) {
    self.semaphore.release();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn acquire_blocks_until_release() {
    let sem = Arc::new(AdaptiveSemaphore::new(1));
    let cancel = CancellationToken::new();
    let first = sem.acquire(&cancel).await.unwrap();

    let sem2 = sem.clone();
    let cancel2 = cancel.clone();
    let waiter = tokio::spawn(async move { sem2.acquire(&cancel2).await.map(|_p| ()) });

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!waiter.is_finished());

    drop(first);
    waiter.await.unwrap().unwrap();
  }

  #[tokio::test]
  async fn set_limit_wakes_waiters_on_increase() {
    let sem = Arc::new(AdaptiveSemaphore::new(1));
    let cancel = CancellationToken::new();
    let _first = sem.acquire(&cancel).await.unwrap();

    let sem2 = sem.clone();
    let cancel2 = cancel.clone();
    let waiter = tokio::spawn(async move { sem2.acquire(&cancel2).await.map(|_p| ()) });

    tokio::time::sleep(Duration::from_millis(20)).await;
    sem.set_limit(2);
    tokio::time::timeout(Duration::from_millis(200), waiter).await.unwrap().unwrap().unwrap();
  }

  #[tokio::test]
  async fn cancellation_unblocks_acquire() {
    let sem = Arc::new(AdaptiveSemaphore::new(1));
    let cancel = CancellationToken::new();
    let _first = sem.acquire(&cancel).await.unwrap();

    let sem2 = sem.clone();
    let cancel2 = cancel.clone();
    let waiter = tokio::spawn(async move { sem2.acquire(&cancel2).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    assert!(waiter.await.unwrap().is_err());
  }
}
