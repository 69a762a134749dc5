//! Auto-RPM controller: slow-start + AIMD on observed request outcomes.
//! Runs as an independent loop with its own tick, the way the latency
//! controller and the batch writer are independent loops — the only thing
//! they share is the semaphore's atomic limit.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use mw_ai::Outcome;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::semaphore::AdaptiveSemaphore;

#[derive(Debug, Clone, Copy)]
pub struct RpmControllerConfig {
  pub min_rpm: i64,
  pub max_rpm: i64,
  pub slow_start_until_rpm: i64,
  pub decrease_factor: f64,
  pub slow_start_factor: f64,
  pub increase_factor: f64,
  pub tick_interval: Duration,
}

impl Default for RpmControllerConfig {
  fn default() -> Self {
    Self {
      min_rpm: 100,
      max_rpm: 20_000,
      slow_start_until_rpm: 16_000,
      decrease_factor: 0.6,
      slow_start_factor: 2.0,
      increase_factor: 1.25,
      tick_interval: Duration::from_secs(1),
    }
  }
}

/// Accumulates outcome observations between ticks and adjusts
/// `semaphore`'s limit once per tick.
pub struct RpmController {
  semaphore: Arc<AdaptiveSemaphore>,
  config: RpmControllerConfig,
  observations: Mutex<Vec<Outcome>>,
}

impl RpmController {
  #[must_use]
  pub fn new(semaphore: Arc<AdaptiveSemaphore>, config: RpmControllerConfig) -> Arc<Self> {
    Arc::new(Self {
      semaphore,
      config,
      observations: Mutex::new(Vec::new()),
    })
  }

  /// Records the outcome of one completed request. Called from every
  /// handler invocation, success or failure — congestion is signal whether
  /// or not the job is ultimately retried.
  pub fn observe(&self, outcome: Outcome) {
    self.observations.lock().unwrap().push(outcome);
  }

  fn tick(&self) {
    let batch = std::mem::take(&mut *self.observations.lock().unwrap());
    if batch.is_empty() {
      return;
    }

    let congested = batch.iter().any(|o| o.is_congestion());
    let any_ok = batch.iter().any(|o| *o == Outcome::Ok);
    let current = self.semaphore.limit();

    let next = if congested {
      ((current as f64 * self.config.decrease_factor).floor() as i64).clamp(self.config.min_rpm, self.config.max_rpm)
    } else if any_ok {
      let factor = if current < self.config.slow_start_until_rpm {
        self.config.slow_start_factor
      } else {
        self.config.increase_factor
      };
      ((current as f64 * factor).ceil() as i64).clamp(self.config.min_rpm, self.config.max_rpm)
    } else {
      current
    };

    if next != current {
      debug!(from = current, to = next, congested, "auto-rpm adjustment");
      self.semaphore.set_limit(next);
    }
  }

  /// Runs the tick loop until `cancel` fires.
  pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(self.config.tick_interval);
    loop {
      tokio::select! {
        _ = ticker.tick() => self.tick(),
        () = cancel.cancelled() => {
          info!("auto-rpm controller stopping");
          break;
        }
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn congestion_decreases_limit_by_configured_factor() {
    let sem = Arc::new(AdaptiveSemaphore::new(1000));
    let controller = RpmController::new(sem.clone(), RpmControllerConfig::default());
    controller.observe(Outcome::RateLimited);
    controller.tick();
    assert_eq!(sem.limit(), 600);
  }

  #[test]
  fn slow_start_doubles_limit_below_threshold() {
    let sem = Arc::new(AdaptiveSemaphore::new(20));
    let controller = RpmController::new(sem.clone(), RpmControllerConfig::default());
    controller.observe(Outcome::Ok);
    controller.tick();
    assert_eq!(sem.limit(), 40);
  }

  #[test]
  fn ramps_linearly_once_past_slow_start_threshold() {
    let sem = Arc::new(AdaptiveSemaphore::new(17_000));
    let controller = RpmController::new(sem.clone(), RpmControllerConfig::default());
    controller.observe(Outcome::Ok);
    controller.tick();
    assert_eq!(sem.limit(), 20_000);
  }

  #[test]
  fn limit_never_exceeds_max_rpm() {
    let sem = Arc::new(AdaptiveSemaphore::new(19_999));
    let controller = RpmController::new(sem.clone(), RpmControllerConfig::default());
    controller.observe(Outcome::Ok);
    controller.tick();
    assert_eq!(sem.limit(), 20_000);
  }

  #[test]
  fn empty_tick_leaves_limit_unchanged() {
    let sem = Arc::new(AdaptiveSemaphore::new(500));
    let controller = RpmController::new(sem.clone(), RpmControllerConfig::default());
    controller.tick();
    assert_eq!(sem.limit(), 500);
  }
}
