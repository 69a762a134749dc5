//! Adaptive latency controller: tracks an EWMA baseline of request latency
//! and trims the shared semaphore when the current window's mean latency
//! spikes relative to that baseline, or when the failure rate crosses a
//! threshold. Independent of the auto-RPM controller; whichever of the two
//! most recently pushed the limit down is the one that is felt.

use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::semaphore::AdaptiveSemaphore;

#[derive(Debug, Clone, Copy)]
pub struct LatencyControllerConfig {
  pub decrease_factor: f64,
  pub increase_pct: f64,
  pub fail_rate_threshold: f64,
  pub max_in_flight: i64,
  pub ewma_alpha: f64,
  pub spike_ratio: f64,
  pub tick_interval: Duration,
}

impl Default for LatencyControllerConfig {
  fn default() -> Self {
    Self {
      decrease_factor: 0.6,
      increase_pct: 0.1,
      fail_rate_threshold: 0.2,
      max_in_flight: 20_000,
      ewma_alpha: 0.2,
      spike_ratio: 2.0,
      tick_interval: Duration::from_secs(1),
    }
  }
}

struct Sample {
  latency_ms: f64,
  ok: bool,
}

pub struct LatencyController {
  semaphore: Arc<AdaptiveSemaphore>,
  config: LatencyControllerConfig,
  samples: Mutex<Vec<Sample>>,
  baseline_ms: Mutex<Option<f64>>,
}

impl LatencyController {
  #[must_use]
  pub fn new(semaphore: Arc<AdaptiveSemaphore>, config: LatencyControllerConfig) -> Arc<Self> {
    Arc::new(Self {
      semaphore,
      config,
      samples: Mutex::new(Vec::new()),
      baseline_ms: Mutex::new(None),
    })
  }

  /// Records one completed request's observed latency and success flag.
  pub fn observe(&self, latency: Duration, ok: bool) {
    self.samples.lock().unwrap().push(Sample {
      latency_ms: latency.as_secs_f64() * 1000.0,
      ok,
    });
  }

  fn tick(&self) {
    let batch = std::mem::take(&mut *self.samples.lock().unwrap());
    if batch.is_empty() {
      return;
    }

    let count = batch.len() as f64;
    let mean_ms = batch.iter().map(|s| s.latency_ms).sum::<f64>() / count;
    let fail_rate = batch.iter().filter(|s| !s.ok).count() as f64 / count;

    let mut baseline_guard = self.baseline_ms.lock().unwrap();
    let baseline = baseline_guard.unwrap_or(mean_ms);
    let ratio = if baseline > 0.0 { mean_ms / baseline } else { 1.0 };
    let congested = ratio > self.config.spike_ratio || fail_rate > self.config.fail_rate_threshold;

    let current = self.semaphore.limit();
    let next = if congested {
      ((current as f64 * self.config.decrease_factor).ceil() as i64).clamp(1, self.config.max_in_flight)
    } else {
      ((current as f64 * (1.0 + self.config.increase_pct)).ceil() as i64).clamp(1, self.config.max_in_flight)
    };

    if next != current {
      debug!(from = current, to = next, mean_ms, ratio, fail_rate, "latency controller adjustment");
      self.semaphore.set_limit(next);
    }

    *baseline_guard = Some(self.config.ewma_alpha * mean_ms + (1.0 - self.config.ewma_alpha) * baseline);
  }

  /// Runs the tick loop until `cancel` fires.
  pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval(self.config.tick_interval);
    loop {
      tokio::select! {
        _ = ticker.tick() => self.tick(),
        () = cancel.cancelled() => {
          info!("latency controller stopping");
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
  fn latency_spike_decreases_limit() {
    let sem = Arc::new(AdaptiveSemaphore::new(1000));
    let controller = LatencyController::new(sem.clone(), LatencyControllerConfig::default());
    controller.observe(Duration::from_millis(100), true);
    controller.tick();
    assert_eq!(sem.limit(), 1000);

    for _ in 0..5 {
      controller.observe(Duration::from_millis(400), true);
    }
    controller.tick();
    assert!(sem.limit() < 1000);
  }

  #[test]
  fn high_fail_rate_decreases_limit_even_without_latency_spike() {
    let sem = Arc::new(AdaptiveSemaphore::new(1000));
    let controller = LatencyController::new(sem.clone(), LatencyControllerConfig::default());
    for i in 0..10 {
      controller.observe(Duration::from_millis(50), i >= 5);
    }
    controller.tick();
    assert!(sem.limit() < 1000);
  }

  #[test]
  fn steady_latency_increases_limit() {
    let sem = Arc::new(AdaptiveSemaphore::new(1000));
    let controller = LatencyController::new(sem.clone(), LatencyControllerConfig::default());
    controller.observe(Duration::from_millis(50), true);
    controller.tick();
    for _ in 0..3 {
      controller.observe(Duration::from_millis(50), true);
      controller.tick();
    }
    assert!(sem.limit() > 1000);
  }
}
