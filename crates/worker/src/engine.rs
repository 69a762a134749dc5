//! Worker pool engine: a coordinator task leases batches of jobs and fans
//! them into a channel; a fixed pool of worker tasks pull one job at a
//! time, dispatch to a registered handler by `job_type`, and record the
//! outcome. A separate ticker sweeps expired leases back to `pending`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use mw_entities::job;
use mw_shared::{AppError, ErrorKind};
use sea_orm::DatabaseConnection;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// A registered job handler, dispatched to by `job_type`. Handlers are
/// expected to be re-entrant: a lease that expires mid-run may be picked up
/// again by another worker, and idempotent upserts keyed by the job's
/// semantic key are what make that safe (spec section 5).
#[async_trait::async_trait]
pub trait JobHandler: Send + Sync {
  async fn handle(&self, payload: &str) -> Result<(), AppError>;
}

/// Totals returned once the engine has drained in-flight work after
/// shutdown.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineStats {
  pub succeeded: u64,
  pub failed: u64,
  pub skipped: u64,
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
  pub owner: String,
  pub worker_count: usize,
  pub batch_size: u64,
  pub lease_ttl_seconds: i64,
  pub poll_interval: Duration,
  pub requeue_interval: Duration,
  pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
  fn default() -> Self {
    Self {
      owner: format!("mw-worker-{}", uuid::Uuid::new_v4()),
      worker_count: 8,
      batch_size: 16,
      lease_ttl_seconds: 300,
      poll_interval: Duration::from_millis(500),
      requeue_interval: Duration::from_secs(30),
      shutdown_timeout: Duration::from_secs(30),
    }
  }
}

pub type HandlerMap = HashMap<&'static str, Arc<dyn JobHandler>>;

/// Runs the coordinator + worker-pool loop until `cancel` fires, then waits
/// up to `config.shutdown_timeout` for in-flight jobs before returning.
pub async fn run(db: DatabaseConnection, handlers: Arc<HandlerMap>, config: EngineConfig, cancel: CancellationToken) -> EngineStats {
  let (tx, rx) = mpsc::channel::<job::Model>(config.worker_count.max(1) * 2);
  let rx = Arc::new(AsyncMutex::new(rx));
  let stats = Arc::new(StdMutex::new(EngineStats::default()));

  let mut workers = JoinSet::new();
  for worker_id in 0..config.worker_count {
    let rx = rx.clone();
    let db = db.clone();
    let handlers = handlers.clone();
    let stats = stats.clone();
    workers.spawn(async move {
      loop {
        let job = {
          let mut guard = rx.lock().await;
          guard.recv().await
        };
        let Some(job) = job else { break };
        dispatch(&db, &handlers, job, &stats, worker_id).await;
      }
    });
  }

  let requeue_cancel = cancel.clone();
  let requeue_db = db.clone();
  let requeue_interval = config.requeue_interval;
  let requeue_task = tokio::spawn(async move {
    let mut ticker = tokio::time::interval(requeue_interval);
    loop {
      tokio::select! {
        _ = ticker.tick() => {
          match mw_queue::requeue_expired(&requeue_db, chrono::Utc::now()).await {
            Ok(n) if n > 0 => info!(reclaimed = n, "requeued expired leases"),
            Ok(_) => {}
            Err(err) => warn!(%err, "requeue sweep failed"),
          }
        }
        () = requeue_cancel.cancelled() => break,
      }
    }
  });

  let mut poll_ticker = tokio::time::interval(config.poll_interval);
  loop {
    tokio::select! {
      _ = poll_ticker.tick() => {
        match mw_queue::lease(&db, &config.owner, config.batch_size, config.lease_ttl_seconds).await {
          Ok(jobs) => {
            for leased in jobs {
              if tx.send(leased).await.is_err() {
                break;
              }
            }
          }
          Err(err) => warn!(%err, "lease poll failed"),
        }
      }
      () = cancel.cancelled() => break,
    }
  }

  drop(tx);
  requeue_task.abort();

  let drain = async {
    while workers.join_next().await.is_some() {}
  };
  if tokio::time::timeout(config.shutdown_timeout, drain).await.is_err() {
    warn!("shutdown timeout elapsed with workers still in flight; aborting");
  }
  workers.abort_all();
  while workers.join_next().await.is_some() {}

  let final_stats = *stats.lock().unwrap();
  info!(succeeded = final_stats.succeeded, failed = final_stats.failed, skipped = final_stats.skipped, "worker pool stopped");
  final_stats
}

async fn dispatch(db: &DatabaseConnection, handlers: &HandlerMap, leased: job::Model, stats: &StdMutex<EngineStats>, worker_id: usize) {
  let Some(handler) = handlers.get(leased.job_type.as_str()) else {
    warn!(worker_id, job_id = leased.id, job_type = %leased.job_type, "skipping unrecognized job type");
    stats.lock().unwrap().skipped += 1;
    return;
  };

  match handler.handle(&leased.payload).await {
    Ok(()) => {
      if let Err(err) = mw_queue::succeed(db, leased.id).await {
        error!(job_id = leased.id, %err, "failed to mark job succeeded");
      }
      stats.lock().unwrap().succeeded += 1;
    }
    Err(err) => {
      if err.kind() == ErrorKind::Fatal {
        error!(job_id = leased.id, %err, "fatal error from handler");
      }
      let force_dead = err.kind() == ErrorKind::Validation;
      if let Err(mark_err) = mw_queue::fail_with_policy(db, leased.id, &err.to_string(), force_dead).await {
        error!(job_id = leased.id, %mark_err, "failed to mark job failed");
      }
      stats.lock().unwrap().failed += 1;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mw_migration::{MigratorTrait, QueueMigrator};
  use sea_orm::Database;
  use std::sync::atomic::{AtomicUsize, Ordering};

  struct CountingHandler {
    calls: Arc<AtomicUsize>,
    fail: bool,
  }

  #[async_trait::async_trait]
  impl JobHandler for CountingHandler {
    async fn handle(&self, _payload: &str) -> Result<(), AppError> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      if self.fail {
        Err(AppError::with_kind(ErrorKind::Validation, anyhow::anyhow!("boom")))
      } else {
        Ok(())
      }
    }
  }

  #[tokio::test]
  async fn succeeds_known_job_types_and_skips_unknown() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    QueueMigrator::up(&db, None).await.unwrap();

    mw_queue::enqueue(&db, "known", None, "{}".to_owned(), 3).await.unwrap();
    mw_queue::enqueue(&db, "mystery", None, "{}".to_owned(), 3).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut handlers: HandlerMap = HashMap::new();
    handlers.insert(
      "known",
      Arc::new(CountingHandler {
        calls: calls.clone(),
        fail: false,
      }),
    );

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let db_clone = db.clone();
    let config = EngineConfig {
      worker_count: 2,
      poll_interval: Duration::from_millis(10),
      requeue_interval: Duration::from_millis(50),
      shutdown_timeout: Duration::from_millis(500),
      ..Default::default()
    };

    let handle = tokio::spawn(run(db_clone, Arc::new(handlers), config, cancel_clone));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    let stats = handle.await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(stats.succeeded, 1);
    assert!(stats.skipped >= 1);
  }

  #[tokio::test]
  async fn validation_errors_dead_letter_without_retry() {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    QueueMigrator::up(&db, None).await.unwrap();

    let queued = mw_queue::enqueue(&db, "broken", None, "{}".to_owned(), 5).await.unwrap();

    let calls = Arc::new(AtomicUsize::new(0));
    let mut handlers: HandlerMap = HashMap::new();
    handlers.insert("broken", Arc::new(CountingHandler { calls, fail: true }));

    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    let db_clone = db.clone();
    let config = EngineConfig {
      worker_count: 1,
      poll_interval: Duration::from_millis(10),
      requeue_interval: Duration::from_millis(50),
      shutdown_timeout: Duration::from_millis(500),
      ..Default::default()
    };

    let handle = tokio::spawn(run(db_clone, Arc::new(handlers), config, cancel_clone));
    tokio::time::sleep(Duration::from_millis(100)).await;
    cancel.cancel();
    handle.await.unwrap();

    let reloaded = job::Entity::find_by_id(queued.id).one(&db).await.unwrap().unwrap();
    assert_eq!(reloaded.state, "dead", "validation errors dead-letter on the first attempt");
    assert_eq!(reloaded.attempt, 1);
  }
}
