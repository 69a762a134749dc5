//! The job-processing half of the system: a worker pool engine leased
//! against the durable job queue, an adaptive concurrency/rate layer in
//! front of the LLM backend, a micro-batched single-writer transaction
//! pipeline, and the analysis/embedding job handlers that tie them
//! together.

mod batch_writer;
mod engine;
mod handlers;
mod latency_controller;
mod producer;
mod rpm_controller;
mod semaphore;

pub use batch_writer::{BatchWriter, BatchWriterConfig, WriteFn};
pub use engine::{EngineConfig, EngineStats, HandlerMap, JobHandler};
pub use handlers::{AnalysisHandler, AnalysisJobPayload, EmbeddingHandler, EmbeddingJobPayload};
pub use latency_controller::{LatencyController, LatencyControllerConfig};
pub use producer::{ProducerConfig, run as run_producer};
pub use rpm_controller::{RpmController, RpmControllerConfig};
pub use semaphore::{AdaptiveSemaphore, SemaphorePermit};

use std::sync::Arc;
use std::time::Duration;

use mw_shared::APP_ENV;
use sea_orm::DatabaseConnection;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::info;

pub const ANALYSIS_JOB_TYPE: &str = "analysis";
pub const EMBEDDING_JOB_TYPE: &str = "embedding";

/// A concurrency/rate workload: its own semaphore, and — unless the
/// operator pinned a fixed RPM — its own auto-RPM and latency controller
/// loops. Each loop is independent; they only communicate through the
/// shared semaphore's atomic limit, the way the batch writer and the
/// engine's polling loop are independent of each other too.
struct Workload {
  semaphore: Arc<AdaptiveSemaphore>,
  rpm_controller: Arc<RpmController>,
  latency_controller: Arc<LatencyController>,
}

fn spawn_workload(fixed_rpm: u64, cancel: &CancellationToken, tasks: &mut JoinSet<()>) -> Workload {
  let rpm_config = RpmControllerConfig::default();
  let latency_config = LatencyControllerConfig::default();

  let initial_limit = if fixed_rpm > 0 { fixed_rpm as i64 } else { rpm_config.min_rpm };
  let semaphore = Arc::new(AdaptiveSemaphore::new(initial_limit));
  let rpm_controller = RpmController::new(semaphore.clone(), rpm_config);
  let latency_controller = LatencyController::new(semaphore.clone(), latency_config);

  if fixed_rpm == 0 {
    let rpm_loop = rpm_controller.clone();
    let rpm_cancel = cancel.clone();
    tasks.spawn(async move { rpm_loop.run(rpm_cancel).await });

    let latency_loop = latency_controller.clone();
    let latency_cancel = cancel.clone();
    tasks.spawn(async move { latency_loop.run(latency_cancel).await });
  }

  Workload {
    semaphore,
    rpm_controller,
    latency_controller,
  }
}

/// Builds the engine config from process-wide settings. A distinct owner
/// id per run lets `job.locked_by` identify which process instance holds a
/// lease, for operators inspecting a stuck queue.
fn engine_config() -> EngineConfig {
  EngineConfig {
    owner: format!("mw-worker-{}", uuid::Uuid::new_v4()),
    worker_count: APP_ENV.worker_count as usize,
    lease_ttl_seconds: APP_ENV.lease_ttl_seconds as i64,
    poll_interval: Duration::from_millis(APP_ENV.poll_interval_ms),
    ..EngineConfig::default()
  }
}

fn batch_writer_config() -> BatchWriterConfig {
  BatchWriterConfig {
    batch_size: APP_ENV.tx_batch_size as usize,
    flush_interval: Duration::from_millis(APP_ENV.tx_flush_interval_ms),
    ..BatchWriterConfig::default()
  }
}

/// Assembles the batch writer, both workloads' controllers, the two job
/// handlers, and runs the worker pool engine until `cancel` fires. Returns
/// once the engine and every independent loop it spawned have drained.
///
/// `queue_db` and `warehouse_db` are deliberately distinct connections: the
/// engine leases and settles jobs against the queue database, while the
/// batch writer and both handlers read and write the warehouse, so queue
/// pressure never contends with warehouse writes.
pub async fn run(queue_db: DatabaseConnection, warehouse_db: DatabaseConnection, cancel: CancellationToken) -> EngineStats {
  let mut background = JoinSet::new();

  let (batch_writer, batch_writer_handle) = BatchWriter::spawn(warehouse_db.clone(), batch_writer_config(), cancel.clone());

  let analysis_workload = spawn_workload(APP_ENV.analysis_rpm, &cancel, &mut background);
  let embed_workload = spawn_workload(APP_ENV.embed_rpm, &cancel, &mut background);

  let mut handlers: HandlerMap = HandlerMap::new();
  handlers.insert(
    ANALYSIS_JOB_TYPE,
    Arc::new(AnalysisHandler::new(
      warehouse_db.clone(),
      batch_writer.clone(),
      analysis_workload.semaphore,
      analysis_workload.rpm_controller,
      analysis_workload.latency_controller,
      cancel.clone(),
    )),
  );
  handlers.insert(
    EMBEDDING_JOB_TYPE,
    Arc::new(EmbeddingHandler::new(
      warehouse_db,
      batch_writer,
      embed_workload.semaphore,
      embed_workload.rpm_controller,
      embed_workload.latency_controller,
      cancel.clone(),
    )),
  );

  let stats = engine::run(queue_db, Arc::new(handlers), engine_config(), cancel).await;

  background.shutdown().await;
  if tokio::time::timeout(Duration::from_secs(5), batch_writer_handle).await.is_err() {
    info!("batch writer did not shut down within the grace period");
  }

  stats
}
