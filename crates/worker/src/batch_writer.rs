//! Micro-batched single-writer transaction pipeline. The warehouse is a
//! single-writer SQLite file, so every write in the process funnels through
//! one consumer task that applies a micro-batch of submissions in a single
//! transaction, falling back to one transaction per submission when a batch
//! member fails so a bad write can't take down its batch-mates.
//!
//! A submission is `Fn(&DatabaseTransaction) -> BoxFuture<Result<(), AppError>>`
//! rather than `FnOnce`: an isolated retry re-invokes the same closure
//! against a fresh transaction, so it must be safely callable more than
//! once (it may only capture `Clone` state, not move-only resources).

use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use mw_shared::AppError;

pub type WriteFn = Arc<dyn Fn(&DatabaseTransaction) -> BoxFuture<'_, Result<(), AppError>> + Send + Sync>;

struct WriteRequest {
  apply: WriteFn,
  respond: oneshot::Sender<Result<(), AppError>>,
}

/// Handle submitters use to enqueue a write and await its outcome. Cloning
/// is cheap — it is just a channel sender.
#[derive(Clone)]
pub struct BatchWriter {
  sender: mpsc::Sender<WriteRequest>,
}

#[derive(Debug, Clone, Copy)]
pub struct BatchWriterConfig {
  pub batch_size: usize,
  pub flush_interval: Duration,
  pub channel_capacity: usize,
}

impl Default for BatchWriterConfig {
  fn default() -> Self {
    Self {
      batch_size: 32,
      flush_interval: Duration::from_millis(50),
      channel_capacity: 256,
    }
  }
}

impl BatchWriter {
  /// Spawns the consumer task and returns a handle plus its join handle so
  /// callers can await clean shutdown.
  pub fn spawn(db: DatabaseConnection, config: BatchWriterConfig, cancel: CancellationToken) -> (Self, tokio::task::JoinHandle<()>) {
    let (sender, receiver) = mpsc::channel(config.channel_capacity);
    let handle = tokio::spawn(run(db, receiver, config, cancel));
    (Self { sender }, handle)
  }

  /// Submits a write and awaits its commit (or isolated failure). Honors
  /// cancellation on both the enqueue and the wait.
  pub async fn submit(&self, apply: WriteFn, cancel: &CancellationToken) -> Result<(), AppError> {
    let (respond, receiver) = oneshot::channel();
    let request = WriteRequest { apply, respond };

    tokio::select! {
      result = self.sender.send(request) => {
        result.map_err(|_| AppError::new(anyhow::anyhow!("batch writer channel closed")))?;
      }
      () = cancel.cancelled() => {
        return Err(AppError::new(anyhow::anyhow!("batch writer submission cancelled")));
      }
    }

    tokio::select! {
      result = receiver => result.map_err(|_| AppError::new(anyhow::anyhow!("batch writer dropped response")))?,
      () = cancel.cancelled() => Err(AppError::new(anyhow::anyhow!("batch writer wait cancelled"))),
    }
  }
}

async fn run(db: DatabaseConnection, mut receiver: mpsc::Receiver<WriteRequest>, config: BatchWriterConfig, cancel: CancellationToken) {
  let mut pending = Vec::with_capacity(config.batch_size);
  let mut ticker = tokio::time::interval(config.flush_interval);

  loop {
    tokio::select! {
      maybe_request = receiver.recv() => {
        match maybe_request {
          Some(request) => {
            pending.push(request);
            if pending.len() >= config.batch_size {
              flush(&db, std::mem::take(&mut pending)).await;
            }
          }
          None => break,
        }
      }
      _ = ticker.tick() => {
        if !pending.is_empty() {
          flush(&db, std::mem::take(&mut pending)).await;
        }
      }
      () = cancel.cancelled() => break,
    }
  }

  receiver.close();
  while let Ok(request) = receiver.try_recv() {
    pending.push(request);
  }
  flush(&db, pending).await;
}

async fn flush(db: &DatabaseConnection, batch: Vec<WriteRequest>) {
  if batch.is_empty() {
    return;
  }
  let batch_len = batch.len();

  match try_batch(db, &batch).await {
    Ok(()) => {
      debug!(batch_len, "batch writer committed batch");
      for request in batch {
        let _ = request.respond.send(Ok(()));
      }
    }
    Err(err) => {
      warn!(batch_len, %err, "batch failed, isolating each submission in its own transaction");
      for request in batch {
        let result = run_isolated(db, &request.apply).await;
        if let Err(ref err) = result {
          error!(%err, "isolated write failed");
        }
        let _ = request.respond.send(result);
      }
    }
  }
}

async fn try_batch(db: &DatabaseConnection, batch: &[WriteRequest]) -> Result<(), AppError> {
  let txn = db.begin().await?;
  for request in batch {
    (request.apply)(&txn).await?;
  }
  txn.commit().await?;
  Ok(())
}

async fn run_isolated(db: &DatabaseConnection, apply: &WriteFn) -> Result<(), AppError> {
  let txn = db.begin().await?;
  apply(&txn).await?;
  txn.commit().await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use mw_entities::watermark;
  use sea_orm::{ActiveModelTrait, ActiveValue::Set, ConnectionTrait, Database, EntityTrait, Schema};

  async fn setup() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let schema = Schema::new(sea_orm::DatabaseBackend::Sqlite);
    let stmt = schema.create_table_from_entity(watermark::Entity);
    db.execute(db.get_database_backend().build(&stmt)).await.unwrap();
    db
  }

  fn write_watermark(name: &'static str, succeed: bool) -> WriteFn {
    Arc::new(move |txn: &DatabaseTransaction| {
      Box::pin(async move {
        if !succeed {
          return Err(AppError::new(anyhow::anyhow!("forced failure for {name}")));
        }
        watermark::ActiveModel {
          source: Set("test".to_owned()),
          name: Set(name.to_owned()),
          value_int: Set(Some(1)),
          value_text: Set(None),
          updated_ts: Set(chrono::Utc::now()),
        }
        .insert(txn)
        .await?;
        Ok(())
      })
    })
  }

  #[tokio::test]
  async fn commits_a_full_batch_in_one_transaction() {
    let db = setup().await;
    let cancel = CancellationToken::new();
    let (writer, _handle) = BatchWriter::spawn(
      db.clone(),
      BatchWriterConfig {
        batch_size: 2,
        flush_interval: Duration::from_millis(10),
        channel_capacity: 16,
      },
      cancel.clone(),
    );

    writer.submit(write_watermark("a", true), &cancel).await.unwrap();
    writer.submit(write_watermark("b", true), &cancel).await.unwrap();

    let rows = watermark::Entity::find().all(&db).await.unwrap();
    assert_eq!(rows.len(), 2);
    cancel.cancel();
  }

  #[tokio::test]
  async fn one_failing_closure_does_not_block_its_batch_mates() {
    let db = setup().await;
    let cancel = CancellationToken::new();
    let (writer, _handle) = BatchWriter::spawn(
      db.clone(),
      BatchWriterConfig {
        batch_size: 3,
        flush_interval: Duration::from_millis(10),
        channel_capacity: 16,
      },
      cancel.clone(),
    );

    let ok_a = {
      let writer = writer.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move { writer.submit(write_watermark("ok-a", true), &cancel).await })
    };
    let failing = {
      let writer = writer.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move { writer.submit(write_watermark("boom", false), &cancel).await })
    };
    let ok_b = {
      let writer = writer.clone();
      let cancel = cancel.clone();
      tokio::spawn(async move { writer.submit(write_watermark("ok-b", true), &cancel).await })
    };

    assert!(ok_a.await.unwrap().is_ok());
    assert!(failing.await.unwrap().is_err());
    assert!(ok_b.await.unwrap().is_ok());

    let rows = watermark::Entity::find().all(&db).await.unwrap();
    assert_eq!(rows.len(), 2);
    cancel.cancel();
  }
}
