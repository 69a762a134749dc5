//! Embedding job handler: resolves an entity's canonical text, calls the
//! embedding API, and upserts the packed float vector keyed by
//! `(entity_type, entity_id, model)`.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use mw_ai::{classify, embed};
use mw_core::{EncodeOptions, encode_conversation};
use mw_entities::{chat, embedding, emotion, entity_facet, humor_item, message, topic};
use mw_shared::{APP_ENV, AppError, ErrorKind};
use sea_orm::{
  ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter,
  sea_query::OnConflict,
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::batch_writer::{BatchWriter, WriteFn};
use crate::engine::JobHandler;
use crate::latency_controller::LatencyController;
use crate::rpm_controller::RpmController;
use crate::semaphore::AdaptiveSemaphore;

/// Payload contract for an `"embedding"` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingJobPayload {
  pub entity_type: String,
  pub entity_id: i64,
}

/// Seam between the handler and the embedding call, so tests can swap in a
/// fixed vector instead of reaching the network.
#[async_trait]
trait Embedder: Send + Sync {
  async fn embed(&self, text: &str) -> Result<Vec<f64>, AppError>;
}

struct RealEmbedder;

#[async_trait]
impl Embedder for RealEmbedder {
  async fn embed(&self, text: &str) -> Result<Vec<f64>, AppError> {
    embed(text).await
  }
}

/// Packs a float64 vector little-endian: `len(blob) = 8 * dimension`.
fn pack_embedding(vector: &[f64]) -> Vec<u8> {
  let mut blob = Vec::with_capacity(vector.len() * 8);
  for value in vector {
    blob.extend_from_slice(&value.to_le_bytes());
  }
  blob
}

/// Resolves the text to embed for `entity_type`/`entity_id`. Facet kinds
/// are prefixed with their kind so distinct facet types don't collide in
/// embedding space even when their text happens to match.
async fn resolve_text(db: &DatabaseConnection, entity_type: &str, entity_id: i64) -> Result<String, AppError> {
  match entity_type {
    "conversation" => encode_conversation(db, entity_id, &EncodeOptions::default()).await,
    "message" => {
      let row = message::Entity::find_by_id(entity_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::with_kind(ErrorKind::DataMapping, anyhow::anyhow!("unknown message id {entity_id}")))?;
      Ok(row.content)
    }
    "chat" => {
      let row = chat::Entity::find_by_id(entity_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::with_kind(ErrorKind::DataMapping, anyhow::anyhow!("unknown chat id {entity_id}")))?;
      Ok(row.chat_name.unwrap_or(row.chat_identifier))
    }
    "entity" => {
      let row = entity_facet::Entity::find_by_id(entity_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::with_kind(ErrorKind::DataMapping, anyhow::anyhow!("unknown entity facet id {entity_id}")))?;
      Ok(format!("entity: {}", row.title))
    }
    "topic" => {
      let row = topic::Entity::find_by_id(entity_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::with_kind(ErrorKind::DataMapping, anyhow::anyhow!("unknown topic id {entity_id}")))?;
      Ok(format!("topic: {}", row.title))
    }
    "emotion" => {
      let row = emotion::Entity::find_by_id(entity_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::with_kind(ErrorKind::DataMapping, anyhow::anyhow!("unknown emotion id {entity_id}")))?;
      Ok(format!("emotion: {}", row.emotion_type))
    }
    "humor_item" => {
      let row = humor_item::Entity::find_by_id(entity_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::with_kind(ErrorKind::DataMapping, anyhow::anyhow!("unknown humor item id {entity_id}")))?;
      Ok(format!("humor_item: {}", row.snippet))
    }
    other => Err(AppError::with_kind(ErrorKind::Validation, anyhow::anyhow!("unknown embedding entity_type {other}"))),
  }
}

/// Calls the embedding API for a resolved entity's text and upserts the
/// packed vector. Submits its write through the shared [`BatchWriter`] the
/// same way the analysis handler does.
pub struct EmbeddingHandler {
  db: DatabaseConnection,
  batch_writer: BatchWriter,
  semaphore: Arc<AdaptiveSemaphore>,
  rpm_controller: Arc<RpmController>,
  latency_controller: Arc<LatencyController>,
  cancel: CancellationToken,
  embedder: Arc<dyn Embedder>,
}

impl EmbeddingHandler {
  #[must_use]
  pub fn new(
    db: DatabaseConnection,
    batch_writer: BatchWriter,
    semaphore: Arc<AdaptiveSemaphore>,
    rpm_controller: Arc<RpmController>,
    latency_controller: Arc<LatencyController>,
    cancel: CancellationToken,
  ) -> Self {
    Self {
      db,
      batch_writer,
      semaphore,
      rpm_controller,
      latency_controller,
      cancel,
      embedder: Arc::new(RealEmbedder),
    }
  }

  #[cfg(test)]
  fn new_with_embedder(
    db: DatabaseConnection,
    batch_writer: BatchWriter,
    semaphore: Arc<AdaptiveSemaphore>,
    rpm_controller: Arc<RpmController>,
    latency_controller: Arc<LatencyController>,
    cancel: CancellationToken,
    embedder: Arc<dyn Embedder>,
  ) -> Self {
    Self {
      db,
      batch_writer,
      semaphore,
      rpm_controller,
      latency_controller,
      cancel,
      embedder,
    }
  }
}

#[async_trait]
impl JobHandler for EmbeddingHandler {
  async fn handle(&self, payload: &str) -> Result<(), AppError> {
    let payload: EmbeddingJobPayload = serde_json::from_str(payload).map_err(|err| AppError::with_kind(ErrorKind::Validation, err))?;

    let text = resolve_text(&self.db, &payload.entity_type, payload.entity_id).await?;
    if text.trim().is_empty() {
      return Err(AppError::with_kind(
        ErrorKind::DataMapping,
        anyhow::anyhow!("empty source text for {}:{}", payload.entity_type, payload.entity_id),
      ));
    }

    let permit = self.semaphore.acquire(&self.cancel).await?;
    let started_at = Instant::now();
    let embed_result = self.embedder.embed(&text).await;
    let elapsed = started_at.elapsed();
    drop(permit);

    let vector = match embed_result {
      Ok(vector) => {
        self.rpm_controller.observe(mw_ai::Outcome::Ok);
        self.latency_controller.observe(elapsed, true);
        vector
      }
      Err(err) => {
        let outcome = classify(&err);
        self.rpm_controller.observe(outcome);
        self.latency_controller.observe(elapsed, false);
        return Err(err);
      }
    };

    let entity_type = payload.entity_type.clone();
    let entity_id = payload.entity_id;
    let model_name = APP_ENV.embed_model.clone();
    let dimension = vector.len() as i32;
    let blob = pack_embedding(&vector);

    let apply: WriteFn = Arc::new(move |txn: &DatabaseTransaction| {
      let entity_type = entity_type.clone();
      let model_name = model_name.clone();
      let blob = blob.clone();
      Box::pin(async move {
        let existing = embedding::Entity::find()
          .filter(embedding::Column::EntityType.eq(entity_type.clone()))
          .filter(embedding::Column::EntityId.eq(entity_id))
          .filter(embedding::Column::Model.eq(model_name.clone()))
          .one(txn)
          .await?;

        if let Some(existing) = existing {
          let mut active: embedding::ActiveModel = existing.into();
          active.embedding_blob = Set(blob);
          active.dimension = Set(dimension);
          active.created_at = Set(Utc::now());
          active.update(txn).await?;
        } else {
          embedding::Entity::insert(embedding::ActiveModel {
            entity_type: Set(entity_type),
            entity_id: Set(entity_id),
            model: Set(model_name),
            embedding_blob: Set(blob),
            dimension: Set(dimension),
            created_at: Set(Utc::now()),
            ..Default::default()
          })
          .on_conflict(
            OnConflict::columns([embedding::Column::EntityType, embedding::Column::EntityId, embedding::Column::Model])
              .do_nothing()
              .to_owned(),
          )
          .exec(txn)
          .await?;
        }

        Ok(())
      })
    });

    self.batch_writer.submit(apply, &self.cancel).await
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::batch_writer::BatchWriterConfig;
  use crate::latency_controller::LatencyControllerConfig;
  use crate::rpm_controller::RpmControllerConfig;
  use mw_entities::conversation;
  use sea_orm::{ConnectionTrait, Database, Schema};

  #[test]
  fn packs_and_round_trips_little_endian() {
    let vector = vec![1.5_f64, -2.25, 0.0, 3.0];
    let blob = pack_embedding(&vector);
    assert_eq!(blob.len(), vector.len() * 8);

    let decoded: Vec<f64> = blob.chunks_exact(8).map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap())).collect();
    assert_eq!(decoded, vector);
  }

  /// Stub embedder returning a fixed vector, bypassing the network.
  struct FixedEmbedder(Vec<f64>);

  #[async_trait]
  impl Embedder for FixedEmbedder {
    async fn embed(&self, _text: &str) -> Result<Vec<f64>, AppError> {
      Ok(self.0.clone())
    }
  }

  async fn setup() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let schema = Schema::new(sea_orm::DatabaseBackend::Sqlite);
    for stmt in [
      schema.create_table_from_entity(conversation::Entity),
      schema.create_table_from_entity(message::Entity),
      schema.create_table_from_entity(embedding::Entity),
    ] {
      db.execute(db.get_database_backend().build(&stmt)).await.unwrap();
    }
    db
  }

  fn handler(db: DatabaseConnection, cancel: CancellationToken, vector: Vec<f64>) -> EmbeddingHandler {
    let (batch_writer, _writer_handle) = BatchWriter::spawn(db.clone(), BatchWriterConfig::default(), cancel.clone());
    let semaphore = Arc::new(AdaptiveSemaphore::new(100));
    let rpm_controller = RpmController::new(semaphore.clone(), RpmControllerConfig::default());
    let latency_controller = LatencyController::new(semaphore.clone(), LatencyControllerConfig::default());
    EmbeddingHandler::new_with_embedder(
      db,
      batch_writer,
      semaphore,
      rpm_controller,
      latency_controller,
      cancel,
      Arc::new(FixedEmbedder(vector)),
    )
  }

  /// S6 — embedding idempotence: running the embedding job twice for the
  /// same `(entity_type, entity_id, model)` leaves exactly one row, whose
  /// dimension and decoded blob match the fake response vector.
  #[tokio::test]
  async fn s6_embedding_job_twice_leaves_exactly_one_row() {
    let db = setup().await;

    conversation::ActiveModel {
      chat_id: Set(1),
      initiator_id: Set(None),
      start_time: Set(Utc::now()),
      end_time: Set(Utc::now()),
      message_count: Set(0),
      gap_threshold_seconds: Set(10_800),
      summary: Set(None),
      ..Default::default()
    }
    .insert(&db)
    .await
    .unwrap();

    message::ActiveModel {
      guid: Set("m1".to_owned()),
      chat_id: Set(1),
      sender_id: Set(None),
      content: Set("hello".to_owned()),
      timestamp: Set(Utc::now()),
      is_from_me: Set(true),
      message_type: Set("text".to_owned()),
      service_name: Set("iMessage".to_owned()),
      reply_to_guid: Set(None),
      associated_message_guid: Set(None),
      conversation_id: Set(Some(1)),
      ..Default::default()
    }
    .insert(&db)
    .await
    .unwrap();

    let vector = vec![0.5_f64, 1.0, -1.5];
    let cancel = CancellationToken::new();
    let payload = serde_json::to_string(&EmbeddingJobPayload {
      entity_type: "conversation".to_owned(),
      entity_id: 1,
    })
    .unwrap();

    let first = handler(db.clone(), cancel.clone(), vector.clone());
    first.handle(&payload).await.unwrap();

    let second = handler(db.clone(), cancel.clone(), vector.clone());
    second.handle(&payload).await.unwrap();

    let rows = embedding::Entity::find().all(&db).await.unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].dimension as usize, vector.len());

    let decoded: Vec<f64> = rows[0]
      .embedding_blob
      .chunks_exact(8)
      .map(|chunk| f64::from_le_bytes(chunk.try_into().unwrap()))
      .collect();
    assert_eq!(decoded, vector);
  }
}
