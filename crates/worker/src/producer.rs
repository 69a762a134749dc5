//! Analysis/embedding job producer: an independent loop that scans the
//! warehouse for conversations and facets that still need an LLM pass and
//! enqueues jobs for them, deduplicated on the job's semantic key so a
//! conversation that is already queued or in flight is never enqueued
//! twice.

use std::collections::HashSet;
use std::time::Duration;

use mw_entities::{conversation, conversation_analysis, embedding, emotion, entity_facet, humor_item, topic};
use mw_shared::{APP_ENV, AppError};
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QuerySelect};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::handlers::{AnalysisJobPayload, EmbeddingJobPayload};

const ANALYSIS_MAX_ATTEMPTS: i32 = 5;
const EMBEDDING_MAX_ATTEMPTS: i32 = 5;

#[derive(Debug, Clone, Copy)]
pub struct ProducerConfig {
  pub scan_interval: Duration,
}

impl Default for ProducerConfig {
  fn default() -> Self {
    Self {
      scan_interval: Duration::from_secs(30),
    }
  }
}

#[derive(Debug, Default, Clone, Copy)]
struct ScanStats {
  analysis_enqueued: u64,
  embedding_enqueued: u64,
}

async fn enqueue_analysis_jobs(warehouse_db: &DatabaseConnection, queue_db: &DatabaseConnection, prompt_id: &str) -> Result<u64, AppError> {
  let conversation_ids: Vec<i64> = conversation::Entity::find().select_only().column(conversation::Column::Id).into_tuple().all(warehouse_db).await?;

  let analyzed: HashSet<i64> = conversation_analysis::Entity::find()
    .filter(conversation_analysis::Column::PromptId.eq(prompt_id.to_owned()))
    .filter(conversation_analysis::Column::Status.eq("completed".to_owned()))
    .select_only()
    .column(conversation_analysis::Column::ConversationId)
    .into_tuple::<i64>()
    .all(warehouse_db)
    .await?
    .into_iter()
    .collect();

  let mut enqueued = 0;
  for conversation_id in conversation_ids {
    if analyzed.contains(&conversation_id) {
      continue;
    }
    let payload = AnalysisJobPayload {
      conversation_id,
      prompt_id: prompt_id.to_owned(),
    };
    let key = format!("analysis:{conversation_id}:{prompt_id}");
    mw_queue::enqueue(queue_db, "analysis", Some(&key), serde_json::to_string(&payload)?, ANALYSIS_MAX_ATTEMPTS).await?;
    enqueued += 1;
  }

  Ok(enqueued)
}

async fn already_embedded(warehouse_db: &DatabaseConnection, entity_type: &str, model: &str) -> Result<HashSet<i64>, AppError> {
  Ok(
    embedding::Entity::find()
      .filter(embedding::Column::EntityType.eq(entity_type.to_owned()))
      .filter(embedding::Column::Model.eq(model.to_owned()))
      .select_only()
      .column(embedding::Column::EntityId)
      .into_tuple::<i64>()
      .all(warehouse_db)
      .await?
      .into_iter()
      .collect(),
  )
}

async fn enqueue_embedding_jobs_for(
  warehouse_db: &DatabaseConnection,
  queue_db: &DatabaseConnection,
  entity_type: &str,
  ids: Vec<i64>,
) -> Result<u64, AppError> {
  let existing = already_embedded(warehouse_db, entity_type, &APP_ENV.embed_model).await?;

  let mut enqueued = 0;
  for entity_id in ids {
    if existing.contains(&entity_id) {
      continue;
    }
    let payload = EmbeddingJobPayload {
      entity_type: entity_type.to_owned(),
      entity_id,
    };
    let key = format!("embedding:{entity_type}:{entity_id}:{}", APP_ENV.embed_model);
    mw_queue::enqueue(queue_db, "embedding", Some(&key), serde_json::to_string(&payload)?, EMBEDDING_MAX_ATTEMPTS).await?;
    enqueued += 1;
  }

  Ok(enqueued)
}

async fn enqueue_embedding_jobs(warehouse_db: &DatabaseConnection, queue_db: &DatabaseConnection) -> Result<u64, AppError> {
  let conversation_ids: Vec<i64> = conversation::Entity::find().select_only().column(conversation::Column::Id).into_tuple().all(warehouse_db).await?;
  let entity_ids: Vec<i64> = entity_facet::Entity::find().select_only().column(entity_facet::Column::Id).into_tuple().all(warehouse_db).await?;
  let topic_ids: Vec<i64> = topic::Entity::find().select_only().column(topic::Column::Id).into_tuple().all(warehouse_db).await?;
  let emotion_ids: Vec<i64> = emotion::Entity::find().select_only().column(emotion::Column::Id).into_tuple().all(warehouse_db).await?;
  let humor_ids: Vec<i64> = humor_item::Entity::find().select_only().column(humor_item::Column::Id).into_tuple().all(warehouse_db).await?;

  let mut total = 0;
  total += enqueue_embedding_jobs_for(warehouse_db, queue_db, "conversation", conversation_ids).await?;
  total += enqueue_embedding_jobs_for(warehouse_db, queue_db, "entity", entity_ids).await?;
  total += enqueue_embedding_jobs_for(warehouse_db, queue_db, "topic", topic_ids).await?;
  total += enqueue_embedding_jobs_for(warehouse_db, queue_db, "emotion", emotion_ids).await?;
  total += enqueue_embedding_jobs_for(warehouse_db, queue_db, "humor_item", humor_ids).await?;
  Ok(total)
}

async fn scan_once(warehouse_db: &DatabaseConnection, queue_db: &DatabaseConnection, prompt_id: &str) -> Result<ScanStats, AppError> {
  let analysis_enqueued = enqueue_analysis_jobs(warehouse_db, queue_db, prompt_id).await?;
  let embedding_enqueued = enqueue_embedding_jobs(warehouse_db, queue_db).await?;
  Ok(ScanStats {
    analysis_enqueued,
    embedding_enqueued,
  })
}

/// Runs the scan-and-enqueue loop until `cancel` fires.
pub async fn run(warehouse_db: DatabaseConnection, queue_db: DatabaseConnection, prompt_id: String, config: ProducerConfig, cancel: CancellationToken) {
  let mut ticker = tokio::time::interval(config.scan_interval);
  loop {
    tokio::select! {
      _ = ticker.tick() => {
        match scan_once(&warehouse_db, &queue_db, &prompt_id).await {
          Ok(stats) if stats.analysis_enqueued > 0 || stats.embedding_enqueued > 0 => {
            info!(analysis = stats.analysis_enqueued, embedding = stats.embedding_enqueued, "producer enqueued jobs");
          }
          Ok(_) => debug!("producer scan found no pending work"),
          Err(err) => warn!(%err, "producer scan failed"),
        }
      }
      () = cancel.cancelled() => break,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use mw_entities::{chat, job};
  use mw_migration::{MigratorTrait, QueueMigrator, WarehouseMigrator};
  use sea_orm::{ActiveModelTrait, ActiveValue::Set, Database};

  async fn setup() -> (DatabaseConnection, DatabaseConnection) {
    let warehouse_db = Database::connect("sqlite::memory:").await.unwrap();
    WarehouseMigrator::up(&warehouse_db, None).await.unwrap();
    let queue_db = Database::connect("sqlite::memory:").await.unwrap();
    QueueMigrator::up(&queue_db, None).await.unwrap();
    (warehouse_db, queue_db)
  }

  #[tokio::test]
  async fn enqueues_analysis_for_unanalyzed_conversation() {
    let (warehouse_db, queue_db) = setup().await;

    let chat_row = chat::ActiveModel {
      chat_identifier: Set("chat1".to_owned()),
      chat_name: Set(None),
      is_group: Set(false),
      service_name: Set("iMessage".to_owned()),
      created_date: Set(chrono::Utc::now()),
      last_message_date: Set(chrono::Utc::now()),
      ..Default::default()
    }
    .insert(&warehouse_db)
    .await
    .unwrap();

    conversation::ActiveModel {
      chat_id: Set(chat_row.id),
      initiator_id: Set(None),
      start_time: Set(chrono::Utc::now()),
      end_time: Set(chrono::Utc::now()),
      message_count: Set(1),
      gap_threshold_seconds: Set(10_800),
      summary: Set(None),
      ..Default::default()
    }
    .insert(&warehouse_db)
    .await
    .unwrap();

    let stats = scan_once(&warehouse_db, &queue_db, "convo-all-v1").await.unwrap();
    assert_eq!(stats.analysis_enqueued, 1);
    assert_eq!(stats.embedding_enqueued, 1);

    let jobs = job::Entity::find().all(&queue_db).await.unwrap();
    assert_eq!(jobs.iter().filter(|j| j.job_type == "analysis").count(), 1);
    assert_eq!(jobs.iter().filter(|j| j.job_type == "embedding").count(), 1);

    let rescan = scan_once(&warehouse_db, &queue_db, "convo-all-v1").await.unwrap();
    assert_eq!(rescan.analysis_enqueued, 0, "pending analysis job already queued, not re-enqueued");
    assert_eq!(rescan.embedding_enqueued, 0, "pending embedding job already queued, not re-enqueued");
  }
}
