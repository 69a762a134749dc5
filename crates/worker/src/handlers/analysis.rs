//! Analysis job handler: encode a conversation, ask the LLM for a
//! structured extraction of summary/entities/topics/emotions/humor, and
//! replace the conversation's facet rows with the parsed result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use mw_ai::{ChatCompletionRequestMessage, ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage, classify, generate_structured};
use mw_core::{EncodeOptions, encode_conversation};
use mw_entities::{completion, contact, conversation, conversation_analysis, emotion, entity_facet, humor_item, topic};
use mw_shared::{APP_ENV, AppError, ErrorKind};
use schemars::JsonSchema;
use sea_orm::{
  ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, DatabaseTransaction, EntityTrait, QueryFilter,
  sea_query::{Expr, OnConflict},
};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::batch_writer::{BatchWriter, WriteFn};
use crate::engine::JobHandler;
use crate::latency_controller::LatencyController;
use crate::rpm_controller::RpmController;
use crate::semaphore::AdaptiveSemaphore;

const DEFAULT_PROMPT_ID: &str = "convo-all-v1";

fn default_prompt_id() -> String {
  DEFAULT_PROMPT_ID.to_owned()
}

/// Seam between the handler and the LLM call, so tests can swap in a fixed
/// response instead of reaching the network.
#[async_trait]
trait AnalysisLlm: Send + Sync {
  async fn generate(
    &self,
    messages: Vec<ChatCompletionRequestMessage>,
    schema_name: String,
    schema_description: Option<String>,
  ) -> Result<mw_ai::Generated<AnalysisOutput>, AppError>;
}

struct RealAnalysisLlm;

#[async_trait]
impl AnalysisLlm for RealAnalysisLlm {
  async fn generate(
    &self,
    messages: Vec<ChatCompletionRequestMessage>,
    schema_name: String,
    schema_description: Option<String>,
  ) -> Result<mw_ai::Generated<AnalysisOutput>, AppError> {
    generate_structured::<AnalysisOutput>(messages, schema_name, schema_description).await
  }
}

/// Payload contract for an `"analysis"` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJobPayload {
  pub conversation_id: i64,
  #[serde(default = "default_prompt_id")]
  pub prompt_id: String,
}

/// A single extracted item. The model is asked to emit `{name: "..."}`, but
/// a bare string in the same position is accepted too: a union decoder with
/// explicit branches over the parsed JSON value, not schema introspection.
#[derive(Debug, Clone)]
struct NamedItem {
  name: String,
}

impl<'de> Deserialize<'de> for NamedItem {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    match serde_json::Value::deserialize(deserializer)? {
      serde_json::Value::String(name) => Ok(Self { name }),
      serde_json::Value::Object(obj) => {
        let name = obj
          .get("name")
          .and_then(|v| v.as_str())
          .ok_or_else(|| serde::de::Error::custom("expected object with string `name`"))?;
        Ok(Self { name: name.to_owned() })
      }
      other => Err(serde::de::Error::custom(format!("expected string or object, got {other}"))),
    }
  }
}

impl JsonSchema for NamedItem {
  fn schema_name() -> std::borrow::Cow<'static, str> {
    std::borrow::Cow::Borrowed("NamedItem")
  }

  fn json_schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::Schema::try_from(serde_json::json!({
      "type": "object",
      "properties": { "name": { "type": "string" } },
      "required": ["name"],
    }))
    .expect("static schema literal is valid")
  }
}

#[derive(Debug, Clone)]
struct MessageItem {
  message: String,
}

impl<'de> Deserialize<'de> for MessageItem {
  fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
  where
    D: serde::Deserializer<'de>,
  {
    match serde_json::Value::deserialize(deserializer)? {
      serde_json::Value::String(message) => Ok(Self { message }),
      serde_json::Value::Object(obj) => {
        let message = obj
          .get("message")
          .and_then(|v| v.as_str())
          .ok_or_else(|| serde::de::Error::custom("expected object with string `message`"))?;
        Ok(Self {
          message: message.to_owned(),
        })
      }
      other => Err(serde::de::Error::custom(format!("expected string or object, got {other}"))),
    }
  }
}

impl JsonSchema for MessageItem {
  fn schema_name() -> std::borrow::Cow<'static, str> {
    std::borrow::Cow::Borrowed("MessageItem")
  }

  fn json_schema(_generator: &mut schemars::SchemaGenerator) -> schemars::Schema {
    schemars::Schema::try_from(serde_json::json!({
      "type": "object",
      "properties": { "message": { "type": "string" } },
      "required": ["message"],
    }))
    .expect("static schema literal is valid")
  }
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct ParticipantEntities {
  participant_name: String,
  entities: Vec<NamedItem>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct ParticipantTopics {
  participant_name: String,
  topics: Vec<NamedItem>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct ParticipantEmotions {
  participant_name: String,
  emotions: Vec<NamedItem>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct ParticipantHumor {
  participant_name: String,
  humor: Vec<MessageItem>,
}

#[derive(Debug, Clone, Deserialize, JsonSchema)]
struct AnalysisOutput {
  summary: Option<String>,
  #[serde(default)]
  entities: Vec<ParticipantEntities>,
  #[serde(default)]
  topics: Vec<ParticipantTopics>,
  #[serde(default)]
  emotions: Vec<ParticipantEmotions>,
  #[serde(default)]
  humor: Vec<ParticipantHumor>,
}

impl AnalysisOutput {
  fn is_empty(&self) -> bool {
    self.summary.as_ref().is_none_or(|s| s.trim().is_empty())
      && self.entities.iter().all(|p| p.entities.is_empty())
      && self.topics.iter().all(|p| p.topics.is_empty())
      && self.emotions.iter().all(|p| p.emotions.is_empty())
      && self.humor.iter().all(|p| p.humor.is_empty())
  }

  /// Reconstructs a JSON rendering of the parsed output for the audit trail
  /// column, since the union types above only implement `Deserialize`.
  fn to_json(&self) -> serde_json::Value {
    serde_json::json!({
      "summary": self.summary,
      "entities": self.entities.iter().map(|p| serde_json::json!({
        "participant_name": p.participant_name,
        "entities": p.entities.iter().map(|i| &i.name).collect::<Vec<_>>(),
      })).collect::<Vec<_>>(),
      "topics": self.topics.iter().map(|p| serde_json::json!({
        "participant_name": p.participant_name,
        "topics": p.topics.iter().map(|i| &i.name).collect::<Vec<_>>(),
      })).collect::<Vec<_>>(),
      "emotions": self.emotions.iter().map(|p| serde_json::json!({
        "participant_name": p.participant_name,
        "emotions": p.emotions.iter().map(|i| &i.name).collect::<Vec<_>>(),
      })).collect::<Vec<_>>(),
      "humor": self.humor.iter().map(|p| serde_json::json!({
        "participant_name": p.participant_name,
        "humor": p.humor.iter().map(|i| &i.message).collect::<Vec<_>>(),
      })).collect::<Vec<_>>(),
    })
  }
}

const PROMPT_TEMPLATE_PREFIX: &str = "\
You are analyzing a private text-message conversation belonging to the \
device owner. Produce a structured extraction with exactly these fields:

- summary: one short paragraph describing what was discussed.
- entities: per participant, notable named things mentioned (places, \
  products, people, events).
- topics: per participant, the subjects they talked about.
- emotions: per participant, emotions they expressed.
- humor: per participant, any jokes or funny lines they contributed, \
  quoted verbatim.

This is analysis of the device owner's own message history for their own \
personal search and recall. Return only the structured JSON described \
above.

Conversation:
";

fn build_prompt(encoded: &str) -> String {
  format!("{PROMPT_TEMPLATE_PREFIX}{encoded}")
}

async fn resolve_contact_id(db: &DatabaseConnection, cache: &mut HashMap<String, Option<i64>>, participant_name: &str) -> Result<Option<i64>, AppError> {
  if let Some(cached) = cache.get(participant_name) {
    return Ok(*cached);
  }

  let resolved = if participant_name.eq_ignore_ascii_case("me") {
    contact::Entity::find().filter(contact::Column::IsMe.eq(true)).one(db).await?.map(|c| c.id)
  } else {
    let exact = contact::Entity::find().filter(contact::Column::Name.eq(participant_name)).one(db).await?;
    match exact {
      Some(row) => Some(row.id),
      None => contact::Entity::find()
        .filter(contact::Column::Nickname.eq(participant_name))
        .one(db)
        .await?
        .map(|row| row.id),
    }
  };

  cache.insert(participant_name.to_owned(), resolved);
  Ok(resolved)
}

/// Clears a conversation's summary and facet rows and re-applies them from
/// a fresh analysis, alongside a record of the raw completion. All of it
/// runs as one submission to the shared [`BatchWriter`].
pub struct AnalysisHandler {
  db: DatabaseConnection,
  batch_writer: BatchWriter,
  semaphore: Arc<AdaptiveSemaphore>,
  rpm_controller: Arc<RpmController>,
  latency_controller: Arc<LatencyController>,
  cancel: CancellationToken,
  llm: Arc<dyn AnalysisLlm>,
}

impl AnalysisHandler {
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
      llm: Arc::new(RealAnalysisLlm),
    }
  }

  #[cfg(test)]
  fn new_with_llm(
    db: DatabaseConnection,
    batch_writer: BatchWriter,
    semaphore: Arc<AdaptiveSemaphore>,
    rpm_controller: Arc<RpmController>,
    latency_controller: Arc<LatencyController>,
    cancel: CancellationToken,
    llm: Arc<dyn AnalysisLlm>,
  ) -> Self {
    Self {
      db,
      batch_writer,
      semaphore,
      rpm_controller,
      latency_controller,
      cancel,
      llm,
    }
  }
}

#[async_trait]
impl JobHandler for AnalysisHandler {
  async fn handle(&self, payload: &str) -> Result<(), AppError> {
    let payload: AnalysisJobPayload = serde_json::from_str(payload).map_err(|err| AppError::with_kind(ErrorKind::Validation, err))?;

    let conversation_row = conversation::Entity::find_by_id(payload.conversation_id)
      .one(&self.db)
      .await?
      .ok_or_else(|| AppError::with_kind(ErrorKind::DataMapping, anyhow::anyhow!("unknown conversation_id {}", payload.conversation_id)))?;

    let encoded = encode_conversation(&self.db, payload.conversation_id, &EncodeOptions::default()).await?;
    let prompt = build_prompt(&encoded);

    let system = ChatCompletionRequestSystemMessage::from("Respond with JSON only, matching the requested schema exactly.");
    let user = ChatCompletionRequestUserMessage::from(prompt);

    let permit = self.semaphore.acquire(&self.cancel).await?;
    let started_at = Instant::now();
    let generate_result = self
      .llm
      .generate(
        vec![ChatCompletionRequestMessage::System(system), ChatCompletionRequestMessage::User(user)],
        "conversation_analysis".to_owned(),
        Some("Structured extraction of a conversation's summary, entities, topics, emotions, and humor".to_owned()),
      )
      .await;
    let elapsed = started_at.elapsed();
    drop(permit);

    let generated = match generate_result {
      Ok(generated) => {
        self.rpm_controller.observe(mw_ai::Outcome::Ok);
        self.latency_controller.observe(elapsed, true);
        generated
      }
      Err(err) => {
        let outcome = classify(&err);
        self.rpm_controller.observe(outcome);
        self.latency_controller.observe(elapsed, false);
        return Err(err);
      }
    };
    let output = generated.value;

    if output.is_empty() {
      return Err(AppError::with_kind(
        ErrorKind::RetryableTransient,
        anyhow::anyhow!(
          "analysis produced no content for conversation {} (finish_reason={}, safety={})",
          payload.conversation_id,
          generated.finish_reason.unwrap_or_else(|| "unknown".to_owned()),
          generated.safety_summary.unwrap_or_else(|| "none".to_owned())
        ),
      ));
    }

    let mut contact_cache = HashMap::new();
    let mut entities = Vec::new();
    for group in &output.entities {
      let contact_id = resolve_contact_id(&self.db, &mut contact_cache, &group.participant_name).await?;
      for item in &group.entities {
        entities.push((contact_id, item.name.clone()));
      }
    }
    let mut topics = Vec::new();
    for group in &output.topics {
      let contact_id = resolve_contact_id(&self.db, &mut contact_cache, &group.participant_name).await?;
      for item in &group.topics {
        topics.push((contact_id, item.name.clone()));
      }
    }
    let mut emotions = Vec::new();
    for group in &output.emotions {
      let contact_id = resolve_contact_id(&self.db, &mut contact_cache, &group.participant_name).await?;
      for item in &group.emotions {
        emotions.push((contact_id, item.name.clone()));
      }
    }
    let mut humor = Vec::new();
    for group in &output.humor {
      let contact_id = resolve_contact_id(&self.db, &mut contact_cache, &group.participant_name).await?;
      for item in &group.humor {
        humor.push((contact_id, item.message.clone()));
      }
    }

    let conversation_id = payload.conversation_id;
    let chat_id = conversation_row.chat_id;
    let prompt_id = payload.prompt_id.clone();
    let model_name = APP_ENV.analysis_model.clone();
    let raw_response = output.to_json().to_string();
    let summary = output.summary.clone();

    let apply: WriteFn = Arc::new(move |txn: &DatabaseTransaction| {
      let prompt_id = prompt_id.clone();
      let model_name = model_name.clone();
      let raw_response = raw_response.clone();
      let summary = summary.clone();
      let entities = entities.clone();
      let topics = topics.clone();
      let emotions = emotions.clone();
      let humor = humor.clone();
      Box::pin(async move {
        let completion_row = completion::ActiveModel {
          conversation_id: Set(conversation_id),
          model: Set(model_name),
          raw_response: Set(raw_response),
          created_at: Set(Utc::now()),
          ..Default::default()
        }
        .insert(txn)
        .await?;

        if let Some(summary) = summary {
          conversation::Entity::update_many()
            .col_expr(conversation::Column::Summary, Expr::value(Some(summary)))
            .filter(conversation::Column::Id.eq(conversation_id))
            .exec(txn)
            .await?;
        }

        conversation_analysis::Entity::delete_many()
          .filter(conversation_analysis::Column::ConversationId.eq(conversation_id))
          .filter(conversation_analysis::Column::PromptId.eq(prompt_id.clone()))
          .exec(txn)
          .await?;

        conversation_analysis::ActiveModel {
          conversation_id: Set(conversation_id),
          prompt_id: Set(prompt_id),
          status: Set("completed".to_owned()),
          completion_id: Set(completion_row.id),
          created_at: Set(Utc::now()),
        }
        .insert(txn)
        .await?;

        entity_facet::Entity::delete_many()
          .filter(entity_facet::Column::ConversationId.eq(conversation_id))
          .exec(txn)
          .await?;
        topic::Entity::delete_many().filter(topic::Column::ConversationId.eq(conversation_id)).exec(txn).await?;
        emotion::Entity::delete_many().filter(emotion::Column::ConversationId.eq(conversation_id)).exec(txn).await?;
        humor_item::Entity::delete_many()
          .filter(humor_item::Column::ConversationId.eq(conversation_id))
          .exec(txn)
          .await?;

        for (contact_id, title) in entities {
          entity_facet::Entity::insert(entity_facet::ActiveModel {
            conversation_id: Set(conversation_id),
            chat_id: Set(chat_id),
            contact_id: Set(contact_id),
            title: Set(title),
            ..Default::default()
          })
          .on_conflict(
            OnConflict::columns([
              entity_facet::Column::ConversationId,
              entity_facet::Column::ChatId,
              entity_facet::Column::ContactId,
              entity_facet::Column::Title,
            ])
            .do_nothing()
            .to_owned(),
          )
          .exec(txn)
          .await?;
        }

        for (contact_id, title) in topics {
          topic::Entity::insert(topic::ActiveModel {
            conversation_id: Set(conversation_id),
            chat_id: Set(chat_id),
            contact_id: Set(contact_id),
            title: Set(title),
            ..Default::default()
          })
          .on_conflict(
            OnConflict::columns([
              topic::Column::ConversationId,
              topic::Column::ChatId,
              topic::Column::ContactId,
              topic::Column::Title,
            ])
            .do_nothing()
            .to_owned(),
          )
          .exec(txn)
          .await?;
        }

        for (contact_id, emotion_type) in emotions {
          emotion::Entity::insert(emotion::ActiveModel {
            conversation_id: Set(conversation_id),
            chat_id: Set(chat_id),
            contact_id: Set(contact_id),
            emotion_type: Set(emotion_type),
            ..Default::default()
          })
          .on_conflict(
            OnConflict::columns([
              emotion::Column::ConversationId,
              emotion::Column::ChatId,
              emotion::Column::ContactId,
              emotion::Column::EmotionType,
            ])
            .do_nothing()
            .to_owned(),
          )
          .exec(txn)
          .await?;
        }

        for (contact_id, snippet) in humor {
          humor_item::Entity::insert(humor_item::ActiveModel {
            conversation_id: Set(conversation_id),
            chat_id: Set(chat_id),
            contact_id: Set(contact_id),
            snippet: Set(snippet),
            ..Default::default()
          })
          .on_conflict(
            OnConflict::columns([
              humor_item::Column::ConversationId,
              humor_item::Column::ChatId,
              humor_item::Column::ContactId,
              humor_item::Column::Snippet,
            ])
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
  use mw_entities::{chat, message};
  use sea_orm::{ConnectionTrait, Database, Schema};

  /// Stub LLM returning a fixed parsed output, bypassing the network.
  struct FixedAnalysisLlm(AnalysisOutput);

  #[async_trait]
  impl AnalysisLlm for FixedAnalysisLlm {
    async fn generate(
      &self,
      _messages: Vec<ChatCompletionRequestMessage>,
      _schema_name: String,
      _schema_description: Option<String>,
    ) -> Result<mw_ai::Generated<AnalysisOutput>, AppError> {
      Ok(mw_ai::Generated {
        value: self.0.clone(),
        finish_reason: Some("stop".to_owned()),
        safety_summary: None,
      })
    }
  }

  async fn setup() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    let schema = Schema::new(sea_orm::DatabaseBackend::Sqlite);
    for stmt in [
      schema.create_table_from_entity(contact::Entity),
      schema.create_table_from_entity(chat::Entity),
      schema.create_table_from_entity(message::Entity),
      schema.create_table_from_entity(conversation::Entity),
      schema.create_table_from_entity(completion::Entity),
      schema.create_table_from_entity(conversation_analysis::Entity),
      schema.create_table_from_entity(entity_facet::Entity),
      schema.create_table_from_entity(topic::Entity),
      schema.create_table_from_entity(emotion::Entity),
      schema.create_table_from_entity(humor_item::Entity),
    ] {
      db.execute(db.get_database_backend().build(&stmt)).await.unwrap();
    }
    db
  }

  /// S4 — analysis success: a fixed fake-LLM response persists exactly one
  /// row per facet plus the conversation summary and a completed analysis
  /// record.
  #[tokio::test]
  async fn s4_analysis_success_persists_summary_and_one_row_per_facet() {
    let db = setup().await;

    contact::ActiveModel {
      name: Set("Alice".to_owned()),
      nickname: Set(None),
      is_me: Set(false),
      data_source: Set("test".to_owned()),
      last_updated: Set(Utc::now()),
      ..Default::default()
    }
    .insert(&db)
    .await
    .unwrap();

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

    let fixed_output = AnalysisOutput {
      summary: Some("S".to_owned()),
      entities: vec![ParticipantEntities {
        participant_name: "Alice".to_owned(),
        entities: vec![NamedItem { name: "Pizza".to_owned() }],
      }],
      topics: vec![ParticipantTopics {
        participant_name: "Alice".to_owned(),
        topics: vec![NamedItem { name: "Dinner".to_owned() }],
      }],
      emotions: vec![ParticipantEmotions {
        participant_name: "Alice".to_owned(),
        emotions: vec![NamedItem { name: "Joy".to_owned() }],
      }],
      humor: vec![ParticipantHumor {
        participant_name: "Alice".to_owned(),
        humor: vec![MessageItem { message: "lol".to_owned() }],
      }],
    };

    let cancel = CancellationToken::new();
    let (batch_writer, writer_handle) = BatchWriter::spawn(db.clone(), BatchWriterConfig::default(), cancel.clone());
    let semaphore = Arc::new(AdaptiveSemaphore::new(100));
    let rpm_controller = RpmController::new(semaphore.clone(), RpmControllerConfig::default());
    let latency_controller = LatencyController::new(semaphore.clone(), LatencyControllerConfig::default());

    let handler = AnalysisHandler::new_with_llm(
      db.clone(),
      batch_writer,
      semaphore,
      rpm_controller,
      latency_controller,
      cancel.clone(),
      Arc::new(FixedAnalysisLlm(fixed_output)),
    );

    let payload = serde_json::to_string(&AnalysisJobPayload {
      conversation_id: 1,
      prompt_id: DEFAULT_PROMPT_ID.to_owned(),
    })
    .unwrap();

    handler.handle(&payload).await.unwrap();
    cancel.cancel();
    writer_handle.await.unwrap();

    let conversation_row = conversation::Entity::find_by_id(1).one(&db).await.unwrap().unwrap();
    assert_eq!(conversation_row.summary.as_deref(), Some("S"));

    let analysis_row = conversation_analysis::Entity::find_by_id((1, DEFAULT_PROMPT_ID.to_owned()))
      .one(&db)
      .await
      .unwrap()
      .unwrap();
    assert_eq!(analysis_row.status, "completed");

    let entity_rows = entity_facet::Entity::find().all(&db).await.unwrap();
    assert_eq!(entity_rows.len(), 1);
    assert_eq!(entity_rows[0].title, "Pizza");

    let topic_rows = topic::Entity::find().all(&db).await.unwrap();
    assert_eq!(topic_rows.len(), 1);

    let emotion_rows = emotion::Entity::find().all(&db).await.unwrap();
    assert_eq!(emotion_rows.len(), 1);

    let humor_rows = humor_item::Entity::find().all(&db).await.unwrap();
    assert_eq!(humor_rows.len(), 1);
  }
}
