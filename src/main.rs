//! Process entry point: opens the warehouse and queue databases, applies
//! migrations, then runs the ETL/grouper sync loop, the analysis/embedding
//! producer, and the worker pool engine side by side until `ctrl_c`.

use std::sync::Arc;
use std::time::Duration;

use mw_core::{build_handle_contact_map, get_int, regroup_all, set_int, sync_attachments, sync_chat_participants, sync_chats, sync_contacts, sync_membership_events, sync_messages, sync_reactions};
use mw_migration::{MigratorTrait, QueueMigrator, WarehouseMigrator};
use mw_shared::{APP_ENV, AppError};
use mw_source::SourceReader;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

const WATERMARK_SOURCE: &str = "chatdb";
const WATERMARK_NAME: &str = "message_rowid";
const SYNC_INTERVAL: Duration = Duration::from_secs(60);
const ANALYSIS_PROMPT_ID: &str = "convo-all-v1";

/// Opens a single-writer sqlite connection with the pragmas spec section 5
/// requires: WAL journaling, `synchronous=NORMAL`, foreign keys on, and a
/// generous busy timeout so the batch writer never trips `SQLITE_BUSY`
/// against a concurrent reader.
async fn open_owned_db(path: &str) -> Result<DatabaseConnection, AppError> {
  let url = format!("sqlite://{path}?mode=rwc");
  let mut options = ConnectOptions::new(url);
  options.max_connections(1).sqlx_logging(false);

  let db = Database::connect(options).await?;
  for pragma in ["PRAGMA journal_mode = WAL", "PRAGMA synchronous = NORMAL", "PRAGMA foreign_keys = ON", "PRAGMA busy_timeout = 10000"] {
    db.execute(Statement::from_string(db.get_database_backend(), pragma.to_owned())).await?;
  }
  Ok(db)
}

/// One incremental ETL + grouper pass: reads the last recorded watermark,
/// rewinds it by `LOOKBACK_ROWS` to absorb the source's non-atomic writes
/// (spec section 4.2), runs every sync stage in dependency order, regroups
/// conversations, then advances the watermark to the source's current max
/// message row id.
async fn run_sync_once(db: &DatabaseConnection, source: Arc<SourceReader>) -> Result<(), AppError> {
  let watermark = get_int(db, WATERMARK_SOURCE, WATERMARK_NAME).await?;
  let since_row_id = (watermark - APP_ENV.lookback_rows as i64).max(0);

  sync_contacts(db, source.clone(), since_row_id).await?;
  sync_chats(db, source.clone(), since_row_id).await?;

  let handle_contacts = build_handle_contact_map(db, source.clone()).await?;
  sync_chat_participants(db, source.clone(), &handle_contacts, since_row_id).await?;
  sync_messages(db, source.clone(), &handle_contacts, since_row_id).await?;
  sync_reactions(db, source.clone(), &handle_contacts, since_row_id).await?;
  sync_membership_events(db, source.clone(), &handle_contacts, since_row_id).await?;
  sync_attachments(db, source.clone(), since_row_id).await?;

  let grouped = regroup_all(db, APP_ENV.gap_threshold_seconds as i64).await?;
  info!(grouped, "conversations regrouped");

  let max_row_id = {
    let source = source.clone();
    tokio::task::spawn_blocking(move || source.max_message_row_id())
      .await
      .map_err(|e| AppError::new(anyhow::anyhow!(e)))??
  };
  if max_row_id > watermark {
    set_int(db, WATERMARK_SOURCE, WATERMARK_NAME, max_row_id).await?;
  }

  Ok(())
}

/// Runs `run_sync_once` on a fixed interval until `cancel` fires. A failed
/// pass is logged and retried on the next tick rather than aborting the
/// process — a transient source lock should not take the whole pipeline
/// down.
async fn sync_loop(db: DatabaseConnection, source: Arc<SourceReader>, cancel: CancellationToken) {
  let mut ticker = tokio::time::interval(SYNC_INTERVAL);
  loop {
    tokio::select! {
      _ = ticker.tick() => {
        if let Err(err) = run_sync_once(&db, source.clone()).await {
          warn!(%err, "sync pass failed");
        }
      }
      () = cancel.cancelled() => break,
    }
  }
}

#[tokio::main]
async fn main() -> Result<(), AppError> {
  tracing_subscriber::registry()
    .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "mw=debug".into()))
    .with(tracing_subscriber::fmt::layer())
    .init();

  let warehouse_path = format!("{}/warehouse.db", APP_ENV.app_dir);
  let queue_path = format!("{}/queue.db", APP_ENV.app_dir);

  let warehouse_db = open_owned_db(&warehouse_path).await?;
  let queue_db = open_owned_db(&queue_path).await?;

  info!("applying warehouse migrations");
  WarehouseMigrator::up(&warehouse_db, None).await?;
  info!("applying queue migrations");
  QueueMigrator::up(&queue_db, None).await?;

  let source = Arc::new(SourceReader::open(&APP_ENV.source_chat_db)?);

  let cancel = CancellationToken::new();

  run_sync_once(&warehouse_db, source.clone()).await?;

  let sync_handle = tokio::spawn(sync_loop(warehouse_db.clone(), source, cancel.clone()));

  let producer_handle = tokio::spawn(mw_worker::run_producer(
    warehouse_db.clone(),
    queue_db.clone(),
    ANALYSIS_PROMPT_ID.to_owned(),
    mw_worker::ProducerConfig::default(),
    cancel.clone(),
  ));

  let shutdown_cancel = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      info!("shutdown signal received");
      shutdown_cancel.cancel();
    }
  });

  let stats = mw_worker::run(queue_db, warehouse_db, cancel).await;
  info!(succeeded = stats.succeeded, failed = stats.failed, skipped = stats.skipped, "worker pool stopped");

  sync_handle.await.ok();
  producer_handle.await.ok();

  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use mw_entities::{chat, contact, message};
  use mw_migration::WarehouseMigrator;
  use rusqlite::Connection;
  use sea_orm::EntityTrait;
  use std::sync::atomic::{AtomicU32, Ordering};

  static TEMP_COUNTER: AtomicU32 = AtomicU32::new(0);

  fn temp_source_path(label: &str) -> String {
    let n = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir()
      .join(format!("mw-test-{label}-{}-{n}.db", std::process::id()))
      .to_string_lossy()
      .into_owned()
  }

  /// Seeds a source `chat.db` with 2 chats, 3 handles, and 5 messages: 3
  /// messages in the first chat a few seconds apart, 2 in the second — both
  /// well inside the 3-hour gap threshold, so each chat forms exactly one
  /// conversation.
  fn seed_source(path: &str) {
    let conn = Connection::open(path).unwrap();
    conn
      .execute_batch(
        "CREATE TABLE handle (ROWID INTEGER PRIMARY KEY, id TEXT, service TEXT);
         CREATE TABLE chat (ROWID INTEGER PRIMARY KEY, guid TEXT, chat_identifier TEXT, style INTEGER, service_name TEXT, display_name TEXT);
         CREATE TABLE chat_handle_join (ROWID INTEGER PRIMARY KEY, chat_id INTEGER, handle_id INTEGER);
         CREATE TABLE message (ROWID INTEGER PRIMARY KEY, guid TEXT, handle_id INTEGER, is_from_me INTEGER, text TEXT, attributedBody BLOB, date INTEGER, service TEXT, thread_originator_guid TEXT, associated_message_guid TEXT, associated_message_type INTEGER, item_type INTEGER, group_action_type INTEGER, group_title TEXT);
         CREATE TABLE chat_message_join (ROWID INTEGER PRIMARY KEY, chat_id INTEGER, message_id INTEGER);
         CREATE TABLE attachment (ROWID INTEGER PRIMARY KEY, guid TEXT, filename TEXT, mime_type TEXT, total_bytes INTEGER, is_sticker INTEGER, created_date INTEGER);
         CREATE TABLE message_attachment_join (ROWID INTEGER PRIMARY KEY, message_id INTEGER, attachment_id INTEGER);

         INSERT INTO handle VALUES (1, '+14155550100', 'iMessage');
         INSERT INTO handle VALUES (2, '+14155550101', 'iMessage');
         INSERT INTO handle VALUES (3, '+14155550102', 'iMessage');

         INSERT INTO chat VALUES (1, 'chat-guid-1', 'chat-identifier-1', 45, 'iMessage', NULL);
         INSERT INTO chat VALUES (2, 'chat-guid-2', 'chat-identifier-2', 45, 'iMessage', NULL);
         INSERT INTO chat_handle_join VALUES (1, 1, 1);
         INSERT INTO chat_handle_join VALUES (2, 1, 2);
         INSERT INTO chat_handle_join VALUES (3, 2, 3);

         INSERT INTO message VALUES (1, 'msg-guid-1', 1, 0, 'hi',    NULL, 0,          'iMessage', NULL, NULL, NULL, 0, NULL, NULL);
         INSERT INTO chat_message_join VALUES (1, 1, 1);
         INSERT INTO message VALUES (2, 'msg-guid-2', NULL, 1, 'hello', NULL, 1000000000, 'iMessage', NULL, NULL, NULL, 0, NULL, NULL);
         INSERT INTO chat_message_join VALUES (2, 1, 2);
         INSERT INTO message VALUES (3, 'msg-guid-3', 2, 0, 'hey',   NULL, 2000000000, 'iMessage', NULL, NULL, NULL, 0, NULL, NULL);
         INSERT INTO chat_message_join VALUES (3, 1, 3);
         INSERT INTO message VALUES (4, 'msg-guid-4', 3, 0, 'sup',   NULL, 5000000000, 'iMessage', NULL, NULL, NULL, 0, NULL, NULL);
         INSERT INTO chat_message_join VALUES (4, 2, 4);
         INSERT INTO message VALUES (5, 'msg-guid-5', NULL, 1, 'yo',    NULL, 6000000000, 'iMessage', NULL, NULL, NULL, 0, NULL, NULL);
         INSERT INTO chat_message_join VALUES (5, 2, 5);",
      )
      .unwrap();
  }

  /// Appends a 6th message whose chat-join row is inserted last — S2's
  /// "non-atomic write" scenario the lookback window exists to absorb.
  fn append_sixth_message(path: &str) {
    let conn = Connection::open(path).unwrap();
    conn
      .execute(
        "INSERT INTO message VALUES (6, 'msg-guid-6', 1, 0, 'one more', NULL, 500000000, 'iMessage', NULL, NULL, NULL, 0, NULL, NULL)",
        [],
      )
      .unwrap();
    conn.execute("INSERT INTO chat_message_join VALUES (6, 1, 6)", []).unwrap();
  }

  async fn open_memory_warehouse() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    WarehouseMigrator::up(&db, None).await.unwrap();
    db
  }

  /// S1 — empty warehouse, small source: a full sync from watermark 0
  /// produces exactly 3 contacts, 2 chats, 5 messages, and the watermark
  /// lands on the source's max row id.
  #[tokio::test]
  async fn s1_full_sync_from_empty_warehouse() {
    let source_path = temp_source_path("s1");
    seed_source(&source_path);

    let db = open_memory_warehouse().await;
    let source = Arc::new(SourceReader::open(&source_path).unwrap());

    run_sync_once(&db, source.clone()).await.unwrap();

    assert_eq!(contact::Entity::find().all(&db).await.unwrap().len(), 3);
    assert_eq!(chat::Entity::find().all(&db).await.unwrap().len(), 2);
    assert_eq!(message::Entity::find().all(&db).await.unwrap().len(), 5);

    let watermark = get_int(&db, WATERMARK_SOURCE, WATERMARK_NAME).await.unwrap();
    assert_eq!(watermark, source.max_message_row_id().unwrap());

    std::fs::remove_file(&source_path).ok();
  }

  /// S2 — incremental with lookback: after S1's initial sync, one more
  /// message lands with its chat-join row committed last. A sync against
  /// `since = watermark - lookback` still picks it up, because the
  /// lookback window rewinds past the watermark rather than trusting it
  /// exactly.
  #[tokio::test]
  async fn s2_incremental_sync_with_lookback() {
    let source_path = temp_source_path("s2");
    seed_source(&source_path);

    let db = open_memory_warehouse().await;
    let source = Arc::new(SourceReader::open(&source_path).unwrap());

    run_sync_once(&db, source.clone()).await.unwrap();
    append_sixth_message(&source_path);
    run_sync_once(&db, source.clone()).await.unwrap();

    let messages = message::Entity::find().all(&db).await.unwrap();
    assert_eq!(messages.len(), 6);

    let mut guids: Vec<_> = messages.iter().map(|m| m.guid.clone()).collect();
    guids.sort();
    let unique_count = {
      let mut deduped = guids.clone();
      deduped.dedup();
      deduped.len()
    };
    assert_eq!(unique_count, guids.len());

    std::fs::remove_file(&source_path).ok();
  }
}
