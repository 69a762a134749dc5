use std::sync::Mutex;

use mw_shared::AppError;
use rusqlite::{Connection, OpenFlags, Row};

/// Legacy tapback encoding: `associated_message_type` in `2000..=2005` means
/// "added" (loved/liked/disliked/laughed/emphasized/questioned, in that
/// order) and `3000..=3005` means "removed" (the same reaction retracted).
const LEGACY_REACTION_ADD_RANGE: std::ops::RangeInclusive<i64> = 2000..=2005;
const LEGACY_REACTION_REMOVE_RANGE: std::ops::RangeInclusive<i64> = 3000..=3005;

/// Text-verb prefixes used before the source adopted typed tapbacks; a
/// message with `associated_message_type = 0` and a guid pointing at the
/// reacted-to message whose text starts with one of these is a reaction in
/// disguise and must not be surfaced as a normal message.
const REACTION_VERB_PREFIXES: &[&str] =
  &["Loved ", "Liked ", "Disliked ", "Laughed at ", "Emphasized ", "Questioned "];

const ITEM_TYPE_NORMAL: i64 = 0;

fn is_legacy_reaction_type(associated_message_type: i64) -> bool {
  LEGACY_REACTION_ADD_RANGE.contains(&associated_message_type)
    || LEGACY_REACTION_REMOVE_RANGE.contains(&associated_message_type)
}

fn is_modern_text_reaction(associated_message_type: i64, associated_message_guid: Option<&str>, text: Option<&str>) -> bool {
  associated_message_type == 0
    && associated_message_guid.is_some()
    && text
      .map(|t| REACTION_VERB_PREFIXES.iter().any(|verb| t.starts_with(verb)))
      .unwrap_or(false)
}

#[derive(Debug, Clone)]
pub struct SourceHandle {
  pub row_id: i64,
  pub identifier: String,
  pub service: String,
}

#[derive(Debug, Clone)]
pub struct SourceChat {
  pub row_id: i64,
  pub guid: String,
  pub chat_identifier: String,
  pub style: i64,
  pub service_name: String,
  pub display_name: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceChatParticipant {
  pub chat_identifier: String,
  pub handle_row_id: i64,
}

#[derive(Debug, Clone)]
pub struct SourceMessage {
  pub row_id: i64,
  pub guid: String,
  pub chat_identifier: String,
  pub handle_row_id: Option<i64>,
  pub is_from_me: bool,
  pub text: Option<String>,
  pub attributed_body: Option<Vec<u8>>,
  pub date_apple_epoch_ns: i64,
  pub service_name: String,
  pub reply_to_guid: Option<String>,
  pub associated_message_guid: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceReaction {
  pub row_id: i64,
  pub guid: String,
  pub chat_identifier: String,
  pub handle_row_id: Option<i64>,
  pub is_from_me: bool,
  pub date_apple_epoch_ns: i64,
  pub associated_message_guid: String,
  pub associated_message_type: i64,
  pub text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceMembershipEvent {
  pub row_id: i64,
  pub guid: String,
  pub chat_identifier: String,
  pub handle_row_id: Option<i64>,
  pub is_from_me: bool,
  pub date_apple_epoch_ns: i64,
  pub group_action_type: i64,
  pub group_title: Option<String>,
}

#[derive(Debug, Clone)]
pub struct SourceAttachment {
  pub row_id: i64,
  pub guid: String,
  pub message_guid: String,
  pub filename: Option<String>,
  pub mime_type: Option<String>,
  pub total_bytes: Option<i64>,
  pub is_sticker: bool,
  pub created_date_apple_epoch_ns: i64,
}

/// A read-only handle onto the source database. Every accessor runs its own
/// prepared query; callers on an async runtime should wrap calls in
/// `tokio::task::spawn_blocking` since `rusqlite` blocks the calling thread.
pub struct SourceReader {
  conn: Mutex<Connection>,
}

impl SourceReader {
  pub fn open(path: &str) -> Result<Self, AppError> {
    let conn = Connection::open_with_flags(
      path,
      OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .map_err(|e| AppError::with_kind(mw_shared::ErrorKind::Fatal, anyhow::anyhow!(e)))?;
    conn
      .execute_batch("PRAGMA query_only = ON; PRAGMA journal_mode = OFF; PRAGMA cache_size = -20000;")
      .map_err(|e| AppError::with_kind(mw_shared::ErrorKind::Fatal, anyhow::anyhow!(e)))?;
    Ok(Self { conn: Mutex::new(conn) })
  }

  /// The highest `message.ROWID` currently present, used to seed the
  /// watermark on a fresh sync.
  pub fn max_message_row_id(&self) -> Result<i64, AppError> {
    let conn = self.conn.lock().expect("source connection poisoned");
    conn
      .query_row("SELECT COALESCE(MAX(ROWID), 0) FROM message", [], |row| row.get(0))
      .map_err(Into::into)
  }

  pub fn handles_since(&self, since_row_id: i64) -> Result<Vec<SourceHandle>, AppError> {
    let conn = self.conn.lock().expect("source connection poisoned");
    let mut stmt = conn.prepare(
      "SELECT ROWID, id, service FROM handle WHERE ROWID > ?1 ORDER BY ROWID",
    )?;
    let rows = stmt
      .query_map([since_row_id], |row| {
        Ok(SourceHandle {
          row_id: row.get(0)?,
          identifier: row.get(1)?,
          service: row.get(2)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
  }

  pub fn chats_since(&self, since_row_id: i64) -> Result<Vec<SourceChat>, AppError> {
    let conn = self.conn.lock().expect("source connection poisoned");
    let mut stmt = conn.prepare(
      "SELECT ROWID, guid, chat_identifier, style, service_name, display_name \
       FROM chat WHERE ROWID > ?1 ORDER BY ROWID",
    )?;
    let rows = stmt
      .query_map([since_row_id], |row| {
        Ok(SourceChat {
          row_id: row.get(0)?,
          guid: row.get(1)?,
          chat_identifier: row.get(2)?,
          style: row.get(3)?,
          service_name: row.get(4)?,
          display_name: row.get(5)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
  }

  pub fn chat_participants_since(&self, since_row_id: i64) -> Result<Vec<SourceChatParticipant>, AppError> {
    let conn = self.conn.lock().expect("source connection poisoned");
    let mut stmt = conn.prepare(
      "SELECT c.chat_identifier, j.handle_id \
       FROM chat_handle_join j JOIN chat c ON c.ROWID = j.chat_id \
       WHERE j.ROWID > ?1 ORDER BY j.ROWID",
    )?;
    let rows = stmt
      .query_map([since_row_id], |row| {
        Ok(SourceChatParticipant {
          chat_identifier: row.get(0)?,
          handle_row_id: row.get(1)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
  }

  /// Ordinary conversational messages, excluding legacy/modern reaction
  /// encodings and group-action rows (both surfaced by their own accessors).
  pub fn messages_since(&self, since_row_id: i64) -> Result<Vec<SourceMessage>, AppError> {
    let conn = self.conn.lock().expect("source connection poisoned");
    let mut stmt = conn.prepare(
      "SELECT m.ROWID, m.guid, c.chat_identifier, m.handle_id, m.is_from_me, m.text, \
              m.attributedBody, m.date, m.service, m.thread_originator_guid, \
              m.associated_message_guid, m.associated_message_type \
       FROM message m \
       JOIN chat_message_join cmj ON cmj.message_id = m.ROWID \
       JOIN chat c ON c.ROWID = cmj.chat_id \
       WHERE m.ROWID > ?1 AND m.item_type = ?2 \
       ORDER BY m.ROWID",
    )?;
    let rows = stmt
      .query_map([since_row_id, ITEM_TYPE_NORMAL], Self::row_to_raw_message)?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(
      rows
        .into_iter()
        .filter(|raw| {
          !is_legacy_reaction_type(raw.associated_message_type)
            && !is_modern_text_reaction(raw.associated_message_type, raw.associated_message_guid.as_deref(), raw.text.as_deref())
        })
        .map(SourceMessage::from)
        .collect(),
    )
  }

  pub fn reactions_since(&self, since_row_id: i64) -> Result<Vec<SourceReaction>, AppError> {
    let conn = self.conn.lock().expect("source connection poisoned");
    let mut stmt = conn.prepare(
      "SELECT m.ROWID, m.guid, c.chat_identifier, m.handle_id, m.is_from_me, m.date, \
              m.associated_message_guid, m.associated_message_type, m.text \
       FROM message m \
       JOIN chat_message_join cmj ON cmj.message_id = m.ROWID \
       JOIN chat c ON c.ROWID = cmj.chat_id \
       WHERE m.ROWID > ?1 AND m.associated_message_guid IS NOT NULL \
       ORDER BY m.ROWID",
    )?;
    let rows = stmt
      .query_map([since_row_id], |row| {
        Ok(SourceReaction {
          row_id: row.get(0)?,
          guid: row.get(1)?,
          chat_identifier: row.get(2)?,
          handle_row_id: row.get(3)?,
          is_from_me: row.get::<_, i64>(4)? != 0,
          date_apple_epoch_ns: row.get(5)?,
          associated_message_guid: row.get(6)?,
          associated_message_type: row.get(7)?,
          text: row.get(8)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;

    Ok(
      rows
        .into_iter()
        .filter(|r| {
          is_legacy_reaction_type(r.associated_message_type)
            || is_modern_text_reaction(r.associated_message_type, Some(&r.associated_message_guid), r.text.as_deref())
        })
        .collect(),
    )
  }

  pub fn membership_events_since(&self, since_row_id: i64) -> Result<Vec<SourceMembershipEvent>, AppError> {
    let conn = self.conn.lock().expect("source connection poisoned");
    let mut stmt = conn.prepare(
      "SELECT m.ROWID, m.guid, c.chat_identifier, m.handle_id, m.is_from_me, m.date, \
              m.group_action_type, m.group_title \
       FROM message m \
       JOIN chat_message_join cmj ON cmj.message_id = m.ROWID \
       JOIN chat c ON c.ROWID = cmj.chat_id \
       WHERE m.ROWID > ?1 AND m.item_type != ?2 \
       ORDER BY m.ROWID",
    )?;
    let rows = stmt
      .query_map([since_row_id, ITEM_TYPE_NORMAL], |row| {
        Ok(SourceMembershipEvent {
          row_id: row.get(0)?,
          guid: row.get(1)?,
          chat_identifier: row.get(2)?,
          handle_row_id: row.get(3)?,
          is_from_me: row.get::<_, i64>(4)? != 0,
          date_apple_epoch_ns: row.get(5)?,
          group_action_type: row.get(6)?,
          group_title: row.get(7)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
  }

  pub fn attachments_since(&self, since_row_id: i64) -> Result<Vec<SourceAttachment>, AppError> {
    let conn = self.conn.lock().expect("source connection poisoned");
    let mut stmt = conn.prepare(
      "SELECT a.ROWID, a.guid, m.guid, a.filename, a.mime_type, a.total_bytes, \
              a.is_sticker, a.created_date \
       FROM attachment a \
       JOIN message_attachment_join maj ON maj.attachment_id = a.ROWID \
       JOIN message m ON m.ROWID = maj.message_id \
       WHERE a.ROWID > ?1 ORDER BY a.ROWID",
    )?;
    let rows = stmt
      .query_map([since_row_id], |row| {
        Ok(SourceAttachment {
          row_id: row.get(0)?,
          guid: row.get(1)?,
          message_guid: row.get(2)?,
          filename: row.get(3)?,
          mime_type: row.get(4)?,
          total_bytes: row.get(5)?,
          is_sticker: row.get::<_, i64>(6)? != 0,
          created_date_apple_epoch_ns: row.get(7)?,
        })
      })?
      .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
  }

  fn row_to_raw_message(row: &Row) -> rusqlite::Result<RawMessage> {
    Ok(RawMessage {
      row_id: row.get(0)?,
      guid: row.get(1)?,
      chat_identifier: row.get(2)?,
      handle_row_id: row.get(3)?,
      is_from_me: row.get::<_, i64>(4)? != 0,
      text: row.get(5)?,
      attributed_body: row.get(6)?,
      date_apple_epoch_ns: row.get(7)?,
      service_name: row.get(8)?,
      reply_to_guid: row.get(9)?,
      associated_message_guid: row.get(10)?,
      associated_message_type: row.get::<_, Option<i64>>(11)?.unwrap_or(0),
    })
  }
}

struct RawMessage {
  row_id: i64,
  guid: String,
  chat_identifier: String,
  handle_row_id: Option<i64>,
  is_from_me: bool,
  text: Option<String>,
  attributed_body: Option<Vec<u8>>,
  date_apple_epoch_ns: i64,
  service_name: String,
  reply_to_guid: Option<String>,
  associated_message_guid: Option<String>,
  associated_message_type: i64,
}

impl From<RawMessage> for SourceMessage {
  fn from(raw: RawMessage) -> Self {
    Self {
      row_id: raw.row_id,
      guid: raw.guid,
      chat_identifier: raw.chat_identifier,
      handle_row_id: raw.handle_row_id,
      is_from_me: raw.is_from_me,
      text: raw.text,
      attributed_body: raw.attributed_body,
      date_apple_epoch_ns: raw.date_apple_epoch_ns,
      service_name: raw.service_name,
      reply_to_guid: raw.reply_to_guid,
      associated_message_guid: raw.associated_message_guid,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn seed_db() -> Connection {
    let conn = Connection::open_in_memory().unwrap();
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
         INSERT INTO chat VALUES (1, 'chat-guid-1', 'chat-identifier-1', 45, 'iMessage', NULL);
         INSERT INTO chat_handle_join VALUES (1, 1, 1);

         INSERT INTO message VALUES (1, 'msg-guid-1', 1, 0, 'hello there', NULL, 10, 'iMessage', NULL, NULL, 0, 0, NULL, NULL);
         INSERT INTO chat_message_join VALUES (1, 1, 1);

         INSERT INTO message VALUES (2, 'msg-guid-2', 1, 0, NULL, NULL, 20, 'iMessage', NULL, 'msg-guid-1', 2000, 0, NULL, NULL);
         INSERT INTO chat_message_join VALUES (2, 1, 2);

         INSERT INTO message VALUES (3, 'msg-guid-3', 1, 0, 'Loved \u{201c}hello there\u{201d}', NULL, 30, 'iMessage', NULL, 'msg-guid-1', 0, 0, NULL, NULL);
         INSERT INTO chat_message_join VALUES (3, 1, 3);

         INSERT INTO message VALUES (4, 'msg-guid-4', 1, 0, NULL, NULL, 40, 'iMessage', NULL, NULL, 0, 1, 1, 'Friends');
         INSERT INTO chat_message_join VALUES (4, 1, 4);

         INSERT INTO attachment VALUES (1, 'att-guid-1', 'photo.jpg', 'image/jpeg', 1024, 0, 50);
         INSERT INTO message_attachment_join VALUES (1, 1, 1);",
      )
      .unwrap();
    conn
  }

  fn reader_over(conn: Connection) -> SourceReader {
    SourceReader { conn: Mutex::new(conn) }
  }

  #[test]
  fn messages_excludes_legacy_and_modern_reactions_and_group_actions() {
    let reader = reader_over(seed_db());
    let messages = reader.messages_since(0).unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].guid, "msg-guid-1");
  }

  #[test]
  fn reactions_surfaces_legacy_and_modern_encodings() {
    let reader = reader_over(seed_db());
    let reactions = reader.reactions_since(0).unwrap();
    assert_eq!(reactions.len(), 2);
    assert!(reactions.iter().all(|r| r.associated_message_guid == "msg-guid-1"));
  }

  #[test]
  fn membership_events_surfaces_group_action_rows() {
    let reader = reader_over(seed_db());
    let events = reader.membership_events_since(0).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].group_title.as_deref(), Some("Friends"));
  }

  #[test]
  fn attachments_join_owning_message_guid() {
    let reader = reader_over(seed_db());
    let attachments = reader.attachments_since(0).unwrap();
    assert_eq!(attachments.len(), 1);
    assert_eq!(attachments[0].message_guid, "msg-guid-1");
  }

  #[test]
  fn max_message_row_id_reflects_latest_insert() {
    let reader = reader_over(seed_db());
    assert_eq!(reader.max_message_row_id().unwrap(), 4);
  }
}
