use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use mw_entities::{attachment, chat, chat_participant, contact, contact_identifier, membership_event, message, reaction};
use mw_shared::{AppError, Identifier, apple_epoch_to_utc};
use mw_source::SourceReader;
use sea_orm::{
  ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter,
  TransactionTrait, sea_query::OnConflict,
};

/// Outcome of a single ETL stage run.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageStats {
  pub processed: usize,
  pub inserted: usize,
  pub updated: usize,
}

async fn fetch_blocking<T, F>(source: Arc<SourceReader>, f: F) -> Result<T, AppError>
where
  T: Send + 'static,
  F: FnOnce(&SourceReader) -> Result<T, AppError> + Send + 'static,
{
  tokio::task::spawn_blocking(move || f(&source))
    .await
    .map_err(|e| AppError::new(anyhow::anyhow!(e)))?
}

const MEDIA_TYPE_DOCUMENT: &str = "document";
const MEDIA_TYPE_STICKER: &str = "sticker";

fn derive_media_type(mime_type: Option<&str>, is_sticker: bool) -> String {
  if is_sticker {
    return MEDIA_TYPE_STICKER.to_owned();
  }
  match mime_type {
    Some(m) if m.starts_with("image/") => "image".to_owned(),
    Some(m) if m.starts_with("video/") => "video".to_owned(),
    Some(m) if m.starts_with("audio/") => "audio".to_owned(),
    _ => MEDIA_TYPE_DOCUMENT.to_owned(),
  }
}

/// Legacy/modern reaction encodings map onto a closed six-emoji set; anything
/// that fails to map is skipped rather than guessed at.
fn map_reaction_emoji(associated_message_type: i64, text: Option<&str>) -> Option<&'static str> {
  const LEGACY: &[(i64, &str)] = &[
    (2000, "❤️"),
    (2001, "👍"),
    (2002, "👎"),
    (2003, "😂"),
    (2004, "‼️"),
    (2005, "❓"),
    (3000, "❤️"),
    (3001, "👍"),
    (3002, "👎"),
    (3003, "😂"),
    (3004, "‼️"),
    (3005, "❓"),
  ];
  const VERBS: &[(&str, &str)] = &[
    ("Loved ", "❤️"),
    ("Liked ", "👍"),
    ("Disliked ", "👎"),
    ("Laughed at ", "😂"),
    ("Emphasized ", "‼️"),
    ("Questioned ", "❓"),
  ];

  if let Some((_, emoji)) = LEGACY.iter().find(|(t, _)| *t == associated_message_type) {
    return Some(emoji);
  }
  let text = text?;
  VERBS.iter().find(|(verb, _)| text.starts_with(verb)).map(|(_, emoji)| *emoji)
}

/// Strip the platform's private-use and control characters that occasionally
/// leak into extracted text, keeping printable characters and whitespace.
fn clean_content(raw: &str) -> String {
  raw
    .chars()
    .filter(|c| {
      let code = *c as u32;
      code != 0xFFFC && code != 0xFFFD && code != 0x01 && (c.is_whitespace() || !c.is_control())
    })
    .collect()
}

/// Fall back to a pragmatic extraction from the platform's attributed-body
/// blob when the plain-text column is empty: take the substring between the
/// first `NSString` marker and the first `NSDictionary` marker after it,
/// drop the 6 leading and 12 trailing bytes of that span, and trim. Skip
/// entirely if either marker is absent — the blob is opaque archive data and
/// this is a best-effort heuristic, not a real unarchiver.
fn extract_attributed_body_text(blob: &[u8]) -> Option<String> {
  let haystack = String::from_utf8_lossy(blob);
  let start = haystack.find("NSString")? + "NSString".len();
  let end = start + haystack[start..].find("NSDictionary")?;
  let span = &haystack[start..end];
  let bytes: Vec<char> = span.chars().collect();
  if bytes.len() <= 18 {
    return None;
  }
  let trimmed: String = bytes[6..bytes.len() - 12].iter().collect();
  let trimmed = trimmed.trim();
  if trimmed.is_empty() { None } else { Some(trimmed.to_owned()) }
}

fn derive_content(text: Option<&str>, attributed_body: Option<&[u8]>) -> Option<String> {
  if let Some(t) = text {
    if !t.trim().is_empty() {
      return Some(clean_content(t));
    }
  }
  attributed_body.and_then(extract_attributed_body_text).map(|s| clean_content(&s))
}

/// Upsert a contact for a normalized identifier, reusing an existing
/// `contact_identifier` match. Contact display names default to the
/// normalized identifier; an existing name that is empty, purely digits, or
/// identical to the identifier may be refreshed, since `chat.db` carries no
/// independent display-name source to judge a "better" candidate against.
async fn upsert_contact_for_identifier(db: &DatabaseConnection, normalized: &Identifier) -> Result<i64, AppError> {
  let kind = format!("{:?}", normalized.kind).to_lowercase();

  if let Some(existing) = contact_identifier::Entity::find()
    .filter(contact_identifier::Column::Identifier.eq(normalized.value.clone()))
    .filter(contact_identifier::Column::IdentifierType.eq(kind.clone()))
    .one(db)
    .await?
  {
    if let Some(contact_row) = contact::Entity::find_by_id(existing.contact_id).one(db).await? {
      let should_replace = contact_row.name.trim().is_empty()
        || contact_row.name.chars().all(|c| c.is_ascii_digit())
        || contact_row.name == normalized.value;
      if should_replace && contact_row.name != normalized.value {
        let mut active: contact::ActiveModel = contact_row.clone().into();
        active.name = Set(normalized.value.clone());
        active.last_updated = Set(Utc::now());
        active.update(db).await?;
      }
    }
    return Ok(existing.contact_id);
  }

  let new_contact = contact::ActiveModel {
    name: Set(normalized.value.clone()),
    nickname: Set(None),
    is_me: Set(false),
    data_source: Set("imessage".to_owned()),
    last_updated: Set(Utc::now()),
    ..Default::default()
  };
  let inserted = new_contact.insert(db).await?;

  contact_identifier::ActiveModel {
    contact_id: Set(inserted.id),
    identifier: Set(normalized.value.clone()),
    identifier_type: Set(kind),
    is_primary: Set(true),
    last_used: Set(Utc::now()),
    ..Default::default()
  }
  .insert(db)
  .await?;

  Ok(inserted.id)
}

pub async fn sync_contacts(db: &DatabaseConnection, source: Arc<SourceReader>, since_row_id: i64) -> Result<StageStats, AppError> {
  let handles = fetch_blocking(source, move |r| r.handles_since(since_row_id)).await?;
  let mut stats = StageStats::default();

  let txn = db.begin().await?;
  for handle in &handles {
    let normalized = Identifier::normalize(&handle.identifier);
    upsert_contact_for_identifier(&txn, &normalized).await?;
    stats.processed += 1;
  }
  txn.commit().await?;

  Ok(stats)
}

/// Builds a `source handle ROWID -> warehouse contact id` lookup once per
/// sync run, so per-row stages below do a map lookup instead of a query.
pub async fn build_handle_contact_map(db: &DatabaseConnection, source: Arc<SourceReader>) -> Result<HashMap<i64, i64>, AppError> {
  let handles = fetch_blocking(source, |r| r.handles_since(0)).await?;
  let mut map = HashMap::with_capacity(handles.len());

  for handle in &handles {
    let normalized = Identifier::normalize(&handle.identifier);
    let kind = format!("{:?}", normalized.kind).to_lowercase();
    if let Some(found) = contact_identifier::Entity::find()
      .filter(contact_identifier::Column::Identifier.eq(normalized.value))
      .filter(contact_identifier::Column::IdentifierType.eq(kind))
      .one(db)
      .await?
    {
      map.insert(handle.row_id, found.contact_id);
    }
  }

  Ok(map)
}

pub async fn sync_chats(db: &DatabaseConnection, source: Arc<SourceReader>, since_row_id: i64) -> Result<StageStats, AppError> {
  let chats = fetch_blocking(source, move |r| r.chats_since(since_row_id)).await?;
  let mut stats = StageStats::default();

  let txn = db.begin().await?;
  for source_chat in &chats {
    let is_group = source_chat.style == 43;
    let active = chat::ActiveModel {
      chat_identifier: Set(source_chat.chat_identifier.clone()),
      chat_name: Set(source_chat.display_name.clone()),
      is_group: Set(is_group),
      service_name: Set(source_chat.service_name.clone()),
      created_date: Set(Utc::now()),
      last_message_date: Set(Utc::now()),
      ..Default::default()
    };
    chat::Entity::insert(active)
      .on_conflict(OnConflict::column(chat::Column::ChatIdentifier).do_nothing().to_owned())
      .exec(&txn)
      .await
      .ok();
    stats.processed += 1;
  }
  txn.commit().await?;

  Ok(stats)
}

pub async fn sync_chat_participants(
  db: &DatabaseConnection,
  source: Arc<SourceReader>,
  handle_contacts: &HashMap<i64, i64>,
  since_row_id: i64,
) -> Result<StageStats, AppError> {
  let participants = fetch_blocking(source, move |r| r.chat_participants_since(since_row_id)).await?;
  let mut stats = StageStats::default();

  let txn = db.begin().await?;
  for participant in &participants {
    let Some(chat_row) = chat::Entity::find()
      .filter(chat::Column::ChatIdentifier.eq(participant.chat_identifier.clone()))
      .one(&txn)
      .await?
    else {
      return Err(AppError::with_kind(
        mw_shared::ErrorKind::DataMapping,
        anyhow::anyhow!("unknown chat_identifier {}", participant.chat_identifier),
      ));
    };
    let Some(&contact_id) = handle_contacts.get(&participant.handle_row_id) else {
      return Err(AppError::with_kind(
        mw_shared::ErrorKind::DataMapping,
        anyhow::anyhow!("unknown handle_id {}", participant.handle_row_id),
      ));
    };

    chat_participant::Entity::insert(chat_participant::ActiveModel {
      chat_id: Set(chat_row.id),
      contact_id: Set(contact_id),
    })
    .on_conflict(
      OnConflict::columns([chat_participant::Column::ChatId, chat_participant::Column::ContactId])
        .do_nothing()
        .to_owned(),
    )
    .exec(&txn)
    .await
    .ok();
    stats.processed += 1;
  }
  txn.commit().await?;

  Ok(stats)
}

pub async fn sync_messages(
  db: &DatabaseConnection,
  source: Arc<SourceReader>,
  handle_contacts: &HashMap<i64, i64>,
  since_row_id: i64,
) -> Result<StageStats, AppError> {
  let messages = fetch_blocking(source, move |r| r.messages_since(since_row_id)).await?;
  let mut stats = StageStats::default();

  let txn = db.begin().await?;
  for source_message in &messages {
    let Some(content) = derive_content(source_message.text.as_deref(), source_message.attributed_body.as_deref()) else {
      continue;
    };

    let Some(chat_row) = chat::Entity::find()
      .filter(chat::Column::ChatIdentifier.eq(source_message.chat_identifier.clone()))
      .one(&txn)
      .await?
    else {
      return Err(AppError::with_kind(
        mw_shared::ErrorKind::DataMapping,
        anyhow::anyhow!("unknown chat_identifier {}", source_message.chat_identifier),
      ));
    };

    let sender_id = source_message.handle_row_id.and_then(|h| handle_contacts.get(&h).copied());

    let active = message::ActiveModel {
      guid: Set(source_message.guid.clone()),
      chat_id: Set(chat_row.id),
      sender_id: Set(sender_id),
      content: Set(content),
      timestamp: Set(apple_epoch_to_utc(source_message.date_apple_epoch_ns)),
      is_from_me: Set(source_message.is_from_me),
      message_type: Set("text".to_owned()),
      service_name: Set(source_message.service_name.clone()),
      reply_to_guid: Set(source_message.reply_to_guid.clone()),
      associated_message_guid: Set(source_message.associated_message_guid.clone()),
      conversation_id: Set(None),
      ..Default::default()
    };
    message::Entity::insert(active)
      .on_conflict(OnConflict::column(message::Column::Guid).do_nothing().to_owned())
      .exec(&txn)
      .await
      .ok();
    stats.processed += 1;
  }
  txn.commit().await?;

  Ok(stats)
}

pub async fn sync_reactions(
  db: &DatabaseConnection,
  source: Arc<SourceReader>,
  handle_contacts: &HashMap<i64, i64>,
  since_row_id: i64,
) -> Result<StageStats, AppError> {
  let reactions = fetch_blocking(source, move |r| r.reactions_since(since_row_id)).await?;
  let mut stats = StageStats::default();

  let txn = db.begin().await?;
  for source_reaction in &reactions {
    let Some(emoji) = map_reaction_emoji(source_reaction.associated_message_type, source_reaction.text.as_deref()) else {
      continue;
    };

    let Some(chat_row) = chat::Entity::find()
      .filter(chat::Column::ChatIdentifier.eq(source_reaction.chat_identifier.clone()))
      .one(&txn)
      .await?
    else {
      return Err(AppError::with_kind(
        mw_shared::ErrorKind::DataMapping,
        anyhow::anyhow!("unknown chat_identifier {}", source_reaction.chat_identifier),
      ));
    };

    let sender_id = source_reaction.handle_row_id.and_then(|h| handle_contacts.get(&h).copied());

    let active = reaction::ActiveModel {
      guid: Set(format!("{}-r{}", source_reaction.associated_message_guid, source_reaction.row_id)),
      original_message_guid: Set(source_reaction.associated_message_guid.clone()),
      sender_id: Set(sender_id),
      is_from_me: Set(source_reaction.is_from_me),
      reaction_type: Set(emoji.to_owned()),
      chat_id: Set(chat_row.id),
      timestamp: Set(apple_epoch_to_utc(source_reaction.date_apple_epoch_ns)),
      ..Default::default()
    };
    reaction::Entity::insert(active)
      .on_conflict(OnConflict::column(reaction::Column::Guid).do_nothing().to_owned())
      .exec(&txn)
      .await
      .ok();
    stats.processed += 1;
  }
  txn.commit().await?;

  Ok(stats)
}

/// Encodes which convention this deployment uses for `group_action_type`:
/// `1` is "participant added", `3` is "participant removed". The source's
/// historical encoding varies; this is the one convention applied
/// consistently across a given installation.
fn membership_action_label(group_action_type: i64) -> &'static str {
  if group_action_type == 1 { "added" } else { "removed" }
}

pub async fn sync_membership_events(
  db: &DatabaseConnection,
  source: Arc<SourceReader>,
  handle_contacts: &HashMap<i64, i64>,
  since_row_id: i64,
) -> Result<StageStats, AppError> {
  let events = fetch_blocking(source, move |r| r.membership_events_since(since_row_id)).await?;
  let mut stats = StageStats::default();

  let txn = db.begin().await?;
  for event in &events {
    let Some(chat_row) = chat::Entity::find()
      .filter(chat::Column::ChatIdentifier.eq(event.chat_identifier.clone()))
      .one(&txn)
      .await?
    else {
      return Err(AppError::with_kind(
        mw_shared::ErrorKind::DataMapping,
        anyhow::anyhow!("unknown chat_identifier {}", event.chat_identifier),
      ));
    };

    let actor_and_member = event.handle_row_id.and_then(|h| handle_contacts.get(&h).copied());

    let active = membership_event::ActiveModel {
      guid: Set(event.guid.clone()),
      chat_id: Set(chat_row.id),
      actor_id: Set(actor_and_member),
      member_id: Set(actor_and_member),
      action_type: Set(membership_action_label(event.group_action_type).to_owned()),
      timestamp: Set(apple_epoch_to_utc(event.date_apple_epoch_ns)),
      is_from_me: Set(event.is_from_me),
      group_title: Set(event.group_title.clone()),
      ..Default::default()
    };
    membership_event::Entity::insert(active)
      .on_conflict(OnConflict::column(membership_event::Column::Guid).do_nothing().to_owned())
      .exec(&txn)
      .await
      .ok();
    stats.processed += 1;
  }
  txn.commit().await?;

  Ok(stats)
}

pub async fn sync_attachments(db: &DatabaseConnection, source: Arc<SourceReader>, since_row_id: i64) -> Result<StageStats, AppError> {
  let attachments = fetch_blocking(source, move |r| r.attachments_since(since_row_id)).await?;
  let mut stats = StageStats::default();

  let txn = db.begin().await?;
  for source_attachment in &attachments {
    let Some(message_row) = message::Entity::find()
      .filter(message::Column::Guid.eq(source_attachment.message_guid.clone()))
      .one(&txn)
      .await?
    else {
      return Err(AppError::with_kind(
        mw_shared::ErrorKind::DataMapping,
        anyhow::anyhow!("unknown message guid {}", source_attachment.message_guid),
      ));
    };

    let active = attachment::ActiveModel {
      guid: Set(source_attachment.guid.clone()),
      message_id: Set(message_row.id),
      file_name: Set(source_attachment.filename.clone()),
      mime_type: Set(source_attachment.mime_type.clone()),
      size: Set(source_attachment.total_bytes),
      media_type: Set(derive_media_type(source_attachment.mime_type.as_deref(), source_attachment.is_sticker)),
      is_sticker: Set(source_attachment.is_sticker),
      created_date: Set(apple_epoch_to_utc(source_attachment.created_date_apple_epoch_ns)),
      ..Default::default()
    };
    attachment::Entity::insert(active)
      .on_conflict(OnConflict::column(attachment::Column::Guid).do_nothing().to_owned())
      .exec(&txn)
      .await
      .ok();
    stats.processed += 1;
  }
  txn.commit().await?;

  Ok(stats)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn extracts_attributed_body_text_between_markers() {
    let blob = b"garbageNSStringXXXXXXhello worldYYYYYYYYYYYYNSDictionarytrailer";
    let extracted = extract_attributed_body_text(blob);
    assert_eq!(extracted.as_deref(), Some("hello world"));
  }

  #[test]
  fn missing_markers_yields_none() {
    assert_eq!(extract_attributed_body_text(b"no markers here"), None);
  }

  #[test]
  fn clean_content_strips_private_use_and_control_chars() {
    let raw = "hi\u{FFFC}there\u{0001}\u{FFFD}!";
    assert_eq!(clean_content(raw), "hithere!");
  }

  #[test]
  fn maps_legacy_and_modern_reaction_types() {
    assert_eq!(map_reaction_emoji(2000, None), Some("❤️"));
    assert_eq!(map_reaction_emoji(0, Some("Liked \u{201c}hi\u{201d}")), Some("👍"));
    assert_eq!(map_reaction_emoji(9999, Some("plain text")), None);
  }

  #[test]
  fn derives_media_type_from_mime_prefix() {
    assert_eq!(derive_media_type(Some("image/png"), false), "image");
    assert_eq!(derive_media_type(Some("application/pdf"), false), "document");
    assert_eq!(derive_media_type(Some("image/png"), true), "sticker");
  }
}
