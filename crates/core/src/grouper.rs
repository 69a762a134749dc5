use chrono::{DateTime, Utc};
use mw_entities::{chat, conversation, message};
use mw_shared::AppError;
use sea_orm::{
  ActiveModelTrait, ActiveValue::Set, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
  TransactionTrait,
};

/// A conversation window assembled from a contiguous run of messages before
/// it is persisted.
struct Window {
  initiator_id: Option<i64>,
  start_time: DateTime<Utc>,
  end_time: DateTime<Utc>,
  message_ids: Vec<i64>,
}

/// Rebuilds every chat's conversation windows from scratch: clears
/// `conversation_id` on all messages, deletes all conversations, then
/// regroups each chat's messages by `gap_threshold_seconds`. Destructive and
/// stateless by design — the grouping is a pure function of message
/// timestamps, so there is nothing worth reconciling incrementally.
///
/// A gap of exactly the threshold keeps the current conversation; only a gap
/// strictly greater than the threshold starts a new one.
pub async fn regroup_all(db: &DatabaseConnection, gap_threshold_seconds: i64) -> Result<usize, AppError> {
  let txn = db.begin().await?;

  message::Entity::update_many()
    .col_expr(message::Column::ConversationId, sea_orm::sea_query::Expr::value(Option::<i64>::None))
    .exec(&txn)
    .await?;
  conversation::Entity::delete_many().exec(&txn).await?;

  let chats = chat::Entity::find().all(&txn).await?;
  let mut conversation_count = 0;

  for chat_row in &chats {
    let messages = message::Entity::find()
      .filter(message::Column::ChatId.eq(chat_row.id))
      .order_by_asc(message::Column::Timestamp)
      .order_by_asc(message::Column::Id)
      .all(&txn)
      .await?;

    for window in group_into_windows(&messages, gap_threshold_seconds) {
      let inserted = conversation::ActiveModel {
        chat_id: Set(chat_row.id),
        initiator_id: Set(window.initiator_id),
        start_time: Set(window.start_time),
        end_time: Set(window.end_time),
        message_count: Set(window.message_ids.len() as i64),
        gap_threshold_seconds: Set(gap_threshold_seconds),
        summary: Set(None),
        ..Default::default()
      }
      .insert(&txn)
      .await?;

      for message_id in &window.message_ids {
        message::Entity::update_many()
          .col_expr(message::Column::ConversationId, sea_orm::sea_query::Expr::value(Some(inserted.id)))
          .filter(message::Column::Id.eq(*message_id))
          .exec(&txn)
          .await?;
      }

      conversation_count += 1;
    }
  }

  txn.commit().await?;
  Ok(conversation_count)
}

fn group_into_windows(messages: &[message::Model], gap_threshold_seconds: i64) -> Vec<Window> {
  let mut windows = Vec::new();
  let mut current: Option<Window> = None;

  for m in messages {
    match &mut current {
      Some(window) if (m.timestamp - window.end_time).num_seconds() <= gap_threshold_seconds => {
        window.end_time = m.timestamp;
        window.message_ids.push(m.id);
      }
      _ => {
        if let Some(finished) = current.take() {
          windows.push(finished);
        }
        current = Some(Window {
          initiator_id: m.sender_id,
          start_time: m.timestamp,
          end_time: m.timestamp,
          message_ids: vec![m.id],
        });
      }
    }
  }

  if let Some(finished) = current {
    windows.push(finished);
  }

  windows
}

#[cfg(test)]
mod tests {
  use super::*;
  use chrono::TimeZone;

  fn at(seconds: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + seconds, 0).unwrap()
  }

  fn msg(id: i64, sender: Option<i64>, seconds: i64) -> message::Model {
    message::Model {
      id,
      guid: format!("g{id}"),
      chat_id: 1,
      sender_id: sender,
      content: "hi".to_owned(),
      timestamp: at(seconds),
      is_from_me: false,
      message_type: "text".to_owned(),
      service_name: "iMessage".to_owned(),
      reply_to_guid: None,
      associated_message_guid: None,
      conversation_id: None,
    }
  }

  #[test]
  fn splits_on_gap_exceeding_threshold() {
    let messages = vec![msg(1, Some(1), 0), msg(2, Some(2), 100), msg(3, Some(1), 1000)];
    let windows = group_into_windows(&messages, 500);
    assert_eq!(windows.len(), 2);
    assert_eq!(windows[0].message_ids, vec![1, 2]);
    assert_eq!(windows[1].message_ids, vec![3]);
  }

  #[test]
  fn gap_exactly_at_threshold_stays_in_same_conversation() {
    let messages = vec![msg(1, Some(1), 0), msg(2, Some(2), 500)];
    let windows = group_into_windows(&messages, 500);
    assert_eq!(windows.len(), 1);
    assert_eq!(windows[0].message_ids, vec![1, 2]);
  }

  #[test]
  fn initiator_is_first_message_sender() {
    let messages = vec![msg(1, Some(7), 0), msg(2, Some(8), 10)];
    let windows = group_into_windows(&messages, 500);
    assert_eq!(windows[0].initiator_id, Some(7));
  }

  #[test]
  fn empty_input_yields_no_windows() {
    let messages: Vec<message::Model> = vec![];
    assert!(group_into_windows(&messages, 500).is_empty());
  }

  #[test]
  fn tracks_end_time_as_last_message_in_window() {
    let messages = vec![msg(1, Some(1), 0), msg(2, Some(1), 200)];
    let windows = group_into_windows(&messages, 500);
    assert_eq!(windows[0].start_time, at(0));
    assert_eq!(windows[0].end_time, at(200));
  }
}
