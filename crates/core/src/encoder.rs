use mw_entities::{attachment, contact, message, reaction};
use mw_shared::AppError;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder};

/// Toggles for the conversation encoder's optional rendering of
/// non-essential detail. Every combination must re-encode the same
/// conversation to the same bytes on every call.
#[derive(Debug, Clone, Copy)]
pub struct EncodeOptions {
  pub include_names: bool,
  pub include_attachments: bool,
  pub include_reactions: bool,
  pub include_timestamps: bool,
}

impl Default for EncodeOptions {
  fn default() -> Self {
    Self {
      include_names: true,
      include_attachments: true,
      include_reactions: true,
      include_timestamps: false,
    }
  }
}

fn display_name(contact_row: Option<&contact::Model>) -> String {
  match contact_row {
    Some(c) => c.nickname.clone().filter(|n| !n.trim().is_empty()).unwrap_or_else(|| c.name.clone()),
    None => "Unknown".to_owned(),
  }
}

/// Renders a conversation's messages in timestamp order as
/// `"<Sender>: <text>"` lines, one per message, with `"Me"` substituted for
/// the owner's own messages. Empty-content messages are skipped; attachment
/// and reaction lines are appended directly under the message they belong
/// to when enabled.
pub async fn encode_conversation(db: &DatabaseConnection, conversation_id: i64, options: &EncodeOptions) -> Result<String, AppError> {
  let messages = message::Entity::find()
    .filter(message::Column::ConversationId.eq(conversation_id))
    .order_by_asc(message::Column::Timestamp)
    .order_by_asc(message::Column::Id)
    .all(db)
    .await?;

  let mut lines = Vec::with_capacity(messages.len());

  for m in &messages {
    if m.content.trim().is_empty() {
      continue;
    }

    let sender_label = if m.is_from_me {
      "Me".to_owned()
    } else {
      let sender = match m.sender_id {
        Some(id) => contact::Entity::find_by_id(id).one(db).await?,
        None => None,
      };
      display_name(sender.as_ref())
    };

    let mut line = String::new();
    if options.include_timestamps {
      line.push('[');
      line.push_str(&m.timestamp.format("%Y-%m-%d %H:%M:%S").to_string());
      line.push_str("] ");
    }
    if options.include_names {
      line.push_str(&sender_label);
      line.push_str(": ");
    }
    line.push_str(&m.content);
    lines.push(line);

    if options.include_attachments {
      let attachments = attachment::Entity::find().filter(attachment::Column::MessageId.eq(m.id)).all(db).await?;
      for a in &attachments {
        lines.push(format!("  [attachment: {}]", a.media_type));
      }
    }

    if options.include_reactions {
      let reactions = reaction::Entity::find()
        .filter(reaction::Column::OriginalMessageGuid.eq(m.guid.clone()))
        .all(db)
        .await?;
      for r in &reactions {
        let reactor = if r.is_from_me {
          "Me".to_owned()
        } else {
          let sender = match r.sender_id {
            Some(id) => contact::Entity::find_by_id(id).one(db).await?,
            None => None,
          };
          display_name(sender.as_ref())
        };
        lines.push(format!("  {} from {}", r.reaction_type, reactor));
      }
    }
  }

  Ok(lines.join("\n"))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn me_label_used_for_own_messages_without_db_lookup() {
    assert_eq!(display_name(None), "Unknown");
  }

  #[test]
  fn nickname_preferred_over_name() {
    let c = contact::Model {
      id: 1,
      name: "Jordan".to_owned(),
      nickname: Some("Jo".to_owned()),
      is_me: false,
      data_source: "imessage".to_owned(),
      last_updated: chrono::Utc::now(),
    };
    assert_eq!(display_name(Some(&c)), "Jo");
  }

  #[test]
  fn blank_nickname_falls_back_to_name() {
    let c = contact::Model {
      id: 1,
      name: "Jordan".to_owned(),
      nickname: Some("  ".to_owned()),
      is_me: false,
      data_source: "imessage".to_owned(),
      last_updated: chrono::Utc::now(),
    };
    assert_eq!(display_name(Some(&c)), "Jordan");
  }
}
