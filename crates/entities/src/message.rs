use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "message")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub guid: String,
  pub chat_id: i64,
  pub sender_id: Option<i64>,
  pub content: String,
  pub timestamp: DateTimeUtc,
  pub is_from_me: bool,
  pub message_type: String,
  pub service_name: String,
  pub reply_to_guid: Option<String>,
  pub associated_message_guid: Option<String>,
  pub conversation_id: Option<i64>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(
    belongs_to = "super::chat::Entity",
    from = "Column::ChatId",
    to = "super::chat::Column::Id"
  )]
  Chat,
  #[sea_orm(has_many = "super::attachment::Entity")]
  Attachment,
}

impl Related<super::chat::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Chat.def()
  }
}

impl Related<super::attachment::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Attachment.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
