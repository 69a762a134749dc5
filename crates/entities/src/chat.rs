use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "chat")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub chat_identifier: String,
  pub chat_name: Option<String>,
  pub is_group: bool,
  pub service_name: String,
  pub created_date: DateTimeUtc,
  pub last_message_date: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
  #[sea_orm(has_many = "super::message::Entity")]
  Message,
  #[sea_orm(has_many = "super::conversation::Entity")]
  Conversation,
}

impl Related<super::message::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Message.def()
  }
}

impl Related<super::conversation::Entity> for Entity {
  fn to() -> RelationDef {
    Relation::Conversation.def()
  }
}

impl ActiveModelBehavior for ActiveModel {}
