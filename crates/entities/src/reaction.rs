use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
#[sea_orm(table_name = "reaction")]
pub struct Model {
  #[sea_orm(primary_key)]
  pub id: i64,
  pub guid: String,
  pub original_message_guid: String,
  pub sender_id: Option<i64>,
  pub is_from_me: bool,
  pub reaction_type: String,
  pub chat_id: i64,
  pub timestamp: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
